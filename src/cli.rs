use clap::{Parser, Subcommand};
use dialoguer::{Password, theme::ColorfulTheme};
use std::io::{self, BufRead, IsTerminal};
use std::path::PathBuf;
use zeroize::Zeroizing;

use crate::credential::Credential;
use crate::error::{PkgError, Result};
use crate::protocol::OperationRequest;
use crate::types::SearchField;

/// pkgdeck - search, inspect, install and remove packages through whichever
/// of apt, dnf or pacman this host has
#[derive(Parser)]
#[command(name = "pkgdeck")]
#[command(about = "One package workflow over apt, dnf and pacman")]
#[command(version)]
pub struct Cli {
    /// Print the raw JSON response instead of a human-readable summary
    #[arg(long, global = true)]
    pub json: bool,

    /// Path to a JSON session configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show which package manager is in use
    Detect {
        /// Forget the cached backend and probe again
        #[arg(long)]
        refresh: bool,
    },
    /// Search the package catalog
    Search {
        query: String,
        /// Field the query must match
        #[arg(short, long, default_value = "all")]
        field: SearchField,
    },
    /// List installed packages
    List {
        /// Keep only packages whose name or version contains this text
        #[arg(short, long)]
        filter: Option<String>,
    },
    /// Report which of the given packages are installed
    Check {
        #[arg(required = true)]
        names: Vec<String>,
    },
    /// Show what removing the given packages would do, without removing them
    CheckUninstall {
        #[arg(required = true)]
        names: Vec<String>,
    },
    /// Install packages (asks for the administrator password)
    Install {
        #[arg(required = true)]
        names: Vec<String>,
    },
    /// Remove packages (asks for the administrator password)
    Uninstall {
        #[arg(required = true)]
        names: Vec<String>,
    },
}

impl Commands {
    pub fn needs_credential(&self) -> bool {
        matches!(self, Self::Install { .. } | Self::Uninstall { .. })
    }

    /// Turn the parsed command into a session request. `credential` is
    /// consulted only for install and uninstall.
    pub fn into_request(self, credential: Option<Credential>) -> Result<OperationRequest> {
        let require = |credential: Option<Credential>| {
            credential.ok_or_else(|| PkgError::invalid_input("an administrator password is required"))
        };
        Ok(match self {
            Self::Detect { refresh } => OperationRequest::Detect { refresh },
            Self::Search { query, field } => OperationRequest::Search { query, field },
            Self::List { filter } => OperationRequest::ListInstalled { filter },
            Self::Check { names } => OperationRequest::CheckInstalled { names },
            Self::CheckUninstall { names } => OperationRequest::CheckUninstall { names },
            Self::Install { names } => OperationRequest::Install {
                names,
                credential: require(credential)?,
            },
            Self::Uninstall { names } => OperationRequest::Uninstall {
                names,
                credential: require(credential)?,
            },
        })
    }
}

impl Cli {
    pub fn parse_args() -> Self {
        <Self as clap::Parser>::parse()
    }
}

/// Where the administrator password is read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialSource {
    /// Hidden prompt on the controlling terminal
    Prompt,
    /// First line of piped stdin
    Stdin,
}

impl CredentialSource {
    pub fn for_terminal(stdin_is_terminal: bool) -> Self {
        if stdin_is_terminal {
            Self::Prompt
        } else {
            Self::Stdin
        }
    }

    pub fn detect() -> Self {
        Self::for_terminal(io::stdin().is_terminal())
    }

    pub fn obtain(self) -> Result<Credential> {
        match self {
            Self::Prompt => prompt_credential(),
            Self::Stdin => read_credential(io::stdin().lock()),
        }
    }
}

/// Ask for the password without echoing it.
fn prompt_credential() -> Result<Credential> {
    let secret = Password::with_theme(&ColorfulTheme::default())
        .with_prompt("Administrator password")
        .interact()
        .map_err(|e| PkgError::Io(io::Error::other(e)))?;
    Credential::new(secret)
}

/// Read the administrator password from the first line of `input`.
///
/// The trailing line ending is dropped; an empty line is rejected.
pub fn read_credential<R: BufRead>(mut input: R) -> Result<Credential> {
    let mut line = Zeroizing::new(String::new());
    input.read_line(&mut line)?;
    Credential::new(line.trim_end_matches(['\n', '\r']))
}
