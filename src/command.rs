//! Command synthesis
//!
//! Turns a logical [`Operation`] into the exact argv the detected backend
//! understands. Every user-supplied token is validated here, before anything
//! can reach a process. Commands are always spawned directly (no shell), so a
//! validated token is passed as a single argv element.

use std::fmt;

use crate::error::Result;
use crate::executor::ProcessOutput;
use crate::types::BackendKind;
use crate::validation::{validate_names, validate_token};

/// How a non-zero exit status is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitPolicy {
    /// Non-zero exit is a command failure
    Strict,
    /// Non-zero exit still yields the captured output as a result; used where
    /// backends signal "no match" or "declined" through the exit code
    Tolerant,
}

/// One fully resolved command line.
///
/// A spec never holds the credential. `privileged` only marks the point where
/// the executor must wrap the command in the elevation program and pipe the
/// secret into it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub privileged: bool,
    pub exit_policy: ExitPolicy,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            privileged: false,
            exit_policy: ExitPolicy::Strict,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Mark as requiring elevation.
    pub fn privileged(mut self) -> Self {
        self.privileged = true;
        self
    }

    pub fn tolerant(mut self) -> Self {
        self.exit_policy = ExitPolicy::Tolerant;
        self
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.privileged {
            f.write_str("[elevated] ")?;
        }
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// What counts as a hit for a single-package installed probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeHit {
    /// The probe exited zero
    ExitSuccess,
    /// The probe exited zero and printed a row starting with this prefix
    /// (dpkg lists removed-but-configured packages too; only `ii` rows count)
    RowPrefix(&'static str),
}

impl ProbeHit {
    pub fn is_hit(&self, output: &ProcessOutput) -> bool {
        if !output.success {
            return false;
        }
        match self {
            Self::ExitSuccess => true,
            Self::RowPrefix(prefix) => output.stdout.lines().any(|line| line.starts_with(prefix)),
        }
    }
}

/// A single-package "is this installed?" probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledProbe {
    pub package: String,
    pub spec: CommandSpec,
    pub hit: ProbeHit,
}

/// The logical operations every backend supports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    Search { query: String },
    ListInstalled,
    CheckInstalled { names: Vec<String> },
    CheckUninstall { names: Vec<String> },
    Install { names: Vec<String> },
    Uninstall { names: Vec<String> },
}

/// The synthesized work for one operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Plan {
    /// A single command
    Run(CommandSpec),
    /// Independent per-package probes, run one at a time; a failed probe means
    /// "not installed", never a failed batch
    Probes(Vec<InstalledProbe>),
}

/// Build the plan for `operation` in `backend`'s dialect.
pub fn synthesize(backend: BackendKind, operation: &Operation) -> Result<Plan> {
    let dialect = backend.dialect();
    let plan = match operation {
        Operation::Search { query } => {
            validate_token(query)?;
            Plan::Run(dialect.search(query))
        }
        Operation::ListInstalled => Plan::Run(dialect.list_installed()),
        Operation::CheckInstalled { names } => {
            validate_names(names)?;
            Plan::Probes(names.iter().map(|name| dialect.probe_installed(name)).collect())
        }
        Operation::CheckUninstall { names } => {
            validate_names(names)?;
            Plan::Run(dialect.check_uninstall(names))
        }
        Operation::Install { names } => {
            validate_names(names)?;
            Plan::Run(dialect.install(names))
        }
        Operation::Uninstall { names } => {
            validate_names(names)?;
            Plan::Run(dialect.uninstall(names))
        }
    };
    Ok(plan)
}
