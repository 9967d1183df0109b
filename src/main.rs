//! pkgdeck - Main entry point
//!
//! Parses one command, runs it on the session worker thread and prints the
//! response, either as JSON or as a short human-readable summary.

use std::io;
use std::process::ExitCode;
use std::sync::mpsc;

use anyhow::{Context, Result};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use pkgdeck::cli::{Cli, CredentialSource};
use pkgdeck::command_executor::{CommandRequest, spawn_executor_thread};
use pkgdeck::config::SessionConfig;
use pkgdeck::process_guard::{self, ProcessGuard};
use pkgdeck::protocol::{OperationResponse, ResponsePayload};
use pkgdeck::session::Session;

/// Initialize logging on stderr; `RUST_LOG` overrides the default level.
fn init_logger() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

fn main() -> ExitCode {
    init_logger();

    match run() {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("✗ {:#}", e);
            ExitCode::FAILURE
        }
    }
}

/// Returns whether the operation succeeded.
fn run() -> Result<bool> {
    // Read-only children are terminated if we receive SIGINT/SIGTERM
    if let Err(e) = process_guard::init_signal_handlers() {
        warn!("Failed to initialize signal handlers: {}", e);
    }
    let _guard = ProcessGuard::new();

    let cli = Cli::parse_args();
    debug!("CLI arguments parsed");

    let config = match &cli.config {
        Some(path) => {
            info!("Loading configuration from {:?}", path);
            SessionConfig::load_from_file(path)?
        }
        None => SessionConfig::default(),
    };
    let session = Session::new(config)?;

    let credential = if cli.command.needs_credential() {
        let source = CredentialSource::detect();
        debug!("Reading administrator password via {:?}", source);
        Some(source.obtain().context("Failed to read administrator password")?)
    } else {
        None
    };
    let request = cli.command.into_request(credential)?;

    let (request_tx, request_rx) = mpsc::channel();
    let (response_tx, response_rx) = mpsc::channel();
    let worker = spawn_executor_thread(session, request_rx, response_tx);

    request_tx
        .send(CommandRequest { id: 1, request })
        .context("Session worker stopped before accepting the request")?;
    drop(request_tx);
    let response = response_rx
        .recv()
        .context("Session worker stopped without answering")?
        .response;
    if worker.join().is_err() {
        warn!("Session worker panicked during shutdown");
    }

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&response)?);
    } else {
        print_human(&response);
    }
    Ok(response.success)
}

fn print_human(response: &OperationResponse) {
    match &response.payload {
        ResponsePayload::Packages { data, backend } => {
            for package in data {
                let marker = if package.installed { "[installed] " } else { "" };
                let detail = if package.version.is_empty() {
                    &package.description
                } else {
                    &package.version
                };
                println!("{}{} {}", marker, package.name, detail);
            }
            println!("✓ {} package(s) via {}", data.len(), backend);
        }
        ResponsePayload::Backend { backend } => println!("{}", backend),
        ResponsePayload::InstalledNames { installed_names } => {
            for name in installed_names {
                println!("{}", name);
            }
        }
        ResponsePayload::Advisory { advisory_text } => print!("{}", advisory_text),
        ResponsePayload::Transcript { transcript } => {
            print!("{}", transcript);
            println!("✓ Done");
        }
        ResponsePayload::Failure {
            error,
            error_kind,
            transcript,
        } => {
            if let Some(transcript) = transcript {
                eprint!("{}", transcript);
            }
            eprintln!("✗ {} ({})", error, error_kind);
        }
    }
}
