//! Error handling module for pkgdeck
//!
//! Provides centralized error handling with proper error types using thiserror.
//! Detection and validation failures are raised before any process is spawned;
//! process-level failures always carry whatever output was captured so far.

use serde::Serialize;
use std::time::Duration;
use strum::{Display, IntoStaticStr};
use thiserror::Error;

/// Output captured from a child process, possibly partial.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CapturedOutput {
    pub stdout: String,
    pub stderr: String,
}

impl CapturedOutput {
    /// Combined stdout followed by stderr, the transcript shown to operators.
    pub fn combined(&self) -> String {
        let mut text = String::with_capacity(self.stdout.len() + self.stderr.len());
        text.push_str(&self.stdout);
        text.push_str(&self.stderr);
        text
    }

    pub fn is_empty(&self) -> bool {
        self.stdout.is_empty() && self.stderr.is_empty()
    }
}

/// Failures of the process layer itself, as opposed to a command that ran and
/// exited non-zero.
#[derive(Error, Debug)]
pub enum ExecutionError {
    /// The program could not be started at all
    #[error("Failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The process outlived its deadline and was terminated
    #[error("{program} timed out after {}s", .after.as_secs())]
    Timeout {
        program: String,
        after: Duration,
        output: CapturedOutput,
    },

    /// The process produced more output than the capture ceiling allows
    #[error("{program} exceeded the output limit of {limit} bytes")]
    CaptureLimit {
        program: String,
        limit: usize,
        output: CapturedOutput,
    },

    /// The program was spawned but the platform reported it as missing or not
    /// executable (exit status 127/126)
    #[error("{program} could not be executed (exit code {code})")]
    NotExecutable {
        program: String,
        code: i32,
        output: CapturedOutput,
    },

    /// IO failure while talking to a running child
    #[error("IO error while running {program}: {source}")]
    Io {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

impl ExecutionError {
    /// Partial output captured before the failure, if any.
    pub fn output(&self) -> Option<&CapturedOutput> {
        match self {
            Self::Timeout { output, .. }
            | Self::CaptureLimit { output, .. }
            | Self::NotExecutable { output, .. } => Some(output),
            Self::Spawn { .. } | Self::Io { .. } => None,
        }
    }
}

/// Main error type for pkgdeck
#[derive(Error, Debug)]
pub enum PkgError {
    /// None of apt-get, dnf or pacman is present on this host
    #[error("No supported package manager found")]
    NoBackendFound,

    /// A user-supplied token failed the safe-token check
    #[error("Unsafe token {token:?}: {reason}")]
    UnsafeToken { token: String, reason: String },

    /// Request preconditions not met (empty name list, empty credential)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Spawn failure, timeout or capture limit
    #[error(transparent)]
    Execution(#[from] ExecutionError),

    /// The elevation program rejected the credential
    #[error("Administrator password was rejected")]
    PrivilegeDenied { output: CapturedOutput },

    /// The command ran and exited non-zero
    #[error("Command failed with exit code {}", .code.map_or_else(|| "none".to_string(), |c| c.to_string()))]
    CommandFailed {
        code: Option<i32>,
        output: CapturedOutput,
    },

    /// A privileged operation is already running in this session
    #[error("Another install or uninstall is already in progress")]
    OperationInProgress,

    /// Configuration errors (loading, parsing, validation)
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO errors outside of process execution
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Stable, machine-readable error category for serialized responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display, IntoStaticStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ErrorKind {
    NoBackendFound,
    UnsafeToken,
    InvalidInput,
    ExecutionError,
    PrivilegeDenied,
    CommandFailed,
    OperationInProgress,
    Config,
    Internal,
}

/// Result type alias for pkgdeck operations
pub type Result<T> = std::result::Result<T, PkgError>;

impl PkgError {
    /// Create an unsafe-token error
    pub fn unsafe_token(token: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::UnsafeToken {
            token: token.into(),
            reason: reason.into(),
        }
    }

    /// Create an invalid-input error
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NoBackendFound => ErrorKind::NoBackendFound,
            Self::UnsafeToken { .. } => ErrorKind::UnsafeToken,
            Self::InvalidInput(_) => ErrorKind::InvalidInput,
            Self::Execution(_) => ErrorKind::ExecutionError,
            Self::PrivilegeDenied { .. } => ErrorKind::PrivilegeDenied,
            Self::CommandFailed { .. } => ErrorKind::CommandFailed,
            Self::OperationInProgress => ErrorKind::OperationInProgress,
            Self::Config(_) => ErrorKind::Config,
            Self::Io(_) | Self::Json(_) => ErrorKind::Internal,
        }
    }

    /// Whatever the failed process printed before it failed.
    pub fn partial_output(&self) -> Option<&CapturedOutput> {
        match self {
            Self::Execution(e) => e.output(),
            Self::PrivilegeDenied { output } | Self::CommandFailed { output, .. } => Some(output),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = PkgError::config("search_limit must be positive");
        assert_eq!(
            err.to_string(),
            "Configuration error: search_limit must be positive"
        );

        let err = PkgError::invalid_input("no packages given");
        assert_eq!(err.to_string(), "Invalid input: no packages given");

        assert_eq!(
            PkgError::NoBackendFound.to_string(),
            "No supported package manager found"
        );
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: PkgError = io_err.into();
        assert!(matches!(err, PkgError::Io(_)));
        assert_eq!(err.kind(), ErrorKind::Internal);
    }

    #[test]
    fn test_partial_output_is_carried() {
        let output = CapturedOutput {
            stdout: "Reading package lists...\n".into(),
            stderr: "E: Unable to locate package nope\n".into(),
        };
        let err = PkgError::CommandFailed {
            code: Some(100),
            output: output.clone(),
        };
        assert_eq!(err.partial_output(), Some(&output));
        assert_eq!(err.to_string(), "Command failed with exit code 100");

        let timeout = PkgError::from(ExecutionError::Timeout {
            program: "dnf".into(),
            after: Duration::from_secs(5),
            output: output.clone(),
        });
        assert_eq!(timeout.kind(), ErrorKind::ExecutionError);
        assert_eq!(timeout.partial_output(), Some(&output));
        assert_eq!(timeout.to_string(), "dnf timed out after 5s");
    }

    #[test]
    fn test_kind_serializes_snake_case() {
        assert_eq!(ErrorKind::NoBackendFound.to_string(), "no_backend_found");
        let json = serde_json::to_string(&ErrorKind::PrivilegeDenied).unwrap();
        assert_eq!(json, "\"privilege_denied\"");
    }

    #[test]
    fn test_combined_output_order() {
        let output = CapturedOutput {
            stdout: "out\n".into(),
            stderr: "err\n".into(),
        };
        assert_eq!(output.combined(), "out\nerr\n");
        assert!(!output.is_empty());
        assert!(CapturedOutput::default().is_empty());
    }
}
