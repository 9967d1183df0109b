//! Backend detection.
//!
//! Detection is a pure PATH lookup: nothing is spawned and nothing on the host
//! changes. Backends are probed in fixed priority order and the first one
//! present wins.

use std::collections::HashSet;

use tracing::{debug, info};

use crate::error::{PkgError, Result};
use crate::types::BackendKind;

/// Answers "is this executable available?".
pub trait ExecutableProbe: Send + Sync {
    fn is_present(&self, executable: &str) -> bool;
}

/// Looks executables up on `PATH`.
#[derive(Debug, Clone, Copy, Default)]
pub struct PathProbe;

impl ExecutableProbe for PathProbe {
    fn is_present(&self, executable: &str) -> bool {
        which::which(executable).is_ok()
    }
}

/// A fixed set of "installed" executables, for hosts that are not this one.
#[derive(Debug, Clone, Default)]
pub struct StaticProbe {
    present: HashSet<String>,
}

impl StaticProbe {
    pub fn new<I, S>(present: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            present: present.into_iter().map(Into::into).collect(),
        }
    }
}

impl ExecutableProbe for StaticProbe {
    fn is_present(&self, executable: &str) -> bool {
        self.present.contains(executable)
    }
}

/// Probe for the first supported backend, in priority order.
pub fn detect(probe: &dyn ExecutableProbe) -> Result<BackendKind> {
    for kind in BackendKind::PRIORITY {
        let executable = kind.primary_executable();
        if probe.is_present(executable) {
            info!("Detected package manager: {} ({})", kind, executable);
            return Ok(kind);
        }
        debug!("{} not found", executable);
    }
    Err(PkgError::NoBackendFound)
}
