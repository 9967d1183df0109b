//! Session configuration, loadable from a JSON file.
//!
//! Every field has a default, so a config file only needs the keys it wants
//! to change.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::executor::ExecutorLimits;
use crate::types::BackendKind;

/// Hard ceiling on captured output per invocation (10 MiB)
pub const DEFAULT_OUTPUT_LIMIT: usize = 10 * 1024 * 1024;

/// The program that elevates privileged commands, and its fixed arguments.
///
/// The defaults make sudo read the password from stdin (`-S`) with an empty
/// prompt (`-p ""`) so nothing lands in the transcript.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElevationConfig {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl Default for ElevationConfig {
    fn default() -> Self {
        Self {
            program: "sudo".to_string(),
            args: vec!["-S".to_string(), "-p".to_string(), String::new()],
        }
    }
}

/// Runtime settings for a package session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Deadline for searches, listings, probes and dry runs
    pub read_timeout_secs: u64,
    /// Deadline for install and uninstall
    pub privileged_timeout_secs: u64,
    /// Combined stdout+stderr capture ceiling in bytes
    pub output_limit_bytes: usize,
    /// Maximum number of search results returned
    pub search_limit: usize,
    pub elevation: ElevationConfig,
    /// Skip detection and use this backend
    pub backend: Option<BackendKind>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            read_timeout_secs: 120,
            privileged_timeout_secs: 30 * 60,
            output_limit_bytes: DEFAULT_OUTPUT_LIMIT,
            search_limit: 100,
            elevation: ElevationConfig::default(),
            backend: None,
        }
    }
}

impl SessionConfig {
    pub fn limits(&self) -> ExecutorLimits {
        ExecutorLimits {
            read_timeout: Duration::from_secs(self.read_timeout_secs),
            privileged_timeout: Duration::from_secs(self.privileged_timeout_secs),
            output_limit: self.output_limit_bytes,
        }
    }

    /// Save configuration to a JSON file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let json = serde_json::to_string_pretty(self)
            .context("Failed to serialize configuration to JSON")?;

        fs::write(&path, json)
            .with_context(|| format!("Failed to write configuration to {:?}", path.as_ref()))?;

        Ok(())
    }

    /// Load and validate configuration from a JSON file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read configuration from {:?}", path.as_ref()))?;

        let config: Self =
            serde_json::from_str(&content).context("Failed to parse configuration JSON")?;
        config.validate()?;

        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.read_timeout_secs == 0 || self.privileged_timeout_secs == 0 {
            anyhow::bail!("Timeouts must be at least one second");
        }
        if self.output_limit_bytes == 0 {
            anyhow::bail!("output_limit_bytes must be positive");
        }
        if self.search_limit == 0 {
            anyhow::bail!("search_limit must be positive");
        }
        if self.elevation.program.trim().is_empty() {
            anyhow::bail!("Elevation program must be specified");
        }
        Ok(())
    }
}
