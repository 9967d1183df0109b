//! The package session: one detected backend, one runner, one privileged
//! operation at a time.
//!
//! A `Session` is the explicit context every operation runs against. The
//! backend is detected lazily on first use and memoized until `redetect()`.
//! Detection and validation failures return before any process is spawned.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use tracing::{debug, info, warn};

use crate::backend::{self, ExecutableProbe, PathProbe};
use crate::command::{CommandSpec, ExitPolicy, InstalledProbe, Operation, Plan, synthesize};
use crate::credential::Credential;
use crate::config::SessionConfig;
use crate::dialects;
use crate::error::{ExecutionError, PkgError, Result};
use crate::executor::{PrivilegedExecutor, ProcessOutput, Runner};
use crate::reconcile::{reconcile, unique_names};
use crate::types::{BackendKind, Package, ParseContext, SearchField};
use crate::validation::{is_safe_token, validate_names};

/// Packages together with the backend that produced them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageListing {
    pub packages: Vec<Package>,
    pub backend: BackendKind,
}

pub struct Session {
    config: SessionConfig,
    runner: Box<dyn Runner>,
    probe: Box<dyn ExecutableProbe>,
    backend: Mutex<Option<BackendKind>>,
    privileged_in_flight: AtomicBool,
}

/// Held while a privileged command runs; releases the session flag on drop.
struct PrivilegedSlot<'a>(&'a AtomicBool);

impl Drop for PrivilegedSlot<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl Session {
    /// A session that spawns real processes and probes `PATH`.
    pub fn new(config: SessionConfig) -> Result<Self> {
        config
            .validate()
            .map_err(|e| PkgError::config(format!("{:#}", e)))?;
        let runner = PrivilegedExecutor::from_config(&config);
        Ok(Self::with_parts(config, runner, PathProbe))
    }

    /// A session with an explicit runner and executable probe.
    pub fn with_parts(
        config: SessionConfig,
        runner: impl Runner + 'static,
        probe: impl ExecutableProbe + 'static,
    ) -> Self {
        Self {
            config,
            runner: Box::new(runner),
            probe: Box::new(probe),
            backend: Mutex::new(None),
            privileged_in_flight: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// The session's backend, detecting it on first use.
    pub fn backend(&self) -> Result<BackendKind> {
        let mut cached = self.backend.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(kind) = *cached {
            return Ok(kind);
        }
        let kind = match self.config.backend {
            Some(kind) => {
                info!("Using configured package manager: {}", kind);
                kind
            }
            None => backend::detect(self.probe.as_ref())?,
        };
        *cached = Some(kind);
        Ok(kind)
    }

    /// Forget the memoized backend and detect again.
    pub fn redetect(&self) -> Result<BackendKind> {
        self.backend
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        self.backend()
    }

    /// Search the backend catalog and mark which results are installed.
    pub fn search_packages(&self, query: &str, field: SearchField) -> Result<PackageListing> {
        let backend = self.backend()?;
        let spec = single_command(synthesize(
            backend,
            &Operation::Search {
                query: query.to_string(),
            },
        )?)?;
        let output = self.run_read_only(&spec)?;

        let mut packages: Vec<Package> =
            dialects::parse(backend, &output.stdout, ParseContext::Search)
                .into_iter()
                .filter(|pkg| field.matches(pkg, query))
                .collect();
        packages.truncate(self.config.search_limit);
        debug!("Search for {:?} returned {} package(s)", query, packages.len());

        let packages = if packages.is_empty() {
            packages
        } else {
            let candidates: Vec<&str> = packages
                .iter()
                .map(|pkg| pkg.name.as_str())
                .filter(|name| is_safe_token(name))
                .collect();
            match self.installed_among(backend, unique_names(candidates)) {
                Ok(installed) => reconcile(packages, &installed),
                Err(e) => {
                    warn!("Skipping installed-state annotation: {}", e);
                    packages
                }
            }
        };

        Ok(PackageListing { packages, backend })
    }

    /// Every installed package.
    pub fn list_installed(&self) -> Result<PackageListing> {
        let backend = self.backend()?;
        let spec = single_command(synthesize(backend, &Operation::ListInstalled)?)?;
        let output = self.run_read_only(&spec)?;

        let packages = dialects::parse(backend, &output.stdout, ParseContext::Installed)
            .into_iter()
            .map(|pkg| Package {
                installed: true,
                ..pkg
            })
            .collect();
        Ok(PackageListing { packages, backend })
    }

    /// Installed packages whose name or version contains `filter`
    /// (case-insensitive). An empty filter keeps everything.
    pub fn list_installed_filtered(&self, filter: &str) -> Result<PackageListing> {
        let mut listing = self.list_installed()?;
        let filter = filter.trim().to_lowercase();
        if !filter.is_empty() {
            listing.packages.retain(|pkg| {
                pkg.name.to_lowercase().contains(&filter)
                    || pkg.version.to_lowercase().contains(&filter)
            });
        }
        Ok(listing)
    }

    /// Which of `names` are installed, in first-seen order.
    pub fn check_installed<S: AsRef<str>>(&self, names: &[S]) -> Result<Vec<String>> {
        let backend = self.backend()?;
        validate_names(names)?;
        let unique = unique_names(names.iter().map(AsRef::as_ref));
        let installed = self.installed_among(backend, unique.clone())?;
        Ok(unique
            .into_iter()
            .filter(|name| installed.contains(name))
            .collect())
    }

    /// Dry-run removal; returns the backend's own account of what would go.
    pub fn check_uninstall<S: AsRef<str>>(&self, names: &[S]) -> Result<String> {
        let backend = self.backend()?;
        let spec = single_command(synthesize(
            backend,
            &Operation::CheckUninstall {
                names: to_owned(names),
            },
        )?)?;
        let output = self.run_read_only(&spec)?;
        Ok(output.transcript())
    }

    /// Install `names`; returns the transcript.
    pub fn install_packages<S: AsRef<str>>(
        &self,
        names: &[S],
        credential: Credential,
    ) -> Result<String> {
        let operation = Operation::Install {
            names: to_owned(names),
        };
        self.run_privileged(&operation, credential)
    }

    /// Remove `names`; returns the transcript.
    pub fn uninstall_packages<S: AsRef<str>>(
        &self,
        names: &[S],
        credential: Credential,
    ) -> Result<String> {
        let operation = Operation::Uninstall {
            names: to_owned(names),
        };
        self.run_privileged(&operation, credential)
    }

    fn run_privileged(&self, operation: &Operation, credential: Credential) -> Result<String> {
        let backend = self.backend()?;
        let spec = single_command(synthesize(backend, operation)?)?;

        let _slot = self.claim_privileged()?;
        let result = self.runner.run(&spec, Some(&credential));
        drop(credential);

        let output = interpret(&spec, result?)?;
        info!("{} completed", spec);
        Ok(output.transcript())
    }

    fn claim_privileged(&self) -> Result<PrivilegedSlot<'_>> {
        self.privileged_in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map(|_| PrivilegedSlot(&self.privileged_in_flight))
            .map_err(|_| PkgError::OperationInProgress)
    }

    fn run_read_only(&self, spec: &CommandSpec) -> Result<ProcessOutput> {
        let output = self.runner.run(spec, None)?;
        interpret(spec, output)
    }

    /// Run one probe per name; a failing probe means "not installed".
    fn installed_among(&self, backend: BackendKind, names: Vec<String>) -> Result<HashSet<String>> {
        if names.is_empty() {
            return Ok(HashSet::new());
        }
        let probes = match synthesize(backend, &Operation::CheckInstalled { names })? {
            Plan::Probes(probes) => probes,
            Plan::Run(_) => return Err(PkgError::invalid_input("installed check must use probes")),
        };

        let mut installed = HashSet::new();
        for InstalledProbe { package, spec, hit } in probes {
            match self.runner.run(&spec, None) {
                Ok(output) if hit.is_hit(&output) => {
                    installed.insert(package);
                }
                Ok(_) => debug!("{} is not installed", package),
                Err(e) => debug!("Probe for {} failed, treating as not installed: {}", package, e),
            }
        }
        Ok(installed)
    }
}

/// Apply the exit policy of `spec` to a finished process.
fn interpret(spec: &CommandSpec, output: ProcessOutput) -> Result<ProcessOutput> {
    if output.success {
        return Ok(output);
    }

    if let Some(code @ (126 | 127)) = output.exit_code {
        return Err(ExecutionError::NotExecutable {
            program: spec.program.clone(),
            code,
            output: output.captured(),
        }
        .into());
    }

    if spec.privileged && output.privilege_denied() {
        return Err(PkgError::PrivilegeDenied {
            output: output.captured(),
        });
    }

    match spec.exit_policy {
        ExitPolicy::Tolerant => Ok(output),
        ExitPolicy::Strict => Err(PkgError::CommandFailed {
            code: output.exit_code,
            output: output.captured(),
        }),
    }
}

fn single_command(plan: Plan) -> Result<CommandSpec> {
    match plan {
        Plan::Run(spec) => Ok(spec),
        Plan::Probes(_) => Err(PkgError::invalid_input(
            "operation expands to per-package probes",
        )),
    }
}

fn to_owned<S: AsRef<str>>(names: &[S]) -> Vec<String> {
    names.iter().map(|name| name.as_ref().to_string()).collect()
}
