//! Process execution with optional privilege elevation.
//!
//! Every backend command goes through [`Runner::run`]. The production runner,
//! [`PrivilegedExecutor`], enforces:
//!
//! - Process group isolation, with every child registered in the
//!   [`ChildRegistry`] so a shutdown signal stops read-only children and
//!   waits out privileged ones
//! - A deadline per invocation, started before any input is written; an
//!   overdue process tree is killed and reported as [`ExecutionError::Timeout`]
//! - A combined stdout+stderr capture ceiling
//! - Credential delivery over the elevation program's stdin only
//!
//! A non-zero exit is not an executor error: it comes back as a
//! [`ProcessOutput`] with `success: false`, and the caller decides what it
//! means.

use std::io::{Read, Write};
use std::process::{ChildStdin, Command, Stdio};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};
use wait_timeout::ChildExt;

use crate::command::CommandSpec;
use crate::config::{ElevationConfig, SessionConfig};
use crate::credential::Credential;
use crate::error::{CapturedOutput, ExecutionError};
use crate::process_guard::{ChildRegistry, CommandProcessGroup, kill_process_tree};

/// How often a running child is checked for exit, overflow and deadline.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// How long reader threads get to flush after the child is gone.
const DRAIN_GRACE: Duration = Duration::from_millis(500);

/// Messages the elevation program prints when it rejects a password.
const DENIAL_MARKERS: &[&str] = &[
    "incorrect password attempt",
    "Sorry, try again",
    "no password was provided",
    "a password is required",
    "is not in the sudoers file",
    "Authentication failure",
];

/// Output from a finished process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    /// Standard output from the process.
    pub stdout: String,
    /// Standard error from the process.
    pub stderr: String,
    /// Exit code (None if terminated by signal).
    pub exit_code: Option<i32>,
    /// Whether the process exited successfully (exit code 0).
    pub success: bool,
}

impl ProcessOutput {
    pub fn captured(&self) -> CapturedOutput {
        CapturedOutput {
            stdout: self.stdout.clone(),
            stderr: self.stderr.clone(),
        }
    }

    /// Combined stdout followed by stderr.
    pub fn transcript(&self) -> String {
        format!("{}{}", self.stdout, self.stderr)
    }

    /// Whether a failed run was the elevation program rejecting the password.
    pub fn privilege_denied(&self) -> bool {
        !self.success
            && DENIAL_MARKERS
                .iter()
                .any(|marker| self.stderr.contains(marker))
    }
}

/// The process-execution seam. Sessions only ever talk to a `Runner`.
pub trait Runner: Send + Sync {
    /// Run `spec`. For privileged specs the credential is piped into the
    /// elevation program; for everything else it is ignored.
    fn run(
        &self,
        spec: &CommandSpec,
        credential: Option<&Credential>,
    ) -> Result<ProcessOutput, ExecutionError>;
}

/// Time and size limits applied to every invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutorLimits {
    pub read_timeout: Duration,
    pub privileged_timeout: Duration,
    pub output_limit: usize,
}

impl ExecutorLimits {
    fn timeout_for(&self, spec: &CommandSpec) -> Duration {
        if spec.privileged {
            self.privileged_timeout
        } else {
            self.read_timeout
        }
    }
}

/// The production [`Runner`]: spawns real processes.
#[derive(Debug, Clone)]
pub struct PrivilegedExecutor {
    limits: ExecutorLimits,
    elevation: ElevationConfig,
}

impl PrivilegedExecutor {
    pub fn new(limits: ExecutorLimits, elevation: ElevationConfig) -> Self {
        Self { limits, elevation }
    }

    pub fn from_config(config: &SessionConfig) -> Self {
        Self::new(config.limits(), config.elevation.clone())
    }

    pub fn limits(&self) -> ExecutorLimits {
        self.limits
    }

    /// The argv actually spawned: privileged specs are wrapped in the
    /// elevation program.
    fn build_command(&self, spec: &CommandSpec) -> (String, Command) {
        if spec.privileged {
            let mut cmd = Command::new(&self.elevation.program);
            cmd.args(&self.elevation.args)
                .arg(&spec.program)
                .args(&spec.args);
            (self.elevation.program.clone(), cmd)
        } else {
            let mut cmd = Command::new(&spec.program);
            cmd.args(&spec.args);
            (spec.program.clone(), cmd)
        }
    }
}

impl Runner for PrivilegedExecutor {
    fn run(
        &self,
        spec: &CommandSpec,
        credential: Option<&Credential>,
    ) -> Result<ProcessOutput, ExecutionError> {
        let credential = credential.filter(|_| spec.privileged);
        let timeout = self.limits.timeout_for(spec);
        let (program, mut cmd) = self.build_command(spec);

        if spec.privileged {
            info!("Dispatching privileged command: {}", spec);
        } else {
            debug!("Running command: {}", spec);
        }

        // Backend output is parsed positionally; pin the locale.
        cmd.env("LC_ALL", "C")
            .stdin(if credential.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if spec.privileged {
            cmd.in_detached_process_group();
        } else {
            cmd.in_new_process_group();
        }

        let mut child = cmd.spawn().map_err(|source| ExecutionError::Spawn {
            program: program.clone(),
            source,
        })?;
        let pid = child.id();

        {
            let registry = ChildRegistry::global();
            let mut guard = registry.lock().unwrap_or_else(PoisonError::into_inner);
            if spec.privileged {
                guard.register_privileged(pid);
            } else {
                guard.register(pid);
            }
        }

        let deadline = Instant::now() + timeout;
        let capture = Capture::new(self.limits.output_limit);
        let mut readers = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            readers.push(capture.spawn_reader(stdout, Stream::Stdout));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(capture.spawn_reader(stderr, Stream::Stderr));
        }

        if let (Some(credential), Some(stdin)) = (credential, child.stdin.take()) {
            deliver_credential(stdin, credential, &program);
        }

        let outcome = loop {
            if capture.overflowed() {
                break Outcome::Overflow;
            }
            match child.wait_timeout(POLL_INTERVAL) {
                Ok(Some(status)) => break Outcome::Exited(status),
                Ok(None) if Instant::now() >= deadline => break Outcome::TimedOut,
                Ok(None) => continue,
                Err(source) => break Outcome::WaitFailed(source),
            }
        };

        let limit = self.limits.output_limit;
        let result = if let Outcome::Exited(status) = outcome {
            drain(&readers, Instant::now() + DRAIN_GRACE);
            let output = capture.snapshot(credential);
            if capture.overflowed() {
                Err(ExecutionError::CaptureLimit {
                    program: program.clone(),
                    limit,
                    output,
                })
            } else {
                Ok(ProcessOutput {
                    stdout: output.stdout,
                    stderr: output.stderr,
                    exit_code: status.code(),
                    success: status.success(),
                })
            }
        } else {
            terminate(&mut child, pid, &program);
            drain(&readers, Instant::now() + DRAIN_GRACE);
            let output = capture.snapshot(credential);
            let program = program.clone();
            Err(match outcome {
                Outcome::Overflow => ExecutionError::CaptureLimit {
                    program,
                    limit,
                    output,
                },
                Outcome::WaitFailed(source) => ExecutionError::Io { program, source },
                Outcome::TimedOut | Outcome::Exited(_) => ExecutionError::Timeout {
                    program,
                    after: timeout,
                    output,
                },
            })
        };

        {
            let registry = ChildRegistry::global();
            let mut guard = registry.lock().unwrap_or_else(PoisonError::into_inner);
            if spec.privileged {
                guard.unregister_privileged(pid);
            } else {
                guard.unregister(pid);
            }
        }

        match &result {
            Ok(output) if output.success => debug!("{} exited successfully", program),
            Ok(output) => debug!("{} exited with code {:?}", program, output.exit_code),
            Err(e) => warn!("{}", e),
        }

        result
    }
}

enum Outcome {
    Exited(std::process::ExitStatus),
    TimedOut,
    Overflow,
    WaitFailed(std::io::Error),
}

/// Write the password line on its own thread so a child that never reads
/// stdin cannot hold the caller past its deadline. The thread is not joined:
/// killing the child closes the pipe and ends a blocked write.
fn deliver_credential(mut stdin: ChildStdin, credential: &Credential, program: &str) {
    let payload = credential.stdin_payload();
    let program = program.to_string();
    std::thread::spawn(move || {
        if let Err(e) = stdin.write_all(&payload) {
            // The process may already have exited; its output says why.
            debug!("Could not deliver credential to {}: {}", program, e);
        }
    });
}

/// Kill an overdue child's whole process group and reap it when possible.
fn terminate(child: &mut std::process::Child, pid: u32, program: &str) {
    match kill_process_tree(pid) {
        Ok(()) => {
            let _ = child.wait();
        }
        Err(e) => {
            // Elevated trees belong to root and cannot be signalled from here;
            // the child is left to the elevation program.
            warn!("Could not terminate {} (PID {}): {}", program, pid, e);
        }
    }
}

/// Wait for reader threads to finish, but never past `until`.
fn drain(readers: &[JoinHandle<()>], until: Instant) {
    while readers.iter().any(|r| !r.is_finished()) && Instant::now() < until {
        std::thread::sleep(Duration::from_millis(5));
    }
}

#[derive(Debug, Clone, Copy)]
enum Stream {
    Stdout,
    Stderr,
}

/// Shared, bounded capture buffers for one process.
///
/// Buffers live behind `Arc<Mutex<_>>` so a partial snapshot can be taken
/// without joining readers that may never finish.
struct Capture {
    stdout: Arc<Mutex<Vec<u8>>>,
    stderr: Arc<Mutex<Vec<u8>>>,
    total: Arc<AtomicUsize>,
    overflow: Arc<AtomicBool>,
    limit: usize,
}

impl Capture {
    fn new(limit: usize) -> Self {
        Self {
            stdout: Arc::default(),
            stderr: Arc::default(),
            total: Arc::default(),
            overflow: Arc::default(),
            limit,
        }
    }

    fn overflowed(&self) -> bool {
        self.overflow.load(Ordering::SeqCst)
    }

    fn spawn_reader<R: Read + Send + 'static>(&self, mut reader: R, stream: Stream) -> JoinHandle<()> {
        let buffer = match stream {
            Stream::Stdout => Arc::clone(&self.stdout),
            Stream::Stderr => Arc::clone(&self.stderr),
        };
        let total = Arc::clone(&self.total);
        let overflow = Arc::clone(&self.overflow);
        let limit = self.limit;

        std::thread::spawn(move || {
            let mut chunk = [0u8; 8192];
            loop {
                match reader.read(&mut chunk) {
                    Ok(0) => break,
                    Ok(n) => {
                        let before = total.fetch_add(n, Ordering::SeqCst);
                        let room = limit.saturating_sub(before).min(n);
                        buffer
                            .lock()
                            .unwrap_or_else(PoisonError::into_inner)
                            .extend_from_slice(&chunk[..room]);
                        if before + n > limit {
                            overflow.store(true, Ordering::SeqCst);
                            break;
                        }
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                    Err(e) => {
                        debug!("{:?} reader stopped: {}", stream, e);
                        break;
                    }
                }
            }
        })
    }

    fn snapshot(&self, credential: Option<&Credential>) -> CapturedOutput {
        let text = |buffer: &Arc<Mutex<Vec<u8>>>| {
            let bytes = buffer.lock().unwrap_or_else(PoisonError::into_inner);
            let text = String::from_utf8_lossy(&bytes).into_owned();
            match credential {
                Some(credential) => credential.redact(text),
                None => text,
            }
        };
        CapturedOutput {
            stdout: text(&self.stdout),
            stderr: text(&self.stderr),
        }
    }
}
