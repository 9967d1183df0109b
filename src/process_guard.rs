//! Process lifecycle management for backend commands
//!
//! Every spawned backend command is tracked here by PID, in one of two sets:
//!
//! - Read-only commands (searches, listings, dry runs) lead their own process
//!   group, carry a parent death signal, and are killed on shutdown.
//! - Privileged commands (install, remove) lead a detached process group and
//!   are never killed by us. On a shutdown signal pkgdeck stays alive, still
//!   draining their output, until every one of them has exited.

use nix::libc;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

static CHILD_REGISTRY: OnceLock<Arc<Mutex<ChildRegistry>>> = OnceLock::new();

/// How often a pending shutdown re-checks for running privileged commands.
const PRIVILEGED_POLL: Duration = Duration::from_millis(200);

/// PIDs of the backend commands currently running.
#[derive(Debug, Default)]
pub struct ChildRegistry {
    read_only: HashSet<u32>,
    privileged: HashSet<u32>,
    /// Set once read-only groups have been signalled
    cleanup_initiated: bool,
}

impl ChildRegistry {
    /// The process-wide registry shared by executors and signal handlers
    pub fn global() -> Arc<Mutex<ChildRegistry>> {
        CHILD_REGISTRY
            .get_or_init(|| Arc::new(Mutex::new(ChildRegistry::default())))
            .clone()
    }

    pub fn register(&mut self, pid: u32) {
        self.read_only.insert(pid);
        debug!("Tracking read-only command PID {}", pid);
    }

    pub fn unregister(&mut self, pid: u32) {
        self.read_only.remove(&pid);
        debug!("Read-only command PID {} finished", pid);
    }

    /// Track an elevated command that shutdown must wait for.
    pub fn register_privileged(&mut self, pid: u32) {
        self.privileged.insert(pid);
        debug!("Tracking privileged command PID {}", pid);
    }

    pub fn unregister_privileged(&mut self, pid: u32) {
        self.privileged.remove(&pid);
        debug!("Privileged command PID {} finished", pid);
    }

    /// Number of read-only commands still running
    pub fn count(&self) -> usize {
        self.read_only.len()
    }

    pub fn privileged_count(&self) -> usize {
        self.privileged.len()
    }

    /// Stop every read-only command group: SIGTERM, then SIGKILL for groups
    /// still around after `grace_period`. Privileged commands are untouched.
    pub fn terminate_all(&mut self, grace_period: Duration) {
        if self.cleanup_initiated {
            debug!("Read-only commands already signalled");
            return;
        }
        self.cleanup_initiated = true;

        let groups: Vec<u32> = self.read_only.drain().collect();
        if groups.is_empty() {
            return;
        }
        info!("Stopping {} read-only command(s)", groups.len());

        for &pgid in &groups {
            signal_group_or_leader(pgid, Signal::SIGTERM);
        }

        let started = Instant::now();
        while started.elapsed() < grace_period {
            if !groups.iter().any(|&pgid| is_process_alive(pgid)) {
                debug!("Read-only commands exited after SIGTERM");
                return;
            }
            std::thread::sleep(Duration::from_millis(100));
        }

        for pgid in groups.into_iter().filter(|&pgid| is_process_alive(pgid)) {
            warn!("Command group {} ignored SIGTERM, killing it", pgid);
            signal_group_or_leader(pgid, Signal::SIGKILL);
        }
    }
}

fn send_signal(pid: u32, signal: Signal) -> Result<(), nix::Error> {
    signal::kill(Pid::from_raw(pid as i32), signal)
}

/// A negative PID addresses the whole group, so `dpkg` under `apt-get` or
/// `pacman` under `sudo` is reached too.
fn send_signal_to_group(pgid: u32, signal: Signal) -> Result<(), nix::Error> {
    signal::kill(Pid::from_raw(-(pgid as i32)), signal)
}

fn signal_group_or_leader(pgid: u32, signal: Signal) {
    if let Err(group_err) = send_signal_to_group(pgid, signal) {
        if let Err(e) = send_signal(pgid, signal) {
            warn!(
                "Could not send {} to command {} (group: {}, leader: {})",
                signal, pgid, group_err, e
            );
        }
    }
}

/// Forcibly kill the process group led by `pid`, falling back to the single
/// process. Fails with `EPERM` for groups now owned by root.
pub fn kill_process_tree(pid: u32) -> Result<(), nix::Error> {
    send_signal_to_group(pid, Signal::SIGKILL).or_else(|_| send_signal(pid, Signal::SIGKILL))
}

/// Whether `pid` exists and is not a zombie.
fn is_process_alive(pid: u32) -> bool {
    if check_pid_exists(pid).is_err() {
        return false;
    }
    // /proc/<pid>/stat: "pid (comm) state ..."; comm may contain spaces
    match std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
        Ok(stat) => stat
            .rsplit_once(')')
            .and_then(|(_, rest)| rest.split_whitespace().next())
            .is_none_or(|state| !matches!(state, "Z" | "X")),
        Err(_) => true,
    }
}

/// Signal 0: existence and permission check only.
fn check_pid_exists(pid: u32) -> Result<(), nix::Error> {
    signal::kill(Pid::from_raw(pid as i32), None)
}

/// Block until no privileged command is registered in `registry`.
///
/// Returns how long the wait took.
pub fn wait_for_privileged(registry: &Mutex<ChildRegistry>, poll: Duration) -> Duration {
    let started = Instant::now();
    let mut announced = false;
    loop {
        let running = registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .privileged_count();
        if running == 0 {
            return started.elapsed();
        }
        if !announced {
            info!(
                "Waiting for {} privileged command(s) to finish before exiting",
                running
            );
            announced = true;
        }
        std::thread::sleep(poll);
    }
}

/// Shutdown sequence run on SIGINT/SIGTERM/SIGHUP: stop read-only commands,
/// then let any privileged command run to completion.
pub fn shutdown_children(registry: &Mutex<ChildRegistry>, grace_period: Duration) {
    registry
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .terminate_all(grace_period);
    wait_for_privileged(registry, PRIVILEGED_POLL);
}

/// Stops read-only commands when dropped; hold one for the whole of `main`
pub struct ProcessGuard {
    registry: Arc<Mutex<ChildRegistry>>,
}

impl ProcessGuard {
    pub fn new() -> Self {
        Self {
            registry: ChildRegistry::global(),
        }
    }

    pub fn child_count(&self) -> usize {
        self.registry.lock().map(|r| r.count()).unwrap_or(0)
    }
}

impl Default for ProcessGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ProcessGuard {
    fn drop(&mut self) {
        debug!("ProcessGuard dropped");
        if let Ok(mut registry) = self.registry.lock() {
            registry.terminate_all(Duration::from_secs(5));
        }
    }
}

/// Install the SIGINT/SIGTERM/SIGHUP handler thread. Call once at startup.
///
/// The process exits with `128 + signal` only after every privileged command
/// has exited; further signals during that wait are absorbed.
pub fn init_signal_handlers() -> Result<(), std::io::Error> {
    use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;

    let mut signals = Signals::new([SIGINT, SIGTERM, SIGHUP])?;

    std::thread::spawn(move || {
        if let Some(sig) = signals.forever().next() {
            let name = match sig {
                SIGINT => "SIGINT",
                SIGTERM => "SIGTERM",
                SIGHUP => "SIGHUP",
                _ => "signal",
            };
            info!("Received {}, shutting down", name);

            shutdown_children(&ChildRegistry::global(), Duration::from_secs(3));
            std::process::exit(128 + sig);
        }
    });

    Ok(())
}

/// Process-group setup for backend commands
pub trait CommandProcessGroup {
    /// Lead a new process group and receive SIGTERM if pkgdeck dies.
    fn in_new_process_group(&mut self) -> &mut Self;

    /// Lead a new process group with no parent death signal.
    fn in_detached_process_group(&mut self) -> &mut Self;
}

impl CommandProcessGroup for std::process::Command {
    fn in_new_process_group(&mut self) -> &mut Self {
        use std::os::unix::process::CommandExt;
        unsafe {
            self.pre_exec(|| {
                nix::unistd::setpgid(Pid::from_raw(0), Pid::from_raw(0))
                    .map_err(std::io::Error::other)?;

                if libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGTERM) == -1 {
                    return Err(std::io::Error::last_os_error());
                }

                Ok(())
            });
        }
        self
    }

    fn in_detached_process_group(&mut self) -> &mut Self {
        use std::os::unix::process::CommandExt;
        self.process_group(0)
    }
}
