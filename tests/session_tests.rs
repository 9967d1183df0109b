//! Session tests with a scripted runner
//!
//! No package manager is ever spawned here: a `ScriptedRunner` answers each
//! command from a closure and records what would have been run.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use pkgdeck::{
    BackendKind, CapturedOutput, CommandSpec, Credential, ErrorKind, ExecutableProbe,
    ExecutionError, OperationRequest, PkgError, ProcessOutput, ResponsePayload, Runner,
    SearchField, Session, SessionConfig, StaticProbe,
};
use serde_json::json;

type Script = dyn Fn(&CommandSpec) -> Result<ProcessOutput, ExecutionError> + Send + Sync;

#[derive(Debug, Clone, PartialEq, Eq)]
struct Call {
    line: String,
    credential_len: Option<usize>,
}

#[derive(Clone)]
struct ScriptedRunner {
    calls: Arc<Mutex<Vec<Call>>>,
    script: Arc<Script>,
}

impl ScriptedRunner {
    fn new<F>(script: F) -> Self
    where
        F: Fn(&CommandSpec) -> Result<ProcessOutput, ExecutionError> + Send + Sync + 'static,
    {
        Self {
            calls: Arc::default(),
            script: Arc::new(script),
        }
    }

    fn lines(&self) -> Vec<String> {
        self.calls.lock().unwrap().iter().map(|c| c.line.clone()).collect()
    }

    fn spawn_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

impl Runner for ScriptedRunner {
    fn run(
        &self,
        spec: &CommandSpec,
        credential: Option<&Credential>,
    ) -> Result<ProcessOutput, ExecutionError> {
        self.calls.lock().unwrap().push(Call {
            line: spec.to_string(),
            credential_len: credential.map(Credential::len),
        });
        (self.script)(spec)
    }
}

fn exit(code: i32, stdout: &str, stderr: &str) -> Result<ProcessOutput, ExecutionError> {
    Ok(ProcessOutput {
        stdout: stdout.to_string(),
        stderr: stderr.to_string(),
        exit_code: Some(code),
        success: code == 0,
    })
}

fn ok(stdout: &str) -> Result<ProcessOutput, ExecutionError> {
    exit(0, stdout, "")
}

fn session_on(backend: &str, runner: &ScriptedRunner) -> Session {
    Session::with_parts(
        SessionConfig::default(),
        runner.clone(),
        StaticProbe::new([backend]),
    )
}

fn credential() -> Credential {
    Credential::new("hunter2").unwrap()
}

const PACMAN_SEARCH: &str = "\
core/vim 9.1.0252-1 [installed]
    Vi Improved, a highly configurable text editor
extra/gvim 9.1.0252-1
    Vi Improved, GTK3 flavour
extra/neovim 0.9.5-4
    Fork of Vim aiming to improve user experience
extra/ctags 1:6.1.0-1
    Generates an index file of language objects, understood by vim
";

// =============================================================================
// Installed checks
// =============================================================================

#[test]
fn test_single_probe_failure_does_not_fail_batch() {
    let runner = ScriptedRunner::new(|spec| match spec.args.as_slice() {
        [flag, name] if flag == "-Q" && name == "pkgA" => ok("pkgA 1.0-1\n"),
        _ => exit(1, "", "error: package 'pkgB' was not found\n"),
    });
    let session = session_on("pacman", &runner);

    let response = session.handle(OperationRequest::CheckInstalled {
        names: vec!["pkgA".into(), "pkgB".into()],
    });
    assert_eq!(
        serde_json::to_value(&response).unwrap(),
        json!({ "success": true, "installedNames": ["pkgA"] })
    );
    assert_eq!(runner.lines(), ["pacman -Q pkgA", "pacman -Q pkgB"]);
}

#[test]
fn test_probe_execution_error_means_not_installed() {
    let runner = ScriptedRunner::new(|spec| match spec.args.last().map(String::as_str) {
        Some("htop") => ok("htop.x86_64  3.3.0-1.fc39  @updates\n"),
        _ => Err(ExecutionError::Timeout {
            program: "dnf".into(),
            after: Duration::from_secs(120),
            output: CapturedOutput::default(),
        }),
    });
    let session = session_on("dnf", &runner);
    let installed = session.check_installed(&["htop", "vim"]).unwrap();
    assert_eq!(installed, ["htop"]);
}

#[test]
fn test_duplicate_names_probed_once() {
    let runner = ScriptedRunner::new(|_| ok("ii  vim  2:9.1  amd64  editor\n"));
    let session = session_on("apt-get", &runner);
    let installed = session.check_installed(&["vim", "vim", "vim"]).unwrap();
    assert_eq!(installed, ["vim"]);
    assert_eq!(runner.lines(), ["dpkg -l vim"]);
}

#[test]
fn test_dpkg_removed_row_is_not_installed() {
    let runner = ScriptedRunner::new(|_| ok("rc  vim  2:9.1  amd64  editor\n"));
    let session = session_on("apt-get", &runner);
    assert!(session.check_installed(&["vim"]).unwrap().is_empty());
}

// =============================================================================
// Validation and detection happen before anything is spawned
// =============================================================================

#[test]
fn test_install_empty_list_spawns_nothing() {
    let runner = ScriptedRunner::new(|_| ok(""));
    let session = session_on("pacman", &runner);

    let response = session.handle(OperationRequest::Install {
        names: vec![],
        credential: credential(),
    });
    assert!(!response.success);
    match response.payload {
        ResponsePayload::Failure { error_kind, .. } => {
            assert_eq!(error_kind, ErrorKind::InvalidInput)
        }
        other => panic!("unexpected payload: {other:?}"),
    }
    assert_eq!(runner.spawn_count(), 0);
}

#[test]
fn test_unsafe_names_rejected_before_spawn() {
    let runner = ScriptedRunner::new(|_| ok(""));
    let session = session_on("apt-get", &runner);

    for bad in ["vim; rm -rf /", "-y", "$(reboot)", "a b", "vim|cat"] {
        let err = session.uninstall_packages(&[bad], credential()).unwrap_err();
        assert!(matches!(err, PkgError::UnsafeToken { .. }), "{bad:?}: {err}");
        assert!(matches!(
            session.search_packages(bad, SearchField::All),
            Err(PkgError::UnsafeToken { .. })
        ));
    }
    assert!(matches!(
        session.check_installed(&["ok", "--force"]),
        Err(PkgError::UnsafeToken { .. })
    ));
    assert_eq!(runner.spawn_count(), 0);
}

#[test]
fn test_no_backend_fails_every_operation_without_spawning() {
    let runner = ScriptedRunner::new(|_| ok(""));
    let session = Session::with_parts(
        SessionConfig::default(),
        runner.clone(),
        StaticProbe::new(["apt", "yum", "zypper"]),
    );

    let requests = vec![
        OperationRequest::Detect { refresh: false },
        OperationRequest::Search {
            query: "vim".into(),
            field: SearchField::All,
        },
        OperationRequest::ListInstalled { filter: None },
        OperationRequest::CheckInstalled {
            names: vec!["vim".into()],
        },
        OperationRequest::CheckUninstall {
            names: vec!["vim".into()],
        },
        OperationRequest::Install {
            names: vec!["vim".into()],
            credential: credential(),
        },
        OperationRequest::Uninstall {
            names: vec!["vim".into()],
            credential: credential(),
        },
    ];
    for request in requests {
        let name = request.name();
        let response = session.handle(request);
        assert!(!response.success, "{name} unexpectedly succeeded");
        match response.payload {
            ResponsePayload::Failure { error_kind, .. } => {
                assert_eq!(error_kind, ErrorKind::NoBackendFound, "{name}")
            }
            other => panic!("{name}: unexpected payload {other:?}"),
        }
    }
    assert_eq!(runner.spawn_count(), 0);
}

struct CountingProbe {
    inner: StaticProbe,
    calls: Arc<AtomicUsize>,
}

impl ExecutableProbe for CountingProbe {
    fn is_present(&self, executable: &str) -> bool {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.is_present(executable)
    }
}

#[test]
fn test_detection_is_memoized_until_redetect() {
    let calls = Arc::new(AtomicUsize::new(0));
    let session = Session::with_parts(
        SessionConfig::default(),
        ScriptedRunner::new(|_| ok("")),
        CountingProbe {
            inner: StaticProbe::new(["dnf"]),
            calls: Arc::clone(&calls),
        },
    );

    assert_eq!(session.backend().unwrap(), BackendKind::Dnf);
    let after_first = calls.load(Ordering::SeqCst);
    assert_eq!(after_first, 2);

    assert_eq!(session.backend().unwrap(), BackendKind::Dnf);
    assert_eq!(calls.load(Ordering::SeqCst), after_first);

    let response = session.handle(OperationRequest::Detect { refresh: true });
    assert_eq!(
        response.payload,
        ResponsePayload::Backend {
            backend: BackendKind::Dnf
        }
    );
    assert_eq!(calls.load(Ordering::SeqCst), after_first * 2);
}

#[test]
fn test_configured_backend_skips_detection() {
    let config = SessionConfig {
        backend: Some(BackendKind::Pacman),
        ..SessionConfig::default()
    };
    let session = Session::with_parts(config, ScriptedRunner::new(|_| ok("")), StaticProbe::default());
    assert_eq!(session.backend().unwrap(), BackendKind::Pacman);
}

// =============================================================================
// Search and listings
// =============================================================================

fn pacman_catalog() -> ScriptedRunner {
    ScriptedRunner::new(|spec| match spec.args.as_slice() {
        [flag, _] if flag == "-Ss" => ok(PACMAN_SEARCH),
        [flag, name] if flag == "-Q" && name == "vim" => ok("vim 9.1.0252-1\n"),
        _ => exit(1, "", "error: package was not found\n"),
    })
}

#[test]
fn test_search_reconciles_installed_flags() {
    let runner = pacman_catalog();
    let session = session_on("pacman", &runner);

    let listing = session.search_packages("vim", SearchField::All).unwrap();
    assert_eq!(listing.backend, BackendKind::Pacman);
    let flags: Vec<_> = listing
        .packages
        .iter()
        .map(|p| (p.name.as_str(), p.installed))
        .collect();
    assert_eq!(
        flags,
        [("vim", true), ("gvim", false), ("neovim", false), ("ctags", false)]
    );
    assert_eq!(
        runner.lines(),
        [
            "pacman -Ss vim",
            "pacman -Q vim",
            "pacman -Q gvim",
            "pacman -Q neovim",
            "pacman -Q ctags",
        ]
    );
}

#[test]
fn test_search_survives_failing_probes() {
    let runner = ScriptedRunner::new(|spec| match spec.args.first().map(String::as_str) {
        Some("-Ss") => ok(PACMAN_SEARCH),
        _ => Err(ExecutionError::Spawn {
            program: "pacman".into(),
            source: std::io::Error::from(std::io::ErrorKind::PermissionDenied),
        }),
    });
    let session = session_on("pacman", &runner);
    let listing = session.search_packages("vim", SearchField::All).unwrap();
    assert_eq!(listing.packages.len(), 4);
    assert!(listing.packages.iter().all(|p| !p.installed));
}

#[test]
fn test_search_field_filter() {
    let session = session_on("pacman", &pacman_catalog());

    let by_name = session.search_packages("vim", SearchField::Name).unwrap();
    let names: Vec<_> = by_name.packages.iter().map(|p| p.name.as_str()).collect();
    assert_eq!(names, ["vim", "gvim", "neovim"]);

    let by_description = session
        .search_packages("VIM", SearchField::Description)
        .unwrap();
    let names: Vec<_> = by_description
        .packages
        .iter()
        .map(|p| p.name.as_str())
        .collect();
    assert_eq!(names, ["neovim", "ctags"]);
}

#[test]
fn test_search_limit_caps_results_and_probes() {
    let runner = pacman_catalog();
    let config = SessionConfig {
        search_limit: 2,
        ..SessionConfig::default()
    };
    let session = Session::with_parts(config, runner.clone(), StaticProbe::new(["pacman"]));
    let listing = session.search_packages("vim", SearchField::All).unwrap();
    assert_eq!(listing.packages.len(), 2);
    assert_eq!(runner.spawn_count(), 3);
}

#[test]
fn test_search_no_match_is_empty_success() {
    let runner = ScriptedRunner::new(|_| exit(1, "", ""));
    let session = session_on("pacman", &runner);
    let listing = session.search_packages("zzzz", SearchField::All).unwrap();
    assert!(listing.packages.is_empty());
    assert_eq!(runner.spawn_count(), 1);
}

#[test]
fn test_list_installed_marks_and_filters() {
    let runner = ScriptedRunner::new(|_| ok("acl 2.3.2-1\nbash 5.2.026-2\nvim 9.1.0252-1\n"));
    let session = session_on("pacman", &runner);

    let all = session.list_installed().unwrap();
    assert_eq!(all.packages.len(), 3);
    assert!(all.packages.iter().all(|p| p.installed));

    let filtered = session.list_installed_filtered("BA").unwrap();
    assert_eq!(filtered.packages.len(), 1);
    assert_eq!(filtered.packages[0].name, "bash");

    let by_version = session.list_installed_filtered("9.1").unwrap();
    assert_eq!(by_version.packages[0].name, "vim");
}

#[test]
fn test_list_installed_failure_is_command_failed() {
    let runner = ScriptedRunner::new(|_| exit(2, "", "error: could not open database\n"));
    let session = session_on("pacman", &runner);
    let response = session.handle(OperationRequest::ListInstalled { filter: None });
    let value = serde_json::to_value(&response).unwrap();
    assert_eq!(value["success"], json!(false));
    assert_eq!(value["errorKind"], json!("command_failed"));
    assert_eq!(value["transcript"], json!("error: could not open database\n"));
}

// =============================================================================
// Dry-run removal
// =============================================================================

#[test]
fn test_check_uninstall_non_zero_is_advisory() {
    let runner = ScriptedRunner::new(|_| {
        exit(1, "", "error: target not found: nothere\n")
    });
    let session = session_on("pacman", &runner);
    let response = session.handle(OperationRequest::CheckUninstall {
        names: vec!["nothere".into()],
    });
    assert_eq!(
        serde_json::to_value(&response).unwrap(),
        json!({ "success": true, "advisoryText": "error: target not found: nothere\n" })
    );
    assert_eq!(runner.lines(), ["pacman -R --print nothere"]);
}

#[test]
fn test_check_uninstall_missing_tool_is_execution_error() {
    let runner = ScriptedRunner::new(|_| exit(127, "", "apt-get: command not found\n"));
    let session = session_on("apt-get", &runner);
    let err = session.check_uninstall(&["vim"]).unwrap_err();
    assert!(matches!(
        err,
        PkgError::Execution(ExecutionError::NotExecutable { code: 127, .. })
    ));
}

// =============================================================================
// Privileged operations
// =============================================================================

#[test]
fn test_install_pipes_credential_and_returns_transcript() {
    let runner = ScriptedRunner::new(|spec| {
        assert!(spec.privileged);
        ok("Reading package lists...\nSetting up htop (3.0.5-7build2) ...\n")
    });
    let session = session_on("apt-get", &runner);

    let transcript = session.install_packages(&["htop"], credential()).unwrap();
    assert!(transcript.contains("Setting up htop"));

    let calls = runner.calls.lock().unwrap().clone();
    assert_eq!(
        calls,
        [Call {
            line: "[elevated] apt-get install -y htop".into(),
            credential_len: Some(7),
        }]
    );
    assert!(!calls[0].line.contains("hunter2"));
}

#[test]
fn test_rejected_password_is_privilege_denied() {
    let runner = ScriptedRunner::new(|_| {
        exit(1, "", "Sorry, try again.\nsudo: 1 incorrect password attempt\n")
    });
    let session = session_on("dnf", &runner);

    let response = session.handle(OperationRequest::Uninstall {
        names: vec!["htop".into()],
        credential: credential(),
    });
    let value = serde_json::to_value(&response).unwrap();
    assert_eq!(value["success"], json!(false));
    assert_eq!(value["errorKind"], json!("privilege_denied"));
    assert!(!value.to_string().contains("hunter2"));
}

#[test]
fn test_failed_install_keeps_partial_transcript() {
    let runner = ScriptedRunner::new(|_| {
        exit(100, "Reading package lists...\n", "E: Unable to locate package nope\n")
    });
    let session = session_on("apt-get", &runner);
    let response = session.handle(OperationRequest::Install {
        names: vec!["nope".into()],
        credential: credential(),
    });
    match response.payload {
        ResponsePayload::Failure {
            error_kind,
            transcript,
            ..
        } => {
            assert_eq!(error_kind, ErrorKind::CommandFailed);
            assert_eq!(
                transcript.as_deref(),
                Some("Reading package lists...\nE: Unable to locate package nope\n")
            );
        }
        other => panic!("unexpected payload: {other:?}"),
    }
}

#[test]
fn test_one_privileged_operation_at_a_time() {
    let (entered_tx, entered_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel::<()>();
    let entered_tx = Mutex::new(entered_tx);
    let release_rx = Mutex::new(release_rx);

    let runner = ScriptedRunner::new(move |_| {
        entered_tx.lock().unwrap().send(()).unwrap();
        release_rx.lock().unwrap().recv().unwrap();
        ok("done\n")
    });
    let session = session_on("pacman", &runner);

    std::thread::scope(|scope| {
        let first = scope.spawn(|| session.install_packages(&["vim"], credential()));
        entered_rx.recv().unwrap();

        let err = session.uninstall_packages(&["htop"], credential()).unwrap_err();
        assert!(matches!(err, PkgError::OperationInProgress));

        release_tx.send(()).unwrap();
        assert_eq!(first.join().unwrap().unwrap(), "done\n");
    });

    // The slot is released once the first operation returns.
    release_tx.send(()).unwrap();
    assert!(session.uninstall_packages(&["htop"], credential()).is_ok());
    assert_eq!(runner.spawn_count(), 2);
}

#[test]
fn test_read_only_operations_ignore_the_privileged_slot() {
    let runner = ScriptedRunner::new(|_| ok("vim 9.1\n"));
    let session = session_on("pacman", &runner);
    let calls = runner.calls.clone();
    assert!(session.list_installed().is_ok());
    assert!(calls.lock().unwrap().iter().all(|c| c.credential_len.is_none()));
}
