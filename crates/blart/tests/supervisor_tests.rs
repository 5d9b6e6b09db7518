//! Integration tests for the supervisor, using real `sh` children
#![cfg(unix)]

use blart::config::Settings;
use blart::debounce::DebounceMode;
use blart::error::{ChildError, StartupError};
use blart::shutdown::{ExitReason, ShutdownState};
use blart::signal::Signal;
use blart::supervisor::Supervisor;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tempfile::TempDir;

fn settings(paths: Vec<PathBuf>, script: &str) -> Settings {
    Settings {
        paths,
        signal: Signal::Hup,
        delay: Duration::from_millis(100),
        mode: DebounceMode::Fixed,
        recursive: false,
        command: vec!["sh".to_string(), "-c".to_string(), script.to_string()],
    }
}

/// Poll `check` until it returns true or `timeout` passes.
async fn eventually(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    check()
}

fn read_lines(path: &Path) -> Vec<String> {
    std::fs::read_to_string(path)
        .unwrap_or_default()
        .lines()
        .map(str::to_string)
        .collect()
}

#[tokio::test]
async fn test_child_exiting_on_its_own_is_status_zero() {
    let dir = TempDir::new().unwrap();
    let supervisor =
        Supervisor::start(settings(vec![dir.path().to_path_buf()], "exit 3")).unwrap();

    let reason = tokio::time::timeout(Duration::from_secs(10), supervisor.wait())
        .await
        .expect("supervisor did not finish");
    assert_eq!(reason, ExitReason::ChildExited);
    assert_eq!(reason.exit_code(), 0);
}

#[tokio::test]
async fn test_file_change_signals_child() {
    let dir = TempDir::new().unwrap();
    let watched = dir.path().join("watched");
    std::fs::create_dir(&watched).unwrap();
    let out = dir.path().join("hups.log");

    let script = format!(
        "trap 'echo hup >> {}' HUP; while true; do sleep 0.05; done",
        out.display()
    );
    let supervisor = Supervisor::start(settings(vec![watched.clone()], &script)).unwrap();

    // Give sh a moment to install its trap
    tokio::time::sleep(Duration::from_millis(300)).await;
    for i in 0..5 {
        std::fs::write(watched.join("app.conf"), format!("version = {i}\n")).unwrap();
    }

    let signalled = eventually(Duration::from_secs(5), || !read_lines(&out).is_empty()).await;
    assert!(signalled, "child never received SIGHUP");

    // The burst of writes collapses into a single signal
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(read_lines(&out), vec!["hup"]);
    assert!(supervisor.debouncer().notifications() >= 1);

    // Default TERM disposition ends the child well inside the graceful window
    supervisor.controller().handle(Signal::Term);
    let reason = tokio::time::timeout(Duration::from_secs(10), supervisor.wait())
        .await
        .expect("supervisor did not finish");
    assert_eq!(reason, ExitReason::ChildExited);
}

#[tokio::test]
async fn test_forwarded_signal_reaches_child() {
    let dir = TempDir::new().unwrap();
    let out = dir.path().join("signals.log");
    let script = format!(
        "trap 'echo usr1 >> {0}' USR1; trap 'echo term >> {0}; exit 0' TERM; \
         while true; do sleep 0.05; done",
        out.display()
    );
    let supervisor = Supervisor::start(settings(vec![dir.path().to_path_buf()], &script)).unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;

    supervisor.controller().handle(Signal::Usr1);
    assert!(eventually(Duration::from_secs(5), || read_lines(&out).contains(&"usr1".to_string())).await);
    assert_eq!(supervisor.controller().state(), ShutdownState::Running);

    supervisor.controller().handle(Signal::Term);
    let reason = tokio::time::timeout(Duration::from_secs(10), supervisor.wait())
        .await
        .expect("supervisor did not finish");

    assert_eq!(reason, ExitReason::ChildExited);
    assert_eq!(read_lines(&out), vec!["usr1", "term"]);
}

#[tokio::test]
async fn test_child_ignoring_term_is_force_killed() {
    let dir = TempDir::new().unwrap();
    let supervisor = Supervisor::start(settings(
        vec![dir.path().to_path_buf()],
        "trap '' TERM; while true; do sleep 0.05; done",
    ))
    .unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;

    let started = Instant::now();
    let child = supervisor.child().clone();
    supervisor.controller().handle(Signal::Term);

    let reason = tokio::time::timeout(Duration::from_secs(15), supervisor.wait())
        .await
        .expect("supervisor did not finish");
    let elapsed = started.elapsed();

    assert_eq!(reason, ExitReason::Forced);
    assert_eq!(reason.exit_code(), 1);
    assert!(elapsed >= Duration::from_secs(5), "finished too early: {elapsed:?}");

    let exit = tokio::time::timeout(Duration::from_secs(5), child.exited().wait())
        .await
        .expect("child survived KILL")
        .unwrap();
    assert_eq!(exit.signal, Some(libc::SIGKILL));
}

#[tokio::test]
async fn test_missing_program_is_startup_error() {
    let dir = TempDir::new().unwrap();
    let mut bad = settings(vec![dir.path().to_path_buf()], "");
    bad.command = vec!["blart-test-no-such-program".to_string()];

    let err = Supervisor::start(bad).unwrap_err();
    assert!(matches!(err, StartupError::Child(ChildError::Spawn { .. })));
    assert!(err.to_string().contains("blart-test-no-such-program"));
}

#[tokio::test]
async fn test_unwatchable_path_is_startup_error() {
    let dir = TempDir::new().unwrap();
    let missing = dir.path().join("gone");

    let err = Supervisor::start(settings(vec![missing], "exit 0")).unwrap_err();
    assert!(matches!(err, StartupError::Config(_)));
}
