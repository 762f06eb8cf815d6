//! Integration tests for the subprocess engine against real `sh` scripts.

use simgate_core::{
    EngineConfig, ErrorKind, HarnessConfig, Outcome, ProcessEngine, RunCoordinator, RunInputs,
};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

fn layout(base: &Path, subsystem: &str) -> PathBuf {
    let root = base.join(subsystem);
    std::fs::create_dir_all(root.join("TestSuites")).unwrap();
    std::fs::create_dir_all(root.join("TestResults")).unwrap();
    let suite = root.join("TestSuites").join(format!("{}.mldatx", subsystem));
    std::fs::write(&suite, b"suite").unwrap();
    suite
}

fn inputs(base: &Path, subsystems: &[&str]) -> RunInputs {
    RunInputs {
        subsystems: subsystems.iter().map(|s| s.to_string()).collect(),
        base_root: Some(base.to_path_buf()),
        config_file: Some(base.join("simgate.toml")),
    }
}

fn shell(script: &str) -> HarnessConfig {
    let mut engine = EngineConfig::new("sh").with_args(["-c", script]);
    engine.drain_grace_ms = 200;
    HarnessConfig::new(engine)
}

/// Test: the engine sees its context only through variables and its working directory
#[tokio::test]
async fn test_engine_receives_context() {
    let base = tempfile::tempdir().unwrap();
    layout(base.path(), "Brakes");

    let script = r#"
        test "$TEST_SUBSYSTEM" = "Brakes" || exit 10
        test -d "$BASE_PATH/Brakes" || exit 11
        test -f "$TEST_SUITE_FILE" || exit 12
        test -d "$TEST_RESULTS_DIR" || exit 13
        test -n "$CONFIG_FILE" || exit 14
        test "$SIM_PROFILE" = "hil" || exit 15
        test -d TestSuites || exit 16
        printf '<results/>' > "$TEST_RESULTS_FILE"
    "#;
    let mut config = shell(script);
    config
        .engine
        .env
        .insert("SIM_PROFILE".to_string(), "hil".to_string());

    let report = RunCoordinator::new(ProcessEngine)
        .run_with_config(&inputs(base.path(), &["Brakes"]), config)
        .await;

    let entry = &report.subsystems[0];
    assert_eq!(entry.outcome, Outcome::Passed, "exit {:?}", entry.raw_exit_code);
    let results = entry.results_file.as_ref().unwrap();
    assert_eq!(std::fs::read_to_string(results).unwrap(), "<results/>");
}

/// Test: exit code 1 with an export is Failed and output is captured
#[tokio::test]
async fn test_engine_failure_with_output() {
    let base = tempfile::tempdir().unwrap();
    layout(base.path(), "Steering");

    let config = shell(
        "echo 'running 4 cases'; echo '1 case failed' >&2; printf x > \"$TEST_RESULTS_FILE\"; exit 1",
    );
    let report = RunCoordinator::new(ProcessEngine)
        .run_with_config(&inputs(base.path(), &["Steering"]), config)
        .await;

    let entry = &report.subsystems[0];
    assert_eq!(entry.outcome, Outcome::Failed);
    assert_eq!(entry.raw_exit_code, Some(1));
    assert!(entry.stdout.contains("running 4 cases"));
    assert!(entry.stderr.contains("1 case failed"));
}

/// Test: a crash before export carries the stderr tail
#[tokio::test]
async fn test_engine_crash() {
    let base = tempfile::tempdir().unwrap();
    layout(base.path(), "Chassis");

    let config = shell("echo 'license checkout failed' >&2; exit 3");
    let report = RunCoordinator::new(ProcessEngine)
        .run_with_config(&inputs(base.path(), &["Chassis"]), config)
        .await;

    match &report.subsystems[0].outcome {
        Outcome::Error { kind, reason } => {
            assert_eq!(*kind, ErrorKind::UnexpectedExitCode);
            assert!(reason.contains("license checkout failed"), "{}", reason);
        }
        other => panic!("expected Error, got {:?}", other),
    }
}

/// Test: the configured timeout kills the engine
#[tokio::test]
async fn test_config_timeout_kills_engine() {
    let base = tempfile::tempdir().unwrap();
    layout(base.path(), "Powertrain");

    let mut config = shell("exec sleep 30");
    config.engine.timeout_secs = 1;

    let started = Instant::now();
    let report = RunCoordinator::new(ProcessEngine)
        .run_with_config(&inputs(base.path(), &["Powertrain"]), config)
        .await;

    assert!(started.elapsed() < Duration::from_secs(10));
    assert_eq!(
        report.subsystems[0].outcome.error_kind(),
        Some(ErrorKind::TimeoutKilled)
    );
}

/// Test: workers of a timed-out engine are gone before the next subsystem starts
#[cfg(unix)]
#[tokio::test]
async fn test_killed_engine_workers_do_not_overlap_next_subsystem() {
    let base = tempfile::tempdir().unwrap();
    layout(base.path(), "Worker");
    layout(base.path(), "Next");
    let marker = base.path().join("worker-alive");

    let script = format!(
        r#"
        case "$TEST_SUBSYSTEM" in
          Worker) (sleep 1.5; echo still-alive > '{marker}') & wait ;;
          Next) sleep 0.8; test -f '{marker}' && exit 7; printf x > "$TEST_RESULTS_FILE" ;;
        esac
        "#,
        marker = marker.display()
    );
    let mut config = shell(&script);
    config.engine.timeout_secs = 1;

    let report = RunCoordinator::new(ProcessEngine)
        .run_with_config(&inputs(base.path(), &["Worker", "Next"]), config)
        .await;

    assert_eq!(
        report.outcome_of("Worker").unwrap().error_kind(),
        Some(ErrorKind::TimeoutKilled)
    );
    assert_eq!(report.outcome_of("Next"), Some(&Outcome::Passed));

    tokio::time::sleep(Duration::from_millis(1000)).await;
    assert!(!marker.exists());
}

/// Test: cancelling mid-run kills the engine and skips the rest
#[tokio::test]
async fn test_cancel_kills_running_engine() {
    let base = tempfile::tempdir().unwrap();
    layout(base.path(), "Brakes");
    layout(base.path(), "Steering");

    let coordinator = RunCoordinator::new(ProcessEngine);
    let handle = coordinator.cancel_handle();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        handle.cancel();
    });

    let started = Instant::now();
    let report = coordinator
        .run_with_config(
            &inputs(base.path(), &["Brakes", "Steering"]),
            shell("exec sleep 30"),
        )
        .await;

    assert!(started.elapsed() < Duration::from_secs(10));
    assert!(report.cancelled);
    assert_eq!(report.subsystems.len(), 1);
    assert_eq!(
        report.subsystems[0].outcome.error_kind(),
        Some(ErrorKind::Cancelled)
    );
    assert_eq!(report.exit_code(), 2);
}

/// Test: an engine that cannot be started is retried, then reported
#[tokio::test]
async fn test_missing_engine_program() {
    let base = tempfile::tempdir().unwrap();
    layout(base.path(), "Brakes");

    let config = HarnessConfig::new(EngineConfig::new("/nonexistent/sim-engine"));
    let report = RunCoordinator::new(ProcessEngine)
        .with_launch_backoff(Duration::from_millis(10))
        .run_with_config(&inputs(base.path(), &["Brakes"]), config)
        .await;

    let entry = &report.subsystems[0];
    assert_eq!(entry.outcome.error_kind(), Some(ErrorKind::LaunchFailed));
    assert_eq!(entry.attempts, 2);
}
