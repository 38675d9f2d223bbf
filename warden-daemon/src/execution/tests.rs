use std::os::unix::process::ExitStatusExt;
use std::path::Path;
use std::sync::atomic::AtomicUsize;

use super::*;
use crate::access::{AccessProvider, KeyStore, NoAccess};
use crate::config::AccessMode;

fn sh(name: &str, script: &str) -> ServiceConfig {
    ServiceConfig::new(name, vec!["sh".to_string(), "-c".to_string(), script.to_string()])
}

/// The root scope must outlive the execution, dropping it interrupts everything below.
fn execution(service: ServiceConfig) -> (Scope, Arc<Execution>) {
    let root = Scope::root("test");
    let execution = Execution::new(Arc::new(service), Box::new(NoAccess), &root);
    (root, Arc::new(execution))
}

async fn wait_for_status(execution: &Execution, expected: Status) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while execution.status().await != expected {
        assert!(Instant::now() < deadline, "timed out waiting for {}", expected);
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

async fn wait_for_file(path: &Path) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !path.exists() {
        assert!(Instant::now() < deadline, "timed out waiting for {}", path.display());
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

fn spawn_run(
    execution: &Arc<Execution>,
) -> tokio::task::JoinHandle<std::result::Result<(), ExecutionError>> {
    let execution = execution.clone();
    tokio::spawn(async move { execution.run().await })
}

/// Counts cleanup calls.
struct CountingAccess(Arc<AtomicUsize>);

impl ExecutionAccess for CountingAccess {
    fn credential_pem(&self) -> Option<String> {
        None
    }

    fn cleanup(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn exit_code_maps_signals_above_128() {
    assert_eq!(exit_code(std::process::ExitStatus::from_raw(3 << 8)), 3);
    assert_eq!(exit_code(std::process::ExitStatus::from_raw(9)), 137);
    assert_eq!(exit_code(std::process::ExitStatus::from_raw(15)), 143);
}

#[test]
fn execution_error_exit_code() {
    let err = ExecutionError::UnexpectedExit { service: "a".into(), code: 4 };
    assert_eq!(err.exit_code(), Some(4));
    let err = ExecutionError::Unrecoverable { service: "a".into(), message: "x".into() };
    assert_eq!(err.exit_code(), None);
}

#[tokio::test]
async fn run_success_ends_down() {
    let (_root, exec) = execution(sh("ok", "exit 0"));
    assert_eq!(exec.run().await, Ok(()));
    assert_eq!(exec.status().await, Status::Down);
    assert_eq!(exec.pid().await, None);
}

#[tokio::test]
async fn run_reports_unexpected_exit_code() {
    let (_root, exec) = execution(sh("bad", "exit 3"));
    assert_eq!(
        exec.run().await,
        Err(ExecutionError::UnexpectedExit { service: "bad".into(), code: 3 })
    );
}

#[tokio::test]
async fn run_honours_success_exit_codes() {
    let mut service = sh("custom", "exit 3");
    service.success_exit_codes = vec![0, 3];
    let (_root, exec) = execution(service);
    assert_eq!(exec.run().await, Ok(()));
}

#[tokio::test]
async fn run_records_pid_and_start_time_while_running() {
    let (_root, exec) = execution(sh("sleeper", "sleep 30"));
    let run = spawn_run(&exec);
    wait_for_status(&exec, Status::Running).await;

    let snapshot = exec.snapshot().await;
    let pid = snapshot.pid.expect("running execution has a pid");
    assert!(warden_unix::signals::is_alive(pid));
    assert!(snapshot.started_at.is_some());

    exec.kill().await.unwrap();
    run.await.unwrap().unwrap_err();
}

#[tokio::test]
async fn stop_running_process() {
    let (_root, exec) = execution(sh("sleeper", "sleep 30"));
    let run = spawn_run(&exec);
    wait_for_status(&exec, Status::Running).await;

    exec.stop().await.unwrap();

    assert!(exec.stop_requested());
    assert_eq!(exec.status().await, Status::Down);
    let result = run.await.unwrap();
    assert!(
        matches!(result, Err(ExecutionError::StoppedOrKilled { code: Some(_), .. })),
        "unexpected result: {:?}",
        result
    );
}

#[tokio::test]
async fn stop_escalates_to_kill_after_stop_wait() {
    let dir = tempfile::tempdir().unwrap();
    let ready = dir.path().join("ready");
    let mut service = sh(
        "stubborn",
        &format!("trap '' TERM; touch {}; while true; do sleep 0.1; done", ready.display()),
    );
    service.stop_wait = Duration::from_secs(1);
    let (_root, exec) = execution(service);
    let run = spawn_run(&exec);
    wait_for_file(&ready).await;

    let started = Instant::now();
    exec.stop().await.unwrap();
    let elapsed = started.elapsed();

    assert!(elapsed >= Duration::from_secs(1), "killed too early: {:?}", elapsed);
    assert!(elapsed < Duration::from_secs(5), "kill took too long: {:?}", elapsed);
    assert_eq!(exec.status().await, Status::Down);
    assert_eq!(
        run.await.unwrap(),
        Err(ExecutionError::StoppedOrKilled { service: "stubborn".into(), code: Some(137) })
    );
}

#[tokio::test]
async fn stop_after_stop_signal_still_escalates() {
    let dir = tempfile::tempdir().unwrap();
    let ready = dir.path().join("ready");
    let mut service = sh(
        "stubborn",
        &format!("trap '' TERM; touch {}; while true; do sleep 0.1; done", ready.display()),
    );
    service.stop_wait = Duration::from_secs(1);
    let (_root, exec) = execution(service);
    let run = spawn_run(&exec);
    wait_for_file(&ready).await;

    exec.signal(Signal::SIGTERM).await.unwrap();
    assert_eq!(exec.status().await, Status::Stopped);

    let started = Instant::now();
    tokio::time::timeout(Duration::from_secs(5), exec.stop())
        .await
        .expect("stop never escalated")
        .unwrap();

    assert!(started.elapsed() >= Duration::from_secs(1));
    assert_eq!(exec.status().await, Status::Down);
    assert_eq!(
        run.await.unwrap(),
        Err(ExecutionError::StoppedOrKilled { service: "stubborn".into(), code: Some(137) })
    );
}

#[tokio::test]
async fn kill_running_process() {
    let (_root, exec) = execution(sh("victim", "sleep 30"));
    let run = spawn_run(&exec);
    wait_for_status(&exec, Status::Running).await;

    exec.kill().await.unwrap();

    assert_eq!(
        run.await.unwrap(),
        Err(ExecutionError::StoppedOrKilled { service: "victim".into(), code: Some(137) })
    );
}

#[tokio::test]
async fn stop_before_run_cancels_the_attempt() {
    let (_root, exec) = execution(sh("never", "exit 0"));

    exec.stop().await.unwrap();

    assert_eq!(
        exec.run().await,
        Err(ExecutionError::StoppedOrKilled { service: "never".into(), code: None })
    );
    assert_eq!(exec.status().await, Status::Down);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn stop_racing_run_is_never_lost() {
    for _ in 0..50 {
        let (_root, exec) = execution(sh("racer", "sleep 30"));
        let run = spawn_run(&exec);
        let stopper = {
            let exec = exec.clone();
            tokio::spawn(async move { exec.stop().await })
        };

        stopper.await.unwrap().unwrap();
        let result = tokio::time::timeout(Duration::from_secs(5), run)
            .await
            .expect("run outlived a completed stop")
            .unwrap();
        assert!(matches!(result, Err(ExecutionError::StoppedOrKilled { .. })), "{:?}", result);
    }
}

#[tokio::test]
async fn kill_interrupts_pending_sleep() {
    let (_root, exec) = execution(sh("delayed", "exit 0"));
    let sleeper = {
        let exec = exec.clone();
        tokio::spawn(async move { exec.sleep(Duration::from_secs(60)).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    exec.kill().await.unwrap();

    assert_eq!(sleeper.await.unwrap(), Err(SyncError::Interrupted));
    assert_eq!(exec.sleep(Duration::ZERO).await, Err(SyncError::Interrupted));
}

#[tokio::test]
async fn zero_sleep_returns_at_once() {
    let (_root, exec) = execution(sh("a", "exit 0"));
    assert_eq!(exec.sleep(Duration::ZERO).await, Ok(()));
}

#[tokio::test]
async fn signal_requires_a_live_process() {
    let (_root, exec) = execution(sh("idle", "exit 0"));
    let err = exec.signal(Signal::SIGHUP).await.unwrap_err();
    assert!(matches!(err, SupervisorError::NotRunning(name) if name == "idle"));
}

#[tokio::test]
async fn signal_delivers_arbitrary_signal_without_transition() {
    let dir = tempfile::tempdir().unwrap();
    let ready = dir.path().join("ready");
    let (_root, exec) = execution(sh(
        "trapper",
        &format!("trap 'exit 7' USR1; touch {}; while true; do sleep 0.1; done", ready.display()),
    ));
    let run = spawn_run(&exec);
    wait_for_file(&ready).await;

    exec.signal(Signal::SIGUSR1).await.unwrap();

    assert!(!exec.stop_requested());
    assert_eq!(
        run.await.unwrap(),
        Err(ExecutionError::UnexpectedExit { service: "trapper".into(), code: 7 })
    );
}

#[tokio::test]
async fn stop_signal_records_stopped() {
    let dir = tempfile::tempdir().unwrap();
    let ready = dir.path().join("ready");
    let (_root, exec) = execution(sh(
        "graceful",
        &format!("trap 'exit 0' TERM; touch {}; while true; do sleep 0.1; done", ready.display()),
    ));
    let run = spawn_run(&exec);
    wait_for_file(&ready).await;

    exec.signal(Signal::SIGTERM).await.unwrap();

    assert!(exec.stop_requested());
    assert_eq!(
        run.await.unwrap(),
        Err(ExecutionError::StoppedOrKilled { service: "graceful".into(), code: Some(0) })
    );
}

#[tokio::test]
async fn credential_released_once_on_first_transition() {
    let root = Scope::root("test");
    let released = Arc::new(AtomicUsize::new(0));
    let exec = Arc::new(Execution::new(
        Arc::new(sh("counted", "sleep 30")),
        Box::new(CountingAccess(released.clone())),
        &root,
    ));
    assert_eq!(released.load(Ordering::SeqCst), 0);

    let run = spawn_run(&exec);
    wait_for_status(&exec, Status::Running).await;
    assert_eq!(released.load(Ordering::SeqCst), 1);

    exec.stop().await.unwrap();
    run.await.unwrap().unwrap_err();
    assert_eq!(released.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn failed_spawn_is_unrecoverable() {
    let root = Scope::root("test");
    let released = Arc::new(AtomicUsize::new(0));
    let exec = Execution::new(
        Arc::new(ServiceConfig::new("ghost", vec!["/nonexistent/warden-test-binary".into()])),
        Box::new(CountingAccess(released.clone())),
        &root,
    );

    let result = exec.run().await;

    assert!(matches!(result, Err(ExecutionError::Unrecoverable { .. })), "{:?}", result);
    assert_eq!(exec.status().await, Status::Down);
    assert_eq!(released.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn missing_working_directory_is_unrecoverable() {
    let mut service = sh("lost", "exit 0");
    service.directory = Some("/nonexistent/warden-test-dir".into());
    let (_root, exec) = execution(service);
    assert!(matches!(exec.run().await, Err(ExecutionError::Unrecoverable { .. })));
}

#[tokio::test]
async fn child_receives_credential_and_name() {
    let root = Scope::root("test");
    let store = KeyStore::new();
    let service = sh("web", r#"test "$WARDEN_SERVICE_NAME" = web && test -n "$WARDEN_ACCESS_PEM""#);
    let access = store.new_execution(&service).unwrap();
    let exec = Execution::new(Arc::new(service), access, &root);

    assert_eq!(exec.run().await, Ok(()));
    assert_eq!(store.len(), 1);

    drop(exec);
    assert!(store.is_empty());
}

#[tokio::test]
async fn access_none_exports_no_credential() {
    let root = Scope::root("test");
    let store = KeyStore::new();
    let mut service = sh("batch", r#"test -z "$WARDEN_ACCESS_PEM""#);
    service.access = AccessMode::None;
    let access = store.new_execution(&service).unwrap();
    let exec = Execution::new(Arc::new(service), access, &root);

    assert_eq!(exec.run().await, Ok(()));
}

#[tokio::test]
async fn environment_and_directory_are_applied() {
    let dir = tempfile::tempdir().unwrap();
    let mut service = sh("env", r#"test "$GREETING" = hello && test "$(pwd -P)" = "$EXPECTED""#);
    let expected = dir.path().canonicalize().unwrap();
    service.directory = Some(dir.path().to_path_buf());
    service.environment.insert("GREETING".into(), "hello".into());
    service
        .environment
        .insert("EXPECTED".into(), expected.display().to_string());
    let (_root, exec) = execution(service);

    assert_eq!(exec.run().await, Ok(()));
}

#[tokio::test]
async fn inherit_environment_false_clears_parent_env() {
    let mut service = ServiceConfig::new(
        "clean",
        vec!["/bin/sh".into(), "-c".into(), r#"test -z "$HOME""#.into()],
    );
    service.inherit_environment = false;
    let (_root, exec) = execution(service);

    assert_eq!(exec.run().await, Ok(()));
}

#[tokio::test]
async fn cron_schedule_delays_start() {
    let mut service = sh("cron", "exit 0");
    service.cron_expression = Some(crate::config::CronSchedule::parse("* * * * * *").unwrap());
    let (_root, exec) = execution(service);

    let result = tokio::time::timeout(Duration::from_secs(5), exec.run()).await;
    assert_eq!(result.unwrap(), Ok(()));
}

#[tokio::test]
async fn stop_during_cron_wait_cancels() {
    let mut service = sh("cron", "exit 0");
    // midnight on the first of January
    service.cron_expression = Some(crate::config::CronSchedule::parse("0 0 1 1 *").unwrap());
    let (_root, exec) = execution(service);
    let run = spawn_run(&exec);
    tokio::time::sleep(Duration::from_millis(50)).await;

    exec.stop().await.unwrap();

    assert_eq!(
        run.await.unwrap(),
        Err(ExecutionError::StoppedOrKilled { service: "cron".into(), code: None })
    );
}

#[tokio::test]
async fn interrupted_scope_closes_the_status_lock() {
    let (root, exec) = execution(sh("a", "exit 0"));
    root.interrupt();

    let err = exec.stop().await.unwrap_err();
    assert!(matches!(err, SupervisorError::Sync(SyncError::Closed)));
    assert_eq!(exec.status().await, Status::Down);
}

#[test]
fn build_command_sets_environment() {
    let mut service = sh("web", "true");
    service.environment.insert("PORT".into(), "8080".into());
    let cmd = command::build_command(&service, Some("PEM")).unwrap();

    let envs: std::collections::HashMap<_, _> = cmd
        .as_std()
        .get_envs()
        .filter_map(|(k, v)| Some((k.to_str()?.to_string(), v?.to_str()?.to_string())))
        .collect();
    assert_eq!(envs.get("PORT").map(String::as_str), Some("8080"));
    assert_eq!(envs.get(SERVICE_NAME_ENV).map(String::as_str), Some("web"));
    assert_eq!(envs.get(crate::access::ACCESS_PEM_ENV).map(String::as_str), Some("PEM"));
}

#[test]
fn build_command_rejects_empty_command() {
    let service = ServiceConfig::new("empty", vec![]);
    assert!(matches!(
        command::build_command(&service, None),
        Err(SupervisorError::Config(_))
    ));
}

#[test]
fn build_command_rejects_unknown_user() {
    let mut service = sh("web", "true");
    service.user = Some("warden-no-such-user-xyz".into());
    assert!(matches!(
        command::build_command(&service, None),
        Err(SupervisorError::UserNotFound(_))
    ));
}
