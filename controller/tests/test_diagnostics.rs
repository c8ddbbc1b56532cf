//! Diagnostic runner integration tests

use std::sync::Arc;

use qontroller::diagnostics::checks::{
    check_capture_status, check_device_updates, check_host_list, connect_devices,
    validate_configurations,
};
use qontroller::diagnostics::{
    DiagnosticEnvironment, DiagnosticEvent, DiagnosticLogger, DiagnosticRunner, Task, TaskFuture,
    TaskOutcome, TaskStatus,
};
use qontroller::errors::ControllerError;
use qontroller::fleet::{FleetManager, FleetOptions};
use qontroller::mock::{MockConnector, MockReachability, MockShell};
use qontroller::storage::layout::StorageLayout;
use qontroller::storage::settings::Settings;

async fn run_success(_: &DiagnosticLogger, _: &mut DiagnosticEnvironment) -> Result<TaskOutcome, ControllerError> {
    Ok(TaskOutcome::Success)
}

async fn run_warning(log: &DiagnosticLogger, _: &mut DiagnosticEnvironment) -> Result<TaskOutcome, ControllerError> {
    log.log("something looks off");
    Ok(TaskOutcome::try_from(2)?)
}

async fn run_error(_: &DiagnosticLogger, _: &mut DiagnosticEnvironment) -> Result<TaskOutcome, ControllerError> {
    Err(ControllerError::TaskError("check exploded".to_string()))
}

async fn run_panic(_: &DiagnosticLogger, _: &mut DiagnosticEnvironment) -> Result<TaskOutcome, ControllerError> {
    panic!("boom")
}

fn succeed<'a>(log: &'a DiagnosticLogger, env: &'a mut DiagnosticEnvironment) -> TaskFuture<'a> {
    Box::pin(run_success(log, env))
}

fn warn<'a>(log: &'a DiagnosticLogger, env: &'a mut DiagnosticEnvironment) -> TaskFuture<'a> {
    Box::pin(run_warning(log, env))
}

fn fail_with_error<'a>(log: &'a DiagnosticLogger, env: &'a mut DiagnosticEnvironment) -> TaskFuture<'a> {
    Box::pin(run_error(log, env))
}

fn explode<'a>(log: &'a DiagnosticLogger, env: &'a mut DiagnosticEnvironment) -> TaskFuture<'a> {
    Box::pin(run_panic(log, env))
}

fn task(name: &str, function: qontroller::diagnostics::TaskFn) -> Task {
    Task::new(name, "running", "ok", "failed", function)
}

struct Bench {
    environment: DiagnosticEnvironment,
    shells: Vec<Arc<MockShell>>,
    _dir: tempfile::TempDir,
}

/// Environment whose fleet is built over mock shells for `hosts`.
fn bench(hosts: &[&str]) -> Bench {
    let dir = tempfile::tempdir().unwrap();
    let host_list = dir.path().join("hosts.txt");
    std::fs::write(&host_list, hosts.join("\n")).unwrap();

    let settings = Settings {
        username: "pi".to_string(),
        host_list: Some(host_list),
        ..Default::default()
    };
    let shells: Vec<Arc<MockShell>> = hosts.iter().map(|h| Arc::new(MockShell::new(*h))).collect();
    let factory_shells = shells.clone();
    let names: Vec<String> = hosts.iter().map(|h| h.to_string()).collect();

    let environment = DiagnosticEnvironment::new(settings, StorageLayout::new(dir.path()))
        .with_fleet_factory(move |_| {
            let connector = factory_shells
                .iter()
                .fold(MockConnector::new(), |c, s| c.with_shell(Arc::clone(s)));
            FleetManager::with_backends(
                FleetOptions::default(),
                Arc::new(MockReachability::reachable(names.clone())),
                Arc::new(connector),
            )
        });

    Bench {
        environment,
        shells,
        _dir: dir,
    }
}

#[tokio::test]
async fn test_outcomes_map_to_statuses() {
    let mut runner = DiagnosticRunner::with_tasks(
        vec![
            task("pass", succeed),
            task("warn", warn).with_warning("almost"),
            task("error", fail_with_error),
        ],
        bench(&[]).environment,
    );

    let summary = runner.run().await;

    let statuses: Vec<TaskStatus> = runner.tasks().iter().map(|t| t.status()).collect();
    assert_eq!(
        statuses,
        [TaskStatus::Success, TaskStatus::Warning, TaskStatus::Failure]
    );
    assert_eq!((summary.success, summary.warning, summary.failure), (1, 1, 1));
    assert!(!summary.passed());
    assert_eq!(runner.tasks()[1].display_text(), "almost");

    let logs = runner.logs();
    assert!(logs
        .iter()
        .any(|l| l.contains("Error in task 'error':") && l.ends_with("check exploded")));
    assert!(logs.iter().any(|l| l.ends_with("Task finished with warnings: warn")));
    assert!(logs.last().unwrap().contains("Diagnostics finished: 1 passed, 1 warnings, 1 failed"));
}

#[tokio::test]
async fn test_panicking_task_fails_and_run_continues() {
    let mut runner = DiagnosticRunner::with_tasks(
        vec![task("explode", explode), task("after", succeed)],
        bench(&[]).environment,
    );

    runner.run().await;

    assert_eq!(runner.tasks()[0].status(), TaskStatus::Failure);
    assert_eq!(runner.tasks()[1].status(), TaskStatus::Success);
    assert!(runner
        .logs()
        .iter()
        .any(|l| l.ends_with("Error in task 'explode': boom")));
}

#[tokio::test]
async fn test_rerun_resets_log_and_statuses() {
    let mut runner =
        DiagnosticRunner::with_tasks(vec![task("pass", succeed)], bench(&[]).environment);

    runner.run().await;
    let first = runner.logs().len();
    runner.run().await;

    assert_eq!(runner.logs().len(), first);
    assert_eq!(runner.tasks()[0].status(), TaskStatus::Success);
}

#[tokio::test]
async fn test_events_follow_task_lifecycle() {
    let mut runner =
        DiagnosticRunner::with_tasks(vec![task("pass", succeed)], bench(&[]).environment);
    let mut events = runner.subscribe();

    runner.run().await;

    let mut statuses = Vec::new();
    let mut finished = None;
    while let Ok(event) = events.try_recv() {
        match event {
            DiagnosticEvent::StatusChanged { index, status, .. } => {
                assert_eq!(index, 0);
                statuses.push(status);
            }
            DiagnosticEvent::Finished(summary) => finished = Some(summary),
            DiagnosticEvent::Log(_) => {}
        }
    }
    assert_eq!(
        statuses,
        [TaskStatus::Waiting, TaskStatus::Running, TaskStatus::Success]
    );
    assert_eq!(finished.map(|s| s.success), Some(1));
}

#[tokio::test]
async fn test_run_single_task() {
    let mut runner = DiagnosticRunner::with_tasks(
        vec![task("pass", succeed), task("warn", warn)],
        bench(&[]).environment,
    );

    assert_eq!(runner.run_task(1).await.unwrap(), TaskStatus::Warning);
    assert_eq!(runner.tasks()[0].status(), TaskStatus::Waiting);
    assert_eq!(runner.run_task(1).await.unwrap(), TaskStatus::Warning);
    assert!(runner.run_task(5).await.is_err());
}

#[tokio::test]
async fn test_fleet_checks_share_one_scan() {
    let b = bench(&["dev1", "dev2"]);
    b.shells[0].start_process("picam");
    b.shells[0].with_file("/home/pi/tmp/status.txt", "Recording");
    b.shells[1].on("git fetch --dry-run", "   1a2b..3c4d  main -> origin/main", 0);
    let shells = b.shells.clone();

    let mut runner = DiagnosticRunner::with_tasks(
        vec![
            task("config", validate_configurations),
            task("hosts", check_host_list),
            task("connect", connect_devices),
            task("updates", check_device_updates),
            task("capture", check_capture_status),
        ],
        b.environment,
    );

    let summary = runner.run().await;

    let statuses: Vec<TaskStatus> = runner.tasks().iter().map(|t| t.status()).collect();
    assert_eq!(
        statuses,
        [
            TaskStatus::Success,
            TaskStatus::Success,
            TaskStatus::Success,
            TaskStatus::Warning,
            TaskStatus::Success
        ]
    );
    assert!(summary.passed());

    let scan = runner.environment().last_scan().unwrap();
    assert_eq!(scan.connected, ["dev1", "dev2"]);
    // Only one status read: dev2 is idle
    assert_eq!(shells[0].calls_matching("get /home/pi/tmp/status.txt").len(), 1);
    assert!(shells[1].calls_matching("get /home/pi/tmp/status.txt").is_empty());
    assert!(runner
        .logs()
        .iter()
        .any(|l| l.ends_with("Update available for dev2")));
}

#[tokio::test]
async fn test_connect_fails_without_devices() {
    let b = bench(&["dev1"]);
    let mut environment = b.environment.with_fleet_factory(|_| {
        FleetManager::with_backends(
            FleetOptions::default(),
            Arc::new(MockReachability::default()),
            Arc::new(MockConnector::new()),
        )
    });

    let fleet = environment.connect_if_needed().await.unwrap();
    assert!(fleet.is_empty());
    assert_eq!(
        environment.last_scan().map(|s| s.unreachable.clone()),
        Some(vec!["dev1".to_string()])
    );

    let mut runner =
        DiagnosticRunner::with_tasks(vec![task("connect", connect_devices)], environment);
    runner.run().await;
    assert_eq!(runner.tasks()[0].status(), TaskStatus::Failure);
}
