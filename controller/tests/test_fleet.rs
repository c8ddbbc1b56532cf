//! Fleet integration tests

use std::sync::Arc;
use std::time::Duration;

use qontroller::capture::config::CaptureConfig;
use qontroller::device::{RecordOutcome, UpdateOutcome};
use qontroller::errors::ControllerError;
use qontroller::filesys::file::File;
use qontroller::fleet::{FleetManager, FleetOptions};
use qontroller::mock::{MockConnector, MockReachability, MockShell};
use qontroller::storage::layout::StorageLayout;
use tokio_test::assert_ok;

struct Harness {
    fleet: FleetManager,
    shells: Vec<Arc<MockShell>>,
    _dir: tempfile::TempDir,
    host_list: File,
}

/// Fleet over mock shells for `hosts`, with a host list file holding `listing`.
fn harness(hosts: &[&str], reachable: &[&str], listing: &str) -> Harness {
    let shells: Vec<Arc<MockShell>> = hosts.iter().map(|h| Arc::new(MockShell::new(*h))).collect();
    let connector = shells
        .iter()
        .fold(MockConnector::new(), |c, s| c.with_shell(Arc::clone(s)));
    let fleet = FleetManager::with_backends(
        FleetOptions::default(),
        Arc::new(MockReachability::reachable(reachable.iter().copied())),
        Arc::new(connector),
    );

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("hosts.txt");
    std::fs::write(&path, listing).unwrap();

    Harness {
        fleet,
        shells,
        _dir: dir,
        host_list: File::new(path),
    }
}

#[tokio::test]
async fn test_scan_keeps_file_order_and_skips_disabled() {
    let mut h = harness(
        &["dev1", "dev2", "dev3"],
        &["dev1", "dev2", "dev3"],
        "dev1\n#dev2\n\ndev3\n",
    );
    let report = assert_ok!(h.fleet.scan(&h.host_list, "pi").await);

    assert_eq!(report.listed, ["dev1", "dev3"]);
    assert_eq!(report.connected, ["dev1", "dev3"]);
    assert_eq!(h.fleet.hosts(), ["dev1", "dev3"]);
    assert!(h.shells[1].calls().is_empty());
}

#[tokio::test]
async fn test_scan_reports_unreachable_hosts() {
    let mut h = harness(&["dev1", "dev2"], &["dev2"], "dev1\ndev2\n");
    let report = h.fleet.scan(&h.host_list, "pi").await.unwrap();

    assert_eq!(report.unreachable, ["dev1"]);
    assert_eq!(report.connected, ["dev2"]);
    assert_eq!(h.fleet.len(), 1);
}

#[tokio::test]
async fn test_scan_replaces_previous_devices() {
    let mut h = harness(&["dev1", "dev2"], &["dev1", "dev2"], "dev1\ndev2\n");
    h.fleet.scan(&h.host_list, "pi").await.unwrap();
    assert_eq!(h.fleet.len(), 2);

    std::fs::write(h.host_list.path(), "dev2\n").unwrap();
    h.fleet.scan(&h.host_list, "pi").await.unwrap();
    assert_eq!(h.fleet.hosts(), ["dev2"]);
}

#[tokio::test]
async fn test_scan_without_host_list_fails() {
    let mut h = harness(&["dev1"], &["dev1"], "");
    let missing = File::new(h.host_list.path().with_file_name("absent.txt"));
    let err = h.fleet.scan(&missing, "pi").await.unwrap_err();
    assert!(matches!(err, ControllerError::ConfigError(_)));
}

#[tokio::test]
async fn test_results_follow_subset_order() {
    let mut h = harness(
        &["dev1", "dev2", "dev3"],
        &["dev1", "dev2", "dev3"],
        "dev1\ndev2\ndev3\n",
    );
    h.fleet.scan(&h.host_list, "pi").await.unwrap();

    // Slowest first so completion order is reversed
    h.shells[0].set_delay(Duration::from_millis(60));
    h.shells[1].set_delay(Duration::from_millis(30));
    h.shells[2].start_process("picam");

    let subset = h.fleet.select(&[2, 0, 1]);
    let report = h.fleet.running_devices(&subset).await;

    let hosts: Vec<&str> = report.outcomes.iter().map(|o| o.host.as_str()).collect();
    assert_eq!(hosts, ["dev3", "dev1", "dev2"]);
    let running: Vec<bool> = report.succeeded().map(|(_, r)| *r).collect();
    assert_eq!(running, [true, false, false]);
}

#[tokio::test]
async fn test_empty_selection_touches_nothing() {
    let mut h = harness(&["dev1"], &["dev1"], "dev1\n");
    h.fleet.scan(&h.host_list, "pi").await.unwrap();
    let before = h.shells[0].calls().len();

    let report = h.fleet.update_all(&[]).await;

    assert!(report.is_noop());
    assert_eq!(h.shells[0].calls().len(), before);
}

#[tokio::test]
async fn test_update_pulls_only_stale_idle_devices() {
    let mut h = harness(
        &["dev1", "dev2", "dev3"],
        &["dev1", "dev2", "dev3"],
        "dev1\ndev2\ndev3\n",
    );
    h.fleet.scan(&h.host_list, "pi").await.unwrap();
    h.shells[0].on("git fetch --dry-run", "   1a2b..3c4d  main -> origin/main", 0);
    h.shells[1].on("git fetch --dry-run", "   1a2b..3c4d  main -> origin/main", 0);
    h.shells[1].start_process("picam");

    let devices = h.fleet.devices().to_vec();
    let freshness = h.fleet.check_updates(&devices).await;
    let fresh: Vec<bool> = freshness.succeeded().map(|(_, r)| *r).collect();
    assert_eq!(fresh, [false, false, true]);

    let report = h.fleet.update_all(&devices).await;
    let outcomes: Vec<(&str, UpdateOutcome)> = report.succeeded().map(|(host, r)| (host, *r)).collect();
    assert_eq!(
        outcomes,
        [
            ("dev1", UpdateOutcome::Updated),
            ("dev2", UpdateOutcome::SkippedRunning)
        ]
    );
    assert_eq!(h.shells[0].calls_matching("git pull").len(), 1);
    assert!(h.shells[1].calls_matching("git pull").is_empty());
    assert!(h.shells[2].calls_matching("git pull").is_empty());
}

#[tokio::test]
async fn test_update_with_fresh_fleet_is_noop() {
    let mut h = harness(&["dev1", "dev2"], &["dev1", "dev2"], "dev1\ndev2\n");
    h.fleet.scan(&h.host_list, "pi").await.unwrap();

    let devices = h.fleet.devices().to_vec();
    let report = h.fleet.update_all(&devices).await;

    assert!(report.is_noop());
    for shell in &h.shells {
        assert_eq!(shell.calls_matching("git fetch --dry-run").len(), 1);
        assert!(shell.calls_matching("git pull").is_empty());
    }
}

#[tokio::test]
async fn test_lost_connection_is_reported_per_device() {
    let mut h = harness(&["dev1", "dev2"], &["dev1", "dev2"], "dev1\ndev2\n");
    h.fleet.scan(&h.host_list, "pi").await.unwrap();
    h.shells[0].set_connection_lost(true);

    let devices = h.fleet.devices().to_vec();
    let report = h.fleet.stop_devices(&devices).await;

    assert!(!report.all_succeeded());
    assert_eq!(report.connection_lost(), ["dev1"]);
    assert!(report.outcomes[1].result.is_ok());
}

#[tokio::test]
async fn test_outdated_devices_lists_stale_checkouts() {
    let mut h = harness(&["dev1", "dev2"], &["dev1", "dev2"], "dev1\ndev2\n");
    h.fleet.scan(&h.host_list, "pi").await.unwrap();
    h.shells[0].on("git fetch --dry-run", "   1a2b..3c4d  main -> origin/main", 0);

    let devices = h.fleet.devices().to_vec();
    let outdated = h.fleet.outdated_devices(&devices).await;

    let hosts: Vec<&str> = outdated.iter().map(|d| d.host()).collect();
    assert_eq!(hosts, ["dev1"]);
}

#[tokio::test]
async fn test_record_stages_through_configs_dir() {
    let mut h = harness(&["dev1"], &["dev1"], "dev1\n");
    h.fleet.scan(&h.host_list, "pi").await.unwrap();
    let layout = StorageLayout::new(h.host_list.path().with_file_name("local"));
    layout.setup().await.unwrap();
    let config = CaptureConfig {
        local_output_dir: Some("/home/pi/data".to_string()),
        ..Default::default()
    };

    let devices = h.fleet.devices().to_vec();
    let report = assert_ok!(
        h.fleet
            .record_devices(&devices, &config, &layout.configs_dir())
            .await
    );

    let outcomes: Vec<RecordOutcome> = report.succeeded().map(|(_, r)| *r).collect();
    assert_eq!(outcomes, [RecordOutcome::Started]);
    assert_eq!(h.shells[0].calls_matching("put ").len(), 1);
    assert!(h.shells[0].is_process_running("picam"));
    assert_eq!(std::fs::read_dir(layout.configs_dir().path()).unwrap().count(), 0);
}
