//! Device integration tests against the mock shell

use std::sync::Arc;
use std::time::Duration;

use qontroller::device::{Device, LedColor, RecordOutcome, RemoteLayout};
use qontroller::mock::MockShell;
use qontroller::storage::settings::RemoteSettings;
use tokio_test::assert_ok;

const CONFIG: &str = "/home/pi/.config/wormstation/cfg.json";
const FRAME: &str = "/home/pi/tmp/last_frame.jpg";
const STATUS: &str = "/home/pi/tmp/status.txt";

fn device(host: &str) -> (Device, Arc<MockShell>) {
    let shell = Arc::new(MockShell::new(host));
    let layout = RemoteLayout::for_user("pi", &RemoteSettings::default());
    let device = Device::new(shell.clone(), "pi", layout).with_settle_delay(Duration::ZERO);
    (device, shell)
}

#[tokio::test]
async fn test_record_starts_once() {
    let (device, shell) = device("dev1");

    assert_eq!(device.record(CONFIG).await.unwrap(), RecordOutcome::Started);
    assert_eq!(device.record(CONFIG).await.unwrap(), RecordOutcome::AlreadyRunning);

    let launches = shell.calls_matching("nohup");
    assert_eq!(launches.len(), 1);
    assert!(launches[0].starts_with("nohup picam /home/pi/.config/wormstation/cfg.json > /home/pi/log/picam_"));
    assert!(launches[0].ends_with(".log 2>&1 &"));
    assert!(shell.has_dir("/home/pi/log"));
}

#[tokio::test]
async fn test_stop_is_idempotent() {
    let (device, shell) = device("dev1");
    shell.start_process("picam");

    assert_ok!(device.stop().await);
    assert!(!device.is_running().await.unwrap());
    assert_ok!(device.stop().await);
    assert_eq!(shell.calls_matching("pkill picam").len(), 2);
}

#[tokio::test]
async fn test_stop_reports_unexpected_failures() {
    let (device, shell) = device("dev1");
    shell.on("pkill", "", 3);
    assert!(device.stop().await.is_err());
}

#[tokio::test]
async fn test_frame_while_recording() {
    let (device, shell) = device("dev1");
    shell.start_process("picam");
    shell.with_file(STATUS, "Recording\n").with_file(FRAME, b"live".to_vec());

    let frame = device.get_frame(CONFIG).await.unwrap();

    assert_eq!(frame, Some(b"live".to_vec()));
    assert!(shell.calls_matching("pkill").is_empty());
    assert!(shell.calls_matching("picam /home").is_empty());
}

#[tokio::test]
async fn test_frame_while_paused_resumes_capture() {
    let (device, shell) = device("dev1");
    shell.start_process("picam");
    shell.with_file(STATUS, "Paused").with_file(FRAME, b"resumed".to_vec());

    let frame = device.get_frame(CONFIG).await.unwrap();

    assert_eq!(frame, Some(b"resumed".to_vec()));
    assert_eq!(shell.calls_matching("pkill -USR1 picam").len(), 1);
    // The signal only wakes the process up
    assert!(shell.is_process_running("picam"));
}

#[tokio::test]
async fn test_frame_with_missing_status_file_is_retryable() {
    let (device, shell) = device("dev1");
    shell.start_process("picam");
    shell.with_file(FRAME, b"stale".to_vec());

    let err = device.get_frame(CONFIG).await.unwrap_err();

    assert!(err.is_retryable());
    assert!(!err.is_connection_lost());
    assert!(shell.calls_matching(&format!("picam {}", CONFIG)).is_empty());
}

#[tokio::test]
async fn test_frame_when_resume_signal_misses_captures_in_foreground() {
    let (device, shell) = device("dev1");
    shell.start_process("picam");
    shell.with_file(STATUS, "Paused").with_file(FRAME, b"fresh".to_vec());
    // Process gone between pgrep and the signal
    shell.on("pkill -USR1", "", 1);

    let frame = device.get_frame(CONFIG).await.unwrap();

    assert_eq!(frame, Some(b"fresh".to_vec()));
    assert_eq!(shell.calls_matching("pkill -USR1 picam").len(), 1);
    assert_eq!(shell.calls_matching(&format!("picam {}", CONFIG)).len(), 1);
}

#[tokio::test]
async fn test_frame_with_unknown_status_captures_in_foreground() {
    let (device, shell) = device("dev1");
    shell.start_process("picam");
    shell.with_file(STATUS, "garbage").with_file(FRAME, b"fresh".to_vec());

    let frame = device.get_frame(CONFIG).await.unwrap();

    assert_eq!(frame, Some(b"fresh".to_vec()));
    assert_eq!(shell.calls_matching(&format!("picam {}", CONFIG)).len(), 1);
}

#[tokio::test]
async fn test_frame_when_idle_captures_in_foreground() {
    let (device, shell) = device("dev1");
    shell.with_file(FRAME, b"still".to_vec());

    let frame = device.get_frame(CONFIG).await.unwrap();

    assert_eq!(frame, Some(b"still".to_vec()));
    assert!(shell.calls_matching("get /home/pi/tmp/status.txt").is_empty());
    assert_eq!(shell.calls_matching(&format!("picam {}", CONFIG)).len(), 1);
}

#[tokio::test]
async fn test_frame_missing_is_none() {
    let (device, _shell) = device("dev1");
    assert_eq!(device.get_frame(CONFIG).await.unwrap(), None);
}

#[tokio::test]
async fn test_led_uses_control_script() {
    let (device, shell) = device("dev1");
    shell.with_file("/home/pi/piworm/led_control.py", "#!/usr/bin/env python3");

    assert_ok!(device.switch_led(LedColor::Blue, true, 80).await);

    let calls = shell.calls_matching("python3");
    assert_eq!(
        calls,
        ["python3 /home/pi/piworm/led_control.py --color blue --state on --current 80"]
    );
    assert!(shell.calls_matching("raspi-gpio").is_empty());
}

#[tokio::test]
async fn test_led_falls_back_to_gpio() {
    let (device, shell) = device("dev1");
    shell.with_file("/home/pi/piworm/led_control.py", "#!/usr/bin/env python3");
    shell.on_error(
        "led_control.py --color",
        "python3: can't open file 'led_control.py': [Errno 2] No such file or directory",
        2,
    );

    assert_ok!(device.switch_led(LedColor::Orange, true, 100).await);
    assert_eq!(shell.calls_matching("raspi-gpio set 27 op dh").len(), 1);

    // The fallback sticks for later calls
    assert_ok!(device.switch_led(LedColor::Orange, false, 100).await);
    assert_eq!(shell.calls_matching("raspi-gpio set 27 op dl").len(), 1);
    assert_eq!(shell.calls_matching("python3").len(), 1);
}

#[tokio::test]
async fn test_led_without_script_drives_pins() {
    let (device, shell) = device("dev1");

    assert_ok!(device.switch_led(LedColor::Infrared, true, 100).await);

    assert_eq!(shell.calls_matching("raspi-gpio set 17 op dh").len(), 1);
    assert!(shell.calls_matching("python3").is_empty());
}

#[tokio::test]
async fn test_reboot_keeps_device_usable() {
    let (device, shell) = device("dev1");

    assert_ok!(device.reboot().await);

    assert_eq!(shell.calls_matching("sudo reboot").len(), 1);
    assert!(device.is_connected());
}
