//! Qontroller - Entry Point
//!
//! Operator CLI over the fleet library: scan the host list, then run one
//! bulk operation on every connected device, or run the self-diagnostics.

use std::collections::HashMap;
use std::env;
use std::fmt::Display;
use std::path::PathBuf;

use anyhow::{bail, Context};
use colored::Colorize;
use secrecy::SecretString;
use tracing::info;

use qontroller::capture::config::CaptureConfig;
use qontroller::diagnostics::{DiagnosticEnvironment, DiagnosticRunner, TaskStatus};
use qontroller::filesys::file::File;
use qontroller::fleet::{BulkReport, FleetManager, ScanReport};
use qontroller::logs::{init_logging, LogOptions};
use qontroller::storage::layout::StorageLayout;
use qontroller::storage::settings::Settings;
use qontroller::utils::version_info;

const SUDO_PASSWORD_ENV: &str = "QONTROLLER_SUDO_PASSWORD";

#[tokio::main]
async fn main() {
    // Parse command line arguments
    let args: Vec<String> = env::args().collect();
    let mut cli_args: HashMap<String, String> = HashMap::new();

    for arg in args.iter().skip(1) {
        if let Some((key, value)) = arg.split_once('=') {
            // Handle --key=value format
            let clean_key = key.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), value.to_string());
        } else if arg.starts_with("--") {
            // Handle standalone flags like --version
            let clean_key = arg.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), "true".to_string());
        }
    }

    if cli_args.contains_key("version") {
        match serde_json::to_string_pretty(&version_info()) {
            Ok(version) => println!("{}", version),
            Err(e) => eprintln!("{}", e),
        }
        return;
    }

    if let Err(e) = run(&cli_args).await {
        eprintln!("{} {:#}", "error:".red().bold(), e);
        std::process::exit(1);
    }
}

async fn run(cli_args: &HashMap<String, String>) -> anyhow::Result<()> {
    let layout = StorageLayout::default();
    let settings_file = cli_args
        .get("settings")
        .map(File::new)
        .unwrap_or_else(|| layout.settings_file());
    let mut settings = Settings::load_or_default(&settings_file)
        .await
        .with_context(|| format!("reading {}", settings_file.path().display()))?;
    if let Some(hosts) = cli_args.get("hosts") {
        settings.host_list = Some(PathBuf::from(hosts));
    }
    if let Some(level) = cli_args.get("log-level") {
        settings.log_level = level.parse().map_err(anyhow::Error::msg)?;
    }

    layout.setup().await?;
    let _guard = init_logging(LogOptions {
        log_level: settings.log_level.clone(),
        stdout: true,
        log_dir: Some(layout.logs_dir().path().to_path_buf()),
        json_format: cli_args.contains_key("json-logs"),
    })?;
    settings.validate()?;

    if cli_args.contains_key("diagnostic") || cli_args.contains_key("diag") {
        return run_diagnostics(settings, layout).await;
    }

    let mut fleet = FleetManager::new(&settings);
    let scan = fleet
        .scan(&settings.host_list_file(&layout), &settings.username)
        .await?;
    print_scan(&scan);
    let devices = fleet.devices().to_vec();

    if cli_args.contains_key("check-updates") {
        let report = fleet.check_updates(&devices).await;
        print_report("Update check", &report, |up_to_date| {
            if *up_to_date {
                "up to date"
            } else {
                "update available"
            }
        });
    }
    if cli_args.contains_key("update") {
        let report = fleet.update_all(&devices).await;
        print_report("Update", &report, |outcome| format!("{:?}", outcome));
    }
    if cli_args.contains_key("stop") {
        let report = fleet.stop_devices(&devices).await;
        print_report("Stop", &report, |_| "stopped");
    }
    if cli_args.contains_key("clear-tmp") {
        let report = fleet.clear_tmp_folders(&devices).await;
        print_report("Clear tmp", &report, |_| "cleared");
    }
    if let Some(value) = cli_args.get("led") {
        let (color, on, level) = parse_led(value)?;
        let report = fleet.switch_led(&devices, color, on, level).await;
        print_report("LED", &report, |_| if on { "on" } else { "off" });
    }
    if let Some(path) = cli_args.get("record") {
        let config: CaptureConfig = File::new(path).read_json().await?;
        let report = fleet
            .record_devices(&devices, &config, &layout.configs_dir())
            .await?;
        print_report("Record", &report, |outcome| format!("{:?}", outcome));
    }
    if cli_args.contains_key("install") {
        let credential = env::var(SUDO_PASSWORD_ENV)
            .with_context(|| format!("{} is not set", SUDO_PASSWORD_ENV))?;
        let report = fleet
            .install_on_all(&devices, SecretString::from(credential))
            .await;
        print_report("Install", &report, |outcome| format!("{:?}", outcome));
    }
    if cli_args.contains_key("reboot") {
        let report = fleet.reboot_all(&devices).await;
        print_report("Reboot", &report, |_| "rebooting");
    }
    if cli_args.contains_key("shutdown") {
        let report = fleet.shutdown_all(&devices).await;
        print_report("Shutdown", &report, |_| "powering off");
    }

    fleet.clear().await;
    Ok(())
}

/// `<color>:<on|off>[:<level>]`
fn parse_led(value: &str) -> anyhow::Result<(qontroller::device::LedColor, bool, u8)> {
    let mut parts = value.split(':');
    let color = parts.next().unwrap_or_default().parse()?;
    let on = match parts.next() {
        Some("on") => true,
        Some("off") => false,
        other => bail!("LED state must be 'on' or 'off', got {:?}", other),
    };
    let level = match parts.next() {
        Some(level) => level
            .parse()
            .with_context(|| format!("invalid LED level '{}'", level))?,
        None => 100,
    };
    Ok((color, on, level))
}

async fn run_diagnostics(settings: Settings, layout: StorageLayout) -> anyhow::Result<()> {
    let mut runner = DiagnosticRunner::new(DiagnosticEnvironment::new(settings, layout));
    info!("Running {} diagnostic tasks", runner.tasks().len());
    let summary = runner.run().await;

    println!();
    for task in runner.tasks() {
        let marker = match task.status() {
            TaskStatus::Success => "PASS".green(),
            TaskStatus::Warning => "WARN".yellow(),
            TaskStatus::Failure => "FAIL".red(),
            TaskStatus::Waiting | TaskStatus::Running => "----".dimmed(),
        };
        println!("[{}] {}", marker, task.display_text());
    }
    println!();
    for line in runner.logs() {
        println!("{}", line.dimmed());
    }

    if let Some(mut fleet) = runner.environment_mut().take_fleet() {
        fleet.clear().await;
    }
    if !summary.passed() {
        bail!("{} diagnostic tasks failed", summary.failure);
    }
    Ok(())
}

fn print_scan(scan: &ScanReport) {
    println!(
        "{} {}/{} devices connected",
        "Scan:".bold(),
        scan.connected.len(),
        scan.listed.len()
    );
    for host in &scan.unreachable {
        println!("  {} {}", "unreachable".yellow(), host);
    }
    for (host, reason) in &scan.failed {
        println!("  {} {}: {}", "failed".red(), host, reason);
    }
}

fn print_report<T, D, F>(title: &str, report: &BulkReport<T>, describe: F)
where
    D: Display,
    F: Fn(&T) -> D,
{
    if report.is_noop() {
        println!("{} nothing to do", format!("{}:", title).bold());
        return;
    }
    println!("{}", format!("{}:", title).bold());
    for outcome in &report.outcomes {
        match &outcome.result {
            Ok(value) => println!("  {} {}: {}", "ok".green(), outcome.host, describe(value)),
            Err(e) => println!("  {} {}: {}", "error".red(), outcome.host, e),
        }
    }
    let lost = report.connection_lost();
    if !lost.is_empty() {
        println!(
            "  {} connection lost to {}: rescan needed",
            "!".yellow(),
            lost.join(", ")
        );
    }
}
