//! Built-in diagnostic checks

use std::path::Path;
use std::time::Duration;

use sysinfo::Disks;
use tokio::net::TcpStream;

use crate::device::RecordingStatus;
use crate::diagnostics::environment::DiagnosticEnvironment;
use crate::diagnostics::logger::DiagnosticLogger;
use crate::diagnostics::task::{TaskFuture, TaskOutcome};
use crate::errors::ControllerError;
use crate::fleet::hosts::HostList;

const NETWORK_TARGET: (&str, u16) = ("8.8.8.8", 53);
const NETWORK_TIMEOUT: Duration = Duration::from_secs(3);

/// Minimum free share of the root disk, in percent
const MIN_FREE_DISK_PERCENT: f64 = 10.0;

pub fn check_network<'a>(log: &'a DiagnosticLogger, env: &'a mut DiagnosticEnvironment) -> TaskFuture<'a> {
    Box::pin(run_check_network(log, env))
}

async fn run_check_network(log: &DiagnosticLogger, _: &mut DiagnosticEnvironment) -> Result<TaskOutcome, ControllerError> {
    match tokio::time::timeout(NETWORK_TIMEOUT, TcpStream::connect(NETWORK_TARGET)).await {
        Ok(Ok(_)) => Ok(TaskOutcome::Success),
        Ok(Err(e)) => {
            log.log(format!("Cannot reach {}:{}: {}", NETWORK_TARGET.0, NETWORK_TARGET.1, e));
            Ok(TaskOutcome::Failure)
        }
        Err(_) => {
            log.log(format!(
                "No answer from {}:{} within {:?}",
                NETWORK_TARGET.0, NETWORK_TARGET.1, NETWORK_TIMEOUT
            ));
            Ok(TaskOutcome::Failure)
        }
    }
}

pub fn check_disk_space<'a>(log: &'a DiagnosticLogger, env: &'a mut DiagnosticEnvironment) -> TaskFuture<'a> {
    Box::pin(run_check_disk_space(log, env))
}

async fn run_check_disk_space(log: &DiagnosticLogger, _: &mut DiagnosticEnvironment) -> Result<TaskOutcome, ControllerError> {
    let disks = Disks::new_with_refreshed_list();
    let disk = disks
        .list()
        .iter()
        .find(|d| d.mount_point() == Path::new("/"))
        .or_else(|| disks.list().first())
        .ok_or_else(|| ControllerError::TaskError("No disk found".to_string()))?;

    if disk.total_space() == 0 {
        return Err(ControllerError::TaskError(format!(
            "Disk at {:?} reports no capacity",
            disk.mount_point()
        )));
    }
    let percent_free = disk.available_space() as f64 / disk.total_space() as f64 * 100.0;
    log.log(format!(
        "{:.1}% free on {}",
        percent_free,
        disk.mount_point().display()
    ));
    Ok(TaskOutcome::from(percent_free > MIN_FREE_DISK_PERCENT))
}

pub fn validate_configurations<'a>(log: &'a DiagnosticLogger, env: &'a mut DiagnosticEnvironment) -> TaskFuture<'a> {
    Box::pin(run_validate_configurations(log, env))
}

async fn run_validate_configurations(log: &DiagnosticLogger, env: &mut DiagnosticEnvironment) -> Result<TaskOutcome, ControllerError> {
    match env.settings.validate() {
        Ok(()) => Ok(TaskOutcome::Success),
        Err(e) => {
            log.log(e.to_string());
            Ok(TaskOutcome::Failure)
        }
    }
}

pub fn check_host_list<'a>(log: &'a DiagnosticLogger, env: &'a mut DiagnosticEnvironment) -> TaskFuture<'a> {
    Box::pin(run_check_host_list(log, env))
}

async fn run_check_host_list(log: &DiagnosticLogger, env: &mut DiagnosticEnvironment) -> Result<TaskOutcome, ControllerError> {
    let list = HostList::load(&env.host_list_file()).await?;
    if list.is_empty() {
        log.log("Host list has no enabled hosts");
        return Ok(TaskOutcome::Failure);
    }
    log.log(format!("{} hosts listed", list.len()));
    Ok(TaskOutcome::Success)
}

pub fn connect_devices<'a>(log: &'a DiagnosticLogger, env: &'a mut DiagnosticEnvironment) -> TaskFuture<'a> {
    Box::pin(run_connect_devices(log, env))
}

async fn run_connect_devices(log: &DiagnosticLogger, env: &mut DiagnosticEnvironment) -> Result<TaskOutcome, ControllerError> {
    let connected = env.connect_if_needed().await?.len();
    let missing: Vec<String> = env
        .last_scan()
        .map(|scan| {
            scan.unreachable
                .iter()
                .cloned()
                .chain(scan.failed.iter().map(|(host, _)| host.clone()))
                .collect()
        })
        .unwrap_or_default();

    log.log(format!("{} devices connected", connected));
    if connected == 0 {
        return Ok(TaskOutcome::Failure);
    }
    if !missing.is_empty() {
        log.log(format!("Not connected: {}", missing.join(", ")));
        return Ok(TaskOutcome::Warning);
    }
    Ok(TaskOutcome::Success)
}

pub fn check_device_updates<'a>(log: &'a DiagnosticLogger, env: &'a mut DiagnosticEnvironment) -> TaskFuture<'a> {
    Box::pin(run_check_device_updates(log, env))
}

async fn run_check_device_updates(log: &DiagnosticLogger, env: &mut DiagnosticEnvironment) -> Result<TaskOutcome, ControllerError> {
    let fleet = &*env.connect_if_needed().await?;
    if fleet.is_empty() {
        log.log("No devices connected: skipped");
        return Ok(TaskOutcome::Warning);
    }

    let report = fleet.check_updates(fleet.devices()).await;
    let mut outcome = TaskOutcome::Success;
    for outcome_of in &report.outcomes {
        match &outcome_of.result {
            Ok(true) => {}
            Ok(false) => {
                log.log(format!("Update available for {}", outcome_of.host));
                outcome = TaskOutcome::Warning;
            }
            Err(e) => {
                log.log(format!("Cannot check {}: {}", outcome_of.host, e));
                outcome = TaskOutcome::Warning;
            }
        }
    }
    Ok(outcome)
}

pub fn check_capture_status<'a>(log: &'a DiagnosticLogger, env: &'a mut DiagnosticEnvironment) -> TaskFuture<'a> {
    Box::pin(run_check_capture_status(log, env))
}

async fn run_check_capture_status(log: &DiagnosticLogger, env: &mut DiagnosticEnvironment) -> Result<TaskOutcome, ControllerError> {
    let fleet = &*env.connect_if_needed().await?;
    if fleet.is_empty() {
        log.log("No devices connected: skipped");
        return Ok(TaskOutcome::Warning);
    }

    let report = fleet
        .dispatch(fleet.devices(), |device| async move {
            if !device.is_running().await? {
                return Ok(None);
            }
            device.recording_status().await.map(Some)
        })
        .await;

    let mut outcome = TaskOutcome::Success;
    for device in &report.outcomes {
        match &device.result {
            Ok(None) => log.log(format!("{}: idle", device.host)),
            Ok(Some(RecordingStatus::Unknown)) => {
                log.log(format!("{}: running with an unrecognized status", device.host));
                outcome = TaskOutcome::Warning;
            }
            Ok(Some(status)) => log.log(format!("{}: {}", device.host, status)),
            Err(e) => {
                log.log(format!("{}: status unreadable ({})", device.host, e));
                outcome = TaskOutcome::Warning;
            }
        }
    }
    Ok(outcome)
}
