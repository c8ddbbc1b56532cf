//! Built-in task table

use crate::diagnostics::checks::*;
use crate::diagnostics::task::Task;

pub fn default_tasks() -> Vec<Task> {
    vec![
        Task::new(
            "Check Network",
            "Checking network connection...",
            "Network is accessible.",
            "Failed to access network.",
            check_network,
        ),
        Task::new(
            "Verify Disk Space",
            "Checking available disk space...",
            "Sufficient disk space available.",
            "Low disk space.",
            check_disk_space,
        ),
        Task::new(
            "Validate Configurations",
            "Validating settings...",
            "Settings are valid.",
            "Invalid settings.",
            validate_configurations,
        ),
        Task::new(
            "Check Host List",
            "Reading host list...",
            "Host list loaded.",
            "Host list missing or empty.",
            check_host_list,
        ),
        Task::new(
            "Connect Devices",
            "Connecting to devices...",
            "All devices connected.",
            "No device could be connected.",
            connect_devices,
        )
        .with_warning("Some devices are not connected."),
        Task::new(
            "Check Device Updates",
            "Checking device repositories...",
            "All devices are up to date.",
            "Update check failed.",
            check_device_updates,
        )
        .with_warning("Some devices need an update."),
        Task::new(
            "Check Capture Status",
            "Reading capture status...",
            "Capture status readable on all devices.",
            "Capture status check failed.",
            check_capture_status,
        )
        .with_warning("Capture status unclear on some devices."),
    ]
}
