//! Fleet discovery and bulk dispatch
//!
//! `FleetManager` keeps devices in host-list order. Every bulk operation goes
//! through [`FleetManager::execute`], which returns results positionally
//! aligned with the subset it was given.

pub mod hosts;
pub mod pool;
pub mod reachability;
pub mod report;

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use secrecy::SecretString;
use tracing::{debug, info, warn};

use crate::capture::config::CaptureConfig;
use crate::device::{Device, LedColor, RecordOutcome, RemoteLayout, UpdateOutcome, DEFAULT_SETTLE_DELAY};
use crate::errors::ControllerError;
use crate::filesys::dir::Dir;
use crate::filesys::file::File;
use crate::installer::install::{InstallOutcome, Installer};
use crate::remote::ssh::SshConnector;
use crate::remote::Connector;
use crate::storage::settings::{RemoteSettings, Settings};

use hosts::HostList;
use pool::map_ordered;
use reachability::{ReachabilityCheck, TcpConnectCheck};
pub use report::{BulkReport, DeviceOutcome, ScanReport};

/// Dispatch options
#[derive(Debug, Clone)]
pub struct FleetOptions {
    /// Concurrent workers per operation. `None` runs one per device.
    pub max_parallelism: Option<usize>,
    pub remote: RemoteSettings,
    pub settle_delay: Duration,
}

impl Default for FleetOptions {
    fn default() -> Self {
        Self {
            max_parallelism: None,
            remote: RemoteSettings::default(),
            settle_delay: DEFAULT_SETTLE_DELAY,
        }
    }
}

impl FleetOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            max_parallelism: settings.fleet.max_parallelism,
            remote: settings.remote.clone(),
            settle_delay: DEFAULT_SETTLE_DELAY,
        }
    }
}

/// Ordered set of connected devices
pub struct FleetManager {
    options: FleetOptions,
    reachability: Arc<dyn ReachabilityCheck>,
    connector: Arc<dyn Connector>,
    devices: Vec<Arc<Device>>,
}

impl FleetManager {
    /// Fleet over SSH with TCP reachability checks.
    pub fn new(settings: &Settings) -> Self {
        let check = TcpConnectCheck::new(
            settings.ssh.port,
            Duration::from_millis(settings.fleet.reach_timeout_ms),
        );
        Self::with_backends(
            FleetOptions::from_settings(settings),
            Arc::new(check),
            Arc::new(SshConnector::new(settings.ssh.clone())),
        )
    }

    pub fn with_backends(
        options: FleetOptions,
        reachability: Arc<dyn ReachabilityCheck>,
        connector: Arc<dyn Connector>,
    ) -> Self {
        Self {
            options,
            reachability,
            connector,
            devices: Vec::new(),
        }
    }

    /// Rebuild the fleet from a host list.
    ///
    /// Current devices are released first. Hosts are checked concurrently and
    /// only those that answer are connected to, keeping file order.
    pub async fn scan(&mut self, host_list: &File, username: &str) -> Result<ScanReport, ControllerError> {
        let list = HostList::load(host_list).await?;
        self.clear().await;

        let mut report = ScanReport {
            listed: list.hosts().to_vec(),
            ..Default::default()
        };
        info!("Scanning {} hosts", list.len());

        let reachability = Arc::clone(&self.reachability);
        let checks = map_ordered(list.hosts().to_vec(), self.options.max_parallelism, |host| {
            let reachability = Arc::clone(&reachability);
            async move {
                let reachable = reachability.is_reachable(&host).await;
                Ok::<_, ControllerError>((host, reachable))
            }
        })
        .await;

        let mut reachable = Vec::new();
        for (host, result) in list.hosts().iter().zip(checks) {
            match result {
                Ok((_, true)) => reachable.push(host.clone()),
                Ok((_, false)) => {
                    debug!("{} did not answer the reachability check", host);
                    report.unreachable.push(host.clone());
                }
                Err(e) => {
                    warn!("Reachability check of {} failed: {}", host, e);
                    report.unreachable.push(host.clone());
                }
            }
        }

        let connector = Arc::clone(&self.connector);
        let username = username.to_string();
        let options = self.options.clone();
        let connections = map_ordered(reachable.clone(), self.options.max_parallelism, |host| {
            let connector = Arc::clone(&connector);
            let username = username.clone();
            let layout = RemoteLayout::for_user(&username, &options.remote);
            let settle_delay = options.settle_delay;
            async move {
                let shell = connector.connect(&host, &username).await?;
                Ok::<_, ControllerError>(
                    Device::new(shell, &username, layout).with_settle_delay(settle_delay),
                )
            }
        })
        .await;

        for (host, result) in reachable.into_iter().zip(connections) {
            match result {
                Ok(device) => {
                    report.connected.push(host);
                    self.devices.push(Arc::new(device));
                }
                Err(e) => {
                    warn!("Could not connect to {}: {}", host, e);
                    report.failed.push((host, e.to_string()));
                }
            }
        }

        info!(
            "Scan complete: {} connected, {} unreachable, {} failed",
            report.connected.len(),
            report.unreachable.len(),
            report.failed.len()
        );
        Ok(report)
    }

    /// Add an already connected device at the end of the fleet.
    pub fn add_device(&mut self, device: Arc<Device>) -> Result<(), ControllerError> {
        if self.devices.iter().any(|d| d.host() == device.host()) {
            return Err(ControllerError::DuplicateDevice(device.host().to_string()));
        }
        self.devices.push(device);
        Ok(())
    }

    /// Remove a device and release its session.
    pub async fn remove_device(&mut self, host: &str) -> Option<Arc<Device>> {
        let index = self.devices.iter().position(|d| d.host() == host)?;
        let device = self.devices.remove(index);
        device.close().await;
        Some(device)
    }

    /// Release every device.
    pub async fn clear(&mut self) {
        for device in self.devices.drain(..) {
            device.close().await;
        }
    }

    pub fn devices(&self) -> &[Arc<Device>] {
        &self.devices
    }

    pub fn hosts(&self) -> Vec<String> {
        self.devices.iter().map(|d| d.host().to_string()).collect()
    }

    pub fn device(&self, index: usize) -> Option<Arc<Device>> {
        self.devices.get(index).cloned()
    }

    /// Devices at `indices`, in the order given. Out-of-range indices are skipped.
    pub fn select(&self, indices: &[usize]) -> Vec<Arc<Device>> {
        indices
            .iter()
            .filter_map(|&i| {
                let device = self.device(i);
                if device.is_none() {
                    warn!("No device at index {}", i);
                }
                device
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Run `op` on every device of `subset` concurrently.
    ///
    /// `results[i]` belongs to `subset[i]`. A device repeated in the subset
    /// runs once; the repeats get `DuplicateDevice`.
    pub async fn execute<T, F, Fut>(&self, subset: &[Arc<Device>], op: F) -> Vec<Result<T, ControllerError>>
    where
        T: Send + 'static,
        F: FnMut(Arc<Device>) -> Fut,
        Fut: Future<Output = Result<T, ControllerError>> + Send + 'static,
    {
        if subset.is_empty() {
            info!("No devices selected");
            return Vec::new();
        }

        let mut seen = HashSet::new();
        let mut unique = Vec::with_capacity(subset.len());
        let mut slots = Vec::with_capacity(subset.len());
        for device in subset {
            if seen.insert(device.host().to_string()) {
                slots.push(Some(unique.len()));
                unique.push(Arc::clone(device));
            } else {
                warn!("{} selected twice: dispatching once", device.host());
                slots.push(None);
            }
        }

        let mut results: Vec<Option<Result<T, ControllerError>>> =
            map_ordered(unique, self.options.max_parallelism, op)
                .await
                .into_iter()
                .map(Some)
                .collect();

        subset
            .iter()
            .zip(slots)
            .map(|(device, slot)| match slot.and_then(|i| results[i].take()) {
                Some(result) => result,
                None => Err(ControllerError::DuplicateDevice(device.host().to_string())),
            })
            .collect()
    }

    /// [`FleetManager::execute`] with results paired to hosts.
    pub async fn dispatch<T, F, Fut>(&self, subset: &[Arc<Device>], op: F) -> BulkReport<T>
    where
        T: Send + 'static,
        F: FnMut(Arc<Device>) -> Fut,
        Fut: Future<Output = Result<T, ControllerError>> + Send + 'static,
    {
        let hosts = subset.iter().map(|d| d.host().to_string()).collect();
        let results = self.execute(subset, op).await;
        let report = BulkReport::new(hosts, results);
        for (host, err) in report.failed() {
            warn!("{}: {}", host, err);
        }
        report
    }

    /// Freshness of each device's checkout (`true` when up to date).
    pub async fn check_updates(&self, subset: &[Arc<Device>]) -> BulkReport<bool> {
        self.dispatch(subset, |device| async move { device.is_up_to_date().await })
            .await
    }

    /// Devices of `subset` with updates available
    pub async fn outdated_devices(&self, subset: &[Arc<Device>]) -> Vec<Arc<Device>> {
        let results = self.execute(subset, |device| async move { device.is_up_to_date().await }).await;
        subset
            .iter()
            .zip(results)
            .filter(|(_, result)| matches!(result, Ok(false)))
            .map(|(device, _)| Arc::clone(device))
            .collect()
    }

    /// Pull the stale devices of `subset`. The report only covers those.
    pub async fn update_all(&self, subset: &[Arc<Device>]) -> BulkReport<UpdateOutcome> {
        if subset.is_empty() {
            info!("No devices selected");
            return BulkReport::empty();
        }
        let outdated = self.outdated_devices(subset).await;
        if outdated.is_empty() {
            info!("No devices need updating");
            return BulkReport::empty();
        }
        self.dispatch(&outdated, |device| async move { device.update().await })
            .await
    }

    pub async fn reboot_all(&self, subset: &[Arc<Device>]) -> BulkReport<()> {
        self.dispatch(subset, |device| async move { device.reboot().await })
            .await
    }

    /// Power off `subset` and drop the devices from the fleet.
    pub async fn shutdown_all(&mut self, subset: &[Arc<Device>]) -> BulkReport<()> {
        let report = self
            .dispatch(subset, |device| async move { device.shutdown().await })
            .await;
        self.devices.retain(|d| d.is_connected());
        report
    }

    pub async fn switch_led(
        &self,
        subset: &[Arc<Device>],
        color: LedColor,
        on: bool,
        level: u8,
    ) -> BulkReport<()> {
        self.dispatch(subset, move |device| async move {
            device.switch_led(color, on, level).await
        })
        .await
    }

    pub async fn clear_tmp_folders(&self, subset: &[Arc<Device>]) -> BulkReport<()> {
        self.dispatch(subset, |device| async move { device.clear_tmp_folder().await })
            .await
    }

    /// Run the provisioning script on `subset` with the sudo credential.
    pub async fn install_on_all(
        &self,
        subset: &[Arc<Device>],
        credential: SecretString,
    ) -> BulkReport<InstallOutcome> {
        let installer = Arc::new(Installer::new(credential));
        self.dispatch(subset, |device| {
            let installer = Arc::clone(&installer);
            async move { installer.run_install_script(&device).await }
        })
        .await
    }

    pub async fn stop_devices(&self, subset: &[Arc<Device>]) -> BulkReport<()> {
        self.dispatch(subset, |device| async move { device.stop().await })
            .await
    }

    /// Whether the capture program runs on each device
    pub async fn running_devices(&self, subset: &[Arc<Device>]) -> BulkReport<bool> {
        self.dispatch(subset, |device| async move { device.is_running().await })
            .await
    }

    /// Start recording with `config` on `subset`.
    ///
    /// Refuses to start anything while a target has updates available. The
    /// config is staged in `staging` and removed locally once pushed.
    pub async fn record_devices(
        &self,
        subset: &[Arc<Device>],
        config: &CaptureConfig,
        staging: &Dir,
    ) -> Result<BulkReport<RecordOutcome>, ControllerError> {
        if subset.is_empty() {
            info!("No devices selected");
            return Ok(BulkReport::empty());
        }
        config.validate_for_recording()?;

        let outdated = self.outdated_devices(subset).await;
        if !outdated.is_empty() {
            let hosts: Vec<String> = outdated.iter().map(|d| d.host().to_string()).collect();
            warn!("Recording refused, devices out of date: {}", hosts.join(", "));
            return Err(ControllerError::OutdatedDevices(hosts));
        }

        let local = Arc::new(config.stage(staging).await?);
        let report = self
            .dispatch(subset, |device| {
                let local = Arc::clone(&local);
                async move {
                    let remote_path = device.push_config(&local).await?;
                    device.record(&remote_path).await
                }
            })
            .await;

        if let Err(e) = local.delete().await {
            warn!("Could not remove staged config {:?}: {}", local.path(), e);
        }
        Ok(report)
    }
}
