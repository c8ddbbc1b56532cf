//! Context shared by diagnostic tasks
//!
//! The fleet is created on first use. This is only sound because the runner
//! executes tasks one at a time; a parallel runner would need a lock here.

use tracing::info;

use crate::errors::ControllerError;
use crate::filesys::file::File;
use crate::fleet::{FleetManager, ScanReport};
use crate::storage::layout::StorageLayout;
use crate::storage::settings::Settings;

pub type FleetFactory = Box<dyn Fn(&Settings) -> FleetManager + Send + Sync>;

pub struct DiagnosticEnvironment {
    pub settings: Settings,
    pub layout: StorageLayout,
    fleet: Option<FleetManager>,
    last_scan: Option<ScanReport>,
    fleet_factory: FleetFactory,
}

impl DiagnosticEnvironment {
    pub fn new(settings: Settings, layout: StorageLayout) -> Self {
        Self {
            settings,
            layout,
            fleet: None,
            last_scan: None,
            fleet_factory: Box::new(FleetManager::new),
        }
    }

    /// Replace how the fleet is built on first use.
    pub fn with_fleet_factory<F>(mut self, factory: F) -> Self
    where
        F: Fn(&Settings) -> FleetManager + Send + Sync + 'static,
    {
        self.fleet_factory = Box::new(factory);
        self
    }

    pub fn host_list_file(&self) -> File {
        self.settings.host_list_file(&self.layout)
    }

    /// Scan the host list once and hand out the resulting fleet.
    ///
    /// A failed scan leaves the fleet unset so a later task can try again.
    pub async fn connect_if_needed(&mut self) -> Result<&mut FleetManager, ControllerError> {
        if self.fleet.is_none() {
            info!("Connecting to devices");
            let mut fleet = (self.fleet_factory)(&self.settings);
            let report = fleet
                .scan(&self.host_list_file(), &self.settings.username)
                .await?;
            self.last_scan = Some(report);
            self.fleet = Some(fleet);
        }
        self.fleet
            .as_mut()
            .ok_or_else(|| ControllerError::Internal("fleet missing after scan".to_string()))
    }

    pub fn fleet(&self) -> Option<&FleetManager> {
        self.fleet.as_ref()
    }

    pub fn last_scan(&self) -> Option<&ScanReport> {
        self.last_scan.as_ref()
    }

    /// Hand the fleet over to the caller, e.g. once diagnostics are done.
    pub fn take_fleet(&mut self) -> Option<FleetManager> {
        self.fleet.take()
    }
}
