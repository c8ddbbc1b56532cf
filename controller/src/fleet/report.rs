//! Per-device results of fleet operations

use crate::errors::ControllerError;

/// One device's result in a bulk operation
#[derive(Debug)]
pub struct DeviceOutcome<T> {
    pub host: String,
    pub result: Result<T, ControllerError>,
}

/// Results of a bulk operation, in dispatch order
#[derive(Debug)]
pub struct BulkReport<T> {
    pub outcomes: Vec<DeviceOutcome<T>>,
}

impl<T> BulkReport<T> {
    /// Pair hosts with the results `execute` returned for them.
    pub fn new(hosts: Vec<String>, results: Vec<Result<T, ControllerError>>) -> Self {
        let outcomes = hosts
            .into_iter()
            .zip(results)
            .map(|(host, result)| DeviceOutcome { host, result })
            .collect();
        Self { outcomes }
    }

    pub fn empty() -> Self {
        Self {
            outcomes: Vec::new(),
        }
    }

    /// Nothing was dispatched
    pub fn is_noop(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn all_succeeded(&self) -> bool {
        self.outcomes.iter().all(|o| o.result.is_ok())
    }

    pub fn succeeded(&self) -> impl Iterator<Item = (&str, &T)> {
        self.outcomes
            .iter()
            .filter_map(|o| o.result.as_ref().ok().map(|value| (o.host.as_str(), value)))
    }

    pub fn failed(&self) -> impl Iterator<Item = (&str, &ControllerError)> {
        self.outcomes
            .iter()
            .filter_map(|o| o.result.as_ref().err().map(|err| (o.host.as_str(), err)))
    }

    /// Hosts whose session dropped and should be rescanned
    pub fn connection_lost(&self) -> Vec<&str> {
        self.failed()
            .filter(|(_, err)| err.is_connection_lost())
            .map(|(host, _)| host)
            .collect()
    }
}

/// Outcome of a discovery scan
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanReport {
    /// Enabled hosts from the host list, in order
    pub listed: Vec<String>,

    /// Hosts that did not answer the reachability check
    pub unreachable: Vec<String>,

    /// Hosts that answered but could not be connected to
    pub failed: Vec<(String, String)>,

    /// Hosts now in the fleet, in order
    pub connected: Vec<String>,
}
