//! Error types for the fleet controller

use thiserror::Error;

/// Main error type for the fleet controller
#[derive(Error, Debug)]
pub enum ControllerError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// The host did not answer on the network (TCP connect failed or timed out).
    #[error("Device unreachable: {0}")]
    Unreachable(String),

    /// SSH authentication was refused.
    #[error("Authentication failed for {user}@{host}: {reason}")]
    AuthFailed {
        host: String,
        user: String,
        reason: String,
    },

    /// An established session dropped mid-operation. The device should be rescanned.
    #[error("Connection lost to {0}")]
    ConnectionLost(String),

    #[error("Remote command failed on {host} (exit {exit_status}): {command}")]
    RemoteCommand {
        host: String,
        command: String,
        exit_status: i32,
    },

    #[error("Remote file not found: {0}")]
    RemoteFileNotFound(String),

    #[error("Device {0} appears more than once in the same dispatch")]
    DuplicateDevice(String),

    #[error("Devices are out of date: {}", .0.join(", "))]
    OutdatedDevices(Vec<String>),

    #[error("SSH error: {0}")]
    SshError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Task error: {0}")]
    TaskError(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ControllerError {
    /// True when the session to the device is gone and a rescan is needed.
    pub fn is_connection_lost(&self) -> bool {
        matches!(self, ControllerError::ConnectionLost(_))
    }

    /// True for conditions worth polling again later rather than failing hard.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ControllerError::RemoteFileNotFound(_) | ControllerError::ConnectionLost(_)
        )
    }
}

impl From<anyhow::Error> for ControllerError {
    fn from(err: anyhow::Error) -> Self {
        ControllerError::Internal(err.to_string())
    }
}

impl From<tokio::task::JoinError> for ControllerError {
    fn from(err: tokio::task::JoinError) -> Self {
        ControllerError::Internal(format!("worker task failed: {err}"))
    }
}
