//! Settings file management

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::capture::config::CaptureConfig;
use crate::errors::ControllerError;
use crate::filesys::file::File;
use crate::logs::LogLevel;
use crate::storage::layout::StorageLayout;

/// Controller settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Login name used on every device
    #[serde(default = "default_username")]
    pub username: String,

    /// Host list file. Defaults to `hosts.txt` in the storage layout.
    #[serde(default)]
    pub host_list: Option<PathBuf>,

    /// SSH transport configuration
    #[serde(default)]
    pub ssh: SshSettings,

    /// Fleet discovery and dispatch configuration
    #[serde(default)]
    pub fleet: FleetSettings,

    /// Device-side paths and program names
    #[serde(default)]
    pub remote: RemoteSettings,

    /// Default capture parameters
    #[serde(default)]
    pub capture: CaptureConfig,
}

fn default_username() -> String {
    "pi".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            username: default_username(),
            host_list: None,
            ssh: SshSettings::default(),
            fleet: FleetSettings::default(),
            remote: RemoteSettings::default(),
            capture: CaptureConfig::default(),
        }
    }
}

impl Settings {
    /// Load settings, falling back to defaults when the file does not exist.
    pub async fn load_or_default(file: &File) -> Result<Self, ControllerError> {
        if !file.exists().await {
            return Ok(Self::default());
        }
        file.read_json().await
    }

    /// Resolve the host list path against the storage layout.
    pub fn host_list_file(&self, layout: &StorageLayout) -> File {
        match &self.host_list {
            Some(path) => File::new(path.clone()),
            None => layout.host_list_file(),
        }
    }

    /// Check that the settings are usable.
    pub fn validate(&self) -> Result<(), ControllerError> {
        if self.username.trim().is_empty() {
            return Err(ControllerError::ValidationError(
                "username must not be empty".to_string(),
            ));
        }
        if self.ssh.connect_attempts == 0 {
            return Err(ControllerError::ValidationError(
                "ssh.connect_attempts must be at least 1".to_string(),
            ));
        }
        if self.ssh.connect_timeout_secs == 0 {
            return Err(ControllerError::ValidationError(
                "ssh.connect_timeout_secs must be positive".to_string(),
            ));
        }
        if !(1..=5000).contains(&self.fleet.reach_timeout_ms) {
            return Err(ControllerError::ValidationError(format!(
                "fleet.reach_timeout_ms must be between 1 and 5000, got {}",
                self.fleet.reach_timeout_ms
            )));
        }
        if self.fleet.max_parallelism == Some(0) {
            return Err(ControllerError::ValidationError(
                "fleet.max_parallelism must be at least 1 when set".to_string(),
            ));
        }
        if self.remote.capture_program.trim().is_empty() {
            return Err(ControllerError::ValidationError(
                "remote.capture_program must not be empty".to_string(),
            ));
        }
        self.capture.validate()
    }
}

/// SSH transport settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SshSettings {
    #[serde(default = "default_ssh_port")]
    pub port: u16,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Per-command timeout. Zero waits indefinitely.
    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,

    #[serde(default = "default_connect_attempts")]
    pub connect_attempts: u32,

    /// Private key used when no SSH agent identity is accepted.
    /// Defaults to `~/.ssh/id_ed25519` then `~/.ssh/id_rsa`.
    #[serde(default)]
    pub identity_file: Option<PathBuf>,
}

fn default_ssh_port() -> u16 {
    22
}

fn default_connect_timeout() -> u64 {
    3
}

fn default_command_timeout() -> u64 {
    120
}

fn default_connect_attempts() -> u32 {
    3
}

impl Default for SshSettings {
    fn default() -> Self {
        Self {
            port: default_ssh_port(),
            connect_timeout_secs: default_connect_timeout(),
            command_timeout_secs: default_command_timeout(),
            connect_attempts: default_connect_attempts(),
            identity_file: None,
        }
    }
}

impl SshSettings {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn command_timeout(&self) -> Option<Duration> {
        (self.command_timeout_secs > 0).then(|| Duration::from_secs(self.command_timeout_secs))
    }
}

/// Fleet discovery and dispatch settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FleetSettings {
    /// Reachability check timeout in milliseconds
    #[serde(default = "default_reach_timeout")]
    pub reach_timeout_ms: u64,

    /// Upper bound on concurrent workers per bulk operation.
    /// `None` runs one worker per targeted device.
    #[serde(default)]
    pub max_parallelism: Option<usize>,
}

fn default_reach_timeout() -> u64 {
    300
}

impl Default for FleetSettings {
    fn default() -> Self {
        Self {
            reach_timeout_ms: default_reach_timeout(),
            max_parallelism: None,
        }
    }
}

/// Device-side settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteSettings {
    /// Name of the capture executable on the device
    #[serde(default = "default_capture_program")]
    pub capture_program: String,

    /// Repository checkout on the device. Defaults to `/home/<user>/piworm`.
    #[serde(default)]
    pub repo_dir: Option<String>,

    /// LED control script. Defaults to `<repo>/led_control.py`.
    #[serde(default)]
    pub led_script: Option<String>,
}

fn default_capture_program() -> String {
    "picam".to_string()
}

impl Default for RemoteSettings {
    fn default() -> Self {
        Self {
            capture_program: default_capture_program(),
            repo_dir: None,
            led_script: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_settings_take_defaults() {
        let settings: Settings =
            serde_json::from_str(r#"{"username": "matthieu", "ssh": {"port": 2222}}"#).unwrap();
        assert_eq!(settings.username, "matthieu");
        assert_eq!(settings.ssh.port, 2222);
        assert_eq!(settings.ssh.connect_attempts, 3);
        assert_eq!(settings.fleet.reach_timeout_ms, 300);
        assert_eq!(settings.remote.capture_program, "picam");
        assert!(settings.validate().is_ok());
    }

    #[tokio::test]
    async fn test_load_from_settings_file() {
        let dir = tempfile::tempdir().unwrap();
        let layout = StorageLayout::new(dir.path());
        let file = layout.settings_file();

        let missing = Settings::load_or_default(&file).await.unwrap();
        assert_eq!(missing.username, Settings::default().username);

        file.write_string(r#"{"username": "lab", "fleet": {"max_parallelism": 4}}"#)
            .await
            .unwrap();
        let loaded = Settings::load_or_default(&file).await.unwrap();
        assert_eq!(loaded.username, "lab");
        assert_eq!(loaded.fleet.max_parallelism, Some(4));
    }

    #[test]
    fn test_validation_rejects_zero_parallelism() {
        let mut settings = Settings::default();
        settings.fleet.max_parallelism = Some(0);
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_host_list_resolution() {
        let layout = StorageLayout::new("/tmp/qontroller");
        let mut settings = Settings::default();
        assert_eq!(
            settings.host_list_file(&layout).path(),
            std::path::Path::new("/tmp/qontroller/hosts.txt")
        );
        settings.host_list = Some(PathBuf::from("/etc/wormstation/hosts"));
        assert_eq!(
            settings.host_list_file(&layout).path(),
            std::path::Path::new("/etc/wormstation/hosts")
        );
    }

    #[test]
    fn test_command_timeout_zero_means_none() {
        let ssh = SshSettings {
            command_timeout_secs: 0,
            ..Default::default()
        };
        assert!(ssh.command_timeout().is_none());
    }
}
