//! A single capture device
//!
//! Every operation is built from [`RemoteShell`] primitives. Nothing is
//! cached: running state, recording status and freshness are polled on each
//! call so a just-issued `stop()` is visible to the next query.

pub mod layout;
pub mod led;
pub mod status;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::capture::config::CaptureConfig;
use crate::errors::ControllerError;
use crate::filesys::dir::Dir;
use crate::filesys::file::File;
use crate::remote::{CommandOutput, RemoteShell};
use crate::utils::shell_quote;

pub use layout::RemoteLayout;
pub use led::{LedBackend, LedColor};
pub use status::RecordingStatus;

/// Wait after asking a paused capture to resume before reading its frame
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_secs(2);

/// Result of [`Device::update`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    Updated,
    /// The capture program was running so the checkout was left alone
    SkippedRunning,
}

/// Result of [`Device::record`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    Started,
    AlreadyRunning,
}

/// One connected capture device
pub struct Device {
    host: String,
    username: String,
    layout: RemoteLayout,
    shell: Arc<dyn RemoteShell>,
    led_backend: Mutex<Option<LedBackend>>,
    invalidated: AtomicBool,
    settle_delay: Duration,
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("host", &self.host)
            .field("username", &self.username)
            .field("invalidated", &self.invalidated.load(Ordering::SeqCst))
            .finish()
    }
}

impl Device {
    pub fn new(shell: Arc<dyn RemoteShell>, username: &str, layout: RemoteLayout) -> Self {
        Self {
            host: shell.host().to_string(),
            username: username.to_string(),
            layout,
            shell,
            led_backend: Mutex::new(None),
            invalidated: AtomicBool::new(false),
            settle_delay: DEFAULT_SETTLE_DELAY,
        }
    }

    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn layout(&self) -> &RemoteLayout {
        &self.layout
    }

    pub fn shell(&self) -> &Arc<dyn RemoteShell> {
        &self.shell
    }

    /// Live session and not shut down
    pub fn is_connected(&self) -> bool {
        !self.invalidated.load(Ordering::SeqCst) && self.shell.is_connected()
    }

    fn check_valid(&self) -> Result<(), ControllerError> {
        if self.invalidated.load(Ordering::SeqCst) {
            return Err(ControllerError::ConnectionLost(self.host.clone()));
        }
        Ok(())
    }

    /// Run a command on the device.
    pub async fn run(&self, command: &str) -> Result<CommandOutput, ControllerError> {
        self.check_valid()?;
        self.shell.exec(command).await
    }

    /// Run a command and turn a non-zero exit into an error.
    async fn run_checked(&self, command: &str) -> Result<CommandOutput, ControllerError> {
        let output = self.run(command).await?;
        if !output.success() {
            return Err(ControllerError::RemoteCommand {
                host: self.host.clone(),
                command: command.to_string(),
                exit_status: output.exit_status,
            });
        }
        Ok(output)
    }

    fn in_repo(&self, command: &str) -> String {
        format!("cd {} && {}", shell_quote(&self.layout.repo_dir), command)
    }

    /// Whether the capture program has a live process.
    pub async fn is_running(&self) -> Result<bool, ControllerError> {
        let output = self
            .run(&format!("pgrep {}", shell_quote(&self.layout.capture_program)))
            .await?;
        Ok(output.has_output())
    }

    /// Read the status marker. A missing marker is `RemoteFileNotFound`.
    pub async fn recording_status(&self) -> Result<RecordingStatus, ControllerError> {
        self.check_valid()?;
        let content = self.shell.get_file(&self.layout.status_file()).await?;
        Ok(RecordingStatus::from(content.as_slice()))
    }

    /// Dry-run fetch of the checkout. No output means nothing to fetch.
    pub async fn is_up_to_date(&self) -> Result<bool, ControllerError> {
        let output = self.run_checked(&self.in_repo("git fetch --dry-run")).await?;
        let up_to_date = !output.has_output();
        if up_to_date {
            debug!("{} up to date", self.host);
        } else {
            info!("Update available for {}", self.host);
        }
        Ok(up_to_date)
    }

    /// Pull the checkout unless a capture is running.
    pub async fn update(&self) -> Result<UpdateOutcome, ControllerError> {
        if self.is_running().await? {
            info!("Device {} is running: update skipped", self.host);
            return Ok(UpdateOutcome::SkippedRunning);
        }

        let output = self.run_checked(&self.in_repo("git pull")).await?;
        for line in output.stdout.lines().filter(|l| !l.trim().is_empty()) {
            debug!("[{}] {}", self.host, line.trim_end());
        }
        info!("Device {} updated", self.host);
        Ok(UpdateOutcome::Updated)
    }

    /// Fetch the latest frame, capturing one if the program is idle.
    ///
    /// Returns `None` when no frame has been written yet. A running program
    /// whose status file cannot be read yields the retryable error.
    pub async fn get_frame(&self, remote_config: &str) -> Result<Option<Vec<u8>>, ControllerError> {
        if self.is_running().await? {
            match self.recording_status().await {
                Ok(RecordingStatus::Recording) => {
                    debug!("{} is recording: reading last frame", self.host);
                    return self.fetch_last_frame().await;
                }
                Ok(RecordingStatus::Paused) => {
                    debug!("{} is paused: resuming before reading last frame", self.host);
                    let signal = self
                        .run(&format!(
                            "pkill -USR1 {}",
                            shell_quote(&self.layout.capture_program)
                        ))
                        .await?;
                    if signal.success() {
                        tokio::time::sleep(self.settle_delay).await;
                        return self.fetch_last_frame().await;
                    }
                    warn!(
                        "{} exited before it could be resumed on {} (exit {}): capturing a new frame",
                        self.layout.capture_program, self.host, signal.exit_status
                    );
                }
                Ok(status) => warn!(
                    "{} runs {} but reports '{}': capturing a new frame",
                    self.host, self.layout.capture_program, status
                ),
                // Never start a second capture next to a live one
                Err(e) if e.is_retryable() => return Err(e),
                Err(e) => warn!(
                    "{} runs {} but its status is unreadable ({}): capturing a new frame",
                    self.host, self.layout.capture_program, e
                ),
            }
        }

        self.capture_foreground(remote_config).await?;
        self.fetch_last_frame().await
    }

    async fn capture_foreground(&self, remote_config: &str) -> Result<(), ControllerError> {
        let command = format!(
            "{} {}",
            shell_quote(&self.layout.capture_program),
            shell_quote(remote_config)
        );
        let output = self.run(&command).await?;
        for line in output.stdout.lines().filter(|l| !l.trim().is_empty()) {
            debug!("[{}] {}", self.host, line.trim_end());
        }
        if !output.success() {
            warn!(
                "Capture on {} exited with {}",
                self.host, output.exit_status
            );
        }
        Ok(())
    }

    async fn fetch_last_frame(&self) -> Result<Option<Vec<u8>>, ControllerError> {
        match self.shell.get_file(&self.layout.last_frame()).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(ControllerError::RemoteFileNotFound(path)) => {
                debug!("No frame at {}:{} yet", self.host, path);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Start a background recording unless one is already running.
    pub async fn record(&self, remote_config: &str) -> Result<RecordOutcome, ControllerError> {
        if self.is_running().await? {
            warn!("Device {} is already running: recording ignored", self.host);
            return Ok(RecordOutcome::AlreadyRunning);
        }

        self.create_log_folder().await?;
        let command = format!(
            "nohup {} {} > {} 2>&1 &",
            shell_quote(&self.layout.capture_program),
            shell_quote(remote_config),
            shell_quote(&self.layout.recording_log())
        );
        self.check_valid()?;
        self.shell.spawn(&command).await?;
        info!("Recording started on {}", self.host);
        Ok(RecordOutcome::Started)
    }

    /// Terminate the capture program. Stopping an idle device is a no-op.
    pub async fn stop(&self) -> Result<(), ControllerError> {
        let command = format!("pkill {}", shell_quote(&self.layout.capture_program));
        let output = self.run(&command).await?;
        match output.exit_status {
            0 => info!("Device {} stopped", self.host),
            // pkill: no process matched
            1 => debug!("Device {} was not running", self.host),
            exit_status => {
                return Err(ControllerError::RemoteCommand {
                    host: self.host.clone(),
                    command,
                    exit_status,
                })
            }
        }
        Ok(())
    }

    async fn led_backend(&self) -> Result<LedBackend, ControllerError> {
        let mut backend = self.led_backend.lock().await;
        if let Some(selected) = backend.as_ref() {
            return Ok(selected.clone());
        }
        let script = &self.layout.led_script;
        let detection = self.run(&LedBackend::detect_command(script)).await?;
        let selected = LedBackend::from_detection(script, &detection);
        debug!("{} LED backend: {:?}", self.host, selected);
        *backend = Some(selected.clone());
        Ok(selected)
    }

    /// Switch one LED channel, falling back to GPIO when the script is gone.
    pub async fn switch_led(&self, color: LedColor, on: bool, level: u8) -> Result<(), ControllerError> {
        let backend = self.led_backend().await?;
        let mut command = backend.command(color, on, level);
        let mut output = self.run(&command).await?;

        if matches!(backend, LedBackend::Scripted { .. }) && LedBackend::script_missing(&output) {
            warn!(
                "LED script missing on {}: falling back to GPIO pin {}",
                self.host,
                color.gpio_pin()
            );
            *self.led_backend.lock().await = Some(LedBackend::Gpio);
            command = LedBackend::Gpio.command(color, on, level);
            output = self.run(&command).await?;
        }

        if !output.success() {
            return Err(ControllerError::RemoteCommand {
                host: self.host.clone(),
                command,
                exit_status: output.exit_status,
            });
        }
        info!(
            "{} LED {} on {}",
            color,
            if on { "on" } else { "off" },
            self.host
        );
        Ok(())
    }

    /// Ask the device to reboot without waiting for it.
    pub async fn reboot(&self) -> Result<(), ControllerError> {
        self.check_valid()?;
        info!("Rebooting {}", self.host);
        self.shell.spawn("sudo reboot").await
    }

    /// Power the device off. The device is unusable afterwards.
    pub async fn shutdown(&self) -> Result<(), ControllerError> {
        self.check_valid()?;
        info!("Shutting down {}", self.host);
        let result = self.shell.spawn("sudo poweroff").await;
        self.invalidated.store(true, Ordering::SeqCst);
        self.shell.close().await;
        result
    }

    /// Empty the remote tmp folder.
    pub async fn clear_tmp_folder(&self) -> Result<(), ControllerError> {
        self.run_checked(&format!("rm -rf {}/*", shell_quote(&self.layout.tmp_dir)))
            .await?;
        info!("Cleared tmp folder on {}", self.host);
        Ok(())
    }

    /// Create the remote log folder if absent and return its path.
    pub async fn create_log_folder(&self) -> Result<String, ControllerError> {
        self.check_valid()?;
        self.shell.ensure_dir(&self.layout.log_dir).await?;
        Ok(self.layout.log_dir.clone())
    }

    /// Upload a capture config into the remote config folder.
    pub async fn push_config(&self, local: &File) -> Result<String, ControllerError> {
        self.check_valid()?;
        let remote_path = self
            .shell
            .put_file(local.path(), &self.layout.config_dir)
            .await?;
        debug!("Pushed {:?} to {}:{}", local.path(), self.host, remote_path);
        Ok(remote_path)
    }

    /// Best-effort removal of a remote file.
    pub async fn discard_remote_file(&self, remote_path: &str) {
        match self.run(&format!("rm -f {}", shell_quote(remote_path))).await {
            Ok(output) if output.success() => {}
            Ok(output) => warn!(
                "Could not remove {}:{} (exit {})",
                self.host, remote_path, output.exit_status
            ),
            Err(e) => warn!("Could not remove {}:{}: {}", self.host, remote_path, e),
        }
    }

    /// Capture a single preview frame with `config`.
    ///
    /// The config is staged in `staging`, pushed, used, and then removed on
    /// both sides whatever the outcome.
    pub async fn preview(
        &self,
        config: &CaptureConfig,
        staging: &Dir,
    ) -> Result<Option<Vec<u8>>, ControllerError> {
        let local = config.preview().stage(staging).await?;
        let result = match self.push_config(&local).await {
            Ok(remote_path) => {
                let frame = self.get_frame(&remote_path).await;
                self.discard_remote_file(&remote_path).await;
                frame
            }
            Err(e) => Err(e),
        };
        if let Err(e) = local.delete().await {
            warn!("Could not remove staged config {:?}: {}", local.path(), e);
        }
        result
    }

    /// Release the session.
    pub async fn close(&self) {
        self.shell.close().await;
    }
}
