//! Paths on the device side

use crate::storage::settings::RemoteSettings;

/// Remote file layout for one login
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteLayout {
    pub home: String,
    pub repo_dir: String,
    pub config_dir: String,
    pub tmp_dir: String,
    pub log_dir: String,
    pub led_script: String,
    pub capture_program: String,
}

impl RemoteLayout {
    pub fn for_user(user: &str, remote: &RemoteSettings) -> Self {
        let home = format!("/home/{}", user);
        let repo_dir = remote
            .repo_dir
            .clone()
            .unwrap_or_else(|| format!("{}/piworm", home));
        let led_script = remote
            .led_script
            .clone()
            .unwrap_or_else(|| format!("{}/led_control.py", repo_dir));

        Self {
            config_dir: format!("{}/.config/wormstation", home),
            tmp_dir: format!("{}/tmp", home),
            log_dir: format!("{}/log", home),
            capture_program: remote.capture_program.clone(),
            home,
            repo_dir,
            led_script,
        }
    }

    /// Frame the capture program writes after every acquisition
    pub fn last_frame(&self) -> String {
        format!("{}/last_frame.jpg", self.tmp_dir)
    }

    /// Status marker maintained by the capture program
    pub fn status_file(&self) -> String {
        format!("{}/status.txt", self.tmp_dir)
    }

    pub fn install_script(&self) -> String {
        format!("{}/INSTALL.sh", self.repo_dir)
    }

    /// Log file for a background recording started now
    pub fn recording_log(&self) -> String {
        format!(
            "{}/{}_{}.log",
            self.log_dir,
            self.capture_program,
            chrono::Local::now().format("%Y%m%d_%H%M%S")
        )
    }
}
