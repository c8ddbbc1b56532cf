//! Remote provisioning script runner
//!
//! `INSTALL.sh` may call `sudo`, and the only signal that it is waiting for
//! a password is the prompt text on the terminal. The script runs under a pty
//! and every line mentioning "password" gets the credential typed back.

use std::sync::Arc;

use secrecy::{ExposeSecret, SecretString};
use tracing::{error, info, warn};

use crate::device::Device;
use crate::errors::ControllerError;
use crate::remote::PromptResponder;
use crate::utils::shell_quote;

/// Answers password prompts with the sudo credential
pub struct PasswordResponder {
    credential: Arc<SecretString>,
    pending: String,
}

impl PasswordResponder {
    pub fn new(credential: Arc<SecretString>) -> Self {
        Self {
            credential,
            pending: String::new(),
        }
    }
}

impl PromptResponder for PasswordResponder {
    fn respond(&mut self, output: &str) -> Option<String> {
        self.pending.push_str(output);
        if self.pending.to_lowercase().contains("password") {
            self.pending.clear();
            return Some(format!("{}\n", self.credential.expose_secret()));
        }
        // Keep only the unfinished last line: a prompt may arrive in pieces
        if let Some(end) = self.pending.rfind('\n') {
            self.pending.drain(..=end);
        }
        None
    }
}

/// Result of running the install script on one device
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallOutcome {
    /// `INSTALL.sh` is not in the checkout
    ScriptMissing,
    Completed {
        exit_status: i32,
        /// Whether a password prompt was answered
        prompted: bool,
    },
}

/// Runs `INSTALL.sh` on devices with a sudo credential
pub struct Installer {
    credential: Arc<SecretString>,
}

impl Installer {
    pub fn new(credential: SecretString) -> Self {
        Self {
            credential: Arc::new(credential),
        }
    }

    pub async fn run_install_script(&self, device: &Device) -> Result<InstallOutcome, ControllerError> {
        let script = device.layout().install_script();
        let quoted = shell_quote(&script);

        if !device.run(&format!("test -e {}", quoted)).await?.success() {
            error!("{} not found on {}", script, device.host());
            return Ok(InstallOutcome::ScriptMissing);
        }

        if !device.run(&format!("test -x {}", quoted)).await?.success() {
            info!("Making {} executable on {}", script, device.host());
            let chmod = format!("chmod +x {}", quoted);
            let output = device.run(&chmod).await?;
            if !output.success() {
                return Err(ControllerError::RemoteCommand {
                    host: device.host().to_string(),
                    command: chmod,
                    exit_status: output.exit_status,
                });
            }
        }

        info!("Running {} on {}", script, device.host());
        let command = format!(
            "cd {} && bash {} -y",
            shell_quote(&device.layout().repo_dir),
            quoted
        );
        let responder = Box::new(PasswordResponder::new(Arc::clone(&self.credential)));
        let outcome = device.shell().exec_interactive(&command, responder).await?;

        let prompted = outcome.replies_sent > 0;
        if !prompted {
            info!("{} ran non-interactively on {}", script, device.host());
        }
        if outcome.exit_status == 0 {
            info!("Install finished on {}", device.host());
        } else {
            warn!(
                "Install on {} exited with {}",
                device.host(),
                outcome.exit_status
            );
        }

        Ok(InstallOutcome::Completed {
            exit_status: outcome.exit_status,
            prompted,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::RemoteLayout;
    use crate::mock::MockShell;
    use crate::storage::settings::RemoteSettings;

    fn responder() -> PasswordResponder {
        PasswordResponder::new(Arc::new(SecretString::from("hunter2".to_string())))
    }

    #[test]
    fn test_prompt_is_answered_once() {
        let mut responder = responder();
        assert_eq!(responder.respond("Reading package lists...\r\n"), None);
        assert_eq!(
            responder.respond("[sudo] Password for pi: "),
            Some("hunter2\n".to_string())
        );
        assert_eq!(responder.respond("Setting up picam\r\n"), None);
    }

    #[test]
    fn test_prompt_split_across_chunks() {
        let mut responder = responder();
        assert_eq!(responder.respond("[sudo] pass"), None);
        assert_eq!(responder.respond("word for pi: "), Some("hunter2\n".to_string()));
    }

    #[test]
    fn test_completed_lines_are_forgotten() {
        let mut responder = responder();
        assert_eq!(responder.respond("pass\nwo"), None);
        assert_eq!(responder.respond("rd ok\n"), None);
    }

    fn device(shell: &Arc<MockShell>) -> Device {
        Device::new(
            shell.clone(),
            "pi",
            RemoteLayout::for_user("pi", &RemoteSettings::default()),
        )
    }

    #[tokio::test]
    async fn test_missing_script() {
        let shell = Arc::new(MockShell::new("dev1"));
        let installer = Installer::new(SecretString::from("hunter2".to_string()));
        let outcome = installer.run_install_script(&device(&shell)).await.unwrap();
        assert_eq!(outcome, InstallOutcome::ScriptMissing);
        assert!(shell.calls_matching("bash").is_empty());
    }

    #[tokio::test]
    async fn test_script_made_executable_and_prompt_answered() {
        let shell = Arc::new(MockShell::new("dev1"));
        shell.with_file("/home/pi/piworm/INSTALL.sh", b"#!/bin/bash".to_vec());
        shell.script_interactive(&["Installing\r\n", "[sudo] password for pi: ", "done\r\n"], 0);

        let installer = Installer::new(SecretString::from("hunter2".to_string()));
        let outcome = installer.run_install_script(&device(&shell)).await.unwrap();

        assert_eq!(
            outcome,
            InstallOutcome::Completed {
                exit_status: 0,
                prompted: true
            }
        );
        assert_eq!(shell.calls_matching("chmod +x").len(), 1);
        assert_eq!(shell.replies(), ["hunter2\n"]);
    }

    #[tokio::test]
    async fn test_non_interactive_run_is_not_an_error() {
        let shell = Arc::new(MockShell::new("dev1"));
        shell
            .with_file("/home/pi/piworm/INSTALL.sh", b"#!/bin/bash".to_vec())
            .with_executable("/home/pi/piworm/INSTALL.sh");
        shell.script_interactive(&["nothing to do\r\n"], 0);

        let installer = Installer::new(SecretString::from("hunter2".to_string()));
        let outcome = installer.run_install_script(&device(&shell)).await.unwrap();

        assert_eq!(
            outcome,
            InstallOutcome::Completed {
                exit_status: 0,
                prompted: false
            }
        );
        assert!(shell.calls_matching("chmod").is_empty());
    }
}
