//! Connection retry policy with public-key bootstrap.
//!
//! Each attempt is classified: an authentication failure installs the local
//! public key on the device before the next attempt, an unreachable host just
//! burns an attempt. Both count toward the same budget.

use std::future::Future;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{info, warn};

use crate::errors::ControllerError;
use crate::utils::{calc_exp_backoff, CooldownOptions};

/// Classified outcome of a failed connection attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectFailure {
    /// The device answered but refused our credentials
    Auth(String),

    /// No route, refused TCP connection, failed handshake or name resolution
    Unreachable(String),
}

/// Installs the local public key on a device's `authorized_keys`.
#[async_trait]
pub trait KeyBootstrap: Send + Sync {
    async fn install_key(&self, host: &str, user: &str) -> Result<(), ControllerError>;
}

/// `ssh-copy-id` (or the Windows pipe-through-ssh equivalent)
#[derive(Debug, Clone, Default)]
pub struct SshCopyId;

#[async_trait]
impl KeyBootstrap for SshCopyId {
    async fn install_key(&self, host: &str, user: &str) -> Result<(), ControllerError> {
        let target = format!("{}@{}", user, host);
        info!("Installing public key on {}", target);

        #[cfg(windows)]
        let status = Command::new("cmd")
            .args([
                "/C",
                "type",
                r"%userprofile%\.ssh\id_rsa.pub",
                "|",
                "ssh",
                &target,
                "cat >> .ssh/authorized_keys",
            ])
            .status()
            .await;

        #[cfg(not(windows))]
        let status = Command::new("ssh-copy-id").arg(&target).status().await;

        let status = status
            .map_err(|e| ControllerError::SshError(format!("Failed to run key bootstrap: {}", e)))?;
        if !status.success() {
            return Err(ControllerError::SshError(format!(
                "Key bootstrap for {} exited with {}",
                target, status
            )));
        }
        Ok(())
    }
}

/// Bounded retry policy for connecting to a device
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub cooldown: CooldownOptions,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            cooldown: CooldownOptions::default(),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Default::default()
        }
    }

    /// Drive `attempt` until it succeeds or the budget is spent.
    ///
    /// Exhausting the budget is reported as `Unreachable` whatever the last
    /// failure class was.
    pub async fn connect<T, F, Fut>(
        &self,
        host: &str,
        user: &str,
        bootstrap: &dyn KeyBootstrap,
        mut attempt: F,
    ) -> Result<T, ControllerError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, ConnectFailure>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut last_reason = String::new();

        for n in 0..max_attempts {
            let has_next = n + 1 < max_attempts;
            match attempt(n).await {
                Ok(connected) => return Ok(connected),
                Err(ConnectFailure::Auth(reason)) => {
                    warn!(
                        "Authentication failed for {}@{} (attempt {}/{}): {}",
                        user,
                        host,
                        n + 1,
                        max_attempts,
                        reason
                    );
                    if has_next {
                        if let Err(e) = bootstrap.install_key(host, user).await {
                            warn!("Key bootstrap failed for {}: {}", host, e);
                        }
                    }
                    last_reason = reason;
                }
                Err(ConnectFailure::Unreachable(reason)) => {
                    warn!(
                        "Cannot reach {} (attempt {}/{}): {}",
                        host,
                        n + 1,
                        max_attempts,
                        reason
                    );
                    last_reason = reason;
                }
            }

            if has_next {
                let delay = calc_exp_backoff(&self.cooldown, n);
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
            }
        }

        Err(ControllerError::Unreachable(format!(
            "{} after {} attempts: {}",
            host, max_attempts, last_reason
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockBootstrap;

    fn instant_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            cooldown: CooldownOptions::none(),
        }
    }

    #[tokio::test]
    async fn test_auth_failure_bootstraps_then_connects() {
        let bootstrap = MockBootstrap::default();
        let result = instant_policy()
            .connect("dev1", "pi", &bootstrap, |n| async move {
                if n < 2 {
                    Err(ConnectFailure::Auth("publickey denied".to_string()))
                } else {
                    Ok(n)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(bootstrap.calls(), vec!["pi@dev1".to_string(); 2]);
    }

    #[tokio::test]
    async fn test_unreachable_never_bootstraps() {
        let bootstrap = MockBootstrap::default();
        let mut attempts = 0;
        let result: Result<(), _> = instant_policy()
            .connect("dev2", "pi", &bootstrap, |_| {
                attempts += 1;
                async { Err(ConnectFailure::Unreachable("no route to host".to_string())) }
            })
            .await;

        assert!(matches!(result, Err(ControllerError::Unreachable(_))));
        assert_eq!(attempts, 3);
        assert!(bootstrap.calls().is_empty());
    }

    #[tokio::test]
    async fn test_exhausted_auth_budget_is_unreachable() {
        let bootstrap = MockBootstrap::default();
        let result: Result<(), _> = instant_policy()
            .connect("dev3", "pi", &bootstrap, |_| async {
                Err(ConnectFailure::Auth("denied".to_string()))
            })
            .await;

        assert!(matches!(result, Err(ControllerError::Unreachable(_))));
        // No bootstrap after the final attempt
        assert_eq!(bootstrap.calls().len(), 2);
    }
}
