//! Utility functions

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Version information for the controller
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionInfo {
    pub version: String,
    pub git_hash: String,
    pub build_time: String,
}

/// Get version information
pub fn version_info() -> VersionInfo {
    VersionInfo {
        version: env!("CARGO_PKG_VERSION").to_string(),
        git_hash: option_env!("GIT_HASH").unwrap_or("unknown").to_string(),
        build_time: option_env!("BUILD_TIME").unwrap_or("unknown").to_string(),
    }
}

/// Cooldown options for exponential backoff
#[derive(Debug, Clone)]
pub struct CooldownOptions {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for CooldownOptions {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(5),
            multiplier: 2.0,
        }
    }
}

impl CooldownOptions {
    /// No delay between attempts.
    pub fn none() -> Self {
        Self {
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            multiplier: 1.0,
        }
    }
}

/// Calculate exponential backoff delay
pub fn calc_exp_backoff(options: &CooldownOptions, attempt: u32) -> Duration {
    let delay_secs = options.base_delay.as_secs_f64() * options.multiplier.powi(attempt as i32);
    let capped_delay = delay_secs.min(options.max_delay.as_secs_f64());
    Duration::from_secs_f64(capped_delay)
}

/// Quote a value for a POSIX shell command line.
pub fn shell_quote(value: &str) -> String {
    if !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./~:=@%+,".contains(c))
    {
        return value.to_string();
    }
    format!("'{}'", value.replace('\'', r"'\''"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exp_backoff() {
        let options = CooldownOptions {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(300),
            multiplier: 2.0,
        };

        assert_eq!(calc_exp_backoff(&options, 0), Duration::from_secs(1));
        assert_eq!(calc_exp_backoff(&options, 1), Duration::from_secs(2));
        assert_eq!(calc_exp_backoff(&options, 2), Duration::from_secs(4));
        assert_eq!(calc_exp_backoff(&options, 10), Duration::from_secs(300));
    }

    #[test]
    fn test_no_cooldown() {
        assert_eq!(calc_exp_backoff(&CooldownOptions::none(), 3), Duration::ZERO);
    }

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("/home/pi/tmp"), "/home/pi/tmp");
        assert_eq!(shell_quote("a b"), "'a b'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
        assert_eq!(shell_quote(""), "''");
    }
}
