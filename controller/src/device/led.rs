//! Illumination LED control
//!
//! Newer device images ship a control script in the repository checkout;
//! older ones only expose raw GPIO. The backend is chosen once per device by
//! probing for the script.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::ControllerError;
use crate::remote::CommandOutput;
use crate::utils::shell_quote;

/// LED color channels fitted to the capture board
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LedColor {
    Infrared,
    Orange,
    Blue,
}

impl LedColor {
    /// BCM pin driving this channel on boards without the control script
    pub fn gpio_pin(self) -> u8 {
        match self {
            LedColor::Infrared => 17,
            LedColor::Orange => 27,
            LedColor::Blue => 22,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LedColor::Infrared => "infrared",
            LedColor::Orange => "orange",
            LedColor::Blue => "blue",
        }
    }
}

impl fmt::Display for LedColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LedColor {
    type Err = ControllerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "infrared" | "ir" => Ok(LedColor::Infrared),
            "orange" => Ok(LedColor::Orange),
            "blue" => Ok(LedColor::Blue),
            _ => Err(ControllerError::ValidationError(format!(
                "Unknown LED color: {}",
                s
            ))),
        }
    }
}

/// Output level of a GPIO pin
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinState {
    Low,
    High,
}

impl From<bool> for PinState {
    fn from(value: bool) -> Self {
        if value {
            PinState::High
        } else {
            PinState::Low
        }
    }
}

/// How LED commands reach the hardware
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedBackend {
    /// Python control script with color, state and current arguments
    Scripted { script: String },

    /// Legacy direct pin control
    Gpio,
}

impl LedBackend {
    /// Command that detects the control script
    pub fn detect_command(script: &str) -> String {
        format!("test -e {}", shell_quote(script))
    }

    /// Pick the backend from the detection result.
    pub fn from_detection(script: &str, detection: &CommandOutput) -> Self {
        if detection.success() {
            LedBackend::Scripted {
                script: script.to_string(),
            }
        } else {
            LedBackend::Gpio
        }
    }

    pub fn command(&self, color: LedColor, on: bool, level: u8) -> String {
        match self {
            LedBackend::Scripted { script } => format!(
                "python3 {} --color {} --state {} --current {}",
                shell_quote(script),
                color,
                if on { "on" } else { "off" },
                level
            ),
            LedBackend::Gpio => {
                let drive = match PinState::from(on) {
                    PinState::High => "dh",
                    PinState::Low => "dl",
                };
                format!("raspi-gpio set {} op {}", color.gpio_pin(), drive)
            }
        }
    }

    /// The scripted backend reported that its script is gone.
    pub fn script_missing(output: &CommandOutput) -> bool {
        !output.success() && output.combined().to_lowercase().contains("no such file")
    }
}
