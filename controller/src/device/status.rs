//! Recording status reported by the capture program

use std::fmt;

use serde::{Deserialize, Serialize};

/// Content of the remote status marker file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordingStatus {
    Recording,
    Paused,
    NotRunning,
    Unknown,
}

impl RecordingStatus {
    /// Map marker file content to a status. Anything unrecognized is `Unknown`.
    pub fn parse(content: &str) -> Self {
        match content.trim() {
            "Recording" => RecordingStatus::Recording,
            "Paused" => RecordingStatus::Paused,
            "Not Running" => RecordingStatus::NotRunning,
            _ => RecordingStatus::Unknown,
        }
    }
}

impl From<&[u8]> for RecordingStatus {
    fn from(bytes: &[u8]) -> Self {
        Self::parse(&String::from_utf8_lossy(bytes))
    }
}

impl fmt::Display for RecordingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RecordingStatus::Recording => "Recording",
            RecordingStatus::Paused => "Paused",
            RecordingStatus::NotRunning => "Not Running",
            RecordingStatus::Unknown => "Unknown",
        };
        f.write_str(label)
    }
}
