//! Capture configuration document pushed to each device.
//!
//! The capture program reads a flat JSON object. Key names are part of the
//! device contract and must not change, hence the explicit renames.

use serde::{Deserialize, Serialize};

use crate::errors::ControllerError;
use crate::filesys::dir::Dir;
use crate::filesys::file::File;

/// Unit of the recording timeout as chosen by the operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeoutUnit {
    Seconds,
    Minutes,
    Hours,
}

impl TimeoutUnit {
    /// Convert a value in this unit to seconds (`value * 60^unit`).
    pub fn to_seconds(self, value: u64) -> u64 {
        let exponent = match self {
            TimeoutUnit::Seconds => 0,
            TimeoutUnit::Minutes => 1,
            TimeoutUnit::Hours => 2,
        };
        value * 60u64.pow(exponent)
    }
}

/// Capture parameters and output destination
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub verbosity_level: u8,

    /// Total recording duration in seconds. Zero captures a single frame.
    pub timeout: u64,

    /// Seconds between frames
    pub time_interval: f64,

    /// Number of frames averaged per output frame
    pub average: u32,

    /// JPEG quality (1-100)
    pub quality: u8,

    #[serde(rename = "ISO")]
    pub iso: u32,

    /// Shutter speed in microseconds
    pub shutter_speed: u32,

    /// Brightness (0-100)
    pub brightness: u8,

    /// Frames per archive
    pub compress: u32,

    pub start_frame: u32,

    /// Illumination LED intensity (0-100)
    #[serde(rename = "LED_intensity")]
    pub led_intensity: u8,

    pub annotate_frames: bool,

    /// Optogenetic stimulation
    pub optogenetic: bool,
    pub optogenetic_color: Option<String>,
    pub pulse_count: u32,
    pub pulse_duration: f64,
    pub pulse_interval: f64,

    /// Remote share destination
    pub use_samba: bool,
    pub smb_service: Option<String>,
    pub workgroup: Option<String>,
    pub credentials_file: Option<String>,
    pub smb_dir: Option<String>,

    /// Local destination on the device
    pub local_output_dir: Option<String>,
    pub output_filename: String,
    pub local_tmp_dir: String,

    /// Seconds allowed for a single capture
    pub capture_timeout: f64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            verbosity_level: 0,
            timeout: 3600,
            time_interval: 1.0,
            average: 1,
            quality: 90,
            iso: 100,
            shutter_speed: 10_000,
            brightness: 50,
            compress: 1000,
            start_frame: 0,
            led_intensity: 100,
            annotate_frames: true,
            optogenetic: false,
            optogenetic_color: None,
            pulse_count: 0,
            pulse_duration: 0.0,
            pulse_interval: 0.0,
            use_samba: false,
            smb_service: None,
            workgroup: None,
            credentials_file: Some("/etc/.smbpicreds".to_string()),
            smb_dir: None,
            local_output_dir: None,
            output_filename: "auto".to_string(),
            local_tmp_dir: ".wormstation_tmp".to_string(),
            capture_timeout: 3.0,
        }
    }
}

impl CaptureConfig {
    /// Set the recording timeout from an operator value and unit.
    pub fn with_timeout(mut self, value: u64, unit: TimeoutUnit) -> Self {
        self.timeout = unit.to_seconds(value);
        self
    }

    /// Single-frame variant: no timeout and no remote share upload.
    pub fn preview(&self) -> Self {
        Self {
            timeout: 0,
            use_samba: false,
            ..self.clone()
        }
    }

    /// Check parameter ranges.
    pub fn validate(&self) -> Result<(), ControllerError> {
        if !(1..=100).contains(&self.quality) {
            return Err(ControllerError::ValidationError(format!(
                "quality must be between 1 and 100, got {}",
                self.quality
            )));
        }
        if self.brightness > 100 {
            return Err(ControllerError::ValidationError(format!(
                "brightness must be at most 100, got {}",
                self.brightness
            )));
        }
        if self.led_intensity > 100 {
            return Err(ControllerError::ValidationError(format!(
                "LED_intensity must be at most 100, got {}",
                self.led_intensity
            )));
        }
        if self.time_interval <= 0.0 {
            return Err(ControllerError::ValidationError(
                "time_interval must be positive".to_string(),
            ));
        }
        if self.average == 0 {
            return Err(ControllerError::ValidationError(
                "average must be at least 1".to_string(),
            ));
        }
        if self.use_samba && self.smb_service.as_deref().unwrap_or("").is_empty() {
            return Err(ControllerError::ValidationError(
                "smb_service is required when use_samba is set".to_string(),
            ));
        }
        if self.optogenetic && self.optogenetic_color.is_none() {
            return Err(ControllerError::ValidationError(
                "optogenetic_color is required when optogenetic is set".to_string(),
            ));
        }
        Ok(())
    }

    /// Recordings additionally need somewhere to put their output.
    pub fn validate_for_recording(&self) -> Result<(), ControllerError> {
        self.validate()?;
        if !self.use_samba && self.local_output_dir.is_none() {
            return Err(ControllerError::ValidationError(
                "recording needs either a remote share or a local output directory".to_string(),
            ));
        }
        Ok(())
    }

    /// Write this config as a uniquely named JSON file in `dir`.
    pub async fn stage(&self, dir: &Dir) -> Result<File, ControllerError> {
        let name = format!(
            "wormstation_{}_{}.json",
            chrono::Local::now().format("%Y%m%d_%H%M%S"),
            &uuid::Uuid::new_v4().simple().to_string()[..8]
        );
        let file = dir.file(&name);
        file.write_json(self).await?;
        Ok(file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_units() {
        assert_eq!(TimeoutUnit::Seconds.to_seconds(5), 5);
        assert_eq!(TimeoutUnit::Minutes.to_seconds(5), 300);
        assert_eq!(TimeoutUnit::Hours.to_seconds(2), 7200);
    }

    #[test]
    fn test_preview_disables_timeout_and_share() {
        let config = CaptureConfig {
            use_samba: true,
            smb_service: Some("//nas/share".to_string()),
            ..Default::default()
        };
        let preview = config.preview();
        assert_eq!(preview.timeout, 0);
        assert!(!preview.use_samba);
        assert_eq!(preview.iso, config.iso);
    }

    #[test]
    fn test_device_contract_keys() {
        let value = serde_json::to_value(CaptureConfig::default()).unwrap();
        assert!(value.get("ISO").is_some());
        assert!(value.get("LED_intensity").is_some());
        assert!(value.get("iso").is_none());
    }

    #[test]
    fn test_validation() {
        assert!(CaptureConfig::default().validate().is_ok());

        let bad_quality = CaptureConfig {
            quality: 0,
            ..Default::default()
        };
        assert!(bad_quality.validate().is_err());

        let missing_share = CaptureConfig {
            use_samba: true,
            smb_service: None,
            ..Default::default()
        };
        assert!(missing_share.validate().is_err());

        assert!(CaptureConfig::default().validate_for_recording().is_err());
        let local = CaptureConfig {
            local_output_dir: Some("/home/pi/data".to_string()),
            ..Default::default()
        };
        assert!(local.validate_for_recording().is_ok());
    }

    #[tokio::test]
    async fn test_stage_writes_json() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = Dir::new(tmp.path());
        let file = CaptureConfig::default().stage(&dir).await.unwrap();
        assert!(file.file_name().unwrap().starts_with("wormstation_"));
        let parsed: CaptureConfig = file.read_json().await.unwrap();
        assert_eq!(parsed, CaptureConfig::default());
    }
}
