// SPDX-License-Identifier: GPL-3.0-only

//! Pipeline configuration
//!
//! Stored as JSON. Missing fields fall back to their defaults so older
//! files keep loading after new settings are added.

use crate::constants::{
    CameraFacing, DEFAULT_CAPTURE_HEIGHT, DEFAULT_CAPTURE_WIDTH, DEFAULT_FRAME_RATE,
    FPS_REPORT_PERIOD, FREEZE_TIMEOUT, MirrorMode, STOP_TIMEOUT,
};
use crate::errors::{PipelineError, PipelineResult};
use crate::gpu::BackendKind;
use crate::matrix::ScaleType;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Requested capture format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Requested frame width
    pub width: u32,
    /// Requested frame height
    pub height: u32,
    /// Ideal frame rate
    pub frame_rate: u32,
    /// Camera to open first
    pub facing: CameraFacing,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            width: DEFAULT_CAPTURE_WIDTH,
            height: DEFAULT_CAPTURE_HEIGHT,
            frame_rate: DEFAULT_FRAME_RATE,
            facing: CameraFacing::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Capture format requested on allocation
    pub capture: CaptureConfig,
    /// Interval between fps log lines
    pub fps_report_period_ms: u64,
    /// No frames for this long raises a freeze error
    pub freeze_timeout_ms: u64,
    /// Upper bound for a blocking capture stop
    pub stop_timeout_ms: u64,
    /// Feed off-screen consumers even without an on-screen consumer
    pub offscreen_mode: bool,
    /// Mirror policy for the local preview
    pub mirror_mode: MirrorMode,
    /// How the local preview fits the view
    pub preview_scale_type: ScaleType,
    /// GPU backend used by channel threads
    pub backend: BackendKind,
    /// Overrides the default log filter when `RUST_LOG` is unset
    pub log_filter: Option<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            capture: CaptureConfig::default(),
            fps_report_period_ms: FPS_REPORT_PERIOD.as_millis() as u64,
            freeze_timeout_ms: FREEZE_TIMEOUT.as_millis() as u64,
            stop_timeout_ms: STOP_TIMEOUT.as_millis() as u64,
            offscreen_mode: true,
            mirror_mode: MirrorMode::default(),
            preview_scale_type: ScaleType::CenterCrop,
            backend: BackendKind::default(),
            log_filter: None,
        }
    }
}

impl PipelineConfig {
    /// `<config dir>/camera-pipeline/config.json`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("camera-pipeline").join("config.json"))
    }

    /// Load from a JSON file. A missing file yields the defaults.
    pub fn load(path: &Path) -> PipelineResult<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "No config file, using defaults");
            return Ok(Self::default());
        }

        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        info!(path = %path.display(), "Loaded pipeline config");
        Ok(config)
    }

    /// Write as pretty JSON, creating parent directories
    pub fn save(&self, path: &Path) -> PipelineResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_json()?)?;
        Ok(())
    }

    pub fn to_json(&self) -> PipelineResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Reject values the pipeline cannot run with
    pub fn validate(&self) -> PipelineResult<()> {
        if self.capture.width == 0 || self.capture.height == 0 {
            return Err(PipelineError::Config(format!(
                "capture size must be non-zero, got {}x{}",
                self.capture.width, self.capture.height
            )));
        }
        if self.capture.frame_rate == 0 {
            return Err(PipelineError::Config("frame rate must be non-zero".into()));
        }
        if self.fps_report_period_ms == 0 {
            return Err(PipelineError::Config(
                "fps report period must be non-zero".into(),
            ));
        }
        Ok(())
    }

    pub fn fps_report_period(&self) -> Duration {
        Duration::from_millis(self.fps_report_period_ms)
    }

    pub fn freeze_timeout(&self) -> Duration {
        Duration::from_millis(self.freeze_timeout_ms)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: PipelineConfig =
            serde_json::from_str(r#"{ "capture": { "width": 640 }, "offscreen_mode": false }"#)
                .unwrap();
        assert_eq!(config.capture.width, 640);
        assert_eq!(config.capture.height, DEFAULT_CAPTURE_HEIGHT);
        assert!(!config.offscreen_mode);
        assert_eq!(config.freeze_timeout(), FREEZE_TIMEOUT);
    }

    #[test]
    fn test_validate_rejects_zero_size() {
        let mut config = PipelineConfig::default();
        config.capture.height = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_save_and_load() {
        let dir = std::env::temp_dir().join(format!("camera-pipeline-cfg-{}", std::process::id()));
        let path = dir.join("config.json");
        let mut config = PipelineConfig::default();
        config.mirror_mode = MirrorMode::Enabled;
        config.save(&path).unwrap();

        let loaded = PipelineConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
        let _ = std::fs::remove_dir_all(&dir);
    }
}
