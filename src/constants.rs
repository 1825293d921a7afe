// SPDX-License-Identifier: GPL-3.0-only

//! Pipeline-wide constants

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default capture width requested from the camera
pub const DEFAULT_CAPTURE_WIDTH: u32 = 1920;
/// Default capture height requested from the camera
pub const DEFAULT_CAPTURE_HEIGHT: u32 = 1080;
/// Default ideal capture frame rate
pub const DEFAULT_FRAME_RATE: u32 = 24;

/// Interval between fps reports from the capture monitor
pub const FPS_REPORT_PERIOD: Duration = Duration::from_millis(2000);
/// A capture that delivers no frames for this long is reported as frozen
pub const FREEZE_TIMEOUT: Duration = Duration::from_millis(4000);
/// Upper bound for `stop_capture_and_block_until_stopped`
pub const STOP_TIMEOUT: Duration = Duration::from_millis(3000);

/// Returned by zoom/torch/exposure queries before capture has started
pub const CAPTURE_NOT_STARTED: i32 = -3;

/// Sizes offered by the device are only accepted when the width is a
/// multiple of this value
pub const SIZE_WIDTH_ALIGNMENT: u32 = 32;

/// Frame-rate range selection penalties. Rates are expressed in fps * 1000.
pub mod fps_penalty {
    /// Upper bounds further than this from the target are penalised harder
    pub const MAX_FPS_DIFF_THRESHOLD: i64 = 5000;
    pub const MAX_FPS_LOW_DIFF_WEIGHT: i64 = 1;
    pub const MAX_FPS_HIGH_DIFF_WEIGHT: i64 = 3;
    /// Lower bounds above this are penalised harder
    pub const MIN_FPS_THRESHOLD: i64 = 8000;
    pub const MIN_FPS_LOW_VALUE_WEIGHT: i64 = 1;
    pub const MIN_FPS_HIGH_VALUE_WEIGHT: i64 = 4;
}

/// Which physical camera to open
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum CameraFacing {
    /// User-facing camera. Its images arrive mirrored.
    #[default]
    Front,
    /// World-facing camera
    Back,
}

impl CameraFacing {
    /// All facings in switch order
    pub const ALL: [CameraFacing; 2] = [CameraFacing::Front, CameraFacing::Back];

    /// Numeric value used by platform drivers (front = 0, back = 1)
    pub fn as_int(&self) -> i32 {
        match self {
            CameraFacing::Front => 0,
            CameraFacing::Back => 1,
        }
    }

    /// The other camera
    pub fn toggled(&self) -> Self {
        match self {
            CameraFacing::Front => CameraFacing::Back,
            CameraFacing::Back => CameraFacing::Front,
        }
    }

    /// Frames from this camera are mirrored at the source
    pub fn is_mirrored(&self) -> bool {
        matches!(self, CameraFacing::Front)
    }

    /// Display name for logs and the CLI
    pub fn display_name(&self) -> &'static str {
        match self {
            CameraFacing::Front => "front",
            CameraFacing::Back => "back",
        }
    }
}

impl std::fmt::Display for CameraFacing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

/// Mirror policy for on-screen consumers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MirrorMode {
    /// Follow whatever the frame reports
    #[default]
    Auto,
    /// Always show mirrored
    Enabled,
    /// Never show mirrored
    Disabled,
}

impl MirrorMode {
    pub const ALL: [MirrorMode; 3] = [MirrorMode::Auto, MirrorMode::Enabled, MirrorMode::Disabled];

    /// Numeric value (auto = 0, enabled = 1, disabled = 2)
    pub fn as_int(&self) -> i32 {
        match self {
            MirrorMode::Auto => 0,
            MirrorMode::Enabled => 1,
            MirrorMode::Disabled => 2,
        }
    }

    /// Whether a frame carrying `frame_mirrored` should be shown mirrored
    pub fn resolve(&self, frame_mirrored: bool) -> bool {
        match self {
            MirrorMode::Auto => frame_mirrored,
            MirrorMode::Enabled => true,
            MirrorMode::Disabled => false,
        }
    }
}
