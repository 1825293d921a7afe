// SPDX-License-Identifier: GPL-3.0-only

//! Shared types for camera backends

use crate::constants::{CameraFacing, SIZE_WIDTH_ALIGNMENT, fps_penalty};
use crate::frame::{Rotation, TexImageSource};
use image::RgbaImage;
use std::sync::Arc;
use std::time::Instant;

/// Capture session state
///
/// ```text
///  STOPPED ──start──► OPENING ──opened──► CONFIGURING ──configured──► STARTED
///     ▲                                                                  │
///     └────────────closed──────────── STOPPING ◄──────────stop───────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CameraState {
    Opening,
    Configuring,
    Started,
    Stopping,
    #[default]
    Stopped,
}

impl std::fmt::Display for CameraState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            CameraState::Opening => "OPENING",
            CameraState::Configuring => "CONFIGURING",
            CameraState::Started => "STARTED",
            CameraState::Stopping => "STOPPING",
            CameraState::Stopped => "STOPPED",
        };
        write!(f, "{}", name)
    }
}

/// Failure reported by the platform camera driver
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceErrorKind {
    /// Another client holds the device
    InUse,
    /// The system limit of open cameras is reached
    MaxCamerasInUse,
    /// Policy disabled the camera
    Disabled,
    /// Fatal driver error
    Device,
    /// The camera service died
    Service,
    /// The device went away
    Disconnected,
    Other(String),
}

impl std::fmt::Display for DeviceErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceErrorKind::InUse => write!(f, "camera in use"),
            DeviceErrorKind::MaxCamerasInUse => write!(f, "too many cameras in use"),
            DeviceErrorKind::Disabled => write!(f, "camera disabled"),
            DeviceErrorKind::Device => write!(f, "camera device error"),
            DeviceErrorKind::Service => write!(f, "camera service error"),
            DeviceErrorKind::Disconnected => write!(f, "camera disconnected"),
            DeviceErrorKind::Other(msg) => write!(f, "{}", msg),
        }
    }
}

/// Frame size in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl std::fmt::Display for Size {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Supported frame-rate range, in fps * 1000
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameRateRange {
    pub min: i64,
    pub max: i64,
}

impl FrameRateRange {
    pub fn new(min: i64, max: i64) -> Self {
        Self { min, max }
    }

    /// Range with both bounds given in whole fps
    pub fn from_fps(min: u32, max: u32) -> Self {
        Self::new(min as i64 * 1000, max as i64 * 1000)
    }
}

impl std::fmt::Display for FrameRateRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{:.1}, {:.1}] fps", self.min as f64 / 1000.0, self.max as f64 / 1000.0)
    }
}

/// Hardware parameter that can only be applied to a running session
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CameraParameter {
    Zoom(f32),
    Torch(bool),
    Exposure(i32),
}

impl CameraParameter {
    /// Parameters of the same kind replace each other in the replay queue
    pub fn same_kind(&self, other: &CameraParameter) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }
}

/// What a camera offers
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceCapabilities {
    pub sizes: Vec<Size>,
    pub fps_ranges: Vec<FrameRateRange>,
    /// Clockwise rotation needed to show sensor images upright
    pub sensor_orientation: Rotation,
    pub max_zoom: f32,
    /// Inclusive exposure compensation range
    pub exposure_range: (i32, i32),
    pub has_flash: bool,
}

/// Format negotiated by `allocate`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CaptureRequest {
    pub facing: CameraFacing,
    pub size: Size,
    pub fps_range: FrameRateRange,
}

/// One image delivered by a camera device
#[derive(Clone)]
pub struct CapturedFrame {
    pub width: u32,
    pub height: u32,
    /// CPU pixels, top row first
    pub image: Option<Arc<RgbaImage>>,
    /// Deferred GPU image, latched on the channel thread
    pub source: Option<Arc<dyn TexImageSource>>,
    pub timestamp: Instant,
}

impl std::fmt::Debug for CapturedFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapturedFrame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("has_image", &self.image.is_some())
            .field("has_source", &self.source.is_some())
            .finish()
    }
}

/// Closest supported size to `width` x `height`
///
/// Distance is `|dw| + |dh|`, with a zero request ignoring that axis. Only
/// sizes whose width is 32-aligned are considered.
pub fn closest_size(sizes: &[Size], width: u32, height: u32) -> Option<Size> {
    let distance = |size: &Size| {
        let dw = if width > 0 { size.width.abs_diff(width) } else { 0 };
        let dh = if height > 0 { size.height.abs_diff(height) } else { 0 };
        dw as u64 + dh as u64
    };
    let mut best: Option<(u64, Size)> = None;
    for size in sizes.iter().filter(|size| size.width % SIZE_WIDTH_ALIGNMENT == 0) {
        let d = distance(size);
        if best.is_none_or(|(best_d, _)| d < best_d) {
            best = Some((d, *size));
        }
    }
    best.map(|(_, size)| size)
}

fn progressive_penalty(value: i64, threshold: i64, low_weight: i64, high_weight: i64) -> i64 {
    if value < threshold {
        value * low_weight
    } else {
        threshold * low_weight + (value - threshold) * high_weight
    }
}

fn fps_range_penalty(range: &FrameRateRange, target: i64) -> i64 {
    use fps_penalty::*;
    let min_error = progressive_penalty(
        range.min,
        MIN_FPS_THRESHOLD,
        MIN_FPS_LOW_VALUE_WEIGHT,
        MIN_FPS_HIGH_VALUE_WEIGHT,
    );
    let max_error = progressive_penalty(
        (target - range.max).abs(),
        MAX_FPS_DIFF_THRESHOLD,
        MAX_FPS_LOW_DIFF_WEIGHT,
        MAX_FPS_HIGH_DIFF_WEIGHT,
    );
    min_error + max_error
}

/// Picks a frame-rate range from the supported ones for a target fps
pub type FrameRateSelector = Arc<dyn Fn(&[FrameRateRange], u32) -> Option<FrameRateRange> + Send + Sync>;

/// Fixed range running at exactly `target_fps`, if the camera has one
pub fn exact_frame_rate_range(ranges: &[FrameRateRange], target_fps: u32) -> Option<FrameRateRange> {
    let target = target_fps as i64 * 1000;
    ranges
        .iter()
        .find(|range| range.min == target && range.max == target)
        .copied()
}

/// Range closest to `target_fps` (whole fps)
///
/// Prefers a low lower bound so the camera can slow down in low light,
/// and an upper bound near the target.
pub fn closest_frame_rate_range(ranges: &[FrameRateRange], target_fps: u32) -> Option<FrameRateRange> {
    let target = target_fps as i64 * 1000;
    ranges
        .iter()
        .min_by_key(|range| fps_range_penalty(range, target))
        .copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_closest_size_skips_unaligned_widths() {
        let sizes = [Size::new(1920, 1080), Size::new(1270, 720), Size::new(1280, 720)];
        assert_eq!(closest_size(&sizes, 1270, 720), Some(Size::new(1280, 720)));
        assert_eq!(closest_size(&[Size::new(100, 100)], 100, 100), None);
    }

    #[test]
    fn test_closest_size_zero_request_ignores_axis() {
        let sizes = [Size::new(640, 480), Size::new(640, 360), Size::new(1280, 720)];
        assert_eq!(closest_size(&sizes, 640, 0), Some(Size::new(640, 480)));
        assert_eq!(closest_size(&sizes, 0, 720), Some(Size::new(1280, 720)));
    }

    #[test]
    fn test_fps_range_prefers_low_minimum() {
        let ranges = [
            FrameRateRange::from_fps(30, 30),
            FrameRateRange::from_fps(7, 30),
            FrameRateRange::from_fps(15, 15),
        ];
        assert_eq!(closest_frame_rate_range(&ranges, 30), Some(FrameRateRange::from_fps(7, 30)));
        assert_eq!(closest_frame_rate_range(&[], 30), None);
    }

    #[test]
    fn test_exact_range_needs_fixed_rate() {
        let ranges = [FrameRateRange::from_fps(7, 30), FrameRateRange::from_fps(30, 30)];
        assert_eq!(exact_frame_rate_range(&ranges, 30), Some(FrameRateRange::from_fps(30, 30)));
        assert_eq!(exact_frame_rate_range(&ranges, 15), None);
    }

    #[test]
    fn test_parameter_kinds() {
        assert!(CameraParameter::Zoom(1.0).same_kind(&CameraParameter::Zoom(2.0)));
        assert!(!CameraParameter::Zoom(1.0).same_kind(&CameraParameter::Torch(true)));
    }
}
