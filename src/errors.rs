// SPDX-License-Identifier: MPL-2.0

//! Error types for the capture pipeline
//!
//! Synchronous misuse (a stopped channel, a released manager) is returned as
//! `Err` to the caller. Failures that happen on background threads are
//! reported through [`CameraStateListener`](crate::backends::camera::CameraStateListener)
//! with a [`CaptureErrorCode`].

use crate::backends::camera::types::{CameraState, DeviceErrorKind};
use crate::pipeline::ChannelId;
use std::fmt;

/// Result type alias using PipelineError
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Result type for GPU device calls
pub type GpuResult<T> = Result<T, GpuError>;

/// Result type for channel operations
pub type ChannelResult<T> = Result<T, ChannelError>;

/// Result type for camera capture operations
pub type CaptureResult<T> = Result<T, CaptureError>;

/// Top level error type
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineError {
    /// GPU device or context errors
    Gpu(GpuError),
    /// Channel lifecycle errors
    Channel(ChannelError),
    /// Camera capture errors
    Capture(CaptureError),
    /// Configuration errors
    Config(String),
    /// Filesystem errors
    Io(String),
    /// Generic error with message
    Other(String),
}

/// GPU device errors
///
/// These mirror what a GL driver reports from `glGetError`/`eglGetError`.
/// None of them are recoverable within the same context.
#[derive(Debug, Clone, PartialEq)]
pub enum GpuError {
    /// No adapter or context could be created
    DeviceUnavailable(String),
    /// A texture, framebuffer or surface handle does not exist
    InvalidHandle(String),
    /// A presentable surface could not be created for a window
    SurfaceCreation(String),
    /// A draw was issued with no current surface
    NoCurrentSurface,
    /// Allocation failed
    OutOfMemory,
    /// Backend specific failure
    Backend(String),
}

/// Channel lifecycle errors
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelError {
    /// The channel thread is not running
    NotRunning(ChannelId),
    /// A producer is already attached to this channel
    ProducerAlreadyConnected(ChannelId),
    /// The channel thread failed to come up
    ThreadStart(String),
    /// The channel thread went away while a call was waiting on it
    Disconnected,
}

/// Camera capture errors
#[derive(Debug, Clone, PartialEq)]
pub enum CaptureError {
    /// Operation not valid in the current capture state
    InvalidState {
        expected: CameraState,
        actual: CameraState,
    },
    /// The device reports no size close to the requested one
    NoMatchingResolution { width: u32, height: u32 },
    /// The device reports no usable frame-rate range
    NoFrameRateRange,
    /// The device reported a failure
    Device(DeviceErrorKind),
    /// Capture has not been started yet
    NotStarted,
    /// Stop did not complete before the timeout
    StopTimeout,
    /// The manager has been released
    Released,
}

/// Error codes delivered through `on_camera_capture_error`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CaptureErrorCode {
    Unknown,
    InUse,
    CannotOpenMore,
    CameraDisabled,
    CameraDevice,
    CameraService,
    CameraDisconnected,
    CameraFreezed,
    Allocate,
    GpuContext,
}

impl CaptureErrorCode {
    /// Stable numeric code
    pub fn code(&self) -> i32 {
        match self {
            CaptureErrorCode::Unknown => 0,
            CaptureErrorCode::InUse => 1,
            CaptureErrorCode::CannotOpenMore => 2,
            CaptureErrorCode::CameraDisabled => 3,
            CaptureErrorCode::CameraDevice => 4,
            CaptureErrorCode::CameraService => 5,
            CaptureErrorCode::CameraDisconnected => 6,
            CaptureErrorCode::CameraFreezed => 7,
            CaptureErrorCode::Allocate => 8,
            CaptureErrorCode::GpuContext => 9,
        }
    }

    /// Map a device-reported failure to the listener code
    pub fn from_device_error(kind: DeviceErrorKind) -> Self {
        match kind {
            DeviceErrorKind::InUse => CaptureErrorCode::InUse,
            DeviceErrorKind::MaxCamerasInUse => CaptureErrorCode::CannotOpenMore,
            DeviceErrorKind::Disabled => CaptureErrorCode::CameraDisabled,
            DeviceErrorKind::Device => CaptureErrorCode::CameraDevice,
            DeviceErrorKind::Service => CaptureErrorCode::CameraService,
            DeviceErrorKind::Disconnected => CaptureErrorCode::CameraDisconnected,
            DeviceErrorKind::Other(_) => CaptureErrorCode::Unknown,
        }
    }
}

impl fmt::Display for CaptureErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CaptureErrorCode::Unknown => "unknown",
            CaptureErrorCode::InUse => "camera in use",
            CaptureErrorCode::CannotOpenMore => "cannot open more cameras",
            CaptureErrorCode::CameraDisabled => "camera disabled",
            CaptureErrorCode::CameraDevice => "camera device error",
            CaptureErrorCode::CameraService => "camera service error",
            CaptureErrorCode::CameraDisconnected => "camera disconnected",
            CaptureErrorCode::CameraFreezed => "camera frozen",
            CaptureErrorCode::Allocate => "allocation failed",
            CaptureErrorCode::GpuContext => "gpu context error",
        };
        write!(f, "{} ({})", name, self.code())
    }
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineError::Gpu(e) => write!(f, "GPU error: {}", e),
            PipelineError::Channel(e) => write!(f, "Channel error: {}", e),
            PipelineError::Capture(e) => write!(f, "Capture error: {}", e),
            PipelineError::Config(msg) => write!(f, "Configuration error: {}", msg),
            PipelineError::Io(msg) => write!(f, "I/O error: {}", msg),
            PipelineError::Other(msg) => write!(f, "{}", msg),
        }
    }
}

impl fmt::Display for GpuError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GpuError::DeviceUnavailable(msg) => write!(f, "GPU device unavailable: {}", msg),
            GpuError::InvalidHandle(msg) => write!(f, "Invalid handle: {}", msg),
            GpuError::SurfaceCreation(msg) => write!(f, "Surface creation failed: {}", msg),
            GpuError::NoCurrentSurface => write!(f, "No current surface"),
            GpuError::OutOfMemory => write!(f, "Out of GPU memory"),
            GpuError::Backend(msg) => write!(f, "Backend error: {}", msg),
        }
    }
}

impl fmt::Display for ChannelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelError::NotRunning(id) => write!(f, "Channel {} is not running", id),
            ChannelError::ProducerAlreadyConnected(id) => {
                write!(f, "Channel {} already has a producer", id)
            }
            ChannelError::ThreadStart(msg) => write!(f, "Channel thread failed to start: {}", msg),
            ChannelError::Disconnected => write!(f, "Channel thread is gone"),
        }
    }
}

impl fmt::Display for CaptureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaptureError::InvalidState { expected, actual } => {
                write!(f, "Invalid capture state {:?}, expected {:?}", actual, expected)
            }
            CaptureError::NoMatchingResolution { width, height } => {
                write!(f, "No resolution close to {}x{}", width, height)
            }
            CaptureError::NoFrameRateRange => write!(f, "No frame rate range available"),
            CaptureError::Device(kind) => write!(f, "Device error: {}", kind),
            CaptureError::NotStarted => write!(f, "Capture not started"),
            CaptureError::StopTimeout => write!(f, "Timed out waiting for capture to stop"),
            CaptureError::Released => write!(f, "Camera manager has been released"),
        }
    }
}

impl std::error::Error for PipelineError {}
impl std::error::Error for GpuError {}
impl std::error::Error for ChannelError {}
impl std::error::Error for CaptureError {}

impl From<GpuError> for PipelineError {
    fn from(err: GpuError) -> Self {
        PipelineError::Gpu(err)
    }
}

impl From<ChannelError> for PipelineError {
    fn from(err: ChannelError) -> Self {
        PipelineError::Channel(err)
    }
}

impl From<CaptureError> for PipelineError {
    fn from(err: CaptureError) -> Self {
        PipelineError::Capture(err)
    }
}

impl From<String> for PipelineError {
    fn from(msg: String) -> Self {
        PipelineError::Other(msg)
    }
}

impl From<&str> for PipelineError {
    fn from(msg: &str) -> Self {
        PipelineError::Other(msg.to_string())
    }
}

impl From<std::io::Error> for PipelineError {
    fn from(err: std::io::Error) -> Self {
        PipelineError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for PipelineError {
    fn from(err: serde_json::Error) -> Self {
        PipelineError::Config(err.to_string())
    }
}

impl From<image::ImageError> for PipelineError {
    fn from(err: image::ImageError) -> Self {
        PipelineError::Io(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_are_stable() {
        let codes = [
            CaptureErrorCode::Unknown,
            CaptureErrorCode::InUse,
            CaptureErrorCode::CannotOpenMore,
            CaptureErrorCode::CameraDisabled,
            CaptureErrorCode::CameraDevice,
            CaptureErrorCode::CameraService,
            CaptureErrorCode::CameraDisconnected,
            CaptureErrorCode::CameraFreezed,
            CaptureErrorCode::Allocate,
            CaptureErrorCode::GpuContext,
        ];
        for (expected, code) in codes.iter().enumerate() {
            assert_eq!(code.code(), expected as i32);
        }
    }

    #[test]
    fn test_device_error_mapping() {
        assert_eq!(
            CaptureErrorCode::from_device_error(DeviceErrorKind::Disconnected),
            CaptureErrorCode::CameraDisconnected
        );
        assert_eq!(
            CaptureErrorCode::from_device_error(DeviceErrorKind::Other("x".into())),
            CaptureErrorCode::Unknown
        );
    }

    #[test]
    fn test_nested_display() {
        let err: PipelineError = ChannelError::NotRunning(ChannelId::Camera).into();
        assert!(err.to_string().contains("camera_channel"));
    }
}
