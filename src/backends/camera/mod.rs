// SPDX-License-Identifier: GPL-3.0-only

//! Camera capture backend
//!
//! ```text
//! ┌─────────────────────┐
//! │   CameraChannel     │  ← facade used by the application
//! └──────────┬──────────┘
//!            │
//!            ▼
//! ┌─────────────────────┐
//! │   CameraCapture     │  ← state machine, parameter queue, fps monitor
//! └──────────┬──────────┘
//!            │ CameraEventSink
//!            ▼
//! ┌─────────────────────┐
//! │ CameraDevice trait  │  ← platform driver (SyntheticCamera in-tree)
//! └─────────────────────┘
//! ```
//!
//! Devices report everything asynchronously through a [`CameraEventSink`].
//! Lifecycle events are queued to the capture's event thread; frames are
//! pushed straight into the producer mailbox from the device's thread.

pub mod capture;
pub mod fps_monitor;
pub mod synthetic;
pub mod types;

pub use capture::CameraCapture;
pub use fps_monitor::FpsMonitor;
pub use synthetic::{SyntheticCamera, SyntheticControl};
pub use types::*;

use crate::constants::CameraFacing;
use crate::errors::CaptureErrorCode;
use std::sync::Weak;

/// Platform camera driver
///
/// `open` must return promptly; the device then reports `opened`,
/// `configured` (or `configure_failed`) and frames through `events`.
/// `close` must eventually report `closed`, also when the device never
/// finished opening.
pub trait CameraDevice: Send {
    /// Sizes, frame-rate ranges and controls offered by the camera facing `facing`
    fn capabilities(&self, facing: CameraFacing) -> Result<DeviceCapabilities, DeviceErrorKind>;

    fn open(&mut self, request: &CaptureRequest, events: CameraEventSink) -> Result<(), DeviceErrorKind>;

    fn close(&mut self);

    /// Apply a parameter to the running session
    fn apply_parameter(&mut self, parameter: CameraParameter) -> Result<(), DeviceErrorKind>;
}

/// Asynchronous device notification
#[derive(Debug, Clone, PartialEq)]
pub enum CameraEvent {
    Opened,
    Configured,
    ConfigureFailed(String),
    Disconnected,
    Error(DeviceErrorKind),
    Closed,
}

/// Receiver side of device notifications, implemented by the capture
pub(crate) trait CaptureEventHandler: Send + Sync {
    fn on_event(&self, session: u64, event: CameraEvent);
    fn on_frame(&self, session: u64, frame: CapturedFrame);
}

/// Handle a device uses to report events for one open session
///
/// Events from a session that has since been closed are ignored, so a
/// device may keep a stale sink around without confusing the state machine.
#[derive(Clone)]
pub struct CameraEventSink {
    session: u64,
    handler: Weak<dyn CaptureEventHandler>,
}

impl CameraEventSink {
    pub(crate) fn new(session: u64, handler: Weak<dyn CaptureEventHandler>) -> Self {
        Self { session, handler }
    }

    fn send(&self, event: CameraEvent) {
        if let Some(handler) = self.handler.upgrade() {
            handler.on_event(self.session, event);
        }
    }

    pub fn opened(&self) {
        self.send(CameraEvent::Opened);
    }

    pub fn configured(&self) {
        self.send(CameraEvent::Configured);
    }

    pub fn configure_failed(&self, reason: &str) {
        self.send(CameraEvent::ConfigureFailed(reason.to_string()));
    }

    pub fn disconnected(&self) {
        self.send(CameraEvent::Disconnected);
    }

    pub fn error(&self, kind: DeviceErrorKind) {
        self.send(CameraEvent::Error(kind));
    }

    pub fn closed(&self) {
        self.send(CameraEvent::Closed);
    }

    /// Deliver one captured image
    pub fn frame(&self, frame: CapturedFrame) {
        if let Some(handler) = self.handler.upgrade() {
            handler.on_frame(self.session, frame);
        }
    }

    /// Whether the capture that issued this sink still exists
    pub fn is_alive(&self) -> bool {
        self.handler.strong_count() > 0
    }
}

/// Capture lifecycle notifications
///
/// Called from the capture's event thread or the device's frame thread,
/// never with internal locks held.
pub trait CameraStateListener: Send + Sync {
    fn on_first_captured_frame(&self, _width: u32, _height: u32) {}

    fn on_camera_capture_error(&self, _code: CaptureErrorCode, _message: &str) {}

    fn on_camera_open(&self) {}

    fn on_camera_closed(&self) {}
}
