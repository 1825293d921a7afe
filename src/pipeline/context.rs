// SPDX-License-Identifier: GPL-3.0-only

//! GPU environment owned by a channel thread

use super::ChannelId;
use crate::errors::{CaptureErrorCode, GpuResult};
use crate::frame::Rotation;
use crate::gpu::{GpuBackend, GpuDevice, SurfaceId};
use crate::shaders::ProgramSet;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, error, info};

/// Receives asynchronous pipeline errors
pub type ErrorCallback = Arc<dyn Fn(CaptureErrorCode, &str) + Send + Sync>;

/// Error callback slot shared between a channel handle and its thread
pub(crate) type SharedErrorCallback = Arc<Mutex<Option<ErrorCallback>>>;

/// Everything a stage needs to touch the channel's GPU state
///
/// Only the channel thread ever holds a `ChannelContext`. Between stages the
/// 1×1 dummy surface is made current again so no stage inherits a surface
/// left current by the previous one.
pub struct ChannelContext {
    pub device: Box<dyn GpuDevice>,
    pub programs: ProgramSet,
    dummy_surface: SurfaceId,
    channel_id: ChannelId,
    display_rotation: Rotation,
    error_callback: SharedErrorCallback,
}

impl ChannelContext {
    /// Create the device on the calling thread and make the dummy surface current
    pub fn new(channel_id: ChannelId, backend: GpuBackend) -> GpuResult<Self> {
        let device = backend.create_device(channel_id.name())?;
        Self::with_device(channel_id, device)
    }

    /// Wrap an already created device
    pub fn with_device(channel_id: ChannelId, mut device: Box<dyn GpuDevice>) -> GpuResult<Self> {
        let dummy_surface = device.create_offscreen_surface(1, 1)?;
        device.make_current(dummy_surface)?;
        info!(
            channel = %channel_id,
            adapter = %device.info().adapter_name,
            "Channel GPU context ready"
        );
        Ok(Self {
            device,
            programs: ProgramSet::new(),
            dummy_surface,
            channel_id,
            display_rotation: Rotation::None,
            error_callback: Arc::new(Mutex::new(None)),
        })
    }

    pub(crate) fn set_error_slot(&mut self, slot: SharedErrorCallback) {
        self.error_callback = slot;
    }

    pub fn device(&mut self) -> &mut dyn GpuDevice {
        self.device.as_mut()
    }

    pub fn channel_id(&self) -> ChannelId {
        self.channel_id
    }

    pub fn dummy_surface(&self) -> SurfaceId {
        self.dummy_surface
    }

    /// Rotation of the display the output is shown on
    pub fn display_rotation(&self) -> Rotation {
        self.display_rotation
    }

    pub fn set_display_rotation(&mut self, rotation: Rotation) {
        if self.display_rotation != rotation {
            debug!(channel = %self.channel_id, %rotation, "Display rotation changed");
            self.display_rotation = rotation;
        }
    }

    /// Restore the dummy surface as current and unbind any framebuffer
    pub fn make_dummy_current(&mut self) {
        self.device.bind_framebuffer(None);
        if let Err(e) = self.device.make_current(self.dummy_surface) {
            error!(channel = %self.channel_id, error = %e, "Failed to restore dummy surface");
            self.report_error(CaptureErrorCode::GpuContext, &e.to_string());
        }
    }

    /// Forward an asynchronous error to the registered callback
    pub fn report_error(&self, code: CaptureErrorCode, message: &str) {
        let callback = self
            .error_callback
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        match callback {
            Some(callback) => callback(code, message),
            None => debug!(channel = %self.channel_id, %code, message, "No error listener"),
        }
    }

    /// Tear down the context; everything created from it must be released first
    pub fn release(mut self) {
        info!(channel = %self.channel_id, "Releasing channel GPU context");
        self.device.make_nothing_current();
        self.device.release_surface(self.dummy_surface);
        self.device.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::software::SoftwareDevice;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_dummy_surface_is_current() {
        let ctx = ChannelContext::with_device(ChannelId::Camera, Box::new(SoftwareDevice::new("t"))).unwrap();
        assert_eq!(ctx.device.current_surface(), Some(ctx.dummy_surface()));
    }

    #[test]
    fn test_report_error_reaches_callback() {
        let mut ctx = ChannelContext::with_device(ChannelId::Custom, Box::new(SoftwareDevice::new("t"))).unwrap();
        let hits = Arc::new(AtomicU32::new(0));
        let hits_clone = Arc::clone(&hits);
        let callback: ErrorCallback = Arc::new(move |code, _| {
            assert_eq!(code, CaptureErrorCode::GpuContext);
            hits_clone.fetch_add(1, Ordering::SeqCst);
        });
        ctx.set_error_slot(Arc::new(Mutex::new(Some(callback))));
        ctx.report_error(CaptureErrorCode::GpuContext, "lost");
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
