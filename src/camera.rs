// SPDX-License-Identifier: GPL-3.0-only

//! Application-facing camera API
//!
//! [`CameraVideoManager`] is built once by the application and passed to
//! whatever needs the camera. It owns a [`ChannelManager`] and the camera
//! channel; there is no process-wide instance.
//!
//! ```ignore
//! let manager = CameraVideoManager::new(config, GpuBackend::software(), Box::new(SyntheticCamera::new()))?;
//! let preview = manager.set_local_preview(window, ScaleType::CenterCrop, Some("preview"))?;
//! manager.camera()?.start_capture()?;
//! ```

use crate::backends::camera::{
    CameraCapture, CameraDevice, CameraParameter, CameraState, CameraStateListener, FrameRateSelector,
    capture::CaptureTimeouts,
};
use crate::config::PipelineConfig;
use crate::constants::{CameraFacing, MirrorMode};
use crate::consumers::{CaptureFrameConsumer, ConsumerKind, FrameCallbackConsumer, WindowConsumer, WindowHandle};
use crate::errors::{CaptureError, PipelineResult};
use crate::frame::Rotation;
use crate::gpu::{GpuBackend, NativeWindow};
use crate::matrix::ScaleType;
use crate::pipeline::{ChannelId, ChannelManager, ConsumerKey, ErrorCallback, VideoChannel, VideoProducer};
use crate::processors::{Preprocessor, WatermarkConfig, WatermarkHandle};
use image::RgbaImage;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{info, warn};

/// The camera channel and the capture feeding it
pub struct CameraChannel {
    channel: VideoChannel,
    capture: CameraCapture,
}

impl CameraChannel {
    pub fn new(channel: VideoChannel, device: Box<dyn CameraDevice>, config: &PipelineConfig) -> PipelineResult<Self> {
        let capture = CameraCapture::new(device, VideoProducer::new(), CaptureTimeouts::from(config))?;
        capture.set_facing(config.capture.facing);
        capture.set_picture_size(config.capture.width, config.capture.height);
        capture.set_ideal_frame_rate(config.capture.frame_rate);
        Ok(Self { channel, capture })
    }

    pub fn channel(&self) -> &VideoChannel {
        &self.channel
    }

    pub fn capture(&self) -> &CameraCapture {
        &self.capture
    }

    pub fn state(&self) -> CameraState {
        self.capture.state()
    }

    pub fn facing(&self) -> CameraFacing {
        self.capture.facing()
    }

    /// Attach the capture to the channel and open the camera
    pub fn start_capture(&self) -> PipelineResult<()> {
        self.channel.start()?;
        self.channel.connect_producer(self.capture.producer())?;
        self.capture.start_capture()?;
        Ok(())
    }

    /// Stop the camera; returns once no more frames will be delivered
    pub fn stop_capture(&self) -> PipelineResult<()> {
        self.capture.stop_capture_and_block_until_stopped()?;
        Ok(())
    }

    /// Reopen with the other camera; returns the new facing
    pub fn switch_camera(&self) -> PipelineResult<CameraFacing> {
        let facing = self.capture.facing().toggled();
        let was_running = self.capture.state() != CameraState::Stopped;
        self.capture.stop_capture_and_block_until_stopped()?;
        self.capture.set_facing(facing);
        info!(facing = %facing, "Switching camera");
        if was_running {
            self.start_capture()?;
        }
        Ok(facing)
    }

    pub fn set_facing(&self, facing: CameraFacing) {
        self.capture.set_facing(facing);
    }

    pub fn set_picture_size(&self, width: u32, height: u32) {
        self.capture.set_picture_size(width, height);
    }

    pub fn set_ideal_frame_rate(&self, frame_rate: u32) {
        self.capture.set_ideal_frame_rate(frame_rate);
    }

    /// Custom frame-rate range choice, applied at the next allocation
    pub fn set_frame_rate_selector(&self, selector: Option<FrameRateSelector>) {
        self.capture.set_frame_rate_selector(selector);
    }

    pub fn enable_exact_frame_range(&self, enabled: bool) {
        self.capture.enable_exact_frame_range(enabled);
    }

    /// Register the listener for capture events and channel errors
    pub fn set_camera_state_listener(&self, listener: Option<Arc<dyn CameraStateListener>>) {
        let errors = listener.clone().map(|listener| {
            let callback: ErrorCallback = Arc::new(move |code, message: &str| {
                listener.on_camera_capture_error(code, message);
            });
            callback
        });
        self.channel.set_error_listener(errors);
        self.capture.set_listener(listener);
    }

    pub fn set_zoom(&self, zoom: f32) -> PipelineResult<()> {
        Ok(self.capture.set_zoom(zoom)?)
    }

    pub fn zoom(&self) -> f32 {
        self.capture.zoom()
    }

    pub fn is_zoom_supported(&self) -> bool {
        self.capture.is_zoom_supported()
    }

    pub fn max_zoom(&self) -> f32 {
        self.capture.max_zoom()
    }

    pub fn set_torch(&self, enabled: bool) -> PipelineResult<()> {
        Ok(self.capture.set_torch(enabled)?)
    }

    pub fn torch_supported(&self) -> bool {
        self.capture.torch_supported()
    }

    pub fn set_exposure(&self, exposure: i32) -> PipelineResult<()> {
        Ok(self.capture.set_exposure(exposure)?)
    }

    pub fn exposure(&self) -> i32 {
        self.capture.exposure()
    }

    pub fn exposure_range(&self) -> (i32, i32) {
        (self.capture.min_exposure(), self.capture.max_exposure())
    }

    /// Parameters set before the session started, awaiting replay
    pub fn pending_parameters(&self) -> Vec<CameraParameter> {
        self.capture.queued_parameters()
    }

    fn release(&self) {
        if let Err(e) = self.capture.stop_capture_and_block_until_stopped() {
            warn!(error = %e, "Camera did not stop cleanly during release");
        }
        self.channel.disconnect_producer();
    }
}

struct ManagerInner {
    channels: ChannelManager,
    camera: Arc<CameraChannel>,
    preview: Mutex<Option<ConsumerKey>>,
}

/// Entry point owning the camera, its channel and their consumers
pub struct CameraVideoManager {
    config: PipelineConfig,
    inner: Mutex<Option<Arc<ManagerInner>>>,
}

impl CameraVideoManager {
    /// Start the camera channel and wrap `device`; the camera stays closed
    /// until `start_capture`
    pub fn new(config: PipelineConfig, backend: GpuBackend, device: Box<dyn CameraDevice>) -> PipelineResult<Self> {
        config.validate()?;
        let channels = ChannelManager::new(backend);
        let channel = channels.ensure_channel_running(ChannelId::Camera)?;
        channel.enable_offscreen_mode(config.offscreen_mode);
        channel.set_on_screen_consumer_mirror(config.mirror_mode);
        let camera = Arc::new(CameraChannel::new(channel, device, &config)?);

        info!(backend = %backend.kind(), facing = %config.capture.facing, "Camera manager created");
        Ok(Self {
            config,
            inner: Mutex::new(Some(Arc::new(ManagerInner {
                channels,
                camera,
                preview: Mutex::new(None),
            }))),
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    fn inner(&self) -> PipelineResult<Arc<ManagerInner>> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(CaptureError::Released.into())
    }

    fn camera_channel(&self) -> PipelineResult<VideoChannel> {
        Ok(self.inner()?.camera.channel().clone())
    }

    pub fn is_released(&self) -> bool {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).is_none()
    }

    pub fn camera(&self) -> PipelineResult<Arc<CameraChannel>> {
        Ok(Arc::clone(&self.inner()?.camera))
    }

    /// Any channel of the manager, created on first use
    pub fn channel(&self, id: ChannelId) -> PipelineResult<VideoChannel> {
        Ok(self.inner()?.channels.channel(id))
    }

    /// Show the camera in `window`, replacing the current preview
    pub fn set_local_preview(
        &self,
        window: Arc<dyn NativeWindow>,
        scale_type: ScaleType,
        id: Option<&str>,
    ) -> PipelineResult<WindowHandle> {
        let inner = self.inner()?;
        let channel = inner.camera.channel();
        let mut consumer = WindowConsumer::new(window, scale_type);
        if let Some(id) = id {
            consumer = consumer.with_id(id);
        }
        let handle = consumer.handle();
        let key = channel.connect_consumer(Box::new(consumer), ConsumerKind::OnScreen)?;

        let previous = inner
            .preview
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(key);
        if let Some(previous) = previous {
            channel.disconnect_consumer(previous)?;
        }
        Ok(handle)
    }

    /// Remove the preview window, if any
    pub fn remove_local_preview(&self) -> PipelineResult<()> {
        let inner = self.inner()?;
        let key = inner.preview.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(key) = key {
            inner.camera.channel().disconnect_consumer(key)?;
        }
        Ok(())
    }

    /// Feed every composited frame to `consumer`
    pub fn attach_off_screen_consumer(&self, consumer: Arc<dyn CaptureFrameConsumer>) -> PipelineResult<ConsumerKey> {
        let channel = self.camera_channel()?;
        Ok(channel.connect_consumer(Box::new(FrameCallbackConsumer::new(consumer)), ConsumerKind::OffScreen)?)
    }

    pub fn detach_off_screen_consumer(&self, key: ConsumerKey) -> PipelineResult<()> {
        Ok(self.camera_channel()?.disconnect_consumer(key)?)
    }

    pub fn is_zoom_supported(&self) -> PipelineResult<bool> {
        Ok(self.inner()?.camera.is_zoom_supported())
    }

    pub fn set_frame_rate_selector(&self, selector: Option<FrameRateSelector>) -> PipelineResult<()> {
        self.inner()?.camera.set_frame_rate_selector(selector);
        Ok(())
    }

    pub fn enable_exact_frame_range(&self, enabled: bool) -> PipelineResult<()> {
        self.inner()?.camera.enable_exact_frame_range(enabled);
        Ok(())
    }

    /// Handle to the camera channel's watermark, set or not
    pub fn watermark(&self) -> PipelineResult<WatermarkHandle> {
        Ok(self.camera_channel()?.watermark())
    }

    pub fn set_watermark(&self, bitmap: &RgbaImage, config: WatermarkConfig) -> PipelineResult<WatermarkHandle> {
        Ok(self.camera_channel()?.set_watermark(bitmap, config))
    }

    pub fn set_watermark_alpha(&self, alpha: f32) -> PipelineResult<()> {
        self.camera_channel()?.set_watermark_alpha(alpha);
        Ok(())
    }

    pub fn watermark_alpha(&self) -> PipelineResult<f32> {
        Ok(self.camera_channel()?.watermark_alpha())
    }

    pub fn clean_watermark(&self) -> PipelineResult<()> {
        self.camera_channel()?.clean_watermark();
        Ok(())
    }

    pub fn set_local_preview_mirror(&self, mode: MirrorMode) -> PipelineResult<()> {
        self.camera_channel()?.set_on_screen_consumer_mirror(mode);
        Ok(())
    }

    pub fn set_display_rotation(&self, rotation: Rotation) -> PipelineResult<()> {
        self.camera_channel()?.set_display_rotation(rotation);
        Ok(())
    }

    pub fn set_preprocessor(&self, preprocessor: Option<Box<dyn Preprocessor>>) -> PipelineResult<()> {
        Ok(self.camera_channel()?.set_preprocessor(preprocessor)?)
    }

    pub fn has_preprocessor(&self) -> PipelineResult<bool> {
        Ok(self.inner()?.channels.has_preprocessor(ChannelId::Camera))
    }

    pub fn enable_pre_process(&self, enabled: bool) -> PipelineResult<()> {
        Ok(self.camera_channel()?.enable_pre_process(enabled)?)
    }

    /// Stop the camera and every channel; later calls fail with `Released`
    pub fn release(&self) -> PipelineResult<()> {
        let inner = self
            .inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or(CaptureError::Released)?;
        info!("Releasing camera manager");
        inner.camera.release();
        inner.channels.stop_all();
        Ok(())
    }
}

impl Drop for CameraVideoManager {
    fn drop(&mut self) {
        if !self.is_released()
            && let Err(e) = self.release()
        {
            warn!(error = %e, "Camera manager did not release cleanly on drop");
        }
    }
}
