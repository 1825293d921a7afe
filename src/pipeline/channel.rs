// SPDX-License-Identifier: GPL-3.0-only

//! Video channel thread and its handle
//!
//! [`VideoChannel`] is the handle any thread may hold. [`ChannelRuntime`]
//! is the state that lives on the channel thread; it owns the GPU context
//! and everything created from it. Calls on the handle are posted to the
//! runtime, so GPU state is only ever touched from the channel thread.
//!
//! Channel state machine:
//!
//! ```text
//!  not started ──start()──► running ──stop()──► stopped
//!                              ▲                  │
//!                              └─────start()──────┘
//! ```

use super::ChannelId;
use super::context::{ChannelContext, ErrorCallback, SharedErrorCallback};
use super::producer::{FrameMailbox, VideoProducer};
use super::worker::{TaskLoop, TaskSender};
use crate::constants::MirrorMode;
use crate::consumers::{ConsumerEntry, ConsumerKind, VideoConsumer, remove_same_consumers};
use crate::errors::{CaptureErrorCode, ChannelError, ChannelResult, GpuError, GpuResult};
use crate::frame::{Rotation, TextureKind, VideoFrame, flip_t_transform};
use crate::gpu::{GpuBackend, TextureId};
use crate::processors::{
    Preprocessor, PreprocessorSlot, RotateProcessor, WatermarkConfig, WatermarkHandle, WatermarkProcessor,
};
use image::RgbaImage;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tracing::{debug, error, info, trace, warn};

/// Identifies a consumer connection on one channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConsumerKey(u64);

impl ConsumerKey {
    pub fn raw(&self) -> u64 {
        self.0
    }

    pub(crate) fn from_raw(raw: u64) -> Self {
        Self(raw)
    }
}

/// A consumer's way back to the channel it is connected to
///
/// Holds the channel weakly, so a consumer never keeps a channel alive.
#[derive(Clone)]
pub struct ConsumerLink {
    channel: WeakVideoChannel,
    key: ConsumerKey,
    kind: ConsumerKind,
}

impl ConsumerLink {
    pub fn key(&self) -> ConsumerKey {
        self.key
    }

    pub fn kind(&self) -> ConsumerKind {
        self.kind
    }

    /// Ask the channel to remove this consumer
    pub fn disconnect(&self) {
        if let Some(channel) = self.channel.upgrade()
            && let Err(e) = channel.disconnect_consumer(self.key)
        {
            debug!(key = self.key.0, error = %e, "Consumer disconnect skipped");
        }
    }
}

/// Settings that survive a channel restart
#[derive(Debug, Clone, Copy)]
struct ChannelSettings {
    display_rotation: Rotation,
    offscreen_mode: bool,
    mirror_mode: MirrorMode,
}

impl Default for ChannelSettings {
    fn default() -> Self {
        Self {
            display_rotation: Rotation::None,
            offscreen_mode: true,
            mirror_mode: MirrorMode::default(),
        }
    }
}

/// Channel state owned by the channel thread
///
/// Field order is drop order: every consumer and processor goes before the
/// context their GPU objects were created in.
pub struct ChannelRuntime {
    on_screen: Vec<ConsumerEntry>,
    off_screen: Vec<ConsumerEntry>,
    preprocessor: Option<PreprocessorSlot>,
    rotate: RotateProcessor,
    watermark: WatermarkProcessor,
    /// Staging texture for producers that deliver CPU pixels
    upload_texture: Option<TextureId>,
    producer: Arc<Mutex<Option<VideoProducer>>>,
    offscreen_mode: bool,
    mirror_mode: MirrorMode,
    frames_processed: u64,
    ctx: ChannelContext,
}

impl ChannelRuntime {
    fn new(
        ctx: ChannelContext,
        producer: Arc<Mutex<Option<VideoProducer>>>,
        watermark: WatermarkHandle,
        settings: ChannelSettings,
    ) -> Self {
        Self {
            on_screen: Vec::new(),
            off_screen: Vec::new(),
            preprocessor: None,
            rotate: RotateProcessor::new(),
            watermark: WatermarkProcessor::new(watermark),
            upload_texture: None,
            producer,
            offscreen_mode: settings.offscreen_mode,
            mirror_mode: settings.mirror_mode,
            frames_processed: 0,
            ctx,
        }
    }

    pub fn context(&mut self) -> &mut ChannelContext {
        &mut self.ctx
    }

    pub fn channel_id(&self) -> ChannelId {
        self.ctx.channel_id()
    }

    pub fn frames_processed(&self) -> u64 {
        self.frames_processed
    }

    pub fn consumer_count(&self, kind: ConsumerKind) -> usize {
        match kind {
            ConsumerKind::OnScreen => self.on_screen.len(),
            ConsumerKind::OffScreen => self.off_screen.len(),
        }
    }

    pub fn has_preprocessor(&self) -> bool {
        self.preprocessor.is_some()
    }

    pub fn watermark_output_texture(&self) -> Option<TextureId> {
        self.watermark.output_texture()
    }

    /// Texture the rotate stage rendered the last frame into
    pub fn rotate_output_texture(&self) -> Option<TextureId> {
        self.rotate.output_texture(TextureKind::Texture2D)
    }

    /// Drain the producer's mailbox and run the frame through the pipeline
    pub(crate) fn consume_from(&mut self, mailbox: &FrameMailbox) {
        let Some(mut frame) = mailbox.take() else {
            return;
        };
        if let Some(source) = frame.tex_image.take() {
            match source.update_tex_image(self.ctx.device()) {
                Ok(image) => {
                    frame.texture = Some(image.texture);
                    frame.texture_transform = image.transform * frame.texture_transform;
                }
                Err(e) => {
                    error!(channel = %self.channel_id(), error = %e, "Failed to latch frame texture");
                    self.ctx
                        .report_error(CaptureErrorCode::Unknown, &format!("update_tex_image: {}", e));
                    return;
                }
            }
        }
        self.push_video_frame(frame);
    }

    /// Make sure the frame has a texture, uploading CPU pixels if needed
    fn ensure_texture(&mut self, mut frame: VideoFrame) -> GpuResult<VideoFrame> {
        if frame.texture.is_some() {
            return Ok(frame);
        }
        let Some(image) = frame.image.clone() else {
            return Err(GpuError::InvalidHandle("frame has neither texture nor pixels".into()));
        };
        let device = self.ctx.device();
        let texture = match self.upload_texture {
            Some(texture) => texture,
            None => {
                let texture = device.create_texture(image.width(), image.height())?;
                debug!(texture = %texture, "Created upload texture");
                self.upload_texture = Some(texture);
                texture
            }
        };
        device.upload_texture(texture, &image)?;
        frame.texture = Some(texture);
        frame.texture_transform = flip_t_transform() * frame.texture_transform;
        frame.format.texture_kind = TextureKind::Texture2D;
        Ok(frame)
    }

    /// Run one frame through preprocess, rotate and watermark, then fan it out
    pub fn push_video_frame(&mut self, frame: VideoFrame) {
        let channel = self.channel_id();
        let mut frame = match self.ensure_texture(frame) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(channel = %channel, error = %e, "Dropping frame without image data");
                self.ctx.report_error(CaptureErrorCode::Unknown, &e.to_string());
                return;
            }
        };

        if let Some(slot) = self.preprocessor.as_mut() {
            match slot.process(frame, &mut self.ctx) {
                Ok(processed) => {
                    self.ctx.make_dummy_current();
                    frame = match self.ensure_texture(processed) {
                        Ok(frame) => frame,
                        Err(e) => {
                            warn!(channel = %channel, error = %e, "Preprocessor returned an empty frame");
                            return;
                        }
                    };
                }
                Err((e, unprocessed)) => {
                    // the frame continues to rotate untouched
                    error!(channel = %channel, error = %e, "Preprocessor init failed, disabling it");
                    slot.processor_mut().enable_pre_process(false);
                    self.ctx.make_dummy_current();
                    self.ctx.report_error(CaptureErrorCode::GpuContext, &e.to_string());
                    frame = unprocessed;
                }
            }
        }

        let frame = match self.rotate.process(frame, &mut self.ctx) {
            Ok(frame) => frame,
            Err(e) => {
                error!(channel = %channel, error = %e, "Rotate stage failed");
                self.ctx.make_dummy_current();
                self.ctx.report_error(CaptureErrorCode::GpuContext, &e.to_string());
                return;
            }
        };
        self.ctx.make_dummy_current();

        let frame = match self.watermark.process(frame, &mut self.ctx) {
            Ok(frame) => frame,
            Err(e) => {
                error!(channel = %channel, error = %e, "Watermark stage failed");
                self.ctx.make_dummy_current();
                self.ctx.report_error(CaptureErrorCode::GpuContext, &e.to_string());
                return;
            }
        };
        self.ctx.make_dummy_current();

        for entry in self.on_screen.iter_mut() {
            entry.consumer.on_consume_frame(&frame, &mut self.ctx);
            self.ctx.make_dummy_current();
        }

        if !self.off_screen.is_empty() && (!self.on_screen.is_empty() || self.offscreen_mode) {
            for entry in self.off_screen.iter_mut() {
                entry.consumer.on_consume_frame(&frame, &mut self.ctx);
                self.ctx.make_dummy_current();
            }
        }

        self.frames_processed += 1;
        trace!(
            channel = %channel,
            frame = self.frames_processed,
            width = frame.format.width,
            height = frame.format.height,
            "Frame dispatched"
        );
    }

    fn add_consumer(&mut self, key: ConsumerKey, mut consumer: Box<dyn VideoConsumer>, kind: ConsumerKind) {
        let list = match kind {
            ConsumerKind::OnScreen => {
                consumer.set_mirror_mode(self.mirror_mode);
                &mut self.on_screen
            }
            ConsumerKind::OffScreen => &mut self.off_screen,
        };
        let replaced = remove_same_consumers(list, consumer.as_ref(), &mut self.ctx);
        list.push(ConsumerEntry { key, consumer });
        self.ctx.make_dummy_current();
        info!(
            channel = %self.ctx.channel_id(),
            key = key.0,
            %kind,
            replaced,
            "Consumer connected"
        );
    }

    fn remove_consumer(&mut self, key: ConsumerKey) -> bool {
        let mut found = false;
        for list in [&mut self.on_screen, &mut self.off_screen] {
            if let Some(pos) = list.iter().position(|entry| entry.key == key) {
                let mut entry = list.remove(pos);
                entry.consumer.recycle(&mut self.ctx);
                entry.consumer.on_disconnected();
                found = true;
                break;
            }
        }
        if found {
            info!(channel = %self.ctx.channel_id(), key = key.0, "Consumer disconnected");
        }
        if self.on_screen.is_empty() && self.off_screen.is_empty() {
            self.ctx.make_dummy_current();
        }
        found
    }

    fn set_preprocessor(&mut self, preprocessor: Option<Box<dyn Preprocessor>>) {
        if let Some(old) = self.preprocessor.take() {
            debug!(channel = %self.ctx.channel_id(), "Releasing previous preprocessor");
            old.release(&mut self.ctx);
            self.ctx.make_dummy_current();
        }
        self.preprocessor = preprocessor.map(PreprocessorSlot::new);
    }

    fn enable_pre_process(&mut self, enabled: bool) {
        if let Some(slot) = self.preprocessor.as_mut() {
            slot.processor_mut().enable_pre_process(enabled);
        }
    }

    fn set_mirror_mode(&mut self, mode: MirrorMode) {
        self.mirror_mode = mode;
        for entry in self.on_screen.iter_mut() {
            entry.consumer.set_mirror_mode(mode);
        }
    }

    /// Free the watermark's GPU objects once the overlay is gone
    fn sync_watermark(&mut self) {
        if !self.watermark.handle().has_watermark() {
            self.watermark.release(&mut self.ctx);
        }
    }

    /// Tear everything down in dependency order and release the context
    fn shutdown(mut self) {
        let channel = self.ctx.channel_id();
        info!(channel = %channel, frames = self.frames_processed, "Shutting down channel");

        let producer = self
            .producer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(producer) = producer {
            producer.detach();
        }

        for mut entry in self.off_screen.drain(..) {
            entry.consumer.recycle(&mut self.ctx);
            entry.consumer.on_disconnected();
        }
        for mut entry in self.on_screen.drain(..) {
            entry.consumer.recycle(&mut self.ctx);
            entry.consumer.on_disconnected();
        }
        self.ctx.make_dummy_current();

        if let Some(slot) = self.preprocessor.take() {
            slot.release(&mut self.ctx);
        }
        self.rotate.release(&mut self.ctx);
        self.watermark.release(&mut self.ctx);
        if let Some(texture) = self.upload_texture.take() {
            self.ctx.device().delete_texture(texture);
        }
        self.ctx.release();
    }
}

struct ChannelInner {
    id: ChannelId,
    backend: GpuBackend,
    worker: Mutex<Option<TaskLoop<ChannelRuntime>>>,
    producer: Arc<Mutex<Option<VideoProducer>>>,
    watermark: WatermarkHandle,
    next_consumer_key: AtomicU64,
    error_slot: SharedErrorCallback,
    settings: Mutex<ChannelSettings>,
    has_preprocessor: AtomicBool,
}

/// Handle to one channel; clones refer to the same channel
///
/// The thread stops when [`stop`](Self::stop) is called or the last handle
/// is dropped.
#[derive(Clone)]
pub struct VideoChannel {
    inner: Arc<ChannelInner>,
}

/// Non-owning channel handle
#[derive(Clone)]
pub struct WeakVideoChannel {
    inner: Weak<ChannelInner>,
}

impl WeakVideoChannel {
    pub fn upgrade(&self) -> Option<VideoChannel> {
        self.inner.upgrade().map(|inner| VideoChannel { inner })
    }
}

impl VideoChannel {
    pub fn new(id: ChannelId, backend: GpuBackend) -> Self {
        Self {
            inner: Arc::new(ChannelInner {
                id,
                backend,
                worker: Mutex::new(None),
                producer: Arc::new(Mutex::new(None)),
                watermark: WatermarkHandle::new(),
                next_consumer_key: AtomicU64::new(1),
                error_slot: Arc::new(Mutex::new(None)),
                settings: Mutex::new(ChannelSettings::default()),
                has_preprocessor: AtomicBool::new(false),
            }),
        }
    }

    pub fn id(&self) -> ChannelId {
        self.inner.id
    }

    pub fn downgrade(&self) -> WeakVideoChannel {
        WeakVideoChannel {
            inner: Arc::downgrade(&self.inner),
        }
    }

    fn worker(&self) -> MutexGuard<'_, Option<TaskLoop<ChannelRuntime>>> {
        self.inner.worker.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn settings(&self) -> MutexGuard<'_, ChannelSettings> {
        self.inner.settings.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn producer_slot(&self) -> MutexGuard<'_, Option<VideoProducer>> {
        self.inner.producer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn sender(&self) -> ChannelResult<TaskSender<ChannelRuntime>> {
        match self.worker().as_ref() {
            Some(worker) if worker.is_running() => Ok(worker.sender()),
            _ => Err(ChannelError::NotRunning(self.inner.id)),
        }
    }

    /// Start the channel thread; no-op when it is already running
    pub fn start(&self) -> ChannelResult<()> {
        let mut worker = self.worker();
        if let Some(running) = worker.as_ref()
            && running.is_running()
        {
            return Ok(());
        }

        let id = self.inner.id;
        let backend = self.inner.backend;
        let producer = Arc::clone(&self.inner.producer);
        let watermark = self.inner.watermark.clone();
        let error_slot = Arc::clone(&self.inner.error_slot);
        let settings = *self.settings();

        let task_loop = TaskLoop::start_with_init(
            id.name(),
            move || {
                let mut ctx = ChannelContext::new(id, backend).map_err(|e| e.to_string())?;
                ctx.set_error_slot(error_slot);
                ctx.set_display_rotation(settings.display_rotation);
                Ok(ChannelRuntime::new(ctx, producer, watermark, settings))
            },
            ChannelRuntime::shutdown,
        )
        .map_err(ChannelError::ThreadStart)?;

        *worker = Some(task_loop);
        info!(channel = %id, backend = %backend.kind(), "Channel started");
        Ok(())
    }

    /// Disconnect the producer, tear down consumers and stop the thread
    ///
    /// Blocks until the channel thread has exited, unless called from it.
    pub fn stop(&self) {
        let worker = self.worker().take();
        let Some(mut worker) = worker else {
            return;
        };
        self.disconnect_producer();
        worker.quit();
        self.inner.has_preprocessor.store(false, Ordering::SeqCst);
        info!(channel = %self.inner.id, "Channel stopped");
    }

    pub fn is_running(&self) -> bool {
        self.worker().as_ref().is_some_and(|worker| worker.is_running())
    }

    /// Attach `producer`; only one producer may be attached at a time
    pub fn connect_producer(&self, producer: &VideoProducer) -> ChannelResult<()> {
        let sender = self.sender()?;
        let mut slot = self.producer_slot();
        if let Some(existing) = slot.as_ref() {
            if existing.ptr_eq(producer) {
                return Ok(());
            }
            return Err(ChannelError::ProducerAlreadyConnected(self.inner.id));
        }
        producer.attach(sender);
        *slot = Some(producer.clone());
        info!(channel = %self.inner.id, "Producer connected");
        Ok(())
    }

    /// Detach the producer; its pending frame is discarded
    pub fn disconnect_producer(&self) {
        let producer = self.producer_slot().take();
        if let Some(producer) = producer {
            producer.detach();
            info!(
                channel = %self.inner.id,
                dropped = producer.dropped_frames(),
                delivered = producer.delivered_frames(),
                "Producer disconnected"
            );
        }
    }

    pub fn producer(&self) -> Option<VideoProducer> {
        self.producer_slot().clone()
    }

    /// Connect a consumer; the add runs on the channel thread
    pub fn connect_consumer(&self, mut consumer: Box<dyn VideoConsumer>, kind: ConsumerKind) -> ChannelResult<ConsumerKey> {
        let sender = self.sender()?;
        let key = ConsumerKey(self.inner.next_consumer_key.fetch_add(1, Ordering::Relaxed));
        consumer.on_connected(ConsumerLink {
            channel: self.downgrade(),
            key,
            kind,
        });
        if !sender.post(move |runtime: &mut ChannelRuntime| runtime.add_consumer(key, consumer, kind)) {
            return Err(ChannelError::NotRunning(self.inner.id));
        }
        Ok(key)
    }

    /// Recycle and remove a consumer; unknown keys are ignored
    pub fn disconnect_consumer(&self, key: ConsumerKey) -> ChannelResult<()> {
        self.post(move |runtime| {
            runtime.remove_consumer(key);
        })
    }

    /// Replace the preprocessor; the old one is released on the channel thread
    pub fn set_preprocessor(&self, preprocessor: Option<Box<dyn Preprocessor>>) -> ChannelResult<()> {
        let has = preprocessor.is_some();
        self.post(move |runtime| runtime.set_preprocessor(preprocessor))?;
        self.inner.has_preprocessor.store(has, Ordering::SeqCst);
        Ok(())
    }

    pub fn has_preprocessor(&self) -> bool {
        self.inner.has_preprocessor.load(Ordering::SeqCst)
    }

    pub fn enable_pre_process(&self, enabled: bool) -> ChannelResult<()> {
        self.post(move |runtime| runtime.enable_pre_process(enabled))
    }

    /// Feed off-screen consumers even when nothing is shown on screen
    pub fn enable_offscreen_mode(&self, enabled: bool) {
        self.settings().offscreen_mode = enabled;
        let _ = self.post(move |runtime| runtime.offscreen_mode = enabled);
    }

    pub fn set_on_screen_consumer_mirror(&self, mode: MirrorMode) {
        self.settings().mirror_mode = mode;
        let _ = self.post(move |runtime| runtime.set_mirror_mode(mode));
    }

    pub fn set_display_rotation(&self, rotation: Rotation) {
        self.settings().display_rotation = rotation;
        let _ = self.post(move |runtime| runtime.ctx.set_display_rotation(rotation));
    }

    pub fn set_error_listener(&self, listener: Option<ErrorCallback>) {
        *self.inner.error_slot.lock().unwrap_or_else(PoisonError::into_inner) = listener;
    }

    pub fn watermark(&self) -> WatermarkHandle {
        self.inner.watermark.clone()
    }

    /// Overlay `bitmap` on every frame from the next one on
    pub fn set_watermark(&self, bitmap: &RgbaImage, config: WatermarkConfig) -> WatermarkHandle {
        self.inner.watermark.set_watermark_bitmap(bitmap, config);
        self.watermark()
    }

    pub fn clean_watermark(&self) {
        self.inner.watermark.clean();
        let _ = self.post(|runtime| runtime.sync_watermark());
    }

    pub fn watermark_alpha(&self) -> f32 {
        self.inner.watermark.alpha()
    }

    pub fn set_watermark_alpha(&self, alpha: f32) {
        self.inner.watermark.set_alpha(alpha);
    }

    pub fn watermark_output_texture(&self) -> ChannelResult<Option<TextureId>> {
        self.run_on_channel(|runtime| runtime.watermark_output_texture())
    }

    pub fn consumer_count(&self, kind: ConsumerKind) -> ChannelResult<usize> {
        self.run_on_channel(move |runtime| runtime.consumer_count(kind))
    }

    /// Run `task` on the channel thread and wait for its result
    pub fn run_on_channel<R, F>(&self, task: F) -> ChannelResult<R>
    where
        R: Send + 'static,
        F: FnOnce(&mut ChannelRuntime) -> R + Send + 'static,
    {
        self.sender()?.post_and_wait(task)
    }

    /// Queue `task` on the channel thread without waiting
    pub(crate) fn post<F>(&self, task: F) -> ChannelResult<()>
    where
        F: FnOnce(&mut ChannelRuntime) + Send + 'static,
    {
        if self.sender()?.post(task) {
            Ok(())
        } else {
            Err(ChannelError::NotRunning(self.inner.id))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consumers::{FrameCallbackConsumer, FrameRecorder};
    use crate::frame::{FrameFormat, ImageTextureSource};
    use image::Rgba;
    use std::thread;
    use std::time::{Duration, Instant};

    fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        condition()
    }

    fn image_frame(width: u32, height: u32) -> VideoFrame {
        let source = ImageTextureSource::new();
        source.submit(Arc::new(RgbaImage::from_pixel(width, height, Rgba([10, 20, 30, 255]))));
        VideoFrame::from_source(FrameFormat::new(width, height, TextureKind::External), source)
    }

    #[test]
    fn test_calls_on_stopped_channel_fail() {
        let channel = VideoChannel::new(ChannelId::Custom, GpuBackend::software());
        assert!(!channel.is_running());
        assert_eq!(
            channel.consumer_count(ConsumerKind::OnScreen),
            Err(ChannelError::NotRunning(ChannelId::Custom))
        );
        assert!(channel.connect_producer(&VideoProducer::new()).is_err());
    }

    #[test]
    fn test_start_is_idempotent_and_restartable() {
        let channel = VideoChannel::new(ChannelId::Custom, GpuBackend::software());
        channel.start().unwrap();
        channel.start().unwrap();
        assert!(channel.is_running());
        channel.stop();
        assert!(!channel.is_running());
        channel.stop();
        channel.start().unwrap();
        assert!(channel.is_running());
    }

    #[test]
    fn test_second_producer_rejected() {
        let channel = VideoChannel::new(ChannelId::Camera, GpuBackend::software());
        channel.start().unwrap();
        let first = VideoProducer::new();
        channel.connect_producer(&first).unwrap();
        channel.connect_producer(&first).unwrap();
        assert_eq!(
            channel.connect_producer(&VideoProducer::new()),
            Err(ChannelError::ProducerAlreadyConnected(ChannelId::Camera))
        );
        channel.disconnect_producer();
        assert!(!first.is_connected());
        channel.connect_producer(&VideoProducer::new()).unwrap();
    }

    #[test]
    fn test_offscreen_gated_on_on_screen() {
        let channel = VideoChannel::new(ChannelId::Camera, GpuBackend::software());
        channel.enable_offscreen_mode(false);
        channel.start().unwrap();
        let recorder = FrameRecorder::new(None, false);
        channel
            .connect_consumer(Box::new(FrameCallbackConsumer::new(recorder.clone())), ConsumerKind::OffScreen)
            .unwrap();
        let producer = VideoProducer::new();
        channel.connect_producer(&producer).unwrap();

        producer.push_frame(image_frame(4, 4));
        channel.run_on_channel(|_| ()).unwrap();
        assert_eq!(recorder.frame_count(), 0, "off-screen consumers wait for an on-screen one");

        channel.enable_offscreen_mode(true);
        producer.push_frame(image_frame(4, 4));
        assert!(wait_for(|| recorder.frame_count() == 1));
        channel.stop();
    }

    #[test]
    fn test_cpu_frames_are_uploaded() {
        let channel = VideoChannel::new(ChannelId::Custom, GpuBackend::software());
        channel.start().unwrap();
        let recorder = FrameRecorder::new(None, true);
        channel
            .connect_consumer(Box::new(FrameCallbackConsumer::new(recorder.clone())), ConsumerKind::OffScreen)
            .unwrap();
        let pixels = Arc::new(RgbaImage::from_pixel(3, 2, Rgba([1, 2, 3, 255])));
        let frame = VideoFrame {
            texture: None,
            ..VideoFrame::from_texture(FrameFormat::new(3, 2, TextureKind::Texture2D), TextureId(0))
        }
        .with_image(pixels);
        channel.run_on_channel(move |runtime| runtime.push_video_frame(frame)).unwrap();

        let last = recorder.last_frame().unwrap();
        assert_eq!((last.format.width, last.format.height), (3, 2));
        assert_eq!(last.pixels.unwrap().get_pixel(0, 0), &Rgba([1, 2, 3, 255]));
        channel.stop();
    }

    #[test]
    fn test_error_listener_receives_stage_failures() {
        let channel = VideoChannel::new(ChannelId::Custom, GpuBackend::software());
        let codes = Arc::new(Mutex::new(Vec::new()));
        let codes_clone = Arc::clone(&codes);
        channel.set_error_listener(Some(Arc::new(move |code: CaptureErrorCode, _msg: &str| {
            codes_clone.lock().unwrap().push(code);
        })));
        channel.start().unwrap();
        let empty = VideoFrame {
            texture: None,
            ..VideoFrame::from_texture(FrameFormat::new(2, 2, TextureKind::Texture2D), TextureId(0))
        };
        channel.run_on_channel(move |runtime| runtime.push_video_frame(empty)).unwrap();
        assert_eq!(*codes.lock().unwrap(), vec![CaptureErrorCode::Unknown]);
        channel.stop();
    }
}
