// SPDX-License-Identifier: MPL-2.0

//! Integration tests for channels running on the software GPU backend

use camera_pipeline::constants::MirrorMode;
use camera_pipeline::consumers::{
    CaptureFrameConsumer, ConsumerKind, FrameCallbackConsumer, FrameRecorder, WindowConsumer,
};
use camera_pipeline::errors::{CaptureErrorCode, ChannelError, GpuError, GpuResult};
use camera_pipeline::frame::{FrameFormat, ImageTextureSource, Rotation, TextureKind, VideoFrame};
use camera_pipeline::gpu::{GpuBackend, MemoryWindow, NativeWindow, TextureId};
use camera_pipeline::matrix::ScaleType;
use camera_pipeline::pipeline::{ChannelContext, ChannelId, ChannelManager, VideoChannel, VideoProducer};
use camera_pipeline::processors::{Preprocessor, WatermarkConfig};
use image::{Rgba, RgbaImage};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(3);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}

/// Red channel carries the column, every row identical
fn column_image(width: u32, height: u32) -> Arc<RgbaImage> {
    Arc::new(RgbaImage::from_fn(width, height, |x, _| Rgba([x as u8, 0, 0, 255])))
}

fn external_frame(width: u32, height: u32) -> VideoFrame {
    let source = ImageTextureSource::new();
    source.submit(column_image(width, height));
    VideoFrame::from_source(FrameFormat::new(width, height, TextureKind::External), source)
}

fn cpu_frame(width: u32, height: u32) -> VideoFrame {
    VideoFrame::from_image(
        FrameFormat::new(width, height, TextureKind::Texture2D),
        column_image(width, height),
    )
}

#[derive(Debug, Clone, Copy)]
struct Observed {
    width: u32,
    height: u32,
    rotation: Rotation,
    mirrored: bool,
    kind: TextureKind,
    texture: Option<TextureId>,
}

/// Off-screen consumer remembering what each frame looked like
#[derive(Default)]
struct Probe {
    frames: Mutex<Vec<Observed>>,
}

impl Probe {
    fn last(&self) -> Option<Observed> {
        self.frames.lock().unwrap().last().copied()
    }

    fn count(&self) -> usize {
        self.frames.lock().unwrap().len()
    }
}

impl CaptureFrameConsumer for Probe {
    fn on_capture_frame(&self, frame: &VideoFrame, _ctx: &mut ChannelContext) {
        self.frames.lock().unwrap().push(Observed {
            width: frame.format.width,
            height: frame.format.height,
            rotation: frame.rotation,
            mirrored: frame.mirrored,
            kind: frame.format.texture_kind,
            texture: frame.texture,
        });
    }
}

fn running_channel() -> VideoChannel {
    let channel = VideoChannel::new(ChannelId::Custom, GpuBackend::software());
    channel.start().expect("software channel should start");
    channel
}

fn attach_probe(channel: &VideoChannel) -> Arc<Probe> {
    let probe = Arc::new(Probe::default());
    let consumer: Arc<dyn CaptureFrameConsumer> = probe.clone();
    channel
        .connect_consumer(Box::new(FrameCallbackConsumer::new(consumer)), ConsumerKind::OffScreen)
        .unwrap();
    probe
}

#[test]
fn test_rotated_mirrored_frame_comes_out_upright() {
    let channel = running_channel();
    let probe = attach_probe(&channel);
    let producer = VideoProducer::new();
    channel.connect_producer(&producer).unwrap();

    producer.push_frame(
        external_frame(640, 480)
            .with_rotation(Rotation::Rotate90)
            .with_mirrored(true),
    );
    assert!(wait_for(|| probe.count() == 1), "Frame should reach the consumer");

    let seen = probe.last().unwrap();
    assert_eq!((seen.width, seen.height), (480, 640), "Quarter turn swaps the size");
    assert_eq!(seen.rotation, Rotation::None);
    assert!(!seen.mirrored, "Rotate stage clears the mirror flag");
    assert_eq!(seen.kind, TextureKind::Texture2D);

    let rotate_output = channel.run_on_channel(|runtime| runtime.rotate_output_texture()).unwrap();
    assert_eq!(seen.texture, rotate_output, "Without a watermark consumers see the rotate output");
    channel.stop();
}

#[test]
fn test_mirrored_frame_is_unmirrored() {
    let channel = running_channel();
    let recorder = FrameRecorder::new(None, true);
    let consumer: Arc<dyn CaptureFrameConsumer> = recorder.clone();
    channel
        .connect_consumer(Box::new(FrameCallbackConsumer::new(consumer)), ConsumerKind::OffScreen)
        .unwrap();

    let frame = cpu_frame(4, 2).with_mirrored(true);
    channel.run_on_channel(move |runtime| runtime.push_video_frame(frame)).unwrap();

    let pixels = recorder.last_frame().and_then(|frame| frame.pixels).expect("pixels read back");
    assert_eq!(pixels.get_pixel(0, 0)[0], 3, "First column comes from the last source column");
    assert_eq!(pixels.get_pixel(3, 0)[0], 0);
    channel.stop();
}

#[test]
fn test_watermark_output_replaces_rotate_output() {
    let channel = running_channel();
    let probe = attach_probe(&channel);

    let bitmap = RgbaImage::from_pixel(8, 8, Rgba([255, 255, 255, 128]));
    let handle = channel.set_watermark(&bitmap, WatermarkConfig::new(120, 160));
    handle.set_alpha(0.5);
    assert_eq!(channel.watermark_alpha(), 0.5);

    let frame = cpu_frame(160, 120).with_rotation(Rotation::Rotate90);
    channel.run_on_channel(move |runtime| runtime.push_video_frame(frame)).unwrap();

    let seen = probe.last().expect("frame delivered");
    let watermark_output = channel.watermark_output_texture().unwrap();
    assert!(watermark_output.is_some(), "Watermark framebuffer allocated");
    assert_eq!(seen.texture, watermark_output);
    assert_eq!((seen.width, seen.height), (120, 160));

    channel.clean_watermark();
    let frame = cpu_frame(160, 120).with_rotation(Rotation::Rotate90);
    channel.run_on_channel(move |runtime| runtime.push_video_frame(frame)).unwrap();
    assert_eq!(channel.watermark_output_texture().unwrap(), None, "Cleaning frees the framebuffer");
    let rotate_output = channel.run_on_channel(|runtime| runtime.rotate_output_texture()).unwrap();
    assert_eq!(probe.last().unwrap().texture, rotate_output);
    channel.stop();
}

#[test]
fn test_latest_frame_wins_while_channel_is_busy() {
    let channel = running_channel();
    let probe = attach_probe(&channel);
    let producer = VideoProducer::new();
    channel.connect_producer(&producer).unwrap();

    // Park the channel thread so pushes pile up in the mailbox
    let (release_tx, release_rx) = crossbeam_channel::bounded::<()>(1);
    let (parked_tx, parked_rx) = crossbeam_channel::bounded::<()>(1);
    let blocker = {
        let channel = channel.clone();
        thread::spawn(move || {
            channel
                .run_on_channel(move |_runtime| {
                    let _ = parked_tx.send(());
                    let _ = release_rx.recv();
                })
                .unwrap();
        })
    };
    parked_rx.recv_timeout(Duration::from_secs(2)).expect("channel parked");

    for _ in 0..5 {
        producer.push_frame(cpu_frame(8, 4));
    }
    release_tx.send(()).unwrap();
    blocker.join().unwrap();

    assert!(wait_for(|| producer.delivered_frames() == 1));
    assert_eq!(producer.dropped_frames(), 4, "Older pending frames are replaced");
    assert!(wait_for(|| probe.count() == 1));
    channel.stop();
}

#[test]
fn test_window_consumer_presents_and_mirrors() {
    let channel = running_channel();
    let window = MemoryWindow::new(4, 2);
    let target: Arc<dyn NativeWindow> = window.clone();
    let consumer = WindowConsumer::new(target, ScaleType::FitXY).with_id("preview");
    let handle = consumer.handle();
    channel.connect_consumer(Box::new(consumer), ConsumerKind::OnScreen).unwrap();

    let frame = cpu_frame(4, 2);
    channel.run_on_channel(move |runtime| runtime.push_video_frame(frame)).unwrap();
    assert_eq!(window.present_count(), 1);
    assert_eq!(handle.frames_presented(), 1);
    assert_eq!(window.last_frame().unwrap().get_pixel(0, 0)[0], 0);

    channel.set_on_screen_consumer_mirror(MirrorMode::Enabled);
    let frame = cpu_frame(4, 2);
    channel.run_on_channel(move |runtime| runtime.push_video_frame(frame)).unwrap();
    let shown = window.last_frame().unwrap();
    assert_eq!(shown.get_pixel(0, 0)[0], 3, "Forced mirror flips the preview");
    assert_eq!((shown.width(), shown.height()), (4, 2));
    channel.stop();
}

#[test]
fn test_consumer_with_same_id_replaces_previous() {
    let channel = running_channel();
    let first = MemoryWindow::new(4, 2);
    let second = MemoryWindow::new(4, 2);
    channel
        .connect_consumer(
            Box::new(WindowConsumer::new(first.clone(), ScaleType::FitXY).with_id("preview")),
            ConsumerKind::OnScreen,
        )
        .unwrap();
    channel
        .connect_consumer(
            Box::new(WindowConsumer::new(second.clone(), ScaleType::FitXY).with_id("preview")),
            ConsumerKind::OnScreen,
        )
        .unwrap();
    assert_eq!(channel.consumer_count(ConsumerKind::OnScreen).unwrap(), 1);

    let frame = cpu_frame(4, 2);
    channel.run_on_channel(move |runtime| runtime.push_video_frame(frame)).unwrap();
    assert_eq!(first.present_count(), 0);
    assert_eq!(second.present_count(), 1);
    channel.stop();
}

#[test]
fn test_off_screen_waits_for_preview_without_offscreen_mode() {
    let channel = running_channel();
    channel.enable_offscreen_mode(false);
    let probe = attach_probe(&channel);

    let frame = cpu_frame(4, 2);
    channel.run_on_channel(move |runtime| runtime.push_video_frame(frame)).unwrap();
    assert_eq!(probe.count(), 0, "No on-screen consumer, off-screen consumers are skipped");

    let window = MemoryWindow::new(4, 2);
    channel
        .connect_consumer(Box::new(WindowConsumer::new(window, ScaleType::FitXY)), ConsumerKind::OnScreen)
        .unwrap();
    let frame = cpu_frame(4, 2);
    channel.run_on_channel(move |runtime| runtime.push_video_frame(frame)).unwrap();
    assert_eq!(probe.count(), 1);
    channel.stop();
}

struct CountingPreprocessor {
    frames: Arc<AtomicU64>,
    released: Arc<AtomicBool>,
    fail_init: bool,
    enabled: bool,
}

impl CountingPreprocessor {
    fn new(fail_init: bool) -> (Self, Arc<AtomicU64>, Arc<AtomicBool>) {
        let frames = Arc::new(AtomicU64::new(0));
        let released = Arc::new(AtomicBool::new(false));
        let preprocessor = Self {
            frames: Arc::clone(&frames),
            released: Arc::clone(&released),
            fail_init,
            enabled: true,
        };
        (preprocessor, frames, released)
    }
}

impl Preprocessor for CountingPreprocessor {
    fn init(&mut self, _ctx: &mut ChannelContext) -> GpuResult<()> {
        if self.fail_init {
            return Err(GpuError::Backend("filter shader failed to compile".into()));
        }
        Ok(())
    }

    fn on_pre_process_frame(&mut self, frame: VideoFrame, _ctx: &mut ChannelContext) -> VideoFrame {
        self.frames.fetch_add(1, Ordering::SeqCst);
        frame
    }

    fn release(&mut self, _ctx: &mut ChannelContext) {
        self.released.store(true, Ordering::SeqCst);
    }

    fn enable_pre_process(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }
}

#[test]
fn test_preprocessor_runs_until_disabled() {
    let channel = running_channel();
    let probe = attach_probe(&channel);
    let (preprocessor, frames, released) = CountingPreprocessor::new(false);
    channel.set_preprocessor(Some(Box::new(preprocessor))).unwrap();
    assert!(channel.has_preprocessor());

    let frame = cpu_frame(4, 2);
    channel.run_on_channel(move |runtime| runtime.push_video_frame(frame)).unwrap();
    assert_eq!(frames.load(Ordering::SeqCst), 1);

    channel.enable_pre_process(false).unwrap();
    let frame = cpu_frame(4, 2);
    channel.run_on_channel(move |runtime| runtime.push_video_frame(frame)).unwrap();
    assert_eq!(frames.load(Ordering::SeqCst), 1, "Disabled preprocessor is skipped");
    assert_eq!(probe.count(), 2, "Frames still flow past a disabled preprocessor");

    channel.set_preprocessor(None).unwrap();
    channel.run_on_channel(|_| ()).unwrap();
    assert!(released.load(Ordering::SeqCst), "Replaced preprocessor is released");
    assert!(!channel.has_preprocessor());
    channel.stop();
}

#[test]
fn test_preprocessor_init_failure_is_reported_once() {
    let channel = VideoChannel::new(ChannelId::Custom, GpuBackend::software());
    let codes = Arc::new(Mutex::new(Vec::new()));
    let codes_clone = Arc::clone(&codes);
    channel.set_error_listener(Some(Arc::new(move |code: CaptureErrorCode, _message: &str| {
        codes_clone.lock().unwrap().push(code);
    })));
    channel.start().unwrap();
    let probe = attach_probe(&channel);
    let (preprocessor, frames, _released) = CountingPreprocessor::new(true);
    channel.set_preprocessor(Some(Box::new(preprocessor))).unwrap();

    for _ in 0..3 {
        let frame = cpu_frame(4, 2);
        channel.run_on_channel(move |runtime| runtime.push_video_frame(frame)).unwrap();
    }

    assert_eq!(*codes.lock().unwrap(), vec![CaptureErrorCode::GpuContext]);
    assert_eq!(frames.load(Ordering::SeqCst), 0);
    assert_eq!(probe.count(), 3, "The frame that hit the failed init still reaches consumers");
    channel.stop();
}

#[test]
fn test_channel_manager_lifecycle() {
    let manager = ChannelManager::new(GpuBackend::software());
    assert!(!manager.is_channel_running(ChannelId::ScreenShare));

    let channel = manager.ensure_channel_running(ChannelId::ScreenShare).unwrap();
    assert!(manager.is_channel_running(ChannelId::ScreenShare));
    assert_eq!(channel.id(), ChannelId::ScreenShare);

    let producer = VideoProducer::new();
    manager.connect_producer(ChannelId::ScreenShare, &producer).unwrap();
    assert!(producer.is_connected());
    assert_eq!(
        manager.connect_producer(ChannelId::ScreenShare, &VideoProducer::new()),
        Err(ChannelError::ProducerAlreadyConnected(ChannelId::ScreenShare))
    );

    manager.stop_all();
    assert!(!manager.is_channel_running(ChannelId::ScreenShare));
    assert!(!producer.is_connected(), "Stopping a channel detaches its producer");
    assert_eq!(
        channel.consumer_count(ConsumerKind::OnScreen),
        Err(ChannelError::NotRunning(ChannelId::ScreenShare))
    );
}
