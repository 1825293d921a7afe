// SPDX-License-Identifier: GPL-3.0-only

//! Test-pattern camera
//!
//! Behaves like a driver: `open` returns at once and a stream thread reports
//! opened, configured and then one frame per frame interval. Frames carry
//! a gradient with a moving bar so consecutive frames differ.

use super::types::{
    CameraParameter, CaptureRequest, CapturedFrame, DeviceCapabilities, DeviceErrorKind, FrameRateRange, Size,
};
use super::{CameraDevice, CameraEventSink};
use crate::constants::CameraFacing;
use crate::frame::{ImageTextureSource, Rotation, TexImageSource};
use crossbeam_channel::{RecvTimeoutError, Sender, bounded};
use image::{Rgba, RgbaImage};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

#[derive(Default)]
struct ControlState {
    paused: AtomicBool,
    frames_emitted: AtomicU64,
    fail_next_open: Mutex<Option<DeviceErrorKind>>,
    close_delay: Mutex<Option<Duration>>,
    sink: Mutex<Option<CameraEventSink>>,
    applied: Mutex<Vec<CameraParameter>>,
}

/// Test hooks for a [`SyntheticCamera`], usable from any thread
#[derive(Clone, Default)]
pub struct SyntheticControl {
    state: Arc<ControlState>,
}

impl SyntheticControl {
    /// Keep the session open but stop emitting frames
    pub fn pause(&self) {
        self.state.paused.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.state.paused.store(false, Ordering::SeqCst);
    }

    /// Make the next `open` fail synchronously with `kind`
    pub fn fail_next_open(&self, kind: DeviceErrorKind) {
        *self
            .state
            .fail_next_open
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(kind);
    }

    /// Delay the closed notification after `close`
    pub fn set_close_delay(&self, delay: Option<Duration>) {
        *self
            .state
            .close_delay
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = delay;
    }

    /// Report a runtime error on the open session
    pub fn raise_error(&self, kind: DeviceErrorKind) {
        if let Some(sink) = self.sink() {
            sink.error(kind);
        }
    }

    /// Report that the device went away
    pub fn disconnect(&self) {
        if let Some(sink) = self.sink() {
            sink.disconnected();
        }
    }

    pub fn frames_emitted(&self) -> u64 {
        self.state.frames_emitted.load(Ordering::SeqCst)
    }

    /// Parameters applied to running sessions, oldest first
    pub fn applied_parameters(&self) -> Vec<CameraParameter> {
        self.state
            .applied
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn sink(&self) -> Option<CameraEventSink> {
        self.state
            .sink
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

struct Stream {
    stop_tx: Sender<()>,
    thread_handle: JoinHandle<()>,
}

/// In-process [`CameraDevice`] producing a test pattern
pub struct SyntheticCamera {
    front: DeviceCapabilities,
    back: DeviceCapabilities,
    cpu_frames: bool,
    control: SyntheticControl,
    facing: Option<CameraFacing>,
    stream: Option<Stream>,
}

impl Default for SyntheticCamera {
    fn default() -> Self {
        Self::new()
    }
}

impl SyntheticCamera {
    pub fn new() -> Self {
        Self {
            front: Self::default_capabilities(CameraFacing::Front),
            back: Self::default_capabilities(CameraFacing::Back),
            cpu_frames: false,
            control: SyntheticControl::default(),
            facing: None,
            stream: None,
        }
    }

    /// Capabilities of a typical phone camera
    pub fn default_capabilities(facing: CameraFacing) -> DeviceCapabilities {
        DeviceCapabilities {
            sizes: vec![
                Size::new(1920, 1080),
                Size::new(1280, 720),
                Size::new(640, 480),
                Size::new(320, 240),
                Size::new(160, 120),
            ],
            fps_ranges: vec![
                FrameRateRange::from_fps(15, 15),
                FrameRateRange::from_fps(7, 30),
                FrameRateRange::from_fps(30, 30),
            ],
            sensor_orientation: match facing {
                CameraFacing::Front => Rotation::Rotate270,
                CameraFacing::Back => Rotation::Rotate90,
            },
            max_zoom: 4.0,
            exposure_range: (-4, 4),
            has_flash: facing == CameraFacing::Back,
        }
    }

    pub fn with_capabilities(mut self, facing: CameraFacing, capabilities: DeviceCapabilities) -> Self {
        match facing {
            CameraFacing::Front => self.front = capabilities,
            CameraFacing::Back => self.back = capabilities,
        }
        self
    }

    /// Deliver CPU images instead of a deferred texture stream
    pub fn with_cpu_frames(mut self, cpu_frames: bool) -> Self {
        self.cpu_frames = cpu_frames;
        self
    }

    pub fn control(&self) -> SyntheticControl {
        self.control.clone()
    }

    fn capabilities_for(&self, facing: CameraFacing) -> &DeviceCapabilities {
        match facing {
            CameraFacing::Front => &self.front,
            CameraFacing::Back => &self.back,
        }
    }

    fn stop_stream(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.stop_tx.send(());
            if stream.thread_handle.join().is_err() {
                warn!("Synthetic camera stream thread panicked");
            }
        }
    }
}

/// Gradient with a vertical bar that moves one step per frame
pub fn test_pattern(width: u32, height: u32, frame_index: u64) -> RgbaImage {
    let bar_width = (width / 16).max(1);
    let bar_x = ((frame_index * bar_width as u64) % width.max(1) as u64) as u32;
    RgbaImage::from_fn(width, height, |x, y| {
        if x >= bar_x && x < bar_x + bar_width {
            Rgba([255, 255, 255, 255])
        } else {
            let r = (x * 255 / width.max(1)) as u8;
            let g = (y * 255 / height.max(1)) as u8;
            Rgba([r, g, 128, 255])
        }
    })
}

fn frame_interval(range: &FrameRateRange) -> Duration {
    let fps_milli = range.max.max(1000) as u64;
    Duration::from_micros(1_000_000_000 / fps_milli)
}

impl CameraDevice for SyntheticCamera {
    fn capabilities(&self, facing: CameraFacing) -> Result<DeviceCapabilities, DeviceErrorKind> {
        Ok(self.capabilities_for(facing).clone())
    }

    fn open(&mut self, request: &CaptureRequest, events: CameraEventSink) -> Result<(), DeviceErrorKind> {
        let failure = self
            .control
            .state
            .fail_next_open
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(kind) = failure {
            debug!(error = %kind, "Synthetic camera refusing to open");
            return Err(kind);
        }

        self.stop_stream();
        self.facing = Some(request.facing);
        *self
            .control
            .state
            .sink
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(events.clone());

        let (stop_tx, stop_rx) = bounded::<()>(1);
        let control = Arc::clone(&self.control.state);
        let size = request.size;
        let interval = frame_interval(&request.fps_range);
        let source = (!self.cpu_frames).then(ImageTextureSource::new);
        info!(facing = %request.facing, size = %size, fps = %request.fps_range, "Synthetic camera opening");

        let thread_handle = thread::Builder::new()
            .name("synthetic-camera".to_string())
            .spawn(move || {
                events.opened();
                events.configured();

                let mut frame_index = 0u64;
                loop {
                    match stop_rx.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => {}
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                    if control.paused.load(Ordering::SeqCst) {
                        continue;
                    }

                    let image = Arc::new(test_pattern(size.width, size.height, frame_index));
                    frame_index += 1;
                    let frame = match &source {
                        Some(source) => {
                            source.submit(image);
                            let source: Arc<dyn TexImageSource> = source.clone();
                            CapturedFrame {
                                width: size.width,
                                height: size.height,
                                image: None,
                                source: Some(source),
                                timestamp: Instant::now(),
                            }
                        }
                        None => CapturedFrame {
                            width: size.width,
                            height: size.height,
                            image: Some(image),
                            source: None,
                            timestamp: Instant::now(),
                        },
                    };
                    control.frames_emitted.fetch_add(1, Ordering::SeqCst);
                    events.frame(frame);
                }
                debug!(frames = frame_index, "Synthetic camera stream ended");
            })
            .map_err(|e| DeviceErrorKind::Other(format!("failed to spawn stream thread: {}", e)))?;

        self.stream = Some(Stream {
            stop_tx,
            thread_handle,
        });
        Ok(())
    }

    fn close(&mut self) {
        self.stop_stream();
        self.facing = None;
        let sink = self
            .control
            .state
            .sink
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(sink) = sink else {
            return;
        };

        let delay = *self
            .control
            .state
            .close_delay
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        match delay {
            Some(delay) => {
                let spawned = thread::Builder::new()
                    .name("synthetic-close".to_string())
                    .spawn({
                        let sink = sink.clone();
                        move || {
                            thread::sleep(delay);
                            sink.closed();
                        }
                    });
                if spawned.is_err() {
                    sink.closed();
                }
            }
            None => sink.closed(),
        }
    }

    fn apply_parameter(&mut self, parameter: CameraParameter) -> Result<(), DeviceErrorKind> {
        let Some(facing) = self.facing else {
            return Err(DeviceErrorKind::Other("camera not open".to_string()));
        };
        if parameter == CameraParameter::Torch(true) && !self.capabilities_for(facing).has_flash {
            return Err(DeviceErrorKind::Other(format!("{} camera has no flash", facing)));
        }
        self.control
            .state
            .applied
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(parameter);
        Ok(())
    }
}

impl Drop for SyntheticCamera {
    fn drop(&mut self) {
        self.stop_stream();
    }
}
