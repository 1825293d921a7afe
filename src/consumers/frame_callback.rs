// SPDX-License-Identifier: GPL-3.0-only

//! Off-screen consumers that hand frames to application code

use super::VideoConsumer;
use crate::frame::{FrameFormat, VideoFrame};
use crate::gpu::{TargetId, TextureId};
use crate::pipeline::ChannelContext;
use image::RgbaImage;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;
use tracing::{debug, warn};

/// Receives every composited frame of a channel
///
/// Called on the channel thread; the frame's texture is only valid for the
/// duration of the call.
pub trait CaptureFrameConsumer: Send + Sync {
    fn on_capture_frame(&self, frame: &VideoFrame, ctx: &mut ChannelContext);

    fn id(&self) -> Option<&str> {
        None
    }
}

/// Adapts a shared [`CaptureFrameConsumer`] to a channel consumer
///
/// The wrapped object's identity is the drawing target, so attaching the
/// same object twice replaces the first attachment.
pub struct FrameCallbackConsumer {
    inner: Arc<dyn CaptureFrameConsumer>,
    target: TargetId,
    frames: u64,
}

impl FrameCallbackConsumer {
    pub fn new(inner: Arc<dyn CaptureFrameConsumer>) -> Self {
        let target = TargetId::of(&inner);
        Self {
            inner,
            target,
            frames: 0,
        }
    }
}

impl VideoConsumer for FrameCallbackConsumer {
    fn on_consume_frame(&mut self, frame: &VideoFrame, ctx: &mut ChannelContext) {
        self.frames += 1;
        self.inner.on_capture_frame(frame, ctx);
    }

    fn drawing_target(&self) -> Option<TargetId> {
        Some(self.target)
    }

    fn id(&self) -> Option<&str> {
        self.inner.id()
    }

    fn recycle(&mut self, _ctx: &mut ChannelContext) {
        debug!(target = self.target.raw(), frames = self.frames, "Frame callback consumer recycled");
    }
}

/// Snapshot of the last frame a [`FrameRecorder`] saw
#[derive(Debug, Clone)]
pub struct RecordedFrame {
    pub format: FrameFormat,
    pub texture: Option<TextureId>,
    pub timestamp: Instant,
    /// Pixels read back from the texture, top row first
    pub pixels: Option<RgbaImage>,
}

#[derive(Default)]
struct RecorderState {
    frames: u64,
    last: Option<RecordedFrame>,
}

/// Off-screen consumer that counts frames and optionally reads them back
pub struct FrameRecorder {
    id: Option<String>,
    read_pixels: bool,
    state: Mutex<RecorderState>,
}

impl FrameRecorder {
    pub fn new(id: Option<&str>, read_pixels: bool) -> Arc<Self> {
        Arc::new(Self {
            id: id.map(str::to_string),
            read_pixels,
            state: Mutex::new(RecorderState::default()),
        })
    }

    pub fn frame_count(&self) -> u64 {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).frames
    }

    pub fn last_frame(&self) -> Option<RecordedFrame> {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .last
            .clone()
    }
}

impl CaptureFrameConsumer for FrameRecorder {
    fn on_capture_frame(&self, frame: &VideoFrame, ctx: &mut ChannelContext) {
        let pixels = match frame.texture {
            Some(texture) if self.read_pixels => match ctx.device().read_texture(texture) {
                Ok(image) => Some(image),
                Err(e) => {
                    warn!(error = %e, "Frame read-back failed");
                    None
                }
            },
            _ => None,
        };
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.frames += 1;
        state.last = Some(RecordedFrame {
            format: frame.format,
            texture: frame.texture,
            timestamp: frame.timestamp,
            pixels,
        });
    }

    fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::TextureKind;
    use crate::gpu::software::SoftwareDevice;
    use crate::pipeline::ChannelId;
    use image::Rgba;

    #[test]
    fn test_recorder_reads_back_pixels() {
        let mut ctx = ChannelContext::with_device(ChannelId::Custom, Box::new(SoftwareDevice::new("rec"))).unwrap();
        let texture = ctx.device().create_texture(2, 2).unwrap();
        ctx.device()
            .upload_texture(texture, &RgbaImage::from_pixel(2, 2, Rgba([5, 6, 7, 255])))
            .unwrap();

        let recorder = FrameRecorder::new(Some("rec"), true);
        let mut consumer = FrameCallbackConsumer::new(recorder.clone());
        assert_eq!(consumer.id(), Some("rec"));
        let frame = VideoFrame::from_texture(FrameFormat::new(2, 2, TextureKind::Texture2D), texture);
        consumer.on_consume_frame(&frame, &mut ctx);

        assert_eq!(recorder.frame_count(), 1);
        let last = recorder.last_frame().unwrap();
        assert_eq!(last.texture, Some(texture));
        assert_eq!(last.pixels.unwrap().get_pixel(1, 1), &Rgba([5, 6, 7, 255]));
    }

    #[test]
    fn test_target_follows_wrapped_object() {
        let recorder = FrameRecorder::new(None, false);
        let a = FrameCallbackConsumer::new(recorder.clone());
        let b = FrameCallbackConsumer::new(recorder);
        assert_eq!(a.drawing_target(), b.drawing_target());
        let c = FrameCallbackConsumer::new(FrameRecorder::new(None, false));
        assert_ne!(a.drawing_target(), c.drawing_target());
    }
}
