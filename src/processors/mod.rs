// SPDX-License-Identifier: GPL-3.0-only

//! Per-frame processing stages run on the channel thread
//!
//! Order per frame: optional [`Preprocessor`], then [`RotateProcessor`]
//! (always), then [`WatermarkProcessor`]. Each stage takes the frame by
//! value and returns the frame the next stage sees.

pub mod rotate;
pub mod watermark;

pub use rotate::RotateProcessor;
pub use watermark::{WatermarkConfig, WatermarkHandle, WatermarkProcessor};

use crate::errors::{GpuError, GpuResult};
use crate::frame::VideoFrame;
use crate::pipeline::ChannelContext;

/// Pluggable stage that runs before rotation, e.g. a beauty filter
///
/// Every method is called on the channel thread. `init` runs lazily before
/// the first frame the preprocessor sees; `release` runs when it is
/// replaced or the channel shuts down.
pub trait Preprocessor: Send {
    fn init(&mut self, ctx: &mut ChannelContext) -> GpuResult<()>;

    /// Transform `frame`; may replace its texture or pixels entirely
    fn on_pre_process_frame(&mut self, frame: VideoFrame, ctx: &mut ChannelContext) -> VideoFrame;

    fn release(&mut self, ctx: &mut ChannelContext);

    fn enable_pre_process(&mut self, enabled: bool);

    fn is_enabled(&self) -> bool;
}

/// A preprocessor plus its lazy-init state
pub(crate) struct PreprocessorSlot {
    processor: Box<dyn Preprocessor>,
    initialized: bool,
}

impl PreprocessorSlot {
    pub(crate) fn new(processor: Box<dyn Preprocessor>) -> Self {
        Self {
            processor,
            initialized: false,
        }
    }

    pub(crate) fn processor_mut(&mut self) -> &mut dyn Preprocessor {
        self.processor.as_mut()
    }

    /// Run the preprocessor, initializing it first if needed.
    ///
    /// Disabled preprocessors pass the frame through untouched. A failed
    /// init hands the untouched frame back with the error.
    pub(crate) fn process(
        &mut self,
        frame: VideoFrame,
        ctx: &mut ChannelContext,
    ) -> Result<VideoFrame, (GpuError, VideoFrame)> {
        if !self.processor.is_enabled() {
            return Ok(frame);
        }
        if !self.initialized {
            if let Err(e) = self.processor.init(ctx) {
                return Err((e, frame));
            }
            self.initialized = true;
        }
        Ok(self.processor.on_pre_process_frame(frame, ctx))
    }

    pub(crate) fn release(mut self, ctx: &mut ChannelContext) {
        if self.initialized {
            self.processor.release(ctx);
        }
    }
}
