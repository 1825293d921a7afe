// SPDX-License-Identifier: GPL-3.0-only

//! Watermark compositing
//!
//! The overlay state lives in a [`WatermarkHandle`] that any thread may
//! update. The channel thread reads it once per frame, so changes take
//! effect on the next frame without reallocating GPU resources; only a new
//! bitmap (rebuilds the overlay texture) or a new output size (rebuilds the
//! framebuffer) costs more than a matrix update.

use crate::errors::GpuResult;
use crate::frame::{PixelFormat, Rotation, TextureKind, VideoFrame};
use crate::gpu::{GpuDevice, TextureId};
use crate::matrix::{self, Mat4, MatrixOperator, ScaleType};
use crate::pipeline::ChannelContext;
use crate::shaders::OffscreenProgram;
use image::{RgbaImage, imageops};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, trace};

/// Output and layout of the composited frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WatermarkConfig {
    /// Size of the composited output
    pub out_width: u32,
    pub out_height: u32,
    /// How the camera image fills the output
    pub origin_scale_type: ScaleType,
    /// Canvas the bitmap is fitted into before upload
    pub watermark_width: u32,
    pub watermark_height: u32,
    /// How the canvas is placed on the output
    pub watermark_scale_type: ScaleType,
}

impl WatermarkConfig {
    /// Output of `width` x `height` with a full-size watermark canvas
    pub fn new(out_width: u32, out_height: u32) -> Self {
        Self {
            out_width,
            out_height,
            origin_scale_type: ScaleType::CenterCrop,
            watermark_width: out_width,
            watermark_height: out_height,
            watermark_scale_type: ScaleType::FitCenter,
        }
    }

    pub fn with_watermark_size(mut self, width: u32, height: u32) -> Self {
        self.watermark_width = width;
        self.watermark_height = height;
        self
    }

    pub fn with_watermark_scale_type(mut self, scale_type: ScaleType) -> Self {
        self.watermark_scale_type = scale_type;
        self
    }

    pub fn with_origin_scale_type(mut self, scale_type: ScaleType) -> Self {
        self.origin_scale_type = scale_type;
        self
    }
}

/// Fit `bitmap` into a `width` x `height` canvas
///
/// CenterCrop covers the canvas and crops the overflow, FitCenter shrinks
/// it inside a transparent canvas, FitXY stretches it.
pub fn fit_to_canvas(bitmap: &RgbaImage, width: u32, height: u32, scale_type: ScaleType) -> RgbaImage {
    let (bw, bh) = bitmap.dimensions();
    if bw == 0 || bh == 0 || width == 0 || height == 0 || (bw, bh) == (width, height) {
        return bitmap.clone();
    }
    let sx = width as f32 / bw as f32;
    let sy = height as f32 / bh as f32;
    match scale_type {
        ScaleType::FitXY => imageops::resize(bitmap, width, height, imageops::FilterType::Triangle),
        ScaleType::CenterCrop => {
            let scale = sx.max(sy);
            let rw = ((bw as f32 * scale).round() as u32).max(width);
            let rh = ((bh as f32 * scale).round() as u32).max(height);
            let resized = imageops::resize(bitmap, rw, rh, imageops::FilterType::Triangle);
            imageops::crop_imm(&resized, (rw - width) / 2, (rh - height) / 2, width, height).to_image()
        }
        ScaleType::FitCenter => {
            let scale = sx.min(sy);
            let rw = ((bw as f32 * scale).round() as u32).clamp(1, width);
            let rh = ((bh as f32 * scale).round() as u32).clamp(1, height);
            let resized = imageops::resize(bitmap, rw, rh, imageops::FilterType::Triangle);
            let mut canvas = RgbaImage::new(width, height);
            imageops::overlay(
                &mut canvas,
                &resized,
                ((width - rw) / 2) as i64,
                ((height - rh) / 2) as i64,
            );
            canvas
        }
    }
}

struct WatermarkState {
    bitmap: Option<Arc<RgbaImage>>,
    version: u64,
    alpha: f32,
    operator: MatrixOperator,
    config: Option<WatermarkConfig>,
}

impl Default for WatermarkState {
    fn default() -> Self {
        Self {
            bitmap: None,
            version: 0,
            alpha: 1.0,
            operator: MatrixOperator::vertex(ScaleType::FitCenter),
            config: None,
        }
    }
}

/// What the channel thread needs for one frame
struct WatermarkSnapshot {
    bitmap: Arc<RgbaImage>,
    version: u64,
    alpha: f32,
    mvp: Mat4,
    config: WatermarkConfig,
}

/// Thread-safe view of a channel's watermark
#[derive(Clone, Default)]
pub struct WatermarkHandle {
    state: Arc<Mutex<WatermarkState>>,
}

impl WatermarkHandle {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, WatermarkState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replace the overlay bitmap and layout
    ///
    /// The matrix operator is recreated for the configured scale type, so
    /// earlier scale/translate/rotate adjustments are reset.
    pub fn set_watermark_bitmap(&self, bitmap: &RgbaImage, config: WatermarkConfig) {
        let canvas = fit_to_canvas(
            bitmap,
            config.watermark_width,
            config.watermark_height,
            config.watermark_scale_type,
        );
        debug!(
            bitmap_width = bitmap.width(),
            bitmap_height = bitmap.height(),
            canvas_width = canvas.width(),
            canvas_height = canvas.height(),
            out_width = config.out_width,
            out_height = config.out_height,
            "Watermark set"
        );
        let mut state = self.lock();
        state.bitmap = Some(Arc::new(canvas));
        state.version += 1;
        state.operator = MatrixOperator::vertex(config.watermark_scale_type);
        state.config = Some(config);
    }

    /// Remove the overlay; the channel frees its GPU resources on the next frame
    pub fn clean(&self) {
        let mut state = self.lock();
        if state.bitmap.take().is_some() {
            debug!("Watermark cleared");
            state.version += 1;
        }
        state.config = None;
    }

    pub fn has_watermark(&self) -> bool {
        self.lock().bitmap.is_some()
    }

    pub fn alpha(&self) -> f32 {
        self.lock().alpha
    }

    pub fn set_alpha(&self, alpha: f32) {
        self.lock().alpha = alpha.clamp(0.0, 1.0);
    }

    pub fn config(&self) -> Option<WatermarkConfig> {
        self.lock().config
    }

    /// Change the composited output size; the framebuffer is rebuilt on the next frame
    pub fn set_out_size(&self, width: u32, height: u32) {
        if let Some(config) = self.lock().config.as_mut() {
            config.out_width = width;
            config.out_height = height;
        }
    }

    pub fn set_origin_scale_type(&self, scale_type: ScaleType) {
        if let Some(config) = self.lock().config.as_mut() {
            config.origin_scale_type = scale_type;
        }
    }

    /// Switch the watermark scale type; this needs a fresh matrix operator
    pub fn set_scale_type(&self, scale_type: ScaleType) {
        let mut state = self.lock();
        if state.operator.scale_type() == scale_type {
            return;
        }
        state.operator = MatrixOperator::vertex(scale_type);
        if let Some(config) = state.config.as_mut() {
            config.watermark_scale_type = scale_type;
        }
    }

    /// Adjust the watermark's matrix operator in place
    pub fn update_matrix<F: FnOnce(&mut MatrixOperator)>(&self, f: F) {
        f(&mut self.lock().operator);
    }

    pub fn set_scale_ratio(&self, ratio: f32) {
        self.update_matrix(|op| op.set_scale_ratio(ratio));
    }

    /// Position in [-1, 1]; ±1 aligns the overlay with an edge
    pub fn set_translate(&self, x: f32, y: f32) {
        self.update_matrix(|op| {
            op.set_translate_x(x.clamp(-1.0, 1.0));
            op.set_translate_y(y.clamp(-1.0, 1.0));
        });
    }

    pub fn set_rotation(&self, degrees: f32) {
        self.update_matrix(|op| op.set_rotation(degrees));
    }

    pub fn set_flip_h(&self, flip: bool) {
        self.update_matrix(|op| op.set_flip_h(flip));
    }

    pub fn set_flip_v(&self, flip: bool) {
        self.update_matrix(|op| op.set_flip_v(flip));
    }

    /// Copy of the current watermark operator
    pub fn matrix(&self) -> MatrixOperator {
        self.lock().operator.clone()
    }

    fn snapshot(&self) -> Option<WatermarkSnapshot> {
        let mut state = self.lock();
        let bitmap = state.bitmap.clone()?;
        let config = state.config?;
        state
            .operator
            .update(config.out_width, config.out_height, bitmap.width(), bitmap.height());
        Some(WatermarkSnapshot {
            bitmap,
            version: state.version,
            alpha: state.alpha,
            mvp: state.operator.final_matrix(),
            config,
        })
    }
}

/// Channel-thread half of the watermark stage
pub struct WatermarkProcessor {
    handle: WatermarkHandle,
    output: OffscreenProgram,
    overlay: Option<(u64, TextureId)>,
    origin_mvp: MatrixOperator,
    origin_tex: MatrixOperator,
}

impl WatermarkProcessor {
    pub fn new(handle: WatermarkHandle) -> Self {
        Self {
            handle,
            output: OffscreenProgram::new("watermark", TextureKind::Texture2D),
            overlay: None,
            origin_mvp: MatrixOperator::vertex(ScaleType::CenterCrop),
            origin_tex: MatrixOperator::texture(ScaleType::FitXY),
        }
    }

    pub fn handle(&self) -> &WatermarkHandle {
        &self.handle
    }

    /// Texture of the last composited frame, if a framebuffer is allocated
    pub fn output_texture(&self) -> Option<TextureId> {
        self.output.output_texture()
    }

    fn overlay_texture(&mut self, device: &mut dyn GpuDevice, snapshot: &WatermarkSnapshot) -> GpuResult<TextureId> {
        if let Some((version, texture)) = self.overlay
            && version == snapshot.version
        {
            return Ok(texture);
        }
        if let Some((_, old)) = self.overlay.take() {
            device.delete_texture(old);
        }
        // Stored bottom row first, like every render target
        let upload = imageops::flip_vertical(&*snapshot.bitmap);
        let texture = device.create_texture(upload.width(), upload.height())?;
        device.upload_texture(texture, &upload)?;
        debug!(texture = %texture, version = snapshot.version, "Watermark texture rebuilt");
        self.overlay = Some((snapshot.version, texture));
        Ok(texture)
    }

    pub fn process(&mut self, mut frame: VideoFrame, ctx: &mut ChannelContext) -> GpuResult<VideoFrame> {
        let Some(snapshot) = self.handle.snapshot() else {
            if self.output.is_allocated() || self.overlay.is_some() {
                debug!("Watermark removed, releasing resources");
                self.release(ctx);
            }
            return Ok(frame);
        };
        let Some(texture) = frame.texture else {
            return Ok(frame);
        };
        let config = snapshot.config;
        let (out_width, out_height) = (config.out_width, config.out_height);
        if out_width == 0 || out_height == 0 {
            return Ok(frame);
        }

        let programs = ctx.programs;
        let device = ctx.device();
        self.output.update(device, out_width, out_height)?;
        let overlay = self.overlay_texture(device, &snapshot)?;

        if self.origin_mvp.scale_type() != config.origin_scale_type {
            self.origin_mvp = MatrixOperator::vertex(config.origin_scale_type);
        }
        let (src_width, src_height) = frame.upright_size();
        self.origin_mvp.update(out_width, out_height, src_width, src_height);
        self.origin_tex.set_transform_matrix(&frame.texture_transform);
        self.origin_tex.set_pre_flip_h(frame.mirrored);
        self.origin_tex.set_rotation(frame.rotation.degrees() as f32);

        self.output.begin(device)?;
        device.clear([0.0, 0.0, 0.0, 0.0]);
        let mut drawn = programs.program(frame.format.texture_kind).draw_frame(
            device,
            texture,
            &self.origin_tex.final_matrix(),
            &self.origin_mvp.final_matrix(),
            1.0,
        );
        if drawn.is_ok() {
            device.set_blend(true);
            drawn = programs.program(TextureKind::Texture2D).draw_frame(
                device,
                overlay,
                &matrix::identity(),
                &snapshot.mvp,
                snapshot.alpha,
            );
            device.set_blend(false);
        }
        self.output.end(device);
        drawn?;

        let output = self.output.output_texture().unwrap_or(texture);
        trace!(input = %texture, output = %output, alpha = snapshot.alpha, "Watermark composited");

        frame.texture = Some(output);
        frame.texture_transform = matrix::identity();
        frame.rotation = Rotation::None;
        frame.mirrored = false;
        frame.format.width = out_width;
        frame.format.height = out_height;
        frame.format.texture_kind = TextureKind::Texture2D;
        frame.format.pixel_format = PixelFormat::Unknown;
        frame.image = None;
        frame.tex_image = None;
        Ok(frame)
    }

    pub fn release(&mut self, ctx: &mut ChannelContext) {
        let device = ctx.device();
        self.output.release(device);
        if let Some((_, texture)) = self.overlay.take() {
            device.delete_texture(texture);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::FrameFormat;
    use crate::gpu::software::SoftwareDevice;
    use crate::pipeline::ChannelId;
    use image::Rgba;

    fn context() -> ChannelContext {
        ChannelContext::with_device(ChannelId::Camera, Box::new(SoftwareDevice::new("watermark"))).unwrap()
    }

    fn frame(ctx: &mut ChannelContext, width: u32, height: u32, color: Rgba<u8>) -> VideoFrame {
        let device = ctx.device();
        let tex = device.create_texture(width, height).unwrap();
        device
            .upload_texture(tex, &RgbaImage::from_pixel(width, height, color))
            .unwrap();
        VideoFrame::from_texture(FrameFormat::new(width, height, TextureKind::Texture2D), tex)
    }

    #[test]
    fn test_pass_through_without_bitmap() {
        let mut ctx = context();
        let input = frame(&mut ctx, 8, 8, Rgba([1, 2, 3, 255]));
        let mut processor = WatermarkProcessor::new(WatermarkHandle::new());
        let out = processor.process(input.clone(), &mut ctx).unwrap();
        assert_eq!(out.texture, input.texture);
        assert_eq!(out.format, input.format);
        assert_eq!(out.texture_transform, input.texture_transform);
        assert!(processor.output_texture().is_none(), "no framebuffer allocated");
    }

    #[test]
    fn test_composite_blends_overlay() {
        let mut ctx = context();
        let input = frame(&mut ctx, 4, 4, Rgba([0, 0, 0, 255]));
        let handle = WatermarkHandle::new();
        handle.set_watermark_bitmap(
            &RgbaImage::from_pixel(4, 4, Rgba([255, 255, 255, 255])),
            WatermarkConfig::new(4, 4),
        );
        handle.set_alpha(0.5);

        let mut processor = WatermarkProcessor::new(handle);
        let out = processor.process(input.clone(), &mut ctx).unwrap();
        assert_ne!(out.texture, input.texture);
        assert_eq!(out.texture, processor.output_texture());
        let image = ctx.device().read_texture(out.texture.unwrap()).unwrap();
        assert_eq!(image.get_pixel(2, 2)[0], 128);
    }

    #[test]
    fn test_clean_releases_framebuffer() {
        let mut ctx = context();
        let input = frame(&mut ctx, 4, 4, Rgba([0, 0, 0, 255]));
        let handle = WatermarkHandle::new();
        handle.set_watermark_bitmap(&RgbaImage::new(2, 2), WatermarkConfig::new(4, 4));
        let mut processor = WatermarkProcessor::new(handle.clone());
        processor.process(input.clone(), &mut ctx).unwrap();
        let fbo_texture = processor.output_texture().unwrap();

        handle.clean();
        let out = processor.process(input.clone(), &mut ctx).unwrap();
        assert_eq!(out.texture, input.texture);
        assert!(processor.output_texture().is_none());
        assert!(ctx.device().texture_size(fbo_texture).is_none());
    }

    #[test]
    fn test_overlay_texture_rebuilt_only_on_change() {
        let mut ctx = context();
        let input = frame(&mut ctx, 4, 4, Rgba([0, 0, 0, 255]));
        let handle = WatermarkHandle::new();
        handle.set_watermark_bitmap(&RgbaImage::new(4, 4), WatermarkConfig::new(4, 4));
        let mut processor = WatermarkProcessor::new(handle.clone());

        processor.process(input.clone(), &mut ctx).unwrap();
        let first = processor.overlay;
        handle.set_alpha(0.3);
        handle.set_scale_ratio(0.5);
        processor.process(input.clone(), &mut ctx).unwrap();
        assert_eq!(processor.overlay, first, "matrix and alpha changes keep the texture");

        handle.set_watermark_bitmap(&RgbaImage::new(4, 4), WatermarkConfig::new(4, 4));
        processor.process(input, &mut ctx).unwrap();
        assert_ne!(processor.overlay, first);
    }

    #[test]
    fn test_fit_to_canvas() {
        let wide = RgbaImage::from_pixel(8, 2, Rgba([9, 9, 9, 255]));
        let cropped = fit_to_canvas(&wide, 4, 4, ScaleType::CenterCrop);
        assert_eq!(cropped.dimensions(), (4, 4));
        assert_eq!(cropped.get_pixel(0, 0)[3], 255, "crop covers the canvas");

        let fitted = fit_to_canvas(&wide, 4, 4, ScaleType::FitCenter);
        assert_eq!(fitted.dimensions(), (4, 4));
        assert_eq!(fitted.get_pixel(0, 0)[3], 0, "letterbox stays transparent");
        assert_eq!(fitted.get_pixel(0, 1)[3], 255);
    }
}
