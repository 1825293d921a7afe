// SPDX-License-Identifier: GPL-3.0-only

//! Orientation normalization
//!
//! Renders every frame upright into an off-screen framebuffer so later
//! stages and consumers never deal with rotation, mirroring or hardware
//! texture transforms.
//!
//! Output contract: `rotation = None`, `mirrored = false`, identity
//! texture transform, 2D texture kind, size swapped for quarter turns.
//! The timestamp and facing are preserved.

use crate::errors::{GpuError, GpuResult};
use crate::frame::{PixelFormat, Rotation, TextureKind, VideoFrame};
use crate::matrix::{self, MatrixOperator, ScaleType};
use crate::pipeline::ChannelContext;
use crate::shaders::OffscreenProgram;
use tracing::trace;

pub struct RotateProcessor {
    program_2d: OffscreenProgram,
    program_external: OffscreenProgram,
    tex_matrix: MatrixOperator,
    mvp: MatrixOperator,
}

impl Default for RotateProcessor {
    fn default() -> Self {
        Self::new()
    }
}

impl RotateProcessor {
    pub fn new() -> Self {
        Self {
            program_2d: OffscreenProgram::new("rotate_2d", TextureKind::Texture2D),
            program_external: OffscreenProgram::new("rotate_external", TextureKind::External),
            tex_matrix: MatrixOperator::texture(ScaleType::FitXY),
            mvp: MatrixOperator::vertex(ScaleType::FitXY),
        }
    }

    /// Output size for `frame` shown on a display rotated by `display_rotation`
    pub fn desired_size(frame: &VideoFrame, display_rotation: Rotation) -> (u32, u32) {
        let (width, height) = frame.upright_size();
        if display_rotation.swaps_dimensions() {
            (height, width)
        } else {
            (width, height)
        }
    }

    /// Texture the last frame was rendered into
    pub fn output_texture(&self, kind: TextureKind) -> Option<crate::gpu::TextureId> {
        match kind {
            TextureKind::Texture2D => self.program_2d.output_texture(),
            TextureKind::External => self.program_external.output_texture(),
        }
    }

    pub fn process(&mut self, mut frame: VideoFrame, ctx: &mut ChannelContext) -> GpuResult<VideoFrame> {
        let texture = frame
            .texture
            .ok_or_else(|| GpuError::InvalidHandle("rotate: frame has no texture".into()))?;
        let display_rotation = ctx.display_rotation();
        let (width, height) = Self::desired_size(&frame, display_rotation);

        self.tex_matrix.set_transform_matrix(&frame.texture_transform);
        self.tex_matrix.set_pre_flip_h(frame.mirrored);
        self.tex_matrix.set_rotation(frame.rotation.degrees() as f32);

        self.mvp.update(width, height, width, height);
        self.mvp.set_rotation(display_rotation.degrees() as f32);

        let program = match frame.format.texture_kind {
            TextureKind::Texture2D => &mut self.program_2d,
            TextureKind::External => &mut self.program_external,
        };
        let device = ctx.device();
        program.update(device, width, height)?;
        let output = program.draw_rotate_frame(
            device,
            texture,
            &self.tex_matrix.final_matrix(),
            &self.mvp.final_matrix(),
        )?;

        trace!(
            input = %texture,
            output = %output,
            rotation = %frame.rotation,
            mirrored = frame.mirrored,
            width,
            height,
            "Frame normalized"
        );

        frame.texture = Some(output);
        frame.texture_transform = matrix::identity();
        frame.rotation = Rotation::None;
        frame.mirrored = false;
        frame.format.width = width;
        frame.format.height = height;
        frame.format.texture_kind = TextureKind::Texture2D;
        frame.format.pixel_format = PixelFormat::Unknown;
        frame.image = None;
        frame.tex_image = None;
        Ok(frame)
    }

    pub fn release(&mut self, ctx: &mut ChannelContext) {
        let device = ctx.device();
        self.program_2d.release(device);
        self.program_external.release(device);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::FrameFormat;
    use crate::gpu::software::SoftwareDevice;
    use crate::pipeline::ChannelId;
    use image::{Rgba, RgbaImage};

    fn context() -> ChannelContext {
        ChannelContext::with_device(ChannelId::Camera, Box::new(SoftwareDevice::new("rotate"))).unwrap()
    }

    fn source(ctx: &mut ChannelContext, width: u32, height: u32) -> crate::gpu::TextureId {
        let device = ctx.device();
        let tex = device.create_texture(width, height).unwrap();
        let image = RgbaImage::from_fn(width, height, |x, y| Rgba([x as u8, y as u8, 0, 255]));
        device.upload_texture(tex, &image).unwrap();
        tex
    }

    #[test]
    fn test_output_is_upright_and_plain() {
        let mut ctx = context();
        let tex = source(&mut ctx, 8, 4);
        let mut rotate = RotateProcessor::new();

        for rotation in Rotation::ALL {
            for mirrored in [false, true] {
                let frame = VideoFrame::from_texture(FrameFormat::new(8, 4, TextureKind::External), tex)
                    .with_rotation(rotation)
                    .with_mirrored(mirrored);
                let out = rotate.process(frame, &mut ctx).unwrap();
                assert_eq!(out.rotation, Rotation::None);
                assert!(!out.mirrored);
                assert_eq!(out.texture_transform, matrix::identity());
                assert_eq!(out.format.texture_kind, TextureKind::Texture2D);
                let expected = if rotation.swaps_dimensions() { (4, 8) } else { (8, 4) };
                assert_eq!((out.format.width, out.format.height), expected);
            }
        }
    }

    #[test]
    fn test_display_rotation_swaps_again() {
        let mut ctx = context();
        let tex = source(&mut ctx, 8, 4);
        ctx.set_display_rotation(Rotation::Rotate90);
        let mut rotate = RotateProcessor::new();
        let frame = VideoFrame::from_texture(FrameFormat::new(8, 4, TextureKind::Texture2D), tex)
            .with_rotation(Rotation::Rotate90);
        let out = rotate.process(frame, &mut ctx).unwrap();
        assert_eq!((out.format.width, out.format.height), (8, 4));
    }

    #[test]
    fn test_mirror_flips_columns() {
        let mut ctx = context();
        let tex = source(&mut ctx, 4, 2);
        let mut rotate = RotateProcessor::new();
        let frame = VideoFrame::from_texture(FrameFormat::new(4, 2, TextureKind::Texture2D), tex)
            .with_mirrored(true);
        let out = rotate.process(frame, &mut ctx).unwrap();
        let image = ctx.device().read_texture(out.texture.unwrap()).unwrap();
        // red channel carries the source column
        assert_eq!(image.get_pixel(0, 0)[0], 3);
        assert_eq!(image.get_pixel(3, 0)[0], 0);
    }

    #[test]
    fn test_frame_without_texture_is_rejected() {
        let mut ctx = context();
        let mut rotate = RotateProcessor::new();
        let mut frame = VideoFrame::from_texture(FrameFormat::new(4, 2, TextureKind::Texture2D), crate::gpu::TextureId(0));
        frame.texture = None;
        assert!(rotate.process(frame, &mut ctx).is_err());
    }
}
