// SPDX-License-Identifier: GPL-3.0-only

//! Textured quad programs
//!
//! A [`TextureProgram`] draws one texture kind into whatever is currently
//! bound. An [`OffscreenProgram`] additionally owns a framebuffer/texture
//! pair sized to its output and hands back the rendered texture.

use crate::errors::{GpuError, GpuResult};
use crate::frame::TextureKind;
use crate::gpu::{FramebufferId, GpuDevice, QuadDraw, TextureId, check_gpu_error};
use crate::matrix::Mat4;
use crate::shaders::CachedDimensions;
use tracing::{debug, trace};

/// Uniform block of the quad shader
#[repr(C)]
#[derive(Debug, Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
pub struct QuadUniforms {
    pub mvp: [[f32; 4]; 4],
    pub tex_matrix: [[f32; 4]; 4],
    pub alpha: f32,
    pub _padding: [f32; 3],
}

impl QuadUniforms {
    pub fn from_draw(draw: &QuadDraw) -> Self {
        Self {
            mvp: draw.mvp.into(),
            tex_matrix: draw.tex_matrix.into(),
            alpha: draw.alpha,
            _padding: [0.0; 3],
        }
    }
}

/// Draws one texture kind with a texture transform and an MVP
#[derive(Debug, Clone, Copy)]
pub struct TextureProgram {
    kind: TextureKind,
}

impl TextureProgram {
    pub fn new(kind: TextureKind) -> Self {
        Self { kind }
    }

    pub fn kind(&self) -> TextureKind {
        self.kind
    }

    /// Draw `texture` into the currently bound target
    pub fn draw_frame(
        &self,
        device: &mut dyn GpuDevice,
        texture: TextureId,
        tex_matrix: &Mat4,
        mvp: &Mat4,
        alpha: f32,
    ) -> GpuResult<()> {
        device.draw_quad(&QuadDraw {
            texture,
            kind: self.kind,
            tex_matrix: *tex_matrix,
            mvp: *mvp,
            alpha,
        })?;
        check_gpu_error(device, "draw_frame")
    }
}

/// The 2D and external texture programs of one context
#[derive(Debug, Clone, Copy)]
pub struct ProgramSet {
    texture_2d: TextureProgram,
    external: TextureProgram,
}

impl Default for ProgramSet {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgramSet {
    pub fn new() -> Self {
        Self {
            texture_2d: TextureProgram::new(TextureKind::Texture2D),
            external: TextureProgram::new(TextureKind::External),
        }
    }

    pub fn program(&self, kind: TextureKind) -> &TextureProgram {
        match kind {
            TextureKind::Texture2D => &self.texture_2d,
            TextureKind::External => &self.external,
        }
    }
}

/// Program rendering into its own framebuffer
///
/// The framebuffer is only rebuilt when [`update`](Self::update) sees a new
/// size.
#[derive(Debug)]
pub struct OffscreenProgram {
    label: &'static str,
    program: TextureProgram,
    dims: CachedDimensions,
    texture: Option<TextureId>,
    framebuffer: Option<FramebufferId>,
}

impl OffscreenProgram {
    pub fn new(label: &'static str, kind: TextureKind) -> Self {
        Self {
            label,
            program: TextureProgram::new(kind),
            dims: CachedDimensions::default(),
            texture: None,
            framebuffer: None,
        }
    }

    pub fn kind(&self) -> TextureKind {
        self.program.kind()
    }

    /// Texture the framebuffer renders into, if allocated
    pub fn output_texture(&self) -> Option<TextureId> {
        self.texture
    }

    pub fn size(&self) -> (u32, u32) {
        (self.dims.width, self.dims.height)
    }

    pub fn is_allocated(&self) -> bool {
        self.framebuffer.is_some()
    }

    /// Make sure the framebuffer matches `width` x `height`
    pub fn update(&mut self, device: &mut dyn GpuDevice, width: u32, height: u32) -> GpuResult<()> {
        if self.is_allocated() && !self.dims.needs_update(width, height) {
            return Ok(());
        }
        if width == 0 || height == 0 {
            return Err(GpuError::Backend(format!(
                "{}: invalid framebuffer size {}x{}",
                self.label, width, height
            )));
        }

        debug!(program = self.label, width, height, "Allocating framebuffer");
        self.release(device);

        let texture = device.create_texture(width, height)?;
        check_gpu_error(device, "create_texture")?;
        let framebuffer = match device.create_framebuffer(texture) {
            Ok(fb) => fb,
            Err(err) => {
                device.delete_texture(texture);
                return Err(err);
            }
        };
        check_gpu_error(device, "create_framebuffer")?;

        self.texture = Some(texture);
        self.framebuffer = Some(framebuffer);
        self.dims.update(width, height);
        Ok(())
    }

    /// Bind the framebuffer and set the viewport to cover it
    pub fn begin(&self, device: &mut dyn GpuDevice) -> GpuResult<()> {
        let framebuffer = self
            .framebuffer
            .ok_or_else(|| GpuError::InvalidHandle(format!("{}: framebuffer not allocated", self.label)))?;
        device.bind_framebuffer(Some(framebuffer));
        device.viewport(0, 0, self.dims.width, self.dims.height);
        check_gpu_error(device, "bind_framebuffer")
    }

    /// Restore drawing into the current surface
    pub fn end(&self, device: &mut dyn GpuDevice) {
        device.bind_framebuffer(None);
    }

    /// Draw into the bound framebuffer with this program's texture kind
    pub fn draw(
        &self,
        device: &mut dyn GpuDevice,
        texture: TextureId,
        tex_matrix: &Mat4,
        mvp: &Mat4,
        alpha: f32,
    ) -> GpuResult<()> {
        self.program.draw_frame(device, texture, tex_matrix, mvp, alpha)
    }

    /// Render `texture` into the framebuffer and return the result texture
    pub fn draw_rotate_frame(
        &self,
        device: &mut dyn GpuDevice,
        texture: TextureId,
        tex_matrix: &Mat4,
        mvp: &Mat4,
    ) -> GpuResult<TextureId> {
        let output = self
            .texture
            .ok_or_else(|| GpuError::InvalidHandle(format!("{}: output not allocated", self.label)))?;
        self.begin(device)?;
        let result = self.draw(device, texture, tex_matrix, mvp, 1.0);
        self.end(device);
        result?;
        trace!(program = self.label, input = %texture, output = %output, "Off-screen pass");
        Ok(output)
    }

    /// Delete the framebuffer and its texture
    pub fn release(&mut self, device: &mut dyn GpuDevice) {
        if let Some(fb) = self.framebuffer.take() {
            device.delete_framebuffer(fb);
        }
        if let Some(tex) = self.texture.take() {
            device.delete_texture(tex);
        }
        self.dims.invalidate();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::software::SoftwareDevice;
    use crate::matrix;
    use image::{Rgba, RgbaImage};

    #[test]
    fn test_update_only_reallocates_on_size_change() {
        let mut device = SoftwareDevice::new("test");
        let mut program = OffscreenProgram::new("rotate", TextureKind::Texture2D);

        program.update(&mut device, 4, 4).unwrap();
        let first = program.output_texture();
        program.update(&mut device, 4, 4).unwrap();
        assert_eq!(program.output_texture(), first, "same size must reuse the framebuffer");

        program.update(&mut device, 8, 4).unwrap();
        assert_ne!(program.output_texture(), first);
        assert_eq!(program.size(), (8, 4));
        assert!(first.is_some_and(|tex| device.texture_size(tex).is_none()), "old texture deleted");
    }

    #[test]
    fn test_draw_rotate_frame_returns_output() {
        let mut device = SoftwareDevice::new("test");
        let src = device.create_texture(2, 2).unwrap();
        device
            .upload_texture(src, &RgbaImage::from_pixel(2, 2, Rgba([9, 8, 7, 255])))
            .unwrap();

        let mut program = OffscreenProgram::new("rotate", TextureKind::External);
        program.update(&mut device, 2, 2).unwrap();
        let out = program
            .draw_rotate_frame(&mut device, src, &matrix::identity(), &matrix::identity())
            .unwrap();
        assert_eq!(Some(out), program.output_texture());
        assert_eq!(device.read_texture(out).unwrap().get_pixel(1, 1), &Rgba([9, 8, 7, 255]));
    }

    #[test]
    fn test_unallocated_program_fails() {
        let mut device = SoftwareDevice::new("test");
        let program = OffscreenProgram::new("watermark", TextureKind::Texture2D);
        assert!(program.begin(&mut device).is_err());
    }

    #[test]
    fn test_release_frees_resources() {
        let mut device = SoftwareDevice::new("test");
        let mut program = OffscreenProgram::new("watermark", TextureKind::Texture2D);
        program.update(&mut device, 3, 3).unwrap();
        let tex = program.output_texture().unwrap();
        program.release(&mut device);
        assert!(!program.is_allocated());
        assert!(device.texture_size(tex).is_none());
        assert!(device.check_error().is_none());
    }
}
