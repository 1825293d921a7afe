// SPDX-License-Identifier: GPL-3.0-only

//! Frame types flowing through a channel
//!
//! A [`VideoFrame`] is created by the capture side, handed to the channel
//! thread through the producer mailbox and then passed by value from stage
//! to stage. Each stage documents which fields it rewrites; the timestamp
//! never changes once the frame exists.

use crate::constants::CameraFacing;
use crate::errors::GpuResult;
use crate::gpu::{GpuDevice, TextureId};
use crate::matrix::{self, Mat4};
use image::RgbaImage;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;
use tracing::debug;

/// How a texture is sampled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TextureKind {
    /// Regular 2D texture, e.g. a framebuffer output
    #[default]
    Texture2D,
    /// Externally produced image stream (camera preview texture)
    External,
}

/// Layout of the CPU side pixel buffer, if any
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PixelFormat {
    /// No CPU buffer or unknown layout
    #[default]
    Unknown,
    /// 8-bit RGBA, 4 bytes per pixel
    Rgba,
    /// Y plane followed by interleaved VU
    Nv21,
    /// Y, U and V planes
    I420,
}

/// Rotation that brings a frame upright, clockwise
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Rotation {
    #[default]
    None,
    Rotate90,
    Rotate180,
    Rotate270,
}

impl Rotation {
    pub const ALL: [Rotation; 4] = [
        Rotation::None,
        Rotation::Rotate90,
        Rotation::Rotate180,
        Rotation::Rotate270,
    ];

    /// Create rotation from an integer degree value (normalised to 0-360).
    ///
    /// Values that are not multiples of 90 map to `None`.
    pub fn from_degrees_int(degrees: i32) -> Self {
        match degrees.rem_euclid(360) {
            90 => Rotation::Rotate90,
            180 => Rotation::Rotate180,
            270 => Rotation::Rotate270,
            _ => Rotation::None,
        }
    }

    /// Get the rotation in degrees
    pub fn degrees(&self) -> u32 {
        match self {
            Rotation::None => 0,
            Rotation::Rotate90 => 90,
            Rotation::Rotate180 => 180,
            Rotation::Rotate270 => 270,
        }
    }

    /// Check if rotation swaps width and height
    pub fn swaps_dimensions(&self) -> bool {
        matches!(self, Rotation::Rotate90 | Rotation::Rotate270)
    }
}

impl std::fmt::Display for Rotation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}°", self.degrees())
    }
}

/// Size and layout of a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameFormat {
    pub width: u32,
    pub height: u32,
    pub pixel_format: PixelFormat,
    pub texture_kind: TextureKind,
    pub facing: CameraFacing,
}

impl FrameFormat {
    pub fn new(width: u32, height: u32, texture_kind: TextureKind) -> Self {
        Self {
            width,
            height,
            pixel_format: PixelFormat::Unknown,
            texture_kind,
            facing: CameraFacing::default(),
        }
    }
}

/// Result of making a deferred image current
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TexImage {
    pub texture: TextureId,
    /// Transform the producer reports for the image's texture coordinates
    pub transform: Mat4,
}

/// Source of images that only become sampleable on the GPU thread
///
/// `update_tex_image` is the equivalent of latching a surface texture: it
/// must run on the thread that owns `device`.
pub trait TexImageSource: Send + Sync {
    fn update_tex_image(&self, device: &mut dyn GpuDevice) -> GpuResult<TexImage>;
}

/// Vertical flip of texture coordinates (t -> 1 - t)
///
/// Camera streams store the top row first, so their reported transform
/// carries this flip.
pub fn flip_t_transform() -> Mat4 {
    Mat4::new(
        1.0, 0.0, 0.0, 0.0, //
        0.0, -1.0, 0.0, 1.0, //
        0.0, 0.0, 1.0, 0.0, //
        0.0, 0.0, 0.0, 1.0,
    )
}

struct ImageSourceState {
    pending: Option<Arc<RgbaImage>>,
    texture: Option<(u64, TextureId)>,
}

/// Latest-image texture stream fed from CPU images
///
/// Images are stored top row first and reported with [`flip_t_transform`],
/// like a camera preview texture.
pub struct ImageTextureSource {
    state: Mutex<ImageSourceState>,
}

impl Default for ImageTextureSource {
    fn default() -> Self {
        Self {
            state: Mutex::new(ImageSourceState {
                pending: None,
                texture: None,
            }),
        }
    }
}

impl ImageTextureSource {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queue `image` to become the texture content on the next update
    pub fn submit(&self, image: Arc<RgbaImage>) {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pending = Some(image);
    }
}

impl TexImageSource for ImageTextureSource {
    fn update_tex_image(&self, device: &mut dyn GpuDevice) -> GpuResult<TexImage> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);

        // A texture from another context (channel restarted) is useless here
        let texture = match state.texture {
            Some((namespace, texture)) if namespace == device.namespace() => texture,
            _ => {
                let texture = device.create_texture(1, 1)?;
                debug!(texture = %texture, "Created stream texture");
                state.texture = Some((device.namespace(), texture));
                texture
            }
        };

        if let Some(image) = state.pending.take() {
            device.upload_texture(texture, &image)?;
        }

        Ok(TexImage {
            texture,
            transform: flip_t_transform(),
        })
    }
}

/// One frame in the pipeline
#[derive(Clone)]
pub struct VideoFrame {
    pub format: FrameFormat,
    /// GPU texture holding the image, once known
    pub texture: Option<TextureId>,
    /// Transform applied to texture coordinates when sampling `texture`
    pub texture_transform: Mat4,
    /// CPU pixels, for producers that deliver buffers instead of textures
    pub image: Option<Arc<RgbaImage>>,
    /// Clockwise rotation needed to show the frame upright
    pub rotation: Rotation,
    /// Whether the image is horizontally mirrored
    pub mirrored: bool,
    pub timestamp: Instant,
    /// Deferred image to latch on the channel thread
    pub tex_image: Option<Arc<dyn TexImageSource>>,
}

impl VideoFrame {
    /// Frame whose texture is already current
    pub fn from_texture(format: FrameFormat, texture: TextureId) -> Self {
        Self {
            format,
            texture: Some(texture),
            texture_transform: matrix::identity(),
            image: None,
            rotation: Rotation::None,
            mirrored: false,
            timestamp: Instant::now(),
            tex_image: None,
        }
    }

    /// Frame whose texture is latched from `source` on the channel thread
    pub fn from_source(format: FrameFormat, source: Arc<dyn TexImageSource>) -> Self {
        Self {
            format,
            texture: None,
            texture_transform: matrix::identity(),
            image: None,
            rotation: Rotation::None,
            mirrored: false,
            timestamp: Instant::now(),
            tex_image: Some(source),
        }
    }

    /// Frame carrying CPU pixels; the channel uploads them
    pub fn from_image(format: FrameFormat, image: Arc<RgbaImage>) -> Self {
        Self {
            format: FrameFormat {
                pixel_format: PixelFormat::Rgba,
                ..format
            },
            texture: None,
            texture_transform: matrix::identity(),
            image: Some(image),
            rotation: Rotation::None,
            mirrored: false,
            timestamp: Instant::now(),
            tex_image: None,
        }
    }

    pub fn with_rotation(mut self, rotation: Rotation) -> Self {
        self.rotation = rotation;
        self
    }

    pub fn with_mirrored(mut self, mirrored: bool) -> Self {
        self.mirrored = mirrored;
        self
    }

    pub fn with_image(mut self, image: Arc<RgbaImage>) -> Self {
        self.format.pixel_format = PixelFormat::Rgba;
        self.image = Some(image);
        self
    }

    /// Width and height after the pending rotation is applied
    pub fn upright_size(&self) -> (u32, u32) {
        if self.rotation.swaps_dimensions() {
            (self.format.height, self.format.width)
        } else {
            (self.format.width, self.format.height)
        }
    }
}

impl std::fmt::Debug for VideoFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VideoFrame")
            .field("format", &self.format)
            .field("texture", &self.texture)
            .field("rotation", &self.rotation)
            .field("mirrored", &self.mirrored)
            .field("has_image", &self.image.is_some())
            .field("has_tex_image", &self.tex_image.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::software::SoftwareDevice;
    use nalgebra::Vector4;

    #[test]
    fn test_rotation_from_degrees() {
        assert_eq!(Rotation::from_degrees_int(-90), Rotation::Rotate270);
        assert_eq!(Rotation::from_degrees_int(450), Rotation::Rotate90);
        assert_eq!(Rotation::from_degrees_int(45), Rotation::None);
        assert!(Rotation::Rotate270.swaps_dimensions());
        assert!(!Rotation::Rotate180.swaps_dimensions());
    }

    #[test]
    fn test_flip_t_transform() {
        let tc = flip_t_transform() * Vector4::new(0.25, 0.25, 0.0, 1.0);
        assert_eq!((tc.x, tc.y), (0.25, 0.75));
    }

    #[test]
    fn test_image_source_uploads_latest() {
        let mut device = SoftwareDevice::new("test");
        let source = ImageTextureSource::new();
        source.submit(Arc::new(RgbaImage::new(4, 2)));
        source.submit(Arc::new(RgbaImage::new(6, 3)));

        let first = source.update_tex_image(&mut device).unwrap();
        assert_eq!(device.texture_size(first.texture), Some((6, 3)));

        // no new image keeps the same texture and content
        let second = source.update_tex_image(&mut device).unwrap();
        assert_eq!(first.texture, second.texture);
    }

    #[test]
    fn test_image_source_recreates_texture_for_new_context() {
        let source = ImageTextureSource::new();
        let mut first = SoftwareDevice::new("a");
        let mut second = SoftwareDevice::new("b");
        source.update_tex_image(&mut first).unwrap();
        let tex = source.update_tex_image(&mut second).unwrap().texture;
        assert!(second.texture_size(tex).is_some());
    }

    #[test]
    fn test_upright_size() {
        let frame = VideoFrame::from_texture(FrameFormat::new(640, 480, TextureKind::External), TextureId(1))
            .with_rotation(Rotation::Rotate90);
        assert_eq!(frame.upright_size(), (480, 640));
    }
}
