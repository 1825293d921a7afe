// SPDX-License-Identifier: GPL-3.0-only

//! Transform derivation for quads and texture coordinates
//!
//! [`MatrixOperator`] turns a small set of layout parameters (scale type,
//! scale ratio, translation, rotation, flips) plus a display/source size
//! pair into one 4x4 matrix. Two spaces are supported:
//!
//! - [`MatrixSpace::Vertex`]: the matrix multiplies quad positions in
//!   normalized device coordinates. Used as the MVP of every draw.
//! - [`MatrixSpace::Texture`]: the matrix multiplies texture coordinates
//!   around the texture center (0.5, 0.5). Used to rotate or mirror the
//!   sampled image and to compose a hardware supplied texture transform.
//!
//! Matrices are column vectors (`gl_Position = mvp * pos`), the same layout
//! the shaders consume.

use nalgebra::{Matrix4, Vector3};
use serde::{Deserialize, Serialize};

/// 4x4 single precision matrix used throughout the pipeline
pub type Mat4 = Matrix4<f32>;

/// How a source rectangle is fitted into a display rectangle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ScaleType {
    /// Cover the display, cropping what overflows
    #[default]
    CenterCrop,
    /// Fit inside the display, leaving letterbox bars
    FitCenter,
    /// Stretch to the display
    FitXY,
}

/// Coordinate space the derived matrix operates in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatrixSpace {
    Vertex,
    Texture,
}

/// Identity matrix
pub fn identity() -> Mat4 {
    Mat4::identity()
}

/// Rotation about Z by `degrees`, counter-clockwise for positive values.
///
/// Multiples of 90 produce exact 0/1 entries.
pub fn rotation_z(degrees: f32) -> Mat4 {
    let (sin, cos) = exact_sin_cos(degrees);
    Mat4::new(
        cos, -sin, 0.0, 0.0, //
        sin, cos, 0.0, 0.0, //
        0.0, 0.0, 1.0, 0.0, //
        0.0, 0.0, 0.0, 1.0,
    )
}

/// `mvp` followed by a 180 degree rotation about the Y axis, which mirrors
/// the quad horizontally.
pub fn mirror_about_y(mvp: &Mat4) -> Mat4 {
    mvp * Mat4::new_nonuniform_scaling(&Vector3::new(-1.0, 1.0, -1.0))
}

fn scaling(x: f32, y: f32) -> Mat4 {
    Mat4::new_nonuniform_scaling(&Vector3::new(x, y, 1.0))
}

fn translation(x: f32, y: f32) -> Mat4 {
    Mat4::new_translation(&Vector3::new(x, y, 0.0))
}

fn exact_sin_cos(degrees: f32) -> (f32, f32) {
    let normalized = degrees.rem_euclid(360.0);
    if normalized == 0.0 {
        (0.0, 1.0)
    } else if normalized == 90.0 {
        (1.0, 0.0)
    } else if normalized == 180.0 {
        (0.0, -1.0)
    } else if normalized == 270.0 {
        (-1.0, 0.0)
    } else {
        normalized.to_radians().sin_cos()
    }
}

/// Stateful transform builder
///
/// Every setter is a no-op when the value is unchanged; otherwise the final
/// matrix is rebuilt before the setter returns, so a reader never sees a
/// matrix derived from a mix of old and new fields.
#[derive(Debug, Clone, PartialEq)]
pub struct MatrixOperator {
    space: MatrixSpace,
    scale_type: ScaleType,
    display_width: u32,
    display_height: u32,
    source_width: u32,
    source_height: u32,
    scale_ratio: f32,
    translate_x: f32,
    translate_y: f32,
    rotation: f32,
    flip_h: bool,
    flip_v: bool,
    pre_flip_h: bool,
    pre_flip_v: bool,
    transform: Mat4,
    base_scale: (f32, f32),
    final_matrix: Mat4,
    recompute_count: u64,
}

impl MatrixOperator {
    pub fn new(space: MatrixSpace, scale_type: ScaleType) -> Self {
        Self {
            space,
            scale_type,
            display_width: 0,
            display_height: 0,
            source_width: 0,
            source_height: 0,
            scale_ratio: 1.0,
            translate_x: 0.0,
            translate_y: 0.0,
            rotation: 0.0,
            flip_h: false,
            flip_v: false,
            pre_flip_h: false,
            pre_flip_v: false,
            transform: Mat4::identity(),
            base_scale: (1.0, 1.0),
            final_matrix: Mat4::identity(),
            recompute_count: 0,
        }
    }

    /// Operator producing an MVP for quad vertices
    pub fn vertex(scale_type: ScaleType) -> Self {
        Self::new(MatrixSpace::Vertex, scale_type)
    }

    /// Operator producing a texture coordinate transform
    pub fn texture(scale_type: ScaleType) -> Self {
        Self::new(MatrixSpace::Texture, scale_type)
    }

    /// Set the display and source sizes the scale type is evaluated against
    pub fn update(&mut self, display_width: u32, display_height: u32, source_width: u32, source_height: u32) {
        if self.display_width == display_width
            && self.display_height == display_height
            && self.source_width == source_width
            && self.source_height == source_height
        {
            return;
        }
        self.display_width = display_width;
        self.display_height = display_height;
        self.source_width = source_width;
        self.source_height = source_height;
        self.recompute();
    }

    pub fn set_scale_type(&mut self, scale_type: ScaleType) {
        if self.scale_type == scale_type {
            return;
        }
        self.scale_type = scale_type;
        self.recompute();
    }

    pub fn set_scale_ratio(&mut self, ratio: f32) {
        if self.scale_ratio == ratio {
            return;
        }
        self.scale_ratio = ratio;
        self.recompute();
    }

    /// Horizontal offset in normalized units; +-1 puts the scaled content
    /// flush against the right/left edge.
    pub fn set_translate_x(&mut self, translate: f32) {
        if self.translate_x == translate {
            return;
        }
        self.translate_x = translate;
        self.recompute();
    }

    /// Vertical offset in normalized units
    pub fn set_translate_y(&mut self, translate: f32) {
        if self.translate_y == translate {
            return;
        }
        self.translate_y = translate;
        self.recompute();
    }

    /// Rotation in degrees
    pub fn set_rotation(&mut self, rotation: f32) {
        if self.rotation == rotation {
            return;
        }
        self.rotation = rotation;
        self.recompute();
    }

    pub fn set_flip_h(&mut self, flip: bool) {
        if self.flip_h == flip {
            return;
        }
        self.flip_h = flip;
        self.recompute();
    }

    pub fn set_flip_v(&mut self, flip: bool) {
        if self.flip_v == flip {
            return;
        }
        self.flip_v = flip;
        self.recompute();
    }

    pub fn set_pre_flip_h(&mut self, flip: bool) {
        if self.pre_flip_h == flip {
            return;
        }
        self.pre_flip_h = flip;
        self.recompute();
    }

    pub fn set_pre_flip_v(&mut self, flip: bool) {
        if self.pre_flip_v == flip {
            return;
        }
        self.pre_flip_v = flip;
        self.recompute();
    }

    /// Externally supplied base transform, e.g. the texture transform a
    /// camera reports for its latest image. Compared element-wise.
    pub fn set_transform_matrix(&mut self, transform: &Mat4) {
        if self.transform == *transform {
            return;
        }
        self.transform = *transform;
        self.recompute();
    }

    /// Restore every parameter to its initial value, keeping the scale type
    pub fn reset(&mut self) {
        *self = Self {
            recompute_count: self.recompute_count,
            ..Self::new(self.space, self.scale_type)
        };
    }

    /// Copy of the derived matrix
    pub fn final_matrix(&self) -> Mat4 {
        self.final_matrix
    }

    pub fn transform_matrix(&self) -> Mat4 {
        self.transform
    }

    pub fn space(&self) -> MatrixSpace {
        self.space
    }

    pub fn scale_type(&self) -> ScaleType {
        self.scale_type
    }

    pub fn scale_ratio(&self) -> f32 {
        self.scale_ratio
    }

    pub fn translate_x(&self) -> f32 {
        self.translate_x
    }

    pub fn translate_y(&self) -> f32 {
        self.translate_y
    }

    pub fn rotation(&self) -> f32 {
        self.rotation
    }

    pub fn is_flip_h(&self) -> bool {
        self.flip_h
    }

    pub fn is_flip_v(&self) -> bool {
        self.flip_v
    }

    pub fn is_pre_flip_h(&self) -> bool {
        self.pre_flip_h
    }

    pub fn is_pre_flip_v(&self) -> bool {
        self.pre_flip_v
    }

    /// Number of times the final matrix has been rebuilt
    pub fn recompute_count(&self) -> u64 {
        self.recompute_count
    }

    /// Scale factors derived from the scale type alone (before the ratio)
    pub fn base_scale(&self) -> (f32, f32) {
        self.base_scale
    }

    /// Flips after the axis swap a quarter-turn rotation implies
    pub fn effective_flips(&self) -> (bool, bool) {
        if self.rotation % 180.0 != 0.0 {
            (self.flip_v, self.flip_h)
        } else {
            (self.flip_h, self.flip_v)
        }
    }

    /// Rotation actually applied; negated when exactly one flip is active
    /// so the visual direction stays the same under mirroring.
    pub fn effective_rotation(&self) -> f32 {
        let (flip_h, flip_v) = self.effective_flips();
        if flip_h != flip_v {
            -self.rotation
        } else {
            self.rotation
        }
    }

    /// Source-pixel to display-pixel scale on each axis.
    ///
    /// For a vertex operator the quad spans `base_scale * display` pixels,
    /// so this is how much each source pixel is magnified on screen.
    pub fn content_scale(&self) -> (f32, f32) {
        if self.source_width == 0 || self.source_height == 0 {
            return (1.0, 1.0);
        }
        let (sx, sy) = self.base_scale;
        match self.space {
            MatrixSpace::Vertex => (
                sx * self.display_width as f32 / self.source_width as f32,
                sy * self.display_height as f32 / self.source_height as f32,
            ),
            // A texture operator samples `base_scale` of the source over the
            // full display.
            MatrixSpace::Texture => (
                self.display_width as f32 / (sx * self.source_width as f32),
                self.display_height as f32 / (sy * self.source_height as f32),
            ),
        }
    }

    fn sizes_known(&self) -> bool {
        self.display_width > 0 && self.display_height > 0 && self.source_width > 0 && self.source_height > 0
    }

    fn compute_base_scale(&self) -> (f32, f32) {
        if !self.sizes_known() {
            return (1.0, 1.0);
        }
        let display_aspect = self.display_width as f32 / self.display_height as f32;
        let source_aspect = self.source_width as f32 / self.source_height as f32;

        match (self.space, self.scale_type) {
            (_, ScaleType::FitXY) => (1.0, 1.0),
            (MatrixSpace::Vertex, ScaleType::CenterCrop) => {
                // > 1 when the display is relatively wider than the source
                let scale = display_aspect / source_aspect;
                if scale > 1.0 { (1.0, scale) } else { (1.0 / scale, 1.0) }
            }
            (MatrixSpace::Vertex, ScaleType::FitCenter) => {
                let scale = display_aspect / source_aspect;
                if scale < 1.0 { (1.0, scale) } else { (1.0 / scale, 1.0) }
            }
            (MatrixSpace::Texture, ScaleType::CenterCrop) => {
                if source_aspect > display_aspect {
                    (display_aspect / source_aspect, 1.0)
                } else {
                    (1.0, source_aspect / display_aspect)
                }
            }
            (MatrixSpace::Texture, ScaleType::FitCenter) => {
                if source_aspect < display_aspect {
                    (display_aspect / source_aspect, 1.0)
                } else {
                    (1.0, source_aspect / display_aspect)
                }
            }
        }
    }

    fn recompute(&mut self) {
        self.recompute_count += 1;
        self.base_scale = self.compute_base_scale();
        self.final_matrix = match self.space {
            MatrixSpace::Vertex => self.vertex_matrix(),
            MatrixSpace::Texture => self.texture_matrix(),
        };
    }

    fn pre_flip(&self) -> Mat4 {
        scaling(
            if self.pre_flip_h { -1.0 } else { 1.0 },
            if self.pre_flip_v { -1.0 } else { 1.0 },
        )
    }

    fn flip(&self) -> Mat4 {
        let (flip_h, flip_v) = self.effective_flips();
        scaling(if flip_h { -1.0 } else { 1.0 }, if flip_v { -1.0 } else { 1.0 })
    }

    /// pre-flip, scale, translate, flip, rotate; then the base transform
    fn vertex_matrix(&self) -> Mat4 {
        let sx = self.base_scale.0 * self.scale_ratio;
        let sy = self.base_scale.1 * self.scale_ratio;

        let mut m = self.pre_flip();
        if sx != 1.0 || sy != 1.0 {
            m *= scaling(sx, sy);
        }
        if (self.translate_x != 0.0 || self.translate_y != 0.0) && sx != 0.0 && sy != 0.0 {
            // Expressed in pre-scale units so +-1 aligns the scaled quad with an edge
            m *= translation(
                self.translate_x * (1.0 - sx) / sx,
                self.translate_y * (1.0 - sy) / sy,
            );
        }
        m *= self.flip();
        let rotation = self.effective_rotation();
        if rotation != 0.0 {
            m *= rotation_z(rotation);
        }
        m * self.transform
    }

    /// Same parameters applied around the texture center. The base
    /// transform is applied last to the resulting coordinates.
    fn texture_matrix(&self) -> Mat4 {
        let sx = self.base_scale.0 * self.scale_ratio;
        let sy = self.base_scale.1 * self.scale_ratio;

        let m = translation(0.5, 0.5)
            * self.pre_flip()
            * rotation_z(self.effective_rotation())
            * self.flip()
            * scaling(sx, sy)
            * translation(-0.5, -0.5)
            * translation(self.translate_x, self.translate_y);
        self.transform * m
    }
}
