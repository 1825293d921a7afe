// SPDX-License-Identifier: GPL-3.0-only

//! CPU reference implementation of [`GpuDevice`]
//!
//! Images are stored bottom row first, so pixel `(x, y)` of a texture is
//! the texel at `t = (y + 0.5) / height`. Sampling is nearest neighbour
//! with clamp-to-edge. The rasterizer inverts the quad's MVP per pixel,
//! which keeps the output exact for the axis-aligned and quarter-turn
//! transforms the pipeline produces.

use super::{
    BackendKind, FramebufferId, GpuDevice, GpuDeviceInfo, NativeWindow, QuadDraw, SurfaceId,
    TextureId, next_namespace,
};
use crate::errors::{GpuError, GpuResult};
use image::{Rgba, RgbaImage, imageops};
use nalgebra::{Matrix3, Vector3, Vector4};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, trace};

enum SurfaceBacking {
    Window(Arc<dyn NativeWindow>),
    Offscreen,
}

struct SoftSurface {
    backing: SurfaceBacking,
    back_buffer: RgbaImage,
}

/// Resources visible to every context in the namespace
#[derive(Default)]
struct SharedStore {
    next_id: u32,
    textures: HashMap<TextureId, RgbaImage>,
    framebuffers: HashMap<FramebufferId, TextureId>,
    surfaces: HashMap<SurfaceId, SoftSurface>,
}

impl SharedStore {
    fn allocate_id(&mut self) -> u32 {
        self.next_id += 1;
        self.next_id
    }
}

/// Destination of a draw
#[derive(Clone, Copy)]
enum DrawTarget {
    Texture(TextureId),
    Surface(SurfaceId),
}

pub struct SoftwareDevice {
    info: GpuDeviceInfo,
    namespace: u64,
    store: Arc<Mutex<SharedStore>>,
    current: Option<SurfaceId>,
    framebuffer: Option<FramebufferId>,
    viewport: (i32, i32, u32, u32),
    blend: bool,
    error: Option<GpuError>,
}

impl SoftwareDevice {
    pub fn new(label: &str) -> Self {
        debug!(label, "Creating software device");
        Self {
            info: GpuDeviceInfo {
                adapter_name: format!("software ({})", label),
                backend: BackendKind::Software,
            },
            namespace: next_namespace(),
            store: Arc::new(Mutex::new(SharedStore::default())),
            current: None,
            framebuffer: None,
            viewport: (0, 0, 0, 0),
            blend: false,
            error: None,
        }
    }

    fn store(&self) -> MutexGuard<'_, SharedStore> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&mut self, err: GpuError) {
        if self.error.is_none() {
            self.error = Some(err);
        }
    }

    fn draw_target(&self) -> GpuResult<DrawTarget> {
        if let Some(fb) = self.framebuffer {
            let store = self.store();
            return store
                .framebuffers
                .get(&fb)
                .map(|tex| DrawTarget::Texture(*tex))
                .ok_or_else(|| GpuError::InvalidHandle(format!("framebuffer {}", fb.0)));
        }
        self.current
            .map(DrawTarget::Surface)
            .ok_or(GpuError::NoCurrentSurface)
    }

    /// Window surfaces follow their window's size like EGL surfaces do
    fn sync_window_size(surface: &mut SoftSurface) {
        if let SurfaceBacking::Window(window) = &surface.backing {
            let (width, height) = window.size();
            if width > 0
                && height > 0
                && (surface.back_buffer.width(), surface.back_buffer.height()) != (width, height)
            {
                trace!(width, height, "Resizing window back buffer");
                surface.back_buffer = RgbaImage::new(width, height);
            }
        }
    }
}

fn homography(mvp: &crate::matrix::Mat4) -> Matrix3<f32> {
    // Quad vertices have z = 0, so only columns x, y, w contribute
    Matrix3::new(
        mvp[(0, 0)], mvp[(0, 1)], mvp[(0, 3)], //
        mvp[(1, 0)], mvp[(1, 1)], mvp[(1, 3)], //
        mvp[(3, 0)], mvp[(3, 1)], mvp[(3, 3)],
    )
}

fn blend_channel(src: f32, dst: f32, alpha: f32) -> u8 {
    (src * alpha + dst * (1.0 - alpha)).round().clamp(0.0, 255.0) as u8
}

/// Rasterize one quad into `dst`
fn rasterize(
    dst: &mut RgbaImage,
    src: &RgbaImage,
    draw: &QuadDraw,
    viewport: (i32, i32, u32, u32),
    blend: bool,
) {
    let (vx, vy, vw, vh) = viewport;
    if vw == 0 || vh == 0 || src.width() == 0 || src.height() == 0 {
        return;
    }
    let Some(inverse) = homography(&draw.mvp).try_inverse() else {
        trace!("Degenerate MVP, nothing drawn");
        return;
    };

    let x_start = vx.max(0) as u32;
    let y_start = vy.max(0) as u32;
    let x_end = ((vx as i64 + vw as i64).min(dst.width() as i64)).max(0) as u32;
    let y_end = ((vy as i64 + vh as i64).min(dst.height() as i64)).max(0) as u32;
    let (sw, sh) = (src.width(), src.height());
    const EDGE: f32 = 1e-5;

    for py in y_start..y_end {
        let ndc_y = ((py as i32 - vy) as f32 + 0.5) / vh as f32 * 2.0 - 1.0;
        for px in x_start..x_end {
            let ndc_x = ((px as i32 - vx) as f32 + 0.5) / vw as f32 * 2.0 - 1.0;
            let p = inverse * Vector3::new(ndc_x, ndc_y, 1.0);
            if p.z.abs() < f32::EPSILON {
                continue;
            }
            let (u, v) = (p.x / p.z, p.y / p.z);
            if u < -1.0 - EDGE || u > 1.0 + EDGE || v < -1.0 - EDGE || v > 1.0 + EDGE {
                continue;
            }

            let tc = draw.tex_matrix * Vector4::new((u + 1.0) * 0.5, (v + 1.0) * 0.5, 0.0, 1.0);
            let sx = ((tc.x * sw as f32).floor() as i64).clamp(0, sw as i64 - 1) as u32;
            let sy = ((tc.y * sh as f32).floor() as i64).clamp(0, sh as i64 - 1) as u32;
            let texel = src.get_pixel(sx, sy);
            let alpha = (texel[3] as f32 / 255.0) * draw.alpha.clamp(0.0, 1.0);

            let out = if blend {
                let under = dst.get_pixel(px, py);
                Rgba([
                    blend_channel(texel[0] as f32, under[0] as f32, alpha),
                    blend_channel(texel[1] as f32, under[1] as f32, alpha),
                    blend_channel(texel[2] as f32, under[2] as f32, alpha),
                    blend_channel(alpha * 255.0, under[3] as f32, alpha),
                ])
            } else {
                Rgba([texel[0], texel[1], texel[2], (alpha * 255.0).round() as u8])
            };
            dst.put_pixel(px, py, out);
        }
    }
}

impl GpuDevice for SoftwareDevice {
    fn info(&self) -> &GpuDeviceInfo {
        &self.info
    }

    fn namespace(&self) -> u64 {
        self.namespace
    }

    fn create_texture(&mut self, width: u32, height: u32) -> GpuResult<TextureId> {
        if width == 0 || height == 0 {
            return Err(GpuError::Backend(format!("invalid texture size {}x{}", width, height)));
        }
        let mut store = self.store();
        let id = TextureId(store.allocate_id());
        store.textures.insert(id, RgbaImage::new(width, height));
        trace!(texture = id.0, width, height, "Texture created");
        Ok(id)
    }

    fn upload_texture(&mut self, texture: TextureId, image: &RgbaImage) -> GpuResult<()> {
        let mut store = self.store();
        match store.textures.get_mut(&texture) {
            Some(storage) => {
                *storage = image.clone();
                Ok(())
            }
            None => Err(GpuError::InvalidHandle(texture.to_string())),
        }
    }

    fn texture_size(&self, texture: TextureId) -> Option<(u32, u32)> {
        self.store().textures.get(&texture).map(|img| img.dimensions())
    }

    fn delete_texture(&mut self, texture: TextureId) {
        let removed = self.store().textures.remove(&texture).is_some();
        if !removed {
            self.record(GpuError::InvalidHandle(texture.to_string()));
        }
    }

    fn read_texture(&mut self, texture: TextureId) -> GpuResult<RgbaImage> {
        let store = self.store();
        store
            .textures
            .get(&texture)
            .map(imageops::flip_vertical)
            .ok_or_else(|| GpuError::InvalidHandle(texture.to_string()))
    }

    fn create_framebuffer(&mut self, texture: TextureId) -> GpuResult<FramebufferId> {
        let mut store = self.store();
        if !store.textures.contains_key(&texture) {
            return Err(GpuError::InvalidHandle(texture.to_string()));
        }
        let id = FramebufferId(store.allocate_id());
        store.framebuffers.insert(id, texture);
        Ok(id)
    }

    fn delete_framebuffer(&mut self, framebuffer: FramebufferId) {
        if self.framebuffer == Some(framebuffer) {
            self.framebuffer = None;
        }
        let removed = self.store().framebuffers.remove(&framebuffer).is_some();
        if !removed {
            self.record(GpuError::InvalidHandle(format!("framebuffer {}", framebuffer.0)));
        }
    }

    fn bind_framebuffer(&mut self, framebuffer: Option<FramebufferId>) {
        if let Some(fb) = framebuffer {
            if !self.store().framebuffers.contains_key(&fb) {
                self.record(GpuError::InvalidHandle(format!("framebuffer {}", fb.0)));
                return;
            }
        }
        self.framebuffer = framebuffer;
    }

    fn create_window_surface(&mut self, window: Arc<dyn NativeWindow>) -> GpuResult<SurfaceId> {
        if !window.is_valid() {
            return Err(GpuError::SurfaceCreation("window is no longer valid".into()));
        }
        let (width, height) = window.size();
        if width == 0 || height == 0 {
            return Err(GpuError::SurfaceCreation(format!(
                "window has no size ({}x{})",
                width, height
            )));
        }
        let mut store = self.store();
        let id = SurfaceId(store.allocate_id());
        store.surfaces.insert(
            id,
            SoftSurface {
                backing: SurfaceBacking::Window(window),
                back_buffer: RgbaImage::new(width, height),
            },
        );
        debug!(surface = id.0, width, height, "Window surface created");
        Ok(id)
    }

    fn create_offscreen_surface(&mut self, width: u32, height: u32) -> GpuResult<SurfaceId> {
        let mut store = self.store();
        let id = SurfaceId(store.allocate_id());
        store.surfaces.insert(
            id,
            SoftSurface {
                backing: SurfaceBacking::Offscreen,
                back_buffer: RgbaImage::new(width.max(1), height.max(1)),
            },
        );
        Ok(id)
    }

    fn release_surface(&mut self, surface: SurfaceId) {
        if self.current == Some(surface) {
            self.current = None;
        }
        self.store().surfaces.remove(&surface);
    }

    fn make_current(&mut self, surface: SurfaceId) -> GpuResult<()> {
        let mut store = self.store();
        let Some(entry) = store.surfaces.get_mut(&surface) else {
            return Err(GpuError::InvalidHandle(format!("surface {}", surface.0)));
        };
        if let SurfaceBacking::Window(window) = &entry.backing {
            if !window.is_valid() {
                return Err(GpuError::SurfaceCreation("window is no longer valid".into()));
            }
        }
        Self::sync_window_size(entry);
        drop(store);
        self.current = Some(surface);
        Ok(())
    }

    fn make_nothing_current(&mut self) {
        self.current = None;
        self.framebuffer = None;
    }

    fn current_surface(&self) -> Option<SurfaceId> {
        self.current
    }

    fn swap_buffers(&mut self, surface: SurfaceId) -> GpuResult<()> {
        let store = self.store();
        let Some(entry) = store.surfaces.get(&surface) else {
            return Err(GpuError::InvalidHandle(format!("surface {}", surface.0)));
        };
        match &entry.backing {
            SurfaceBacking::Window(window) => window
                .present(imageops::flip_vertical(&entry.back_buffer))
                .map_err(GpuError::Backend),
            SurfaceBacking::Offscreen => Ok(()),
        }
    }

    fn viewport(&mut self, x: i32, y: i32, width: u32, height: u32) {
        self.viewport = (x, y, width, height);
    }

    fn clear(&mut self, color: [f32; 4]) {
        let target = match self.draw_target() {
            Ok(target) => target,
            Err(err) => {
                self.record(err);
                return;
            }
        };
        let pixel = Rgba(color.map(|c| (c.clamp(0.0, 1.0) * 255.0).round() as u8));
        let mut store = self.store();
        let image = match target {
            DrawTarget::Texture(tex) => store.textures.get_mut(&tex),
            DrawTarget::Surface(surface) => store.surfaces.get_mut(&surface).map(|s| &mut s.back_buffer),
        };
        if let Some(image) = image {
            for p in image.pixels_mut() {
                *p = pixel;
            }
        }
    }

    fn set_blend(&mut self, enabled: bool) {
        self.blend = enabled;
    }

    fn draw_quad(&mut self, draw: &QuadDraw) -> GpuResult<()> {
        let target = self.draw_target()?;
        let viewport = self.viewport;
        let blend = self.blend;
        let mut store = self.store();

        // Take the destination out so the source can stay borrowed
        let mut dst = match target {
            DrawTarget::Texture(tex) => {
                if tex == draw.texture {
                    return Err(GpuError::Backend("texture is bound as its own render target".into()));
                }
                store.textures.remove(&tex)
            }
            DrawTarget::Surface(surface) => store
                .surfaces
                .get_mut(&surface)
                .map(|s| std::mem::take(&mut s.back_buffer)),
        }
        .ok_or_else(|| GpuError::InvalidHandle("render target".into()))?;

        let result = match store.textures.get(&draw.texture) {
            Some(src) => {
                rasterize(&mut dst, src, draw, viewport, blend);
                Ok(())
            }
            None => Err(GpuError::InvalidHandle(draw.texture.to_string())),
        };

        match target {
            DrawTarget::Texture(tex) => {
                store.textures.insert(tex, dst);
            }
            DrawTarget::Surface(surface) => {
                if let Some(s) = store.surfaces.get_mut(&surface) {
                    s.back_buffer = dst;
                }
            }
        }
        result
    }

    fn check_error(&mut self) -> Option<GpuError> {
        self.error.take()
    }

    fn create_shared(&self) -> GpuResult<Box<dyn GpuDevice>> {
        Ok(Box::new(SoftwareDevice {
            info: self.info.clone(),
            namespace: self.namespace,
            store: Arc::clone(&self.store),
            current: None,
            framebuffer: None,
            viewport: (0, 0, 0, 0),
            blend: false,
            error: None,
        }))
    }

    fn release(&mut self) {
        self.current = None;
        self.framebuffer = None;
        // Shared contexts keep the namespace alive until the last one goes
        if Arc::strong_count(&self.store) == 1 {
            let mut store = self.store();
            debug!(
                textures = store.textures.len(),
                surfaces = store.surfaces.len(),
                "Releasing software device"
            );
            *store = SharedStore::default();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::TextureKind;
    use crate::gpu::MemoryWindow;
    use crate::matrix::{self, Mat4};

    fn checker(width: u32, height: u32) -> RgbaImage {
        RgbaImage::from_fn(width, height, |x, y| Rgba([x as u8, y as u8, 7, 255]))
    }

    fn draw(texture: TextureId, tex_matrix: Mat4, mvp: Mat4) -> QuadDraw {
        QuadDraw {
            texture,
            kind: TextureKind::Texture2D,
            tex_matrix,
            mvp,
            alpha: 1.0,
        }
    }

    fn render(device: &mut SoftwareDevice, src: TextureId, w: u32, h: u32, q: QuadDraw) -> RgbaImage {
        let out = device.create_texture(w, h).unwrap();
        let fb = device.create_framebuffer(out).unwrap();
        device.bind_framebuffer(Some(fb));
        device.viewport(0, 0, w, h);
        device.draw_quad(&QuadDraw { texture: src, ..q }).unwrap();
        device.bind_framebuffer(None);
        // read back in storage order for direct comparisons
        imageops::flip_vertical(&device.read_texture(out).unwrap())
    }

    #[test]
    fn test_identity_copy_is_exact() {
        let mut device = SoftwareDevice::new("test");
        let src = device.create_texture(8, 6).unwrap();
        let image = checker(8, 6);
        device.upload_texture(src, &image).unwrap();

        let out = render(&mut device, src, 8, 6, draw(src, matrix::identity(), matrix::identity()));
        assert_eq!(out, image);
    }

    #[test]
    fn test_quarter_turn_swaps_axes() {
        let mut device = SoftwareDevice::new("test");
        let src = device.create_texture(8, 6).unwrap();
        device.upload_texture(src, &checker(8, 6)).unwrap();

        let mut op = crate::matrix::MatrixOperator::texture(crate::matrix::ScaleType::FitXY);
        op.set_rotation(90.0);
        let out = render(&mut device, src, 6, 8, draw(src, op.final_matrix(), matrix::identity()));
        for y in 0..8 {
            for x in 0..6 {
                assert_eq!(out.get_pixel(x, y)[0], (7 - y) as u8);
                assert_eq!(out.get_pixel(x, y)[1], x as u8);
            }
        }
    }

    #[test]
    fn test_blend_mixes_with_destination() {
        let mut device = SoftwareDevice::new("test");
        let src = device.create_texture(2, 2).unwrap();
        device
            .upload_texture(src, &RgbaImage::from_pixel(2, 2, Rgba([255, 255, 255, 255])))
            .unwrap();

        let out = device.create_texture(2, 2).unwrap();
        let fb = device.create_framebuffer(out).unwrap();
        device.bind_framebuffer(Some(fb));
        device.viewport(0, 0, 2, 2);
        device.clear([0.0, 0.0, 0.0, 1.0]);
        device.set_blend(true);
        device
            .draw_quad(&QuadDraw {
                alpha: 0.5,
                ..draw(src, matrix::identity(), matrix::identity())
            })
            .unwrap();
        let result = device.read_texture(out).unwrap();
        assert_eq!(result.get_pixel(0, 0)[0], 128);
    }

    #[test]
    fn test_draw_without_target_fails() {
        let mut device = SoftwareDevice::new("test");
        let src = device.create_texture(2, 2).unwrap();
        let err = device
            .draw_quad(&draw(src, matrix::identity(), matrix::identity()))
            .unwrap_err();
        assert_eq!(err, GpuError::NoCurrentSurface);
    }

    #[test]
    fn test_invalid_handles_are_recorded() {
        let mut device = SoftwareDevice::new("test");
        device.delete_texture(TextureId(99));
        assert!(matches!(device.check_error(), Some(GpuError::InvalidHandle(_))));
        assert!(device.check_error().is_none());
    }

    #[test]
    fn test_window_swap_presents_top_down() {
        let mut device = SoftwareDevice::new("test");
        let window = MemoryWindow::new(4, 2);
        let surface = device.create_window_surface(window.clone()).unwrap();
        device.make_current(surface).unwrap();
        device.viewport(0, 0, 4, 2);

        // bottom row red, top row blue in storage order
        let mut image = RgbaImage::new(1, 2);
        image.put_pixel(0, 0, Rgba([255, 0, 0, 255]));
        image.put_pixel(0, 1, Rgba([0, 0, 255, 255]));
        let src = device.create_texture(1, 2).unwrap();
        device.upload_texture(src, &image).unwrap();
        device
            .draw_quad(&draw(src, matrix::identity(), matrix::identity()))
            .unwrap();
        device.swap_buffers(surface).unwrap();

        let shown = window.last_frame().unwrap();
        assert_eq!(shown.get_pixel(0, 0)[2], 255, "top row should be blue");
        assert_eq!(shown.get_pixel(0, 1)[0], 255, "bottom row should be red");
    }

    #[test]
    fn test_shared_context_sees_textures() {
        let mut device = SoftwareDevice::new("test");
        let tex = device.create_texture(3, 3).unwrap();
        let shared = device.create_shared().unwrap();
        assert_eq!(shared.texture_size(tex), Some((3, 3)));
        assert_eq!(shared.namespace(), device.namespace());
        assert!(shared.current_surface().is_none());
    }

    #[test]
    fn test_invalid_window_surface_creation_fails() {
        let mut device = SoftwareDevice::new("test");
        let window = MemoryWindow::new(4, 4);
        window.invalidate();
        assert!(matches!(
            device.create_window_surface(window),
            Err(GpuError::SurfaceCreation(_))
        ));
    }
}
