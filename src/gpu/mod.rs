// SPDX-License-Identifier: GPL-3.0-only

//! GPU device abstraction for the channel threads
//!
//! A [`GpuDevice`] is the rendering context a channel thread owns: it
//! creates textures, framebuffers and presentable surfaces, keeps track of
//! the current surface and bound framebuffer, and draws textured quads.
//! The surface mirrors a GL context so the pipeline stages can be written
//! in terms of "bind, draw, restore" without caring about the backend.
//!
//! Two backends exist:
//! - [`software::SoftwareDevice`]: a deterministic CPU rasterizer
//! - [`wgpu_device::WgpuDevice`]: wgpu render pipelines with readback for
//!   window presentation

pub mod software;
pub mod wgpu_device;
pub mod window;

use crate::errors::{GpuError, GpuResult};
use crate::frame::TextureKind;
use crate::matrix::Mat4;
use image::RgbaImage;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info};

pub use window::{MemoryWindow, NativeWindow, TargetId};
pub use wgpu_compute as wgpu;

/// Texture handle, valid within one resource namespace
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureId(pub u32);

/// Framebuffer handle rendering into one texture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FramebufferId(pub u32);

/// Window or offscreen surface handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SurfaceId(pub u32);

impl std::fmt::Display for TextureId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "tex#{}", self.0)
    }
}

/// One textured quad draw
///
/// The quad spans [-1, 1] in both axes with texture coordinates [0, 1].
/// Positions are transformed by `mvp`, texture coordinates by `tex_matrix`.
/// The sampled color's alpha is multiplied by `alpha`.
#[derive(Debug, Clone, Copy)]
pub struct QuadDraw {
    pub texture: TextureId,
    pub kind: TextureKind,
    pub tex_matrix: Mat4,
    pub mvp: Mat4,
    pub alpha: f32,
}

/// Information about the created device
#[derive(Debug, Clone)]
pub struct GpuDeviceInfo {
    /// Adapter or renderer name
    pub adapter_name: String,
    /// Which backend is in use
    pub backend: BackendKind,
}

/// Rendering context used by exactly one thread at a time
///
/// Calls that return `()` record failures which are then reported by
/// [`check_error`](GpuDevice::check_error), like `glGetError`.
pub trait GpuDevice: Send {
    fn info(&self) -> &GpuDeviceInfo;

    /// Identifier of the resource namespace; shared contexts report the same value
    fn namespace(&self) -> u64;

    // ===== Textures =====

    /// Allocate an RGBA8 texture filled with transparent black
    fn create_texture(&mut self, width: u32, height: u32) -> GpuResult<TextureId>;

    /// Replace the texture's storage. The first image row maps to t = 0.
    fn upload_texture(&mut self, texture: TextureId, image: &RgbaImage) -> GpuResult<()>;

    fn texture_size(&self, texture: TextureId) -> Option<(u32, u32)>;

    fn delete_texture(&mut self, texture: TextureId);

    /// Read a texture back top row first (t = 1 first)
    fn read_texture(&mut self, texture: TextureId) -> GpuResult<RgbaImage>;

    // ===== Framebuffers =====

    fn create_framebuffer(&mut self, texture: TextureId) -> GpuResult<FramebufferId>;

    fn delete_framebuffer(&mut self, framebuffer: FramebufferId);

    /// `None` restores drawing into the current surface
    fn bind_framebuffer(&mut self, framebuffer: Option<FramebufferId>);

    // ===== Surfaces =====

    fn create_window_surface(&mut self, window: Arc<dyn NativeWindow>) -> GpuResult<SurfaceId>;

    fn create_offscreen_surface(&mut self, width: u32, height: u32) -> GpuResult<SurfaceId>;

    fn release_surface(&mut self, surface: SurfaceId);

    fn make_current(&mut self, surface: SurfaceId) -> GpuResult<()>;

    fn make_nothing_current(&mut self);

    fn current_surface(&self) -> Option<SurfaceId>;

    /// Present a window surface's back buffer to its window
    fn swap_buffers(&mut self, surface: SurfaceId) -> GpuResult<()>;

    // ===== Drawing =====

    fn viewport(&mut self, x: i32, y: i32, width: u32, height: u32);

    /// Fill the whole current target with `color`
    fn clear(&mut self, color: [f32; 4]);

    /// Toggle SRC_ALPHA / ONE_MINUS_SRC_ALPHA blending
    fn set_blend(&mut self, enabled: bool);

    fn draw_quad(&mut self, draw: &QuadDraw) -> GpuResult<()>;

    /// Take the first error recorded since the last call
    fn check_error(&mut self) -> Option<GpuError>;

    // ===== Lifecycle =====

    /// New context sharing this one's textures and framebuffers, with its
    /// own current surface and binding state
    fn create_shared(&self) -> GpuResult<Box<dyn GpuDevice>>;

    /// Release every resource owned by this context
    fn release(&mut self);
}

/// Check for a recorded device error after a state-mutating call
pub fn check_gpu_error(device: &mut dyn GpuDevice, op: &str) -> GpuResult<()> {
    match device.check_error() {
        Some(err) => {
            tracing::error!(op, error = %err, "GPU error");
            Err(err)
        }
        None => Ok(()),
    }
}

static NEXT_NAMESPACE: AtomicU64 = AtomicU64::new(1);

/// Allocate a process-unique resource namespace id
pub(crate) fn next_namespace() -> u64 {
    NEXT_NAMESPACE.fetch_add(1, Ordering::Relaxed)
}

/// Which device implementation channel threads create
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BackendKind {
    /// CPU rasterizer, always available
    #[default]
    Software,
    /// wgpu on the system's GPU
    Wgpu,
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendKind::Software => write!(f, "software"),
            BackendKind::Wgpu => write!(f, "wgpu"),
        }
    }
}

/// Factory for channel devices
///
/// Devices are created on the thread that will own them.
#[derive(Debug, Clone, Copy, Default)]
pub struct GpuBackend {
    kind: BackendKind,
}

impl GpuBackend {
    pub fn new(kind: BackendKind) -> Self {
        Self { kind }
    }

    pub fn software() -> Self {
        Self::new(BackendKind::Software)
    }

    pub fn kind(&self) -> BackendKind {
        self.kind
    }

    pub fn create_device(&self, label: &str) -> GpuResult<Box<dyn GpuDevice>> {
        debug!(label, backend = %self.kind, "Creating GPU device");
        match self.kind {
            BackendKind::Software => Ok(Box::new(software::SoftwareDevice::new(label))),
            BackendKind::Wgpu => {
                let device = wgpu_device::WgpuDevice::new(label)?;
                Ok(Box::new(device))
            }
        }
    }
}

/// Create a wgpu device and queue for rendering.
///
/// # Arguments
///
/// * `label` - A label for the device (for debugging)
///
/// # Returns
///
/// A tuple of (Device, Queue, adapter name) or an error message
pub async fn create_render_device(
    label: &str,
) -> Result<(Arc<wgpu::Device>, Arc<wgpu::Queue>, String), String> {
    info!(label = label, "Creating GPU device for rendering");

    let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
        backends: wgpu::Backends::VULKAN,
        ..Default::default()
    });

    let adapter = instance
        .request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::LowPower,
            compatible_surface: None,
            force_fallback_adapter: false,
        })
        .await
        .map_err(|e| format!("Failed to find suitable GPU adapter: {}", e))?;

    let adapter_info = adapter.get_info();

    info!(
        adapter = %adapter_info.name,
        backend = ?adapter_info.backend,
        "GPU adapter selected for rendering"
    );

    let (device, queue) = adapter
        .request_device(&wgpu::DeviceDescriptor {
            label: Some(label),
            required_features: wgpu::Features::empty(),
            required_limits: wgpu::Limits::downlevel_defaults(),
            memory_hints: wgpu::MemoryHints::Performance,
            ..Default::default()
        })
        .await
        .map_err(|e| format!("Failed to create GPU device: {}", e))?;

    Ok((Arc::new(device), Arc::new(queue), adapter_info.name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_render_device() {
        // This test requires a GPU, so it may be skipped in CI
        match create_render_device("test_device").await {
            Ok((device, queue, name)) => {
                println!("Created device: {}", name);
                assert!(!name.is_empty());
                drop(queue);
                drop(device);
            }
            Err(e) => {
                println!("Skipping test (no GPU): {}", e);
            }
        }
    }

    #[test]
    fn test_software_backend_always_available() {
        let device = GpuBackend::software().create_device("test").unwrap();
        assert_eq!(device.info().backend, BackendKind::Software);
    }

    #[test]
    fn test_namespaces_are_unique() {
        assert_ne!(next_namespace(), next_namespace());
    }
}
