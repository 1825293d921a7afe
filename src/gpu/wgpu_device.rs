// SPDX-License-Identifier: GPL-3.0-only

//! wgpu implementation of [`GpuDevice`]
//!
//! Every texture is an `Rgba8Unorm` texture usable as sampler input,
//! render attachment and copy source/destination. Texture row 0 is
//! `t = 0`, and the quad shader negates y so render target row 0 is the
//! bottom row. Window surfaces render into a texture that is read back and
//! handed to the window on swap.

use super::{
    BackendKind, FramebufferId, GpuDevice, GpuDeviceInfo, NativeWindow, QuadDraw, SurfaceId,
    TextureId, create_render_device, next_namespace, wgpu,
};
use crate::errors::{GpuError, GpuResult};
use crate::shaders::{QUAD_SHADER, QuadUniforms, padded_bytes_per_row, read_buffer_async};
use image::{RgbaImage, imageops};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, trace, warn};
use wgpu::util::DeviceExt;

const TEXTURE_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

struct GpuTexture {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    width: u32,
    height: u32,
}

enum SurfaceBacking {
    Window(Arc<dyn NativeWindow>),
    Offscreen,
}

struct GpuSurface {
    backing: SurfaceBacking,
    target: TextureId,
}

#[derive(Default)]
struct Resources {
    next_id: u32,
    textures: HashMap<TextureId, GpuTexture>,
    framebuffers: HashMap<FramebufferId, TextureId>,
    surfaces: HashMap<SurfaceId, GpuSurface>,
}

impl Resources {
    fn allocate_id(&mut self) -> u32 {
        self.next_id += 1;
        self.next_id
    }
}

/// Objects shared by every context created from one device
struct GpuShared {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    opaque_pipeline: wgpu::RenderPipeline,
    blend_pipeline: wgpu::RenderPipeline,
    bind_group_layout: wgpu::BindGroupLayout,
    sampler: wgpu::Sampler,
    resources: Mutex<Resources>,
}

impl GpuShared {
    fn resources(&self) -> MutexGuard<'_, Resources> {
        self.resources.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn new_texture(&self, width: u32, height: u32) -> GpuTexture {
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("pipeline_texture"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: TEXTURE_FORMAT,
            usage: wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::RENDER_ATTACHMENT
                | wgpu::TextureUsages::COPY_DST
                | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        GpuTexture {
            texture,
            view,
            width,
            height,
        }
    }

    fn write_texture(&self, texture: &GpuTexture, image: &RgbaImage) {
        self.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &texture.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            image.as_raw(),
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(4 * image.width()),
                rows_per_image: Some(image.height()),
            },
            wgpu::Extent3d {
                width: image.width(),
                height: image.height(),
                depth_or_array_layers: 1,
            },
        );
    }

    /// Copy a texture into a CPU image in storage row order
    fn read_back(&self, texture: &GpuTexture) -> GpuResult<RgbaImage> {
        let padded = padded_bytes_per_row(texture.width);
        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("readback_buffer"),
            size: (padded * texture.height) as u64,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("readback_encoder"),
            });
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture: &texture.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &staging,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(padded),
                    rows_per_image: Some(texture.height),
                },
            },
            wgpu::Extent3d {
                width: texture.width,
                height: texture.height,
                depth_or_array_layers: 1,
            },
        );
        self.queue.submit(Some(encoder.finish()));

        let data = pollster::block_on(read_buffer_async(&self.device, &staging)).map_err(GpuError::Backend)?;

        // strip row padding
        let row_bytes = (texture.width * 4) as usize;
        let mut pixels = Vec::with_capacity(row_bytes * texture.height as usize);
        for row in data.chunks(padded as usize).take(texture.height as usize) {
            pixels.extend_from_slice(&row[..row_bytes]);
        }
        RgbaImage::from_raw(texture.width, texture.height, pixels)
            .ok_or_else(|| GpuError::Backend("readback size mismatch".into()))
    }
}

fn create_pipeline(
    device: &wgpu::Device,
    shader: &wgpu::ShaderModule,
    layout: &wgpu::PipelineLayout,
    blend: Option<wgpu::BlendState>,
    label: &str,
) -> wgpu::RenderPipeline {
    device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some(label),
        layout: Some(layout),
        vertex: wgpu::VertexState {
            module: shader,
            entry_point: Some("vs_main"),
            buffers: &[],
            compilation_options: Default::default(),
        },
        primitive: wgpu::PrimitiveState {
            topology: wgpu::PrimitiveTopology::TriangleStrip,
            ..Default::default()
        },
        depth_stencil: None,
        multisample: wgpu::MultisampleState {
            count: 1,
            mask: !0,
            alpha_to_coverage_enabled: false,
        },
        fragment: Some(wgpu::FragmentState {
            module: shader,
            entry_point: Some("fs_main"),
            targets: &[Some(wgpu::ColorTargetState {
                format: TEXTURE_FORMAT,
                blend,
                write_mask: wgpu::ColorWrites::ALL,
            })],
            compilation_options: Default::default(),
        }),
        multiview: None,
        cache: None,
    })
}

/// Destination of a draw
#[derive(Clone, Copy)]
enum DrawTarget {
    Texture(TextureId),
    Surface(SurfaceId),
}

pub struct WgpuDevice {
    info: GpuDeviceInfo,
    namespace: u64,
    shared: Arc<GpuShared>,
    current: Option<SurfaceId>,
    framebuffer: Option<FramebufferId>,
    viewport: (i32, i32, u32, u32),
    blend: bool,
    error: Option<GpuError>,
}

impl WgpuDevice {
    /// Create a device on the system GPU
    pub fn new(label: &str) -> GpuResult<Self> {
        let (device, queue, adapter_name) =
            pollster::block_on(create_render_device(label)).map_err(GpuError::DeviceUnavailable)?;

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("textured_quad_shader"),
            source: wgpu::ShaderSource::Wgsl(QUAD_SHADER.into()),
        });

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("textured_quad_bind_group_layout"),
            entries: &[
                // Uniforms
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                // Source texture
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                // Sampler
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("textured_quad_pipeline_layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let opaque_pipeline = create_pipeline(&device, &shader, &pipeline_layout, None, "textured_quad_opaque");
        let blend_pipeline = create_pipeline(
            &device,
            &shader,
            &pipeline_layout,
            Some(wgpu::BlendState::ALPHA_BLENDING),
            "textured_quad_blend",
        );

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("textured_quad_sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Nearest,
            min_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        info!(label, adapter = %adapter_name, "wgpu device ready");

        Ok(Self {
            info: GpuDeviceInfo {
                adapter_name,
                backend: BackendKind::Wgpu,
            },
            namespace: next_namespace(),
            shared: Arc::new(GpuShared {
                device,
                queue,
                opaque_pipeline,
                blend_pipeline,
                bind_group_layout,
                sampler,
                resources: Mutex::new(Resources::default()),
            }),
            current: None,
            framebuffer: None,
            viewport: (0, 0, 0, 0),
            blend: false,
            error: None,
        })
    }

    fn record(&mut self, err: GpuError) {
        if self.error.is_none() {
            self.error = Some(err);
        }
    }

    fn draw_target(&self) -> GpuResult<DrawTarget> {
        if let Some(fb) = self.framebuffer {
            return self
                .shared
                .resources()
                .framebuffers
                .get(&fb)
                .map(|tex| DrawTarget::Texture(*tex))
                .ok_or_else(|| GpuError::InvalidHandle(format!("framebuffer {}", fb.0)));
        }
        self.current
            .map(DrawTarget::Surface)
            .ok_or(GpuError::NoCurrentSurface)
    }

    fn target_texture(&self, resources: &Resources, target: DrawTarget) -> GpuResult<TextureId> {
        match target {
            DrawTarget::Texture(tex) => Ok(tex),
            DrawTarget::Surface(surface) => resources
                .surfaces
                .get(&surface)
                .map(|s| s.target)
                .ok_or_else(|| GpuError::InvalidHandle(format!("surface {}", surface.0))),
        }
    }

    /// Run `f` inside a validation error scope
    fn scoped<T>(&self, f: impl FnOnce() -> T) -> GpuResult<T> {
        self.shared.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let value = f();
        match pollster::block_on(self.shared.device.pop_error_scope()) {
            Some(err) => Err(GpuError::Backend(err.to_string())),
            None => Ok(value),
        }
    }
}

impl GpuDevice for WgpuDevice {
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
        let texture = self.scoped(|| self.shared.new_texture(width, height))?;
        let mut resources = self.shared.resources();
        let id = TextureId(resources.allocate_id());
        resources.textures.insert(id, texture);
        trace!(texture = id.0, width, height, "Texture created");
        Ok(id)
    }

    fn upload_texture(&mut self, texture: TextureId, image: &RgbaImage) -> GpuResult<()> {
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return Err(GpuError::Backend("empty image upload".into()));
        }
        let mut resources = self.shared.resources();
        let Some(existing) = resources.textures.get(&texture) else {
            return Err(GpuError::InvalidHandle(texture.to_string()));
        };
        // like glTexImage2D, a new size reallocates the storage
        if (existing.width, existing.height) != (width, height) {
            let replacement = self.shared.new_texture(width, height);
            resources.textures.insert(texture, replacement);
        }
        if let Some(target) = resources.textures.get(&texture) {
            self.shared.write_texture(target, image);
        }
        Ok(())
    }

    fn texture_size(&self, texture: TextureId) -> Option<(u32, u32)> {
        self.shared
            .resources()
            .textures
            .get(&texture)
            .map(|t| (t.width, t.height))
    }

    fn delete_texture(&mut self, texture: TextureId) {
        let removed = self.shared.resources().textures.remove(&texture);
        match removed {
            Some(t) => t.texture.destroy(),
            None => self.record(GpuError::InvalidHandle(texture.to_string())),
        }
    }

    fn read_texture(&mut self, texture: TextureId) -> GpuResult<RgbaImage> {
        let resources = self.shared.resources();
        let target = resources
            .textures
            .get(&texture)
            .ok_or_else(|| GpuError::InvalidHandle(texture.to_string()))?;
        let image = self.shared.read_back(target)?;
        Ok(imageops::flip_vertical(&image))
    }

    fn create_framebuffer(&mut self, texture: TextureId) -> GpuResult<FramebufferId> {
        let mut resources = self.shared.resources();
        if !resources.textures.contains_key(&texture) {
            return Err(GpuError::InvalidHandle(texture.to_string()));
        }
        let id = FramebufferId(resources.allocate_id());
        resources.framebuffers.insert(id, texture);
        Ok(id)
    }

    fn delete_framebuffer(&mut self, framebuffer: FramebufferId) {
        if self.framebuffer == Some(framebuffer) {
            self.framebuffer = None;
        }
        let removed = self.shared.resources().framebuffers.remove(&framebuffer).is_some();
        if !removed {
            self.record(GpuError::InvalidHandle(format!("framebuffer {}", framebuffer.0)));
        }
    }

    fn bind_framebuffer(&mut self, framebuffer: Option<FramebufferId>) {
        if let Some(fb) = framebuffer
            && !self.shared.resources().framebuffers.contains_key(&fb)
        {
            self.record(GpuError::InvalidHandle(format!("framebuffer {}", fb.0)));
            return;
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
        let target = self.create_texture(width, height)?;
        let mut resources = self.shared.resources();
        let id = SurfaceId(resources.allocate_id());
        resources.surfaces.insert(
            id,
            GpuSurface {
                backing: SurfaceBacking::Window(window),
                target,
            },
        );
        debug!(surface = id.0, width, height, "Window surface created");
        Ok(id)
    }

    fn create_offscreen_surface(&mut self, width: u32, height: u32) -> GpuResult<SurfaceId> {
        let target = self.create_texture(width.max(1), height.max(1))?;
        let mut resources = self.shared.resources();
        let id = SurfaceId(resources.allocate_id());
        resources.surfaces.insert(
            id,
            GpuSurface {
                backing: SurfaceBacking::Offscreen,
                target,
            },
        );
        Ok(id)
    }

    fn release_surface(&mut self, surface: SurfaceId) {
        if self.current == Some(surface) {
            self.current = None;
        }
        let mut resources = self.shared.resources();
        if let Some(entry) = resources.surfaces.remove(&surface)
            && let Some(texture) = resources.textures.remove(&entry.target)
        {
            texture.texture.destroy();
        }
    }

    fn make_current(&mut self, surface: SurfaceId) -> GpuResult<()> {
        let mut resources = self.shared.resources();
        let Some(entry) = resources.surfaces.get(&surface) else {
            return Err(GpuError::InvalidHandle(format!("surface {}", surface.0)));
        };

        // Window surfaces follow their window's size
        if let SurfaceBacking::Window(window) = &entry.backing {
            if !window.is_valid() {
                return Err(GpuError::SurfaceCreation("window is no longer valid".into()));
            }
            let (width, height) = window.size();
            let target = entry.target;
            let stale = resources
                .textures
                .get(&target)
                .is_some_and(|t| width > 0 && height > 0 && (t.width, t.height) != (width, height));
            if stale {
                trace!(width, height, "Resizing window surface");
                let replacement = self.shared.new_texture(width, height);
                if let Some(old) = resources.textures.insert(target, replacement) {
                    old.texture.destroy();
                }
            }
        }
        drop(resources);
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
        let resources = self.shared.resources();
        let Some(entry) = resources.surfaces.get(&surface) else {
            return Err(GpuError::InvalidHandle(format!("surface {}", surface.0)));
        };
        let SurfaceBacking::Window(window) = &entry.backing else {
            return Ok(());
        };
        let target = resources
            .textures
            .get(&entry.target)
            .ok_or_else(|| GpuError::InvalidHandle("surface texture".into()))?;
        let image = self.shared.read_back(target)?;
        window
            .present(imageops::flip_vertical(&image))
            .map_err(GpuError::Backend)
    }

    fn viewport(&mut self, x: i32, y: i32, width: u32, height: u32) {
        self.viewport = (x, y, width, height);
    }

    fn clear(&mut self, color: [f32; 4]) {
        let result = self.draw_target().and_then(|target| {
            let resources = self.shared.resources();
            let tex_id = self.target_texture(&resources, target)?;
            let texture = resources
                .textures
                .get(&tex_id)
                .ok_or_else(|| GpuError::InvalidHandle(tex_id.to_string()))?;

            let mut encoder = self
                .shared
                .device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("clear_encoder"),
                });
            {
                let _pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                    label: Some("clear_pass"),
                    color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                        view: &texture.view,
                        depth_slice: None,
                        resolve_target: None,
                        ops: wgpu::Operations {
                            load: wgpu::LoadOp::Clear(wgpu::Color {
                                r: color[0] as f64,
                                g: color[1] as f64,
                                b: color[2] as f64,
                                a: color[3] as f64,
                            }),
                            store: wgpu::StoreOp::Store,
                        },
                    })],
                    depth_stencil_attachment: None,
                    timestamp_writes: None,
                    occlusion_query_set: None,
                });
            }
            self.shared.queue.submit(Some(encoder.finish()));
            Ok(())
        });
        if let Err(err) = result {
            self.record(err);
        }
    }

    fn set_blend(&mut self, enabled: bool) {
        self.blend = enabled;
    }

    fn draw_quad(&mut self, draw: &QuadDraw) -> GpuResult<()> {
        let target = self.draw_target()?;
        let (vx, vy, vw, vh) = self.viewport;
        let resources = self.shared.resources();
        let tex_id = self.target_texture(&resources, target)?;
        if tex_id == draw.texture {
            return Err(GpuError::Backend("texture is bound as its own render target".into()));
        }
        let dst = resources
            .textures
            .get(&tex_id)
            .ok_or_else(|| GpuError::InvalidHandle("render target".into()))?;
        let src = resources
            .textures
            .get(&draw.texture)
            .ok_or_else(|| GpuError::InvalidHandle(draw.texture.to_string()))?;

        // Part of the viewport may lie outside the target; the scissor clips it
        let x0 = vx.max(0) as u32;
        let y0 = vy.max(0) as u32;
        let x1 = ((vx as i64 + vw as i64).min(dst.width as i64)).max(0) as u32;
        let y1 = ((vy as i64 + vh as i64).min(dst.height as i64)).max(0) as u32;
        if x1 <= x0 || y1 <= y0 {
            trace!("Empty viewport, nothing drawn");
            return Ok(());
        }

        let shared = &self.shared;
        let pipeline = if self.blend {
            &shared.blend_pipeline
        } else {
            &shared.opaque_pipeline
        };

        self.scoped(|| {
            let uniforms = QuadUniforms::from_draw(draw);
            let uniform_buffer = shared.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("quad_uniforms"),
                contents: bytemuck::bytes_of(&uniforms),
                usage: wgpu::BufferUsages::UNIFORM,
            });
            let bind_group = shared.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("quad_bind_group"),
                layout: &shared.bind_group_layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: uniform_buffer.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: wgpu::BindingResource::TextureView(&src.view),
                    },
                    wgpu::BindGroupEntry {
                        binding: 2,
                        resource: wgpu::BindingResource::Sampler(&shared.sampler),
                    },
                ],
            });

            let mut encoder = shared
                .device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("quad_encoder"),
                });
            {
                let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                    label: Some("quad_pass"),
                    color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                        view: &dst.view,
                        depth_slice: None,
                        resolve_target: None,
                        ops: wgpu::Operations {
                            load: wgpu::LoadOp::Load,
                            store: wgpu::StoreOp::Store,
                        },
                    })],
                    depth_stencil_attachment: None,
                    timestamp_writes: None,
                    occlusion_query_set: None,
                });
                pass.set_viewport(vx as f32, vy as f32, vw as f32, vh as f32, 0.0, 1.0);
                pass.set_scissor_rect(x0, y0, x1 - x0, y1 - y0);
                pass.set_pipeline(pipeline);
                pass.set_bind_group(0, &bind_group, &[]);
                pass.draw(0..4, 0..1);
            }
            shared.queue.submit(Some(encoder.finish()));
        })
    }

    fn check_error(&mut self) -> Option<GpuError> {
        self.error.take()
    }

    fn create_shared(&self) -> GpuResult<Box<dyn GpuDevice>> {
        Ok(Box::new(WgpuDevice {
            info: self.info.clone(),
            namespace: self.namespace,
            shared: Arc::clone(&self.shared),
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
        if Arc::strong_count(&self.shared) == 1 {
            let mut resources = self.shared.resources();
            debug!(
                textures = resources.textures.len(),
                surfaces = resources.surfaces.len(),
                "Releasing wgpu device"
            );
            for (_, texture) in resources.textures.drain() {
                texture.texture.destroy();
            }
            *resources = Resources::default();
        } else {
            warn!("Releasing a shared wgpu context, resources stay with the other contexts");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::TextureKind;
    use crate::gpu::MemoryWindow;
    use crate::matrix;
    use image::Rgba;

    fn device_or_skip() -> Option<WgpuDevice> {
        match WgpuDevice::new("test") {
            Ok(device) => Some(device),
            Err(e) => {
                println!("Skipping test (no GPU): {}", e);
                None
            }
        }
    }

    #[test]
    fn test_copy_matches_software_orientation() {
        let Some(mut device) = device_or_skip() else {
            return;
        };
        let image = RgbaImage::from_fn(4, 2, |x, y| Rgba([x as u8 * 60, y as u8 * 200, 0, 255]));
        let src = device.create_texture(4, 2).unwrap();
        device.upload_texture(src, &image).unwrap();

        let out = device.create_texture(4, 2).unwrap();
        let fb = device.create_framebuffer(out).unwrap();
        device.bind_framebuffer(Some(fb));
        device.viewport(0, 0, 4, 2);
        device
            .draw_quad(&QuadDraw {
                texture: src,
                kind: TextureKind::Texture2D,
                tex_matrix: matrix::identity(),
                mvp: matrix::identity(),
                alpha: 1.0,
            })
            .unwrap();
        device.bind_framebuffer(None);

        // read_texture is top row first, storage is bottom row first
        let read = device.read_texture(out).unwrap();
        assert_eq!(imageops::flip_vertical(&read), image);
    }

    #[test]
    fn test_window_surface_presents() {
        let Some(mut device) = device_or_skip() else {
            return;
        };
        let window = MemoryWindow::new(8, 8);
        let surface = device.create_window_surface(window.clone()).unwrap();
        device.make_current(surface).unwrap();
        device.clear([1.0, 0.0, 0.0, 1.0]);
        device.swap_buffers(surface).unwrap();
        let shown = window.last_frame().unwrap();
        assert_eq!(shown.get_pixel(3, 3), &Rgba([255, 0, 0, 255]));
    }
}
