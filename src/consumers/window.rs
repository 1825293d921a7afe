// SPDX-License-Identifier: GPL-3.0-only

//! Window-backed on-screen consumer
//!
//! The consumer owns a presentable surface created lazily from its
//! [`NativeWindow`]. Surface failures only drop the frame for this
//! consumer; siblings on the same channel keep rendering.
//!
//! In dedicated mode the consumer renders on a private thread with a
//! context sharing the channel's resources, so a slow swap cannot stall
//! the channel. Frames reach that thread through a latest-wins mailbox.

use super::VideoConsumer;
use crate::constants::MirrorMode;
use crate::errors::{GpuError, GpuResult};
use crate::frame::VideoFrame;
use crate::gpu::{GpuDevice, NativeWindow, SurfaceId, TargetId};
use crate::matrix::{self, MatrixOperator, ScaleType};
use crate::pipeline::{ChannelContext, ConsumerLink, FrameMailbox, TaskLoop};
use crate::shaders::ProgramSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, trace, warn};

struct WindowShared {
    window: Mutex<Arc<dyn NativeWindow>>,
    mirror_mode: Mutex<MirrorMode>,
    needs_reset: AtomicBool,
    destroyed: AtomicBool,
    link: Mutex<Option<ConsumerLink>>,
    frames_presented: AtomicU64,
}

impl WindowShared {
    fn window(&self) -> Arc<dyn NativeWindow> {
        Arc::clone(&self.window.lock().unwrap_or_else(PoisonError::into_inner))
    }

    fn mirror_mode(&self) -> MirrorMode {
        *self.mirror_mode.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// View-side control of a [`WindowConsumer`]
///
/// Safe to use from the UI thread while the channel renders.
#[derive(Clone)]
pub struct WindowHandle {
    shared: Arc<WindowShared>,
}

impl WindowHandle {
    /// The view was resized; the surface is recreated before the next draw
    pub fn surface_size_changed(&self) {
        debug!("Window size changed, surface will be recreated");
        self.shared.needs_reset.store(true, Ordering::SeqCst);
    }

    /// The platform destroyed the surface; drawing stops until reconnect
    pub fn surface_destroyed(&self) {
        info!("Window surface destroyed");
        self.shared.destroyed.store(true, Ordering::SeqCst);
    }

    /// Draw into `window` from now on
    pub fn replace_window(&self, window: Arc<dyn NativeWindow>) {
        *self.shared.window.lock().unwrap_or_else(PoisonError::into_inner) = window;
        self.shared.destroyed.store(false, Ordering::SeqCst);
        self.shared.needs_reset.store(true, Ordering::SeqCst);
    }

    pub fn is_destroyed(&self) -> bool {
        self.shared.destroyed.load(Ordering::SeqCst)
    }

    pub fn is_connected(&self) -> bool {
        self.shared
            .link
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    pub fn frames_presented(&self) -> u64 {
        self.shared.frames_presented.load(Ordering::SeqCst)
    }

    /// Detach the consumer from its channel; no-op when not connected
    pub fn disconnect(&self) {
        let link = self
            .shared
            .link
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(link) = link {
            link.disconnect();
        }
    }
}

/// Draw state bound to whichever thread renders the window
struct WindowRenderer {
    shared: Arc<WindowShared>,
    surface: Option<SurfaceId>,
    mvp: MatrixOperator,
}

impl WindowRenderer {
    fn new(shared: Arc<WindowShared>, scale_type: ScaleType) -> Self {
        Self {
            shared,
            surface: None,
            mvp: MatrixOperator::vertex(scale_type),
        }
    }

    fn render(&mut self, frame: &VideoFrame, device: &mut dyn GpuDevice, programs: &ProgramSet) {
        if self.shared.destroyed.load(Ordering::SeqCst) {
            self.release_surface(device);
            return;
        }
        let Some(texture) = frame.texture else {
            return;
        };
        let window = self.shared.window();

        if self.surface.is_none() || self.shared.needs_reset.swap(false, Ordering::SeqCst) {
            self.release_surface(device);
            match device.create_window_surface(Arc::clone(&window)) {
                Ok(surface) => {
                    debug!(target = window.target_id().raw(), "Window surface created");
                    self.surface = Some(surface);
                }
                Err(e) => {
                    warn!(error = %e, "Window surface unavailable, dropping frame");
                    self.shared.needs_reset.store(true, Ordering::SeqCst);
                    return;
                }
            }
        }
        let Some(surface) = self.surface else {
            return;
        };

        match self.draw(surface, window.as_ref(), frame, texture, device, programs) {
            Ok(()) => {
                self.shared.frames_presented.fetch_add(1, Ordering::SeqCst);
            }
            Err(e) => {
                warn!(error = %e, "Window draw failed, surface will be recreated");
                self.shared.needs_reset.store(true, Ordering::SeqCst);
            }
        }
    }

    fn draw(
        &mut self,
        surface: SurfaceId,
        window: &dyn NativeWindow,
        frame: &VideoFrame,
        texture: crate::gpu::TextureId,
        device: &mut dyn GpuDevice,
        programs: &ProgramSet,
    ) -> GpuResult<()> {
        device.make_current(surface)?;
        let (view_width, view_height) = window.size();
        device.viewport(0, 0, view_width, view_height);
        device.clear([0.0, 0.0, 0.0, 1.0]);

        let (width, height) = frame.upright_size();
        self.mvp.update(view_width, view_height, width, height);
        let mut mvp = self.mvp.final_matrix();
        if self.shared.mirror_mode().resolve(frame.mirrored) != frame.mirrored {
            mvp = matrix::mirror_about_y(&mvp);
        }

        programs
            .program(frame.format.texture_kind)
            .draw_frame(device, texture, &frame.texture_transform, &mvp, 1.0)?;
        device.swap_buffers(surface)?;
        trace!(texture = %texture, view_width, view_height, "Window frame presented");
        Ok(())
    }

    fn release_surface(&mut self, device: &mut dyn GpuDevice) {
        if let Some(surface) = self.surface.take() {
            debug!(surface = surface.0, "Releasing window surface");
            device.release_surface(surface);
        }
    }
}

/// Private render thread state
struct DedicatedState {
    device: Box<dyn GpuDevice>,
    programs: ProgramSet,
    dummy: SurfaceId,
    renderer: WindowRenderer,
}

impl DedicatedState {
    fn render_from(&mut self, mailbox: &FrameMailbox) {
        let Some(frame) = mailbox.take() else {
            return;
        };
        self.renderer.render(&frame, self.device.as_mut(), &self.programs);
        self.device.bind_framebuffer(None);
        if let Err(e) = self.device.make_current(self.dummy) {
            warn!(error = %e, "Failed to restore dummy surface on render thread");
        }
    }

    fn release(mut self) {
        self.renderer.release_surface(self.device.as_mut());
        self.device.make_nothing_current();
        self.device.release_surface(self.dummy);
        self.device.release();
    }
}

struct DedicatedRenderer {
    worker: TaskLoop<DedicatedState>,
    mailbox: Arc<FrameMailbox>,
}

/// On-screen consumer presenting into a [`NativeWindow`]
pub struct WindowConsumer {
    shared: Arc<WindowShared>,
    renderer: WindowRenderer,
    scale_type: ScaleType,
    id: Option<String>,
    dedicated: bool,
    thread: Option<DedicatedRenderer>,
}

impl WindowConsumer {
    pub fn new(window: Arc<dyn NativeWindow>, scale_type: ScaleType) -> Self {
        let shared = Arc::new(WindowShared {
            window: Mutex::new(window),
            mirror_mode: Mutex::new(MirrorMode::default()),
            needs_reset: AtomicBool::new(true),
            destroyed: AtomicBool::new(false),
            link: Mutex::new(None),
            frames_presented: AtomicU64::new(0),
        });
        Self {
            renderer: WindowRenderer::new(Arc::clone(&shared), scale_type),
            shared,
            scale_type,
            id: None,
            dedicated: false,
            thread: None,
        }
    }

    pub fn with_id(mut self, id: &str) -> Self {
        self.id = Some(id.to_string());
        self
    }

    /// Render on a private thread instead of the channel thread
    pub fn with_dedicated_thread(mut self) -> Self {
        self.dedicated = true;
        self
    }

    pub fn handle(&self) -> WindowHandle {
        WindowHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    fn start_thread(&self, ctx: &mut ChannelContext) -> GpuResult<DedicatedRenderer> {
        let device = ctx.device().create_shared()?;
        let renderer = WindowRenderer::new(Arc::clone(&self.shared), self.scale_type);
        let name = format!("window-{}", self.shared.window().target_id().raw());
        let worker = TaskLoop::start_with_init(
            &name,
            move || {
                let mut device = device;
                let dummy = device.create_offscreen_surface(1, 1).map_err(|e| e.to_string())?;
                device.make_current(dummy).map_err(|e| e.to_string())?;
                Ok(DedicatedState {
                    device,
                    programs: ProgramSet::new(),
                    dummy,
                    renderer,
                })
            },
            DedicatedState::release,
        )
        .map_err(GpuError::Backend)?;
        info!(name = %name, "Dedicated window render thread started");
        Ok(DedicatedRenderer {
            worker,
            mailbox: FrameMailbox::new(),
        })
    }

    fn stop_thread(&mut self) {
        if let Some(mut thread) = self.thread.take() {
            thread.mailbox.detach();
            thread.worker.quit();
        }
    }
}

impl VideoConsumer for WindowConsumer {
    fn on_consume_frame(&mut self, frame: &VideoFrame, ctx: &mut ChannelContext) {
        if self.dedicated {
            if self.thread.is_none() {
                match self.start_thread(ctx) {
                    Ok(thread) => self.thread = Some(thread),
                    Err(e) => {
                        warn!(error = %e, "Dedicated render thread unavailable, rendering on channel thread");
                        self.dedicated = false;
                    }
                }
            }
            if let Some(thread) = &self.thread {
                if thread.mailbox.push(frame.clone()) {
                    let mailbox = Arc::clone(&thread.mailbox);
                    thread
                        .worker
                        .sender()
                        .post(move |state: &mut DedicatedState| state.render_from(&mailbox));
                }
                return;
            }
        }
        let programs = ctx.programs;
        self.renderer.render(frame, ctx.device(), &programs);
    }

    fn drawing_target(&self) -> Option<TargetId> {
        Some(self.shared.window().target_id())
    }

    fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    fn set_mirror_mode(&mut self, mode: MirrorMode) {
        *self.shared.mirror_mode.lock().unwrap_or_else(PoisonError::into_inner) = mode;
    }

    fn recycle(&mut self, ctx: &mut ChannelContext) {
        self.stop_thread();
        self.renderer.release_surface(ctx.device());
    }

    fn on_connected(&mut self, link: ConsumerLink) {
        self.shared.destroyed.store(false, Ordering::SeqCst);
        self.shared.needs_reset.store(true, Ordering::SeqCst);
        *self.shared.link.lock().unwrap_or_else(PoisonError::into_inner) = Some(link);
    }

    fn on_disconnected(&mut self) {
        self.shared
            .link
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{FrameFormat, TextureKind};
    use crate::gpu::MemoryWindow;
    use crate::gpu::software::SoftwareDevice;
    use crate::pipeline::ChannelId;
    use image::{Rgba, RgbaImage};
    use std::thread;
    use std::time::{Duration, Instant};

    fn setup(width: u32, height: u32) -> (ChannelContext, VideoFrame) {
        let mut ctx = ChannelContext::with_device(ChannelId::Camera, Box::new(SoftwareDevice::new("win"))).unwrap();
        let device = ctx.device();
        let texture = device.create_texture(width, height).unwrap();
        let image = RgbaImage::from_fn(width, height, |x, _| Rgba([x as u8, 0, 0, 255]));
        device.upload_texture(texture, &image).unwrap();
        let frame = VideoFrame::from_texture(FrameFormat::new(width, height, TextureKind::Texture2D), texture);
        (ctx, frame)
    }

    #[test]
    fn test_presents_into_window() {
        let (mut ctx, frame) = setup(4, 2);
        let window = MemoryWindow::new(4, 2);
        let mut consumer = WindowConsumer::new(window.clone(), ScaleType::FitXY);
        consumer.on_consume_frame(&frame, &mut ctx);
        consumer.on_consume_frame(&frame, &mut ctx);
        assert_eq!(window.present_count(), 2);
        assert_eq!(consumer.handle().frames_presented(), 2);
        let shown = window.last_frame().unwrap();
        assert_eq!(shown.get_pixel(0, 0)[0], 0);
        assert_eq!(shown.get_pixel(3, 0)[0], 3);
        consumer.recycle(&mut ctx);
    }

    #[test]
    fn test_forced_mirror_flips_columns() {
        let (mut ctx, frame) = setup(4, 2);
        let window = MemoryWindow::new(4, 2);
        let mut consumer = WindowConsumer::new(window.clone(), ScaleType::FitXY);
        consumer.set_mirror_mode(MirrorMode::Enabled);
        consumer.on_consume_frame(&frame, &mut ctx);
        let shown = window.last_frame().unwrap();
        assert_eq!(shown.get_pixel(0, 0)[0], 3);
        assert_eq!(shown.get_pixel(3, 0)[0], 0);
    }

    #[test]
    fn test_invalid_window_drops_frame_until_replaced() {
        let (mut ctx, frame) = setup(4, 2);
        let window = MemoryWindow::new(4, 2);
        window.invalidate();
        let mut consumer = WindowConsumer::new(window.clone(), ScaleType::FitXY);
        consumer.on_consume_frame(&frame, &mut ctx);
        assert_eq!(window.present_count(), 0);

        let replacement = MemoryWindow::new(4, 2);
        consumer.handle().replace_window(replacement.clone());
        consumer.on_consume_frame(&frame, &mut ctx);
        assert_eq!(replacement.present_count(), 1);
        assert_eq!(consumer.drawing_target(), Some(replacement.target_id()));
    }

    #[test]
    fn test_destroyed_surface_is_silent() {
        let (mut ctx, frame) = setup(4, 2);
        let window = MemoryWindow::new(4, 2);
        let mut consumer = WindowConsumer::new(window.clone(), ScaleType::FitXY);
        consumer.on_consume_frame(&frame, &mut ctx);
        consumer.handle().surface_destroyed();
        consumer.on_consume_frame(&frame, &mut ctx);
        assert_eq!(window.present_count(), 1);
        assert!(consumer.renderer.surface.is_none(), "surface released once destroyed");
    }

    #[test]
    fn test_dedicated_thread_renders() {
        let (mut ctx, frame) = setup(4, 2);
        let window = MemoryWindow::new(4, 2);
        let mut consumer = WindowConsumer::new(window.clone(), ScaleType::FitXY).with_dedicated_thread();
        consumer.on_consume_frame(&frame, &mut ctx);

        let deadline = Instant::now() + Duration::from_secs(2);
        while window.present_count() == 0 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(window.present_count(), 1, "render thread should present the frame");
        consumer.recycle(&mut ctx);
        assert!(consumer.thread.is_none());
    }
}
