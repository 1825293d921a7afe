// SPDX-License-Identifier: GPL-3.0-only

//! Drawable targets for on-screen consumers
//!
//! A [`NativeWindow`] is whatever the host UI hands the pipeline to draw
//! into. The pipeline only needs its size, whether it is still alive, a
//! stable identity and a way to present finished images.

use image::RgbaImage;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::trace;

/// Identity of a drawing target
///
/// Two consumers returning the same `TargetId` draw into the same logical
/// surface and replace each other on connect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TargetId(u64);

static NEXT_TARGET_ID: AtomicU64 = AtomicU64::new(1);

impl TargetId {
    /// A fresh process-unique identity
    pub fn unique() -> Self {
        Self(NEXT_TARGET_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Identity of a shared object, stable for the object's lifetime
    pub fn of<T: ?Sized>(object: &Arc<T>) -> Self {
        Self(Arc::as_ptr(object) as *const () as usize as u64)
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// Platform window or surface texture the pipeline presents into
pub trait NativeWindow: Send + Sync {
    /// Equals-stable identity of the logical surface
    fn target_id(&self) -> TargetId;

    /// Current measured size in pixels
    fn size(&self) -> (u32, u32);

    /// False once the platform destroyed the surface
    fn is_valid(&self) -> bool;

    /// Receive a finished frame, top row first
    fn present(&self, image: RgbaImage) -> Result<(), String>;
}

#[derive(Default)]
struct MemoryWindowState {
    width: u32,
    height: u32,
    last_frame: Option<RgbaImage>,
}

/// In-memory window that keeps the last presented image
pub struct MemoryWindow {
    id: TargetId,
    state: Mutex<MemoryWindowState>,
    valid: AtomicBool,
    presents: AtomicU64,
}

impl MemoryWindow {
    pub fn new(width: u32, height: u32) -> Arc<Self> {
        Arc::new(Self {
            id: TargetId::unique(),
            state: Mutex::new(MemoryWindowState {
                width,
                height,
                last_frame: None,
            }),
            valid: AtomicBool::new(true),
            presents: AtomicU64::new(0),
        })
    }

    pub fn resize(&self, width: u32, height: u32) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.width = width;
        state.height = height;
    }

    /// Simulate the platform destroying the surface
    pub fn invalidate(&self) {
        self.valid.store(false, Ordering::SeqCst);
    }

    /// Number of successful presents
    pub fn present_count(&self) -> u64 {
        self.presents.load(Ordering::SeqCst)
    }

    pub fn last_frame(&self) -> Option<RgbaImage> {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .last_frame
            .clone()
    }
}

impl NativeWindow for MemoryWindow {
    fn target_id(&self) -> TargetId {
        self.id
    }

    fn size(&self) -> (u32, u32) {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        (state.width, state.height)
    }

    fn is_valid(&self) -> bool {
        self.valid.load(Ordering::SeqCst)
    }

    fn present(&self, image: RgbaImage) -> Result<(), String> {
        if !self.is_valid() {
            return Err("window destroyed".to_string());
        }
        trace!(width = image.width(), height = image.height(), "Window present");
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .last_frame = Some(image);
        self.presents.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_identity_of_arc() {
        let a = Arc::new(5u8);
        let b = Arc::clone(&a);
        let c = Arc::new(5u8);
        assert_eq!(TargetId::of(&a), TargetId::of(&b));
        assert_ne!(TargetId::of(&a), TargetId::of(&c));
    }

    #[test]
    fn test_invalid_window_rejects_present() {
        let window = MemoryWindow::new(4, 4);
        window.invalidate();
        assert!(window.present(RgbaImage::new(4, 4)).is_err());
        assert_eq!(window.present_count(), 0);
    }
}
