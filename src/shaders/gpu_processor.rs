// SPDX-License-Identifier: GPL-3.0-only

//! Render-target sizing and wgpu readback helpers

use crate::gpu::wgpu;

/// Size an off-screen program last allocated its framebuffer for
#[derive(Default, Clone, Copy, PartialEq, Debug)]
pub struct CachedDimensions {
    pub width: u32,
    pub height: u32,
}

impl CachedDimensions {
    pub fn needs_update(&self, width: u32, height: u32) -> bool {
        (self.width, self.height) != (width, height)
    }

    pub fn update(&mut self, width: u32, height: u32) {
        self.width = width;
        self.height = height;
    }

    /// Forget the size so the next `needs_update` is true for any real size
    pub fn invalidate(&mut self) {
        *self = Self::default();
    }
}

/// Map a `MAP_READ` staging buffer and copy its contents out
pub async fn read_buffer_async(device: &wgpu::Device, buffer: &wgpu::Buffer) -> Result<Vec<u8>, String> {
    let slice = buffer.slice(..);
    let (mapped_tx, mapped_rx) = futures::channel::oneshot::channel();
    slice.map_async(wgpu::MapMode::Read, move |result| {
        let _ = mapped_tx.send(result);
    });

    device
        .poll(wgpu::PollType::wait_indefinitely())
        .map_err(|e| format!("device poll failed: {}", e))?;
    mapped_rx
        .await
        .map_err(|_| "staging buffer callback dropped".to_string())?
        .map_err(|e| format!("staging buffer map failed: {}", e))?;

    let pixels = slice.get_mapped_range().to_vec();
    buffer.unmap();
    Ok(pixels)
}

/// Row pitch of a texture-to-buffer copy, padded to wgpu's 256 byte rule
pub fn padded_bytes_per_row(width: u32) -> u32 {
    (width * 4).div_ceil(wgpu::COPY_BYTES_PER_ROW_ALIGNMENT) * wgpu::COPY_BYTES_PER_ROW_ALIGNMENT
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_framebuffer_size_tracking() {
        let mut dims = CachedDimensions::default();
        assert!(dims.needs_update(640, 480));

        dims.update(640, 480);
        assert!(!dims.needs_update(640, 480));
        assert!(dims.needs_update(480, 640), "A rotated output is a new size");

        dims.invalidate();
        assert!(dims.needs_update(640, 480));
    }

    #[test]
    fn test_padded_bytes_per_row() {
        assert_eq!(padded_bytes_per_row(64), 256);
        assert_eq!(padded_bytes_per_row(65), 512);
        assert_eq!(padded_bytes_per_row(1), 256);
    }
}
