// SPDX-License-Identifier: GPL-3.0-only

//! Registry of channels keyed by [`ChannelId`]
//!
//! Channels are created on first use and keep their settings across
//! stop/start cycles. The manager is an ordinary value owned by whoever
//! drives the pipeline; there is no process-wide instance.

use super::channel::{ConsumerKey, VideoChannel};
use super::producer::VideoProducer;
use super::ChannelId;
use crate::consumers::{ConsumerKind, VideoConsumer};
use crate::errors::ChannelResult;
use crate::gpu::GpuBackend;
use crate::processors::Preprocessor;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::info;

pub struct ChannelManager {
    backend: GpuBackend,
    channels: Mutex<HashMap<ChannelId, VideoChannel>>,
}

impl ChannelManager {
    pub fn new(backend: GpuBackend) -> Self {
        Self {
            backend,
            channels: Mutex::new(HashMap::new()),
        }
    }

    pub fn backend(&self) -> GpuBackend {
        self.backend
    }

    fn channels(&self) -> MutexGuard<'_, HashMap<ChannelId, VideoChannel>> {
        self.channels.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Handle for `id`, creating a stopped channel if none exists
    pub fn channel(&self, id: ChannelId) -> VideoChannel {
        self.channels()
            .entry(id)
            .or_insert_with(|| VideoChannel::new(id, self.backend))
            .clone()
    }

    /// Create the channel if needed and make sure its thread is running
    pub fn ensure_channel_running(&self, id: ChannelId) -> ChannelResult<VideoChannel> {
        let channel = self.channel(id);
        channel.start()?;
        Ok(channel)
    }

    pub fn stop_channel(&self, id: ChannelId) {
        let channel = self.channels().get(&id).cloned();
        if let Some(channel) = channel {
            channel.stop();
        }
    }

    pub fn is_channel_running(&self, id: ChannelId) -> bool {
        self.channels().get(&id).is_some_and(VideoChannel::is_running)
    }

    pub fn connect_producer(&self, id: ChannelId, producer: &VideoProducer) -> ChannelResult<()> {
        self.channel(id).connect_producer(producer)
    }

    pub fn disconnect_producer(&self, id: ChannelId) {
        if let Some(channel) = self.channels().get(&id).cloned() {
            channel.disconnect_producer();
        }
    }

    pub fn connect_consumer(
        &self,
        id: ChannelId,
        consumer: Box<dyn VideoConsumer>,
        kind: ConsumerKind,
    ) -> ChannelResult<ConsumerKey> {
        self.channel(id).connect_consumer(consumer, kind)
    }

    pub fn disconnect_consumer(&self, id: ChannelId, key: ConsumerKey) -> ChannelResult<()> {
        self.channel(id).disconnect_consumer(key)
    }

    pub fn set_preprocessor(&self, id: ChannelId, preprocessor: Option<Box<dyn Preprocessor>>) -> ChannelResult<()> {
        self.channel(id).set_preprocessor(preprocessor)
    }

    pub fn has_preprocessor(&self, id: ChannelId) -> bool {
        self.channels().get(&id).is_some_and(VideoChannel::has_preprocessor)
    }

    pub fn enable_pre_process(&self, id: ChannelId, enabled: bool) -> ChannelResult<()> {
        self.channel(id).enable_pre_process(enabled)
    }

    pub fn enable_offscreen_mode(&self, id: ChannelId, enabled: bool) {
        self.channel(id).enable_offscreen_mode(enabled);
    }

    /// Stop every running channel
    pub fn stop_all(&self) {
        let channels: Vec<VideoChannel> = self.channels().values().cloned().collect();
        let running = channels.iter().filter(|channel| channel.is_running()).count();
        if running > 0 {
            info!(running, "Stopping all channels");
        }
        for channel in channels {
            channel.stop();
        }
    }
}

impl Drop for ChannelManager {
    fn drop(&mut self) {
        self.stop_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ChannelError;

    #[test]
    fn test_channels_created_lazily() {
        let manager = ChannelManager::new(GpuBackend::software());
        assert!(!manager.is_channel_running(ChannelId::Camera));
        let channel = manager.ensure_channel_running(ChannelId::Camera).unwrap();
        assert!(manager.is_channel_running(ChannelId::Camera));
        assert!(!manager.is_channel_running(ChannelId::ScreenShare));

        let again = manager.ensure_channel_running(ChannelId::Camera).unwrap();
        assert_eq!(again.id(), channel.id());

        manager.stop_channel(ChannelId::Camera);
        assert!(!channel.is_running());
        assert_eq!(
            manager.enable_pre_process(ChannelId::Camera, true),
            Err(ChannelError::NotRunning(ChannelId::Camera))
        );
    }

    #[test]
    fn test_stop_all() {
        let manager = ChannelManager::new(GpuBackend::software());
        for id in ChannelId::ALL {
            manager.ensure_channel_running(id).unwrap();
        }
        manager.stop_all();
        for id in ChannelId::ALL {
            assert!(!manager.is_channel_running(id), "{} still running", id);
        }
    }
}
