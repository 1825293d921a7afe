// SPDX-License-Identifier: GPL-3.0-only

//! Capture to channel hand-off
//!
//! The mailbox holds at most one frame. A push while a frame is still
//! pending replaces it (latest wins) and counts a drop; the producer never
//! blocks and nothing queues up behind a slow channel. The lock is only
//! held to swap the slot, never across GPU work.

use super::channel::ChannelRuntime;
use super::worker::TaskSender;
use crate::frame::VideoFrame;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, trace};

#[derive(Default)]
struct MailboxSlot {
    frame: Option<VideoFrame>,
    /// A drain task is queued or running
    scheduled: bool,
    attached: bool,
}

/// Single-slot, latest-wins frame hand-off
#[derive(Default)]
pub struct FrameMailbox {
    slot: Mutex<MailboxSlot>,
    dropped_frames: AtomicU64,
    dropped_since_last: AtomicU64,
    delivered_frames: AtomicU64,
}

impl FrameMailbox {
    /// Create an attached mailbox
    pub fn new() -> Arc<Self> {
        let mailbox = Self::default();
        mailbox.lock().attached = true;
        Arc::new(mailbox)
    }

    fn lock(&self) -> MutexGuard<'_, MailboxSlot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store `frame` as the pending frame.
    ///
    /// Returns true when the caller must schedule a drain; at most one drain
    /// is outstanding at a time.
    pub fn push(&self, frame: VideoFrame) -> bool {
        let mut slot = self.lock();
        if !slot.attached {
            trace!("Mailbox detached, frame discarded");
            return false;
        }
        if slot.frame.replace(frame).is_some() {
            self.dropped_frames.fetch_add(1, Ordering::Relaxed);
            self.dropped_since_last.fetch_add(1, Ordering::Relaxed);
        }
        if slot.scheduled {
            false
        } else {
            slot.scheduled = true;
            true
        }
    }

    /// Take the pending frame and clear the scheduled flag
    pub fn take(&self) -> Option<VideoFrame> {
        let frame = {
            let mut slot = self.lock();
            slot.scheduled = false;
            slot.frame.take()
        };
        if frame.is_some() {
            self.delivered_frames.fetch_add(1, Ordering::Relaxed);
            let dropped = self.dropped_since_last.swap(0, Ordering::Relaxed);
            if dropped > 0 {
                debug!(
                    dropped,
                    total = self.dropped_frames.load(Ordering::Relaxed),
                    "Frames dropped since last delivery"
                );
            }
        }
        frame
    }

    /// Discard the pending frame and refuse further pushes
    pub fn detach(&self) {
        let mut slot = self.lock();
        slot.attached = false;
        slot.scheduled = false;
        slot.frame = None;
    }

    /// Accept pushes again after a detach
    pub fn reattach(&self) {
        self.lock().attached = true;
    }

    pub fn is_attached(&self) -> bool {
        self.lock().attached
    }

    pub fn has_pending(&self) -> bool {
        self.lock().frame.is_some()
    }

    /// Frames replaced before the channel could take them
    pub fn dropped_frames(&self) -> u64 {
        self.dropped_frames.load(Ordering::Relaxed)
    }

    pub fn delivered_frames(&self) -> u64 {
        self.delivered_frames.load(Ordering::Relaxed)
    }
}

struct ProducerInner {
    mailbox: Arc<FrameMailbox>,
    channel: Mutex<Option<TaskSender<ChannelRuntime>>>,
}

/// Frame source attached to at most one channel
///
/// Clones share the same mailbox and channel attachment.
#[derive(Clone)]
pub struct VideoProducer {
    inner: Arc<ProducerInner>,
}

impl Default for VideoProducer {
    fn default() -> Self {
        Self::new()
    }
}

impl VideoProducer {
    pub fn new() -> Self {
        let mailbox = FrameMailbox::new();
        mailbox.detach();
        Self {
            inner: Arc::new(ProducerInner {
                mailbox,
                channel: Mutex::new(None),
            }),
        }
    }

    pub(crate) fn attach(&self, sender: TaskSender<ChannelRuntime>) {
        *self.inner.channel.lock().unwrap_or_else(PoisonError::into_inner) = Some(sender);
        self.inner.mailbox.reattach();
    }

    /// Drop the pending frame and stop scheduling drains
    pub(crate) fn detach(&self) {
        self.inner.mailbox.detach();
        self.inner
            .channel
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    /// Whether both handles refer to the same producer
    pub fn ptr_eq(&self, other: &VideoProducer) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn is_connected(&self) -> bool {
        self.inner.mailbox.is_attached()
    }

    pub fn mailbox(&self) -> &Arc<FrameMailbox> {
        &self.inner.mailbox
    }

    /// Hand a frame to the channel thread without blocking
    ///
    /// Frames pushed while disconnected are discarded.
    pub fn push_frame(&self, frame: VideoFrame) {
        if !self.inner.mailbox.push(frame) {
            return;
        }
        let sender = self
            .inner
            .channel
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let Some(sender) = sender else {
            return;
        };
        let mailbox = Arc::clone(&self.inner.mailbox);
        if !sender.post(move |runtime: &mut ChannelRuntime| runtime.consume_from(&mailbox)) {
            trace!("Channel gone, pending frame discarded");
            self.inner.mailbox.detach();
        }
    }

    pub fn dropped_frames(&self) -> u64 {
        self.inner.mailbox.dropped_frames()
    }

    pub fn delivered_frames(&self) -> u64 {
        self.inner.mailbox.delivered_frames()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{FrameFormat, TextureKind};
    use crate::gpu::TextureId;

    fn frame(width: u32) -> VideoFrame {
        VideoFrame::from_texture(FrameFormat::new(width, 4, TextureKind::Texture2D), TextureId(1))
    }

    #[test]
    fn test_latest_frame_wins() {
        let mailbox = FrameMailbox::new();
        assert!(mailbox.push(frame(1)), "first push schedules a drain");
        assert!(!mailbox.push(frame(2)));
        assert!(!mailbox.push(frame(3)));

        let delivered = mailbox.take().unwrap();
        assert_eq!(delivered.format.width, 3);
        assert_eq!(mailbox.dropped_frames(), 2);
        assert!(mailbox.take().is_none());
        assert_eq!(mailbox.delivered_frames(), 1);
    }

    #[test]
    fn test_push_after_take_schedules_again() {
        let mailbox = FrameMailbox::new();
        assert!(mailbox.push(frame(1)));
        mailbox.take();
        assert!(mailbox.push(frame(2)));
        assert_eq!(mailbox.dropped_frames(), 0);
    }

    #[test]
    fn test_detach_discards_pending() {
        let mailbox = FrameMailbox::new();
        mailbox.push(frame(1));
        mailbox.detach();
        assert!(!mailbox.has_pending());
        assert!(!mailbox.push(frame(2)), "detached mailbox never schedules");
        assert!(mailbox.take().is_none());
    }

    #[test]
    fn test_unconnected_producer_discards() {
        let producer = VideoProducer::new();
        producer.push_frame(frame(1));
        assert!(!producer.is_connected());
        assert!(!producer.mailbox().has_pending());
    }
}
