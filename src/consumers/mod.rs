// SPDX-License-Identifier: GPL-3.0-only

//! Frame sinks attached to a channel
//!
//! On-screen consumers draw into a window; off-screen consumers receive the
//! composited frame for anything else. Both are driven on the channel
//! thread with the channel's [`ChannelContext`].

pub mod frame_callback;
pub mod window;

pub use frame_callback::{CaptureFrameConsumer, FrameCallbackConsumer, FrameRecorder, RecordedFrame};
pub use window::{WindowConsumer, WindowHandle};

use crate::constants::MirrorMode;
use crate::frame::VideoFrame;
use crate::gpu::TargetId;
use crate::pipeline::{ChannelContext, ConsumerKey, ConsumerLink};
use tracing::debug;

/// Which list of a channel a consumer lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConsumerKind {
    OnScreen,
    OffScreen,
}

impl std::fmt::Display for ConsumerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConsumerKind::OnScreen => write!(f, "on-screen"),
            ConsumerKind::OffScreen => write!(f, "off-screen"),
        }
    }
}

/// A sink for composited frames
///
/// Every method except `on_connected` runs on the channel thread.
pub trait VideoConsumer: Send {
    fn on_consume_frame(&mut self, frame: &VideoFrame, ctx: &mut ChannelContext);

    /// Identity of the surface this consumer draws into
    fn drawing_target(&self) -> Option<TargetId>;

    /// Logical slot name; consumers sharing a non-empty id replace each other
    fn id(&self) -> Option<&str> {
        None
    }

    fn set_mirror_mode(&mut self, _mode: MirrorMode) {}

    /// Free every GPU resource this consumer created
    fn recycle(&mut self, ctx: &mut ChannelContext);

    /// Called before the consumer is handed to the channel
    fn on_connected(&mut self, _link: ConsumerLink) {}

    fn on_disconnected(&mut self) {}
}

pub(crate) struct ConsumerEntry {
    pub(crate) key: ConsumerKey,
    pub(crate) consumer: Box<dyn VideoConsumer>,
}

/// Whether `incoming` takes over the slot of `existing`
pub fn is_same_consumer(existing: &dyn VideoConsumer, incoming: &dyn VideoConsumer) -> bool {
    if let (Some(a), Some(b)) = (existing.drawing_target(), incoming.drawing_target())
        && a == b
    {
        return true;
    }
    matches!(
        (existing.id(), incoming.id()),
        (Some(a), Some(b)) if !a.is_empty() && a == b
    )
}

/// Recycle and remove every consumer that `incoming` replaces
pub(crate) fn remove_same_consumers(
    list: &mut Vec<ConsumerEntry>,
    incoming: &dyn VideoConsumer,
    ctx: &mut ChannelContext,
) -> usize {
    let mut removed = 0;
    list.retain_mut(|entry| {
        if !is_same_consumer(entry.consumer.as_ref(), incoming) {
            return true;
        }
        debug!(key = entry.key.raw(), id = ?entry.consumer.id(), "Replacing consumer");
        entry.consumer.recycle(ctx);
        entry.consumer.on_disconnected();
        removed += 1;
        false
    });
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::software::SoftwareDevice;
    use crate::pipeline::ChannelId;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Probe {
        target: Option<TargetId>,
        id: Option<String>,
        recycled: Arc<AtomicU32>,
    }

    impl VideoConsumer for Probe {
        fn on_consume_frame(&mut self, _frame: &VideoFrame, _ctx: &mut ChannelContext) {}

        fn drawing_target(&self) -> Option<TargetId> {
            self.target
        }

        fn id(&self) -> Option<&str> {
            self.id.as_deref()
        }

        fn recycle(&mut self, _ctx: &mut ChannelContext) {
            self.recycled.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn probe(target: Option<TargetId>, id: Option<&str>) -> (Probe, Arc<AtomicU32>) {
        let recycled = Arc::new(AtomicU32::new(0));
        (
            Probe {
                target,
                id: id.map(str::to_string),
                recycled: Arc::clone(&recycled),
            },
            recycled,
        )
    }

    fn entry(key: u64, probe: Probe) -> ConsumerEntry {
        ConsumerEntry {
            key: ConsumerKey::from_raw(key),
            consumer: Box::new(probe),
        }
    }

    #[test]
    fn test_same_target_replaces() {
        let mut ctx = ChannelContext::with_device(ChannelId::Camera, Box::new(SoftwareDevice::new("c"))).unwrap();
        let target = TargetId::unique();
        let (old, old_recycled) = probe(Some(target), None);
        let (other, other_recycled) = probe(Some(TargetId::unique()), None);
        let mut list = vec![entry(1, old), entry(2, other)];

        let (incoming, _) = probe(Some(target), None);
        assert_eq!(remove_same_consumers(&mut list, &incoming, &mut ctx), 1);
        assert_eq!(list.len(), 1);
        assert_eq!(old_recycled.load(Ordering::SeqCst), 1);
        assert_eq!(other_recycled.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_same_id_replaces_but_empty_ids_never_match() {
        let (a, _) = probe(Some(TargetId::unique()), Some("preview"));
        let (b, _) = probe(Some(TargetId::unique()), Some("preview"));
        assert!(is_same_consumer(&a, &b));

        let (c, _) = probe(None, Some(""));
        let (d, _) = probe(None, Some(""));
        assert!(!is_same_consumer(&c, &d));

        let (e, _) = probe(None, None);
        let (f, _) = probe(None, None);
        assert!(!is_same_consumer(&e, &f), "absent targets and ids never match");
    }
}
