// SPDX-License-Identifier: GPL-3.0-only

//! Video channels
//!
//! A channel is one logical video pipeline backed by one worker thread and
//! one GPU context. Frames enter through a [`VideoProducer`], run through
//! preprocess, rotate and watermark on the channel thread, and are then
//! fanned out to on-screen and off-screen consumers.
//!
//! ```text
//!  capture thread                channel thread
//! ┌──────────────┐  mailbox   ┌───────────────────────────────────────┐
//! │ VideoProducer├───────────►│ preprocess → rotate → watermark       │
//! └──────────────┘ (latest    │      │                                │
//!                   wins)     │      ├─► on-screen consumers          │
//!                             │      └─► off-screen consumers (gated) │
//!                             └───────────────────────────────────────┘
//! ```

pub mod channel;
pub mod context;
pub mod manager;
pub mod producer;
pub mod worker;

pub use channel::{ChannelRuntime, ConsumerKey, ConsumerLink, VideoChannel, WeakVideoChannel};
pub use context::{ChannelContext, ErrorCallback};
pub use manager::ChannelManager;
pub use producer::{FrameMailbox, VideoProducer};
pub use worker::{TaskLoop, TaskSender};

use std::fmt;

/// Identifier of a registered channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ChannelId {
    /// Local camera capture
    Camera,
    /// Screen sharing source
    ScreenShare,
    /// Application defined source
    Custom,
}

impl ChannelId {
    pub const ALL: [ChannelId; 3] = [ChannelId::Camera, ChannelId::ScreenShare, ChannelId::Custom];

    /// Numeric id (camera = 0, screen share = 1, custom = 2)
    pub fn as_int(&self) -> i32 {
        match self {
            ChannelId::Camera => 0,
            ChannelId::ScreenShare => 1,
            ChannelId::Custom => 2,
        }
    }

    pub fn from_int(value: i32) -> Option<Self> {
        Self::ALL.into_iter().find(|id| id.as_int() == value)
    }

    /// Name used for the channel thread and in logs
    pub fn name(&self) -> &'static str {
        match self {
            ChannelId::Camera => "camera_channel",
            ChannelId::ScreenShare => "screen_share_channel",
            ChannelId::Custom => "custom_channel",
        }
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}
