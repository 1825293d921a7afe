// SPDX-License-Identifier: GPL-3.0-only

//! Camera capture and GPU compositing pipeline
//!
//! Frames travel from a camera device to any number of windows and
//! off-screen consumers through a per-channel worker thread that owns the
//! GPU context:
//!
//! ```text
//! CameraDevice ─► CameraCapture ─► VideoProducer ─(latest wins)─► channel thread
//!                                                                   │
//!                      preprocess ─► rotate ─► watermark ◄──────────┘
//!                                                 │
//!                      on-screen consumers ◄──────┴──────► off-screen consumers
//! ```
//!
//! # Architecture
//!
//! - [`backends`]: camera device abstraction and capture state machine
//! - [`pipeline`]: channels, their worker threads and the channel manager
//! - [`processors`]: rotate and watermark stages plus the preprocessor hook
//! - [`consumers`]: window and callback consumers
//! - [`gpu`]: GL-like device abstraction with software and wgpu backends
//! - [`shaders`]: textured-quad draw programs and offscreen targets
//! - [`matrix`]: vertex and texture transform builder
//! - [`camera`]: application-facing manager
//! - [`config`]: user configuration handling

pub mod backends;
pub mod camera;
pub mod cli;
pub mod config;
pub mod constants;
pub mod consumers;
pub mod errors;
pub mod frame;
pub mod gpu;
pub mod matrix;
pub mod pipeline;
pub mod processors;
pub mod shaders;

// Re-export commonly used types
pub use backends::camera::{CameraDevice, CameraStateListener, SyntheticCamera};
pub use camera::{CameraChannel, CameraVideoManager};
pub use config::PipelineConfig;
pub use constants::{CameraFacing, MirrorMode};
pub use errors::{CaptureErrorCode, PipelineError, PipelineResult};
pub use frame::{Rotation, VideoFrame};
pub use gpu::{GpuBackend, MemoryWindow};
pub use matrix::{MatrixOperator, ScaleType};
pub use pipeline::{ChannelId, ChannelManager, VideoChannel, VideoProducer};
