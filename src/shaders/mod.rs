// SPDX-License-Identifier: GPL-3.0-only
//! Draw programs and shared shader sources
//!
//! Every draw in the pipeline is the same textured quad, parameterised by
//! a texture transform, an MVP and an alpha. The programs here wrap that
//! draw for on-screen targets ([`TextureProgram`]) and for off-screen
//! framebuffers ([`OffscreenProgram`]).

mod gpu_processor;
mod program;

pub use gpu_processor::{CachedDimensions, padded_bytes_per_row, read_buffer_async};
pub use program::{OffscreenProgram, ProgramSet, QuadUniforms, TextureProgram};

/// WGSL source of the textured quad used by the wgpu device
pub const QUAD_SHADER: &str = include_str!("textured_quad.wgsl");
