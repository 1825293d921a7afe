// SPDX-License-Identifier: MPL-2.0

//! Capture backends
//!
//! - [`camera`]: camera device abstraction, capture state machine and the
//!   in-tree synthetic camera

pub mod camera;
