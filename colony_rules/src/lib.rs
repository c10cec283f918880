//! # Colony Rules
//!
//! The shared vocabulary crate - grid positions, items, task kinds, capability
//! tags, scoring weights and the read-only worker snapshots handed to the
//! scheduler each tick. This crate holds no scheduling logic.

pub mod entities;
pub mod mechanics;
pub mod spatial;

pub use entities::*;
pub use mechanics::*;
pub use spatial::*;
