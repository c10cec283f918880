//! Construction Pipeline - from a placed blueprint to a finished structure.
//!
//! A site starts `Planned` with haul tasks for its materials. The first
//! delivery moves it to `InProgress`; tiles then unlock in build order as
//! their predecessors finish and their materials are on site, each unlocked
//! tile getting one build task. When every tile reaches full progress the
//! site completes and a building descriptor is emitted.

mod blueprint;
mod pipeline;
mod site;

pub use blueprint::*;
pub use pipeline::*;
pub use site::*;
