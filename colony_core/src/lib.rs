//! # Colony Core
//!
//! The work-scheduling and logistics engine of the colony simulation. Workers
//! discover, score and claim units of work without double assignment, while
//! stockpiles track storage capacity and construction sites turn placed
//! blueprints into finished structures.
//!
//! ## Core Components
//!
//! - **task_registry**: Outstanding tasks, utility scoring and atomic claims
//! - **stockpile**: Storage zones, slot search and capacity reservations
//! - **construction**: Blueprints, sites and tile-by-tile build progress
//! - **scheduler**: The per-tick worker loop and task execution state machine
//! - **events**: Publish/subscribe bus for UI, audio and achievement collaborators
//! - **colony**: Facade composing all of the above behind one tick
//!
//! ## Design Philosophy
//!
//! - **Arena + index**: Tasks, stockpiles and sites live in tables keyed by dense ids
//! - **Tick-driven**: Work spanning many ticks is an explicit resumable state value
//! - **Snapshot-friendly**: All state is plain data that serializes as a whole

pub mod colony;
pub mod config;
pub mod construction;
pub mod error;
pub mod events;
pub mod scheduler;
pub mod snapshot;
pub mod stockpile;
pub mod task_registry;

pub use colony::*;
pub use config::*;
pub use construction::*;
pub use error::*;
pub use events::*;
pub use scheduler::*;
pub use snapshot::*;
pub use stockpile::*;
pub use task_registry::*;
