//! Task Registry & Scorer - every outstanding unit of work and its claim lifecycle.
//!
//! - **Task**: one unit of work with a capability requirement, position and priority
//! - **Scoring**: utility of a (worker, task) pair with deterministic tie-breaks
//! - **Registry**: the only writer of task state; claims are compare-and-set

mod registry;
mod score;
mod task;

pub use registry::*;
pub use score::*;
pub use task::*;
