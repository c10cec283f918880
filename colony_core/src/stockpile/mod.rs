//! Stockpile Manager - storage zones, their slots and capacity reservations.
//!
//! A stockpile is a rectangular zone with one slot per tile. A slot holds a
//! single item kind up to its capacity and may be reserved by at most one
//! task; reserved slots are invisible to every other deposit/withdraw search.

mod manager;
mod slot;

pub use manager::*;
pub use slot::*;
