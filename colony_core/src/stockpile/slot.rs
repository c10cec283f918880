//! Stockpiles and their capacity-bounded slots.

use colony_rules::{ItemCategory, ItemKind, Position, Region};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::task_registry::TaskId;

/// Unique identifier for stockpiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StockpileId(pub u32);

impl std::fmt::Display for StockpileId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "stockpile-{}", self.0)
    }
}

/// Address of one slot: stockpile plus index into its slot list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SlotRef {
    pub stockpile: StockpileId,
    pub index: usize,
}

impl SlotRef {
    pub fn new(stockpile: StockpileId, index: usize) -> Self {
        Self { stockpile, index }
    }
}

impl std::fmt::Display for SlotRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.stockpile, self.index)
    }
}

/// One storage cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockpileSlot {
    pub position: Position,
    /// Kind currently stored; `None` while empty.
    pub item: Option<ItemKind>,
    pub quantity: u32,
    pub capacity: u32,
    /// Task holding the reservation, if any.
    pub reserved_by: Option<TaskId>,
}

impl StockpileSlot {
    pub fn new(position: Position, capacity: u32) -> Self {
        Self {
            position,
            item: None,
            quantity: 0,
            capacity,
            reserved_by: None,
        }
    }

    pub fn is_reserved(&self) -> bool {
        self.reserved_by.is_some()
    }

    pub fn free_capacity(&self) -> u32 {
        self.capacity.saturating_sub(self.quantity)
    }

    /// Unreserved and able to take `quantity` more of `item`.
    pub fn can_accept(&self, item: ItemKind, quantity: u32) -> bool {
        !self.is_reserved()
            && self.item.map_or(true, |stored| stored == item)
            && self.free_capacity() >= quantity.max(1)
    }

    /// Unreserved and holding at least `quantity` of `item`.
    pub fn can_supply(&self, item: ItemKind, quantity: u32) -> bool {
        !self.is_reserved() && self.item == Some(item) && self.quantity >= quantity.max(1)
    }
}

/// A storage zone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stockpile {
    pub id: StockpileId,
    pub bounds: Region,
    pub accepts: BTreeSet<ItemCategory>,
    /// Higher ranks are filled and drained first.
    pub priority: i32,
    pub slots: Vec<StockpileSlot>,
}

impl Stockpile {
    /// Create a zone with one empty slot per tile of `bounds`.
    pub fn new(
        id: StockpileId,
        bounds: Region,
        accepts: BTreeSet<ItemCategory>,
        priority: i32,
        slot_capacity: u32,
    ) -> Self {
        let slots = bounds
            .tiles()
            .map(|position| StockpileSlot::new(position, slot_capacity))
            .collect();
        Self {
            id,
            bounds,
            accepts,
            priority,
            slots,
        }
    }

    pub fn accepts(&self, item: ItemKind) -> bool {
        self.accepts.contains(&item.category())
    }

    /// Total quantity of `item` stored here.
    pub fn stored(&self, item: ItemKind) -> u32 {
        self.slots
            .iter()
            .filter(|slot| slot.item == Some(item))
            .map(|slot| slot.quantity)
            .sum()
    }

    pub fn reserved_slots(&self) -> impl Iterator<Item = (SlotRef, TaskId)> + '_ {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            slot.reserved_by
                .map(|task| (SlotRef::new(self.id, index), task))
        })
    }
}
