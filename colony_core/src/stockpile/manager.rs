//! Deposit/withdraw target search and slot reservations.

use colony_rules::{Distance, ItemCategory, ItemKind, Position, Region};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, error, trace};

use super::{SlotRef, Stockpile, StockpileId, StockpileSlot};
use crate::error::{ColonyError, Result};
use crate::task_registry::TaskId;

/// Plain table state; also the persisted form of the manager.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StockpileTable {
    pub stockpiles: BTreeMap<StockpileId, Stockpile>,
    pub next_id: u32,
}

impl StockpileTable {
    fn slot(&self, slot: SlotRef) -> Result<&StockpileSlot> {
        self.stockpiles
            .get(&slot.stockpile)
            .ok_or(ColonyError::StockpileNotFound(slot.stockpile))?
            .slots
            .get(slot.index)
            .ok_or(ColonyError::SlotNotFound(slot))
    }

    fn slot_mut(&mut self, slot: SlotRef) -> Result<&mut StockpileSlot> {
        self.stockpiles
            .get_mut(&slot.stockpile)
            .ok_or(ColonyError::StockpileNotFound(slot.stockpile))?
            .slots
            .get_mut(slot.index)
            .ok_or(ColonyError::SlotNotFound(slot))
    }

    /// Stockpiles accepting `item`, by priority descending, then distance from
    /// `source` when given, then id.
    fn candidates(
        &self,
        item: ItemKind,
        source: Option<Position>,
        distance: &dyn Distance,
    ) -> Vec<&Stockpile> {
        let mut piles: Vec<(&Stockpile, f32)> = self
            .stockpiles
            .values()
            .filter(|pile| pile.accepts(item))
            .map(|pile| {
                let dist = source
                    .map(|from| distance.distance(from, pile.bounds.nearest_tile(from)))
                    .unwrap_or(0.0);
                (pile, dist)
            })
            .collect();
        piles.sort_by(|(a, da), (b, db)| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| da.total_cmp(db))
                .then_with(|| a.id.cmp(&b.id))
        });
        piles.into_iter().map(|(pile, _)| pile).collect()
    }

    fn find_slot<F>(
        &self,
        item: ItemKind,
        source: Option<Position>,
        distance: &dyn Distance,
        fits: F,
    ) -> Option<SlotRef>
    where
        F: Fn(&StockpileSlot) -> bool,
    {
        self.candidates(item, source, distance)
            .into_iter()
            .find_map(|pile| {
                pile.slots
                    .iter()
                    .position(|slot| fits(slot))
                    .map(|index| SlotRef::new(pile.id, index))
            })
    }

    fn reserve(&mut self, slot: SlotRef, task: TaskId) -> Result<()> {
        let entry = self.slot_mut(slot)?;
        match entry.reserved_by {
            Some(holder) if holder != task => {
                trace!(slot = %slot, task = %task, holder = %holder, "reservation conflict");
                Err(ColonyError::SlotReservationConflict { slot, holder })
            }
            _ => {
                entry.reserved_by = Some(task);
                debug!(slot = %slot, task = %task, "slot reserved");
                Ok(())
            }
        }
    }
}

/// Owns every stockpile. All operations lock the table once, so a search and
/// the reservation that follows it can be made atomic.
#[derive(Debug)]
pub struct StockpileManager {
    table: Mutex<StockpileTable>,
    slot_capacity: u32,
}

impl StockpileManager {
    pub fn new(slot_capacity: u32) -> Self {
        Self::from_table(StockpileTable::default(), slot_capacity)
    }

    pub fn from_table(table: StockpileTable, slot_capacity: u32) -> Self {
        Self {
            table: Mutex::new(table),
            slot_capacity,
        }
    }

    pub fn snapshot(&self) -> StockpileTable {
        self.table().clone()
    }

    fn table(&self) -> MutexGuard<'_, StockpileTable> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Designate a new storage zone.
    pub fn add_stockpile(
        &self,
        bounds: Region,
        accepts: BTreeSet<ItemCategory>,
        priority: i32,
    ) -> StockpileId {
        let mut table = self.table();
        let id = StockpileId(table.next_id);
        table.next_id += 1;
        let pile = Stockpile::new(id, bounds, accepts, priority, self.slot_capacity);
        debug!(stockpile = %id, slots = pile.slots.len(), priority, "stockpile added");
        table.stockpiles.insert(id, pile);
        id
    }

    /// Remove a zone, returning it with its contents.
    ///
    /// Reservations inside it must have been resolved by the caller first.
    pub fn remove_stockpile(&self, id: StockpileId) -> Result<Stockpile> {
        let pile = self
            .table()
            .stockpiles
            .remove(&id)
            .ok_or(ColonyError::StockpileNotFound(id))?;
        debug!(stockpile = %id, "stockpile removed");
        Ok(pile)
    }

    /// First unreserved slot that can take `quantity` of `item`.
    pub fn find_deposit_slot(
        &self,
        item: ItemKind,
        quantity: u32,
        source: Option<Position>,
        distance: &dyn Distance,
    ) -> Option<SlotRef> {
        self.table()
            .find_slot(item, source, distance, |slot| slot.can_accept(item, quantity))
    }

    /// First unreserved slot holding at least `min_quantity` of `item`.
    pub fn find_withdraw_slot(
        &self,
        item: ItemKind,
        min_quantity: u32,
        source: Option<Position>,
        distance: &dyn Distance,
    ) -> Option<SlotRef> {
        self.table()
            .find_slot(item, source, distance, |slot| slot.can_supply(item, min_quantity))
    }

    /// Find and reserve a deposit target in one step.
    pub fn reserve_deposit_slot(
        &self,
        item: ItemKind,
        quantity: u32,
        source: Option<Position>,
        task: TaskId,
        distance: &dyn Distance,
    ) -> Result<SlotRef> {
        let mut table = self.table();
        let slot = table
            .find_slot(item, source, distance, |slot| slot.can_accept(item, quantity))
            .ok_or(ColonyError::InsufficientCapacity { item, quantity })?;
        table.reserve(slot, task)?;
        Ok(slot)
    }

    /// Find and reserve a withdraw source in one step.
    pub fn reserve_withdraw_slot(
        &self,
        item: ItemKind,
        quantity: u32,
        source: Option<Position>,
        task: TaskId,
        distance: &dyn Distance,
    ) -> Result<SlotRef> {
        let mut table = self.table();
        let slot = table
            .find_slot(item, source, distance, |slot| slot.can_supply(item, quantity))
            .ok_or(ColonyError::InsufficientCapacity { item, quantity })?;
        table.reserve(slot, task)?;
        Ok(slot)
    }

    /// Reserve a slot for `task`. Re-reserving for the same task is a no-op.
    pub fn reserve_slot(&self, slot: SlotRef, task: TaskId) -> Result<()> {
        self.table().reserve(slot, task)
    }

    /// Clear a reservation whatever its state; returns the former holder.
    pub fn release_reservation(&self, slot: SlotRef) -> Result<Option<TaskId>> {
        let mut table = self.table();
        let entry = table.slot_mut(slot)?;
        let holder = entry.reserved_by.take();
        if let Some(task) = holder {
            debug!(slot = %slot, task = %task, "reservation released");
        }
        Ok(holder)
    }

    /// Clear the reservation only if `task` holds it.
    pub fn release_if_held(&self, slot: SlotRef, task: TaskId) -> Result<bool> {
        let mut table = self.table();
        let entry = table.slot_mut(slot)?;
        if entry.reserved_by == Some(task) {
            entry.reserved_by = None;
            debug!(slot = %slot, task = %task, "reservation released");
            return Ok(true);
        }
        Ok(false)
    }

    /// Release every reservation held by `task`.
    pub fn release_task_reservations(&self, task: TaskId) -> Vec<SlotRef> {
        let mut table = self.table();
        let mut released = Vec::new();
        for pile in table.stockpiles.values_mut() {
            for (index, slot) in pile.slots.iter_mut().enumerate() {
                if slot.reserved_by == Some(task) {
                    slot.reserved_by = None;
                    released.push(SlotRef::new(pile.id, index));
                }
            }
        }
        if !released.is_empty() {
            debug!(task = %task, count = released.len(), "task reservations released");
        }
        released
    }

    /// Add goods to a slot. Overflow or a mixed item kind is a caller bug.
    pub fn deposit(&self, slot: SlotRef, item: ItemKind, quantity: u32) -> Result<u32> {
        let mut table = self.table();
        let entry = table.slot_mut(slot)?;
        if entry.item.is_some_and(|stored| stored != item) {
            let message = format!(
                "deposit of {} x {} into slot {} holding {:?}",
                quantity, item, slot, entry.item
            );
            error!(slot = %slot, %item, quantity, stored = ?entry.item, "{message}");
            return Err(ColonyError::InvariantViolation(message));
        }
        let total = entry.quantity.checked_add(quantity).filter(|t| *t <= entry.capacity);
        let Some(total) = total else {
            let message = format!(
                "deposit of {} x {} overflows slot {} ({}/{})",
                quantity, item, slot, entry.quantity, entry.capacity
            );
            error!(slot = %slot, %item, quantity, stored = entry.quantity, capacity = entry.capacity, "{message}");
            return Err(ColonyError::InvariantViolation(message));
        };
        entry.quantity = total;
        if total > 0 {
            entry.item = Some(item);
        }
        trace!(slot = %slot, %item, quantity, total, "deposited");
        Ok(total)
    }

    /// Take goods out of a slot. Underflow is a caller bug.
    pub fn withdraw(&self, slot: SlotRef, quantity: u32) -> Result<(ItemKind, u32)> {
        let mut table = self.table();
        let entry = table.slot_mut(slot)?;
        let (Some(item), Some(remaining)) = (entry.item, entry.quantity.checked_sub(quantity)) else {
            let message = format!(
                "withdraw of {} from slot {} holding {} x {:?}",
                quantity, slot, entry.quantity, entry.item
            );
            error!(slot = %slot, quantity, stored = entry.quantity, "{message}");
            return Err(ColonyError::InvariantViolation(message));
        };
        entry.quantity = remaining;
        if remaining == 0 {
            entry.item = None;
        }
        trace!(slot = %slot, %item, quantity, remaining, "withdrawn");
        Ok((item, remaining))
    }

    pub fn slot(&self, slot: SlotRef) -> Result<StockpileSlot> {
        self.table().slot(slot).cloned()
    }

    pub fn stockpile(&self, id: StockpileId) -> Option<Stockpile> {
        self.table().stockpiles.get(&id).cloned()
    }

    /// Every reservation inside one stockpile.
    pub fn reservations_in(&self, id: StockpileId) -> Vec<(SlotRef, TaskId)> {
        self.table()
            .stockpiles
            .get(&id)
            .map(|pile| pile.reserved_slots().collect())
            .unwrap_or_default()
    }

    /// Total quantity of `item` across all stockpiles.
    pub fn stored_total(&self, item: ItemKind) -> u32 {
        self.table()
            .stockpiles
            .values()
            .map(|pile| pile.stored(item))
            .sum()
    }

    pub fn len(&self) -> usize {
        self.table().stockpiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table().stockpiles.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use colony_rules::Euclidean;
    use std::sync::Barrier;

    fn raw() -> BTreeSet<ItemCategory> {
        BTreeSet::from([ItemCategory::RawMaterial])
    }

    fn row(x0: i32, x1: i32, y: i32) -> Region {
        Region::new(Position::new(x0, y), Position::new(x1, y))
    }

    #[test]
    fn test_deposit_prefers_priority_then_distance() {
        let manager = StockpileManager::new(10);
        let near_low = manager.add_stockpile(row(0, 1, 0), raw(), 0);
        let far_high = manager.add_stockpile(row(50, 51, 0), raw(), 5);
        let near_high = manager.add_stockpile(row(5, 6, 0), raw(), 5);
        let source = Some(Position::new(0, 0));

        let slot = manager
            .find_deposit_slot(ItemKind::Wood, 5, source, &Euclidean)
            .unwrap();
        assert_eq!(slot, SlotRef::new(near_high, 0));

        // Without a source, priority then id decides.
        let slot = manager.find_deposit_slot(ItemKind::Wood, 5, None, &Euclidean).unwrap();
        assert_eq!(slot, SlotRef::new(far_high, 0));
        assert_ne!(slot.stockpile, near_low);
    }

    #[test]
    fn test_deposit_skips_categories_and_reserved_slots() {
        let manager = StockpileManager::new(10);
        let food = manager.add_stockpile(row(0, 0, 0), BTreeSet::from([ItemCategory::Food]), 9);
        let pile = manager.add_stockpile(row(0, 1, 1), raw(), 0);

        manager.reserve_slot(SlotRef::new(pile, 0), TaskId(1)).unwrap();
        let slot = manager
            .find_deposit_slot(ItemKind::Stone, 1, None, &Euclidean)
            .unwrap();
        assert_eq!(slot, SlotRef::new(pile, 1));
        assert_ne!(slot.stockpile, food);

        manager.reserve_slot(SlotRef::new(pile, 1), TaskId(2)).unwrap();
        assert_eq!(manager.find_deposit_slot(ItemKind::Stone, 1, None, &Euclidean), None);
    }

    #[test]
    fn test_withdraw_requires_min_quantity() {
        let manager = StockpileManager::new(10);
        let pile = manager.add_stockpile(row(0, 2, 0), raw(), 0);
        manager.deposit(SlotRef::new(pile, 0), ItemKind::Wood, 4).unwrap();
        manager.deposit(SlotRef::new(pile, 2), ItemKind::Wood, 9).unwrap();

        assert_eq!(
            manager.find_withdraw_slot(ItemKind::Wood, 5, None, &Euclidean),
            Some(SlotRef::new(pile, 2))
        );
        assert_eq!(
            manager.find_withdraw_slot(ItemKind::Wood, 1, None, &Euclidean),
            Some(SlotRef::new(pile, 0))
        );
        assert_eq!(manager.find_withdraw_slot(ItemKind::Wood, 10, None, &Euclidean), None);
        assert_eq!(manager.find_withdraw_slot(ItemKind::Stone, 1, None, &Euclidean), None);
    }

    #[test]
    fn test_reservation_conflict_and_release() {
        let manager = StockpileManager::new(10);
        let pile = manager.add_stockpile(row(0, 0, 0), raw(), 0);
        let slot = SlotRef::new(pile, 0);

        manager.reserve_slot(slot, TaskId(1)).unwrap();
        manager.reserve_slot(slot, TaskId(1)).unwrap();
        assert!(matches!(
            manager.reserve_slot(slot, TaskId(2)),
            Err(ColonyError::SlotReservationConflict { holder: TaskId(1), .. })
        ));

        assert!(!manager.release_if_held(slot, TaskId(2)).unwrap());
        assert_eq!(manager.release_reservation(slot).unwrap(), Some(TaskId(1)));
        assert_eq!(manager.release_reservation(slot).unwrap(), None);
        manager.reserve_slot(slot, TaskId(2)).unwrap();
    }

    #[test]
    fn test_concurrent_reservations_have_one_holder() {
        const CONTENDERS: u64 = 12;
        let manager = StockpileManager::new(10);
        let pile = manager.add_stockpile(row(0, 0, 0), raw(), 0);
        let barrier = Barrier::new(CONTENDERS as usize);

        let results: Vec<_> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..CONTENDERS)
                .map(|n| {
                    let manager = &manager;
                    let barrier = &barrier;
                    scope.spawn(move || {
                        barrier.wait();
                        manager.reserve_deposit_slot(ItemKind::Wood, 5, None, TaskId(n), &Euclidean)
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results
            .iter()
            .filter_map(|r| r.as_ref().err())
            .all(|e| matches!(e, ColonyError::InsufficientCapacity { .. })));
    }

    #[test]
    fn test_quantity_stays_within_capacity() {
        let manager = StockpileManager::new(10);
        let pile = manager.add_stockpile(row(0, 0, 0), raw(), 0);
        let slot = SlotRef::new(pile, 0);

        assert_eq!(manager.deposit(slot, ItemKind::Ore, 10).unwrap(), 10);
        assert!(matches!(
            manager.deposit(slot, ItemKind::Ore, 1),
            Err(ColonyError::InvariantViolation(_))
        ));
        assert_eq!(manager.slot(slot).unwrap().quantity, 10);

        assert_eq!(manager.withdraw(slot, 10).unwrap(), (ItemKind::Ore, 0));
        assert_eq!(manager.slot(slot).unwrap().item, None);
        assert!(matches!(
            manager.withdraw(slot, 1),
            Err(ColonyError::InvariantViolation(_))
        ));
    }

    #[test]
    fn test_deposit_rejects_mixed_kinds() {
        let manager = StockpileManager::new(10);
        let pile = manager.add_stockpile(row(0, 0, 0), raw(), 0);
        let slot = SlotRef::new(pile, 0);
        manager.deposit(slot, ItemKind::Wood, 2).unwrap();
        assert!(manager.deposit(slot, ItemKind::Stone, 2).is_err());
    }

    #[test]
    fn test_release_task_reservations() {
        let manager = StockpileManager::new(10);
        let pile = manager.add_stockpile(row(0, 2, 0), raw(), 0);
        manager.reserve_slot(SlotRef::new(pile, 0), TaskId(7)).unwrap();
        manager.reserve_slot(SlotRef::new(pile, 1), TaskId(8)).unwrap();
        manager.reserve_slot(SlotRef::new(pile, 2), TaskId(7)).unwrap();

        let released = manager.release_task_reservations(TaskId(7));
        assert_eq!(released, vec![SlotRef::new(pile, 0), SlotRef::new(pile, 2)]);
        assert_eq!(manager.reservations_in(pile), vec![(SlotRef::new(pile, 1), TaskId(8))]);
    }

    #[test]
    fn test_stored_total_and_removal() {
        let manager = StockpileManager::new(10);
        let a = manager.add_stockpile(row(0, 0, 0), raw(), 0);
        let b = manager.add_stockpile(row(0, 0, 1), raw(), 0);
        manager.deposit(SlotRef::new(a, 0), ItemKind::Clay, 3).unwrap();
        manager.deposit(SlotRef::new(b, 0), ItemKind::Clay, 4).unwrap();
        assert_eq!(manager.stored_total(ItemKind::Clay), 7);

        let removed = manager.remove_stockpile(a).unwrap();
        assert_eq!(removed.stored(ItemKind::Clay), 3);
        assert_eq!(manager.stored_total(ItemKind::Clay), 4);
        assert!(matches!(
            manager.remove_stockpile(a),
            Err(ColonyError::StockpileNotFound(_))
        ));
    }
}
