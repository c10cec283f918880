//! Construction sites - a blueprint being built at an anchor.

use colony_rules::{ItemKind, Position};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use super::Blueprint;
use crate::task_registry::TaskId;

/// Unique identifier for construction sites.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SiteId(pub u32);

impl std::fmt::Display for SiteId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "site-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SiteStatus {
    Planned,
    InProgress,
    Completed,
    Cancelled,
}

impl SiteStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SiteStatus::Completed | SiteStatus::Cancelled)
    }
}

/// The in-progress instantiation of a blueprint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstructionSite {
    pub id: SiteId,
    pub blueprint: Blueprint,
    pub anchor: Position,
    pub status: SiteStatus,
    /// Cached sum of tile costs.
    pub required: BTreeMap<ItemKind, u32>,
    /// Never exceeds `required`; never decreases before completion.
    pub delivered: BTreeMap<ItemKind, u32>,
    /// Materials committed to tiles whose build tasks exist.
    pub allocated: BTreeMap<ItemKind, u32>,
    /// Progress per tile, in `[0, 1]`.
    pub progress: Vec<f32>,
    /// Tile visit order consistent with the build order.
    pub topo_order: Vec<usize>,
    /// Outstanding haul tasks and what they carry.
    pub haul_tasks: BTreeMap<TaskId, (ItemKind, u32)>,
    /// Build task per unlocked, unfinished tile.
    pub build_tasks: BTreeMap<usize, TaskId>,
    /// Tiles whose materials were allocated.
    pub released: BTreeSet<usize>,
    /// Tick of the last delivery or build progress.
    pub last_activity: u64,
}

impl ConstructionSite {
    pub fn new(id: SiteId, blueprint: Blueprint, anchor: Position, topo_order: Vec<usize>, tick: u64) -> Self {
        let required = blueprint.requirements();
        let progress = vec![0.0; blueprint.tiles.len()];
        Self {
            id,
            blueprint,
            anchor,
            status: SiteStatus::Planned,
            required,
            delivered: BTreeMap::new(),
            allocated: BTreeMap::new(),
            progress,
            topo_order,
            haul_tasks: BTreeMap::new(),
            build_tasks: BTreeMap::new(),
            released: BTreeSet::new(),
            last_activity: tick,
        }
    }

    pub fn delivered(&self, item: ItemKind) -> u32 {
        self.delivered.get(&item).copied().unwrap_or(0)
    }

    pub fn required(&self, item: ItemKind) -> u32 {
        self.required.get(&item).copied().unwrap_or(0)
    }

    /// Quantity already on its way in haul tasks.
    pub fn in_transit(&self, item: ItemKind) -> u32 {
        self.haul_tasks
            .values()
            .filter(|(kind, _)| *kind == item)
            .map(|(_, quantity)| quantity)
            .sum()
    }

    /// Material still needed that no haul task covers yet.
    pub fn uncovered_shortfall(&self) -> BTreeMap<ItemKind, u32> {
        self.required
            .iter()
            .filter_map(|(item, required)| {
                let covered = self.delivered(*item) + self.in_transit(*item);
                let missing = required.saturating_sub(covered);
                (missing > 0).then_some((*item, missing))
            })
            .collect()
    }

    pub fn fully_supplied(&self) -> bool {
        self.required
            .iter()
            .all(|(item, required)| self.delivered(*item) >= *required)
    }

    pub fn tile_done(&self, tile: usize) -> bool {
        self.progress.get(tile).is_some_and(|p| *p >= 1.0)
    }

    pub fn is_finished(&self) -> bool {
        self.progress.iter().all(|p| *p >= 1.0)
    }

    /// First unfinished predecessor of `tile`, if any.
    pub fn blocking_predecessor(&self, tile: usize) -> Option<usize> {
        self.blueprint
            .predecessors(tile)
            .find(|before| !self.tile_done(*before))
    }

    /// Delivered materials not yet committed to a tile cover `tile`'s cost.
    pub fn can_allocate(&self, tile: usize) -> bool {
        self.blueprint.tiles[tile].cost.iter().all(|(item, cost)| {
            let free = self
                .delivered(*item)
                .saturating_sub(self.allocated.get(item).copied().unwrap_or(0));
            free >= *cost
        })
    }

    pub fn allocate(&mut self, tile: usize) {
        for (item, cost) in &self.blueprint.tiles[tile].cost {
            *self.allocated.entry(*item).or_default() += cost;
        }
        self.released.insert(tile);
    }

    /// World position of a tile.
    pub fn tile_position(&self, tile: usize) -> Position {
        let offset = self.blueprint.tiles[tile].offset;
        self.anchor.offset(offset.x, offset.y)
    }

    /// Every task the site is waiting on.
    pub fn task_ids(&self) -> Vec<TaskId> {
        self.haul_tasks
            .keys()
            .chain(self.build_tasks.values())
            .copied()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn site() -> ConstructionSite {
        let blueprint = Blueprint::new("Shed", 2, 1)
            .with_costed_tile(Position::new(0, 0), ItemKind::Wood, 10)
            .with_costed_tile(Position::new(1, 0), ItemKind::Wood, 10)
            .sequential();
        ConstructionSite::new(SiteId(1), blueprint, Position::new(4, 4), vec![0, 1], 0)
    }

    #[test]
    fn test_new_site_is_planned_and_empty() {
        let site = site();
        assert_eq!(site.status, SiteStatus::Planned);
        assert_eq!(site.required(ItemKind::Wood), 20);
        assert_eq!(site.delivered(ItemKind::Wood), 0);
        assert_eq!(site.progress, vec![0.0, 0.0]);
        assert!(!site.fully_supplied());
    }

    #[test]
    fn test_shortfall_counts_transit() {
        let mut site = site();
        site.haul_tasks.insert(TaskId(1), (ItemKind::Wood, 10));
        assert_eq!(site.uncovered_shortfall().get(&ItemKind::Wood), Some(&10));

        site.delivered.insert(ItemKind::Wood, 10);
        assert!(site.uncovered_shortfall().is_empty());
    }

    #[test]
    fn test_allocation_consumes_delivered() {
        let mut site = site();
        site.delivered.insert(ItemKind::Wood, 10);
        assert!(site.can_allocate(0));
        site.allocate(0);
        assert!(!site.can_allocate(1));
        assert!(site.released.contains(&0));
    }

    #[test]
    fn test_blocking_predecessor() {
        let mut site = site();
        assert_eq!(site.blocking_predecessor(1), Some(0));
        site.progress[0] = 1.0;
        assert_eq!(site.blocking_predecessor(1), None);
        assert_eq!(site.tile_position(1), Position::new(5, 4));
    }
}
