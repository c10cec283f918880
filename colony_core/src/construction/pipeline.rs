//! The construction pipeline: sites, their haul and build tasks, and progress.

use colony_rules::{BuildingId, ItemKind, Position};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, error, info, warn};

use super::{Blueprint, ConstructionSite, SiteId, SiteStatus};
use crate::config::ColonyConfig;
use crate::error::{ColonyError, Result};
use crate::events::{BuildingDescriptor, ColonyEvent, EventBus};
use crate::task_registry::{
    HaulDestination, HaulOrder, HaulSource, Task, TaskId, TaskOrder, TaskRegistry, TaskRequest,
};

/// External check that a blueprint may be placed (terrain, walls, units...).
pub trait PlacementValidator {
    fn check(&self, blueprint: &Blueprint, anchor: Position) -> std::result::Result<(), String>;
}

impl<F> PlacementValidator for F
where
    F: Fn(&Blueprint, Position) -> std::result::Result<(), String>,
{
    fn check(&self, blueprint: &Blueprint, anchor: Position) -> std::result::Result<(), String> {
        self(blueprint, anchor)
    }
}

/// Accepts every placement.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl PlacementValidator for AllowAll {
    fn check(&self, _: &Blueprint, _: Position) -> std::result::Result<(), String> {
        Ok(())
    }
}

/// Outcome of a material delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Delivery {
    pub accepted: u32,
    /// Quantity beyond the requirement, left for the caller to store.
    pub surplus: u32,
}

/// Outcome of one build step.
#[derive(Debug, Clone, PartialEq)]
pub struct TileAdvance {
    pub progress: f32,
    pub tile_finished: bool,
    /// Set when this step finished the whole site.
    pub building: Option<BuildingDescriptor>,
}

/// A site removed by cancellation.
#[derive(Debug, Clone, PartialEq)]
pub struct CancelledSite {
    pub site: SiteId,
    pub refund: BTreeMap<ItemKind, u32>,
    /// Tasks the caller must cancel.
    pub tasks: Vec<TaskId>,
}

/// Persisted form of the pipeline.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SiteTable {
    pub sites: BTreeMap<SiteId, ConstructionSite>,
    pub next_id: u32,
}

#[derive(Debug, Clone)]
struct PipelineSettings {
    haul_batch_size: u32,
    haul_priority: i32,
    build_priority: i32,
    stall_timeout_ticks: Option<u64>,
}

impl From<&ColonyConfig> for PipelineSettings {
    fn from(config: &ColonyConfig) -> Self {
        Self {
            haul_batch_size: config.haul_batch_size.max(1),
            haul_priority: config.construction_haul_priority,
            build_priority: config.build_priority,
            stall_timeout_ticks: config.stall_timeout_ticks,
        }
    }
}

/// Owns every live construction site. Single writer: driven from the tick.
#[derive(Debug)]
pub struct ConstructionPipeline {
    table: SiteTable,
    settings: PipelineSettings,
}

impl ConstructionPipeline {
    pub fn new(config: &ColonyConfig) -> Self {
        Self::from_table(SiteTable::default(), config)
    }

    pub fn from_table(table: SiteTable, config: &ColonyConfig) -> Self {
        Self {
            table,
            settings: PipelineSettings::from(config),
        }
    }

    pub fn snapshot(&self) -> SiteTable {
        self.table.clone()
    }

    /// Place a blueprint and queue hauls for its materials.
    pub fn place_blueprint(
        &mut self,
        blueprint: Blueprint,
        anchor: Position,
        validator: &dyn PlacementValidator,
        registry: &TaskRegistry,
        bus: &EventBus,
        tick: u64,
    ) -> Result<SiteId> {
        blueprint.validate()?;
        let topo_order = blueprint.topological_order()?;

        let footprint = blueprint.footprint(anchor);
        if let Some(other) = self
            .table
            .sites
            .values()
            .find(|site| site.blueprint.footprint(site.anchor).overlaps(&footprint))
        {
            return Err(ColonyError::PlacementConflict(format!(
                "{} at {} overlaps {}",
                blueprint.name, anchor, other.id
            )));
        }
        validator
            .check(&blueprint, anchor)
            .map_err(ColonyError::PlacementConflict)?;

        let id = SiteId(self.table.next_id);
        self.table.next_id += 1;
        let mut site = ConstructionSite::new(id, blueprint, anchor, topo_order, tick);
        info!(site = %id, blueprint = %site.blueprint.name, anchor = %anchor, "blueprint placed");

        issue_hauls(&mut site, &self.settings, registry);
        if site.required.is_empty() {
            start_site(&mut site, bus);
            release_ready_tiles(&mut site, &self.settings, registry);
        }
        self.table.sites.insert(id, site);
        Ok(id)
    }

    /// Record delivered material, capped at the requirement.
    pub fn deliver_material(
        &mut self,
        id: SiteId,
        item: ItemKind,
        quantity: u32,
        registry: &TaskRegistry,
        bus: &EventBus,
        tick: u64,
    ) -> Result<Delivery> {
        let site = self
            .table
            .sites
            .get_mut(&id)
            .ok_or(ColonyError::SiteNotFound(id))?;

        let room = site.required(item).saturating_sub(site.delivered(item));
        let accepted = quantity.min(room);
        let surplus = quantity - accepted;
        if accepted > 0 {
            *site.delivered.entry(item).or_default() += accepted;
            site.last_activity = tick;
            debug!(site = %id, %item, accepted, delivered = site.delivered(item), "material delivered");
        }
        if surplus > 0 {
            warn!(site = %id, %item, surplus, "delivery exceeds requirement");
        }

        if accepted > 0 && site.status == SiteStatus::Planned {
            start_site(site, bus);
        }
        if site.status == SiteStatus::InProgress {
            release_ready_tiles(site, &self.settings, registry);
        }
        Ok(Delivery { accepted, surplus })
    }

    /// Delivery made by one of the site's own haul tasks.
    #[allow(clippy::too_many_arguments)]
    pub fn haul_delivered(
        &mut self,
        id: SiteId,
        task: TaskId,
        item: ItemKind,
        quantity: u32,
        registry: &TaskRegistry,
        bus: &EventBus,
        tick: u64,
    ) -> Result<Delivery> {
        if let Some(site) = self.table.sites.get_mut(&id) {
            site.haul_tasks.remove(&task);
        }
        let delivery = self.deliver_material(id, item, quantity, registry, bus, tick)?;
        // A short load leaves part of the requirement uncovered.
        if let Some(site) = self.table.sites.get_mut(&id) {
            issue_hauls(site, &self.settings, registry);
        }
        Ok(delivery)
    }

    /// Add build progress to one tile, clamped to 1.0.
    pub fn advance_tile_progress(
        &mut self,
        id: SiteId,
        tile: usize,
        delta: f32,
        registry: &TaskRegistry,
        bus: &EventBus,
        tick: u64,
    ) -> Result<TileAdvance> {
        let site = self
            .table
            .sites
            .get_mut(&id)
            .ok_or(ColonyError::SiteNotFound(id))?;

        if tile >= site.progress.len() {
            return Err(violation(format!(
                "{} has no tile {} ({} tiles)",
                id,
                tile,
                site.progress.len()
            )));
        }
        if !delta.is_finite() || delta < 0.0 {
            return Err(violation(format!(
                "progress delta {} for {} tile {} is out of range",
                delta, id, tile
            )));
        }
        if site.status != SiteStatus::InProgress {
            return Err(violation(format!(
                "{} tile {} advanced while {:?}",
                id, tile, site.status
            )));
        }
        if let Some(blocked_by) = site.blocking_predecessor(tile) {
            return Err(ColonyError::InvalidBuildOrder {
                site: id,
                tile,
                blocked_by,
            });
        }
        if !site.released.contains(&tile) {
            return Err(violation(format!(
                "{} tile {} has no materials allocated",
                id, tile
            )));
        }

        let before = site.progress[tile];
        let progress = (before + delta).min(1.0);
        site.progress[tile] = progress;
        site.last_activity = tick;
        bus.publish(ColonyEvent::ConstructionProgress {
            site: id,
            tile,
            progress,
        });

        let tile_finished = before < 1.0 && progress >= 1.0;
        if !tile_finished {
            return Ok(TileAdvance {
                progress,
                tile_finished,
                building: None,
            });
        }

        site.build_tasks.remove(&tile);
        debug!(site = %id, tile, "tile finished");
        if !site.is_finished() {
            release_ready_tiles(site, &self.settings, registry);
            return Ok(TileAdvance {
                progress,
                tile_finished,
                building: None,
            });
        }

        let mut site = self
            .table
            .sites
            .remove(&id)
            .ok_or(ColonyError::SiteNotFound(id))?;
        site.status = SiteStatus::Completed;
        let building = BuildingDescriptor {
            id: BuildingId::new(),
            blueprint: site.blueprint.name.clone(),
            anchor: site.anchor,
            tiles: (0..site.progress.len())
                .map(|tile| site.tile_position(tile))
                .collect(),
        };
        info!(site = %id, building = %building.id, blueprint = %building.blueprint, "construction completed");
        bus.publish(ColonyEvent::ConstructionCompleted {
            site: id,
            building: building.clone(),
        });
        Ok(TileAdvance {
            progress,
            tile_finished,
            building: Some(building),
        })
    }

    /// Drop a site. The caller cancels the returned tasks.
    pub fn cancel_site(&mut self, id: SiteId, bus: &EventBus) -> Result<CancelledSite> {
        let mut site = self
            .table
            .sites
            .remove(&id)
            .ok_or(ColonyError::SiteNotFound(id))?;
        site.status = SiteStatus::Cancelled;
        let refund: BTreeMap<ItemKind, u32> = site
            .delivered
            .iter()
            .filter(|(_, quantity)| **quantity > 0)
            .map(|(item, quantity)| (*item, *quantity))
            .collect();
        info!(site = %id, ?refund, "construction cancelled");
        bus.publish(ColonyEvent::ConstructionCancelled {
            site: id,
            refund: refund.clone(),
        });
        Ok(CancelledSite {
            site: id,
            refund,
            tasks: site.task_ids(),
        })
    }

    /// One of this pipeline's tasks was cancelled from outside; replace it
    /// while the site is still alive.
    pub fn task_cancelled(&mut self, task: &Task, registry: &TaskRegistry) {
        let Some(id) = task.order.site() else {
            return;
        };
        let Some(site) = self.table.sites.get_mut(&id) else {
            return;
        };
        match task.order {
            TaskOrder::Haul(_) => {
                if site.haul_tasks.remove(&task.id).is_some() {
                    debug!(site = %id, task = %task.id, "reissuing cancelled haul");
                    issue_hauls(site, &self.settings, registry);
                }
            }
            TaskOrder::Build { tile, .. } => {
                if site.build_tasks.get(&tile) == Some(&task.id) && !site.tile_done(tile) {
                    debug!(site = %id, task = %task.id, tile, "reissuing cancelled build");
                    submit_build(site, tile, &self.settings, registry);
                }
            }
            _ => {}
        }
    }

    /// Sites idle for longer than the configured stall timeout.
    pub fn stalled_sites(&self, tick: u64) -> Vec<SiteId> {
        let Some(timeout) = self.settings.stall_timeout_ticks else {
            return Vec::new();
        };
        self.table
            .sites
            .values()
            .filter(|site| tick.saturating_sub(site.last_activity) >= timeout)
            .map(|site| site.id)
            .collect()
    }

    pub fn site(&self, id: SiteId) -> Option<&ConstructionSite> {
        self.table.sites.get(&id)
    }

    pub fn sites(&self) -> impl Iterator<Item = &ConstructionSite> {
        self.table.sites.values()
    }

    pub fn len(&self) -> usize {
        self.table.sites.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.sites.is_empty()
    }
}

fn violation(message: String) -> ColonyError {
    error!("{message}");
    ColonyError::InvariantViolation(message)
}

fn start_site(site: &mut ConstructionSite, bus: &EventBus) {
    site.status = SiteStatus::InProgress;
    info!(site = %site.id, "construction started");
    bus.publish(ColonyEvent::ConstructionStarted { site: site.id });
}

/// Queue haul tasks for whatever no existing haul covers.
fn issue_hauls(site: &mut ConstructionSite, settings: &PipelineSettings, registry: &TaskRegistry) {
    for (item, mut missing) in site.uncovered_shortfall() {
        while missing > 0 {
            let quantity = missing.min(settings.haul_batch_size);
            let order = HaulOrder {
                item,
                quantity,
                source: HaulSource::AnyStockpile,
                destination: HaulDestination::Site(site.id),
            };
            let task = registry.submit(
                TaskRequest::haul(order, site.anchor).with_priority(settings.haul_priority),
            );
            site.haul_tasks.insert(task, (item, quantity));
            missing -= quantity;
        }
    }
}

/// Allocate materials to every tile whose predecessors are done, in build order.
fn release_ready_tiles(
    site: &mut ConstructionSite,
    settings: &PipelineSettings,
    registry: &TaskRegistry,
) -> Vec<usize> {
    let mut released = Vec::new();
    for tile in site.topo_order.clone() {
        if site.released.contains(&tile) || site.tile_done(tile) {
            continue;
        }
        if site.blocking_predecessor(tile).is_some() || !site.can_allocate(tile) {
            continue;
        }
        site.allocate(tile);
        submit_build(site, tile, settings, registry);
        released.push(tile);
    }
    released
}

fn submit_build(
    site: &mut ConstructionSite,
    tile: usize,
    settings: &PipelineSettings,
    registry: &TaskRegistry,
) {
    let task = registry.submit(
        TaskRequest::build(site.id, tile, site.tile_position(tile))
            .with_priority(settings.build_priority),
    );
    debug!(site = %site.id, tile, task = %task, "build task queued");
    site.build_tasks.insert(tile, task);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task_registry::TaskStatus;
    use colony_rules::TaskKind;

    fn shed() -> Blueprint {
        Blueprint::new("Shed", 2, 1)
            .with_costed_tile(Position::new(0, 0), ItemKind::Wood, 10)
            .with_costed_tile(Position::new(1, 0), ItemKind::Wood, 10)
            .sequential()
    }

    struct Fixture {
        pipeline: ConstructionPipeline,
        registry: TaskRegistry,
        bus: EventBus,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                pipeline: ConstructionPipeline::new(&ColonyConfig::default()),
                registry: TaskRegistry::new(),
                bus: EventBus::new(),
            }
        }

        fn place(&mut self, blueprint: Blueprint, anchor: Position) -> Result<SiteId> {
            self.pipeline
                .place_blueprint(blueprint, anchor, &AllowAll, &self.registry, &self.bus, 0)
        }

        fn deliver(&mut self, site: SiteId, item: ItemKind, quantity: u32) -> Result<Delivery> {
            self.pipeline
                .deliver_material(site, item, quantity, &self.registry, &self.bus, 1)
        }

        fn advance(&mut self, site: SiteId, tile: usize, delta: f32) -> Result<TileAdvance> {
            self.pipeline
                .advance_tile_progress(site, tile, delta, &self.registry, &self.bus, 2)
        }

        fn tasks_of(&self, kind: TaskKind) -> Vec<Task> {
            self.registry.find_tasks(|task| task.kind == kind)
        }
    }

    #[test]
    fn test_placement_queues_batched_hauls() {
        let mut fx = Fixture::new();
        let site = fx.place(shed(), Position::new(0, 0)).unwrap();

        let hauls = fx.tasks_of(TaskKind::Haul);
        assert_eq!(hauls.len(), 2);
        assert!(hauls.iter().all(|task| task.order.site() == Some(site)));
        assert!(hauls.iter().all(|task| task.status == TaskStatus::Open));
        assert_eq!(fx.pipeline.site(site).unwrap().status, SiteStatus::Planned);
        assert!(fx.tasks_of(TaskKind::Build).is_empty());
    }

    #[test]
    fn test_first_delivery_starts_site_and_unlocks_first_tile() {
        let mut fx = Fixture::new();
        let events = fx.bus.subscribe();
        let site = fx.place(shed(), Position::new(0, 0)).unwrap();

        fx.deliver(site, ItemKind::Wood, 10).unwrap();

        let state = fx.pipeline.site(site).unwrap();
        assert_eq!(state.status, SiteStatus::InProgress);
        let builds = fx.tasks_of(TaskKind::Build);
        assert_eq!(builds.len(), 1);
        assert_eq!(builds[0].order, TaskOrder::Build { site, tile: 0 });
        assert!(events
            .drain()
            .contains(&ColonyEvent::ConstructionStarted { site }));
    }

    #[test]
    fn test_delivery_capped_at_requirement() {
        let mut fx = Fixture::new();
        let site = fx.place(shed(), Position::new(0, 0)).unwrap();

        assert_eq!(
            fx.deliver(site, ItemKind::Wood, 15).unwrap(),
            Delivery { accepted: 15, surplus: 0 }
        );
        assert_eq!(
            fx.deliver(site, ItemKind::Wood, 15).unwrap(),
            Delivery { accepted: 5, surplus: 10 }
        );
        assert_eq!(
            fx.deliver(site, ItemKind::Stone, 3).unwrap(),
            Delivery { accepted: 0, surplus: 3 }
        );
        assert_eq!(fx.pipeline.site(site).unwrap().delivered(ItemKind::Wood), 20);
    }

    #[test]
    fn test_build_order_enforced() {
        let mut fx = Fixture::new();
        let site = fx.place(shed(), Position::new(0, 0)).unwrap();
        fx.deliver(site, ItemKind::Wood, 20).unwrap();

        assert!(matches!(
            fx.advance(site, 1, 0.5),
            Err(ColonyError::InvalidBuildOrder { tile: 1, blocked_by: 0, .. })
        ));

        let step = fx.advance(site, 0, 0.6).unwrap();
        assert!(!step.tile_finished);
        let step = fx.advance(site, 0, 0.6).unwrap();
        assert!(step.tile_finished);
        assert_eq!(step.progress, 1.0);

        // Tile 1 unlocked by tile 0 finishing.
        let builds = fx.tasks_of(TaskKind::Build);
        assert!(builds
            .iter()
            .any(|task| task.order == TaskOrder::Build { site, tile: 1 }));
    }

    #[test]
    fn test_progress_never_decreases() {
        let mut fx = Fixture::new();
        let site = fx.place(shed(), Position::new(0, 0)).unwrap();
        fx.deliver(site, ItemKind::Wood, 20).unwrap();

        assert!(matches!(
            fx.advance(site, 0, -0.1),
            Err(ColonyError::InvariantViolation(_))
        ));
        assert!(matches!(
            fx.advance(site, 0, f32::NAN),
            Err(ColonyError::InvariantViolation(_))
        ));
        assert!(matches!(
            fx.advance(site, 9, 0.1),
            Err(ColonyError::InvariantViolation(_))
        ));
        assert_eq!(fx.pipeline.site(site).unwrap().progress[0], 0.0);
    }

    #[test]
    fn test_completion_emits_descriptor_and_removes_site() {
        let mut fx = Fixture::new();
        let events = fx.bus.subscribe();
        let site = fx.place(shed(), Position::new(3, 3)).unwrap();
        fx.deliver(site, ItemKind::Wood, 20).unwrap();

        fx.advance(site, 0, 1.0).unwrap();
        let step = fx.advance(site, 1, 1.0).unwrap();

        let building = step.building.unwrap();
        assert_eq!(building.blueprint, "Shed");
        assert_eq!(building.tiles, vec![Position::new(3, 3), Position::new(4, 3)]);
        assert!(fx.pipeline.site(site).is_none());

        let completed: Vec<_> = events
            .drain()
            .into_iter()
            .filter(|e| matches!(e, ColonyEvent::ConstructionCompleted { .. }))
            .collect();
        assert_eq!(completed.len(), 1);
    }

    #[test]
    fn test_costless_blueprint_starts_immediately() {
        let mut fx = Fixture::new();
        let blueprint = Blueprint::new("Marker", 1, 1).with_tile(Position::new(0, 0));
        let site = fx.place(blueprint, Position::new(0, 0)).unwrap();

        assert_eq!(fx.pipeline.site(site).unwrap().status, SiteStatus::InProgress);
        assert!(fx.tasks_of(TaskKind::Haul).is_empty());
        assert_eq!(fx.tasks_of(TaskKind::Build).len(), 1);
    }

    #[test]
    fn test_overlap_and_validator_rejections() {
        let mut fx = Fixture::new();
        fx.place(shed(), Position::new(0, 0)).unwrap();
        assert!(matches!(
            fx.place(shed(), Position::new(1, 0)),
            Err(ColonyError::PlacementConflict(_))
        ));

        let deny = |_: &Blueprint, _: Position| -> std::result::Result<(), String> {
            Err("water".to_string())
        };
        let result = fx.pipeline.place_blueprint(
            shed(),
            Position::new(10, 10),
            &deny,
            &fx.registry,
            &fx.bus,
            0,
        );
        assert!(matches!(result, Err(ColonyError::PlacementConflict(reason)) if reason == "water"));
    }

    #[test]
    fn test_cancelled_haul_is_reissued() {
        let mut fx = Fixture::new();
        let site = fx.place(shed(), Position::new(0, 0)).unwrap();
        let haul = fx.tasks_of(TaskKind::Haul)[0].id;

        let cancelled = fx.registry.cancel_task(haul).unwrap();
        fx.pipeline.task_cancelled(&cancelled, &fx.registry);

        let hauls = fx.tasks_of(TaskKind::Haul);
        assert_eq!(hauls.len(), 2);
        assert!(hauls.iter().all(|task| task.id != haul));
        assert_eq!(fx.pipeline.site(site).unwrap().in_transit(ItemKind::Wood), 20);
    }

    #[test]
    fn test_short_haul_reissues_remainder() {
        let mut fx = Fixture::new();
        let site = fx.place(shed(), Position::new(0, 0)).unwrap();
        let haul = fx.tasks_of(TaskKind::Haul)[0].id;
        fx.registry.cancel_task(haul).unwrap();

        fx.pipeline
            .haul_delivered(site, haul, ItemKind::Wood, 4, &fx.registry, &fx.bus, 1)
            .unwrap();

        let state = fx.pipeline.site(site).unwrap();
        assert_eq!(state.delivered(ItemKind::Wood), 4);
        assert_eq!(state.in_transit(ItemKind::Wood), 16);
        assert!(state.uncovered_shortfall().is_empty());
    }

    #[test]
    fn test_cancel_site_refunds_delivered() {
        let mut fx = Fixture::new();
        let site = fx.place(shed(), Position::new(0, 0)).unwrap();
        fx.deliver(site, ItemKind::Wood, 10).unwrap();

        let cancelled = fx.pipeline.cancel_site(site, &fx.bus).unwrap();
        assert_eq!(cancelled.refund.get(&ItemKind::Wood), Some(&10));
        // Both hauls plus the build task for tile 0.
        assert_eq!(cancelled.tasks.len(), 3);
        assert!(fx.pipeline.is_empty());
        assert!(matches!(
            fx.pipeline.cancel_site(site, &fx.bus),
            Err(ColonyError::SiteNotFound(_))
        ));
    }

    #[test]
    fn test_stall_detection_is_opt_in() {
        let mut fx = Fixture::new();
        let site = fx.place(shed(), Position::new(0, 0)).unwrap();
        assert!(fx.pipeline.stalled_sites(1_000).is_empty());

        let config = ColonyConfig {
            stall_timeout_ticks: Some(50),
            ..Default::default()
        };
        let pipeline = ConstructionPipeline::from_table(fx.pipeline.snapshot(), &config);
        assert!(pipeline.stalled_sites(49).is_empty());
        assert_eq!(pipeline.stalled_sites(50), vec![site]);
    }
}
