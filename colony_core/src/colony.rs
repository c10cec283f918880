//! The `Colony` facade: one owner for the registry, stockpiles, construction
//! pipeline, scheduler and event bus, advanced by an external tick.

use colony_rules::{
    Capability, Distance, ItemCategory, ItemKind, Position, Region, TaskKind, WorkerId,
    WorkerSnapshot,
};
use std::collections::BTreeSet;
use tracing::{debug, info, warn};

use crate::config::ColonyConfig;
use crate::construction::{
    Blueprint, CancelledSite, ConstructionPipeline, ConstructionSite, PlacementValidator, SiteId,
};
use crate::error::{ColonyError, Result};
use crate::events::{EventBus, Subscription};
use crate::scheduler::{Scheduler, Services, TickReport, WorkerState};
use crate::snapshot::ColonySnapshot;
use crate::stockpile::{SlotRef, Stockpile, StockpileId, StockpileManager, StockpileSlot};
use crate::task_registry::{Task, TaskId, TaskRegistry, TaskRequest};

#[derive(Debug)]
pub struct Colony {
    config: ColonyConfig,
    registry: TaskRegistry,
    stockpiles: StockpileManager,
    pipeline: ConstructionPipeline,
    scheduler: Scheduler,
    bus: EventBus,
    tick: u64,
}

impl Colony {
    pub fn new(config: ColonyConfig) -> Result<Self> {
        Self::restore(ColonySnapshot::default(), config)
    }

    /// Rebuild a colony from a snapshot. Subscribers must register again.
    ///
    /// Reservations held by tasks missing from the snapshot are released.
    pub fn restore(snapshot: ColonySnapshot, config: ColonyConfig) -> Result<Self> {
        config.validate()?;

        let stale: Vec<SlotRef> = snapshot
            .stockpiles
            .stockpiles
            .values()
            .flat_map(|pile| pile.reserved_slots())
            .filter(|(_, task)| !snapshot.tasks.tasks.contains_key(task))
            .map(|(slot, _)| slot)
            .collect();

        let colony = Self {
            registry: TaskRegistry::from_table(snapshot.tasks),
            stockpiles: StockpileManager::from_table(snapshot.stockpiles, config.slot_capacity),
            pipeline: ConstructionPipeline::from_table(snapshot.sites, &config),
            scheduler: Scheduler::from_workers(snapshot.workers, config.clone()),
            bus: EventBus::new(),
            tick: snapshot.tick,
            config,
        };
        for slot in stale {
            warn!(slot = %slot, "dropping reservation held by unknown task");
            colony.stockpiles.release_reservation(slot)?;
        }
        info!(
            tick = colony.tick,
            tasks = colony.registry.len(),
            stockpiles = colony.stockpiles.len(),
            sites = colony.pipeline.len(),
            "colony ready"
        );
        Ok(colony)
    }

    pub fn snapshot(&self) -> ColonySnapshot {
        ColonySnapshot {
            tick: self.tick,
            tasks: self.registry.snapshot(),
            stockpiles: self.stockpiles.snapshot(),
            sites: self.pipeline.snapshot(),
            workers: self.scheduler.workers().clone(),
        }
    }

    pub fn config(&self) -> &ColonyConfig {
        &self.config
    }

    pub fn current_tick(&self) -> u64 {
        self.tick
    }

    /// Shared registry handle; safe to claim from any thread.
    pub fn registry(&self) -> &TaskRegistry {
        &self.registry
    }

    pub fn stockpiles(&self) -> &StockpileManager {
        &self.stockpiles
    }

    fn split(&mut self) -> (&mut Scheduler, Services<'_>) {
        (
            &mut self.scheduler,
            Services {
                registry: &self.registry,
                stockpiles: &self.stockpiles,
                pipeline: &mut self.pipeline,
                bus: &self.bus,
                tick: self.tick,
            },
        )
    }

    // ---- tasks ----

    pub fn submit_task(
        &self,
        kind: TaskKind,
        position: Position,
        priority: i32,
        required: Capability,
    ) -> TaskId {
        self.registry.submit_task(kind, position, priority, required)
    }

    pub fn submit(&self, request: TaskRequest) -> TaskId {
        self.registry.submit(request)
    }

    pub fn cancel_task(&mut self, id: TaskId) -> Result<Task> {
        let (scheduler, mut services) = self.split();
        scheduler.cancel_task(id, &mut services)
    }

    // ---- construction ----

    pub fn place_blueprint(
        &mut self,
        blueprint: Blueprint,
        anchor: Position,
        validator: &dyn PlacementValidator,
    ) -> Result<SiteId> {
        self.pipeline.place_blueprint(
            blueprint,
            anchor,
            validator,
            &self.registry,
            &self.bus,
            self.tick,
        )
    }

    /// Discard a site together with every task working toward it.
    pub fn cancel_site(&mut self, id: SiteId) -> Result<CancelledSite> {
        let cancelled = self.pipeline.cancel_site(id, &self.bus)?;
        let (scheduler, mut services) = self.split();
        for task in &cancelled.tasks {
            if let Err(err) = scheduler.cancel_task(*task, &mut services) {
                debug!(site = %id, task = %task, %err, "site task already gone");
            }
        }
        Ok(cancelled)
    }

    // ---- storage ----

    pub fn add_stockpile(
        &self,
        bounds: Region,
        accepts: BTreeSet<ItemCategory>,
        priority: i32,
    ) -> StockpileId {
        self.stockpiles.add_stockpile(bounds, accepts, priority)
    }

    /// Remove a zone after cancelling every task holding a reservation in it.
    pub fn remove_stockpile(&mut self, id: StockpileId) -> Result<Stockpile> {
        if self.stockpiles.stockpile(id).is_none() {
            return Err(ColonyError::StockpileNotFound(id));
        }
        let holders: BTreeSet<TaskId> = self
            .stockpiles
            .reservations_in(id)
            .into_iter()
            .map(|(_, task)| task)
            .collect();
        let (scheduler, mut services) = self.split();
        for task in holders {
            if let Err(err) = scheduler.cancel_task(task, &mut services) {
                debug!(stockpile = %id, task = %task, %err, "reserving task already gone");
            }
        }
        self.stockpiles.remove_stockpile(id)
    }

    // ---- simulation ----

    /// Advance the colony by one tick.
    pub fn tick(&mut self, workers: &[WorkerSnapshot], distance: &dyn Distance) -> TickReport {
        self.tick += 1;
        let (scheduler, mut services) = self.split();
        let mut report = scheduler.tick(workers, distance, &mut services);

        for site in self.pipeline.stalled_sites(self.tick) {
            warn!(site = %site, tick = self.tick, "construction stalled");
            match self.cancel_site(site) {
                Ok(cancelled) => report.cancelled.extend(cancelled.tasks),
                Err(err) => warn!(site = %site, %err, "stalled site could not be cancelled"),
            }
        }
        report
    }

    /// Release claims held by workers no longer reported active.
    pub fn reconcile(&mut self, workers: &[WorkerSnapshot]) -> Vec<TaskId> {
        let (scheduler, services) = self.split();
        scheduler.reconcile(workers, &services)
    }

    // ---- events ----

    pub fn subscribe(&self) -> Subscription {
        self.bus.subscribe()
    }

    /// Disconnect every subscriber.
    pub fn shutdown(&self) {
        self.bus.shutdown();
    }

    // ---- queries ----

    pub fn task(&self, id: TaskId) -> Option<Task> {
        self.registry.get(id)
    }

    pub fn open_tasks(&self) -> Vec<Task> {
        self.registry.open_tasks()
    }

    pub fn tasks_for_site(&self, site: SiteId) -> Vec<Task> {
        self.registry.find_tasks(|task| task.order.site() == Some(site))
    }

    pub fn site(&self, id: SiteId) -> Option<&ConstructionSite> {
        self.pipeline.site(id)
    }

    pub fn stockpile(&self, id: StockpileId) -> Option<Stockpile> {
        self.stockpiles.stockpile(id)
    }

    pub fn slot(&self, slot: SlotRef) -> Result<StockpileSlot> {
        self.stockpiles.slot(slot)
    }

    pub fn worker_state(&self, id: WorkerId) -> Option<&WorkerState> {
        self.scheduler.worker(id)
    }

    pub fn stored_total(&self, item: ItemKind) -> u32 {
        self.stockpiles.stored_total(item)
    }
}
