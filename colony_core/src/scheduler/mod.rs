//! Worker Scheduling Loop - drives idle and busy workers once per tick.
//!
//! A tick runs in three steps:
//! 1. **Reconcile**: claims held by workers reported inactive return to the pool
//! 2. **Assign**: every idle worker ranks the board first, then claims are
//!    attempted in worker order; a lost race re-queries the next-best task up
//!    to `claim_retry_limit` times, while a task that cannot be routed is
//!    skipped for the rest of the tick without counting against that limit
//! 3. **Execute**: every busy worker walks toward its target or advances its
//!    task by one step, firing the kind-specific side effect on completion

mod worker_state;

pub use worker_state::*;

use colony_rules::{Distance, ItemKind, Position, WorkerId, WorkerSnapshot};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, error, info, trace, warn};

use crate::config::ColonyConfig;
use crate::construction::ConstructionPipeline;
use crate::error::{ColonyError, Result};
use crate::events::{ColonyEvent, EventBus};
use crate::stockpile::StockpileManager;
use crate::task_registry::{
    HaulDestination, HaulOrder, HaulSource, Task, TaskId, TaskOrder, TaskRegistry, TaskRequest,
};

/// The subsystems a scheduling step reads and mutates.
pub struct Services<'a> {
    pub registry: &'a TaskRegistry,
    pub stockpiles: &'a StockpileManager,
    pub pipeline: &'a mut ConstructionPipeline,
    pub bus: &'a EventBus,
    pub tick: u64,
}

/// What happened during one tick.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickReport {
    pub tick: u64,
    pub claimed: Vec<(WorkerId, TaskId)>,
    pub completed: Vec<TaskId>,
    /// Claims returned to the open pool.
    pub released: Vec<TaskId>,
    pub cancelled: Vec<TaskId>,
}

#[derive(Debug)]
pub struct Scheduler {
    config: ColonyConfig,
    workers: BTreeMap<WorkerId, WorkerState>,
}

impl Scheduler {
    pub fn new(config: ColonyConfig) -> Self {
        Self::from_workers(BTreeMap::new(), config)
    }

    /// Resume with previously persisted worker assignments.
    pub fn from_workers(workers: BTreeMap<WorkerId, WorkerState>, config: ColonyConfig) -> Self {
        Self { config, workers }
    }

    pub fn workers(&self) -> &BTreeMap<WorkerId, WorkerState> {
        &self.workers
    }

    pub fn worker(&self, id: WorkerId) -> Option<&WorkerState> {
        self.workers.get(&id)
    }

    /// Run one simulation tick over the given worker snapshots.
    pub fn tick(
        &mut self,
        snapshots: &[WorkerSnapshot],
        distance: &dyn Distance,
        services: &mut Services<'_>,
    ) -> TickReport {
        let mut report = TickReport {
            tick: services.tick,
            ..Default::default()
        };

        for worker in snapshots.iter().filter(|worker| worker.active) {
            self.workers
                .entry(worker.id)
                .or_insert_with(|| WorkerState::new(worker.id, worker.position))
                .position = worker.position;
        }

        if services.tick % self.config.reconcile_interval_ticks.max(1) == 0 {
            report.released = self.reconcile(snapshots, services);
        }
        self.assign(snapshots, distance, services, &mut report);
        self.execute(snapshots, distance, services, &mut report);

        trace!(
            tick = services.tick,
            claimed = report.claimed.len(),
            completed = report.completed.len(),
            "tick finished"
        );
        report
    }

    /// Release every claim held by a worker that is missing or inactive.
    ///
    /// Goods such a worker was carrying are dropped where it was last seen.
    pub fn reconcile(&mut self, snapshots: &[WorkerSnapshot], services: &Services<'_>) -> Vec<TaskId> {
        let active: BTreeSet<WorkerId> = snapshots
            .iter()
            .filter(|worker| worker.active)
            .map(|worker| worker.id)
            .collect();

        let orphaned = services.registry.reconcile(|worker| active.contains(&worker));
        let mut released = Vec::with_capacity(orphaned.len());
        for (task, worker) in orphaned {
            services.stockpiles.release_task_reservations(task);
            if let Some(state) = self.workers.get_mut(&worker) {
                let position = state.position;
                if let Some(goods) = state.drop_task() {
                    recover_goods(Some(task), goods, position, &self.config, services.registry);
                }
            }
            info!(task = %task, worker = %worker, "orphaned claim released");
            services.bus.publish(ColonyEvent::TaskReleased { task });
            released.push(task);
        }

        let config = &self.config;
        self.workers.retain(|id, state| {
            if active.contains(id) {
                return true;
            }
            let position = state.position;
            if let Some(goods) = state.drop_task() {
                recover_goods(None, goods, position, config, services.registry);
            }
            false
        });
        released
    }

    /// Cancel a task wherever it is in its lifecycle.
    ///
    /// Reservations are released, a worker holding it goes idle (dropping
    /// any goods in hand) and the construction pipeline replaces the task if
    /// its site still needs it.
    pub fn cancel_task(&mut self, id: TaskId, services: &mut Services<'_>) -> Result<Task> {
        let task = services.registry.cancel_task(id)?;
        let slots = services.stockpiles.release_task_reservations(id);

        if let Some(state) = self
            .workers
            .values_mut()
            .find(|state| state.current_task() == Some(id))
        {
            let position = state.position;
            if let Some(goods) = state.drop_task() {
                recover_goods(None, goods, position, &self.config, services.registry);
            }
        }

        services.pipeline.task_cancelled(&task, services.registry);
        services.bus.publish(ColonyEvent::TaskCancelled { task: id });
        info!(task = %id, kind = %task.kind, released_slots = slots.len(), "task cancelled");
        Ok(task)
    }

    fn assign(
        &mut self,
        snapshots: &[WorkerSnapshot],
        distance: &dyn Distance,
        services: &mut Services<'_>,
        report: &mut TickReport,
    ) {
        let idle: Vec<&WorkerSnapshot> = snapshots
            .iter()
            .filter(|worker| worker.active)
            .filter(|worker| self.workers.get(&worker.id).map_or(true, WorkerState::is_idle))
            .collect();

        // Everyone ranks the same board before anyone claims.
        let picks: Vec<_> = idle
            .into_iter()
            .map(|worker| (worker, services.registry.find_best_task(worker, distance)))
            .collect();

        for (worker, mut candidate) in picks {
            let mut tried = BTreeSet::new();
            let mut lost = 0;
            while let Some(task) = candidate {
                if tried.len() >= MAX_CANDIDATES_PER_TICK {
                    break;
                }
                tried.insert(task);
                match self.take(worker, task, distance, services) {
                    Ok(()) => {
                        report.claimed.push((worker.id, task));
                        break;
                    }
                    Err(err) if err.is_contention() => {
                        lost += 1;
                        debug!(worker = %worker.id, task = %task, attempt = lost, %err, "claim lost");
                        if lost >= self.config.claim_retry_limit {
                            break;
                        }
                    }
                    Err(err) if is_retryable(&err) => {
                        debug!(worker = %worker.id, task = %task, %err, "task skipped for this tick");
                    }
                    Err(err) => {
                        warn!(worker = %worker.id, task = %task, %err, "task could not be taken");
                        if services.registry.get(task).is_none() {
                            report.cancelled.push(task);
                        }
                    }
                }
                candidate = services
                    .registry
                    .find_best_task_excluding(worker, distance, &tried);
            }
        }
    }

    /// Claim, route and start one task for `worker`.
    fn take(
        &mut self,
        worker: &WorkerSnapshot,
        id: TaskId,
        distance: &dyn Distance,
        services: &mut Services<'_>,
    ) -> Result<()> {
        services.registry.claim(worker.id, id)?;
        let task = services.registry.get(id).ok_or(ColonyError::TaskNotFound(id))?;

        let route = match task.order {
            TaskOrder::Haul(order) => match route_haul(id, &order, task.position, distance, services) {
                Ok(route) => Some(route),
                Err(err) => {
                    services.stockpiles.release_task_reservations(id);
                    if is_retryable(&err) {
                        services.registry.release(id)?;
                    } else {
                        self.cancel_task(id, services)?;
                    }
                    return Err(err);
                }
            },
            _ => None,
        };

        services.registry.start(id, worker.id)?;
        let state = self
            .workers
            .entry(worker.id)
            .or_insert_with(|| WorkerState::new(worker.id, worker.position));
        state.active = Some(ActiveTask::new(id, task.order, task.position, route));
        debug!(task = %id, worker = %worker.id, kind = %task.kind, "task started");
        services.bus.publish(ColonyEvent::TaskStarted {
            task: id,
            worker: worker.id,
        });
        Ok(())
    }

    fn execute(
        &mut self,
        snapshots: &[WorkerSnapshot],
        distance: &dyn Distance,
        services: &mut Services<'_>,
        report: &mut TickReport,
    ) {
        for worker in snapshots.iter().filter(|worker| worker.active) {
            let Some(mut state) = self.workers.remove(&worker.id) else {
                continue;
            };
            if let Some(task) = state.current_task() {
                if let Err(err) = self.step(&mut state, worker, distance, services, report) {
                    if err.is_invariant_violation() {
                        error!(task = %task, worker = %worker.id, %err, "task step failed");
                    } else {
                        warn!(task = %task, worker = %worker.id, %err, "task step failed");
                    }
                    self.abandon(&mut state, task, services, report);
                }
            }
            self.workers.insert(worker.id, state);
        }
    }

    /// Advance one worker's task by a single tick.
    fn step(
        &self,
        state: &mut WorkerState,
        worker: &WorkerSnapshot,
        distance: &dyn Distance,
        services: &mut Services<'_>,
        report: &mut TickReport,
    ) -> Result<()> {
        let Some(mut active) = state.active.take() else {
            return Ok(());
        };
        let task = match services.registry.get(active.task) {
            Some(task) if task.claimant == Some(worker.id) => task,
            _ => {
                debug!(task = %active.task, worker = %worker.id, "claim no longer held");
                services.stockpiles.release_task_reservations(active.task);
                if let Some(goods) = state.carrying.take() {
                    recover_goods(None, goods, state.position, &self.config, services.registry);
                }
                return Ok(());
            }
        };

        let target = active.target();
        if distance.distance(worker.position, target) > self.config.arrival_distance {
            active.phase = TaskPhase::MovingToTarget { target };
            state.active = Some(active);
            return Ok(());
        }

        let rate = self.config.work_rate(worker.skill_level(task.kind));
        let progress = active.phase.progress() + rate;
        active.phase = TaskPhase::Executing { progress };
        let effort = self.config.task_effort;

        match (active.stage, active.route) {
            (Stage::Work, _) => {
                let finished = match active.order {
                    TaskOrder::Build { site, tile } => {
                        services
                            .pipeline
                            .advance_tile_progress(
                                site,
                                tile,
                                rate,
                                services.registry,
                                services.bus,
                                services.tick,
                            )?
                            .tile_finished
                    }
                    _ => progress >= effort,
                };
                if finished {
                    return self.finish(state, worker.id, &task, services, report);
                }
            }
            (Stage::Pickup, Some(route)) if progress >= effort => {
                let loaded = pick_up(task.id, &route, services.stockpiles)?;
                if loaded == 0 {
                    return Err(ColonyError::InsufficientCapacity {
                        item: route.item,
                        quantity: route.quantity,
                    });
                }
                trace!(task = %task.id, item = %route.item, loaded, "goods picked up");
                state.carrying = Some((route.item, loaded));
                active.stage = Stage::DropOff;
                active.phase = TaskPhase::MovingToTarget {
                    target: route.drop_position,
                };
            }
            (Stage::DropOff, Some(route)) if progress >= effort => {
                let Some((item, quantity)) = state.carrying else {
                    return Err(ColonyError::InvariantViolation(format!(
                        "{} reached its drop-off empty-handed",
                        task.id
                    )));
                };
                self.drop_off(&task, &route, item, quantity, services)?;
                state.carrying = None;
                return self.finish(state, worker.id, &task, services, report);
            }
            (Stage::Pickup | Stage::DropOff, None) => {
                return Err(ColonyError::InvariantViolation(format!(
                    "haul {} has no route",
                    task.id
                )));
            }
            _ => {}
        }

        state.active = Some(active);
        Ok(())
    }

    fn drop_off(
        &self,
        task: &Task,
        route: &HaulRoute,
        item: ItemKind,
        quantity: u32,
        services: &mut Services<'_>,
    ) -> Result<()> {
        match route.drop_off {
            DropOff::Slot(slot) => {
                services.stockpiles.deposit(slot, item, quantity)?;
                services.stockpiles.release_if_held(slot, task.id)?;
            }
            DropOff::Site { site, position } => {
                let surplus = match services.pipeline.haul_delivered(
                    site,
                    task.id,
                    item,
                    quantity,
                    services.registry,
                    services.bus,
                    services.tick,
                ) {
                    Ok(delivery) => delivery.surplus,
                    Err(ColonyError::SiteNotFound(_)) => quantity,
                    Err(err) => return Err(err),
                };
                if surplus > 0 {
                    debug!(task = %task.id, %site, %item, surplus, "returning surplus to storage");
                    submit_ground_hauls(item, surplus, position, &self.config, services.registry);
                }
            }
        }
        Ok(())
    }

    /// Complete the task and fire its follow-up work.
    fn finish(
        &self,
        state: &mut WorkerState,
        worker: WorkerId,
        task: &Task,
        services: &mut Services<'_>,
        report: &mut TickReport,
    ) -> Result<()> {
        let done = services.registry.complete_task(task.id, worker)?;
        services.stockpiles.release_task_reservations(task.id);
        state.drop_task();

        if let TaskOrder::Mine {
            yield_item: Some((item, quantity)),
        } = done.order
        {
            submit_ground_hauls(item, quantity, done.position, &self.config, services.registry);
        }

        report.completed.push(task.id);
        services.bus.publish(ColonyEvent::TaskCompleted { task: task.id });
        Ok(())
    }

    /// Give a failed task back to the pool.
    fn abandon(
        &self,
        state: &mut WorkerState,
        task: TaskId,
        services: &Services<'_>,
        report: &mut TickReport,
    ) {
        services.stockpiles.release_task_reservations(task);
        let position = state.position;
        if let Some(goods) = state.drop_task() {
            recover_goods(Some(task), goods, position, &self.config, services.registry);
        }
        if services.registry.release(task).is_ok() {
            services.bus.publish(ColonyEvent::TaskReleased { task });
            report.released.push(task);
        }
    }
}

/// Upper bound on candidates one idle worker examines per tick.
const MAX_CANDIDATES_PER_TICK: usize = 64;

/// Lost races and full storage are retried against the next candidate.
fn is_retryable(err: &ColonyError) -> bool {
    err.is_contention() || matches!(err, ColonyError::InsufficientCapacity { .. })
}

/// Resolve and reserve both ends of a haul.
fn route_haul(
    task: TaskId,
    order: &HaulOrder,
    position: Position,
    distance: &dyn Distance,
    services: &Services<'_>,
) -> Result<HaulRoute> {
    let stockpiles = services.stockpiles;

    let site_anchor = match order.destination {
        HaulDestination::Site(site) => Some(
            services
                .pipeline
                .site(site)
                .ok_or(ColonyError::SiteNotFound(site))?
                .anchor,
        ),
        _ => None,
    };

    let (pickup, pickup_position, quantity) = match order.source {
        HaulSource::Ground(at) => (Pickup::Ground(at), at, order.quantity),
        HaulSource::Slot(slot) => {
            stockpiles.reserve_slot(slot, task)?;
            let stored = stockpiles.slot(slot)?;
            let available = if stored.item == Some(order.item) {
                stored.quantity
            } else {
                0
            };
            if available == 0 {
                return Err(ColonyError::InsufficientCapacity {
                    item: order.item,
                    quantity: order.quantity,
                });
            }
            (Pickup::Slot(slot), stored.position, available.min(order.quantity))
        }
        HaulSource::AnyStockpile => {
            let near = site_anchor.or(Some(position));
            // Take a partial load when no single slot holds the full batch.
            let slot = stockpiles
                .reserve_withdraw_slot(order.item, order.quantity, near, task, distance)
                .or_else(|_| stockpiles.reserve_withdraw_slot(order.item, 1, near, task, distance))?;
            let stored = stockpiles.slot(slot)?;
            (Pickup::Slot(slot), stored.position, stored.quantity.min(order.quantity))
        }
    };

    let (drop_off, drop_position) = match order.destination {
        HaulDestination::Slot(slot) => {
            stockpiles.reserve_slot(slot, task)?;
            let target = stockpiles.slot(slot)?;
            if target.item.is_some_and(|stored| stored != order.item)
                || target.free_capacity() < quantity
            {
                return Err(ColonyError::InsufficientCapacity {
                    item: order.item,
                    quantity,
                });
            }
            (DropOff::Slot(slot), target.position)
        }
        HaulDestination::AnyStockpile => {
            let slot = stockpiles.reserve_deposit_slot(
                order.item,
                quantity,
                Some(pickup_position),
                task,
                distance,
            )?;
            (DropOff::Slot(slot), stockpiles.slot(slot)?.position)
        }
        HaulDestination::Site(site) => {
            let anchor = site_anchor.ok_or(ColonyError::SiteNotFound(site))?;
            (DropOff::Site { site, position: anchor }, anchor)
        }
    };

    trace!(task = %task, from = %pickup_position, to = %drop_position, quantity, "haul routed");
    Ok(HaulRoute {
        item: order.item,
        quantity,
        pickup,
        pickup_position,
        drop_off,
        drop_position,
    })
}

/// Load goods at the pickup and release its reservation. Returns the amount loaded.
fn pick_up(task: TaskId, route: &HaulRoute, stockpiles: &StockpileManager) -> Result<u32> {
    match route.pickup {
        Pickup::Ground(_) => Ok(route.quantity),
        Pickup::Slot(slot) => {
            let stored = stockpiles.slot(slot)?;
            let available = if stored.item == Some(route.item) {
                stored.quantity
            } else {
                0
            };
            let take = available.min(route.quantity);
            if take > 0 {
                stockpiles.withdraw(slot, take)?;
            }
            stockpiles.release_if_held(slot, task)?;
            Ok(take)
        }
    }
}

/// Queue hauls moving loose goods at `position` into storage.
fn submit_ground_hauls(
    item: ItemKind,
    quantity: u32,
    position: Position,
    config: &ColonyConfig,
    registry: &TaskRegistry,
) -> Vec<TaskId> {
    let batch_size = config.haul_batch_size.max(1);
    let mut tasks = Vec::new();
    let mut remaining = quantity;
    while remaining > 0 {
        let batch = remaining.min(batch_size);
        let order = HaulOrder {
            item,
            quantity: batch,
            source: HaulSource::Ground(position),
            destination: HaulDestination::AnyStockpile,
        };
        tasks.push(registry.submit(
            TaskRequest::haul(order, position).with_priority(config.stockpile_haul_priority),
        ));
        remaining -= batch;
    }
    tasks
}

/// Goods dropped mid-haul. The haul itself resumes from the drop point when
/// it still exists; otherwise a fresh haul to storage is queued.
fn recover_goods(
    task: Option<TaskId>,
    goods: (ItemKind, u32),
    position: Position,
    config: &ColonyConfig,
    registry: &TaskRegistry,
) {
    let (item, quantity) = goods;
    if let Some(Task {
        id,
        order: TaskOrder::Haul(order),
        ..
    }) = task.and_then(|id| registry.get(id))
    {
        let order = HaulOrder {
            item,
            quantity,
            source: HaulSource::Ground(position),
            ..order
        };
        if registry.update_order(id, TaskOrder::Haul(order), position).is_ok() {
            debug!(task = %id, %item, quantity, at = %position, "haul resumes from dropped goods");
            return;
        }
    }
    debug!(%item, quantity, at = %position, "dropped goods queued for storage");
    submit_ground_hauls(item, quantity, position, config, registry);
}
