//! The task registry - single owner of task state.
//!
//! Every operation runs inside one critical section, so `claim` is a true
//! compare-and-set: among any number of simultaneous callers exactly one
//! observes `Open` and wins.

use colony_rules::{Capability, Distance, Position, TaskKind, WorkerId, WorkerSnapshot};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, trace};

use super::{score, ScoredTask, Task, TaskId, TaskOrder, TaskRequest, TaskStatus};
use crate::error::{ColonyError, Result};

/// Plain table state; also the persisted form of the registry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskTable {
    pub tasks: BTreeMap<TaskId, Task>,
    pub next_id: u64,
    pub next_sequence: u64,
}

/// Holds every active (non-terminal) task.
#[derive(Debug, Default)]
pub struct TaskRegistry {
    table: Mutex<TaskTable>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a registry from persisted state.
    pub fn from_table(table: TaskTable) -> Self {
        Self {
            table: Mutex::new(table),
        }
    }

    /// Copy of the full table.
    pub fn snapshot(&self) -> TaskTable {
        self.table().clone()
    }

    fn table(&self) -> MutexGuard<'_, TaskTable> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert designated work as `Open`. Always succeeds.
    pub fn submit_task(
        &self,
        kind: TaskKind,
        position: Position,
        priority: i32,
        required: Capability,
    ) -> TaskId {
        self.submit(
            TaskRequest::designated(kind, position)
                .with_priority(priority)
                .with_capability(required),
        )
    }

    /// Insert a typed work order as `Open`. Always succeeds.
    pub fn submit(&self, request: TaskRequest) -> TaskId {
        let mut table = self.table();
        let id = TaskId(table.next_id);
        table.next_id += 1;
        let sequence = table.next_sequence;
        table.next_sequence += 1;

        table.tasks.insert(
            id,
            Task {
                id,
                kind: request.kind,
                order: request.order,
                position: request.position,
                priority: request.priority,
                required: request.required,
                status: TaskStatus::Open,
                claimant: None,
                sequence,
            },
        );
        debug!(task = %id, kind = %request.kind, priority = request.priority, "task submitted");
        id
    }

    /// Remove a task as `Cancelled`, whatever its state, and return it.
    ///
    /// Stockpile reservations are not touched here. Prefer
    /// `Colony::cancel_task`; a worker still holding a task removed this way
    /// releases its reservations on its next scheduling step.
    pub fn cancel_task(&self, id: TaskId) -> Result<Task> {
        let mut task = self
            .table()
            .tasks
            .remove(&id)
            .ok_or(ColonyError::TaskNotFound(id))?;
        debug!(task = %id, status = ?task.status, claimant = ?task.claimant, "task cancelled");
        task.status = TaskStatus::Cancelled;
        Ok(task)
    }

    /// Best open task the worker is capable of, or `None`.
    pub fn find_best_task(&self, worker: &WorkerSnapshot, distance: &dyn Distance) -> Option<TaskId> {
        self.find_best_task_excluding(worker, distance, &BTreeSet::new())
    }

    /// Like [`find_best_task`](Self::find_best_task), skipping tasks the worker
    /// already tried this tick.
    pub fn find_best_task_excluding(
        &self,
        worker: &WorkerSnapshot,
        distance: &dyn Distance,
        excluded: &BTreeSet<TaskId>,
    ) -> Option<TaskId> {
        let table = self.table();
        table
            .tasks
            .values()
            .filter(|task| task.status == TaskStatus::Open)
            .filter(|task| worker.can(task.required))
            .filter(|task| !excluded.contains(&task.id))
            .map(|task| ScoredTask {
                task: task.id,
                score: score(worker, task, distance),
                sequence: task.sequence,
            })
            .min_by(|a, b| a.rank(b))
            .map(|best| best.task)
    }

    /// Every open task the worker could take, best first.
    pub fn ranked_candidates(&self, worker: &WorkerSnapshot, distance: &dyn Distance) -> Vec<ScoredTask> {
        let table = self.table();
        let mut candidates: Vec<_> = table
            .tasks
            .values()
            .filter(|task| task.status == TaskStatus::Open && worker.can(task.required))
            .map(|task| ScoredTask {
                task: task.id,
                score: score(worker, task, distance),
                sequence: task.sequence,
            })
            .collect();
        candidates.sort_by(|a, b| a.rank(b));
        candidates
    }

    /// Atomically take an `Open` task for `worker`.
    pub fn claim(&self, worker: WorkerId, id: TaskId) -> Result<()> {
        let mut table = self.table();
        let task = table.tasks.get_mut(&id).ok_or(ColonyError::TaskNotFound(id))?;
        if task.status != TaskStatus::Open {
            trace!(task = %id, worker = %worker, status = ?task.status, "claim lost");
            return Err(ColonyError::AlreadyClaimed {
                task: id,
                status: task.status,
            });
        }
        task.status = TaskStatus::Claimed;
        task.claimant = Some(worker);
        debug!(task = %id, worker = %worker, "task claimed");
        Ok(())
    }

    /// Mark a claimed task as being worked on.
    pub fn start(&self, id: TaskId, worker: WorkerId) -> Result<()> {
        let mut table = self.table();
        let task = table.tasks.get_mut(&id).ok_or(ColonyError::TaskNotFound(id))?;
        check_claimant(task, worker)?;
        match task.status {
            TaskStatus::Claimed => {
                task.status = TaskStatus::InProgress;
                Ok(())
            }
            TaskStatus::InProgress => Ok(()),
            from => Err(ColonyError::InvalidTransition {
                task: id,
                from,
                to: TaskStatus::InProgress,
            }),
        }
    }

    /// Return a claimed task to the open pool. Idempotent for open tasks.
    pub fn release(&self, id: TaskId) -> Result<()> {
        let mut table = self.table();
        let task = table.tasks.get_mut(&id).ok_or(ColonyError::TaskNotFound(id))?;
        if task.status.is_claimed() {
            debug!(task = %id, claimant = ?task.claimant, "task released");
        }
        task.status = TaskStatus::Open;
        task.claimant = None;
        Ok(())
    }

    /// Finish a task on behalf of its claimant, removing it from the registry.
    pub fn complete_task(&self, id: TaskId, worker: WorkerId) -> Result<Task> {
        let mut table = self.table();
        let task = table.tasks.get(&id).ok_or(ColonyError::TaskNotFound(id))?;
        check_claimant(task, worker)?;
        let mut task = table
            .tasks
            .remove(&id)
            .ok_or(ColonyError::TaskNotFound(id))?;
        task.status = TaskStatus::Complete;
        debug!(task = %id, worker = %worker, "task completed");
        Ok(task)
    }

    /// Release every claim whose worker is no longer active.
    ///
    /// Returns the released tasks with their former claimants.
    pub fn reconcile(&self, is_active: impl Fn(WorkerId) -> bool) -> Vec<(TaskId, WorkerId)> {
        let mut table = self.table();
        let mut released = Vec::new();
        for task in table.tasks.values_mut() {
            let Some(claimant) = task.claimant else {
                continue;
            };
            if !is_active(claimant) {
                debug!(task = %task.id, worker = %claimant, "releasing orphaned claim");
                task.status = TaskStatus::Open;
                task.claimant = None;
                released.push((task.id, claimant));
            }
        }
        released
    }

    /// Replace the order of an existing task, e.g. to point a haul at dropped goods.
    pub fn update_order(&self, id: TaskId, order: TaskOrder, position: Position) -> Result<()> {
        let mut table = self.table();
        let task = table.tasks.get_mut(&id).ok_or(ColonyError::TaskNotFound(id))?;
        task.order = order;
        task.position = position;
        Ok(())
    }

    pub fn get(&self, id: TaskId) -> Option<Task> {
        self.table().tasks.get(&id).cloned()
    }

    pub fn status(&self, id: TaskId) -> Option<TaskStatus> {
        self.table().tasks.get(&id).map(|task| task.status)
    }

    /// All tasks matching a predicate, in id order.
    pub fn find_tasks<F>(&self, predicate: F) -> Vec<Task>
    where
        F: Fn(&Task) -> bool,
    {
        self.table()
            .tasks
            .values()
            .filter(|task| predicate(task))
            .cloned()
            .collect()
    }

    pub fn open_tasks(&self) -> Vec<Task> {
        self.find_tasks(|task| task.status == TaskStatus::Open)
    }

    pub fn len(&self) -> usize {
        self.table().tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table().tasks.is_empty()
    }
}

fn check_claimant(task: &Task, worker: WorkerId) -> Result<()> {
    if task.claimant != Some(worker) {
        return Err(ColonyError::InvalidClaimant {
            task: task.id,
            caller: worker,
            claimant: task.claimant,
        });
    }
    Ok(())
}
