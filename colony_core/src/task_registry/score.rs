//! Utility scoring and candidate ranking.

use colony_rules::{score_task, Distance, WorkerSnapshot};
use std::cmp::Ordering;

use super::{Task, TaskId};

/// Utility of `task` for `worker`, recomputed from current state on every call.
pub fn score(worker: &WorkerSnapshot, task: &Task, distance: &dyn Distance) -> f32 {
    score_task(
        task.priority,
        distance.distance(worker.position, task.position),
        worker.prefers(task.kind),
        worker.skill_level(task.kind),
    )
}

/// A scored candidate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoredTask {
    pub task: TaskId,
    pub score: f32,
    pub sequence: u64,
}

impl ScoredTask {
    /// `Less` when `self` should be picked before `other`:
    /// higher score, then earlier creation, then lower id.
    pub fn rank(&self, other: &ScoredTask) -> Ordering {
        other
            .score
            .total_cmp(&self.score)
            .then_with(|| self.sequence.cmp(&other.sequence))
            .then_with(|| self.task.cmp(&other.task))
    }
}
