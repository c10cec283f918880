//! Error taxonomy for the scheduling core.

use colony_rules::{ItemKind, WorkerId};
use thiserror::Error;

use crate::construction::SiteId;
use crate::stockpile::{SlotRef, StockpileId};
use crate::task_registry::{TaskId, TaskStatus};

#[derive(Error, Debug)]
pub enum ColonyError {
    #[error("Task not found: {0}")]
    TaskNotFound(TaskId),

    #[error("Task {task} already claimed (status {status:?})")]
    AlreadyClaimed { task: TaskId, status: TaskStatus },

    #[error("Worker {caller} is not the claimant of task {task} (claimant: {claimant:?})")]
    InvalidClaimant {
        task: TaskId,
        caller: WorkerId,
        claimant: Option<WorkerId>,
    },

    #[error("Invalid transition of task {task} from {from:?} to {to:?}")]
    InvalidTransition {
        task: TaskId,
        from: TaskStatus,
        to: TaskStatus,
    },

    #[error("Slot {slot} is reserved by task {holder}")]
    SlotReservationConflict { slot: SlotRef, holder: TaskId },

    #[error("No storage can take {quantity} x {item}")]
    InsufficientCapacity { item: ItemKind, quantity: u32 },

    #[error("Tile {tile} of site {site} is blocked by unfinished tile {blocked_by}")]
    InvalidBuildOrder {
        site: SiteId,
        tile: usize,
        blocked_by: usize,
    },

    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    #[error("Construction site not found: {0}")]
    SiteNotFound(SiteId),

    #[error("Stockpile not found: {0}")]
    StockpileNotFound(StockpileId),

    #[error("Stockpile slot not found: {0}")]
    SlotNotFound(SlotRef),

    #[error("Placement rejected: {0}")]
    PlacementConflict(String),

    #[error("Invalid blueprint: {0}")]
    InvalidBlueprint(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ColonyError {
    /// Races between workers; recovered locally by retrying or re-querying.
    pub fn is_contention(&self) -> bool {
        matches!(
            self,
            ColonyError::AlreadyClaimed { .. } | ColonyError::SlotReservationConflict { .. }
        )
    }

    /// Corrupted state. Logged with context; only the offending operation stops.
    pub fn is_invariant_violation(&self) -> bool {
        matches!(self, ColonyError::InvariantViolation(_))
    }
}

pub type Result<T> = std::result::Result<T, ColonyError>;
