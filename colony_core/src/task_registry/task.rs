//! Task definitions and the typed work orders they carry.

use colony_rules::{Capability, ItemKind, Position, TaskKind, WorkerId};
use serde::{Deserialize, Serialize};

use crate::construction::SiteId;
use crate::stockpile::SlotRef;

/// Stable identifier for tasks, allocated in creation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId(pub u64);

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Lifecycle of a task. Transitions only move forward, except that a
/// released claim returns to `Open` and any state may become `Cancelled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskStatus {
    Open,
    Claimed,
    InProgress,
    Complete,
    Cancelled,
}

impl TaskStatus {
    /// Held by a worker.
    pub fn is_claimed(&self) -> bool {
        matches!(self, TaskStatus::Claimed | TaskStatus::InProgress)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Complete | TaskStatus::Cancelled)
    }
}

/// Where a haul picks its goods up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HaulSource {
    /// Loose goods lying on the ground.
    Ground(Position),
    /// A specific stockpile slot.
    Slot(SlotRef),
    /// Whichever stockpile slot holds enough when the haul is claimed.
    AnyStockpile,
}

/// Where a haul drops its goods off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HaulDestination {
    Slot(SlotRef),
    /// Whichever stockpile slot has room when the haul is claimed.
    AnyStockpile,
    Site(SiteId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HaulOrder {
    pub item: ItemKind,
    pub quantity: u32,
    pub source: HaulSource,
    pub destination: HaulDestination,
}

/// The typed payload of a task. The scheduler dispatches side effects on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskOrder {
    /// Zone-designated work with no side effect beyond completion.
    Designated,
    Haul(HaulOrder),
    Mine {
        /// Goods dropped at the mine position on completion, if any.
        yield_item: Option<(ItemKind, u32)>,
    },
    Build {
        site: SiteId,
        tile: usize,
    },
}

impl TaskOrder {
    pub fn kind(&self) -> Option<TaskKind> {
        match self {
            TaskOrder::Designated => None,
            TaskOrder::Haul(_) => Some(TaskKind::Haul),
            TaskOrder::Mine { .. } => Some(TaskKind::Mine),
            TaskOrder::Build { .. } => Some(TaskKind::Build),
        }
    }

    /// The construction site this order feeds, if any.
    pub fn site(&self) -> Option<SiteId> {
        match self {
            TaskOrder::Haul(HaulOrder {
                destination: HaulDestination::Site(site),
                ..
            }) => Some(*site),
            TaskOrder::Build { site, .. } => Some(*site),
            _ => None,
        }
    }
}

/// A unit of work tracked through the exclusive-claim lifecycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub kind: TaskKind,
    pub order: TaskOrder,
    pub position: Position,
    pub priority: i32,
    pub required: Capability,
    pub status: TaskStatus,
    pub claimant: Option<WorkerId>,
    /// Creation order, used to break score ties.
    pub sequence: u64,
}

/// A request to create a task.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TaskRequest {
    pub kind: TaskKind,
    pub order: TaskOrder,
    pub position: Position,
    pub priority: i32,
    pub required: Capability,
}

impl TaskRequest {
    /// Plain designated work of the given kind.
    pub fn designated(kind: TaskKind, position: Position) -> Self {
        Self {
            kind,
            order: TaskOrder::Designated,
            position,
            priority: 0,
            required: kind.default_capability(),
        }
    }

    pub fn haul(order: HaulOrder, position: Position) -> Self {
        Self::with_order(TaskKind::Haul, TaskOrder::Haul(order), position)
    }

    pub fn mine(position: Position, yield_item: Option<(ItemKind, u32)>) -> Self {
        Self::with_order(TaskKind::Mine, TaskOrder::Mine { yield_item }, position)
    }

    pub fn build(site: SiteId, tile: usize, position: Position) -> Self {
        Self::with_order(TaskKind::Build, TaskOrder::Build { site, tile }, position)
    }

    fn with_order(kind: TaskKind, order: TaskOrder, position: Position) -> Self {
        Self {
            kind,
            order,
            position,
            priority: 0,
            required: kind.default_capability(),
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_capability(mut self, required: Capability) -> Self {
        self.required = required;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_builders_derive_kind_and_capability() {
        let request = TaskRequest::mine(Position::new(4, 4), Some((ItemKind::Stone, 5)))
            .with_priority(2);
        assert_eq!(request.kind, TaskKind::Mine);
        assert_eq!(request.required, Capability::Mining);
        assert_eq!(request.priority, 2);
        assert_eq!(request.order.kind(), Some(TaskKind::Mine));
    }

    #[test]
    fn test_order_site() {
        let haul = TaskOrder::Haul(HaulOrder {
            item: ItemKind::Wood,
            quantity: 10,
            source: HaulSource::AnyStockpile,
            destination: HaulDestination::Site(SiteId(4)),
        });
        assert_eq!(haul.site(), Some(SiteId(4)));
        assert_eq!(TaskOrder::Build { site: SiteId(2), tile: 0 }.site(), Some(SiteId(2)));
        assert_eq!(TaskOrder::Designated.site(), None);
    }

    #[test]
    fn test_status_classification() {
        assert!(TaskStatus::Claimed.is_claimed());
        assert!(TaskStatus::InProgress.is_claimed());
        assert!(!TaskStatus::Open.is_claimed());
        assert!(TaskStatus::Cancelled.is_terminal());
    }
}
