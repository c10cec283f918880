//! Per-worker execution state carried between ticks.

use colony_rules::{ItemKind, Position, WorkerId};
use serde::{Deserialize, Serialize};

use crate::construction::SiteId;
use crate::stockpile::SlotRef;
use crate::task_registry::{TaskId, TaskOrder};

/// Where a haul picks its load up, resolved at claim time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Pickup {
    Ground(Position),
    Slot(SlotRef),
}

/// Where a haul drops its load, resolved at claim time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DropOff {
    Slot(SlotRef),
    Site { site: SiteId, position: Position },
}

/// Concrete endpoints of a claimed haul.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HaulRoute {
    pub item: ItemKind,
    pub quantity: u32,
    pub pickup: Pickup,
    pub pickup_position: Position,
    pub drop_off: DropOff,
    pub drop_position: Position,
}

impl HaulRoute {
    /// Stockpile slots this route holds reservations on.
    pub fn reserved_slots(&self) -> impl Iterator<Item = SlotRef> {
        let pickup = match self.pickup {
            Pickup::Slot(slot) => Some(slot),
            Pickup::Ground(_) => None,
        };
        let drop_off = match self.drop_off {
            DropOff::Slot(slot) => Some(slot),
            DropOff::Site { .. } => None,
        };
        pickup.into_iter().chain(drop_off)
    }
}

/// Which part of a task the worker is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Stage {
    /// Walk to the source and load.
    Pickup,
    /// Walk to the destination and unload.
    DropOff,
    /// Mine, build or designated work at the task position.
    Work,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum TaskPhase {
    MovingToTarget { target: Position },
    Executing { progress: f32 },
}

impl TaskPhase {
    pub fn progress(&self) -> f32 {
        match self {
            TaskPhase::Executing { progress } => *progress,
            TaskPhase::MovingToTarget { .. } => 0.0,
        }
    }
}

/// A task a worker has claimed and is carrying out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveTask {
    pub task: TaskId,
    pub order: TaskOrder,
    /// Position of the task itself; work stages happen here.
    pub position: Position,
    pub route: Option<HaulRoute>,
    pub stage: Stage,
    pub phase: TaskPhase,
}

impl ActiveTask {
    pub fn new(task: TaskId, order: TaskOrder, position: Position, route: Option<HaulRoute>) -> Self {
        let (stage, target) = match route {
            Some(route) => (Stage::Pickup, route.pickup_position),
            None => (Stage::Work, position),
        };
        Self {
            task,
            order,
            position,
            route,
            stage,
            phase: TaskPhase::MovingToTarget { target },
        }
    }

    /// Where the worker must stand for the current stage.
    pub fn target(&self) -> Position {
        match (self.stage, self.route) {
            (Stage::Pickup, Some(route)) => route.pickup_position,
            (Stage::DropOff, Some(route)) => route.drop_position,
            _ => self.position,
        }
    }
}

/// Scheduler-side view of one worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerState {
    pub worker: WorkerId,
    /// Last position reported by the simulation.
    pub position: Position,
    pub active: Option<ActiveTask>,
    /// Goods in hand between pickup and drop-off.
    pub carrying: Option<(ItemKind, u32)>,
}

impl WorkerState {
    pub fn new(worker: WorkerId, position: Position) -> Self {
        Self {
            worker,
            position,
            active: None,
            carrying: None,
        }
    }

    pub fn is_idle(&self) -> bool {
        self.active.is_none()
    }

    pub fn current_task(&self) -> Option<TaskId> {
        self.active.as_ref().map(|active| active.task)
    }

    /// Forget the current task, returning any goods still in hand.
    pub fn drop_task(&mut self) -> Option<(ItemKind, u32)> {
        self.active = None;
        self.carrying.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stockpile::StockpileId;
    use crate::task_registry::{HaulDestination, HaulOrder, HaulSource};

    fn route() -> HaulRoute {
        HaulRoute {
            item: ItemKind::Stone,
            quantity: 5,
            pickup: Pickup::Ground(Position::new(2, 2)),
            pickup_position: Position::new(2, 2),
            drop_off: DropOff::Slot(SlotRef::new(StockpileId(0), 3)),
            drop_position: Position::new(9, 9),
        }
    }

    #[test]
    fn test_haul_starts_at_pickup() {
        let order = TaskOrder::Haul(HaulOrder {
            item: ItemKind::Stone,
            quantity: 5,
            source: HaulSource::Ground(Position::new(2, 2)),
            destination: HaulDestination::AnyStockpile,
        });
        let mut active = ActiveTask::new(TaskId(1), order, Position::new(2, 2), Some(route()));
        assert_eq!(active.stage, Stage::Pickup);
        assert_eq!(active.target(), Position::new(2, 2));

        active.stage = Stage::DropOff;
        assert_eq!(active.target(), Position::new(9, 9));
    }

    #[test]
    fn test_work_task_targets_task_position() {
        let active = ActiveTask::new(
            TaskId(2),
            TaskOrder::Mine { yield_item: None },
            Position::new(4, 1),
            None,
        );
        assert_eq!(active.stage, Stage::Work);
        assert_eq!(
            active.phase,
            TaskPhase::MovingToTarget {
                target: Position::new(4, 1)
            }
        );
        assert_eq!(active.phase.progress(), 0.0);
    }

    #[test]
    fn test_route_reserved_slots() {
        let slots: Vec<_> = route().reserved_slots().collect();
        assert_eq!(slots, vec![SlotRef::new(StockpileId(0), 3)]);
    }

    #[test]
    fn test_drop_task_returns_goods() {
        let mut state = WorkerState::new(WorkerId::new(), Position::new(0, 0));
        state.active = Some(ActiveTask::new(
            TaskId(3),
            TaskOrder::Designated,
            Position::new(1, 1),
            None,
        ));
        state.carrying = Some((ItemKind::Wood, 4));

        assert_eq!(state.drop_task(), Some((ItemKind::Wood, 4)));
        assert!(state.is_idle());
        assert_eq!(state.carrying, None);
    }
}
