//! Plain-value snapshot of the scheduling core for an external persistence layer.

use colony_rules::WorkerId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::construction::SiteTable;
use crate::error::Result;
use crate::scheduler::WorkerState;
use crate::stockpile::StockpileTable;
use crate::task_registry::TaskTable;

/// Every task, stockpile slot, construction site and in-flight worker
/// assignment, plus the id counters and the tick clock.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ColonySnapshot {
    pub tick: u64,
    pub tasks: TaskTable,
    pub stockpiles: StockpileTable,
    pub sites: SiteTable,
    pub workers: BTreeMap<WorkerId, WorkerState>,
}

impl ColonySnapshot {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task_registry::TaskRegistry;
    use colony_rules::{Capability, Position, TaskKind};

    #[test]
    fn test_empty_snapshot_json() {
        let snapshot = ColonySnapshot::default();
        let restored = ColonySnapshot::from_json(&snapshot.to_json().unwrap()).unwrap();
        assert_eq!(restored, snapshot);
    }

    #[test]
    fn test_task_table_survives_json() {
        let registry = TaskRegistry::new();
        registry.submit_task(TaskKind::Mine, Position::new(3, -2), 4, Capability::Mining);
        let snapshot = ColonySnapshot {
            tick: 12,
            tasks: registry.snapshot(),
            ..Default::default()
        };

        let restored = ColonySnapshot::from_json(&snapshot.to_json().unwrap()).unwrap();
        assert_eq!(restored.tick, 12);
        assert_eq!(restored.tasks, snapshot.tasks);
        assert_eq!(restored.tasks.next_id, 1);
    }

    #[test]
    fn test_garbage_is_rejected() {
        assert!(ColonySnapshot::from_json("{ not json").is_err());
    }
}
