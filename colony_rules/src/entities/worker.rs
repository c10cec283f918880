//! The read-only worker view supplied by the NPC subsystem every tick.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use super::{Preferences, SkillSet, WorkerId};
use crate::mechanics::{Capability, TaskKind};
use crate::spatial::Position;

/// Everything the scheduler may know about a worker during one tick.
///
/// Consumed by value; the scheduler never writes back into it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerSnapshot {
    pub id: WorkerId,
    pub position: Position,
    pub skills: SkillSet,
    pub preferences: Preferences,
    pub capabilities: BTreeSet<Capability>,
    /// False once the worker is despawned, asleep, drafted or otherwise unavailable.
    pub active: bool,
}

impl WorkerSnapshot {
    /// Create an active worker with no skills, preferences or capabilities.
    pub fn new(id: WorkerId, position: Position) -> Self {
        Self {
            id,
            position,
            skills: SkillSet::default(),
            preferences: Preferences::default(),
            capabilities: BTreeSet::new(),
            active: true,
        }
    }

    pub fn with_skill(mut self, kind: TaskKind, level: u32) -> Self {
        self.skills.set(kind, level);
        self
    }

    pub fn with_preference(mut self, kind: TaskKind) -> Self {
        self.preferences = self.preferences.with(kind);
        self
    }

    pub fn with_capability(mut self, capability: Capability) -> Self {
        self.capabilities.insert(capability);
        self
    }

    /// Grant every capability.
    pub fn with_all_capabilities(mut self) -> Self {
        self.capabilities
            .extend(TaskKind::ALL.iter().map(|kind| kind.default_capability()));
        self
    }

    pub fn with_active(mut self, active: bool) -> Self {
        self.active = active;
        self
    }

    pub fn can(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }

    pub fn skill_level(&self, kind: TaskKind) -> u32 {
        self.skills.level(kind)
    }

    pub fn prefers(&self, kind: TaskKind) -> bool {
        self.preferences.prefers(kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_worker_is_active_and_unskilled() {
        let worker = WorkerSnapshot::new(WorkerId::new(), Position::new(1, 1));
        assert!(worker.active);
        assert!(!worker.can(Capability::Hauling));
        assert_eq!(worker.skill_level(TaskKind::Haul), 0);
    }

    #[test]
    fn test_builder() {
        let worker = WorkerSnapshot::new(WorkerId::new(), Position::default())
            .with_skill(TaskKind::Build, 3)
            .with_preference(TaskKind::Build)
            .with_capability(Capability::Construction);

        assert!(worker.can(Capability::Construction));
        assert!(worker.prefers(TaskKind::Build));
        assert_eq!(worker.skill_level(TaskKind::Build), 3);
    }

    #[test]
    fn test_snapshot_serializes() {
        let worker = WorkerSnapshot::new(WorkerId::new(), Position::new(2, 3)).with_all_capabilities();
        let json = serde_json::to_string(&worker).unwrap();
        let back: WorkerSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, worker.id);
        assert_eq!(back.capabilities.len(), 3);
    }
}
