//! Skill levels and work preferences.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::mechanics::TaskKind;

/// Skill level per task kind. Missing kinds count as level 0.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkillSet {
    levels: BTreeMap<TaskKind, u32>,
}

impl SkillSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a skill level, replacing any previous value.
    pub fn with(mut self, kind: TaskKind, level: u32) -> Self {
        self.levels.insert(kind, level);
        self
    }

    pub fn level(&self, kind: TaskKind) -> u32 {
        self.levels.get(&kind).copied().unwrap_or(0)
    }

    pub fn set(&mut self, kind: TaskKind, level: u32) {
        self.levels.insert(kind, level);
    }
}

/// Task kinds the worker enjoys; preferred tasks score a flat bonus.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Preferences {
    kinds: BTreeSet<TaskKind>,
}

impl Preferences {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, kind: TaskKind) -> Self {
        self.kinds.insert(kind);
        self
    }

    pub fn prefers(&self, kind: TaskKind) -> bool {
        self.kinds.contains(&kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_skill_is_zero() {
        let skills = SkillSet::new().with(TaskKind::Mine, 4);
        assert_eq!(skills.level(TaskKind::Mine), 4);
        assert_eq!(skills.level(TaskKind::Build), 0);
    }

    #[test]
    fn test_preferences() {
        let prefs = Preferences::new().with(TaskKind::Haul);
        assert!(prefs.prefers(TaskKind::Haul));
        assert!(!prefs.prefers(TaskKind::Build));
    }
}
