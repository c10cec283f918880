//! Colony mechanics: task kinds, capability tags, items and scoring weights.

use serde::{Deserialize, Serialize};

/// The closed set of work a colonist can perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TaskKind {
    /// Move goods between stockpiles, the ground and construction sites.
    Haul,
    /// Dig out rock or ore at a designated tile.
    Mine,
    /// Raise one tile of a construction site.
    Build,
}

impl TaskKind {
    pub const ALL: [TaskKind; 3] = [TaskKind::Haul, TaskKind::Mine, TaskKind::Build];

    /// The capability a worker needs before it may claim this kind of task.
    pub fn default_capability(&self) -> Capability {
        match self {
            TaskKind::Haul => Capability::Hauling,
            TaskKind::Mine => Capability::Mining,
            TaskKind::Build => Capability::Construction,
        }
    }
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TaskKind::Haul => "haul",
            TaskKind::Mine => "mine",
            TaskKind::Build => "build",
        };
        f.write_str(name)
    }
}

/// Capability tags a worker may hold. Tasks require exactly one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Capability {
    Hauling,
    Mining,
    Construction,
}

/// Storage categories used by stockpile filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ItemCategory {
    RawMaterial,
    Processed,
    Food,
}

/// Every item kind that can be stored, hauled or built with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ItemKind {
    // Raw
    Wood,
    Stone,
    Ore,
    Clay,

    // Processed
    Plank,
    Brick,
    IronBar,

    // Food
    Berries,
    Meal,
}

impl ItemKind {
    pub fn category(&self) -> ItemCategory {
        match self {
            ItemKind::Wood | ItemKind::Stone | ItemKind::Ore | ItemKind::Clay => {
                ItemCategory::RawMaterial
            }
            ItemKind::Plank | ItemKind::Brick | ItemKind::IronBar => ItemCategory::Processed,
            ItemKind::Berries | ItemKind::Meal => ItemCategory::Food,
        }
    }
}

impl std::fmt::Display for ItemKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Weight applied to task priority.
pub const PRIORITY_WEIGHT: f32 = 100.0;
/// Penalty per unit of distance between worker and task.
pub const DISTANCE_WEIGHT: f32 = 2.0;
/// Flat bonus when the task kind is among the worker's preferences.
pub const PREFERENCE_BONUS: f32 = 50.0;
/// Weight applied to the worker's skill level in the task kind.
pub const SKILL_WEIGHT: f32 = 10.0;

/// Utility of one (worker, task) pairing.
///
/// `priority*100 - distance*2 + (50 if preferred) + skill*10`
pub fn score_task(priority: i32, distance: f32, preferred: bool, skill_level: u32) -> f32 {
    let preference = if preferred { PREFERENCE_BONUS } else { 0.0 };
    priority as f32 * PRIORITY_WEIGHT - distance * DISTANCE_WEIGHT
        + preference
        + skill_level as f32 * SKILL_WEIGHT
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_score_formula() {
        // Skilled, preferred, two tiles away.
        assert_eq!(score_task(1, 2.0, true, 5), 196.0);
        // Unskilled neighbour without preference.
        assert_eq!(score_task(1, 0.0, false, 1), 110.0);
    }

    #[test]
    fn test_negative_priority_scores_below_zero() {
        assert!(score_task(-1, 0.0, false, 0) < 0.0);
    }

    #[test]
    fn test_item_categories() {
        assert_eq!(ItemKind::Wood.category(), ItemCategory::RawMaterial);
        assert_eq!(ItemKind::Plank.category(), ItemCategory::Processed);
        assert_eq!(ItemKind::Meal.category(), ItemCategory::Food);
    }

    #[test]
    fn test_default_capabilities() {
        assert_eq!(TaskKind::Haul.default_capability(), Capability::Hauling);
        assert_eq!(TaskKind::Mine.default_capability(), Capability::Mining);
        assert_eq!(TaskKind::Build.default_capability(), Capability::Construction);
    }
}
