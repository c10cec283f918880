//! Tunables for the scheduling core, loadable from TOML.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::debug;

use crate::error::{ColonyError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColonyConfig {
    /// Claim attempts per idle worker per tick before giving up until the next tick.
    pub claim_retry_limit: u32,
    /// Capacity of every stockpile slot.
    pub slot_capacity: u32,
    /// Largest quantity a single haul task carries.
    pub haul_batch_size: u32,
    /// A worker within this distance of its target has arrived.
    pub arrival_distance: f32,
    /// Progress per tick for an unskilled worker.
    pub base_work_rate: f32,
    /// Extra progress per tick for each skill level.
    pub skill_work_bonus: f32,
    /// Work needed to finish a haul pickup/drop-off or a mine task, in progress units.
    pub task_effort: f32,
    /// Ticks between orphaned-claim sweeps.
    pub reconcile_interval_ticks: u64,
    pub construction_haul_priority: i32,
    pub build_priority: i32,
    /// Priority of hauls that move loose goods into storage.
    pub stockpile_haul_priority: i32,
    /// Cancel a construction site after this many ticks without a delivery or
    /// build progress. `None` keeps sites waiting forever.
    pub stall_timeout_ticks: Option<u64>,
}

impl Default for ColonyConfig {
    fn default() -> Self {
        Self {
            claim_retry_limit: 3,
            slot_capacity: 10,
            haul_batch_size: 10,
            arrival_distance: 1.0,
            base_work_rate: 0.1,
            skill_work_bonus: 0.02,
            task_effort: 1.0,
            reconcile_interval_ticks: 1,
            construction_haul_priority: 2,
            build_priority: 3,
            stockpile_haul_priority: 1,
            stall_timeout_ticks: None,
        }
    }
}

impl ColonyConfig {
    /// Parse a config from TOML text; missing keys fall back to defaults.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a config file. A missing file yields the defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        debug!(path = %path.display(), "loading colony config");
        if !path.exists() {
            debug!("config file not found, using defaults");
            return Ok(Self::default());
        }
        Self::from_toml_str(&fs::read_to_string(path)?)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Work progress a worker makes per tick at the given skill level.
    pub fn work_rate(&self, skill_level: u32) -> f32 {
        self.base_work_rate + self.skill_work_bonus * skill_level as f32
    }

    pub fn validate(&self) -> Result<()> {
        if self.claim_retry_limit == 0 {
            return Err(ColonyError::InvalidConfig(
                "claim_retry_limit must be at least 1".to_string(),
            ));
        }
        if self.slot_capacity == 0 {
            return Err(ColonyError::InvalidConfig(
                "slot_capacity must be at least 1".to_string(),
            ));
        }
        if self.haul_batch_size == 0 {
            return Err(ColonyError::InvalidConfig(
                "haul_batch_size must be at least 1".to_string(),
            ));
        }
        if !(self.base_work_rate > 0.0) || self.skill_work_bonus < 0.0 {
            return Err(ColonyError::InvalidConfig(format!(
                "work rates must be positive (base {}, bonus {})",
                self.base_work_rate, self.skill_work_bonus
            )));
        }
        if !(self.task_effort > 0.0) {
            return Err(ColonyError::InvalidConfig(format!(
                "task_effort must be positive, got {}",
                self.task_effort
            )));
        }
        if self.arrival_distance < 0.0 {
            return Err(ColonyError::InvalidConfig(format!(
                "arrival_distance must not be negative, got {}",
                self.arrival_distance
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ColonyConfig::default();
        assert_eq!(config.claim_retry_limit, 3);
        assert_eq!(config.slot_capacity, 10);
        assert!(config.stall_timeout_ticks.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = ColonyConfig::from_toml_str(
            "claim_retry_limit = 5\nstall_timeout_ticks = 600\n",
        )
        .unwrap();
        assert_eq!(config.claim_retry_limit, 5);
        assert_eq!(config.stall_timeout_ticks, Some(600));
        assert_eq!(config.haul_batch_size, 10);
    }

    #[test]
    fn test_toml_round_trip() {
        let config = ColonyConfig {
            haul_batch_size: 4,
            ..Default::default()
        };
        let text = config.to_toml_string().unwrap();
        assert_eq!(ColonyConfig::from_toml_str(&text).unwrap(), config);
    }

    #[test]
    fn test_rejects_zero_retry_limit() {
        let err = ColonyConfig::from_toml_str("claim_retry_limit = 0").unwrap_err();
        assert!(matches!(err, ColonyError::InvalidConfig(_)));
    }

    #[test]
    fn test_work_rate_scales_with_skill() {
        let config = ColonyConfig::default();
        assert!((config.work_rate(0) - 0.1).abs() < 1e-6);
        assert!((config.work_rate(5) - 0.2).abs() < 1e-6);
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let config = ColonyConfig::load("/nonexistent/colony.toml").unwrap();
        assert_eq!(config, ColonyConfig::default());
    }
}
