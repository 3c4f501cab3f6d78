//! Action prediction settings.

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Settings for outcome-weighted action ranking.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ActionSettings {
    /// Number of ranked actions returned by a prediction.
    pub top_n: usize,
    /// Multiplier applied after a success.
    pub success_factor: f64,
    /// Multiplier applied after a failure.
    pub failure_factor: f64,
    /// Upper bound of the success multiplier.
    pub multiplier_cap: f64,
    /// Lower bound of the success multiplier.
    pub multiplier_floor: f64,
    /// Half-life of the decay back toward 1.0, in seconds.
    pub decay_half_life_secs: u64,
    /// Boost when an intent signal appears in the last message.
    pub intent_boost: f64,
    /// Outcomes retained in the feedback history.
    pub history_limit: usize,
    /// Seed a new conversation's statistics from persisted outcomes.
    pub seed_from_store: bool,
}

impl Default for ActionSettings {
    fn default() -> Self {
        Self {
            top_n: 3,
            success_factor: 1.2,
            failure_factor: 0.8,
            multiplier_cap: 3.0,
            multiplier_floor: 0.1,
            decay_half_life_secs: 86_400,
            intent_boost: 1.5,
            history_limit: 256,
            seed_from_store: false,
        }
    }
}

impl ActionSettings {
    pub(crate) fn validate(&self) -> Result<()> {
        if self.top_n == 0 {
            return Err(SettingsError::invalid("actions.topN", "must be positive"));
        }
        if self.success_factor < 1.0 {
            return Err(SettingsError::invalid(
                "actions.successFactor",
                "must be at least 1",
            ));
        }
        if !(0.0..=1.0).contains(&self.failure_factor) || self.failure_factor == 0.0 {
            return Err(SettingsError::invalid(
                "actions.failureFactor",
                "must be within (0, 1]",
            ));
        }
        if !(self.multiplier_floor > 0.0
            && self.multiplier_floor <= 1.0
            && self.multiplier_cap >= 1.0)
        {
            return Err(SettingsError::invalid(
                "actions.multiplierFloor",
                "requires 0 < floor <= 1 <= cap",
            ));
        }
        if self.decay_half_life_secs == 0 {
            return Err(SettingsError::invalid(
                "actions.decayHalfLifeSecs",
                "must be positive",
            ));
        }
        if self.intent_boost < 1.0 {
            return Err(SettingsError::invalid("actions.intentBoost", "must be at least 1"));
        }
        Ok(())
    }
}
