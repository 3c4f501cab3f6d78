//! Settings type definitions.
//!
//! Every section is camelCase on the wire and `#[serde(default)]`, so a
//! settings file only needs the keys it changes.

mod actions;
mod context;
mod store;

pub use actions::*;
pub use context::*;
pub use store::*;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings type.
///
/// ```json
/// {
///   "context": { "tokenBudget": 4000, "protectedWindow": 3 },
///   "store": { "backend": "memory" }
/// }
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MemoriaSettings {
    /// Settings schema version.
    pub version: String,
    /// Logging output.
    pub logging: LoggingSettings,
    /// Active-window budget and eviction.
    pub context: ContextSettings,
    /// Importance scoring.
    pub scoring: ScoringSettings,
    /// Topic extraction.
    pub topics: TopicSettings,
    /// Extractive summarization.
    pub summary: SummarySettings,
    /// Persistent summary store.
    pub store: StoreSettings,
    /// Action prediction.
    pub actions: ActionSettings,
    /// Generation service calls.
    pub generation: GenerationSettings,
}

impl Default for MemoriaSettings {
    fn default() -> Self {
        Self {
            version: "0.1.0".to_string(),
            logging: LoggingSettings::default(),
            context: ContextSettings::default(),
            scoring: ScoringSettings::default(),
            topics: TopicSettings::default(),
            summary: SummarySettings::default(),
            store: StoreSettings::default(),
            actions: ActionSettings::default(),
            generation: GenerationSettings::default(),
        }
    }
}

impl MemoriaSettings {
    /// Check cross-field constraints. Called by the loader after every
    /// layer has been applied.
    pub fn validate(&self) -> Result<()> {
        self.context.validate()?;
        self.scoring.validate()?;
        self.topics.validate()?;
        self.store.validate()?;
        self.actions.validate()?;
        self.generation.validate()?;
        Ok(())
    }
}

/// Logging output settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default filter directive when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON lines instead of compact text.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
            json: false,
        }
    }
}

/// Generation service call settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GenerationSettings {
    /// Timeout for one generation call in milliseconds.
    pub timeout_ms: u64,
    /// Retries after the first failure (0 or 1).
    pub max_retries: u32,
    /// Token allowance for assembled context.
    pub context_tokens: u32,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            max_retries: 1,
            context_tokens: 4_000,
        }
    }
}

impl GenerationSettings {
    fn validate(&self) -> Result<()> {
        if self.max_retries > 1 {
            return Err(SettingsError::invalid(
                "generation.maxRetries",
                "at most one retry is allowed",
            ));
        }
        if self.timeout_ms == 0 {
            return Err(SettingsError::invalid("generation.timeoutMs", "must be positive"));
        }
        Ok(())
    }
}
