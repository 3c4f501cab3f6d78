//! Persistent store settings.

use memoria_core::retry::RetryConfig;
use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Which summary store backs the service.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// `SQLite` database file.
    #[default]
    Sqlite,
    /// Process-local map; nothing survives a restart.
    Memory,
}

/// Read-through cache in front of the store.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CacheSettings {
    /// Maximum cached records.
    pub max_entries: usize,
    /// Entry lifetime in seconds.
    pub ttl_secs: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            max_entries: 1_024,
            ttl_secs: 300,
        }
    }
}

/// Persistent store settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StoreSettings {
    /// Backend selection.
    pub backend: StoreBackend,
    /// Database path. Defaults to `~/.memoria/memoria.db` when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub db_path: Option<String>,
    /// Connection pool size.
    pub pool_size: u32,
    /// `SQLite` busy timeout in milliseconds.
    pub busy_timeout_ms: u64,
    /// Timeout for a single store call in milliseconds.
    pub call_timeout_ms: u64,
    /// Retry policy for transient store failures.
    pub retry: RetryConfig,
    /// Read-through cache.
    pub cache: CacheSettings,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            db_path: None,
            pool_size: 4,
            busy_timeout_ms: 5_000,
            call_timeout_ms: 2_000,
            retry: RetryConfig::default(),
            cache: CacheSettings::default(),
        }
    }
}

impl StoreSettings {
    pub(crate) fn validate(&self) -> Result<()> {
        if self.pool_size == 0 {
            return Err(SettingsError::invalid("store.poolSize", "must be positive"));
        }
        if self.call_timeout_ms == 0 {
            return Err(SettingsError::invalid("store.callTimeoutMs", "must be positive"));
        }
        if self.retry.max_attempts == 0 {
            return Err(SettingsError::invalid(
                "store.retry.maxAttempts",
                "must be at least 1",
            ));
        }
        if !(0.0..=1.0).contains(&self.retry.jitter_factor) {
            return Err(SettingsError::invalid(
                "store.retry.jitterFactor",
                "must be within [0, 1]",
            ));
        }
        Ok(())
    }
}
