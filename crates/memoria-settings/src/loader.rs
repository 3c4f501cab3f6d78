//! Settings loading with deep merge and environment overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`MemoriaSettings::default()`]
//! 2. If the settings file exists, deep-merge its values over the defaults
//! 3. Apply `MEMORIA_*` environment overrides
//! 4. Validate the result
//!
//! Deep merge rules:
//! - Objects merge recursively (source wins per key)
//! - Arrays and primitives are replaced wholesale
//! - `null` in the source is skipped

use std::path::{Path, PathBuf};

use memoria_core::constants::HOME_DIR_NAME;
use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::Result;
use crate::types::{MemoriaSettings, StoreBackend};

/// Resolve `~/.memoria/<file>`.
pub fn home_path(file: &str) -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(HOME_DIR_NAME).join(file)
}

/// Default settings file (`~/.memoria/settings.json`).
pub fn settings_path() -> PathBuf {
    home_path("settings.json")
}

/// Default summary database (`~/.memoria/memoria.db`).
pub fn default_db_path() -> PathBuf {
    home_path("memoria.db")
}

/// Load settings from the default path with environment overrides.
pub fn load_settings() -> Result<MemoriaSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from `path` with environment overrides.
///
/// A missing file yields defaults; malformed JSON or a constraint violation
/// is an error.
pub fn load_settings_from_path(path: &Path) -> Result<MemoriaSettings> {
    let mut settings = load_file_layer(path)?;
    apply_env_overrides(&mut settings);
    settings.validate()?;
    Ok(settings)
}

fn load_file_layer(path: &Path) -> Result<MemoriaSettings> {
    let defaults = serde_json::to_value(MemoriaSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    Ok(serde_json::from_value(merged)?)
}

/// Recursive deep merge of two JSON values.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = match target_map.remove(&key) {
                    Some(target_val) => deep_merge(target_val, source_val),
                    None => source_val,
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply overrides from the process environment.
pub fn apply_env_overrides(settings: &mut MemoriaSettings) {
    apply_overrides_from(settings, |name| std::env::var(name).ok());
}

/// Apply overrides read through `lookup`.
///
/// Values that fail to parse or fall outside their range are logged and
/// ignored, leaving the file/default value in place.
pub fn apply_overrides_from<F>(settings: &mut MemoriaSettings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let env = EnvReader { lookup };

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = env.string("MEMORIA_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = env.boolean("MEMORIA_LOG_JSON") {
        settings.logging.json = v;
    }

    // ── Context window ──────────────────────────────────────────────
    if let Some(v) = env.u64_in("MEMORIA_TOKEN_BUDGET", 1, u64::from(u32::MAX)) {
        settings.context.token_budget = clamp_u32(v);
    }
    if let Some(v) = env.u64_in("MEMORIA_SEGMENT_TOKEN_CAP", 1, u64::from(u32::MAX)) {
        settings.context.segment_token_cap = clamp_u32(v);
    }
    if let Some(v) = env.u64_in("MEMORIA_HARD_TOKEN_CAP", 1, u64::from(u32::MAX)) {
        settings.context.hard_token_cap = clamp_u32(v);
    }
    if let Some(v) = env.usize_in("MEMORIA_PROTECTED_WINDOW", 0, 10_000) {
        settings.context.protected_window = v;
    }
    if let Some(v) = env.u64_in("MEMORIA_EVICTION_WATCHDOG_MS", 1, 600_000) {
        settings.context.eviction_watchdog_ms = v;
    }
    if let Some(v) = env.usize_in("MEMORIA_SEARCH_SCAN_LIMIT", 1, 10_000_000) {
        settings.context.search_scan_limit = v;
    }

    // ── Topics ──────────────────────────────────────────────────────
    if let Some(v) = env.usize_in("MEMORIA_TOPIC_CORPUS_SIZE", 1, 1_000_000) {
        settings.topics.corpus_size = v;
    }

    // ── Store ───────────────────────────────────────────────────────
    if let Some(v) = env.string("MEMORIA_STORE_BACKEND") {
        match serde_json::from_value::<StoreBackend>(Value::String(v.clone())) {
            Ok(backend) => settings.store.backend = backend,
            Err(_) => warn!(key = "MEMORIA_STORE_BACKEND", value = %v, "unknown store backend, ignoring"),
        }
    }
    if let Some(v) = env.string("MEMORIA_DB_PATH") {
        settings.store.db_path = Some(v);
    }
    if let Some(v) = env.u64_in("MEMORIA_STORE_TIMEOUT_MS", 1, 600_000) {
        settings.store.call_timeout_ms = v;
    }

    // ── Actions ─────────────────────────────────────────────────────
    if let Some(v) = env.usize_in("MEMORIA_ACTIONS_TOP_N", 1, 100) {
        settings.actions.top_n = v;
    }
}

fn clamp_u32(v: u64) -> u32 {
    u32::try_from(v).unwrap_or(u32::MAX)
}

// ── Pure parsing functions ─────────────────────────────────────────────────

/// Parse a string as a boolean.
///
/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a string as a `u64` within an inclusive range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.trim().parse().ok()?;
    (min..=max).contains(&n).then_some(n)
}

/// Parse a string as a `usize` within an inclusive range.
pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.trim().parse().ok()?;
    (min..=max).contains(&n).then_some(n)
}

// ── Lookup wrapper ─────────────────────────────────────────────────────────

struct EnvReader<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> EnvReader<F> {
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.is_empty())
    }

    fn boolean(&self, name: &str) -> Option<bool> {
        let val = self.string(name)?;
        let result = parse_bool(&val);
        if result.is_none() {
            warn!(key = name, value = %val, "invalid boolean env var, ignoring");
        }
        result
    }

    fn u64_in(&self, name: &str, min: u64, max: u64) -> Option<u64> {
        let val = self.string(name)?;
        let result = parse_u64_range(&val, min, max);
        if result.is_none() {
            warn!(key = name, value = %val, "invalid u64 env var, ignoring");
        }
        result
    }

    fn usize_in(&self, name: &str, min: usize, max: usize) -> Option<usize> {
        let val = self.string(name)?;
        let result = parse_usize_range(&val, min, max);
        if result.is_none() {
            warn!(key = name, value = %val, "invalid usize env var, ignoring");
        }
        result
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
