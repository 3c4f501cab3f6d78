//! # memoria-settings
//!
//! Layered configuration for Memoria.
//!
//! Settings are resolved from three layers, lowest priority first:
//! 1. **Compiled defaults**: [`MemoriaSettings::default()`]
//! 2. **User file**: `~/.memoria/settings.json`, deep-merged over defaults
//! 3. **Environment**: `MEMORIA_*` overrides
//!
//! There is no global settings cell. Load once at startup and hand the
//! sections to the components that need them.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{
    apply_env_overrides, deep_merge, default_db_path, load_settings, load_settings_from_path,
    settings_path,
};
pub use types::*;
