//! # memoria-store
//!
//! Durable storage for summaries of evicted segments.
//!
//! - [`SummaryStore`]: async contract (`put`, `get`, `scan`, plus retention
//!   and feedback helpers)
//! - [`SqliteSummaryStore`]: r2d2-pooled `SQLite` with embedded migrations
//! - [`InMemorySummaryStore`]: process-local store with fault injection
//! - [`open_store`]: build the backend selected in settings

#![deny(unsafe_code)]

pub mod errors;
pub mod memory;
pub mod sqlite;
pub mod store;
pub mod types;

use std::path::PathBuf;
use std::sync::Arc;

use memoria_settings::{StoreBackend, StoreSettings};

pub use errors::{Result, StoreError};
pub use memory::InMemorySummaryStore;
pub use sqlite::{ConnectionConfig, SqliteSummaryStore};
pub use store::SummaryStore;
pub use types::{OutcomeRecord, RelatedTopic};

/// Open the backend selected by `settings`.
///
/// `default_path` is used when `settings.db_path` is unset. A `db_path` of
/// `":memory:"` opens a private in-memory `SQLite` database.
pub fn open_store(settings: &StoreSettings, default_path: PathBuf) -> Result<Arc<dyn SummaryStore>> {
    match settings.backend {
        StoreBackend::Memory => Ok(Arc::new(InMemorySummaryStore::new())),
        StoreBackend::Sqlite => {
            let store = match settings.db_path.as_deref() {
                Some(":memory:") => SqliteSummaryStore::open_in_memory()?,
                Some(path) => SqliteSummaryStore::open(path.as_ref(), &ConnectionConfig::from(settings))?,
                None => SqliteSummaryStore::open(&default_path, &ConnectionConfig::from(settings))?,
            };
            Ok(Arc::new(store))
        }
    }
}
