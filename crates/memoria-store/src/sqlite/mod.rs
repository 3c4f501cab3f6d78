//! `SQLite` backend: connection pool, migrations, repositories, store.

pub mod connection;
pub mod migrations;
pub mod repositories;
pub mod store;

pub use connection::{ConnectionConfig, ConnectionPool};
pub use store::SqliteSummaryStore;
