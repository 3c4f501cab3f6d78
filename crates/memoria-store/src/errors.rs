//! Error types for the summary store.

use memoria_core::SegmentId;
use rusqlite::ErrorCode;
use thiserror::Error;

/// Errors returned by [`SummaryStore`](crate::SummaryStore) implementations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// `SQLite` database error.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Connection pool error.
    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    /// JSON serialization/deserialization error.
    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),

    /// Schema migration failed.
    #[error("migration error: {message}")]
    Migration {
        /// Which migration failed and why.
        message: String,
    },

    /// No summary exists for the segment.
    #[error("summary not found: {segment_id}")]
    NotFound {
        /// Requested segment ID.
        segment_id: SegmentId,
    },

    /// Backend temporarily unreachable. Retrying may succeed.
    #[error("store temporarily unavailable: {0}")]
    Transient(String),

    /// A single call exceeded its deadline.
    #[error("store {operation} timed out after {timeout_ms}ms")]
    Timeout {
        /// Operation name.
        operation: &'static str,
        /// Deadline that was exceeded.
        timeout_ms: u64,
    },

    /// Persistence failed after every retry.
    #[error("store unavailable after {attempts} attempt(s) during {operation}: {last_error}")]
    Unavailable {
        /// Operation name.
        operation: &'static str,
        /// Attempts made.
        attempts: u32,
        /// Display form of the last failure.
        last_error: String,
    },

    /// The owning conversation was torn down mid-call.
    #[error("store {operation} cancelled")]
    Cancelled {
        /// Operation name.
        operation: &'static str,
    },

    /// Internal failure (e.g. a blocking task panicked).
    #[error("internal error: {0}")]
    Internal(String),
}

impl StoreError {
    /// Whether a retry of the same call might succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transient(_) | Self::Timeout { .. } | Self::Pool(_) => true,
            Self::Sqlite(e) => matches!(
                e.sqlite_error_code(),
                Some(ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked)
            ),
            Self::Serde(_)
            | Self::Migration { .. }
            | Self::NotFound { .. }
            | Self::Unavailable { .. }
            | Self::Cancelled { .. }
            | Self::Internal(_) => false,
        }
    }

    /// Short machine-readable category for logs.
    #[must_use]
    pub fn category(&self) -> &'static str {
        match self {
            Self::Sqlite(_) | Self::Pool(_) | Self::Migration { .. } => "database",
            Self::Serde(_) => "serialization",
            Self::NotFound { .. } => "not_found",
            Self::Transient(_) | Self::Timeout { .. } | Self::Unavailable { .. } => "unavailable",
            Self::Cancelled { .. } => "cancelled",
            Self::Internal(_) => "internal",
        }
    }
}

/// Convenience alias for store results.
pub type Result<T> = std::result::Result<T, StoreError>;

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
