//! Error and diagnostic types for the context window.

use memoria_core::{ConversationId, SegmentId, TurnId};
use memoria_store::StoreError;
use serde::Serialize;
use thiserror::Error;

use crate::summarizer::SummarizerError;

/// Errors surfaced by the segment store and window manager.
#[derive(Debug, Error)]
pub enum ContextError {
    /// A single segment would exceed the absolute hard cap. The caller must
    /// split the input.
    #[error(
        "turn {turn_id} in conversation {conversation_id} needs {tokens} tokens, hard cap is {hard_cap}"
    )]
    CapacityExceeded {
        /// Owning conversation.
        conversation_id: ConversationId,
        /// Offending turn.
        turn_id: TurnId,
        /// Tokens the resulting segment would hold.
        tokens: u32,
        /// Configured hard cap.
        hard_cap: u32,
    },

    /// The segment is not in the active set (never existed or already
    /// evicted).
    #[error("segment {segment_id} is not active in conversation {conversation_id}")]
    SegmentNotFound {
        /// Owning conversation.
        conversation_id: ConversationId,
        /// Requested segment.
        segment_id: SegmentId,
    },

    /// No stored summary with this ID belongs to the conversation.
    #[error("summary {segment_id} not found for conversation {conversation_id}")]
    SummaryNotFound {
        /// Owning conversation.
        conversation_id: ConversationId,
        /// Requested summary (segment) ID.
        segment_id: SegmentId,
    },

    /// Persistent store failure after local retries.
    #[error("store error in conversation {conversation_id}: {source}")]
    Store {
        /// Owning conversation.
        conversation_id: ConversationId,
        /// Segment being persisted or fetched, if any.
        segment_id: Option<SegmentId>,
        /// Underlying store error.
        #[source]
        source: StoreError,
    },

    /// Summarization failed; the segment stays active.
    #[error("failed to summarize segment {segment_id}: {source}")]
    Summarizer {
        /// Segment being summarized.
        segment_id: SegmentId,
        /// Underlying failure.
        #[source]
        source: SummarizerError,
    },

    /// Invalid component configuration.
    #[error("invalid context configuration: {0}")]
    InvalidConfig(String),
}

impl ContextError {
    /// Whether the failure came from the persistent store being unreachable.
    #[must_use]
    pub fn is_store_unavailable(&self) -> bool {
        matches!(
            self,
            Self::Store {
                source: StoreError::Unavailable { .. } | StoreError::Timeout { .. },
                ..
            }
        )
    }
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, ContextError>;

// ─────────────────────────────────────────────────────────────────────────────
// Degraded mode
// ─────────────────────────────────────────────────────────────────────────────

/// Why an eviction pass left the window over budget.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DegradedReason {
    /// Persisting the chosen victim failed; it stays active.
    StoreFailure {
        /// Segment that could not be persisted.
        segment_id: SegmentId,
        /// Display form of the failure.
        error: String,
    },
    /// The eviction pass hit its watchdog.
    WatchdogTimeout {
        /// Watchdog duration.
        timeout_ms: u64,
    },
    /// Only protected segments remain.
    ProtectedOverflow,
}

/// Non-fatal diagnostic: the active window is over budget until the next
/// successful eviction pass.
#[derive(Clone, Debug, PartialEq, Serialize, Error)]
#[serde(rename_all = "camelCase")]
#[error(
    "conversation {conversation_id} degraded: {active_tokens}/{budget} tokens active ({reason:?})"
)]
pub struct DegradedMode {
    /// Owning conversation.
    pub conversation_id: ConversationId,
    /// Why eviction stopped.
    pub reason: DegradedReason,
    /// Active tokens after the pass.
    pub active_tokens: u64,
    /// Configured budget.
    pub budget: u32,
}
