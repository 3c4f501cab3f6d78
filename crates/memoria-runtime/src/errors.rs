//! Runtime error types.

use memoria_actions::ActionError;
use memoria_context::ContextError;
use memoria_core::ConversationId;
use memoria_store::StoreError;

use crate::generation::GenerationError;

/// Errors surfaced by [`MemoryService`](crate::MemoryService).
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// No open conversation with this ID.
    #[error("conversation not found: {0}")]
    ConversationNotFound(ConversationId),

    /// The conversation was torn down while the request was in flight.
    #[error("conversation {0} was cancelled")]
    Cancelled(ConversationId),

    /// The generation service failed after its retry.
    #[error("generation failed for conversation {conversation_id} after {attempts} attempt(s): {source}")]
    Generation {
        /// Owning conversation.
        conversation_id: ConversationId,
        /// Calls made.
        attempts: u32,
        /// Last failure.
        #[source]
        source: GenerationError,
    },

    /// Window, segment store or summarizer error.
    #[error(transparent)]
    Context(#[from] ContextError),

    /// Action graph error.
    #[error(transparent)]
    Action(#[from] ActionError),

    /// Direct store error (search, retention, feedback log).
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl RuntimeError {
    /// Whether the caller may retry the same request.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Generation { source, .. } => source.is_retryable(),
            Self::Context(e) => e.is_store_unavailable(),
            Self::Store(e) => e.is_retryable() || matches!(e, StoreError::Unavailable { .. }),
            Self::ConversationNotFound(_) | Self::Cancelled(_) | Self::Action(_) => false,
        }
    }

    /// Error category string for logs.
    pub fn category(&self) -> &str {
        match self {
            Self::ConversationNotFound(_) => "conversation_not_found",
            Self::Cancelled(_) => "cancelled",
            Self::Generation { .. } => "generation",
            Self::Context(ContextError::CapacityExceeded { .. }) => "capacity_exceeded",
            Self::Context(e) if e.is_store_unavailable() => "store_unavailable",
            Self::Context(_) => "context",
            Self::Action(e) => e.category(),
            Self::Store(e) => e.category(),
        }
    }
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, RuntimeError>;

#[cfg(test)]
mod tests {
    use super::*;
    use memoria_core::TurnId;

    #[test]
    fn capacity_exceeded_has_its_own_category() {
        let err = RuntimeError::from(ContextError::CapacityExceeded {
            conversation_id: ConversationId::from("c1"),
            turn_id: TurnId::from("t1"),
            tokens: 9000,
            hard_cap: 8000,
        });
        assert_eq!(err.category(), "capacity_exceeded");
        assert!(!err.is_retryable());
    }

    #[test]
    fn store_exhaustion_is_retryable() {
        let err = RuntimeError::from(ContextError::Store {
            conversation_id: ConversationId::from("c1"),
            segment_id: None,
            source: StoreError::Unavailable {
                operation: "put",
                attempts: 3,
                last_error: "locked".into(),
            },
        });
        assert_eq!(err.category(), "store_unavailable");
        assert!(err.is_retryable());
    }

    #[test]
    fn not_found_display() {
        let err = RuntimeError::ConversationNotFound(ConversationId::from("c9"));
        assert_eq!(err.to_string(), "conversation not found: c9");
        assert_eq!(err.category(), "conversation_not_found");
    }

    #[test]
    fn generation_timeout_is_retryable() {
        let err = RuntimeError::Generation {
            conversation_id: ConversationId::from("c1"),
            attempts: 2,
            source: GenerationError::Timeout { timeout_ms: 10 },
        };
        assert!(err.is_retryable());
        assert_eq!(err.category(), "generation");
    }
}
