//! Operation execution seam.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::operation::Operation;
use crate::snapshot::ContextSnapshot;

/// Coarse failure classification used to pick a fallback.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Referenced memory does not exist.
    NotFound,
    /// The summary store could not be reached.
    StoreUnavailable,
    /// A call ran out of time.
    Timeout,
    /// The request could not be interpreted.
    Ambiguous,
    /// Anything else.
    Other,
}

impl FailureKind {
    /// Operations a fallback must contain to address this failure.
    #[must_use]
    pub fn required_operations(self) -> &'static [Operation] {
        match self {
            Self::NotFound => &[Operation::SearchMemory],
            Self::StoreUnavailable => &[Operation::UseCachedContext],
            Self::Timeout => &[Operation::CompactContext],
            Self::Ambiguous => &[Operation::AskClarification],
            Self::Other => &[],
        }
    }
}

/// A failed operation.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("{operation} failed ({kind:?}): {message}")]
pub struct OperationFailure {
    /// Operation that failed.
    pub operation: Operation,
    /// Classification.
    pub kind: FailureKind,
    /// Description.
    pub message: String,
}

/// Runs one operation on behalf of a strategy.
#[async_trait]
pub trait OperationExecutor: Send + Sync {
    /// Execute `operation`. Any error fails the enclosing strategy.
    async fn execute(
        &self,
        operation: Operation,
        snapshot: &ContextSnapshot,
    ) -> Result<(), OperationFailure>;
}
