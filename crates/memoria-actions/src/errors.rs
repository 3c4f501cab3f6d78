//! Action-graph errors and diagnostics.

use serde::Serialize;
use thiserror::Error;

use crate::bucket::ContextBucket;
use crate::executor::FailureKind;

/// Errors from building or running the action graph.
#[derive(Debug, Error)]
pub enum ActionError {
    /// A strategy step names an operation the registry does not know.
    #[error("unknown operation '{name}' in strategy '{strategy}'")]
    UnknownOperation {
        /// Offending step name.
        name: String,
        /// Strategy declaring it.
        strategy: String,
    },

    /// No node with this name is registered.
    #[error("unknown action '{action}'")]
    UnknownAction {
        /// Requested action.
        action: String,
    },

    /// Every strategy of the action failed.
    #[error("action '{action}' exhausted {attempts} strateg(ies); last failure: {last_failure}")]
    ActionExhausted {
        /// Action that was executed.
        action: String,
        /// Strategies tried.
        attempts: usize,
        /// Kind of the last failure.
        last_kind: FailureKind,
        /// Message of the last failure.
        last_failure: String,
    },

    /// The catalog is malformed (duplicate names, empty strategy list...).
    #[error("invalid action catalog: {0}")]
    InvalidCatalog(String),
}

impl ActionError {
    /// Short category label for logs.
    #[must_use]
    pub fn category(&self) -> &'static str {
        match self {
            Self::UnknownOperation { .. } => "unknown_operation",
            Self::UnknownAction { .. } => "unknown_action",
            Self::ActionExhausted { .. } => "action_exhausted",
            Self::InvalidCatalog(_) => "invalid_catalog",
        }
    }
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, ActionError>;

/// Diagnostic attached to a prediction when several buckets tie for the
/// best classification score. The generic bucket is used instead.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Error)]
#[serde(rename_all = "camelCase")]
#[error("classification ambiguous between {candidates:?} (score {score})")]
pub struct ClassificationAmbiguous {
    /// Tied buckets, sorted.
    pub candidates: Vec<ContextBucket>,
    /// The tied score.
    pub score: usize,
}
