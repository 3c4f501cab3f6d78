//! # memoria-actions
//!
//! Next-action prediction for a conversation.
//!
//! - [`Classifier`]: rule-based context buckets with tie diagnostics
//! - [`ActionGraph`]: prerequisite filtering, feedback-adjusted ranking,
//!   outcome history and strategy execution with ordered fallbacks
//! - [`OperationRegistry`]: resolves catalog step names to [`Operation`]s
//! - [`OperationExecutor`]: the seam through which operations actually run

#![deny(unsafe_code)]

pub mod bucket;
pub mod catalog;
pub mod errors;
pub mod executor;
pub mod graph;
pub mod history;
pub mod node;
pub mod operation;
pub mod snapshot;

pub use bucket::{BucketRule, Classification, Classifier, ContextBucket, GENERAL_BUCKET};
pub use catalog::{CatalogSpec, default_catalog, facts};
pub use errors::{ActionError, ClassificationAmbiguous, Result};
pub use executor::{FailureKind, OperationExecutor, OperationFailure};
pub use graph::{
    ActionGraph, ExecutionReport, Prediction, RankedAction, StrategyAttempt, execute_node,
};
pub use history::{ExecutionOutcome, MultiplierPolicy, OutcomeHistory};
pub use node::{ActionNode, ActionNodeSpec, ActionStrategy, StrategySpec};
pub use operation::{Operation, OperationRegistry};
pub use snapshot::{ContextSnapshot, Prerequisite};
