//! Closed set of operations a strategy can run, and the registry that
//! resolves step names to them.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::{ActionError, Result};

/// One executable step.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    /// Produce a reply from the assembled context.
    GenerateReply,
    /// Pull relevant stored summaries into the context.
    RecallMemory,
    /// Run a topic search over stored summaries.
    SearchMemory,
    /// Bring one stored summary back into the active window.
    RehydrateSegment,
    /// Force an eviction pass.
    CompactContext,
    /// Answer from cached summaries when the store is unreachable.
    UseCachedContext,
    /// Ask the user to clarify.
    AskClarification,
    /// Ask the user to confirm before acting.
    ConfirmWithUser,
    /// Inspect the last failure.
    AnalyzeError,
    /// Tell the user what went wrong.
    NotifyUser,
}

impl Operation {
    /// Every operation, in declaration order.
    pub const ALL: [Self; 10] = [
        Self::GenerateReply,
        Self::RecallMemory,
        Self::SearchMemory,
        Self::RehydrateSegment,
        Self::CompactContext,
        Self::UseCachedContext,
        Self::AskClarification,
        Self::ConfirmWithUser,
        Self::AnalyzeError,
        Self::NotifyUser,
    ];

    /// Registry name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::GenerateReply => "generate_reply",
            Self::RecallMemory => "recall_memory",
            Self::SearchMemory => "search_memory",
            Self::RehydrateSegment => "rehydrate_segment",
            Self::CompactContext => "compact_context",
            Self::UseCachedContext => "use_cached_context",
            Self::AskClarification => "ask_clarification",
            Self::ConfirmWithUser => "confirm_with_user",
            Self::AnalyzeError => "analyze_error",
            Self::NotifyUser => "notify_user",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Name → [`Operation`] lookup built once at startup.
#[derive(Clone, Debug)]
pub struct OperationRegistry {
    operations: BTreeMap<String, Operation>,
}

impl OperationRegistry {
    /// Empty registry.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            operations: BTreeMap::new(),
        }
    }

    /// Registry containing every [`Operation`] under its canonical name.
    #[must_use]
    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        for op in Operation::ALL {
            registry.register(op.as_str(), op);
        }
        registry
    }

    /// Register `operation` under `name` (aliases allowed). Overwrites.
    pub fn register(&mut self, name: &str, operation: Operation) {
        debug!(name, operation = %operation, "operation registered");
        let _ = self.operations.insert(name.to_owned(), operation);
    }

    /// Resolve one step name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Operation> {
        self.operations.get(name).copied()
    }

    /// Resolve every step of `strategy`.
    pub fn resolve(&self, strategy: &str, steps: &[String]) -> Result<Vec<Operation>> {
        steps
            .iter()
            .map(|step| {
                self.get(step).ok_or_else(|| ActionError::UnknownOperation {
                    name: step.clone(),
                    strategy: strategy.to_owned(),
                })
            })
            .collect()
    }

    /// Registered names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.operations.keys().map(String::as_str).collect()
    }

    /// Number of registered names.
    #[must_use]
    pub fn len(&self) -> usize {
        self.operations.len()
    }

    /// Whether nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}

impl Default for OperationRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn builtin_covers_every_operation() {
        let registry = OperationRegistry::builtin();
        assert_eq!(registry.len(), Operation::ALL.len());
        for op in Operation::ALL {
            assert_eq!(registry.get(op.as_str()), Some(op));
        }
    }

    #[test]
    fn serde_name_matches_registry_name() {
        for op in Operation::ALL {
            let json = serde_json::to_value(op).unwrap();
            assert_eq!(json, op.as_str());
        }
    }

    #[test]
    fn resolve_rejects_unknown_steps() {
        let registry = OperationRegistry::builtin();
        let steps = vec!["recall_memory".to_owned(), "format_disk".to_owned()];
        assert_matches!(
            registry.resolve("bad", &steps),
            Err(ActionError::UnknownOperation { ref name, ref strategy }) if name == "format_disk" && strategy == "bad"
        );
    }

    #[test]
    fn aliases_resolve() {
        let mut registry = OperationRegistry::empty();
        assert!(registry.is_empty());
        registry.register("recall", Operation::RecallMemory);
        let ops = registry.resolve("s", &["recall".to_owned()]).unwrap();
        assert_eq!(ops, vec![Operation::RecallMemory]);
        assert_eq!(registry.names(), vec!["recall"]);
    }
}
