//! Action nodes and their strategy chains.

use serde::{Deserialize, Serialize};

use crate::bucket::ContextBucket;
use crate::errors::{ActionError, Result};
use crate::operation::{Operation, OperationRegistry};
use crate::snapshot::{ContextSnapshot, Prerequisite};

/// A named, ordered list of operations.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ActionStrategy {
    /// Strategy name.
    pub name: String,
    /// Steps, run in order.
    pub operations: Vec<Operation>,
}

impl ActionStrategy {
    /// Build directly from resolved operations.
    #[must_use]
    pub fn new(name: impl Into<String>, operations: Vec<Operation>) -> Self {
        Self {
            name: name.into(),
            operations,
        }
    }

    /// Whether every operation in `required` is a step of this strategy.
    #[must_use]
    pub fn covers(&self, required: &[Operation]) -> bool {
        required.iter().all(|op| self.operations.contains(op))
    }

    /// Strategy used when no declared fallback fits a failure.
    #[must_use]
    pub fn generic_recovery() -> Self {
        Self::new(
            "generic_recovery",
            vec![
                Operation::AnalyzeError,
                Operation::AskClarification,
                Operation::NotifyUser,
            ],
        )
    }
}

/// A candidate next action.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionNode {
    /// Unique action name.
    pub name: String,
    /// Bucket the node is registered under.
    pub bucket: ContextBucket,
    /// Conditions that must all hold.
    pub prerequisites: Vec<Prerequisite>,
    /// Primary strategy first, then fallbacks in order. Never empty.
    strategies: Vec<ActionStrategy>,
    /// Prior probability in `(0, 1]`.
    pub base_probability: f64,
    /// Lowercase phrases that signal user intent.
    pub intent_signals: Vec<String>,
}

impl ActionNode {
    /// All strategies: primary first, then fallbacks.
    #[must_use]
    pub fn strategies(&self) -> &[ActionStrategy] {
        &self.strategies
    }

    /// The primary strategy.
    #[must_use]
    pub fn primary(&self) -> &ActionStrategy {
        &self.strategies[0]
    }

    /// Fallback strategies in declared order.
    #[must_use]
    pub fn fallbacks(&self) -> &[ActionStrategy] {
        &self.strategies[1..]
    }

    /// Whether every prerequisite holds (missing facts fail).
    #[must_use]
    pub fn prerequisites_met(&self, snapshot: &ContextSnapshot) -> bool {
        self.prerequisites.iter().all(|p| p.is_satisfied(snapshot))
    }

    /// Whether the snapshot's last message carries an intent signal.
    #[must_use]
    pub fn intent_matches(&self, snapshot: &ContextSnapshot) -> bool {
        let message = snapshot.last_message.to_lowercase();
        self.intent_signals
            .iter()
            .any(|s| !s.is_empty() && message.contains(&s.to_lowercase()))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Declarative specs
// ─────────────────────────────────────────────────────────────────────────────

/// Strategy as written in a catalog: step names, resolved later.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrategySpec {
    /// Strategy name.
    pub name: String,
    /// Step names.
    pub steps: Vec<String>,
}

impl StrategySpec {
    /// Build from step names.
    #[must_use]
    pub fn new(name: &str, steps: &[&str]) -> Self {
        Self {
            name: name.to_owned(),
            steps: steps.iter().map(|s| (*s).to_owned()).collect(),
        }
    }
}

/// Node as written in a catalog.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionNodeSpec {
    /// Unique action name.
    pub name: String,
    /// Bucket.
    pub bucket: ContextBucket,
    /// Conditions.
    #[serde(default)]
    pub prerequisites: Vec<Prerequisite>,
    /// Primary strategy.
    pub primary: StrategySpec,
    /// Fallbacks in order.
    #[serde(default)]
    pub fallbacks: Vec<StrategySpec>,
    /// Prior probability.
    pub base_probability: f64,
    /// Intent phrases.
    #[serde(default)]
    pub intent_signals: Vec<String>,
}

impl ActionNodeSpec {
    /// Resolve step names and validate.
    pub fn build(&self, registry: &OperationRegistry) -> Result<ActionNode> {
        if !(self.base_probability > 0.0 && self.base_probability <= 1.0) {
            return Err(ActionError::InvalidCatalog(format!(
                "action '{}' has base probability {} outside (0, 1]",
                self.name, self.base_probability
            )));
        }
        let strategies = std::iter::once(&self.primary)
            .chain(&self.fallbacks)
            .map(|spec| {
                let operations = registry.resolve(&spec.name, &spec.steps)?;
                if operations.is_empty() {
                    return Err(ActionError::InvalidCatalog(format!(
                        "strategy '{}' of action '{}' has no steps",
                        spec.name, self.name
                    )));
                }
                Ok(ActionStrategy::new(spec.name.clone(), operations))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(ActionNode {
            name: self.name.clone(),
            bucket: self.bucket.clone(),
            prerequisites: self.prerequisites.clone(),
            strategies,
            base_probability: self.base_probability,
            intent_signals: self
                .intent_signals
                .iter()
                .map(|s| s.to_lowercase())
                .collect(),
        })
    }
}
