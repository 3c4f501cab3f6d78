//! The context snapshot predictions are made against.

use std::collections::BTreeMap;

use memoria_core::Topics;
use serde::{Deserialize, Serialize};

/// Boolean facts, the latest user message and the current topics.
///
/// Facts that are absent count as false.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ContextSnapshot {
    /// Named boolean conditions (`store_available`, `has_evicted`...).
    pub facts: BTreeMap<String, bool>,
    /// Latest user message.
    pub last_message: String,
    /// Topics of the active window.
    pub topics: Topics,
}

impl ContextSnapshot {
    /// Empty snapshot.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a fact.
    #[must_use]
    pub fn with_fact(mut self, name: impl Into<String>, value: bool) -> Self {
        let _ = self.facts.insert(name.into(), value);
        self
    }

    /// Set the latest user message.
    #[must_use]
    pub fn with_last_message(mut self, message: impl Into<String>) -> Self {
        self.last_message = message.into();
        self
    }

    /// Set the topics.
    #[must_use]
    pub fn with_topics(mut self, topics: Topics) -> Self {
        self.topics = topics;
        self
    }

    /// Value of `name`, false when missing.
    #[must_use]
    pub fn fact(&self, name: &str) -> bool {
        self.facts.get(name).copied().unwrap_or(false)
    }

    /// Whether the lowercased last message contains `needle` (already
    /// lowercase) or the topics contain it as a term.
    #[must_use]
    pub fn mentions(&self, needle: &str) -> bool {
        self.last_message.to_lowercase().contains(needle) || self.topics.contains(needle)
    }
}

/// A required boolean condition.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Prerequisite {
    /// Fact name.
    pub fact: String,
    /// Required value.
    #[serde(default = "default_expected")]
    pub expected: bool,
}

fn default_expected() -> bool {
    true
}

impl Prerequisite {
    /// Requires `fact` to be true.
    #[must_use]
    pub fn holds(fact: impl Into<String>) -> Self {
        Self {
            fact: fact.into(),
            expected: true,
        }
    }

    /// Requires `fact` to be present and false.
    #[must_use]
    pub fn fails(fact: impl Into<String>) -> Self {
        Self {
            fact: fact.into(),
            expected: false,
        }
    }

    /// Satisfied only when the fact is present with the expected value.
    #[must_use]
    pub fn is_satisfied(&self, snapshot: &ContextSnapshot) -> bool {
        snapshot.facts.get(&self.fact) == Some(&self.expected)
    }
}
