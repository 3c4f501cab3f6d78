//! Declarative action catalogs and the built-in one.

use serde::{Deserialize, Serialize};

use crate::bucket::BucketRule;
use crate::node::{ActionNodeSpec, StrategySpec};
use crate::snapshot::Prerequisite;
use facts::{HAS_EVICTED, OVER_BUDGET, STORE_DEGRADED};

/// Facts the built-in catalog reads from a [`ContextSnapshot`](crate::ContextSnapshot).
pub mod facts {
    /// Some segment of the conversation has been evicted to the store.
    pub const HAS_EVICTED: &str = "has_evicted";
    /// The active window is over budget or could not be brought under it.
    pub const OVER_BUDGET: &str = "over_budget";
    /// The last eviction pass failed on the store or the watchdog.
    pub const STORE_DEGRADED: &str = "store_degraded";
    /// A rehydrated summary is currently active.
    pub const HAS_REHYDRATED: &str = "has_rehydrated";
}

/// Rules and nodes, before operation names are resolved.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CatalogSpec {
    /// Classification rules.
    pub rules: Vec<BucketRule>,
    /// Action nodes.
    pub nodes: Vec<ActionNodeSpec>,
}

impl CatalogSpec {
    /// Parse a catalog from JSON.
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}

fn words(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| (*s).to_owned()).collect()
}

fn rule(bucket: &str, facts: &[&str], keywords: &[&str]) -> BucketRule {
    BucketRule {
        bucket: bucket.into(),
        required_facts: words(facts),
        keywords: words(keywords),
    }
}

struct NodeBuilder(ActionNodeSpec);

impl NodeBuilder {
    fn new(name: &str, bucket: &str, base: f64, primary: StrategySpec) -> Self {
        Self(ActionNodeSpec {
            name: name.to_owned(),
            bucket: bucket.into(),
            prerequisites: Vec::new(),
            primary,
            fallbacks: Vec::new(),
            base_probability: base,
            intent_signals: Vec::new(),
        })
    }

    fn requires(mut self, fact: &str) -> Self {
        self.0.prerequisites.push(Prerequisite::holds(fact));
        self
    }

    fn fallback(mut self, strategy: StrategySpec) -> Self {
        self.0.fallbacks.push(strategy);
        self
    }

    fn intents(mut self, signals: &[&str]) -> Self {
        self.0.intent_signals = words(signals);
        self
    }
}

/// The built-in catalog: `general`, `recall`, `context_pressure` and
/// `store_degraded` buckets.
#[must_use]
pub fn default_catalog() -> CatalogSpec {
    let rules = vec![
        rule(
            "recall",
            &[HAS_EVICTED],
            &["remember", "earlier", "before", "previously", "recall", "last time"],
        ),
        rule("context_pressure", &[OVER_BUDGET], &["summarize", "summary", "shorter"]),
        rule("store_degraded", &[STORE_DEGRADED], &[]),
    ];

    let nodes = vec![
        // general
        NodeBuilder::new(
            "generate_reply",
            "general",
            0.7,
            StrategySpec::new("direct_reply", &["generate_reply"]),
        )
        .fallback(StrategySpec::new("clarify", &["ask_clarification"]))
        .intents(&["explain", "tell me", "how do", "what is"])
        .0,
        NodeBuilder::new(
            "ask_clarification",
            "general",
            0.3,
            StrategySpec::new("clarify", &["ask_clarification"]),
        )
        .intents(&["not sure", "confused", "what do you mean"])
        .0,
        // recall
        NodeBuilder::new(
            "recall_memory",
            "recall",
            0.6,
            StrategySpec::new("recall_then_reply", &["recall_memory", "generate_reply"]),
        )
        .requires(HAS_EVICTED)
        .fallback(StrategySpec::new(
            "search_then_rehydrate",
            &["search_memory", "rehydrate_segment", "generate_reply"],
        ))
        .fallback(StrategySpec::new(
            "cached_reply",
            &["use_cached_context", "generate_reply"],
        ))
        .intents(&["remember", "recall", "earlier"])
        .0,
        NodeBuilder::new(
            "search_memory",
            "recall",
            0.5,
            StrategySpec::new("search_then_reply", &["search_memory", "generate_reply"]),
        )
        .requires(HAS_EVICTED)
        .fallback(StrategySpec::new("clarify", &["ask_clarification"]))
        .intents(&["find", "search", "look up"])
        .0,
        NodeBuilder::new(
            "confirm_recall",
            "recall",
            0.3,
            StrategySpec::new("confirm_then_rehydrate", &["confirm_with_user", "rehydrate_segment"]),
        )
        .requires(HAS_EVICTED)
        .intents(&["are you sure", "confirm"])
        .0,
        // context pressure
        NodeBuilder::new(
            "compact_context",
            "context_pressure",
            0.7,
            StrategySpec::new("compact_then_reply", &["compact_context", "generate_reply"]),
        )
        .requires(OVER_BUDGET)
        .fallback(StrategySpec::new(
            "cached_reply",
            &["use_cached_context", "generate_reply"],
        ))
        .intents(&["summarize", "shorter"])
        .0,
        NodeBuilder::new(
            "reply_within_budget",
            "context_pressure",
            0.4,
            StrategySpec::new("direct_reply", &["generate_reply"]),
        )
        .0,
        // store degraded
        NodeBuilder::new(
            "answer_from_cache",
            "store_degraded",
            0.6,
            StrategySpec::new("cached_reply", &["use_cached_context", "generate_reply"]),
        )
        .requires(STORE_DEGRADED)
        .fallback(StrategySpec::new("notify", &["notify_user"]))
        .0,
        NodeBuilder::new(
            "notify_degraded",
            "store_degraded",
            0.4,
            StrategySpec::new("notify", &["analyze_error", "notify_user"]),
        )
        .0,
    ];

    CatalogSpec { rules, nodes }
}
