//! The action graph: classification, ranking, feedback and execution.
//!
//! Nodes are grouped by bucket. A prediction classifies the snapshot,
//! keeps the bucket's nodes whose prerequisites hold and ranks them by
//! `base_probability × multiplier × intent_boost`. Ties break by name.

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use memoria_settings::ActionSettings;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::bucket::{Classification, Classifier, ContextBucket};
use crate::catalog::{CatalogSpec, default_catalog};
use crate::errors::{ActionError, ClassificationAmbiguous, Result};
use crate::executor::{FailureKind, OperationExecutor, OperationFailure};
use crate::history::{ExecutionOutcome, MultiplierPolicy, OutcomeHistory};
use crate::node::{ActionNode, ActionStrategy};
use crate::operation::OperationRegistry;
use crate::snapshot::ContextSnapshot;

/// One ranked candidate.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RankedAction {
    /// Action name.
    pub name: String,
    /// Adjusted score.
    pub score: f64,
    /// Prior probability.
    pub base_probability: f64,
    /// Success multiplier folded from history.
    pub multiplier: f64,
    /// Whether the last message carried one of the node's intent signals.
    pub intent_matched: bool,
    /// Primary strategy name.
    pub strategy: String,
}

/// Result of [`ActionGraph::predict`].
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Prediction {
    /// Bucket the snapshot was classified into.
    pub bucket: ContextBucket,
    /// Best candidates, highest score first.
    pub actions: Vec<RankedAction>,
    /// Set when classification tied and fell back to the generic bucket.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ambiguity: Option<ClassificationAmbiguous>,
}

/// One strategy tried during execution.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StrategyAttempt {
    /// Strategy name.
    pub strategy: String,
    /// Failure, if the strategy failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
}

/// Successful execution trace.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionReport {
    /// Action executed.
    pub action: String,
    /// Strategy that succeeded.
    pub strategy: String,
    /// Every strategy tried, in order.
    pub attempts: Vec<StrategyAttempt>,
}

/// Ranked, feedback-adjusted action graph for one conversation.
#[derive(Clone, Debug)]
pub struct ActionGraph {
    classifier: Classifier,
    nodes: BTreeMap<ContextBucket, Vec<ActionNode>>,
    history: OutcomeHistory,
    policy: MultiplierPolicy,
    top_n: usize,
    intent_boost: f64,
}

impl ActionGraph {
    /// Build from a catalog, resolving step names through `registry`.
    pub fn new(
        catalog: &CatalogSpec,
        registry: &OperationRegistry,
        settings: &ActionSettings,
    ) -> Result<Self> {
        let mut seen = HashSet::new();
        let mut nodes: BTreeMap<ContextBucket, Vec<ActionNode>> = BTreeMap::new();
        for spec in &catalog.nodes {
            if !seen.insert(spec.name.clone()) {
                return Err(ActionError::InvalidCatalog(format!(
                    "duplicate action '{}'",
                    spec.name
                )));
            }
            let node = spec.build(registry)?;
            nodes.entry(node.bucket.clone()).or_default().push(node);
        }
        debug!(
            actions = seen.len(),
            buckets = nodes.len(),
            rules = catalog.rules.len(),
            "action graph built"
        );
        Ok(Self {
            classifier: Classifier::new(catalog.rules.clone()),
            nodes,
            history: OutcomeHistory::new(settings.history_limit),
            policy: MultiplierPolicy::from(settings),
            top_n: settings.top_n.max(1),
            intent_boost: settings.intent_boost,
        })
    }

    /// Graph over the built-in catalog and operations.
    pub fn with_defaults(settings: &ActionSettings) -> Result<Self> {
        Self::new(&default_catalog(), &OperationRegistry::builtin(), settings)
    }

    // ── lookup ──

    /// Node by name.
    #[must_use]
    pub fn node(&self, name: &str) -> Option<&ActionNode> {
        self.nodes.values().flatten().find(|n| n.name == name)
    }

    /// Nodes registered under `bucket`.
    #[must_use]
    pub fn nodes_in(&self, bucket: &ContextBucket) -> &[ActionNode] {
        self.nodes.get(bucket).map_or(&[], Vec::as_slice)
    }

    /// Recorded outcomes.
    #[must_use]
    pub fn history(&self) -> &OutcomeHistory {
        &self.history
    }

    /// Classify without ranking.
    #[must_use]
    pub fn classify(&self, snapshot: &ContextSnapshot) -> Classification {
        self.classifier.classify(snapshot)
    }

    /// Current multiplier of `action` in `bucket`.
    #[must_use]
    pub fn multiplier(&self, action: &str, bucket: &ContextBucket, now: DateTime<Utc>) -> f64 {
        self.policy.fold(self.history.for_action(action, bucket), now)
    }

    // ── prediction ──

    /// Rank the next actions for `snapshot`.
    #[must_use]
    pub fn predict(&self, snapshot: &ContextSnapshot) -> Prediction {
        self.predict_at(snapshot, Utc::now())
    }

    /// [`predict`](Self::predict) as of `now`.
    #[must_use]
    pub fn predict_at(&self, snapshot: &ContextSnapshot, now: DateTime<Utc>) -> Prediction {
        let Classification { bucket, ambiguity } = self.classifier.classify(snapshot);
        if let Some(ambiguity) = &ambiguity {
            warn!(candidates = ?ambiguity.candidates, score = ambiguity.score, "ambiguous classification");
        }
        let mut actions: Vec<RankedAction> = self
            .nodes_in(&bucket)
            .iter()
            .filter(|node| node.prerequisites_met(snapshot))
            .map(|node| {
                let multiplier = self.multiplier(&node.name, &node.bucket, now);
                let intent_matched = node.intent_matches(snapshot);
                let boost = if intent_matched { self.intent_boost } else { 1.0 };
                RankedAction {
                    name: node.name.clone(),
                    score: node.base_probability * multiplier * boost,
                    base_probability: node.base_probability,
                    multiplier,
                    intent_matched,
                    strategy: node.primary().name.clone(),
                }
            })
            .collect();
        actions.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.name.cmp(&b.name)));
        actions.truncate(self.top_n);
        debug!(bucket = %bucket, candidates = actions.len(), "actions predicted");
        Prediction {
            bucket,
            actions,
            ambiguity,
        }
    }

    // ── feedback ──

    /// Record the outcome of `action`. The outcome is attributed to the
    /// node's own bucket.
    pub fn report_outcome(
        &mut self,
        action: &str,
        success: bool,
        snapshot: ContextSnapshot,
    ) -> Result<ExecutionOutcome> {
        let bucket = self
            .node(action)
            .map(|n| n.bucket.clone())
            .ok_or_else(|| ActionError::UnknownAction {
                action: action.to_owned(),
            })?;
        let outcome = ExecutionOutcome {
            action: action.to_owned(),
            bucket,
            success,
            snapshot,
            timestamp: Utc::now(),
        };
        info!(action, bucket = %outcome.bucket, success, "action outcome recorded");
        self.history.push(outcome.clone());
        Ok(outcome)
    }

    /// Replay previously persisted outcomes, oldest first. Outcomes for
    /// actions this graph does not know are skipped.
    pub fn seed(&mut self, outcomes: impl IntoIterator<Item = ExecutionOutcome>) -> usize {
        let mut seeded = 0;
        for outcome in outcomes {
            if self.node(&outcome.action).is_none() {
                continue;
            }
            self.history.push(outcome);
            seeded += 1;
        }
        debug!(seeded, "outcome history seeded");
        seeded
    }

    // ── execution ──

    /// The first declared fallback of `action` that contains every operation
    /// `kind` requires, or the generic recovery strategy.
    #[must_use]
    pub fn fallback_for(&self, action: &str, kind: FailureKind) -> ActionStrategy {
        let required = kind.required_operations();
        self.node(action)
            .and_then(|node| node.fallbacks().iter().find(|s| s.covers(required)))
            .cloned()
            .unwrap_or_else(ActionStrategy::generic_recovery)
    }

    /// Run `action`: primary strategy first, then each fallback in order.
    pub async fn execute(
        &self,
        action: &str,
        snapshot: &ContextSnapshot,
        executor: &dyn OperationExecutor,
    ) -> Result<ExecutionReport> {
        let node = self.node(action).ok_or_else(|| ActionError::UnknownAction {
            action: action.to_owned(),
        })?;
        execute_node(node, snapshot, executor).await
    }
}

async fn run_strategy(
    strategy: &ActionStrategy,
    snapshot: &ContextSnapshot,
    executor: &dyn OperationExecutor,
) -> std::result::Result<(), OperationFailure> {
    for operation in &strategy.operations {
        executor.execute(*operation, snapshot).await?;
    }
    Ok(())
}

/// Run `node`'s strategies in order until one succeeds. Each strategy is
/// tried once; a failed step abandons the rest of its strategy.
pub async fn execute_node(
    node: &ActionNode,
    snapshot: &ContextSnapshot,
    executor: &dyn OperationExecutor,
) -> Result<ExecutionReport> {
    let mut attempts = Vec::with_capacity(node.strategies().len());
    let mut last: Option<OperationFailure> = None;
    for strategy in node.strategies() {
        match run_strategy(strategy, snapshot, executor).await {
            Ok(()) => {
                attempts.push(StrategyAttempt {
                    strategy: strategy.name.clone(),
                    failure: None,
                });
                info!(action = %node.name, strategy = %strategy.name, "action executed");
                return Ok(ExecutionReport {
                    action: node.name.clone(),
                    strategy: strategy.name.clone(),
                    attempts,
                });
            }
            Err(failure) => {
                warn!(
                    action = %node.name,
                    strategy = %strategy.name,
                    operation = %failure.operation,
                    kind = ?failure.kind,
                    "strategy failed"
                );
                attempts.push(StrategyAttempt {
                    strategy: strategy.name.clone(),
                    failure: Some(failure.to_string()),
                });
                last = Some(failure);
            }
        }
    }
    let (last_kind, last_failure) = last.map_or((FailureKind::Other, String::new()), |f| {
        (f.kind, f.message)
    });
    Err(ActionError::ActionExhausted {
        action: node.name.clone(),
        attempts: attempts.len(),
        last_kind,
        last_failure,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bucket::BucketRule;
    use crate::node::{ActionNodeSpec, StrategySpec};
    use crate::operation::Operation;
    use crate::snapshot::Prerequisite;
    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use chrono::Duration;
    use std::sync::Mutex;

    fn node(name: &str, bucket: &str, base: f64) -> ActionNodeSpec {
        ActionNodeSpec {
            name: name.into(),
            bucket: bucket.into(),
            prerequisites: Vec::new(),
            primary: StrategySpec::new("direct", &["generate_reply"]),
            fallbacks: Vec::new(),
            base_probability: base,
            intent_signals: Vec::new(),
        }
    }

    fn graph(nodes: Vec<ActionNodeSpec>) -> ActionGraph {
        let catalog = CatalogSpec {
            rules: vec![BucketRule {
                bucket: "recall".into(),
                required_facts: vec!["has_evicted".into()],
                keywords: vec!["remember".into()],
            }],
            nodes,
        };
        ActionGraph::new(&catalog, &OperationRegistry::builtin(), &ActionSettings::default()).unwrap()
    }

    fn names(p: &Prediction) -> Vec<&str> {
        p.actions.iter().map(|a| a.name.as_str()).collect()
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let catalog = CatalogSpec {
            rules: Vec::new(),
            nodes: vec![node("a", "general", 0.5), node("a", "recall", 0.5)],
        };
        assert_matches!(
            ActionGraph::new(&catalog, &OperationRegistry::builtin(), &ActionSettings::default()),
            Err(ActionError::InvalidCatalog(_))
        );
    }

    #[test]
    fn prediction_ranks_by_base_probability_then_name() {
        let g = graph(vec![
            node("b", "general", 0.5),
            node("a", "general", 0.5),
            node("c", "general", 0.9),
            node("d", "general", 0.1),
        ]);
        let p = g.predict(&ContextSnapshot::new());
        assert!(p.bucket.is_general());
        assert_eq!(names(&p), vec!["c", "a", "b"]);
    }

    #[test]
    fn prerequisites_filter_candidates() {
        let mut gated = node("recall_memory", "recall", 0.9);
        gated.prerequisites = vec![Prerequisite::holds("has_evicted"), Prerequisite::fails("store_degraded")];
        let g = graph(vec![gated, node("search_memory", "recall", 0.2)]);

        let snap = ContextSnapshot::new()
            .with_fact("has_evicted", true)
            .with_fact("store_degraded", false)
            .with_last_message("remember?");
        assert_eq!(names(&g.predict(&snap)), vec!["recall_memory", "search_memory"]);

        // A fact missing from the snapshot does not satisfy `fails`.
        let snap = ContextSnapshot::new()
            .with_fact("has_evicted", true)
            .with_last_message("remember?");
        assert_eq!(names(&g.predict(&snap)), vec!["search_memory"]);
    }

    #[test]
    fn intent_signal_boosts_score() {
        let mut clarify = node("clarify", "general", 0.4);
        clarify.intent_signals = vec!["not sure".into()];
        let g = graph(vec![node("reply", "general", 0.5), clarify]);
        let p = g.predict(&ContextSnapshot::new().with_last_message("I'm not sure"));
        assert_eq!(names(&p), vec!["clarify", "reply"]);
        assert!(p.actions[0].intent_matched);
        assert!((p.actions[0].score - 0.6).abs() < 1e-9);
    }

    #[test]
    fn successes_outrank_failures_at_equal_base() {
        let mut g = graph(vec![node("winner", "general", 0.5), node("loser", "general", 0.5)]);
        for _ in 0..5 {
            let _ = g.report_outcome("winner", true, ContextSnapshot::new()).unwrap();
            let _ = g.report_outcome("loser", false, ContextSnapshot::new()).unwrap();
        }
        let p = g.predict(&ContextSnapshot::new());
        assert_eq!(names(&p), vec!["winner", "loser"]);
        assert!(p.actions[0].score > p.actions[1].score);
        assert!(p.actions[0].multiplier > 1.0 && p.actions[1].multiplier < 1.0);
    }

    #[test]
    fn outcome_uses_node_bucket_and_unknown_is_rejected() {
        let mut g = graph(vec![node("recall_memory", "recall", 0.5)]);
        let outcome = g.report_outcome("recall_memory", true, ContextSnapshot::new()).unwrap();
        assert_eq!(outcome.bucket.as_str(), "recall");
        assert_matches!(
            g.report_outcome("nope", true, ContextSnapshot::new()),
            Err(ActionError::UnknownAction { .. })
        );
        assert_eq!(g.history().len(), 1);
    }

    #[test]
    fn multiplier_decays_toward_neutral() {
        let mut g = graph(vec![node("a", "general", 0.5)]);
        let _ = g.report_outcome("a", true, ContextSnapshot::new()).unwrap();
        let bucket = ContextBucket::general();
        let fresh = g.multiplier("a", &bucket, Utc::now());
        let later = g.multiplier("a", &bucket, Utc::now() + Duration::days(30));
        assert!(fresh > later);
        assert!((later - 1.0).abs() < 1e-3);
    }

    #[test]
    fn seeding_skips_unknown_actions() {
        let mut g = graph(vec![node("a", "general", 0.5)]);
        let outcome = |action: &str| ExecutionOutcome {
            action: action.into(),
            bucket: ContextBucket::general(),
            success: true,
            snapshot: ContextSnapshot::new(),
            timestamp: Utc::now(),
        };
        assert_eq!(g.seed([outcome("a"), outcome("gone")]), 1);
        assert_eq!(g.history().len(), 1);
    }

    #[test]
    fn ambiguity_is_reported() {
        let catalog = CatalogSpec {
            rules: vec![
                BucketRule { bucket: "x".into(), required_facts: vec![], keywords: vec!["alpha".into()] },
                BucketRule { bucket: "y".into(), required_facts: vec![], keywords: vec!["beta".into()] },
            ],
            nodes: vec![node("reply", "general", 0.5)],
        };
        let g = ActionGraph::new(&catalog, &OperationRegistry::builtin(), &ActionSettings::default()).unwrap();
        let p = g.predict(&ContextSnapshot::new().with_last_message("alpha beta"));
        assert!(p.bucket.is_general());
        assert!(p.ambiguity.is_some());
        assert_eq!(names(&p), vec!["reply"]);
    }

    // ── execution ──

    struct ScriptedExecutor {
        failing: Vec<(Operation, FailureKind)>,
        calls: Mutex<Vec<Operation>>,
    }

    impl ScriptedExecutor {
        fn failing(failing: Vec<(Operation, FailureKind)>) -> Self {
            Self {
                failing,
                calls: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> Vec<Operation> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl OperationExecutor for ScriptedExecutor {
        async fn execute(
            &self,
            operation: Operation,
            _snapshot: &ContextSnapshot,
        ) -> std::result::Result<(), OperationFailure> {
            self.calls.lock().unwrap().push(operation);
            match self.failing.iter().find(|(op, _)| *op == operation) {
                Some((_, kind)) => Err(OperationFailure {
                    operation,
                    kind: *kind,
                    message: format!("{operation} failed"),
                }),
                None => Ok(()),
            }
        }
    }

    fn recall_graph() -> ActionGraph {
        let mut recall = node("recall_memory", "recall", 0.6);
        recall.primary = StrategySpec::new("recall", &["recall_memory", "generate_reply"]);
        recall.fallbacks = vec![
            StrategySpec::new("cached", &["use_cached_context", "generate_reply"]),
            StrategySpec::new("search", &["search_memory", "rehydrate_segment", "generate_reply"]),
        ];
        graph(vec![recall])
    }

    #[tokio::test]
    async fn primary_success_runs_every_step() {
        let g = recall_graph();
        let exec = ScriptedExecutor::failing(Vec::new());
        let report = g.execute("recall_memory", &ContextSnapshot::new(), &exec).await.unwrap();
        assert_eq!(report.strategy, "recall");
        assert_eq!(exec.calls(), vec![Operation::RecallMemory, Operation::GenerateReply]);
    }

    #[tokio::test]
    async fn fallbacks_run_in_declared_order() {
        let g = recall_graph();
        let exec = ScriptedExecutor::failing(vec![
            (Operation::RecallMemory, FailureKind::NotFound),
            (Operation::UseCachedContext, FailureKind::Other),
        ]);
        let report = g.execute("recall_memory", &ContextSnapshot::new(), &exec).await.unwrap();
        assert_eq!(report.strategy, "search");
        assert_eq!(report.attempts.len(), 3);
        assert_eq!(
            exec.calls(),
            vec![
                Operation::RecallMemory,
                Operation::UseCachedContext,
                Operation::SearchMemory,
                Operation::RehydrateSegment,
                Operation::GenerateReply,
            ]
        );
    }

    #[tokio::test]
    async fn exhaustion_reports_last_failure_without_retrying() {
        let g = recall_graph();
        let exec = ScriptedExecutor::failing(vec![
            (Operation::RecallMemory, FailureKind::NotFound),
            (Operation::UseCachedContext, FailureKind::StoreUnavailable),
            (Operation::SearchMemory, FailureKind::Timeout),
        ]);
        let err = g.execute("recall_memory", &ContextSnapshot::new(), &exec).await.unwrap_err();
        assert_matches!(
            err,
            ActionError::ActionExhausted { attempts: 3, last_kind: FailureKind::Timeout, .. }
        );
        assert_eq!(exec.calls().len(), 3);
    }

    #[tokio::test]
    async fn unknown_action_is_rejected() {
        let g = recall_graph();
        let exec = ScriptedExecutor::failing(Vec::new());
        assert_matches!(
            g.execute("nope", &ContextSnapshot::new(), &exec).await,
            Err(ActionError::UnknownAction { .. })
        );
    }

    #[test]
    fn fallback_matches_failure_requirements() {
        let g = recall_graph();
        assert_eq!(g.fallback_for("recall_memory", FailureKind::NotFound).name, "search");
        assert_eq!(g.fallback_for("recall_memory", FailureKind::StoreUnavailable).name, "cached");
        // `Other` requires nothing: the first declared fallback fits.
        assert_eq!(g.fallback_for("recall_memory", FailureKind::Other).name, "cached");
        assert_eq!(
            g.fallback_for("recall_memory", FailureKind::Timeout),
            ActionStrategy::generic_recovery()
        );
        assert_eq!(
            g.fallback_for("nope", FailureKind::NotFound),
            ActionStrategy::generic_recovery()
        );
    }

    #[test]
    fn default_graph_predicts_recall_when_memory_was_evicted() {
        let g = ActionGraph::with_defaults(&ActionSettings::default()).unwrap();
        let snap = ContextSnapshot::new()
            .with_fact("has_evicted", true)
            .with_last_message("do you remember the invoice from earlier?");
        let p = g.predict(&snap);
        assert_eq!(p.bucket.as_str(), "recall");
        assert_eq!(p.actions[0].name, "recall_memory");
        assert!(p.actions.len() <= ActionSettings::default().top_n);
    }
}
