//! Context window manager.
//!
//! Owns one conversation's active window: ingests turns, keeps the active
//! token total within budget by evicting the lowest-scoring segments outside
//! the protected window, and assembles the context handed to generation.
//!
//! ## Eviction
//!
//! After every ingest the manager rescores all segments and, while the
//! active total exceeds the budget, evicts the lowest-scoring unprotected
//! segment (ties: least recently accessed, then oldest). The whole pass runs
//! under a watchdog. When a pass cannot reach the budget the window enters
//! degraded mode, reported to the caller and cleared by the next pass that
//! succeeds.
//!
//! ## Context assembly
//!
//! ```text
//! protected window (oldest first)
//! → other active segments (highest score first)
//! → recalled summaries (highest query overlap first)
//! ```
//!
//! Each candidate is added if it still fits `max_tokens`, otherwise skipped.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use memoria_core::{ConversationId, Role, SegmentId, SummaryRecord, TopicQuery, Topics, Turn, TurnId};
use memoria_settings::{ContextSettings, MemoriaSettings};
use serde::Serialize;
use tracing::{debug, info, trace, warn};

use crate::errors::{ContextError, DegradedMode, DegradedReason, Result};
use crate::persistence::ResilientStore;
use crate::scoring::{ImportanceScorer, ScoringContext};
use crate::search::SummarySearch;
use crate::segment::Segment;
use crate::segment_store::{AnnotatedTurn, SegmentStore};
use crate::summarizer::Summarizer;
use crate::topics::TopicExtractor;

// =============================================================================
// Types
// =============================================================================

/// Window limits, resolved from [`ContextSettings`].
#[derive(Clone, Debug, PartialEq)]
pub struct WindowConfig {
    /// Active-window token budget.
    pub token_budget: u32,
    /// Joining cap for the open segment.
    pub segment_token_cap: u32,
    /// Absolute per-segment cap.
    pub hard_token_cap: u32,
    /// Newest non-rehydrated segments that are never evicted.
    pub protected_window: usize,
    /// Upper bound on one eviction pass.
    pub eviction_watchdog: Duration,
    /// Minimum overlap for recall.
    pub recall_threshold: f64,
    /// Stored summaries considered per build.
    pub recall_limit: usize,
    /// Records scanned per search.
    pub search_scan_limit: usize,
    /// Refresh access stamps on context reads.
    pub touch_on_read: bool,
}

impl From<&ContextSettings> for WindowConfig {
    fn from(s: &ContextSettings) -> Self {
        Self {
            token_budget: s.token_budget,
            segment_token_cap: s.segment_token_cap,
            hard_token_cap: s.hard_token_cap,
            protected_window: s.protected_window,
            eviction_watchdog: Duration::from_millis(s.eviction_watchdog_ms.max(1)),
            recall_threshold: s.recall_threshold,
            recall_limit: s.recall_limit,
            search_scan_limit: s.search_scan_limit,
            touch_on_read: s.touch_on_read,
        }
    }
}

/// Result of ingesting one turn.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestOutcome {
    /// The ingested turn.
    pub turn_id: TurnId,
    /// Segment that received it.
    pub segment_id: SegmentId,
    /// Segments evicted by the follow-up pass, in eviction order.
    pub evicted: Vec<SegmentId>,
    /// Set when the pass left the window over budget.
    pub degraded: Option<DegradedMode>,
}

/// Result of one eviction pass.
#[derive(Clone, Debug, Default)]
pub struct EvictionReport {
    /// Segments evicted, in order.
    pub evicted: Vec<SegmentId>,
    /// Set when the pass left the window over budget.
    pub degraded: Option<DegradedMode>,
}

/// Why a segment is in an assembled context.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ContextSource {
    /// Part of the protected window.
    Protected,
    /// Active segment ranked by importance.
    Scored {
        /// Importance at the last scoring pass.
        importance: f64,
    },
    /// Stored summary matched against the query.
    Recalled {
        /// Overlap with the query topics.
        relevance: f64,
    },
}

/// One entry of an assembled context.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextSegment {
    /// The segment (a transient view for recalled summaries).
    pub segment: Segment,
    /// Selection reason.
    pub source: ContextSource,
}

/// Render an assembled context as prompt text, one block per segment.
#[must_use]
pub fn render_context(context: &[ContextSegment]) -> String {
    context
        .iter()
        .map(|c| match c.source {
            ContextSource::Recalled { .. } => format!("[recalled] {}", c.segment.render()),
            _ => c.segment.render(),
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Point-in-time view of the window.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowSnapshot {
    /// Owning conversation.
    pub conversation_id: ConversationId,
    /// Active token total.
    pub active_tokens: u64,
    /// Configured budget.
    pub token_budget: u32,
    /// Active segment count.
    pub segment_count: usize,
    /// Protected segment IDs, oldest first.
    pub protected: Vec<SegmentId>,
    /// Evictions so far.
    pub evicted_count: usize,
    /// Turns ingested so far.
    pub turns: u64,
    /// Current degraded state, if any.
    pub degraded: Option<DegradedMode>,
}

// =============================================================================
// ContextWindowManager
// =============================================================================

/// Per-conversation window: ingest, eviction and context assembly.
#[derive(Debug)]
pub struct ContextWindowManager {
    conversation_id: ConversationId,
    config: WindowConfig,
    extractor: TopicExtractor,
    scorer: ImportanceScorer,
    segments: SegmentStore,
    degraded: Option<DegradedMode>,
}

impl ContextWindowManager {
    /// Build a manager over `store`.
    pub fn new(
        conversation_id: ConversationId,
        settings: &MemoriaSettings,
        store: ResilientStore,
        summarizer: Arc<dyn Summarizer>,
    ) -> Result<Self> {
        let config = WindowConfig::from(&settings.context);
        if config.segment_token_cap > config.hard_token_cap {
            return Err(ContextError::InvalidConfig(format!(
                "segment cap {} exceeds hard cap {}",
                config.segment_token_cap, config.hard_token_cap
            )));
        }
        let scorer = ImportanceScorer::new(&settings.scoring)?;
        let extractor = TopicExtractor::new(&settings.topics);
        let segments = SegmentStore::new(
            conversation_id.clone(),
            config.segment_token_cap,
            extractor.max_topics(),
            store,
            summarizer,
        );
        Ok(Self {
            conversation_id,
            config,
            extractor,
            scorer,
            segments,
            degraded: None,
        })
    }

    /// Add a turn, then evict until the window fits the budget.
    ///
    /// Fails with [`ContextError::CapacityExceeded`] (and changes nothing)
    /// when the receiving segment would exceed the hard cap.
    pub async fn ingest(&mut self, turn: Turn) -> Result<IngestOutcome> {
        let placement = self.segments.placement(&turn);
        if placement.tokens() > self.config.hard_token_cap {
            return Err(ContextError::CapacityExceeded {
                conversation_id: self.conversation_id.clone(),
                turn_id: turn.id().clone(),
                tokens: placement.tokens(),
                hard_cap: self.config.hard_token_cap,
            });
        }

        let text = turn.textual();
        let topics = self.extractor.ingest(&text);
        let user_signal = turn.role() != Role::Assistant && self.scorer.has_importance_marker(&text);
        let turn_id = turn.id().clone();
        let segment_id = self.segments.append(AnnotatedTurn {
            turn,
            topics,
            user_signal,
        });
        trace!(
            conversation_id = %self.conversation_id,
            turn_id = %turn_id,
            segment_id = %segment_id,
            active_tokens = self.segments.active_tokens(),
            "turn ingested"
        );

        let report = self.evict_enough().await;
        Ok(IngestOutcome {
            turn_id,
            segment_id,
            evicted: report.evicted,
            degraded: report.degraded,
        })
    }

    /// Rescore and evict until the active total fits the budget.
    pub async fn evict_enough(&mut self) -> EvictionReport {
        self.rebalance(None).await
    }

    /// Eviction pass that never picks `pinned`.
    async fn rebalance(&mut self, pinned: Option<&SegmentId>) -> EvictionReport {
        let mut evicted = Vec::new();
        let watchdog = self.config.eviction_watchdog;
        let outcome = tokio::time::timeout(watchdog, self.evict_loop(pinned, &mut evicted)).await;
        let reason = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(reason)) => Some(reason),
            Err(_) => Some(DegradedReason::WatchdogTimeout {
                timeout_ms: u64::try_from(watchdog.as_millis()).unwrap_or(u64::MAX),
            }),
        };

        let degraded = reason.map(|reason| DegradedMode {
            conversation_id: self.conversation_id.clone(),
            reason,
            active_tokens: self.segments.active_tokens(),
            budget: self.config.token_budget,
        });
        match (&degraded, &self.degraded) {
            (Some(d), _) => warn!(
                conversation_id = %self.conversation_id,
                active_tokens = d.active_tokens,
                budget = d.budget,
                reason = ?d.reason,
                "context window degraded"
            ),
            (None, Some(_)) => info!(
                conversation_id = %self.conversation_id,
                active_tokens = self.segments.active_tokens(),
                "context window back within budget"
            ),
            (None, None) => {}
        }
        self.degraded.clone_from(&degraded);
        EvictionReport { evicted, degraded }
    }

    async fn evict_loop(
        &mut self,
        pinned: Option<&SegmentId>,
        evicted: &mut Vec<SegmentId>,
    ) -> std::result::Result<(), DegradedReason> {
        self.rescore();
        while self.segments.active_tokens() > u64::from(self.config.token_budget) {
            let Some(victim) = self.select_victim(pinned) else {
                return Err(DegradedReason::ProtectedOverflow);
            };
            debug!(
                conversation_id = %self.conversation_id,
                segment_id = %victim,
                "evicting segment"
            );
            if let Err(e) = self.segments.evict(&victim).await {
                warn!(
                    conversation_id = %self.conversation_id,
                    segment_id = %victim,
                    error = %e,
                    "eviction failed, segment stays active"
                );
                return Err(DegradedReason::StoreFailure {
                    segment_id: victim,
                    error: e.to_string(),
                });
            }
            evicted.push(victim);
            self.rescore();
        }
        Ok(())
    }

    /// Recompute importance for every active segment.
    fn rescore(&mut self) {
        let protected = self.segments.protected_ids(self.config.protected_window);
        let mut focus = Topics::new();
        for segment in self.segments.list() {
            if protected.contains(segment.id()) {
                focus.absorb(segment.topics());
            }
        }
        let focus = focus.normalized();
        let ctx = ScoringContext {
            now: Utc::now(),
            turn_clock: self.segments.turn_clock(),
            focus: &focus,
        };
        let scorer = &self.scorer;
        for segment in self.segments.list_mut() {
            let score = scorer.score(segment, &ctx);
            segment.set_importance(score);
        }
    }

    /// Lowest-importance unprotected segment.
    fn select_victim(&self, pinned: Option<&SegmentId>) -> Option<SegmentId> {
        let protected = self.segments.protected_ids(self.config.protected_window);
        self.segments
            .list()
            .iter()
            .filter(|s| !protected.contains(s.id()) && Some(s.id()) != pinned)
            .min_by(|a, b| {
                a.importance()
                    .total_cmp(&b.importance())
                    .then_with(|| a.last_accessed().cmp(&b.last_accessed()))
                    .then_with(|| a.sequence().cmp(&b.sequence()))
            })
            .map(|s| s.id().clone())
    }

    /// Assemble up to `max_tokens` of context for `query`.
    ///
    /// Recall failures are logged and skipped; the active part of the
    /// context is always returned.
    pub async fn build_context(&self, query: &TopicQuery, max_tokens: u32) -> Vec<ContextSegment> {
        let budget = u64::from(max_tokens);
        let mut used = 0_u64;
        let mut out = Vec::new();
        let mut offer = |segment: &Segment, source: ContextSource, out: &mut Vec<ContextSegment>| {
            let tokens = u64::from(segment.token_count());
            if used + tokens <= budget {
                used += tokens;
                out.push(ContextSegment {
                    segment: segment.clone(),
                    source,
                });
            }
        };

        let protected = self.segments.protected_ids(self.config.protected_window);
        let (guarded, mut rest): (Vec<&Segment>, Vec<&Segment>) = self
            .segments
            .list()
            .iter()
            .partition(|s| protected.contains(s.id()));
        for segment in guarded {
            offer(segment, ContextSource::Protected, &mut out);
        }
        rest.sort_by(|a, b| {
            b.importance()
                .total_cmp(&a.importance())
                .then_with(|| a.sequence().cmp(&b.sequence()))
        });
        for segment in rest {
            offer(
                segment,
                ContextSource::Scored {
                    importance: segment.importance(),
                },
                &mut out,
            );
        }

        for (record, relevance) in self.recall(query).await {
            let segment = Segment::recalled(&record, self.segments.turn_clock());
            offer(&segment, ContextSource::Recalled { relevance }, &mut out);
        }
        out
    }

    async fn recall(&self, query: &TopicQuery) -> Vec<(SummaryRecord, f64)> {
        if query.is_empty() || self.config.recall_limit == 0 {
            return Vec::new();
        }
        let scoped = query.clone().in_conversation(self.conversation_id.clone());
        let records = match self
            .segments
            .persistence()
            .scan(&scoped, self.config.recall_limit)
            .await
        {
            Ok(records) => records,
            Err(e) => {
                warn!(conversation_id = %self.conversation_id, error = %e, "recall scan failed");
                return Vec::new();
            }
        };
        let active: HashSet<&SegmentId> = self
            .segments
            .list()
            .iter()
            .filter_map(Segment::rehydrated_from)
            .collect();
        let mut hits: Vec<(SummaryRecord, f64)> = records
            .into_iter()
            .filter(|r| !active.contains(&r.segment_id))
            .map(|r| {
                let relevance = scoped.relevance(&r.topics);
                (r, relevance)
            })
            .filter(|(_, relevance)| *relevance >= self.config.recall_threshold && *relevance > 0.0)
            .collect();
        hits.sort_by(|(a, ra), (b, rb)| {
            rb.total_cmp(ra)
                .then_with(|| b.created_at.cmp(&a.created_at))
                .then_with(|| a.segment_id.cmp(&b.segment_id))
        });
        hits
    }

    /// Bring a stored summary back into the active window, then rebalance
    /// around it.
    pub async fn rehydrate(&mut self, summary_id: &SegmentId) -> Result<Segment> {
        let segment = self.segments.rehydrate(summary_id).await?;
        let report = self.rebalance(Some(segment.id())).await;
        if !report.evicted.is_empty() {
            debug!(
                conversation_id = %self.conversation_id,
                evicted = report.evicted.len(),
                "rebalanced after rehydration"
            );
        }
        Ok(segment)
    }

    /// Refresh the access stamps of active segments; returns how many were
    /// found.
    pub fn record_access(&mut self, ids: &[SegmentId]) -> usize {
        let now = Utc::now();
        let clock = self.segments.turn_clock();
        let wanted: HashSet<&SegmentId> = ids.iter().collect();
        let mut touched = 0;
        for segment in self.segments.list_mut() {
            if wanted.contains(segment.id()) {
                segment.touch(now, clock);
                touched += 1;
            }
        }
        touched
    }

    /// Search this conversation's stored summaries.
    #[must_use]
    pub fn search(&self, query: &TopicQuery) -> SummarySearch {
        SummarySearch::new(
            self.segments.persistence().clone(),
            query.clone().in_conversation(self.conversation_id.clone()),
            self.config.search_scan_limit,
        )
    }

    /// Abort in-flight store calls and pending retries.
    pub fn cancel(&self) {
        self.segments.persistence().cancellation().cancel();
    }

    /// Point-in-time view.
    #[must_use]
    pub fn snapshot(&self) -> WindowSnapshot {
        let protected = self.segments.protected_ids(self.config.protected_window);
        WindowSnapshot {
            conversation_id: self.conversation_id.clone(),
            active_tokens: self.segments.active_tokens(),
            token_budget: self.config.token_budget,
            segment_count: self.segments.list().len(),
            protected: self
                .segments
                .list()
                .iter()
                .filter(|s| protected.contains(s.id()))
                .map(|s| s.id().clone())
                .collect(),
            evicted_count: self.segments.evicted_count(),
            turns: self.segments.turn_clock(),
            degraded: self.degraded.clone(),
        }
    }

    // ── accessors ──

    /// Active token total.
    #[must_use]
    pub fn active_tokens(&self) -> u64 {
        self.segments.active_tokens()
    }

    /// Owning conversation.
    #[must_use]
    pub fn conversation_id(&self) -> &ConversationId {
        &self.conversation_id
    }

    /// Resolved limits.
    #[must_use]
    pub fn config(&self) -> &WindowConfig {
        &self.config
    }

    /// The active segment set.
    #[must_use]
    pub fn segments(&self) -> &SegmentStore {
        &self.segments
    }

    /// Current degraded state.
    #[must_use]
    pub fn degraded(&self) -> Option<&DegradedMode> {
        self.degraded.as_ref()
    }

    /// Topics the current text would get, without observing it.
    #[must_use]
    pub fn topics_for(&self, text: &str) -> Topics {
        self.extractor.extract(text)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::summarizer::ExtractiveSummarizer;
    use assert_matches::assert_matches;
    use memoria_settings::StoreSettings;
    use memoria_store::{InMemorySummaryStore, SummaryStore};

    fn settings(budget: u32, protected: usize) -> MemoriaSettings {
        let mut s = MemoriaSettings::default();
        s.context.token_budget = budget;
        s.context.protected_window = protected;
        s
    }

    fn manager(backend: &Arc<InMemorySummaryStore>, settings: &MemoriaSettings) -> ContextWindowManager {
        let inner: Arc<dyn SummaryStore> = backend.clone();
        let mut store_settings = StoreSettings::default();
        store_settings.retry.max_attempts = 1;
        ContextWindowManager::new(
            ConversationId::from("c1"),
            settings,
            ResilientStore::new(inner, &store_settings),
            Arc::new(ExtractiveSummarizer::default()),
        )
        .unwrap()
    }

    fn user(text: &str) -> Turn {
        Turn::text(Role::User, text)
    }

    #[tokio::test]
    async fn over_budget_evicts_oldest_unprotected() {
        let backend = Arc::new(InMemorySummaryStore::new());
        let mut window = manager(&backend, &settings(10, 2));
        let first = window.ingest(user("aaaaaaaaaaaaaaaa")).await.unwrap();
        let _ = window.ingest(user("bbbbbbbbbbbbbbbb")).await.unwrap();
        let third = window.ingest(user("cccccccccccccccc")).await.unwrap();

        assert_eq!(third.evicted, vec![first.segment_id.clone()]);
        assert!(third.degraded.is_none());
        assert_eq!(window.active_tokens(), 8);
        assert!(backend.contains(&first.segment_id));
    }

    #[tokio::test]
    async fn protected_window_is_never_evicted() {
        let backend = Arc::new(InMemorySummaryStore::new());
        let mut window = manager(&backend, &settings(1, 5));
        let mut ids = Vec::new();
        let mut evicted = Vec::new();
        let mut last = None;
        for i in 0..10 {
            let outcome = window.ingest(user(&format!("turn number {i:02} here"))).await.unwrap();
            ids.push(outcome.segment_id.clone());
            evicted.extend(outcome.evicted.clone());
            last = Some(outcome);
        }
        assert_eq!(evicted, ids[..5].to_vec());
        let last = last.unwrap();
        assert_matches!(
            last.degraded,
            Some(DegradedMode { reason: DegradedReason::ProtectedOverflow, .. })
        );
        assert_eq!(window.segments().list().len(), 5);
        assert_eq!(window.snapshot().protected, ids[5..].to_vec());
    }

    #[tokio::test]
    async fn oversized_turn_is_rejected_without_side_effects() {
        let backend = Arc::new(InMemorySummaryStore::new());
        let mut s = settings(100, 2);
        s.context.segment_token_cap = 8;
        s.context.hard_token_cap = 8;
        let mut window = manager(&backend, &s);
        let err = window.ingest(user(&"x".repeat(40))).await.unwrap_err();
        assert_matches!(err, ContextError::CapacityExceeded { tokens: 10, hard_cap: 8, .. });
        assert_eq!(window.active_tokens(), 0);
        assert_eq!(window.snapshot().turns, 0);
    }

    #[tokio::test]
    async fn store_failure_degrades_then_heals() {
        let backend = Arc::new(InMemorySummaryStore::new());
        let mut window = manager(&backend, &settings(10, 1));
        let first = window.ingest(user("aaaaaaaaaaaaaaaa")).await.unwrap();
        let _ = window.ingest(user("bbbbbbbbbbbbbbbb")).await.unwrap();

        backend.set_unavailable(true);
        let outcome = window.ingest(user("cccccccccccccccc")).await.unwrap();
        assert_matches!(
            outcome.degraded,
            Some(DegradedMode { reason: DegradedReason::StoreFailure { .. }, .. })
        );
        assert!(window.segments().get(&first.segment_id).is_some());
        assert!(window.degraded().is_some());

        backend.set_unavailable(false);
        let report = window.evict_enough().await;
        assert!(report.degraded.is_none());
        assert!(window.degraded().is_none());
        assert!(window.active_tokens() <= 10);
        assert!(backend.contains(&first.segment_id));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_store_trips_the_watchdog() {
        let backend = Arc::new(InMemorySummaryStore::new());
        let mut s = settings(4, 1);
        s.context.eviction_watchdog_ms = 50;
        let mut window = manager(&backend, &s);
        let first = window.ingest(user("aaaaaaaaaaaaaaaa")).await.unwrap();
        backend.set_put_delay(Some(Duration::from_secs(10)));
        let outcome = window.ingest(user("bbbbbbbbbbbbbbbb")).await.unwrap();
        assert_matches!(
            outcome.degraded,
            Some(DegradedMode { reason: DegradedReason::WatchdogTimeout { timeout_ms: 50 }, .. })
        );
        assert!(window.segments().get(&first.segment_id).is_some());
    }

    #[tokio::test]
    async fn marked_segment_outlives_plain_one() {
        let backend = Arc::new(InMemorySummaryStore::new());
        let mut window = manager(&backend, &settings(12, 1));
        let marked = window
            .ingest(user("remember seat 12A please"))
            .await
            .unwrap();
        let plain = window.ingest(user("lunch menu ideas")).await.unwrap();
        let outcome = window.ingest(user("unrelated weather chat")).await.unwrap();
        assert_eq!(outcome.evicted, vec![plain.segment_id]);
        assert!(window.segments().get(&marked.segment_id).is_some());
    }

    #[tokio::test]
    async fn build_context_orders_and_skips() {
        let backend = Arc::new(InMemorySummaryStore::new());
        let mut window = manager(&backend, &settings(1_000, 1));
        let a = window.ingest(user("aaaaaaaaaaaaaaaa")).await.unwrap();
        let _b = window.ingest(user(&"b".repeat(40))).await.unwrap();
        let c = window.ingest(user("cccccccccccccccc")).await.unwrap();

        let ctx = window.build_context(&TopicQuery::default(), 9).await;
        let ids: Vec<_> = ctx.iter().map(|c| c.segment.id().clone()).collect();
        assert_eq!(ids, vec![c.segment_id, a.segment_id]);
        assert_eq!(ctx[0].source, ContextSource::Protected);
        assert_matches!(ctx[1].source, ContextSource::Scored { .. });

        let all = window.build_context(&TopicQuery::default(), 1_000).await;
        assert_eq!(all.len(), 3);
        assert!(window.build_context(&TopicQuery::default(), 0).await.is_empty());
    }

    #[tokio::test]
    async fn relevant_summaries_are_recalled() {
        let backend = Arc::new(InMemorySummaryStore::new());
        let mut window = manager(&backend, &settings(8, 1));
        let billing = window.ingest(user("billing invoice overdue")).await.unwrap();
        let weather = window.ingest(user("weather forecast sunny")).await.unwrap();
        assert_eq!(weather.evicted, vec![billing.segment_id.clone()]);

        let ctx = window.build_context(&TopicQuery::from_text("billing"), 100).await;
        assert_eq!(ctx.len(), 2);
        assert_eq!(ctx[1].segment.id(), &billing.segment_id);
        assert_matches!(ctx[1].source, ContextSource::Recalled { relevance } if relevance > 0.1);
        assert!(render_context(&ctx).contains("[recalled] user: billing invoice overdue"));

        let unrelated = window.build_context(&TopicQuery::from_text("sunny"), 100).await;
        assert_eq!(unrelated.len(), 1);
    }

    #[tokio::test]
    async fn rehydration_round_trips_topics() {
        let backend = Arc::new(InMemorySummaryStore::new());
        let mut window = manager(&backend, &settings(8, 1));
        let billing = window.ingest(user("billing invoice overdue")).await.unwrap();
        let original_topics = window
            .segments()
            .get(&billing.segment_id)
            .unwrap()
            .topics()
            .clone();
        let _ = window.ingest(user("weather forecast sunny")).await.unwrap();
        assert!(window.segments().was_evicted(&billing.segment_id));

        let copy = window.rehydrate(&billing.segment_id).await.unwrap();
        assert!(window.segments().get(copy.id()).is_some());
        assert_eq!(copy.topics(), &original_topics);
        assert_eq!(copy.rehydrated_from(), Some(&billing.segment_id));
        // A recalled summary already active is not offered twice.
        let ctx = window.build_context(&TopicQuery::from_text("billing"), 100).await;
        assert!(ctx.iter().all(|c| !matches!(c.source, ContextSource::Recalled { .. })));
    }

    #[tokio::test]
    async fn search_is_scoped_to_conversation() {
        let backend = Arc::new(InMemorySummaryStore::new());
        let mut window = manager(&backend, &settings(8, 1));
        let _ = window.ingest(user("billing invoice overdue")).await.unwrap();
        let _ = window.ingest(user("weather forecast sunny")).await.unwrap();
        let foreign = SummaryRecord {
            segment_id: SegmentId::from("foreign"),
            conversation_id: ConversationId::from("c2"),
            summary_text: "user: billing".into(),
            topics: Topics::from_weights([("billing", 1.0)]),
            original_token_count: 3,
            modalities: std::collections::BTreeSet::new(),
            created_at: Utc::now(),
        };
        backend.put(&foreign).await.unwrap();

        let hits = window.search(&TopicQuery::from_text("billing")).first(10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].record.conversation_id, ConversationId::from("c1"));
    }

    #[tokio::test]
    async fn record_access_touches_only_active_segments() {
        let backend = Arc::new(InMemorySummaryStore::new());
        let mut window = manager(&backend, &settings(1_000, 1));
        let a = window.ingest(user("alpha")).await.unwrap();
        let before = window.segments().get(&a.segment_id).unwrap().last_accessed();
        let touched = window.record_access(&[a.segment_id.clone(), SegmentId::from("gone")]);
        assert_eq!(touched, 1);
        assert!(window.segments().get(&a.segment_id).unwrap().last_accessed() >= before);
    }

    #[test]
    fn invalid_caps_are_rejected() {
        let backend = Arc::new(InMemorySummaryStore::new());
        let mut s = MemoriaSettings::default();
        s.context.segment_token_cap = 9_000;
        let inner: Arc<dyn SummaryStore> = backend;
        let result = ContextWindowManager::new(
            ConversationId::from("c1"),
            &s,
            ResilientStore::new(inner, &StoreSettings::default()),
            Arc::new(ExtractiveSummarizer::default()),
        );
        assert_matches!(result, Err(ContextError::InvalidConfig(_)));
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn active_tokens_stay_within_budget(texts in prop::collection::vec("[a-z]{1,32}", 1..40)) {
                let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
                rt.block_on(async {
                    let backend = Arc::new(InMemorySummaryStore::new());
                    let mut window = manager(&backend, &settings(40, 2));
                    for text in &texts {
                        let outcome = window.ingest(user(text)).await.unwrap();
                        prop_assert!(outcome.degraded.is_none());
                        prop_assert!(window.active_tokens() <= 40);
                    }
                    Ok(())
                })?;
            }
        }
    }
}
