//! Process-local summary store.
//!
//! Behaves like the `SQLite` store (idempotent puts, co-occurrence counts,
//! recency-ordered scans) but keeps everything in maps. Fault injection
//! knobs let callers exercise retry and degraded paths without a real
//! failing disk.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use memoria_core::{ConversationId, SegmentId, SummaryRecord, TopicQuery};
use parking_lot::{Mutex, RwLock};
use tracing::trace;

use crate::errors::{Result, StoreError};
use crate::store::{SummaryStore, topic_pairs};
use crate::types::{OutcomeRecord, RelatedTopic};

#[derive(Default)]
struct MemoryState {
    summaries: BTreeMap<SegmentId, SummaryRecord>,
    relationships: BTreeMap<(String, String), u32>,
    outcomes: Vec<OutcomeRecord>,
}

#[derive(Default)]
struct FaultPlan {
    failing_puts: u32,
    unavailable: bool,
    put_delay: Option<Duration>,
}

/// In-memory [`SummaryStore`].
#[derive(Default)]
pub struct InMemorySummaryStore {
    state: RwLock<MemoryState>,
    faults: Mutex<FaultPlan>,
    put_attempts: AtomicU32,
}

impl InMemorySummaryStore {
    /// Empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored summaries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.read().summaries.len()
    }

    /// Whether no summaries are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether a summary exists for `segment_id`.
    #[must_use]
    pub fn contains(&self, segment_id: &SegmentId) -> bool {
        self.state.read().summaries.contains_key(segment_id)
    }

    // ── Fault injection ──

    /// Fail the next `n` puts with a transient error.
    pub fn fail_next_puts(&self, n: u32) {
        self.faults.lock().failing_puts = n;
    }

    /// Fail every call with a transient error until cleared.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.faults.lock().unavailable = unavailable;
    }

    /// Sleep before every put.
    pub fn set_put_delay(&self, delay: Option<Duration>) {
        self.faults.lock().put_delay = delay;
    }

    /// Total `put` calls observed, including failed ones.
    #[must_use]
    pub fn put_attempts(&self) -> u32 {
        self.put_attempts.load(Ordering::SeqCst)
    }

    fn check_available(&self) -> Result<()> {
        if self.faults.lock().unavailable {
            return Err(StoreError::Transient("in-memory store marked unavailable".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl SummaryStore for InMemorySummaryStore {
    async fn put(&self, record: &SummaryRecord) -> Result<()> {
        let _ = self.put_attempts.fetch_add(1, Ordering::SeqCst);

        let delay = self.faults.lock().put_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.check_available()?;
        {
            let mut faults = self.faults.lock();
            if faults.failing_puts > 0 {
                faults.failing_puts -= 1;
                return Err(StoreError::Transient("injected put failure".into()));
            }
        }

        let mut state = self.state.write();
        if state.summaries.contains_key(&record.segment_id) {
            trace!(segment_id = %record.segment_id, "summary already stored, skipping");
            return Ok(());
        }
        for pair in topic_pairs(record) {
            *state.relationships.entry(pair).or_insert(0) += 1;
        }
        let _ = state
            .summaries
            .insert(record.segment_id.clone(), record.clone());
        Ok(())
    }

    async fn get(&self, segment_id: &SegmentId) -> Result<SummaryRecord> {
        self.check_available()?;
        self.state
            .read()
            .summaries
            .get(segment_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                segment_id: segment_id.clone(),
            })
    }

    async fn scan(&self, query: &TopicQuery, limit: usize) -> Result<Vec<SummaryRecord>> {
        self.check_available()?;
        if query.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }
        let state = self.state.read();
        let mut matches: Vec<&SummaryRecord> = state
            .summaries
            .values()
            .filter(|r| {
                query
                    .conversation_id
                    .as_ref()
                    .is_none_or(|c| *c == r.conversation_id)
            })
            .filter(|r| query.topics.terms().any(|t| r.topics.contains(t)))
            .collect();
        matches.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| a.segment_id.cmp(&b.segment_id))
        });
        Ok(matches.into_iter().take(limit).cloned().collect())
    }

    async fn delete_conversation(&self, conversation_id: &ConversationId) -> Result<usize> {
        self.check_available()?;
        let mut state = self.state.write();
        let before = state.summaries.len();
        state
            .summaries
            .retain(|_, r| r.conversation_id != *conversation_id);
        Ok(before - state.summaries.len())
    }

    async fn related_topics(&self, topic: &str, limit: usize) -> Result<Vec<RelatedTopic>> {
        self.check_available()?;
        let state = self.state.read();
        let mut related: Vec<RelatedTopic> = state
            .relationships
            .iter()
            .filter_map(|((a, b), strength)| {
                let other = if a == topic {
                    b
                } else if b == topic {
                    a
                } else {
                    return None;
                };
                Some(RelatedTopic {
                    topic: other.clone(),
                    strength: *strength,
                })
            })
            .collect();
        related.sort_by(|x, y| y.strength.cmp(&x.strength).then_with(|| x.topic.cmp(&y.topic)));
        related.truncate(limit);
        Ok(related)
    }

    async fn record_outcome(&self, outcome: &OutcomeRecord) -> Result<()> {
        self.check_available()?;
        self.state.write().outcomes.push(outcome.clone());
        Ok(())
    }

    async fn outcomes(&self, limit: usize) -> Result<Vec<OutcomeRecord>> {
        self.check_available()?;
        let state = self.state.read();
        let skip = state.outcomes.len().saturating_sub(limit);
        Ok(state.outcomes[skip..].to_vec())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use chrono::{Duration as ChronoDuration, Utc};
    use memoria_core::Topics;
    use std::collections::BTreeSet;

    fn record(conversation: &str, topics: &[(&str, f64)], age_secs: i64) -> SummaryRecord {
        SummaryRecord {
            segment_id: SegmentId::new(),
            conversation_id: ConversationId::from(conversation),
            summary_text: format!("summary of {topics:?}"),
            topics: Topics::from_weights(topics.iter().map(|(t, w)| (*t, *w))),
            original_token_count: 40,
            modalities: BTreeSet::new(),
            created_at: Utc::now() - ChronoDuration::seconds(age_secs),
        }
    }

    #[tokio::test]
    async fn put_then_get() {
        let store = InMemorySummaryStore::new();
        let r = record("c1", &[("billing", 1.0)], 0);
        store.put(&r).await.unwrap();
        assert_eq!(store.get(&r.segment_id).await.unwrap(), r);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn get_missing_is_not_found() {
        let store = InMemorySummaryStore::new();
        let id = SegmentId::from("nope");
        assert_matches!(
            store.get(&id).await,
            Err(StoreError::NotFound { segment_id }) if segment_id == id
        );
    }

    #[tokio::test]
    async fn put_is_idempotent() {
        let store = InMemorySummaryStore::new();
        let r = record("c1", &[("billing", 0.5), ("refund", 0.5)], 0);
        store.put(&r).await.unwrap();
        let mut changed = r.clone();
        changed.summary_text = "different".into();
        store.put(&changed).await.unwrap();
        assert_eq!(store.get(&r.segment_id).await.unwrap().summary_text, r.summary_text);
        let related = store.related_topics("billing", 5).await.unwrap();
        assert_eq!(related[0].strength, 1);
    }

    #[tokio::test]
    async fn scan_filters_by_topic_and_conversation() {
        let store = InMemorySummaryStore::new();
        let old = record("c1", &[("billing", 0.8)], 60);
        let new = record("c1", &[("billing", 0.2), ("login", 0.8)], 0);
        let other_conv = record("c2", &[("billing", 1.0)], 0);
        let unrelated = record("c1", &[("weather", 1.0)], 0);
        for r in [&old, &new, &other_conv, &unrelated] {
            store.put(r).await.unwrap();
        }

        let q = TopicQuery::from_text("billing").in_conversation(ConversationId::from("c1"));
        let hits = store.scan(&q, 10).await.unwrap();
        let ids: Vec<_> = hits.iter().map(|r| r.segment_id.clone()).collect();
        assert_eq!(ids, vec![new.segment_id.clone(), old.segment_id.clone()]);

        let limited = store.scan(&q, 1).await.unwrap();
        assert_eq!(limited.len(), 1);
    }

    #[tokio::test]
    async fn empty_query_matches_nothing() {
        let store = InMemorySummaryStore::new();
        store.put(&record("c1", &[("billing", 1.0)], 0)).await.unwrap();
        assert!(store.scan(&TopicQuery::default(), 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn injected_failures_are_transient_and_counted() {
        let store = InMemorySummaryStore::new();
        store.fail_next_puts(2);
        let r = record("c1", &[("billing", 1.0)], 0);
        assert_matches!(store.put(&r).await, Err(StoreError::Transient(_)));
        assert_matches!(store.put(&r).await, Err(StoreError::Transient(_)));
        store.put(&r).await.unwrap();
        assert_eq!(store.put_attempts(), 3);
        assert!(store.contains(&r.segment_id));
    }

    #[tokio::test]
    async fn unavailable_blocks_reads() {
        let store = InMemorySummaryStore::new();
        store.set_unavailable(true);
        assert!(store.get(&SegmentId::new()).await.unwrap_err().is_retryable());
        store.set_unavailable(false);
        assert_matches!(store.get(&SegmentId::new()).await, Err(StoreError::NotFound { .. }));
    }

    #[tokio::test]
    async fn delete_conversation_removes_only_that_conversation() {
        let store = InMemorySummaryStore::new();
        store.put(&record("c1", &[("a", 1.0)], 0)).await.unwrap();
        store.put(&record("c1", &[("b", 1.0)], 0)).await.unwrap();
        store.put(&record("c2", &[("a", 1.0)], 0)).await.unwrap();
        let removed = store
            .delete_conversation(&ConversationId::from("c1"))
            .await
            .unwrap();
        assert_eq!(removed, 2);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn outcomes_return_most_recent_oldest_first() {
        let store = InMemorySummaryStore::new();
        for i in 0..5 {
            store
                .record_outcome(&OutcomeRecord {
                    conversation_id: ConversationId::from("c"),
                    action: format!("a{i}"),
                    bucket: "general".into(),
                    success: i % 2 == 0,
                    snapshot: serde_json::Value::Null,
                    recorded_at: Utc::now(),
                })
                .await
                .unwrap();
        }
        let last = store.outcomes(2).await.unwrap();
        let names: Vec<_> = last.iter().map(|o| o.action.as_str()).collect();
        assert_eq!(names, vec!["a3", "a4"]);
    }
}
