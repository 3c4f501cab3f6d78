//! Topic search over stored summaries.
//!
//! A [`SummarySearch`] is a reusable description of a query. Each call to
//! [`SummarySearch::stream`] rescans the store, so the sequence can be
//! restarted from the beginning at any time. Ordering is deterministic:
//! relevance, then newest first, then ID.

use std::cmp::Ordering;

use async_stream::try_stream;
use futures::{Stream, StreamExt, TryStreamExt};
use memoria_core::{SummaryRecord, TopicQuery};
use memoria_store::StoreError;
use serde::Serialize;

use crate::persistence::ResilientStore;

/// A stored summary with its relevance to the query.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoredSummary {
    /// The record.
    pub record: SummaryRecord,
    /// Topic overlap with the query, in `[0, 1]`.
    pub relevance: f64,
}

fn rank(a: &ScoredSummary, b: &ScoredSummary) -> Ordering {
    b.relevance
        .total_cmp(&a.relevance)
        .then_with(|| b.record.created_at.cmp(&a.record.created_at))
        .then_with(|| a.record.segment_id.cmp(&b.record.segment_id))
}

/// Restartable, relevance-ordered search.
#[derive(Clone, Debug)]
pub struct SummarySearch {
    store: ResilientStore,
    query: TopicQuery,
    scan_limit: usize,
}

impl SummarySearch {
    /// Search `store` for `query`, considering at most `scan_limit` records.
    #[must_use]
    pub fn new(store: ResilientStore, query: TopicQuery, scan_limit: usize) -> Self {
        Self {
            store,
            query,
            scan_limit,
        }
    }

    /// The query being run.
    #[must_use]
    pub fn query(&self) -> &TopicQuery {
        &self.query
    }

    /// Run the search from the start.
    ///
    /// Nothing is read until the stream is first polled. The first poll
    /// scans up to `scan_limit` records and ranks them all, since the order
    /// is global; later items come from that ranked set, not from further
    /// store reads.
    pub fn stream(&self) -> impl Stream<Item = Result<ScoredSummary, StoreError>> + Send + '_ {
        try_stream! {
            if !self.query.is_empty() {
                let records = self.store.scan(&self.query, self.scan_limit).await?;
                let mut scored: Vec<ScoredSummary> = records
                    .into_iter()
                    .map(|record| ScoredSummary {
                        relevance: self.query.relevance(&record.topics),
                        record,
                    })
                    .filter(|s| s.relevance > 0.0)
                    .collect();
                scored.sort_by(rank);
                for hit in scored {
                    yield hit;
                }
            }
        }
    }

    /// The first `limit` results.
    pub async fn first(&self, limit: usize) -> Result<Vec<ScoredSummary>, StoreError> {
        self.stream().take(limit).try_collect().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use memoria_core::{ConversationId, SegmentId, Topics};
    use memoria_settings::StoreSettings;
    use memoria_store::{InMemorySummaryStore, SummaryStore};
    use std::collections::BTreeSet;
    use std::sync::Arc;

    fn record(id: &str, topics: &[(&str, f64)], age_secs: i64) -> SummaryRecord {
        SummaryRecord {
            segment_id: SegmentId::from(id),
            conversation_id: ConversationId::from("c1"),
            summary_text: format!("summary {id}"),
            topics: Topics::from_weights(topics.iter().map(|(t, w)| (*t, *w))).normalized(),
            original_token_count: 10,
            modalities: BTreeSet::new(),
            created_at: Utc::now() - Duration::seconds(age_secs),
        }
    }

    async fn seeded() -> (Arc<InMemorySummaryStore>, ResilientStore) {
        let backend = Arc::new(InMemorySummaryStore::new());
        backend.put(&record("strong", &[("billing", 1.0)], 30)).await.unwrap();
        backend
            .put(&record("weak", &[("billing", 0.2), ("weather", 0.8)], 10))
            .await
            .unwrap();
        backend.put(&record("other", &[("weather", 1.0)], 5)).await.unwrap();
        let inner: Arc<dyn SummaryStore> = backend.clone();
        (backend, ResilientStore::new(inner, &StoreSettings::default()))
    }

    #[tokio::test]
    async fn results_are_ordered_by_relevance() {
        let (_backend, store) = seeded().await;
        let search = SummarySearch::new(store, TopicQuery::from_text("billing"), 100);
        let hits = search.first(10).await.unwrap();
        let ids: Vec<_> = hits.iter().map(|h| h.record.segment_id.as_str()).collect();
        assert_eq!(ids, vec!["strong", "weak"]);
        assert!(hits[0].relevance > hits[1].relevance);
    }

    #[tokio::test]
    async fn stream_restarts_from_the_beginning() {
        let (backend, store) = seeded().await;
        let search = SummarySearch::new(store, TopicQuery::from_text("billing"), 100);
        let first = search.first(1).await.unwrap();
        backend.put(&record("newer", &[("billing", 1.0)], 0)).await.unwrap();
        let again = search.first(2).await.unwrap();
        assert_eq!(first[0].record.segment_id.as_str(), "strong");
        // Equal relevance: newest first.
        assert_eq!(again[0].record.segment_id.as_str(), "newer");
        assert_eq!(again[1].record.segment_id.as_str(), "strong");
    }

    #[tokio::test]
    async fn one_run_ranks_a_single_scan() {
        let (backend, store) = seeded().await;
        let search = SummarySearch::new(store, TopicQuery::from_text("billing"), 100);
        let mut stream = Box::pin(search.stream());
        let first = stream.next().await.unwrap().unwrap();
        backend.put(&record("newer", &[("billing", 1.0)], 0)).await.unwrap();
        let rest: Vec<_> = stream.try_collect().await.unwrap();
        assert_eq!(first.record.segment_id.as_str(), "strong");
        let ids: Vec<_> = rest.iter().map(|h| h.record.segment_id.as_str()).collect();
        assert_eq!(ids, vec!["weak"]);
    }

    #[tokio::test]
    async fn empty_query_yields_nothing() {
        let (_backend, store) = seeded().await;
        let search = SummarySearch::new(store, TopicQuery::from_text("the and"), 100);
        assert!(search.first(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn store_errors_surface_in_stream() {
        let (backend, _) = seeded().await;
        let mut settings = StoreSettings::default();
        settings.retry.max_attempts = 1;
        let inner: Arc<dyn SummaryStore> = backend.clone();
        let store = ResilientStore::new(inner, &settings);
        backend.set_unavailable(true);
        let search = SummarySearch::new(store, TopicQuery::from_text("billing"), 100);
        assert!(search.first(10).await.is_err());
    }
}
