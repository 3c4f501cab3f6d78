//! The persistent store contract.

use std::sync::Arc;

use async_trait::async_trait;
use memoria_core::{ConversationId, SegmentId, SummaryRecord, TopicQuery};

use crate::errors::Result;
use crate::types::{OutcomeRecord, RelatedTopic};

/// Durable home for summaries of evicted segments.
///
/// Implementations must make `put` atomic (the whole record or nothing) and
/// idempotent by segment ID: a second `put` of the same ID leaves the first
/// record untouched.
#[async_trait]
pub trait SummaryStore: Send + Sync {
    /// Persist a summary record.
    async fn put(&self, record: &SummaryRecord) -> Result<()>;

    /// Fetch a record by segment ID. Missing records yield
    /// [`StoreError::NotFound`](crate::StoreError::NotFound).
    async fn get(&self, segment_id: &SegmentId) -> Result<SummaryRecord>;

    /// Records sharing at least one topic with the query, most recent first,
    /// at most `limit` of them. An empty query matches nothing.
    async fn scan(&self, query: &TopicQuery, limit: usize) -> Result<Vec<SummaryRecord>>;

    /// Remove every summary of a conversation. Returns the number removed.
    async fn delete_conversation(&self, conversation_id: &ConversationId) -> Result<usize>;

    /// Topics that most often co-occur with `topic`, strongest first.
    async fn related_topics(&self, topic: &str, limit: usize) -> Result<Vec<RelatedTopic>>;

    /// Append an action outcome to the feedback log.
    async fn record_outcome(&self, outcome: &OutcomeRecord) -> Result<()>;

    /// The most recent `limit` outcomes, oldest first.
    async fn outcomes(&self, limit: usize) -> Result<Vec<OutcomeRecord>>;
}

#[async_trait]
impl<T: SummaryStore + ?Sized> SummaryStore for Arc<T> {
    async fn put(&self, record: &SummaryRecord) -> Result<()> {
        (**self).put(record).await
    }

    async fn get(&self, segment_id: &SegmentId) -> Result<SummaryRecord> {
        (**self).get(segment_id).await
    }

    async fn scan(&self, query: &TopicQuery, limit: usize) -> Result<Vec<SummaryRecord>> {
        (**self).scan(query, limit).await
    }

    async fn delete_conversation(&self, conversation_id: &ConversationId) -> Result<usize> {
        (**self).delete_conversation(conversation_id).await
    }

    async fn related_topics(&self, topic: &str, limit: usize) -> Result<Vec<RelatedTopic>> {
        (**self).related_topics(topic, limit).await
    }

    async fn record_outcome(&self, outcome: &OutcomeRecord) -> Result<()> {
        (**self).record_outcome(outcome).await
    }

    async fn outcomes(&self, limit: usize) -> Result<Vec<OutcomeRecord>> {
        (**self).outcomes(limit).await
    }
}

/// Unordered topic pairs `(a, b)` with `a < b` for a record's topics.
pub(crate) fn topic_pairs(record: &SummaryRecord) -> Vec<(String, String)> {
    let terms: Vec<&str> = record.topics.terms().collect();
    let mut pairs = Vec::new();
    for (i, a) in terms.iter().enumerate() {
        for b in &terms[i + 1..] {
            pairs.push(((*a).to_owned(), (*b).to_owned()));
        }
    }
    pairs
}
