//! Resilient access to the summary store.
//!
//! Every call gets a per-call timeout and a bounded number of attempts with
//! jittered exponential backoff. Cancellation of the owning conversation
//! aborts both the in-flight call and any pending backoff. Reads go through
//! an optional TTL cache; a successful `put` primes it.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use memoria_core::retry::RetryConfig;
use memoria_core::{ConversationId, SegmentId, SummaryRecord, TopicQuery};
use memoria_settings::StoreSettings;
use memoria_store::{OutcomeRecord, RelatedTopic, StoreError, SummaryStore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::cache::SummaryCache;

type StoreResult<T> = std::result::Result<T, StoreError>;

/// Timeout, retry and cancellation wrapper around a [`SummaryStore`].
#[derive(Clone)]
pub struct ResilientStore {
    inner: Arc<dyn SummaryStore>,
    cache: Option<Arc<SummaryCache>>,
    call_timeout: Duration,
    retry: RetryConfig,
    cancel: CancellationToken,
}

impl ResilientStore {
    /// Wrap `inner` with the timeout and retry policy from `settings`.
    #[must_use]
    pub fn new(inner: Arc<dyn SummaryStore>, settings: &StoreSettings) -> Self {
        Self {
            inner,
            cache: None,
            call_timeout: Duration::from_millis(settings.call_timeout_ms.max(1)),
            retry: settings.retry.clone(),
            cancel: CancellationToken::new(),
        }
    }

    /// Share a read cache.
    #[must_use]
    pub fn with_cache(mut self, cache: Arc<SummaryCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Tie every call to `cancel`.
    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// The cancellation token observed by every call.
    #[must_use]
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// The wrapped store.
    #[must_use]
    pub fn inner(&self) -> &Arc<dyn SummaryStore> {
        &self.inner
    }

    // ── store operations ──

    /// Idempotent write.
    pub async fn put(&self, record: &SummaryRecord) -> StoreResult<()> {
        self.call("put", || self.inner.put(record)).await?;
        if let Some(cache) = &self.cache {
            cache.insert(record.segment_id.clone(), record.clone());
        }
        Ok(())
    }

    /// Read by ID, cache first.
    pub async fn get(&self, segment_id: &SegmentId) -> StoreResult<SummaryRecord> {
        if let Some(hit) = self.cache.as_ref().and_then(|c| c.get(segment_id)) {
            debug!(segment_id = %segment_id, "summary cache hit");
            return Ok(hit);
        }
        let record = self.call("get", || self.inner.get(segment_id)).await?;
        if let Some(cache) = &self.cache {
            cache.insert(segment_id.clone(), record.clone());
        }
        Ok(record)
    }

    /// Topic scan.
    pub async fn scan(&self, query: &TopicQuery, limit: usize) -> StoreResult<Vec<SummaryRecord>> {
        self.call("scan", || self.inner.scan(query, limit)).await
    }

    /// Remove a conversation's summaries and drop them from the cache.
    pub async fn delete_conversation(&self, conversation_id: &ConversationId) -> StoreResult<usize> {
        let removed = self
            .call("delete_conversation", || {
                self.inner.delete_conversation(conversation_id)
            })
            .await?;
        if let Some(cache) = &self.cache {
            cache.invalidate_where(|r| &r.conversation_id == conversation_id);
        }
        Ok(removed)
    }

    /// Topics co-occurring with `topic`.
    pub async fn related_topics(&self, topic: &str, limit: usize) -> StoreResult<Vec<RelatedTopic>> {
        self.call("related_topics", || self.inner.related_topics(topic, limit))
            .await
    }

    /// Append an action outcome.
    pub async fn record_outcome(&self, outcome: &OutcomeRecord) -> StoreResult<()> {
        self.call("record_outcome", || self.inner.record_outcome(outcome))
            .await
    }

    /// Newest outcomes, oldest first.
    pub async fn outcomes(&self, limit: usize) -> StoreResult<Vec<OutcomeRecord>> {
        self.call("outcomes", || self.inner.outcomes(limit)).await
    }

    // ── retry loop ──

    async fn call<T, F, Fut>(&self, operation: &'static str, mut attempt_fn: F) -> StoreResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = StoreResult<T>>,
    {
        let max_attempts = self.retry.max_attempts.max(1);
        let timeout_ms = u64::try_from(self.call_timeout.as_millis()).unwrap_or(u64::MAX);
        let mut attempt = 0;
        loop {
            attempt += 1;
            let outcome = tokio::select! {
                () = self.cancel.cancelled() => return Err(StoreError::Cancelled { operation }),
                r = tokio::time::timeout(self.call_timeout, attempt_fn()) => r,
            };
            let err = match outcome {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(e)) => e,
                Err(_) => StoreError::Timeout {
                    operation,
                    timeout_ms,
                },
            };
            if !err.is_retryable() {
                return Err(err);
            }
            if attempt >= max_attempts {
                error!(operation, attempts = attempt, error = %err, "summary store unavailable");
                return Err(StoreError::Unavailable {
                    operation,
                    attempts: attempt,
                    last_error: err.to_string(),
                });
            }
            let delay = self.retry.delay_ms(attempt - 1, rand::random::<f64>());
            warn!(operation, attempt, delay_ms = delay, error = %err, "retrying summary store call");
            tokio::select! {
                () = self.cancel.cancelled() => return Err(StoreError::Cancelled { operation }),
                () = tokio::time::sleep(Duration::from_millis(delay)) => {}
            }
        }
    }
}

impl std::fmt::Debug for ResilientStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResilientStore")
            .field("call_timeout", &self.call_timeout)
            .field("retry", &self.retry)
            .field("cached", &self.cache.is_some())
            .finish_non_exhaustive()
    }
}
