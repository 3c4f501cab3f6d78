//! `SQLite`-backed [`SummaryStore`].
//!
//! Every write runs inside one transaction, so a record, its topic index
//! rows and its co-occurrence updates land together or not at all. Blocking
//! database work is moved off the async runtime with `spawn_blocking`.

use std::path::Path;

use async_trait::async_trait;
use memoria_core::{ConversationId, SegmentId, SummaryRecord, TopicQuery};
use rusqlite::Connection;
use tracing::{debug, info};

use super::connection::{self, ConnectionConfig, ConnectionPool};
use super::migrations::run_migrations;
use super::repositories::outcome::OutcomeRepo;
use super::repositories::summary::SummaryRepo;
use super::repositories::topic::TopicRepo;
use crate::errors::{Result, StoreError};
use crate::store::SummaryStore;
use crate::types::{OutcomeRecord, RelatedTopic};

/// Summary store over an r2d2 `SQLite` pool.
#[derive(Clone)]
pub struct SqliteSummaryStore {
    pool: ConnectionPool,
}

impl SqliteSummaryStore {
    /// Open (or create) a database file and apply pending migrations.
    pub fn open(path: &Path, config: &ConnectionConfig) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::Internal(format!("cannot create {}: {e}", parent.display())))?;
        }
        let path_str = path.to_string_lossy();
        let pool = connection::new_file(&path_str, config)?;
        info!(path = %path_str, "opened summary database");
        Self::from_pool(pool)
    }

    /// Private in-memory database (lost on drop).
    pub fn open_in_memory() -> Result<Self> {
        Self::from_pool(connection::new_in_memory(&ConnectionConfig::default())?)
    }

    /// Wrap an existing pool and apply pending migrations.
    pub fn from_pool(pool: ConnectionPool) -> Result<Self> {
        let conn = pool.get()?;
        let applied = run_migrations(&conn)?;
        debug!(applied, "summary schema ready");
        drop(conn);
        Ok(Self { pool })
    }

    async fn with_conn<T, F>(&self, operation: &'static str, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let conn = pool.get()?;
            f(&conn)
        })
        .await
        .map_err(|e| StoreError::Internal(format!("{operation} task failed: {e}")))?
    }
}

#[async_trait]
impl SummaryStore for SqliteSummaryStore {
    async fn put(&self, record: &SummaryRecord) -> Result<()> {
        let record = record.clone();
        self.with_conn("put", move |conn| {
            let tx = conn.unchecked_transaction()?;
            if SummaryRepo::insert(&tx, &record)? {
                TopicRepo::index(&tx, &record)?;
                TopicRepo::strengthen_pairs(&tx, &record)?;
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn get(&self, segment_id: &SegmentId) -> Result<SummaryRecord> {
        let id = segment_id.clone();
        self.with_conn("get", move |conn| {
            SummaryRepo::get(conn, &id)?.ok_or(StoreError::NotFound { segment_id: id })
        })
        .await
    }

    async fn scan(&self, query: &TopicQuery, limit: usize) -> Result<Vec<SummaryRecord>> {
        let query = query.clone();
        self.with_conn("scan", move |conn| SummaryRepo::scan(conn, &query, limit))
            .await
    }

    async fn delete_conversation(&self, conversation_id: &ConversationId) -> Result<usize> {
        let id = conversation_id.clone();
        self.with_conn("delete_conversation", move |conn| {
            SummaryRepo::delete_conversation(conn, &id)
        })
        .await
    }

    async fn related_topics(&self, topic: &str, limit: usize) -> Result<Vec<RelatedTopic>> {
        let topic = topic.to_owned();
        self.with_conn("related_topics", move |conn| {
            TopicRepo::related(conn, &topic, limit)
        })
        .await
    }

    async fn record_outcome(&self, outcome: &OutcomeRecord) -> Result<()> {
        let outcome = outcome.clone();
        self.with_conn("record_outcome", move |conn| {
            OutcomeRepo::insert(conn, &outcome)
        })
        .await
    }

    async fn outcomes(&self, limit: usize) -> Result<Vec<OutcomeRecord>> {
        self.with_conn("outcomes", move |conn| OutcomeRepo::recent(conn, limit))
            .await
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use chrono::Utc;
    use memoria_core::Topics;
    use std::collections::BTreeSet;

    fn record(conversation: &str, topics: &[(&str, f64)]) -> SummaryRecord {
        SummaryRecord {
            segment_id: SegmentId::new(),
            conversation_id: ConversationId::from(conversation),
            summary_text: "assistant: explained the invoice".into(),
            topics: Topics::from_weights(topics.iter().map(|(t, w)| (*t, *w))),
            original_token_count: 64,
            modalities: BTreeSet::new(),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn put_get_scan_in_memory() {
        let store = SqliteSummaryStore::open_in_memory().unwrap();
        let billing = record("c1", &[("billing", 0.8), ("invoice", 0.2)]);
        let weather = record("c1", &[("weather", 1.0)]);
        store.put(&billing).await.unwrap();
        store.put(&weather).await.unwrap();

        assert_eq!(store.get(&billing.segment_id).await.unwrap(), billing);
        let hits = store.scan(&TopicQuery::from_text("billing"), 10).await.unwrap();
        assert_eq!(hits, vec![billing]);
    }

    #[tokio::test]
    async fn missing_record_is_not_found() {
        let store = SqliteSummaryStore::open_in_memory().unwrap();
        assert_matches!(
            store.get(&SegmentId::from("gone")).await,
            Err(StoreError::NotFound { .. })
        );
    }

    #[tokio::test]
    async fn repeated_put_does_not_double_count_relationships() {
        let store = SqliteSummaryStore::open_in_memory().unwrap();
        let r = record("c1", &[("billing", 0.5), ("refund", 0.5)]);
        store.put(&r).await.unwrap();
        store.put(&r).await.unwrap();
        let related = store.related_topics("billing", 5).await.unwrap();
        assert_eq!(related.len(), 1);
        assert_eq!(related[0].strength, 1);
    }

    #[tokio::test]
    async fn file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("memoria.db");
        let r = record("c1", &[("billing", 1.0)]);
        {
            let store = SqliteSummaryStore::open(&path, &ConnectionConfig::default()).unwrap();
            store.put(&r).await.unwrap();
        }
        let reopened = SqliteSummaryStore::open(&path, &ConnectionConfig::default()).unwrap();
        assert_eq!(reopened.get(&r.segment_id).await.unwrap(), r);
    }

    #[tokio::test]
    async fn delete_conversation_and_outcomes() {
        let store = SqliteSummaryStore::open_in_memory().unwrap();
        store.put(&record("c1", &[("a1x", 1.0)])).await.unwrap();
        store.put(&record("c2", &[("a1x", 1.0)])).await.unwrap();
        assert_eq!(
            store
                .delete_conversation(&ConversationId::from("c1"))
                .await
                .unwrap(),
            1
        );

        store
            .record_outcome(&OutcomeRecord {
                conversation_id: ConversationId::from("c2"),
                action: "recall_memory".into(),
                bucket: "recall".into(),
                success: true,
                snapshot: serde_json::json!({}),
                recorded_at: Utc::now(),
            })
            .await
            .unwrap();
        let outcomes = store.outcomes(10).await.unwrap();
        assert_eq!(outcomes.len(), 1);
        assert!(outcomes[0].success);
    }
}
