//! End-to-end behavior of the memory service over real stores.

use std::sync::Arc;
use std::time::Duration;

use futures::TryStreamExt;
use memoria_core::{ConversationId, Role, TopicQuery, Turn};
use memoria_runtime::MemoryService;
use memoria_settings::MemoriaSettings;
use memoria_store::{ConnectionConfig, InMemorySummaryStore, SqliteSummaryStore, SummaryStore};

fn settings(budget: u32, cap: u32) -> MemoriaSettings {
    let mut settings = MemoriaSettings::default();
    settings.context.token_budget = budget;
    settings.context.protected_window = 1;
    settings.context.segment_token_cap = cap;
    settings.context.hard_token_cap = cap;
    settings
}

fn user(text: &str) -> Turn {
    Turn::text(Role::User, text)
}

fn cid(s: &str) -> ConversationId {
    ConversationId::from(s)
}

// =============================================================================
// Isolation
// =============================================================================

#[tokio::test(start_paused = true)]
async fn slow_eviction_in_one_conversation_does_not_block_another() {
    let store = Arc::new(InMemorySummaryStore::new());
    let inner: Arc<dyn SummaryStore> = store.clone();
    let service = Arc::new(MemoryService::new(settings(10, 8), inner).unwrap());

    let _ = service.submit(&cid("a"), user("billing invoice overdue")).await.unwrap();
    store.set_put_delay(Some(Duration::from_millis(500)));

    let svc = service.clone();
    let slow = tokio::spawn(async move { svc.submit(&cid("a"), user("weather forecast sunny")).await });
    tokio::task::yield_now().await;

    // `a` is mid-eviction and holds its window.
    let a = service.conversation(&cid("a")).unwrap();
    assert!(a.window().try_read().is_err());

    let started = tokio::time::Instant::now();
    let outcome = service.submit(&cid("b"), user("hello")).await.unwrap();
    assert!(outcome.evicted.is_empty());
    assert_eq!(started.elapsed(), Duration::ZERO);
    assert!(!slow.is_finished());

    let slow = slow.await.unwrap().unwrap();
    assert_eq!(slow.evicted.len(), 1);
}

#[tokio::test]
async fn search_never_crosses_conversations() {
    let store: Arc<dyn SummaryStore> = Arc::new(InMemorySummaryStore::new());
    let service = MemoryService::new(settings(10, 8), store).unwrap();
    for conversation in ["a", "b"] {
        let _ = service.submit(&cid(conversation), user("billing invoice overdue")).await.unwrap();
        let _ = service.submit(&cid(conversation), user("weather forecast sunny")).await.unwrap();
    }
    let hits = service
        .search(&cid("a"), &TopicQuery::from_text("billing"))
        .await
        .unwrap()
        .first(10)
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].record.conversation_id, cid("a"));
}

// =============================================================================
// Search
// =============================================================================

#[tokio::test]
async fn billing_search_ranks_billing_summary_above_unrelated() {
    let store: Arc<dyn SummaryStore> = Arc::new(InMemorySummaryStore::new());
    let service = MemoryService::new(settings(12, 16), store).unwrap();
    let conversation = cid("c1");

    let billing = service
        .submit(&conversation, user("billing billing billing billing refund"))
        .await
        .unwrap();
    for text in ["weather forecast sunny", "lunch plans tomorrow", "quarterly report draft"] {
        let _ = service.submit(&conversation, user(text)).await.unwrap();
    }
    let view = service.window_snapshot(&conversation).await.unwrap();
    assert_eq!(view.evicted_count, 2);
    assert!(view.active_tokens <= 12);

    let search = service
        .search(&conversation, &TopicQuery::from_text("billing"))
        .await
        .unwrap();
    let hits: Vec<_> = search.stream().try_collect().await.unwrap();
    assert_eq!(hits[0].record.segment_id, billing.segment_id);
    assert!((hits[0].record.topics.weight("billing") - 0.8).abs() < 1e-6);
    assert!(hits.iter().skip(1).all(|h| h.relevance < hits[0].relevance));

    // Restartable: a second pass yields the same order.
    let again: Vec<_> = search.stream().try_collect().await.unwrap();
    assert_eq!(
        again.iter().map(|h| &h.record.segment_id).collect::<Vec<_>>(),
        hits.iter().map(|h| &h.record.segment_id).collect::<Vec<_>>()
    );
}

// =============================================================================
// Budget
// =============================================================================

#[tokio::test]
async fn budget_holds_under_continuous_ingestion() {
    let store: Arc<dyn SummaryStore> = Arc::new(InMemorySummaryStore::new());
    let service = MemoryService::new(settings(40, 16), store).unwrap();
    let topics = ["billing", "weather", "travel", "recipes", "football", "gardening"];
    for i in 0..60 {
        let text = format!("{} question number {i}", topics[i % topics.len()]);
        let outcome = service.submit(&cid("c1"), user(&text)).await.unwrap();
        assert!(outcome.degraded.is_none(), "turn {i} degraded");
        let view = service.window_snapshot(&cid("c1")).await.unwrap();
        assert!(view.active_tokens <= 40, "turn {i}: {} tokens", view.active_tokens);
    }
}

#[tokio::test]
async fn rehydrated_summary_returns_to_context() {
    let store: Arc<dyn SummaryStore> = Arc::new(InMemorySummaryStore::new());
    let service = MemoryService::new(settings(10, 8), store).unwrap();
    let first = service.submit(&cid("c1"), user("billing invoice overdue")).await.unwrap();
    let _ = service.submit(&cid("c1"), user("weather forecast sunny")).await.unwrap();

    let segment = service.rehydrate(&cid("c1"), &first.segment_id).await.unwrap();
    assert_eq!(segment.rehydrated_from(), Some(&first.segment_id));
    let view = service.window_snapshot(&cid("c1")).await.unwrap();
    assert!(view.active_tokens <= 10 || view.degraded.is_some());
}

// =============================================================================
// Durability
// =============================================================================

#[tokio::test]
async fn summaries_survive_a_new_service_instance() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("memoria.db");
    let billing = {
        let store: Arc<dyn SummaryStore> =
            Arc::new(SqliteSummaryStore::open(&path, &ConnectionConfig::default()).unwrap());
        let service = MemoryService::new(settings(10, 8), store).unwrap();
        let billing = service.submit(&cid("c1"), user("billing invoice overdue")).await.unwrap();
        let _ = service.submit(&cid("c1"), user("weather forecast sunny")).await.unwrap();
        service.shutdown();
        billing
    };

    let store: Arc<dyn SummaryStore> =
        Arc::new(SqliteSummaryStore::open(&path, &ConnectionConfig::default()).unwrap());
    let service = MemoryService::new(settings(10, 8), store).unwrap();
    let _ = service.open(&cid("c1")).await.unwrap();
    let hits = service
        .search(&cid("c1"), &TopicQuery::from_text("invoice"))
        .await
        .unwrap()
        .first(5)
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].record.segment_id, billing.segment_id);
}
