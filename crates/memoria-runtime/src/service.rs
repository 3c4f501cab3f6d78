//! The memory service: conversation registry and external entry points.

use std::sync::Arc;

use dashmap::DashMap;
use memoria_actions::{
    ActionError, ActionGraph, CatalogSpec, ContextSnapshot, ExecutionOutcome, ExecutionReport,
    Operation, OperationRegistry, Prediction, default_catalog, execute_node,
};
use memoria_context::{
    ContextError, ContextSegment, ContextSource, ContextWindowManager, ExtractiveSummarizer,
    IngestOutcome, ResilientStore, Segment, SummaryCache, Summarizer, SummarySearch,
    WindowSnapshot, render_context,
};
use memoria_core::{ConversationId, Role, SegmentId, TopicQuery, Turn};
use memoria_settings::MemoriaSettings;
use memoria_store::{OutcomeRecord, RelatedTopic, StoreError, SummaryStore};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::conversation::Conversation;
use crate::errors::{Result, RuntimeError};
use crate::executor::ConversationExecutor;
use crate::generation::{GenerationClient, GenerationFailure, GenerationRequest, GenerationService};

/// Result of [`MemoryService::respond`].
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    /// The generated assistant turn, already ingested.
    pub reply: Turn,
    /// Context the reply was generated from.
    pub context: Vec<ContextSegment>,
    /// Ingest outcome of the user turn.
    pub submitted: IngestOutcome,
    /// Ingest outcome of the reply.
    pub ingested: IngestOutcome,
}

/// Result of [`MemoryService::execute`].
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Execution {
    /// Strategy trace.
    pub report: ExecutionReport,
    /// Operations the caller still has to deliver, in order.
    pub performed: Vec<Operation>,
}

/// Owns every open conversation and the shared store, cache and
/// summarizer. Conversations never share a lock.
pub struct MemoryService {
    settings: MemoriaSettings,
    store: Arc<dyn SummaryStore>,
    cache: Arc<SummaryCache>,
    summarizer: Arc<dyn Summarizer>,
    catalog: CatalogSpec,
    registry: OperationRegistry,
    generation: GenerationClient,
    conversations: DashMap<ConversationId, Arc<Conversation>>,
}

impl MemoryService {
    /// Build a service over `store` with the built-in catalog and the
    /// extractive summarizer.
    pub fn new(settings: MemoriaSettings, store: Arc<dyn SummaryStore>) -> Result<Self> {
        let _ = ActionGraph::new(&default_catalog(), &OperationRegistry::builtin(), &settings.actions)?;
        Ok(Self {
            cache: Arc::new(SummaryCache::from_settings(&settings.store.cache)),
            summarizer: Arc::new(ExtractiveSummarizer::new(&settings.summary)),
            catalog: default_catalog(),
            registry: OperationRegistry::builtin(),
            generation: GenerationClient::new(&settings.generation),
            conversations: DashMap::new(),
            settings,
            store,
        })
    }

    /// Replace the summarizer for conversations opened from now on.
    #[must_use]
    pub fn with_summarizer(mut self, summarizer: Arc<dyn Summarizer>) -> Self {
        self.summarizer = summarizer;
        self
    }

    /// Replace the action catalog. Validated immediately.
    pub fn with_catalog(mut self, catalog: CatalogSpec, registry: OperationRegistry) -> Result<Self> {
        let _ = ActionGraph::new(&catalog, &registry, &self.settings.actions)?;
        self.catalog = catalog;
        self.registry = registry;
        Ok(self)
    }

    /// Effective settings.
    #[must_use]
    pub fn settings(&self) -> &MemoriaSettings {
        &self.settings
    }

    /// Shared summary cache.
    #[must_use]
    pub fn cache(&self) -> &Arc<SummaryCache> {
        &self.cache
    }

    // ── registry ──

    /// Open `id`, or return it if already open.
    #[instrument(skip(self), fields(conversation_id = %id))]
    pub async fn open(&self, id: &ConversationId) -> Result<Arc<Conversation>> {
        if let Some(existing) = self.conversations.get(id) {
            return Ok(existing.clone());
        }
        let store = ResilientStore::new(self.store.clone(), &self.settings.store)
            .with_cache(self.cache.clone());
        let window =
            ContextWindowManager::new(id.clone(), &self.settings, store.clone(), self.summarizer.clone())?;
        let mut actions = ActionGraph::new(&self.catalog, &self.registry, &self.settings.actions)?;
        if self.settings.actions.seed_from_store {
            self.seed(&store, &mut actions).await;
        }
        let conversation = Arc::new(Conversation::new(window, actions, store));
        let entry = self
            .conversations
            .entry(id.clone())
            .or_insert_with(|| conversation.clone())
            .clone();
        if Arc::ptr_eq(&entry, &conversation) {
            info!(conversation_id = %id, "conversation opened");
        }
        Ok(entry)
    }

    async fn seed(&self, store: &ResilientStore, actions: &mut ActionGraph) {
        match store.outcomes(self.settings.actions.history_limit).await {
            Ok(records) => {
                let seeded = actions.seed(records.into_iter().map(|r| {
                    let snapshot = serde_json::from_value(r.snapshot).unwrap_or_else(|e| {
                        warn!(action = %r.action, error = %e, "unreadable stored snapshot, seeding without it");
                        ContextSnapshot::default()
                    });
                    ExecutionOutcome {
                        snapshot,
                        action: r.action,
                        bucket: r.bucket.into(),
                        success: r.success,
                        timestamp: r.recorded_at,
                    }
                }));
                debug!(seeded, "action history seeded from store");
            }
            Err(e) => warn!(error = %e, "could not seed action history"),
        }
    }

    /// An open conversation.
    pub fn conversation(&self, id: &ConversationId) -> Result<Arc<Conversation>> {
        self.conversations
            .get(id)
            .map(|c| c.clone())
            .ok_or_else(|| RuntimeError::ConversationNotFound(id.clone()))
    }

    /// IDs of open conversations, sorted.
    #[must_use]
    pub fn conversations(&self) -> Vec<ConversationId> {
        let mut ids: Vec<_> = self.conversations.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    /// Cancel in-flight work of `id` and drop it. Stored summaries are kept.
    #[instrument(skip(self), fields(conversation_id = %id))]
    pub fn teardown(&self, id: &ConversationId) -> Result<()> {
        let (_, conversation) = self
            .conversations
            .remove(id)
            .ok_or_else(|| RuntimeError::ConversationNotFound(id.clone()))?;
        conversation.cancellation().cancel();
        info!(conversation_id = %id, "conversation torn down");
        Ok(())
    }

    /// Tear down `id` (if open) and delete its stored summaries.
    #[instrument(skip(self), fields(conversation_id = %id))]
    pub async fn forget(&self, id: &ConversationId) -> Result<usize> {
        if let Some((_, conversation)) = self.conversations.remove(id) {
            conversation.cancellation().cancel();
        }
        let removed = ResilientStore::new(self.store.clone(), &self.settings.store)
            .with_cache(self.cache.clone())
            .delete_conversation(id)
            .await?;
        info!(conversation_id = %id, removed, "conversation forgotten");
        Ok(removed)
    }

    /// Tear down every conversation.
    pub fn shutdown(&self) {
        for entry in &self.conversations {
            entry.value().cancellation().cancel();
        }
        self.conversations.clear();
    }

    // ── ingestion ──

    /// Ingest `turn`, opening the conversation if needed.
    ///
    /// A turn too large for a single segment fails with `CapacityExceeded`
    /// and changes nothing. A window left over budget is reported on the
    /// outcome, not as an error.
    #[instrument(skip(self, turn), fields(conversation_id = %id, turn_id = %turn.id(), tokens = turn.token_count()))]
    pub async fn submit(&self, id: &ConversationId, turn: Turn) -> Result<IngestOutcome> {
        let conversation = self.open(id).await?;
        Self::submit_to(&conversation, turn).await
    }

    async fn submit_to(conversation: &Conversation, turn: Turn) -> Result<IngestOutcome> {
        if conversation.is_cancelled() {
            return Err(RuntimeError::Cancelled(conversation.id().clone()));
        }
        let user_text = (turn.role() == Role::User).then(|| turn.textual());
        let outcome = conversation.window().write().await.ingest(turn).await;
        let outcome = Self::guard(conversation, outcome)?;
        if let Some(text) = user_text {
            conversation.note_user_message(text);
        }
        if let Some(degraded) = &outcome.degraded {
            warn!(
                conversation_id = %conversation.id(),
                active_tokens = degraded.active_tokens,
                budget = degraded.budget,
                "window degraded after ingest"
            );
        }
        Ok(outcome)
    }

    fn guard<T>(conversation: &Conversation, result: memoria_context::Result<T>) -> Result<T> {
        match result {
            Err(ContextError::Store {
                source: StoreError::Cancelled { .. },
                ..
            }) => Err(RuntimeError::Cancelled(conversation.id().clone())),
            Err(e) if conversation.is_cancelled() => {
                debug!(error = %e, "error after cancellation");
                Err(RuntimeError::Cancelled(conversation.id().clone()))
            }
            other => other.map_err(RuntimeError::from),
        }
    }

    // ── context ──

    /// Context for the latest user turn, within `max_tokens`.
    pub async fn get_context(&self, id: &ConversationId, max_tokens: u32) -> Result<Vec<ContextSegment>> {
        let conversation = self.conversation(id)?;
        let message = conversation.last_user_message();
        let query = TopicQuery::from_topics(conversation.window().read().await.topics_for(&message));
        self.assemble(&conversation, &query, max_tokens).await
    }

    /// Context for an explicit query, within `max_tokens`.
    pub async fn get_context_for(
        &self,
        id: &ConversationId,
        query: &TopicQuery,
        max_tokens: u32,
    ) -> Result<Vec<ContextSegment>> {
        let conversation = self.conversation(id)?;
        self.assemble(&conversation, query, max_tokens).await
    }

    #[instrument(skip(self, conversation, query), fields(conversation_id = %conversation.id()))]
    async fn assemble(
        &self,
        conversation: &Conversation,
        query: &TopicQuery,
        max_tokens: u32,
    ) -> Result<Vec<ContextSegment>> {
        if conversation.is_cancelled() {
            return Err(RuntimeError::Cancelled(conversation.id().clone()));
        }
        let context = if self.settings.context.touch_on_read {
            let mut window = conversation.window().write().await;
            let context = window.build_context(query, max_tokens).await;
            let active: Vec<SegmentId> = context
                .iter()
                .filter(|c| !matches!(c.source, ContextSource::Recalled { .. }))
                .map(|c| c.segment.id().clone())
                .collect();
            let _ = window.record_access(&active);
            context
        } else {
            conversation.window().read().await.build_context(query, max_tokens).await
        };
        debug!(segments = context.len(), "context assembled");
        Ok(context)
    }

    /// Point-in-time view of the window.
    pub async fn window_snapshot(&self, id: &ConversationId) -> Result<WindowSnapshot> {
        let conversation = self.conversation(id)?;
        let snapshot = conversation.window().read().await.snapshot();
        Ok(snapshot)
    }

    /// Snapshot of the conversation for action prediction.
    pub async fn snapshot(&self, id: &ConversationId) -> Result<ContextSnapshot> {
        let conversation = self.conversation(id)?;
        Ok(conversation.snapshot(self.settings.topics.max_topics).await)
    }

    // ── search & rehydration ──

    /// Restartable search over this conversation's stored summaries.
    #[instrument(skip(self, query), fields(conversation_id = %id))]
    pub async fn search(&self, id: &ConversationId, query: &TopicQuery) -> Result<SummarySearch> {
        let conversation = self.conversation(id)?;
        let search = conversation.window().read().await.search(query);
        Ok(search)
    }

    /// Topics that co-occurred with `topic` in stored summaries.
    pub async fn related_topics(&self, topic: &str, limit: usize) -> Result<Vec<RelatedTopic>> {
        let related = ResilientStore::new(self.store.clone(), &self.settings.store)
            .related_topics(topic, limit)
            .await?;
        Ok(related)
    }

    /// Bring a stored summary back into the active window.
    #[instrument(skip(self), fields(conversation_id = %id, summary_id = %summary_id))]
    pub async fn rehydrate(&self, id: &ConversationId, summary_id: &SegmentId) -> Result<Segment> {
        let conversation = self.conversation(id)?;
        let segment = conversation.window().write().await.rehydrate(summary_id).await;
        Self::guard(&conversation, segment)
    }

    // ── actions ──

    /// Rank the next actions for `snapshot`.
    #[instrument(skip(self, snapshot), fields(conversation_id = %id))]
    pub fn predict(&self, id: &ConversationId, snapshot: &ContextSnapshot) -> Result<Prediction> {
        let conversation = self.conversation(id)?;
        let prediction = conversation.actions().read().predict(snapshot);
        Ok(prediction)
    }

    /// Record whether `action` succeeded. The outcome is also appended to
    /// the store's feedback log; a failure there is logged, not returned.
    #[instrument(skip(self), fields(conversation_id = %id))]
    pub async fn report_outcome(
        &self,
        id: &ConversationId,
        action: &str,
        success: bool,
    ) -> Result<ExecutionOutcome> {
        let conversation = self.conversation(id)?;
        let snapshot = conversation.snapshot(self.settings.topics.max_topics).await;
        let outcome = conversation
            .actions()
            .write()
            .report_outcome(action, success, snapshot)?;
        let record = OutcomeRecord {
            conversation_id: id.clone(),
            action: outcome.action.clone(),
            bucket: outcome.bucket.as_str().to_owned(),
            success,
            snapshot: serde_json::to_value(&outcome.snapshot).unwrap_or_else(|e| {
                warn!(action, error = %e, "could not serialize outcome snapshot");
                serde_json::Value::Null
            }),
            recorded_at: outcome.timestamp,
        };
        if let Err(e) = conversation.store().record_outcome(&record).await {
            warn!(conversation_id = %id, action, error = %e, "could not persist action outcome");
        }
        Ok(outcome)
    }

    /// Execute `action` against the conversation: primary strategy, then
    /// fallbacks in order.
    #[instrument(skip(self), fields(conversation_id = %id))]
    pub async fn execute(&self, id: &ConversationId, action: &str) -> Result<Execution> {
        let conversation = self.conversation(id)?;
        let snapshot = conversation.snapshot(self.settings.topics.max_topics).await;
        let node = conversation.actions().read().node(action).cloned().ok_or_else(|| {
            ActionError::UnknownAction {
                action: action.to_owned(),
            }
        })?;
        let executor =
            ConversationExecutor::new(conversation.clone(), self.settings.generation.context_tokens);
        let report = execute_node(&node, &snapshot, &executor).await?;
        Ok(Execution {
            report,
            performed: executor.performed(),
        })
    }

    // ── generation ──

    /// Submit `turn`, assemble context for it, generate a reply and ingest
    /// the reply.
    #[instrument(skip(self, turn, generation), fields(conversation_id = %id, turn_id = %turn.id()))]
    pub async fn respond(
        &self,
        id: &ConversationId,
        turn: Turn,
        generation: &dyn GenerationService,
    ) -> Result<Response> {
        let conversation = self.open(id).await?;
        let message = turn.textual();
        let submitted = Self::submit_to(&conversation, turn).await?;

        let query = TopicQuery::from_topics(conversation.window().read().await.topics_for(&message));
        let context = self
            .assemble(&conversation, &query, self.settings.generation.context_tokens)
            .await?;
        let request = GenerationRequest {
            conversation_id: id.clone(),
            context: render_context(&context),
            message,
        };
        let text = self
            .generation
            .generate(generation, &request, conversation.cancellation())
            .await
            .map_err(|failure| match failure {
                GenerationFailure::Cancelled => RuntimeError::Cancelled(id.clone()),
                GenerationFailure::Failed { attempts, error } => RuntimeError::Generation {
                    conversation_id: id.clone(),
                    attempts,
                    source: error,
                },
            })?;

        let reply = Turn::text(Role::Assistant, text);
        let ingested = Self::submit_to(&conversation, reply.clone()).await?;
        Ok(Response {
            reply,
            context,
            submitted,
            ingested,
        })
    }
}

impl std::fmt::Debug for MemoryService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryService")
            .field("conversations", &self.conversations.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::{GenerationError, MockGenerationService};
    use assert_matches::assert_matches;
    use memoria_actions::Operation;
    use memoria_store::InMemorySummaryStore;

    fn settings() -> MemoriaSettings {
        let mut settings = MemoriaSettings::default();
        settings.context.token_budget = 10;
        settings.context.protected_window = 1;
        settings.context.segment_token_cap = 8;
        settings.context.hard_token_cap = 8;
        settings
    }

    fn service_over(store: &Arc<InMemorySummaryStore>, settings: MemoriaSettings) -> MemoryService {
        let inner: Arc<dyn SummaryStore> = store.clone();
        MemoryService::new(settings, inner).unwrap()
    }

    fn service() -> (Arc<InMemorySummaryStore>, MemoryService) {
        let store = Arc::new(InMemorySummaryStore::new());
        let service = service_over(&store, settings());
        (store, service)
    }

    fn cid(s: &str) -> ConversationId {
        ConversationId::from(s)
    }

    // ── registry ──

    #[tokio::test]
    async fn submit_opens_and_other_calls_require_open() {
        let (_store, service) = service();
        assert_matches!(
            service.get_context(&cid("c1"), 100).await,
            Err(RuntimeError::ConversationNotFound(_))
        );
        let _ = service.submit(&cid("c1"), Turn::text(Role::User, "hello there")).await.unwrap();
        assert_eq!(service.conversations(), vec![cid("c1")]);
        let context = service.get_context(&cid("c1"), 100).await.unwrap();
        assert_eq!(context.len(), 1);
    }

    #[tokio::test]
    async fn open_is_idempotent() {
        let (_store, service) = service();
        let a = service.open(&cid("c1")).await.unwrap();
        let b = service.open(&cid("c1")).await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[tokio::test]
    async fn teardown_cancels_and_forgets_the_conversation() {
        let (_store, service) = service();
        let conversation = service.open(&cid("c1")).await.unwrap();
        service.teardown(&cid("c1")).unwrap();
        assert!(conversation.is_cancelled());
        assert_matches!(
            service.teardown(&cid("c1")),
            Err(RuntimeError::ConversationNotFound(_))
        );
    }

    #[tokio::test]
    async fn forget_deletes_stored_summaries() {
        let (store, service) = service();
        for text in ["billing invoice overdue", "weather forecast sunny"] {
            let _ = service.submit(&cid("c1"), Turn::text(Role::User, text)).await.unwrap();
        }
        assert_eq!(store.len(), 1);
        assert_eq!(service.forget(&cid("c1")).await.unwrap(), 1);
        assert!(store.is_empty());
        assert!(service.conversations().is_empty());
    }

    // ── ingestion ──

    #[tokio::test]
    async fn oversized_turn_is_rejected_without_side_effects() {
        let (_store, service) = service();
        let _ = service.open(&cid("c1")).await.unwrap();
        let big = Turn::text(Role::User, "x".repeat(64));
        let err = service.submit(&cid("c1"), big).await.unwrap_err();
        assert_eq!(err.category(), "capacity_exceeded");
        let view = service.window_snapshot(&cid("c1")).await.unwrap();
        assert_eq!(view.segment_count, 0);
        assert_eq!(view.turns, 0);
    }

    #[tokio::test]
    async fn eviction_is_reported_on_the_outcome() {
        let (store, service) = service();
        let first = service
            .submit(&cid("c1"), Turn::text(Role::User, "billing invoice overdue"))
            .await
            .unwrap();
        let second = service
            .submit(&cid("c1"), Turn::text(Role::User, "weather forecast sunny"))
            .await
            .unwrap();
        assert_eq!(second.evicted, vec![first.segment_id.clone()]);
        assert!(second.degraded.is_none());
        assert!(store.contains(&first.segment_id));
    }

    // ── actions ──

    #[tokio::test]
    async fn outcomes_are_persisted_and_unknown_actions_rejected() {
        let (store, service) = service();
        let _ = service.open(&cid("c1")).await.unwrap();
        let outcome = service.report_outcome(&cid("c1"), "generate_reply", true).await.unwrap();
        assert!(outcome.bucket.is_general());
        let persisted = store.outcomes(10).await.unwrap();
        assert_eq!(persisted.len(), 1);
        assert_eq!(persisted[0].action, "generate_reply");

        assert_matches!(
            service.report_outcome(&cid("c1"), "format_disk", true).await,
            Err(RuntimeError::Action(_))
        );
    }

    #[tokio::test]
    async fn new_conversations_can_seed_from_stored_outcomes() {
        let store = Arc::new(InMemorySummaryStore::new());
        let first = service_over(&store, settings());
        let _ = first.open(&cid("c1")).await.unwrap();
        for _ in 0..3 {
            let _ = first.report_outcome(&cid("c1"), "generate_reply", true).await.unwrap();
        }

        let mut seeded_settings = settings();
        seeded_settings.actions.seed_from_store = true;
        let second = service_over(&store, seeded_settings);
        let conversation = second.open(&cid("c2")).await.unwrap();
        assert_eq!(conversation.actions().read().history().len(), 3);
    }

    #[tokio::test]
    async fn corrupt_stored_snapshot_still_seeds_the_outcome() {
        let store = Arc::new(InMemorySummaryStore::new());
        let first = service_over(&store, settings());
        let _ = first.open(&cid("c1")).await.unwrap();
        let _ = first.report_outcome(&cid("c1"), "generate_reply", false).await.unwrap();
        let mut corrupt = store.outcomes(1).await.unwrap().remove(0);
        corrupt.snapshot = serde_json::json!("not a snapshot");
        store.record_outcome(&corrupt).await.unwrap();

        let mut seeded_settings = settings();
        seeded_settings.actions.seed_from_store = true;
        let second = service_over(&store, seeded_settings);
        let conversation = second.open(&cid("c2")).await.unwrap();
        let actions = conversation.actions().read();
        assert_eq!(actions.history().len(), 2);
        let last = actions.history().iter().last().unwrap();
        assert_eq!(last.snapshot, ContextSnapshot::default());
        assert!(!last.success);
    }

    #[tokio::test]
    async fn snapshot_facts_follow_the_window() {
        let (_store, service) = service();
        let _ = service.submit(&cid("c1"), Turn::text(Role::User, "billing invoice overdue")).await.unwrap();
        let snapshot = service.snapshot(&cid("c1")).await.unwrap();
        assert!(!snapshot.fact("has_evicted"));
        let _ = service.submit(&cid("c1"), Turn::text(Role::User, "weather forecast sunny")).await.unwrap();
        let snapshot = service.snapshot(&cid("c1")).await.unwrap();
        assert!(snapshot.fact("has_evicted"));
        assert!(!snapshot.fact("store_degraded"));
        assert_eq!(snapshot.last_message, "weather forecast sunny");
    }

    #[tokio::test]
    async fn recall_action_runs_against_the_window() {
        let (_store, service) = service();
        for text in [
            "billing invoice overdue",
            "weather forecast sunny",
            "billing invoice question",
        ] {
            let _ = service.submit(&cid("c1"), Turn::text(Role::User, text)).await.unwrap();
        }
        let snapshot = service.snapshot(&cid("c1")).await.unwrap();
        let prediction = service.predict(&cid("c1"), &snapshot).unwrap();
        assert_eq!(prediction.bucket.as_str(), "recall");

        let execution = service.execute(&cid("c1"), "recall_memory").await.unwrap();
        assert_eq!(execution.report.strategy, "recall_then_reply");
        assert_eq!(
            execution.performed,
            vec![Operation::RecallMemory, Operation::GenerateReply]
        );
    }

    // ── generation ──

    #[tokio::test]
    async fn respond_generates_from_context_and_ingests_reply() {
        let (_store, service) = service();
        let mut generator = MockGenerationService::new();
        let _ = generator
            .expect_generate()
            .withf(|request| request.context.contains("user: hello there") && request.message == "hello there")
            .times(1)
            .returning(|_| Ok("hi".into()));

        let response = service
            .respond(&cid("c1"), Turn::text(Role::User, "hello there"), &generator)
            .await
            .unwrap();
        assert_eq!(response.reply.role(), Role::Assistant);
        assert_eq!(response.submitted.segment_id, response.ingested.segment_id);
        let view = service.window_snapshot(&cid("c1")).await.unwrap();
        assert_eq!(view.turns, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn respond_surfaces_generation_failure_after_one_retry() {
        let (_store, service) = service();
        let mut generator = MockGenerationService::new();
        let _ = generator.expect_generate().times(2).returning(|_| {
            Err(GenerationError::Service {
                message: "overloaded".into(),
                retryable: true,
            })
        });
        let err = service
            .respond(&cid("c1"), Turn::text(Role::User, "hello"), &generator)
            .await
            .unwrap_err();
        assert_matches!(err, RuntimeError::Generation { attempts: 2, .. });
        // The user turn stays ingested.
        assert_eq!(service.window_snapshot(&cid("c1")).await.unwrap().turns, 1);
    }
}
