//! Runs action-graph operations against one conversation.

use std::sync::Arc;

use async_trait::async_trait;
use memoria_actions::{ContextSnapshot, FailureKind, Operation, OperationExecutor, OperationFailure};
use memoria_context::{ContextError, ContextSource, DegradedReason};
use memoria_core::{SegmentId, TopicQuery};
use memoria_store::StoreError;
use parking_lot::Mutex;
use tracing::debug;

use crate::conversation::Conversation;

fn store_failure_kind(error: &StoreError) -> FailureKind {
    match error {
        StoreError::NotFound { .. } => FailureKind::NotFound,
        StoreError::Timeout { .. } => FailureKind::Timeout,
        StoreError::Transient(_) | StoreError::Unavailable { .. } => FailureKind::StoreUnavailable,
        _ => FailureKind::Other,
    }
}

fn context_failure_kind(error: &ContextError) -> FailureKind {
    match error {
        ContextError::SummaryNotFound { .. } | ContextError::SegmentNotFound { .. } => {
            FailureKind::NotFound
        }
        ContextError::Store { source, .. } => store_failure_kind(source),
        _ => FailureKind::Other,
    }
}

/// [`OperationExecutor`] over a conversation's window and summary store.
///
/// Memory operations act on the window directly. Operations that produce
/// output for the user (`generate_reply`, `ask_clarification`,
/// `confirm_with_user`, `analyze_error`, `notify_user`) are recorded in
/// [`performed`](Self::performed) for the caller to carry out.
pub struct ConversationExecutor {
    conversation: Arc<Conversation>,
    context_tokens: u32,
    found: Mutex<Option<SegmentId>>,
    performed: Mutex<Vec<Operation>>,
}

impl ConversationExecutor {
    /// Executor for `conversation`; recall assembles at most
    /// `context_tokens`.
    #[must_use]
    pub fn new(conversation: Arc<Conversation>, context_tokens: u32) -> Self {
        Self {
            conversation,
            context_tokens,
            found: Mutex::new(None),
            performed: Mutex::new(Vec::new()),
        }
    }

    /// Operations completed so far, in order.
    #[must_use]
    pub fn performed(&self) -> Vec<Operation> {
        self.performed.lock().clone()
    }

    /// Summary located by the last successful `search_memory`.
    #[must_use]
    pub fn found(&self) -> Option<SegmentId> {
        self.found.lock().clone()
    }

    fn fail(operation: Operation, kind: FailureKind, message: impl Into<String>) -> OperationFailure {
        OperationFailure {
            operation,
            kind,
            message: message.into(),
        }
    }

    async fn query(&self, snapshot: &ContextSnapshot) -> TopicQuery {
        let topics = self
            .conversation
            .window()
            .read()
            .await
            .topics_for(&snapshot.last_message);
        if topics.is_empty() {
            TopicQuery::from_topics(snapshot.topics.clone())
        } else {
            TopicQuery::from_topics(topics)
        }
    }

    async fn run(&self, operation: Operation, snapshot: &ContextSnapshot) -> Result<(), OperationFailure> {
        match operation {
            Operation::RecallMemory => {
                let query = self.query(snapshot).await;
                let window = self.conversation.window().read().await;
                let context = window.build_context(&query, self.context_tokens).await;
                if context
                    .iter()
                    .any(|c| matches!(c.source, ContextSource::Recalled { .. }))
                {
                    Ok(())
                } else {
                    Err(Self::fail(operation, FailureKind::NotFound, "no relevant summary"))
                }
            }
            Operation::SearchMemory => {
                let query = self.query(snapshot).await;
                let search = self.conversation.window().read().await.search(&query);
                let hits = search
                    .first(1)
                    .await
                    .map_err(|e| Self::fail(operation, store_failure_kind(&e), e.to_string()))?;
                let hit = hits
                    .into_iter()
                    .next()
                    .ok_or_else(|| Self::fail(operation, FailureKind::NotFound, "no matching summary"))?;
                *self.found.lock() = Some(hit.record.segment_id);
                Ok(())
            }
            Operation::RehydrateSegment => {
                let id = self
                    .found()
                    .ok_or_else(|| Self::fail(operation, FailureKind::NotFound, "nothing to rehydrate"))?;
                let _ = self
                    .conversation
                    .window()
                    .write()
                    .await
                    .rehydrate(&id)
                    .await
                    .map_err(|e| Self::fail(operation, context_failure_kind(&e), e.to_string()))?;
                Ok(())
            }
            Operation::CompactContext => {
                let report = self.conversation.window().write().await.evict_enough().await;
                match report.degraded.map(|d| d.reason) {
                    None => Ok(()),
                    Some(DegradedReason::WatchdogTimeout { timeout_ms }) => Err(Self::fail(
                        operation,
                        FailureKind::Timeout,
                        format!("eviction watchdog fired after {timeout_ms}ms"),
                    )),
                    Some(DegradedReason::StoreFailure { error, .. }) => {
                        Err(Self::fail(operation, FailureKind::StoreUnavailable, error))
                    }
                    Some(DegradedReason::ProtectedOverflow) => Err(Self::fail(
                        operation,
                        FailureKind::Other,
                        "protected segments alone exceed the budget",
                    )),
                }
            }
            // The active window never depends on the store.
            Operation::UseCachedContext
            | Operation::GenerateReply
            | Operation::AskClarification
            | Operation::ConfirmWithUser
            | Operation::AnalyzeError
            | Operation::NotifyUser => Ok(()),
        }
    }
}

#[async_trait]
impl OperationExecutor for ConversationExecutor {
    async fn execute(
        &self,
        operation: Operation,
        snapshot: &ContextSnapshot,
    ) -> Result<(), OperationFailure> {
        if self.conversation.is_cancelled() {
            return Err(Self::fail(operation, FailureKind::Other, "conversation cancelled"));
        }
        self.run(operation, snapshot).await?;
        debug!(conversation_id = %self.conversation.id(), operation = %operation, "operation executed");
        self.performed.lock().push(operation);
        Ok(())
    }
}
