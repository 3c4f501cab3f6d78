//! Per-conversation state owned by the memory service.

use memoria_actions::facts::{HAS_EVICTED, HAS_REHYDRATED, OVER_BUDGET, STORE_DEGRADED};
use memoria_actions::{ActionGraph, ContextSnapshot};
use memoria_context::{ContextWindowManager, DegradedReason, ResilientStore, Segment};
use memoria_core::{ConversationId, Topics};
use parking_lot::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;

/// One open conversation.
///
/// The window sits behind an async lock: mutations (append, evict,
/// rehydrate) hold the write side across their store calls, readers see a
/// consistent set of segments. The action graph is only touched
/// synchronously and uses a plain lock.
pub struct Conversation {
    id: ConversationId,
    window: tokio::sync::RwLock<ContextWindowManager>,
    actions: RwLock<ActionGraph>,
    last_user_message: Mutex<String>,
    store: ResilientStore,
    cancel: CancellationToken,
}

impl Conversation {
    pub(crate) fn new(
        window: ContextWindowManager,
        actions: ActionGraph,
        store: ResilientStore,
    ) -> Self {
        let cancel = store.cancellation().clone();
        Self {
            id: window.conversation_id().clone(),
            window: tokio::sync::RwLock::new(window),
            actions: RwLock::new(actions),
            last_user_message: Mutex::new(String::new()),
            store,
            cancel,
        }
    }

    /// Conversation ID.
    #[must_use]
    pub fn id(&self) -> &ConversationId {
        &self.id
    }

    /// The active window.
    #[must_use]
    pub fn window(&self) -> &tokio::sync::RwLock<ContextWindowManager> {
        &self.window
    }

    /// The action graph.
    #[must_use]
    pub fn actions(&self) -> &RwLock<ActionGraph> {
        &self.actions
    }

    /// Store handle tied to this conversation's cancellation token.
    #[must_use]
    pub fn store(&self) -> &ResilientStore {
        &self.store
    }

    /// Token cancelled on teardown.
    #[must_use]
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Whether teardown has started.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Text of the latest user turn.
    #[must_use]
    pub fn last_user_message(&self) -> String {
        self.last_user_message.lock().clone()
    }

    pub(crate) fn note_user_message(&self, text: String) {
        *self.last_user_message.lock() = text;
    }

    /// Snapshot of the window for action prediction.
    pub async fn snapshot(&self, max_topics: usize) -> ContextSnapshot {
        let window = self.window.read().await;
        snapshot_of(&window, &self.last_user_message(), max_topics)
    }
}

impl std::fmt::Debug for Conversation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Conversation")
            .field("id", &self.id)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

/// Facts, message and dominant topics of `window`.
pub(crate) fn snapshot_of(
    window: &ContextWindowManager,
    message: &str,
    max_topics: usize,
) -> ContextSnapshot {
    let view = window.snapshot();
    let (degraded, store_degraded) = match view.degraded.as_ref().map(|d| &d.reason) {
        None => (false, false),
        Some(DegradedReason::ProtectedOverflow) => (true, false),
        Some(DegradedReason::StoreFailure { .. } | DegradedReason::WatchdogTimeout { .. }) => {
            (true, true)
        }
    };
    let segments = window.segments().list();
    let mut topics = Topics::new();
    for segment in segments {
        topics.absorb(segment.topics());
    }
    ContextSnapshot::new()
        .with_fact(HAS_EVICTED, view.evicted_count > 0)
        .with_fact(
            OVER_BUDGET,
            degraded || view.active_tokens > u64::from(view.token_budget),
        )
        .with_fact(STORE_DEGRADED, store_degraded)
        .with_fact(HAS_REHYDRATED, segments.iter().any(Segment::is_rehydrated))
        .with_last_message(message)
        .with_topics(topics.top_normalized(max_topics))
}
