//! Row-level types that are not part of `memoria-core`.

use chrono::{DateTime, Utc};
use memoria_core::ConversationId;
use serde::{Deserialize, Serialize};

/// Persisted action execution outcome.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutcomeRecord {
    /// Conversation the outcome was reported in.
    pub conversation_id: ConversationId,
    /// Action name.
    pub action: String,
    /// Context bucket the action was predicted for.
    pub bucket: String,
    /// Whether execution succeeded.
    pub success: bool,
    /// Context snapshot at the time (opaque JSON).
    pub snapshot: serde_json::Value,
    /// When the outcome was recorded.
    pub recorded_at: DateTime<Utc>,
}

/// A topic that co-occurred with another in stored summaries.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelatedTopic {
    /// The related topic.
    pub topic: String,
    /// Number of summaries in which both topics appeared.
    pub strength: u32,
}
