//! Durable summary of an evicted segment.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{ConversationId, SegmentId};
use crate::topics::Topics;
use crate::turn::Modality;

/// Compressed, immutable record of a segment that left the active window.
///
/// The record is keyed by the ID of the segment it summarizes; writing the
/// same record twice is a no-op for any conforming store.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryRecord {
    /// ID of the evicted segment (also the summary ID).
    pub segment_id: SegmentId,
    /// Owning conversation.
    pub conversation_id: ConversationId,
    /// Lossy textual summary.
    pub summary_text: String,
    /// Topic weights of the segment at eviction time.
    pub topics: Topics,
    /// Token count of the segment before compression.
    pub original_token_count: u32,
    /// Modalities present in the original segment.
    #[serde(default)]
    pub modalities: BTreeSet<Modality>,
    /// When the record was written.
    pub created_at: DateTime<Utc>,
}
