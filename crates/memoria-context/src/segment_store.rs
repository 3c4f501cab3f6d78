//! Active segment set for one conversation.
//!
//! Turns are grouped into segments on append: an assistant turn joins the
//! open segment when that segment ends with a user turn and the result stays
//! within the segment cap. Anything else opens a new segment. System turns
//! always stand alone.
//!
//! Eviction summarizes a segment, persists the summary and only then drops
//! the segment, so a failed write never loses the turns.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use memoria_core::{ConversationId, Role, SegmentId, SummaryRecord, Topics, Turn};
use memoria_store::StoreError;
use tracing::{debug, info};

use crate::errors::{ContextError, Result};
use crate::persistence::ResilientStore;
use crate::segment::Segment;
use crate::summarizer::Summarizer;

/// A turn with the annotations computed at ingest.
#[derive(Clone, Debug)]
pub struct AnnotatedTurn {
    /// The turn itself.
    pub turn: Turn,
    /// Topics extracted from its text.
    pub topics: Topics,
    /// Whether it carries an explicit importance marker.
    pub user_signal: bool,
}

/// Where an incoming turn would land.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Placement {
    /// Joins the open segment, which would then hold `tokens`.
    Join {
        /// Open segment.
        segment_id: SegmentId,
        /// Resulting token count.
        tokens: u32,
    },
    /// Opens a new segment holding `tokens`.
    Open {
        /// Resulting token count.
        tokens: u32,
    },
}

impl Placement {
    /// Tokens the receiving segment would hold.
    #[must_use]
    pub fn tokens(&self) -> u32 {
        match self {
            Self::Join { tokens, .. } | Self::Open { tokens } => *tokens,
        }
    }
}

/// Ordered set of active segments plus the evicted-ID ledger.
pub struct SegmentStore {
    conversation_id: ConversationId,
    segment_cap: u32,
    max_topics: usize,
    /// Creation order, oldest first.
    segments: Vec<Segment>,
    open: Option<SegmentId>,
    evicted: HashSet<SegmentId>,
    next_sequence: u64,
    turn_clock: u64,
    persistence: ResilientStore,
    summarizer: Arc<dyn Summarizer>,
}

impl std::fmt::Debug for SegmentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SegmentStore")
            .field("conversation_id", &self.conversation_id)
            .field("segment_cap", &self.segment_cap)
            .field("max_topics", &self.max_topics)
            .field("segments", &self.segments)
            .field("open", &self.open)
            .field("evicted", &self.evicted)
            .field("next_sequence", &self.next_sequence)
            .field("turn_clock", &self.turn_clock)
            .field("persistence", &self.persistence)
            .finish_non_exhaustive()
    }
}

impl SegmentStore {
    /// Empty store.
    #[must_use]
    pub fn new(
        conversation_id: ConversationId,
        segment_cap: u32,
        max_topics: usize,
        persistence: ResilientStore,
        summarizer: Arc<dyn Summarizer>,
    ) -> Self {
        Self {
            conversation_id,
            segment_cap,
            max_topics,
            segments: Vec::new(),
            open: None,
            evicted: HashSet::new(),
            next_sequence: 1,
            turn_clock: 0,
            persistence,
            summarizer,
        }
    }

    /// Decide where `turn` would go without changing anything.
    #[must_use]
    pub fn placement(&self, turn: &Turn) -> Placement {
        if turn.role() == Role::Assistant {
            if let Some(open) = self.open_segment() {
                let tokens = open.token_count().saturating_add(turn.token_count());
                if open.last_role() == Some(Role::User) && tokens <= self.segment_cap {
                    return Placement::Join {
                        segment_id: open.id().clone(),
                        tokens,
                    };
                }
            }
        }
        Placement::Open {
            tokens: turn.token_count(),
        }
    }

    /// Append a turn and return the segment that received it.
    pub fn append(&mut self, annotated: AnnotatedTurn) -> SegmentId {
        self.turn_clock += 1;
        let clock = self.turn_clock;
        let AnnotatedTurn {
            turn,
            topics,
            user_signal,
        } = annotated;

        if let Placement::Join { segment_id, .. } = self.placement(&turn) {
            if let Some(open) = self.segments.iter_mut().find(|s| s.id() == &segment_id) {
                open.push_turn(turn, &topics, user_signal, clock, self.max_topics);
                return segment_id;
            }
        }

        let sequence = self.bump_sequence();
        let segment = Segment::open(sequence, turn, &topics, user_signal, clock, self.max_topics);
        let id = segment.id().clone();
        self.open = Some(id.clone());
        self.segments.push(segment);
        id
    }

    /// Active segment by ID.
    #[must_use]
    pub fn get(&self, segment_id: &SegmentId) -> Option<&Segment> {
        self.segments.iter().find(|s| s.id() == segment_id)
    }

    /// Active segments, oldest first.
    #[must_use]
    pub fn list(&self) -> &[Segment] {
        &self.segments
    }

    pub(crate) fn list_mut(&mut self) -> &mut [Segment] {
        &mut self.segments
    }

    /// Summarize and persist a segment, then drop it from the active set.
    ///
    /// Evicting a rehydrated segment rewrites its source record, which the
    /// store treats as a no-op.
    pub async fn evict(&mut self, segment_id: &SegmentId) -> Result<SummaryRecord> {
        let Some(index) = self.segments.iter().position(|s| s.id() == segment_id) else {
            return Err(ContextError::SegmentNotFound {
                conversation_id: self.conversation_id.clone(),
                segment_id: segment_id.clone(),
            });
        };
        let segment = &self.segments[index];
        let summary =
            self.summarizer
                .summarize(segment)
                .await
                .map_err(|source| ContextError::Summarizer {
                    segment_id: segment_id.clone(),
                    source,
                })?;
        let record = SummaryRecord {
            segment_id: segment
                .rehydrated_from()
                .unwrap_or_else(|| segment.id())
                .clone(),
            conversation_id: self.conversation_id.clone(),
            summary_text: summary.text,
            topics: summary.topics,
            original_token_count: segment.token_count(),
            modalities: segment.modalities().clone(),
            created_at: Utc::now(),
        };

        self.persistence
            .put(&record)
            .await
            .map_err(|source| ContextError::Store {
                conversation_id: self.conversation_id.clone(),
                segment_id: Some(segment_id.clone()),
                source,
            })?;

        let removed = self.segments.remove(index);
        if self.open.as_ref() == Some(removed.id()) {
            self.open = None;
        }
        let _ = self.evicted.insert(removed.id().clone());
        info!(
            conversation_id = %self.conversation_id,
            segment_id = %segment_id,
            summary_id = %record.segment_id,
            tokens = removed.token_count(),
            "segment evicted"
        );
        Ok(record)
    }

    /// Bring a stored summary back as an active segment.
    ///
    /// Idempotent: while a segment rehydrated from `summary_id` is still
    /// active, that segment is returned instead of a second copy.
    pub async fn rehydrate(&mut self, summary_id: &SegmentId) -> Result<Segment> {
        if let Some(existing) = self
            .segments
            .iter()
            .find(|s| s.rehydrated_from() == Some(summary_id))
        {
            debug!(summary_id = %summary_id, "summary already rehydrated");
            return Ok(existing.clone());
        }

        let record = match self.persistence.get(summary_id).await {
            Ok(record) if record.conversation_id == self.conversation_id => record,
            Ok(_) | Err(StoreError::NotFound { .. }) => {
                return Err(ContextError::SummaryNotFound {
                    conversation_id: self.conversation_id.clone(),
                    segment_id: summary_id.clone(),
                });
            }
            Err(source) => {
                return Err(ContextError::Store {
                    conversation_id: self.conversation_id.clone(),
                    segment_id: Some(summary_id.clone()),
                    source,
                });
            }
        };

        let sequence = self.bump_sequence();
        let segment = Segment::rehydrated(sequence, &record, self.turn_clock);
        info!(
            conversation_id = %self.conversation_id,
            summary_id = %summary_id,
            segment_id = %segment.id(),
            "summary rehydrated"
        );
        self.segments.push(segment.clone());
        Ok(segment)
    }

    /// Sum of active segment tokens.
    #[must_use]
    pub fn active_tokens(&self) -> u64 {
        self.segments.iter().map(|s| u64::from(s.token_count())).sum()
    }

    /// IDs of the `k` newest segments that were not rehydrated.
    #[must_use]
    pub fn protected_ids(&self, k: usize) -> HashSet<SegmentId> {
        self.segments
            .iter()
            .rev()
            .filter(|s| !s.is_rehydrated())
            .take(k)
            .map(|s| s.id().clone())
            .collect()
    }

    /// Whether `segment_id` was evicted from this conversation.
    #[must_use]
    pub fn was_evicted(&self, segment_id: &SegmentId) -> bool {
        self.evicted.contains(segment_id)
    }

    /// Number of evictions so far.
    #[must_use]
    pub fn evicted_count(&self) -> usize {
        self.evicted.len()
    }

    /// Turns appended so far.
    #[must_use]
    pub fn turn_clock(&self) -> u64 {
        self.turn_clock
    }

    /// Owning conversation.
    #[must_use]
    pub fn conversation_id(&self) -> &ConversationId {
        &self.conversation_id
    }

    /// Store handle shared with search and recall.
    #[must_use]
    pub fn persistence(&self) -> &ResilientStore {
        &self.persistence
    }

    fn open_segment(&self) -> Option<&Segment> {
        let open = self.open.as_ref()?;
        self.segments.iter().find(|s| s.id() == open)
    }

    fn bump_sequence(&mut self) -> u64 {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        sequence
    }
}
