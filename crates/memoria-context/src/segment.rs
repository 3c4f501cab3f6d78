//! Segments: the unit of eviction.
//!
//! A segment owns one or more contiguous turns (a user turn and the reply
//! to it, usually). A rehydrated segment instead carries the verbatim text of
//! a stored summary and remembers which record it came from.

use std::collections::BTreeSet;
use std::fmt::Write as _;

use chrono::{DateTime, Utc};
use memoria_core::tokens::estimate_text_tokens;
use memoria_core::{Modality, Role, SegmentId, SummaryRecord, Topics, Turn};
use serde::Serialize;

/// A contiguous group of turns, scored and evicted as a whole.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Segment {
    id: SegmentId,
    sequence: u64,
    turns: Vec<Turn>,
    token_count: u32,
    /// Normalized topic weights across all turns.
    topics: Topics,
    /// Unnormalized per-turn accumulation behind `topics`.
    #[serde(skip)]
    topic_mass: Topics,
    importance: f64,
    created_at: DateTime<Utc>,
    last_accessed: DateTime<Utc>,
    last_access_turn: u64,
    modalities: BTreeSet<Modality>,
    #[serde(skip_serializing_if = "Option::is_none")]
    summary: Option<String>,
    user_signal: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    rehydrated_from: Option<SegmentId>,
}

impl Segment {
    /// Open a segment around its first turn.
    pub(crate) fn open(
        sequence: u64,
        turn: Turn,
        topics: &Topics,
        user_signal: bool,
        turn_clock: u64,
        max_topics: usize,
    ) -> Self {
        let now = Utc::now();
        let mut segment = Self {
            id: SegmentId::new(),
            sequence,
            turns: Vec::new(),
            token_count: 0,
            topics: Topics::new(),
            topic_mass: Topics::new(),
            importance: 0.0,
            created_at: now,
            last_accessed: now,
            last_access_turn: turn_clock,
            modalities: BTreeSet::new(),
            summary: None,
            user_signal: false,
            rehydrated_from: None,
        };
        segment.push_turn(turn, topics, user_signal, turn_clock, max_topics);
        segment
    }

    /// Materialize a stored summary as a fresh active segment.
    pub(crate) fn rehydrated(sequence: u64, record: &SummaryRecord, turn_clock: u64) -> Self {
        Self::from_record(SegmentId::new(), sequence, record, turn_clock)
    }

    /// View a stored summary as a segment without activating it. Keeps the
    /// record's ID so repeated builds are stable.
    pub(crate) fn recalled(record: &SummaryRecord, turn_clock: u64) -> Self {
        Self::from_record(record.segment_id.clone(), 0, record, turn_clock)
    }

    fn from_record(id: SegmentId, sequence: u64, record: &SummaryRecord, turn_clock: u64) -> Self {
        let now = Utc::now();
        Self {
            id,
            sequence,
            turns: Vec::new(),
            token_count: estimate_text_tokens(&record.summary_text),
            topics: record.topics.clone(),
            topic_mass: record.topics.clone(),
            importance: 0.0,
            created_at: now,
            last_accessed: now,
            last_access_turn: turn_clock,
            modalities: record.modalities.clone(),
            summary: Some(record.summary_text.clone()),
            user_signal: false,
            rehydrated_from: Some(record.segment_id.clone()),
        }
    }

    pub(crate) fn push_turn(
        &mut self,
        turn: Turn,
        topics: &Topics,
        user_signal: bool,
        turn_clock: u64,
        max_topics: usize,
    ) {
        self.token_count = self.token_count.saturating_add(turn.token_count());
        self.modalities.extend(turn.modalities().iter().copied());
        self.topic_mass.absorb(topics);
        self.topics = self.topic_mass.top_normalized(max_topics);
        self.user_signal |= user_signal;
        self.last_access_turn = turn_clock;
        self.last_accessed = Utc::now();
        self.turns.push(turn);
    }

    pub(crate) fn touch(&mut self, now: DateTime<Utc>, turn_clock: u64) {
        self.last_accessed = now;
        self.last_access_turn = turn_clock;
    }

    pub(crate) fn set_importance(&mut self, importance: f64) {
        self.importance = importance;
    }

    // ── accessors ──

    /// Segment ID.
    #[must_use]
    pub fn id(&self) -> &SegmentId {
        &self.id
    }

    /// Creation order within the conversation.
    #[must_use]
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Turns, oldest first. Empty for rehydrated segments.
    #[must_use]
    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    /// Estimated tokens held by the segment.
    #[must_use]
    pub fn token_count(&self) -> u32 {
        self.token_count
    }

    /// Normalized topic weights.
    #[must_use]
    pub fn topics(&self) -> &Topics {
        &self.topics
    }

    /// Score from the last scoring pass, in `[0, 1]`.
    #[must_use]
    pub fn importance(&self) -> f64 {
        self.importance
    }

    /// When the segment was created (or rehydrated).
    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Last write or explicit access.
    #[must_use]
    pub fn last_accessed(&self) -> DateTime<Utc> {
        self.last_accessed
    }

    /// Turn clock at the last write or explicit access.
    #[must_use]
    pub fn last_access_turn(&self) -> u64 {
        self.last_access_turn
    }

    /// Union of the turns' modalities.
    #[must_use]
    pub fn modalities(&self) -> &BTreeSet<Modality> {
        &self.modalities
    }

    /// Verbatim summary text for rehydrated segments.
    #[must_use]
    pub fn summary(&self) -> Option<&str> {
        self.summary.as_deref()
    }

    /// Whether any turn carried an explicit importance marker.
    #[must_use]
    pub fn user_signal(&self) -> bool {
        self.user_signal
    }

    /// Source summary ID for rehydrated segments.
    #[must_use]
    pub fn rehydrated_from(&self) -> Option<&SegmentId> {
        self.rehydrated_from.as_ref()
    }

    /// Whether this segment was restored from a summary.
    #[must_use]
    pub fn is_rehydrated(&self) -> bool {
        self.rehydrated_from.is_some()
    }

    /// Role of the newest turn.
    #[must_use]
    pub fn last_role(&self) -> Option<Role> {
        self.turns.last().map(Turn::role)
    }

    /// Text rendering used for prompts: summary text, or one `role: text`
    /// line per turn.
    #[must_use]
    pub fn render(&self) -> String {
        if let Some(summary) = &self.summary {
            return summary.clone();
        }
        let mut out = String::new();
        for (i, turn) in self.turns.iter().enumerate() {
            if i > 0 {
                out.push('\n');
            }
            let _ = write!(out, "{}: {}", turn.role().as_str(), turn.textual());
        }
        out
    }
}
