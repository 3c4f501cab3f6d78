//! Importance scoring.
//!
//! ```text
//! score = wR·recency + wT·salience + wM·modality + wU·userSignal   ∈ [0, 1]
//! ```
//!
//! - **recency**: the smaller of a wall-clock and a turn-count half-life
//!   decay since the segment was last accessed
//! - **salience**: cosine between the segment's topics and the current focus
//! - **modality**: share of the segment's modalities that are not text
//! - **userSignal**: 1 when a turn carried an explicit importance marker
//!
//! Rehydrated segments are floored at `recall_boost × recency` so that a
//! freshly recalled summary is not immediately evicted again.

use chrono::{DateTime, Utc};
use memoria_core::Topics;
use memoria_settings::{ScoreWeights, ScoringSettings};
use regex::Regex;

use crate::errors::{ContextError, Result};
use crate::segment::Segment;

/// Inputs shared by every segment in one scoring pass.
#[derive(Clone, Copy, Debug)]
pub struct ScoringContext<'a> {
    /// Wall-clock reference.
    pub now: DateTime<Utc>,
    /// Turns ingested so far in the conversation.
    pub turn_clock: u64,
    /// Aggregate topics of the protected window.
    pub focus: &'a Topics,
}

/// Weighted importance scorer.
#[derive(Clone, Debug)]
pub struct ImportanceScorer {
    weights: ScoreWeights,
    half_life_secs: f64,
    half_life_turns: f64,
    recall_boost: f64,
    markers: Option<Regex>,
}

impl ImportanceScorer {
    /// Build from settings. Marker phrases match case-insensitively on word
    /// boundaries.
    #[allow(clippy::cast_precision_loss)]
    pub fn new(settings: &ScoringSettings) -> Result<Self> {
        let phrases: Vec<String> = settings
            .importance_markers
            .iter()
            .map(|m| m.trim())
            .filter(|m| !m.is_empty())
            .map(regex::escape)
            .collect();
        let markers = if phrases.is_empty() {
            None
        } else {
            let pattern = format!(r"(?i)\b(?:{})\b", phrases.join("|"));
            Some(
                Regex::new(&pattern)
                    .map_err(|e| ContextError::InvalidConfig(format!("importance markers: {e}")))?,
            )
        };
        Ok(Self {
            weights: settings.weights.clone(),
            half_life_secs: settings.half_life_secs.max(1) as f64,
            half_life_turns: settings.half_life_turns.max(1) as f64,
            recall_boost: settings.recall_boost.clamp(0.0, 1.0),
            markers,
        })
    }

    /// Whether `text` carries an explicit importance marker.
    #[must_use]
    pub fn has_importance_marker(&self, text: &str) -> bool {
        self.markers.as_ref().is_some_and(|re| re.is_match(text))
    }

    /// Recency decay in `[0, 1]`; never increases while the segment is left
    /// untouched.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn recency(&self, segment: &Segment, now: DateTime<Utc>, turn_clock: u64) -> f64 {
        let elapsed_ms = (now - segment.last_accessed()).num_milliseconds().max(0);
        let elapsed_secs = elapsed_ms as f64 / 1000.0;
        let turns = turn_clock.saturating_sub(segment.last_access_turn()) as f64;
        let by_time = 0.5_f64.powf(elapsed_secs / self.half_life_secs);
        let by_turns = 0.5_f64.powf(turns / self.half_life_turns);
        by_time.min(by_turns)
    }

    /// Cosine salience against the focus topics.
    #[must_use]
    pub fn salience(segment: &Segment, focus: &Topics) -> f64 {
        segment.topics().cosine(focus)
    }

    /// Share of non-text modalities.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn modality_bonus(segment: &Segment) -> f64 {
        let all = segment.modalities().len();
        if all == 0 {
            return 0.0;
        }
        let non_text = segment.modalities().iter().filter(|m| !m.is_text()).count();
        non_text as f64 / all as f64
    }

    /// Score one segment.
    #[must_use]
    pub fn score(&self, segment: &Segment, ctx: &ScoringContext<'_>) -> f64 {
        let recency = self.recency(segment, ctx.now, ctx.turn_clock);
        let signal = if segment.user_signal() { 1.0 } else { 0.0 };
        let w = &self.weights;
        let mut score = w.recency * recency
            + w.topic_salience * Self::salience(segment, ctx.focus)
            + w.modality * Self::modality_bonus(segment)
            + w.user_signal * signal;
        if segment.is_rehydrated() {
            score = score.max(self.recall_boost * recency);
        }
        score.clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use memoria_core::{Attachment, Modality, Role, SegmentId, SummaryRecord, Turn, TurnContent};
    use std::collections::BTreeSet;

    fn scorer() -> ImportanceScorer {
        ImportanceScorer::new(&ScoringSettings::default()).unwrap()
    }

    fn text_segment(text: &str, topics: &Topics) -> Segment {
        Segment::open(1, Turn::text(Role::User, text), topics, false, 0, 8)
    }

    #[test]
    fn markers_match_on_word_boundaries() {
        let s = scorer();
        assert!(s.has_importance_marker("Please REMEMBER my seat"));
        assert!(s.has_importance_marker("don't forget the keys"));
        assert!(!s.has_importance_marker("remembering is hard"));
        assert!(!s.has_importance_marker("nothing here"));
    }

    #[test]
    fn empty_markers_never_match() {
        let s = ImportanceScorer::new(&ScoringSettings {
            importance_markers: vec![" ".into()],
            ..ScoringSettings::default()
        })
        .unwrap();
        assert!(!s.has_importance_marker("remember"));
    }

    #[test]
    fn recency_decays_with_time_and_turns() {
        let s = scorer();
        let seg = text_segment("hello there", &Topics::new());
        let now = seg.last_accessed();
        assert!((s.recency(&seg, now, 0) - 1.0).abs() < 1e-9);
        let hour = s.recency(&seg, now + Duration::seconds(3_600), 0);
        assert!((hour - 0.5).abs() < 1e-9);
        let turns = s.recency(&seg, now, 50);
        assert!((turns - 0.5).abs() < 1e-9);
        assert!(s.recency(&seg, now + Duration::seconds(60), 10) < s.recency(&seg, now, 10));
    }

    #[test]
    fn recency_ignores_clock_skew() {
        let s = scorer();
        let seg = text_segment("hello there", &Topics::new());
        let earlier = seg.last_accessed() - Duration::seconds(30);
        assert!((s.recency(&seg, earlier, 0) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn salience_follows_focus() {
        let s = scorer();
        let topics = Topics::from_weights([("billing", 1.0)]);
        let seg = text_segment("billing", &topics);
        let now = seg.last_accessed();
        let on_topic = s.score(&seg, &ScoringContext { now, turn_clock: 0, focus: &topics });
        let off = Topics::from_weights([("weather", 1.0)]);
        let off_topic = s.score(&seg, &ScoringContext { now, turn_clock: 0, focus: &off });
        assert!(on_topic > off_topic);
        assert!(on_topic <= 1.0);
    }

    #[test]
    fn modality_bonus_is_non_text_share() {
        let plain = text_segment("words", &Topics::new());
        assert!(ImportanceScorer::modality_bonus(&plain).abs() < 1e-9);
        let mixed = Segment::open(
            1,
            Turn::new(
                Role::User,
                TurnContent::text("look").with_attachment(Attachment {
                    modality: Modality::Image,
                    description: "chart".into(),
                    size_bytes: None,
                }),
            ),
            &Topics::new(),
            false,
            0,
            8,
        );
        assert!((ImportanceScorer::modality_bonus(&mixed) - 0.5).abs() < 1e-9);
    }

    #[test]
    fn user_signal_raises_score() {
        let s = scorer();
        let plain = text_segment("words", &Topics::new());
        let marked = Segment::open(1, Turn::text(Role::User, "words"), &Topics::new(), true, 0, 8);
        let now = plain.last_accessed().max(marked.last_accessed());
        let focus = Topics::new();
        let ctx = ScoringContext { now, turn_clock: 0, focus: &focus };
        assert!(s.score(&marked, &ctx) > s.score(&plain, &ctx));
    }

    #[test]
    fn rehydrated_segments_get_recall_floor() {
        let s = scorer();
        let record = SummaryRecord {
            segment_id: SegmentId::new(),
            conversation_id: "c".into(),
            summary_text: "user: weather".into(),
            topics: Topics::from_weights([("weather", 1.0)]),
            original_token_count: 10,
            modalities: BTreeSet::new(),
            created_at: Utc::now(),
        };
        let seg = Segment::rehydrated(2, &record, 0);
        let focus = Topics::from_weights([("billing", 1.0)]);
        let ctx = ScoringContext {
            now: seg.last_accessed(),
            turn_clock: 0,
            focus: &focus,
        };
        assert!(s.score(&seg, &ctx) >= 0.9 - 1e-9);
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn score_stays_in_unit_range(secs in 0i64..1_000_000, turns in 0u64..10_000, signal: bool) {
                let s = scorer();
                let topics = Topics::from_weights([("alpha", 1.0)]);
                let seg = Segment::open(1, Turn::text(Role::User, "alpha"), &topics, signal, 0, 8);
                let ctx = ScoringContext {
                    now: seg.last_accessed() + Duration::seconds(secs),
                    turn_clock: turns,
                    focus: &topics,
                };
                let score = s.score(&seg, &ctx);
                prop_assert!((0.0..=1.0).contains(&score));
            }

            #[test]
            fn recency_is_non_increasing(a in 0i64..100_000, b in 0i64..100_000) {
                let s = scorer();
                let seg = text_segment("alpha", &Topics::new());
                let (early, late) = if a <= b { (a, b) } else { (b, a) };
                let base = seg.last_accessed();
                prop_assert!(
                    s.recency(&seg, base + Duration::seconds(late), 0)
                        <= s.recency(&seg, base + Duration::seconds(early), 0)
                );
            }
        }
    }
}
