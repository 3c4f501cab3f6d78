//! Context window, scoring, topic and summary settings.

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Active-window budget and eviction settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ContextSettings {
    /// Token budget for the active window.
    pub token_budget: u32,
    /// A turn only joins the open segment while it stays under this size.
    pub segment_token_cap: u32,
    /// A single segment larger than this is rejected outright.
    pub hard_token_cap: u32,
    /// Number of most recent segments that are never evicted.
    pub protected_window: usize,
    /// Upper bound on one eviction pass, in milliseconds.
    pub eviction_watchdog_ms: u64,
    /// Minimum query overlap for a stored summary to be recalled.
    pub recall_threshold: f64,
    /// Maximum stored summaries considered per context build.
    pub recall_limit: usize,
    /// Maximum records scanned by a topic search.
    pub search_scan_limit: usize,
    /// Refresh `lastAccessed` on segments returned by a context build.
    pub touch_on_read: bool,
}

impl Default for ContextSettings {
    fn default() -> Self {
        Self {
            token_budget: 16_000,
            segment_token_cap: 2_000,
            hard_token_cap: 8_000,
            protected_window: 5,
            eviction_watchdog_ms: 2_000,
            recall_threshold: 0.1,
            recall_limit: 32,
            search_scan_limit: 10_000,
            touch_on_read: false,
        }
    }
}

impl ContextSettings {
    pub(crate) fn validate(&self) -> Result<()> {
        if self.token_budget == 0 {
            return Err(SettingsError::invalid("context.tokenBudget", "must be positive"));
        }
        if self.segment_token_cap == 0 {
            return Err(SettingsError::invalid(
                "context.segmentTokenCap",
                "must be positive",
            ));
        }
        if self.segment_token_cap > self.hard_token_cap {
            return Err(SettingsError::invalid(
                "context.segmentTokenCap",
                format!(
                    "{} exceeds hardTokenCap {}",
                    self.segment_token_cap, self.hard_token_cap
                ),
            ));
        }
        if self.eviction_watchdog_ms == 0 {
            return Err(SettingsError::invalid(
                "context.evictionWatchdogMs",
                "must be positive",
            ));
        }
        if !(0.0..=1.0).contains(&self.recall_threshold) {
            return Err(SettingsError::invalid(
                "context.recallThreshold",
                "must be within [0, 1]",
            ));
        }
        if self.search_scan_limit == 0 {
            return Err(SettingsError::invalid(
                "context.searchScanLimit",
                "must be positive",
            ));
        }
        Ok(())
    }
}

/// Weights of the four importance components.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScoreWeights {
    /// Recency decay weight.
    pub recency: f64,
    /// Topic salience weight.
    pub topic_salience: f64,
    /// Non-text modality weight.
    pub modality: f64,
    /// Explicit user importance marker weight.
    pub user_signal: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            recency: 0.4,
            topic_salience: 0.3,
            modality: 0.1,
            user_signal: 0.2,
        }
    }
}

impl ScoreWeights {
    /// Sum of all four weights.
    #[must_use]
    pub fn sum(&self) -> f64 {
        self.recency + self.topic_salience + self.modality + self.user_signal
    }
}

/// Importance scoring settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScoringSettings {
    /// Component weights (must sum to 1).
    pub weights: ScoreWeights,
    /// Recency half-life in wall-clock seconds.
    pub half_life_secs: u64,
    /// Recency half-life in ingested turns.
    pub half_life_turns: u64,
    /// Score floor multiplier for rehydrated segments.
    pub recall_boost: f64,
    /// Phrases that mark a turn as explicitly important.
    pub importance_markers: Vec<String>,
}

impl Default for ScoringSettings {
    fn default() -> Self {
        Self {
            weights: ScoreWeights::default(),
            half_life_secs: 3_600,
            half_life_turns: 50,
            recall_boost: 0.9,
            importance_markers: ["remember", "important", "don't forget", "keep in mind"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

impl ScoringSettings {
    pub(crate) fn validate(&self) -> Result<()> {
        let w = &self.weights;
        for (field, value) in [
            ("scoring.weights.recency", w.recency),
            ("scoring.weights.topicSalience", w.topic_salience),
            ("scoring.weights.modality", w.modality),
            ("scoring.weights.userSignal", w.user_signal),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(SettingsError::invalid(field, "must be a non-negative number"));
            }
        }
        if (w.sum() - 1.0).abs() > 1e-6 {
            return Err(SettingsError::invalid(
                "scoring.weights",
                format!("must sum to 1, got {}", w.sum()),
            ));
        }
        if self.half_life_secs == 0 || self.half_life_turns == 0 {
            return Err(SettingsError::invalid(
                "scoring.halfLife",
                "half-lives must be positive",
            ));
        }
        if !(0.0..=1.0).contains(&self.recall_boost) {
            return Err(SettingsError::invalid(
                "scoring.recallBoost",
                "must be within [0, 1]",
            ));
        }
        Ok(())
    }
}

/// Topic extraction settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TopicSettings {
    /// Number of recent turns in the document-frequency corpus.
    pub corpus_size: usize,
    /// Topics kept per turn and per segment.
    pub max_topics: usize,
}

impl Default for TopicSettings {
    fn default() -> Self {
        Self {
            corpus_size: 500,
            max_topics: 8,
        }
    }
}

impl TopicSettings {
    pub(crate) fn validate(&self) -> Result<()> {
        if self.corpus_size == 0 {
            return Err(SettingsError::invalid("topics.corpusSize", "must be positive"));
        }
        if self.max_topics == 0 {
            return Err(SettingsError::invalid("topics.maxTopics", "must be positive"));
        }
        Ok(())
    }
}

/// Extractive summarizer settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SummarySettings {
    /// Characters kept from each turn.
    pub max_chars_per_turn: usize,
    /// Characters kept in the whole summary.
    pub max_chars: usize,
}

impl Default for SummarySettings {
    fn default() -> Self {
        Self {
            max_chars_per_turn: 160,
            max_chars: 800,
        }
    }
}
