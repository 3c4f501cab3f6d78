//! Segment summarization.
//!
//! Eviction hands a segment to a [`Summarizer`] and persists whatever comes
//! back. [`ExtractiveSummarizer`] is the built-in, deterministic
//! implementation: one truncated `role: text` line per turn.

use async_trait::async_trait;
use memoria_core::Topics;
use memoria_settings::SummarySettings;
use thiserror::Error;

use crate::segment::Segment;

/// Output of a summarization pass.
#[derive(Clone, Debug, PartialEq)]
pub struct SegmentSummary {
    /// Lossy text kept in the store.
    pub text: String,
    /// Topic weights kept alongside it.
    pub topics: Topics,
}

/// Summarization failure.
#[derive(Debug, Error)]
pub enum SummarizerError {
    /// The summarizer did not answer in time.
    #[error("summarization timed out after {timeout_ms}ms")]
    Timeout {
        /// Elapsed budget.
        timeout_ms: u64,
    },
    /// The summarizer produced nothing usable.
    #[error("summarization produced no output: {reason}")]
    Empty {
        /// Description.
        reason: String,
    },
    /// Backend call failed.
    #[error("summarization failed: {message}")]
    CallFailed {
        /// Description.
        message: String,
    },
}

/// Produces a compressed summary of a segment.
///
/// Implementations must return a rehydrated segment's text and topics
/// unchanged so that evicting it again loses nothing further.
#[async_trait]
pub trait Summarizer: Send + Sync {
    /// Summarize `segment`.
    async fn summarize(&self, segment: &Segment) -> Result<SegmentSummary, SummarizerError>;
}

// =============================================================================
// ExtractiveSummarizer
// =============================================================================

/// Deterministic summarizer that keeps the head of every turn.
#[derive(Clone, Debug)]
pub struct ExtractiveSummarizer {
    max_chars_per_turn: usize,
    max_chars: usize,
}

impl ExtractiveSummarizer {
    /// Build from settings.
    #[must_use]
    pub fn new(settings: &SummarySettings) -> Self {
        Self {
            max_chars_per_turn: settings.max_chars_per_turn.max(1),
            max_chars: settings.max_chars.max(1),
        }
    }

    fn summarize_turns(&self, segment: &Segment) -> String {
        let lines: Vec<String> = segment
            .turns()
            .iter()
            .map(|turn| {
                let text = collapse_whitespace(&turn.textual());
                format!(
                    "{}: {}",
                    turn.role().as_str(),
                    truncate_chars(&text, self.max_chars_per_turn)
                )
            })
            .collect();
        truncate_chars(&lines.join("\n"), self.max_chars)
    }
}

impl Default for ExtractiveSummarizer {
    fn default() -> Self {
        Self::new(&SummarySettings::default())
    }
}

#[async_trait]
impl Summarizer for ExtractiveSummarizer {
    async fn summarize(&self, segment: &Segment) -> Result<SegmentSummary, SummarizerError> {
        if let Some(text) = segment.summary() {
            return Ok(SegmentSummary {
                text: text.to_owned(),
                topics: segment.topics().clone(),
            });
        }
        if segment.turns().is_empty() {
            return Err(SummarizerError::Empty {
                reason: format!("segment {} has no turns", segment.id()),
            });
        }
        Ok(SegmentSummary {
            text: self.summarize_turns(segment),
            topics: segment.topics().clone(),
        })
    }
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Keep at most `max` characters, marking a cut with `…`.
fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_owned();
    }
    let mut out: String = text.chars().take(max.saturating_sub(1)).collect();
    out.push('…');
    out
}
