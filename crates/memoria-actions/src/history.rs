//! Execution outcome history and the success multiplier folded from it.
//!
//! Each recorded outcome of an action in its bucket scales the multiplier
//! by the success or failure factor, clamped to `[floor, cap]`. Between
//! events, and from the last event to now, the multiplier decays toward 1.0
//! with the configured half-life:
//!
//! ```text
//! m ← 1 + (m − 1) · 0.5^(elapsed / half_life)
//! ```

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use memoria_settings::ActionSettings;
use serde::{Deserialize, Serialize};

use crate::bucket::ContextBucket;
use crate::snapshot::ContextSnapshot;

/// Append-only feedback record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionOutcome {
    /// Action name.
    pub action: String,
    /// Bucket the action ran in.
    pub bucket: ContextBucket,
    /// Whether it succeeded.
    pub success: bool,
    /// Context at report time.
    pub snapshot: ContextSnapshot,
    /// Report time.
    pub timestamp: DateTime<Utc>,
}

/// Bounded outcome log, oldest first.
#[derive(Clone, Debug)]
pub struct OutcomeHistory {
    entries: VecDeque<ExecutionOutcome>,
    limit: usize,
}

impl OutcomeHistory {
    /// Empty history keeping at most `limit` entries.
    #[must_use]
    pub fn new(limit: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            limit: limit.max(1),
        }
    }

    /// Append, dropping the oldest entry when full.
    pub fn push(&mut self, outcome: ExecutionOutcome) {
        self.entries.push_back(outcome);
        while self.entries.len() > self.limit {
            let _ = self.entries.pop_front();
        }
    }

    /// Entries for one action in one bucket, oldest first.
    pub fn for_action<'a>(
        &'a self,
        action: &'a str,
        bucket: &'a ContextBucket,
    ) -> impl Iterator<Item = &'a ExecutionOutcome> + 'a {
        self.entries
            .iter()
            .filter(move |e| e.action == action && &e.bucket == bucket)
    }

    /// All entries, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &ExecutionOutcome> {
        self.entries.iter()
    }

    /// Outcomes retained.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing has been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Factors and bounds of the success multiplier.
#[derive(Clone, Debug, PartialEq)]
pub struct MultiplierPolicy {
    /// Factor applied after a success.
    pub success_factor: f64,
    /// Factor applied after a failure.
    pub failure_factor: f64,
    /// Upper bound.
    pub cap: f64,
    /// Lower bound.
    pub floor: f64,
    /// Decay half-life toward 1.0, in seconds.
    pub half_life_secs: f64,
}

impl From<&ActionSettings> for MultiplierPolicy {
    #[allow(clippy::cast_precision_loss)]
    fn from(s: &ActionSettings) -> Self {
        Self {
            success_factor: s.success_factor,
            failure_factor: s.failure_factor,
            cap: s.multiplier_cap,
            floor: s.multiplier_floor,
            half_life_secs: s.decay_half_life_secs.max(1) as f64,
        }
    }
}

impl MultiplierPolicy {
    /// Fold `events` (oldest first) into a multiplier as of `now`.
    #[must_use]
    pub fn fold<'a>(
        &self,
        events: impl IntoIterator<Item = &'a ExecutionOutcome>,
        now: DateTime<Utc>,
    ) -> f64 {
        let mut multiplier = 1.0;
        let mut last: Option<DateTime<Utc>> = None;
        for event in events {
            if let Some(previous) = last {
                multiplier = self.decay(multiplier, event.timestamp - previous);
            }
            let factor = if event.success {
                self.success_factor
            } else {
                self.failure_factor
            };
            multiplier = (multiplier * factor).clamp(self.floor, self.cap);
            last = Some(event.timestamp);
        }
        match last {
            Some(previous) => self.decay(multiplier, now - previous),
            None => multiplier,
        }
    }

    #[allow(clippy::cast_precision_loss)]
    fn decay(&self, multiplier: f64, elapsed: chrono::Duration) -> f64 {
        let secs = elapsed.num_milliseconds().max(0) as f64 / 1000.0;
        1.0 + (multiplier - 1.0) * 0.5_f64.powf(secs / self.half_life_secs)
    }
}
