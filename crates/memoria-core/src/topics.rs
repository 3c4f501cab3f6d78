//! Topic weight maps and the shared term tokenizer.
//!
//! [`Topics`] is backed by a `BTreeMap` so iteration order (and therefore
//! every fold over it) is deterministic. Ranking helpers break weight ties by
//! lexical order of the topic.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::ids::ConversationId;

/// Shortest term kept by [`tokenize`].
pub const MIN_TERM_CHARS: usize = 3;

/// Terms dropped by [`tokenize`].
const STOPWORDS: &[&str] = &[
    "about", "after", "again", "all", "also", "and", "any", "are", "because", "been", "before",
    "being", "but", "can", "could", "did", "does", "doing", "for", "from", "had", "has", "have",
    "her", "here", "him", "his", "how", "into", "its", "just", "let", "like", "more", "most",
    "not", "now", "off", "once", "only", "other", "our", "out", "over", "own", "please", "same",
    "she", "should", "some", "such", "than", "that", "the", "their", "them", "then", "there",
    "these", "they", "this", "those", "through", "too", "under", "until", "very", "was", "way",
    "were", "what", "when", "where", "which", "while", "who", "why", "will", "with", "would",
    "yes", "you", "your",
];

/// Split text into lowercase alphanumeric terms, dropping short terms and
/// stopwords. Order of first appearance is preserved; duplicates are kept.
#[must_use]
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|raw| raw.chars().count() >= MIN_TERM_CHARS)
        .map(str::to_lowercase)
        .filter(|term| STOPWORDS.binary_search(&term.as_str()).is_err())
        .collect()
}

/// Order two `(topic, weight)` pairs: heavier first, then lexical.
fn rank_order(a: (&String, &f64), b: (&String, &f64)) -> Ordering {
    b.1.total_cmp(a.1).then_with(|| a.0.cmp(b.0))
}

/// Mapping of topic term to weight.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Topics(BTreeMap<String, f64>);

impl Topics {
    /// Empty topic map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from `(topic, weight)` pairs. Non-positive or non-finite weights
    /// are dropped; repeated topics accumulate.
    #[must_use]
    pub fn from_weights<I, S>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (S, f64)>,
        S: Into<String>,
    {
        let mut topics = Self::new();
        for (topic, weight) in pairs {
            topics.add(topic, weight);
        }
        topics
    }

    /// Add `weight` to `topic`.
    pub fn add(&mut self, topic: impl Into<String>, weight: f64) {
        if weight.is_finite() && weight > 0.0 {
            *self.0.entry(topic.into()).or_insert(0.0) += weight;
        }
    }

    /// Accumulate every weight of `other` into `self`.
    pub fn absorb(&mut self, other: &Topics) {
        for (topic, weight) in &other.0 {
            self.add(topic.clone(), *weight);
        }
    }

    /// Weight of `topic`, zero if absent.
    #[must_use]
    pub fn weight(&self, topic: &str) -> f64 {
        self.0.get(topic).copied().unwrap_or(0.0)
    }

    /// Whether `topic` is present.
    #[must_use]
    pub fn contains(&self, topic: &str) -> bool {
        self.0.contains_key(topic)
    }

    /// Number of topics.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether there are no topics.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate in lexical topic order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// Topic terms in lexical order.
    pub fn terms(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// Sum of all weights.
    #[must_use]
    pub fn total(&self) -> f64 {
        self.0.values().sum()
    }

    /// Topics ranked heaviest first, ties in lexical order.
    #[must_use]
    pub fn ranked(&self) -> Vec<(&str, f64)> {
        let mut entries: Vec<(&String, &f64)> = self.0.iter().collect();
        entries.sort_by(|a, b| rank_order(*a, *b));
        entries.into_iter().map(|(k, v)| (k.as_str(), *v)).collect()
    }

    /// Keep the `n` heaviest topics and rescale so weights sum to 1.
    #[must_use]
    pub fn top_normalized(&self, n: usize) -> Self {
        let kept: BTreeMap<String, f64> = self
            .ranked()
            .into_iter()
            .take(n)
            .map(|(k, v)| (k.to_owned(), v))
            .collect();
        Self(kept).normalized()
    }

    /// Rescale so weights sum to 1. An empty or zero map stays empty.
    #[must_use]
    pub fn normalized(&self) -> Self {
        let total = self.total();
        if total <= 0.0 {
            return Self::new();
        }
        Self(self.0.iter().map(|(k, v)| (k.clone(), v / total)).collect())
    }

    /// Shared mass: the sum over common topics of the smaller weight.
    /// For two normalized maps the result lies in `[0, 1]`.
    #[must_use]
    pub fn overlap(&self, other: &Topics) -> f64 {
        self.0
            .iter()
            .filter_map(|(topic, w)| other.0.get(topic).map(|o| w.min(*o)))
            .sum()
    }

    /// Cosine similarity in `[0, 1]` (weights are non-negative).
    #[must_use]
    pub fn cosine(&self, other: &Topics) -> f64 {
        let dot: f64 = self
            .0
            .iter()
            .filter_map(|(topic, w)| other.0.get(topic).map(|o| w * o))
            .sum();
        let norm_a = self.0.values().map(|w| w * w).sum::<f64>().sqrt();
        let norm_b = other.0.values().map(|w| w * w).sum::<f64>().sqrt();
        if norm_a == 0.0 || norm_b == 0.0 {
            return 0.0;
        }
        (dot / (norm_a * norm_b)).clamp(0.0, 1.0)
    }
}

impl<S: Into<String>> FromIterator<(S, f64)> for Topics {
    fn from_iter<I: IntoIterator<Item = (S, f64)>>(iter: I) -> Self {
        Self::from_weights(iter)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Topic queries
// ─────────────────────────────────────────────────────────────────────────────

/// A topic search against stored summaries.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopicQuery {
    /// Normalized query topics.
    pub topics: Topics,
    /// Restrict matches to one conversation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<ConversationId>,
}

impl TopicQuery {
    /// Query from free text: every distinct term gets equal weight.
    #[must_use]
    pub fn from_text(text: &str) -> Self {
        let topics: Topics = tokenize(text).into_iter().map(|t| (t, 1.0)).collect();
        Self::from_topics(topics)
    }

    /// Query from an existing topic map (normalized on the way in).
    #[must_use]
    pub fn from_topics(topics: Topics) -> Self {
        Self {
            topics: topics.normalized(),
            conversation_id: None,
        }
    }

    /// Restrict the query to one conversation.
    #[must_use]
    pub fn in_conversation(mut self, id: ConversationId) -> Self {
        self.conversation_id = Some(id);
        self
    }

    /// Whether the query has no terms (matches nothing).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.topics.is_empty()
    }

    /// Relevance of a record's topics to this query.
    #[must_use]
    pub fn relevance(&self, topics: &Topics) -> f64 {
        self.topics.overlap(topics)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
