//! Context buckets and the rule-based classifier.
//!
//! Each rule names a bucket, the facts it requires and the keywords that
//! point to it. A rule applies when all its facts hold; its score is the
//! number of facts plus the number of keywords mentioned. The best score
//! wins. A tie between different buckets is ambiguous and falls back to the
//! generic bucket with a diagnostic.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::errors::ClassificationAmbiguous;
use crate::snapshot::ContextSnapshot;

/// Name of the generic bucket.
pub const GENERAL_BUCKET: &str = "general";

/// A context bucket name.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContextBucket(String);

impl ContextBucket {
    /// The generic bucket.
    #[must_use]
    pub fn general() -> Self {
        Self(GENERAL_BUCKET.to_owned())
    }

    /// Bucket name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn is_general(&self) -> bool {
        self.0 == GENERAL_BUCKET
    }
}

impl fmt::Display for ContextBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ContextBucket {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl From<String> for ContextBucket {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// One classification rule.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BucketRule {
    /// Bucket selected by this rule.
    pub bucket: ContextBucket,
    /// Facts that must all be true.
    #[serde(default)]
    pub required_facts: Vec<String>,
    /// Lowercase keywords matched against the message and topics.
    #[serde(default)]
    pub keywords: Vec<String>,
}

impl BucketRule {
    /// Score against `snapshot`; `None` when a required fact is missing or
    /// nothing matched.
    #[must_use]
    pub fn score(&self, snapshot: &ContextSnapshot) -> Option<usize> {
        if !self.required_facts.iter().all(|f| snapshot.fact(f)) {
            return None;
        }
        let keywords = self
            .keywords
            .iter()
            .filter(|k| snapshot.mentions(&k.to_lowercase()))
            .count();
        let score = self.required_facts.len() + keywords;
        (score > 0).then_some(score)
    }
}

/// Classification result.
#[derive(Clone, Debug, PartialEq)]
pub struct Classification {
    /// Chosen bucket.
    pub bucket: ContextBucket,
    /// Set when the choice fell back because of a tie.
    pub ambiguity: Option<ClassificationAmbiguous>,
}

/// Ordered rule list.
#[derive(Clone, Debug, Default)]
pub struct Classifier {
    rules: Vec<BucketRule>,
}

impl Classifier {
    /// Build from rules.
    #[must_use]
    pub fn new(rules: Vec<BucketRule>) -> Self {
        Self { rules }
    }

    /// Rules in declaration order.
    #[must_use]
    pub fn rules(&self) -> &[BucketRule] {
        &self.rules
    }

    /// Pick the best-scoring bucket.
    #[must_use]
    pub fn classify(&self, snapshot: &ContextSnapshot) -> Classification {
        let mut best = 0;
        let mut leaders: BTreeSet<ContextBucket> = BTreeSet::new();
        for rule in &self.rules {
            let Some(score) = rule.score(snapshot) else {
                continue;
            };
            if score > best {
                best = score;
                leaders.clear();
            }
            if score == best {
                let _ = leaders.insert(rule.bucket.clone());
            }
        }
        match leaders.len() {
            0 => Classification {
                bucket: ContextBucket::general(),
                ambiguity: None,
            },
            1 => Classification {
                bucket: leaders.into_iter().next().unwrap_or_else(ContextBucket::general),
                ambiguity: None,
            },
            _ => Classification {
                bucket: ContextBucket::general(),
                ambiguity: Some(ClassificationAmbiguous {
                    candidates: leaders.into_iter().collect(),
                    score: best,
                }),
            },
        }
    }
}
