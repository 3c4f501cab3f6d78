//! Per-conversation topic extraction.
//!
//! Weights are term frequency times a smoothed inverse document frequency
//! over a sliding corpus of the last N turns:
//!
//! ```text
//! idf(t) = ln((1 + N) / (1 + df(t))) + 1
//! ```
//!
//! The smoothing keeps every weight positive, so a term seen in every turn
//! still counts. `extract` never mutates; `observe` adds a turn to the
//! corpus and drops the oldest once it is full.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};

use memoria_core::topics::tokenize;
use memoria_core::Topics;
use memoria_settings::TopicSettings;

/// Sliding-corpus TF-IDF extractor.
#[derive(Clone, Debug)]
pub struct TopicExtractor {
    corpus_size: usize,
    max_topics: usize,
    corpus: VecDeque<BTreeSet<String>>,
    doc_freq: HashMap<String, usize>,
}

impl TopicExtractor {
    /// Empty extractor.
    #[must_use]
    pub fn new(settings: &TopicSettings) -> Self {
        Self {
            corpus_size: settings.corpus_size.max(1),
            max_topics: settings.max_topics.max(1),
            corpus: VecDeque::new(),
            doc_freq: HashMap::new(),
        }
    }

    /// Topic weights for `text`, normalized to sum to 1. Empty when the text
    /// has no content terms.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn extract(&self, text: &str) -> Topics {
        let terms = tokenize(text);
        if terms.is_empty() {
            return Topics::new();
        }
        let total = terms.len() as f64;
        let mut tf: BTreeMap<&str, usize> = BTreeMap::new();
        for term in &terms {
            *tf.entry(term.as_str()).or_insert(0) += 1;
        }
        let docs = self.corpus.len() as f64;
        tf.into_iter()
            .map(|(term, count)| {
                let df = self.doc_freq.get(term).copied().unwrap_or(0) as f64;
                let idf = ((1.0 + docs) / (1.0 + df)).ln() + 1.0;
                (term, count as f64 / total * idf)
            })
            .collect::<Topics>()
            .top_normalized(self.max_topics)
    }

    /// Add one turn's text to the corpus.
    pub fn observe(&mut self, text: &str) {
        let distinct: BTreeSet<String> = tokenize(text).into_iter().collect();
        for term in &distinct {
            *self.doc_freq.entry(term.clone()).or_insert(0) += 1;
        }
        self.corpus.push_back(distinct);
        while self.corpus.len() > self.corpus_size {
            let Some(dropped) = self.corpus.pop_front() else {
                break;
            };
            for term in dropped {
                if let Some(count) = self.doc_freq.get_mut(&term) {
                    *count -= 1;
                    if *count == 0 {
                        let _ = self.doc_freq.remove(&term);
                    }
                }
            }
        }
    }

    /// Extract, then observe.
    pub fn ingest(&mut self, text: &str) -> Topics {
        let topics = self.extract(text);
        self.observe(text);
        topics
    }

    /// Turns currently in the corpus.
    #[must_use]
    pub fn corpus_len(&self) -> usize {
        self.corpus.len()
    }

    /// Number of corpus turns containing `term`.
    #[must_use]
    pub fn document_frequency(&self, term: &str) -> usize {
        self.doc_freq.get(term).copied().unwrap_or(0)
    }

    /// Topic cap per extraction.
    #[must_use]
    pub fn max_topics(&self) -> usize {
        self.max_topics
    }
}
