//! # memoria-context
//!
//! The bounded active window of a conversation.
//!
//! - [`TopicExtractor`]: sliding-corpus TF-IDF topics per turn
//! - [`ImportanceScorer`]: recency, salience, modality and user-signal scoring
//! - [`SegmentStore`]: turn grouping, eviction to the summary store, rehydration
//! - [`ContextWindowManager`]: budget enforcement, degraded mode, context assembly
//! - [`SummarySearch`]: restartable topic search over stored summaries
//! - [`ResilientStore`]: timeout, retry, cancellation and caching around a
//!   [`memoria_store::SummaryStore`]

#![deny(unsafe_code)]

pub mod cache;
pub mod errors;
pub mod persistence;
pub mod scoring;
pub mod search;
pub mod segment;
pub mod segment_store;
pub mod summarizer;
pub mod topics;
pub mod window;

pub use cache::{SummaryCache, TtlCache};
pub use errors::{ContextError, DegradedMode, DegradedReason, Result};
pub use persistence::ResilientStore;
pub use scoring::{ImportanceScorer, ScoringContext};
pub use search::{ScoredSummary, SummarySearch};
pub use segment::Segment;
pub use segment_store::{AnnotatedTurn, Placement, SegmentStore};
pub use summarizer::{ExtractiveSummarizer, SegmentSummary, Summarizer, SummarizerError};
pub use topics::TopicExtractor;
pub use window::{
    ContextSegment, ContextSource, ContextWindowManager, EvictionReport, IngestOutcome,
    WindowConfig, WindowSnapshot, render_context,
};
