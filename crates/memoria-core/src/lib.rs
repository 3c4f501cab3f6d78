//! # memoria-core
//!
//! Shared vocabulary for the Memoria conversational-memory workspace.
//!
//! - **Branded IDs**: `ConversationId`, `TurnId`, `SegmentId` newtypes
//! - **Turns**: immutable dialogue turns with role, content and modality tags
//! - **Topics**: deterministic topic→weight maps and the shared tokenizer
//! - **Summaries**: the durable `SummaryRecord` written on eviction
//! - **Retry**: backoff math shared by store and generation callers
//! - **Logging**: `tracing` subscriber setup

#![deny(unsafe_code)]

pub mod constants;
pub mod ids;
pub mod logging;
pub mod retry;
pub mod summary;
pub mod tokens;
pub mod topics;
pub mod turn;

pub use ids::{ConversationId, SegmentId, TurnId};
pub use summary::SummaryRecord;
pub use topics::{TopicQuery, Topics};
pub use turn::{Attachment, Modality, Role, Turn, TurnContent};
