//! # memoria-runtime
//!
//! Conversation registry and the external surface of Memoria.
//!
//! - [`MemoryService`]: submit, context assembly, prediction, feedback,
//!   search, rehydration, teardown and `respond`
//! - [`Conversation`]: one window and action graph behind their own locks,
//!   with a cancellation token
//! - [`ConversationExecutor`]: runs action-graph operations on a conversation
//! - [`GenerationService`]: the language-generation seam, called through
//!   [`GenerationClient`] with a timeout and at most one retry

#![deny(unsafe_code)]

pub mod conversation;
pub mod errors;
pub mod executor;
pub mod generation;
pub mod service;

pub use conversation::Conversation;
pub use errors::{Result, RuntimeError};
pub use executor::ConversationExecutor;
pub use generation::{
    GenerationClient, GenerationError, GenerationFailure, GenerationRequest, GenerationService,
};
pub use service::{Execution, MemoryService, Response};
