//! Token estimation.
//!
//! Budgets are enforced against an estimate, not a model tokenizer: four
//! characters per token, rounded up. Non-text payloads cost their textual
//! description plus a fixed floor so an image with a one-word caption is
//! never treated as nearly free.

/// Characters per token for text estimation.
pub const CHARS_PER_TOKEN: usize = 4;

/// Minimum token cost of any non-text payload.
pub const MIN_ATTACHMENT_TOKENS: u32 = 85;

/// Estimate the token cost of a piece of text.
#[must_use]
pub fn estimate_text_tokens(text: &str) -> u32 {
    let chars = text.chars().count();
    u32::try_from(chars.div_ceil(CHARS_PER_TOKEN)).unwrap_or(u32::MAX)
}

/// Estimate the token cost of a non-text payload from its description.
#[must_use]
pub fn estimate_attachment_tokens(description: &str) -> u32 {
    estimate_text_tokens(description).saturating_add(MIN_ATTACHMENT_TOKENS)
}
