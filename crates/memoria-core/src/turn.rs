//! Dialogue turns.
//!
//! A [`Turn`] is immutable once built: its token cost and modality tags are
//! computed in the constructor and the fields are only reachable through
//! getters.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::TurnId;
use crate::tokens::{estimate_attachment_tokens, estimate_text_tokens};

/// Who produced a turn.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// End user input.
    User,
    /// Generated reply.
    Assistant,
    /// Operator or system instruction.
    System,
}

impl Role {
    /// Lowercase label used in summaries and serialized context.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
        }
    }
}

/// Content modality tag.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Modality {
    /// Plain text.
    Text,
    /// Still image.
    Image,
    /// Audio clip.
    Audio,
    /// Video clip.
    Video,
    /// Arbitrary file.
    File,
}

impl Modality {
    /// Whether this is the plain-text modality.
    #[must_use]
    pub fn is_text(self) -> bool {
        matches!(self, Self::Text)
    }
}

/// Non-text payload attached to a turn. Only its description participates in
/// topic extraction and summarization.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    /// Payload modality (never `Text`).
    pub modality: Modality,
    /// Textual description of the payload.
    pub description: String,
    /// Payload size, if known.
    #[serde(default)]
    pub size_bytes: Option<u64>,
}

/// Text plus an optional non-text payload.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnContent {
    /// Message text.
    #[serde(default)]
    pub text: String,
    /// Optional non-text payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment: Option<Attachment>,
}

impl TurnContent {
    /// Text-only content.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            attachment: None,
        }
    }

    /// Attach a non-text payload.
    #[must_use]
    pub fn with_attachment(mut self, attachment: Attachment) -> Self {
        self.attachment = Some(attachment);
        self
    }
}

/// A single immutable dialogue turn.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Turn {
    id: TurnId,
    timestamp: DateTime<Utc>,
    role: Role,
    content: TurnContent,
    modalities: BTreeSet<Modality>,
    token_count: u32,
}

impl Turn {
    /// Build a turn stamped with the current time.
    #[must_use]
    pub fn new(role: Role, content: TurnContent) -> Self {
        Self::at(role, content, Utc::now())
    }

    /// Build a text-only turn stamped with the current time.
    #[must_use]
    pub fn text(role: Role, text: impl Into<String>) -> Self {
        Self::new(role, TurnContent::text(text))
    }

    /// Build a turn with an explicit timestamp.
    #[must_use]
    pub fn at(role: Role, content: TurnContent, timestamp: DateTime<Utc>) -> Self {
        let mut modalities = BTreeSet::new();
        let mut token_count = estimate_text_tokens(&content.text);
        if !content.text.is_empty() {
            let _ = modalities.insert(Modality::Text);
        }
        if let Some(attachment) = &content.attachment {
            let _ = modalities.insert(attachment.modality);
            token_count =
                token_count.saturating_add(estimate_attachment_tokens(&attachment.description));
        }
        Self {
            id: TurnId::new(),
            timestamp,
            role,
            content,
            modalities,
            token_count,
        }
    }

    /// Turn ID.
    #[must_use]
    pub fn id(&self) -> &TurnId {
        &self.id
    }

    /// Creation time.
    #[must_use]
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Author role.
    #[must_use]
    pub fn role(&self) -> Role {
        self.role
    }

    /// Raw content.
    #[must_use]
    pub fn content(&self) -> &TurnContent {
        &self.content
    }

    /// Modality tags present in this turn.
    #[must_use]
    pub fn modalities(&self) -> &BTreeSet<Modality> {
        &self.modalities
    }

    /// Estimated token cost, fixed at creation.
    #[must_use]
    pub fn token_count(&self) -> u32 {
        self.token_count
    }

    /// Text used for topic extraction: the message text followed by the
    /// attachment description, if any.
    #[must_use]
    pub fn textual(&self) -> String {
        match &self.content.attachment {
            Some(a) if self.content.text.is_empty() => a.description.clone(),
            Some(a) => format!("{} {}", self.content.text, a.description),
            None => self.content.text.clone(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
