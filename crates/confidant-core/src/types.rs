//! Core types for Confidant — conversation envelopes and their content.
//!
//! A [`MessageEnvelope`] is one turn of a dialogue. Its [`Content`] is either
//! a single text string or an ordered list of typed [`Part`]s (text and
//! images). Conversion to the model wire format lives in `confidant-providers`;
//! this module only models the conversation itself.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ─────────────────────────────────────────────
// Role
// ─────────────────────────────────────────────

/// Who produced a turn.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    /// Wire/storage name (`"system"`, `"user"`, `"assistant"`).
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }

    /// Parse a stored role name. Unknown names yield `None`.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "system" => Some(Role::System),
            "user" => Some(Role::User),
            "assistant" => Some(Role::Assistant),
            _ => None,
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─────────────────────────────────────────────
// Content
// ─────────────────────────────────────────────

/// Turn content: either plain text or an ordered sequence of parts.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "form", content = "value", rename_all = "lowercase")]
pub enum Content {
    /// Single text string (the common case).
    Text(String),
    /// Multimodal content; part order is preserved.
    Parts(Vec<Part>),
}

/// One part of a multimodal turn.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Part {
    Text {
        value: String,
    },
    /// Inline image; `encoding` is the MIME type, `data` is base64.
    Image {
        encoding: String,
        data: String,
    },
}

impl Content {
    /// An image followed by its caption, the shape used for photo turns.
    pub fn image_with_caption(
        encoding: impl Into<String>,
        data: impl Into<String>,
        caption: impl Into<String>,
    ) -> Self {
        Content::Parts(vec![
            Part::Image {
                encoding: encoding.into(),
                data: data.into(),
            },
            Part::Text {
                value: caption.into(),
            },
        ])
    }

    /// Whether this content is stored in structured form.
    pub fn is_multimodal(&self) -> bool {
        matches!(self, Content::Parts(_))
    }

    /// Whether any part is an image.
    pub fn has_image(&self) -> bool {
        match self {
            Content::Text(_) => false,
            Content::Parts(parts) => parts.iter().any(|p| matches!(p, Part::Image { .. })),
        }
    }

    /// Concatenated text of the content (image parts are skipped).
    pub fn text(&self) -> String {
        match self {
            Content::Text(text) => text.clone(),
            Content::Parts(parts) => parts
                .iter()
                .filter_map(|p| match p {
                    Part::Text { value } => Some(value.as_str()),
                    Part::Image { .. } => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

impl From<String> for Content {
    fn from(s: String) -> Self {
        Content::Text(s)
    }
}

impl From<&str> for Content {
    fn from(s: &str) -> Self {
        Content::Text(s.to_string())
    }
}

// ─────────────────────────────────────────────
// MessageEnvelope
// ─────────────────────────────────────────────

/// A single role-tagged turn belonging to one session.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct MessageEnvelope {
    pub role: Role,
    pub content: Content,
    pub session_id: String,
    /// Insertion time. Ordering within a session comes from the durable log.
    pub created_at: DateTime<Utc>,
}

impl MessageEnvelope {
    /// Create an envelope stamped with the current time.
    pub fn new(session_id: impl Into<String>, role: Role, content: impl Into<Content>) -> Self {
        MessageEnvelope {
            role,
            content: content.into(),
            session_id: session_id.into(),
            created_at: Utc::now(),
        }
    }

    /// Create a system envelope.
    pub fn system(session_id: impl Into<String>, content: impl Into<Content>) -> Self {
        Self::new(session_id, Role::System, content)
    }

    /// Create a user envelope.
    pub fn user(session_id: impl Into<String>, content: impl Into<Content>) -> Self {
        Self::new(session_id, Role::User, content)
    }

    /// Create an assistant envelope.
    pub fn assistant(session_id: impl Into<String>, content: impl Into<Content>) -> Self {
        Self::new(session_id, Role::Assistant, content)
    }
}

// ─────────────────────────────────────────────
// Media attachments
// ─────────────────────────────────────────────

/// A media attachment (photo) downloaded from a channel message.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct MediaAttachment {
    /// MIME type (e.g. "image/jpeg").
    pub mime_type: String,
    /// Local file path to the media.
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
