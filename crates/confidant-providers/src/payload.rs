//! OpenAI-compatible wire types for `/v1/chat/completions` and `/v1/models`.
//!
//! Only the fields the local model server needs are modelled. Multimodal
//! content is sent as an array of parts with every image before any text.

use serde::{Deserialize, Serialize};

use confidant_core::types::{Content, MessageEnvelope, Part, Role};

// ─────────────────────────────────────────────
// Request
// ─────────────────────────────────────────────

/// Chat completion request body.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ChatPayload {
    pub messages: Vec<WireMessage>,
    pub temperature: f64,
    pub max_tokens: u32,
    pub stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repeat_penalty: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f64>,
}

impl ChatPayload {
    /// Whether the anti-repetition penalties are present.
    pub fn has_penalties(&self) -> bool {
        self.repeat_penalty.is_some()
            || self.frequency_penalty.is_some()
            || self.presence_penalty.is_some()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct WireMessage {
    pub role: Role,
    pub content: WireContent,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum WireContent {
    Text(String),
    Parts(Vec<WirePart>),
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WirePart {
    ImageUrl { image_url: ImageUrl },
    Text { text: String },
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ImageUrl {
    pub url: String,
}

impl WireMessage {
    pub fn system(text: impl Into<String>) -> Self {
        WireMessage {
            role: Role::System,
            content: WireContent::Text(text.into()),
        }
    }
}

impl From<&Content> for WireContent {
    fn from(content: &Content) -> Self {
        match content {
            Content::Text(text) => WireContent::Text(text.clone()),
            Content::Parts(parts) => {
                let images = parts.iter().filter_map(|p| match p {
                    Part::Image { encoding, data } => Some(WirePart::ImageUrl {
                        image_url: ImageUrl {
                            url: format!("data:{encoding};base64,{data}"),
                        },
                    }),
                    Part::Text { .. } => None,
                });
                let texts = parts.iter().filter_map(|p| match p {
                    Part::Text { value } => Some(WirePart::Text {
                        text: value.clone(),
                    }),
                    Part::Image { .. } => None,
                });
                WireContent::Parts(images.chain(texts).collect())
            }
        }
    }
}

impl From<&MessageEnvelope> for WireMessage {
    fn from(envelope: &MessageEnvelope) -> Self {
        WireMessage {
            role: envelope.role,
            content: WireContent::from(&envelope.content),
        }
    }
}

// ─────────────────────────────────────────────
// Responses
// ─────────────────────────────────────────────

/// `GET /v1/models` body.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct ModelsResponse {
    #[serde(default)]
    pub data: Vec<ModelEntry>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ModelEntry {
    #[serde(default)]
    pub id: String,
}

/// `POST /v1/chat/completions` body (only what we read).
#[derive(Clone, Debug, Deserialize)]
pub struct ChatCompletionResponse {
    #[serde(default)]
    pub choices: Vec<Choice>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Choice {
    pub message: ChoiceMessage,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ChoiceMessage {
    #[serde(default)]
    pub content: Option<String>,
}
