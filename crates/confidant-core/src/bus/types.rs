//! Bus event types — messages flowing between the chat channel and the assistant.

use crate::types::MediaAttachment;
use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// An inbound message from a channel to the assistant.
#[derive(Clone, Debug)]
pub struct InboundMessage {
    /// Channel name (e.g. "telegram").
    pub channel: String,
    /// Sender identifier within the channel.
    pub sender_id: String,
    /// Chat/conversation identifier.
    pub chat_id: String,
    /// Text of the message, or the caption of a photo (possibly empty).
    pub content: String,
    /// When the message was received.
    pub timestamp: DateTime<Utc>,
    /// Downloaded photos.
    pub media: Vec<MediaAttachment>,
    /// Channel-specific metadata (e.g. message_id, username).
    pub metadata: HashMap<String, String>,
}

impl InboundMessage {
    pub fn new(
        channel: impl Into<String>,
        sender_id: impl Into<String>,
        chat_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        InboundMessage {
            channel: channel.into(),
            sender_id: sender_id.into(),
            chat_id: chat_id.into(),
            content: content.into(),
            timestamp: Utc::now(),
            media: Vec::new(),
            metadata: HashMap::new(),
        }
    }

    /// Session key combining channel and chat_id (e.g. "telegram:123456").
    pub fn session_key(&self) -> String {
        format!("{}:{}", self.channel, self.chat_id)
    }

    /// Split a `/command arg...` message into `(command, args)`.
    ///
    /// The command is lowercased and a `@botname` suffix is dropped.
    /// Photos never count as commands.
    pub fn command(&self) -> Option<(String, String)> {
        if !self.media.is_empty() {
            return None;
        }
        let text = self.content.trim();
        let rest = text.strip_prefix('/')?;
        let (head, args) = match rest.split_once(char::is_whitespace) {
            Some((head, args)) => (head, args.trim()),
            None => (rest, ""),
        };
        let name = head.split('@').next().unwrap_or(head).to_lowercase();
        if name.is_empty() {
            return None;
        }
        Some((name, args.to_string()))
    }
}

/// An outbound message from the assistant to a channel.
#[derive(Clone, Debug)]
pub struct OutboundMessage {
    /// Target channel name.
    pub channel: String,
    /// Target chat/conversation identifier.
    pub chat_id: String,
    /// Text content to send (Markdown).
    pub content: String,
    /// Optional message ID to reply to.
    pub reply_to: Option<String>,
}

impl OutboundMessage {
    pub fn new(
        channel: impl Into<String>,
        chat_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        OutboundMessage {
            channel: channel.into(),
            chat_id: chat_id.into(),
            content: content.into(),
            reply_to: None,
        }
    }

    /// Reply to the given inbound message on the same chat.
    pub fn reply(to: &InboundMessage, content: impl Into<String>) -> Self {
        OutboundMessage {
            channel: to.channel.clone(),
            chat_id: to.chat_id.clone(),
            content: content.into(),
            reply_to: to.metadata.get("message_id").cloned(),
        }
    }
}
