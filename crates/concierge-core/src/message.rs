use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What an inbound event carries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    /// Plain text, ready for the pipeline.
    #[default]
    Text,
    /// Voice note. `audio` holds the payload; it must be transcribed first.
    Voice,
}

/// An incoming message from a channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncomingMessage {
    pub id: Uuid,
    /// Channel name (e.g. "bridge").
    pub channel: String,
    /// Platform-specific sender ID (phone number or JID).
    pub sender_id: String,
    /// Human-readable sender name.
    pub sender_name: Option<String>,
    /// Message text content. Empty for voice notes until transcribed.
    pub text: String,
    #[serde(default)]
    pub kind: MessageKind,
    /// Raw audio bytes for voice notes.
    #[serde(default, skip_serializing)]
    pub audio: Option<Vec<u8>>,
    pub timestamp: DateTime<Utc>,
    /// Platform-specific target for routing the response (e.g. a chat JID).
    #[serde(default)]
    pub reply_target: Option<String>,
    /// Whether this message comes from a group chat.
    #[serde(default)]
    pub is_group: bool,
    /// Whatever the transport attached to the event, passed through untouched.
    #[serde(default)]
    pub raw: serde_json::Value,
}

impl IncomingMessage {
    /// Build a text message with a fresh ID and the current timestamp.
    pub fn text(channel: &str, sender_id: &str, text: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            channel: channel.to_string(),
            sender_id: sender_id.to_string(),
            sender_name: None,
            text: text.to_string(),
            kind: MessageKind::Text,
            audio: None,
            timestamp: Utc::now(),
            reply_target: Some(sender_id.to_string()),
            is_group: false,
            raw: serde_json::Value::Null,
        }
    }

    /// Where replies to this message should go.
    pub fn target(&self) -> &str {
        self.reply_target.as_deref().unwrap_or(&self.sender_id)
    }
}

/// A media attachment on an outgoing message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaRef {
    /// URL the transport fetches the media from.
    pub url: String,
    #[serde(default)]
    pub filename: Option<String>,
}

/// An outgoing message to deliver through a channel.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OutgoingMessage {
    pub text: String,
    /// Platform-specific target for routing (phone number or chat JID).
    #[serde(default)]
    pub reply_target: Option<String>,
    #[serde(default)]
    pub media: Option<MediaRef>,
}

impl OutgoingMessage {
    /// Plain text to a target.
    pub fn to(target: &str, text: &str) -> Self {
        Self {
            text: text.to_string(),
            reply_target: Some(target.to_string()),
            media: None,
        }
    }
}
