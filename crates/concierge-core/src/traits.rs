use crate::{
    error::ConciergeError,
    message::{IncomingMessage, OutgoingMessage},
    phone::ConversationKey,
    schedule::{MessageStatus, ScheduledMessage},
};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};

/// Messaging Channel trait: the delivery primitive and inbound stream.
///
/// The transport itself (session, pairing, wire protocol) lives outside
/// Concierge; implementations only bridge to it.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Human-readable channel name.
    fn name(&self) -> &str;

    /// Start listening for incoming messages.
    /// Returns a receiver that yields incoming messages.
    async fn start(&self) -> Result<tokio::sync::mpsc::Receiver<IncomingMessage>, ConciergeError>;

    /// Deliver a message (optionally with media) to `message.reply_target`.
    async fn send(&self, message: OutgoingMessage) -> Result<(), ConciergeError>;

    /// Graceful shutdown.
    async fn stop(&self) -> Result<(), ConciergeError>;
}

/// Speech-to-text for voice notes.
#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, audio: &[u8]) -> Result<String, ConciergeError>;
}

/// Senders the assistant must never answer.
#[async_trait]
pub trait BlockList: Send + Sync {
    async fn is_blocked(&self, key: &ConversationKey) -> Result<bool, ConciergeError>;

    async fn add(&self, key: &ConversationKey, reason: &str) -> Result<(), ConciergeError>;

    /// Returns whether an entry was removed.
    async fn remove(&self, key: &ConversationKey) -> Result<bool, ConciergeError>;
}

/// Editable runtime configuration (the operator-facing settings sheet).
///
/// Section reads return raw key/value pairs; callers overlay them on the
/// defaults from `config.toml`.
#[async_trait]
pub trait ConfigSource: Send + Sync {
    async fn handoff_settings(&self) -> Result<Vec<(String, String)>, ConciergeError>;

    async fn survey_settings(&self) -> Result<Vec<(String, String)>, ConciergeError>;

    /// Survey questions in the order they are asked.
    async fn survey_questions(&self) -> Result<Vec<String>, ConciergeError>;
}

/// Pre-queued outbound messages.
#[async_trait]
pub trait Backlog: Send + Sync {
    /// Pending rows whose due date is at or before `now` (local wall time),
    /// in backlog order.
    async fn list_due(&self, now: NaiveDateTime) -> Result<Vec<ScheduledMessage>, ConciergeError>;

    async fn update_status(&self, id: &str, status: MessageStatus) -> Result<(), ConciergeError>;
}

/// Sink for completed surveys.
#[async_trait]
pub trait SurveyResults: Send + Sync {
    /// Persist one completed survey; `answers` align with the question
    /// snapshot taken when the survey started.
    async fn append(
        &self,
        key: &ConversationKey,
        completed_at: DateTime<Utc>,
        answers: &[String],
    ) -> Result<(), ConciergeError>;
}

/// Produces the reply for a turn no other mode claimed.
#[async_trait]
pub trait Responder: Send + Sync {
    async fn respond(&self, text: &str, key: &ConversationKey) -> Result<String, ConciergeError>;
}

/// A canned reply chosen when the turn contains `keyword`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeywordRule {
    pub keyword: String,
    pub reply: String,
}

/// Operator-maintained keyword → reply table, consulted before the
/// generative fallback.
#[async_trait]
pub trait KeywordRuleSource: Send + Sync {
    /// Rules in priority order.
    async fn keyword_rules(&self) -> Result<Vec<KeywordRule>, ConciergeError>;
}

/// Generative text provider: the last link of the responder chain.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Human-readable provider name.
    fn name(&self) -> &str;

    /// Complete `message` under `system` instructions.
    async fn complete(&self, system: &str, message: &str) -> Result<String, ConciergeError>;
}
