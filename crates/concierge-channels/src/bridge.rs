//! HTTP bridge channel.
//!
//! The messaging session (pairing, encryption, wire protocol) is owned by an
//! external bridge process. Outbound messages are POSTed to `{url}/send`;
//! inbound events are pushed in through [`BridgeChannel::push`], which the
//! API's `/api/inbound` route calls.

use async_trait::async_trait;
use concierge_core::{
    config::BridgeConfig,
    error::ConciergeError,
    message::{IncomingMessage, OutgoingMessage},
    traits::Channel,
};
use serde::Serialize;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info};

/// Longest text body the transport accepts in one message.
const MAX_MESSAGE_LEN: usize = 4096;

/// Body of a `POST {url}/send` call.
#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct SendPayload<'a> {
    pub to: &'a str,
    pub text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_url: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<&'a str>,
}

/// What happened to a pushed inbound event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Accepted,
    /// Dropped by channel policy (group chat, empty event).
    Ignored,
}

/// Channel that talks to an external transport bridge over HTTP.
pub struct BridgeChannel {
    config: BridgeConfig,
    client: reqwest::Client,
    /// Inbound sender: set after `start()`.
    tx: Mutex<Option<mpsc::Sender<IncomingMessage>>>,
}

impl BridgeChannel {
    pub fn new(config: BridgeConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
            tx: Mutex::new(None),
        }
    }

    /// Feed one inbound event into the gateway.
    pub async fn push(&self, mut msg: IncomingMessage) -> Result<PushOutcome, ConciergeError> {
        if msg.is_group && self.config.ignore_groups {
            debug!("bridge: ignoring group message from {}", msg.sender_id);
            return Ok(PushOutcome::Ignored);
        }
        if msg.text.trim().is_empty() && msg.audio.is_none() {
            debug!("bridge: ignoring empty event from {}", msg.sender_id);
            return Ok(PushOutcome::Ignored);
        }
        msg.channel = self.name().to_string();

        // The lock is not held across the send.
        let tx = self
            .tx
            .lock()
            .await
            .clone()
            .ok_or_else(|| ConciergeError::Channel("bridge channel not started".into()))?;
        tx.send(msg)
            .await
            .map_err(|_| ConciergeError::Channel("gateway receiver dropped".into()))?;
        Ok(PushOutcome::Accepted)
    }

    async fn post_send(&self, payload: &SendPayload<'_>) -> Result<(), ConciergeError> {
        let url = format!("{}/send", self.config.url.trim_end_matches('/'));
        let mut req = self.client.post(&url).json(payload);
        if !self.config.token.is_empty() {
            req = req.bearer_auth(&self.config.token);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| ConciergeError::Channel(format!("bridge request failed: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(ConciergeError::Channel(format!(
                "bridge send error {status}: {body}"
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl Channel for BridgeChannel {
    fn name(&self) -> &str {
        "bridge"
    }

    async fn start(&self) -> Result<mpsc::Receiver<IncomingMessage>, ConciergeError> {
        let (tx, rx) = mpsc::channel(256);
        *self.tx.lock().await = Some(tx);
        info!("Bridge channel started ({})", self.config.url);
        Ok(rx)
    }

    async fn send(&self, message: OutgoingMessage) -> Result<(), ConciergeError> {
        let target = message
            .reply_target
            .as_deref()
            .ok_or_else(|| ConciergeError::Channel("no reply_target on outgoing message".into()))?;

        let chunks = split_message(&message.text, MAX_MESSAGE_LEN);
        for (i, chunk) in chunks.iter().enumerate() {
            // Media rides on the first chunk only.
            let media = if i == 0 { message.media.as_ref() } else { None };
            let payload = SendPayload {
                to: target,
                text: chunk,
                media_url: media.map(|m| m.url.as_str()),
                filename: media.and_then(|m| m.filename.as_deref()),
            };
            self.post_send(&payload).await?;
        }
        Ok(())
    }

    async fn stop(&self) -> Result<(), ConciergeError> {
        *self.tx.lock().await = None;
        info!("Bridge channel stopped");
        Ok(())
    }
}

/// Split text into chunks of at most `max_len` bytes, preferring newline
/// boundaries and never cutting through a UTF-8 character.
fn split_message(text: &str, max_len: usize) -> Vec<&str> {
    if text.len() <= max_len {
        return vec![text];
    }

    let mut chunks = Vec::new();
    let mut start = 0;

    while start < text.len() {
        let mut end = (start + max_len).min(text.len());
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        let break_at = if end < text.len() {
            text[start..end]
                .rfind('\n')
                .map(|i| start + i + 1)
                .unwrap_or(end)
        } else {
            end
        };
        chunks.push(&text[start..break_at]);
        start = break_at;
    }

    chunks
}
