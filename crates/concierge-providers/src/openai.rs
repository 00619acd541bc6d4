//! Chat-completions provider for turns no keyword rule answers.
//!
//! `base_url` may point at OpenAI or any server speaking the same API.

use async_trait::async_trait;
use concierge_core::{error::ConciergeError, traits::Provider};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::debug;

/// Single-shot chat-completions client.
pub struct OpenAiProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl OpenAiProvider {
    pub fn from_config(base_url: String, api_key: String, model: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
            api_key,
            model,
        }
    }
}

/// Build OpenAI-format messages (system as a message role).
fn build_openai_messages(system: &str, message: &str) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(2);
    if !system.is_empty() {
        messages.push(ChatMessage {
            role: "system".to_string(),
            content: system.to_string(),
        });
    }
    messages.push(ChatMessage {
        role: "user".to_string(),
        content: message.to_string(),
    });
    messages
}

#[derive(Serialize, Deserialize, Clone)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Option<Vec<ChatChoice>>,
    usage: Option<ChatUsage>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: Option<ChatMessage>,
}

#[derive(Deserialize)]
struct ChatUsage {
    total_tokens: Option<u64>,
}

/// First choice's text, if the provider produced any.
fn first_choice_text(resp: &ChatCompletionResponse) -> Option<String> {
    resp.choices
        .as_ref()
        .and_then(|c| c.first())
        .and_then(|c| c.message.as_ref())
        .map(|m| m.content.trim().to_string())
        .filter(|t| !t.is_empty())
}

#[async_trait]
impl Provider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    async fn complete(&self, system: &str, message: &str) -> Result<String, ConciergeError> {
        let start = Instant::now();
        let body = ChatCompletionRequest {
            model: self.model.clone(),
            messages: build_openai_messages(system, message),
        };

        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        debug!("openai: POST {url} model={}", self.model);

        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ConciergeError::Provider(format!("openai request failed: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(ConciergeError::Provider(format!(
                "openai returned {status}: {text}"
            )));
        }

        let parsed: ChatCompletionResponse = resp.json().await.map_err(|e| {
            ConciergeError::Provider(format!("openai: failed to parse response: {e}"))
        })?;

        let text = first_choice_text(&parsed)
            .ok_or_else(|| ConciergeError::Provider("openai returned no content".into()))?;

        debug!(
            "openai: {} tokens in {}ms",
            parsed.usage.as_ref().and_then(|u| u.total_tokens).unwrap_or(0),
            start.elapsed().as_millis()
        );
        Ok(text)
    }
}
