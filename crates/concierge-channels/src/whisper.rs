//! Whisper transcription for inbound voice notes.

use async_trait::async_trait;
use concierge_core::{config::WhisperConfig, error::ConciergeError, traits::Transcriber};
use serde::Deserialize;

/// Whisper API response.
#[derive(Deserialize)]
struct WhisperResponse {
    text: String,
}

/// OpenAI-compatible `/audio/transcriptions` client.
pub struct WhisperTranscriber {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl WhisperTranscriber {
    /// Build from config. Returns `None` when no API key is set (voice disabled).
    pub fn from_config(config: &WhisperConfig) -> Option<Self> {
        let api_key = config.api_key.as_deref().filter(|k| !k.is_empty())?;
        Some(Self {
            client: reqwest::Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: config.model.clone(),
        })
    }
}

#[async_trait]
impl Transcriber for WhisperTranscriber {
    async fn transcribe(&self, audio: &[u8]) -> Result<String, ConciergeError> {
        let part = reqwest::multipart::Part::bytes(audio.to_vec())
            .file_name("voice.ogg")
            .mime_str("audio/ogg")
            .map_err(|e| ConciergeError::Transcription(format!("whisper mime error: {e}")))?;

        let form = reqwest::multipart::Form::new()
            .text("model", self.model.clone())
            .part("file", part);

        let resp = self
            .client
            .post(format!("{}/audio/transcriptions", self.base_url))
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| ConciergeError::Transcription(format!("whisper request failed: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(ConciergeError::Transcription(format!(
                "whisper API error {status}: {body}"
            )));
        }

        let result: WhisperResponse = resp.json().await.map_err(|e| {
            ConciergeError::Transcription(format!("whisper response parse failed: {e}"))
        })?;

        Ok(result.text.trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_without_key() {
        assert!(WhisperTranscriber::from_config(&WhisperConfig::default()).is_none());
        let empty = WhisperConfig {
            api_key: Some(String::new()),
            ..Default::default()
        };
        assert!(WhisperTranscriber::from_config(&empty).is_none());
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let cfg = WhisperConfig {
            api_key: Some("sk-test".to_string()),
            base_url: "https://api.example.com/v1/".to_string(),
            ..Default::default()
        };
        let t = WhisperTranscriber::from_config(&cfg).unwrap();
        assert_eq!(t.base_url, "https://api.example.com/v1");
        assert_eq!(t.model, "whisper-1");
    }
}
