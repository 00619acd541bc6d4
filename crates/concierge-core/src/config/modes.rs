//! Conversation-mode settings: handoff and survey.
//!
//! Both sections have defaults in `config.toml` and can be overridden at
//! runtime by key/value rows from a [`crate::traits::ConfigSource`].

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::ConciergeError;

use super::defaults::*;

/// Longest allowed handoff pause: 30 days.
pub const MAX_PAUSE_MINUTES: i64 = 30 * 24 * 60;

/// Human handoff configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandoffConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Phrases that request a human. Matched case-insensitively as substrings.
    #[serde(default = "default_trigger_phrases")]
    pub trigger_phrases: Vec<String>,
    /// How long automation stays silent after a handoff.
    #[serde(default = "default_pause_minutes")]
    pub pause_minutes: i64,
    /// Phone that receives handoff alerts. Empty = no alert.
    #[serde(default)]
    pub admin_phone: String,
    /// Fixed reply sent to the customer.
    #[serde(default = "default_ack_message")]
    pub ack_message: String,
    /// Alert template; `{phone}` and `{message}` are substituted.
    #[serde(default = "default_admin_template")]
    pub admin_template: String,
}

impl Default for HandoffConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            trigger_phrases: default_trigger_phrases(),
            pause_minutes: default_pause_minutes(),
            admin_phone: String::new(),
            ack_message: default_ack_message(),
            admin_template: default_admin_template(),
        }
    }
}

impl HandoffConfig {
    /// Overlay key/value rows. Unknown keys and bad values are logged and
    /// leave the current value in place.
    pub fn apply_overrides(&mut self, pairs: &[(String, String)]) {
        for (key, value) in pairs {
            let value = value.trim();
            match key.trim().to_lowercase().as_str() {
                "enabled" => set_bool(&mut self.enabled, key, value),
                "trigger_phrases" => self.trigger_phrases = split_list(value),
                "pause_minutes" => match value.parse::<i64>() {
                    Ok(n) if (1..=MAX_PAUSE_MINUTES).contains(&n) => self.pause_minutes = n,
                    _ => warn!(
                        "handoff setting pause_minutes: '{value}' is not within 1..={MAX_PAUSE_MINUTES}"
                    ),
                },
                "admin_phone" => self.admin_phone = value.to_string(),
                "ack_message" => self.ack_message = value.to_string(),
                "admin_template" => self.admin_template = value.to_string(),
                other => warn!("handoff setting: unknown key '{other}'"),
            }
        }
    }

    pub(super) fn validate(&self) -> Result<(), ConciergeError> {
        if !(1..=MAX_PAUSE_MINUTES).contains(&self.pause_minutes) {
            return Err(ConciergeError::Config(format!(
                "handoff pause_minutes ({}) must be within 1..={MAX_PAUSE_MINUTES}",
                self.pause_minutes
            )));
        }
        Ok(())
    }

    /// Whether `text` asks for a human.
    pub fn matches(&self, text: &str) -> bool {
        let lower = text.to_lowercase();
        self.trigger_phrases
            .iter()
            .map(|p| p.trim().to_lowercase())
            .any(|p| !p.is_empty() && lower.contains(&p))
    }

    /// Render the admin alert.
    pub fn render_alert(&self, phone: &str, message: &str) -> String {
        self.admin_template
            .replace("{phone}", phone)
            .replace("{message}", message)
    }
}

/// Survey configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SurveyConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Exact (trimmed, case-insensitive) text that starts a survey.
    #[serde(default = "default_survey_keyword")]
    pub keyword: String,
    #[serde(default = "default_welcome_message")]
    pub welcome_message: String,
    #[serde(default = "default_thank_you_message")]
    pub thank_you_message: String,
    /// Fallback questions when the config source has none.
    #[serde(default)]
    pub questions: Vec<String>,
}

impl Default for SurveyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            keyword: default_survey_keyword(),
            welcome_message: default_welcome_message(),
            thank_you_message: default_thank_you_message(),
            questions: Vec::new(),
        }
    }
}

impl SurveyConfig {
    pub fn apply_overrides(&mut self, pairs: &[(String, String)]) {
        for (key, value) in pairs {
            let value = value.trim();
            match key.trim().to_lowercase().as_str() {
                "enabled" => set_bool(&mut self.enabled, key, value),
                "keyword" => self.keyword = value.to_string(),
                "welcome_message" => self.welcome_message = value.to_string(),
                "thank_you_message" => self.thank_you_message = value.to_string(),
                other => warn!("survey setting: unknown key '{other}'"),
            }
        }
    }

    /// Whether `text` is the survey trigger.
    pub fn is_trigger(&self, text: &str) -> bool {
        let keyword = self.keyword.trim();
        !keyword.is_empty() && text.trim().to_lowercase() == keyword.to_lowercase()
    }
}

fn set_bool(slot: &mut bool, key: &str, value: &str) {
    match value.to_lowercase().as_str() {
        "true" | "1" | "yes" | "si" | "sí" => *slot = true,
        "false" | "0" | "no" => *slot = false,
        _ => warn!("setting {key}: expected a boolean, got '{value}'"),
    }
}

/// Split a comma- or newline-separated list, dropping blanks.
fn split_list(value: &str) -> Vec<String> {
    value
        .split([',', '\n'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
