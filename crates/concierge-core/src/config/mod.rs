mod defaults;
mod modes;


pub use modes::*;

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::ConciergeError;
use defaults::*;

/// Top-level Concierge configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub concierge: GeneralConfig,
    #[serde(default)]
    pub phone: PhoneConfig,
    #[serde(default)]
    pub channel: ChannelConfig,
    #[serde(default)]
    pub whisper: WhisperConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub debounce: DebounceConfig,
    #[serde(default)]
    pub handoff: HandoffConfig,
    #[serde(default)]
    pub survey: SurveyConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub api: ApiConfig,
}

/// General settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    #[serde(default = "default_name")]
    pub name: String,
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            data_dir: default_data_dir(),
            log_level: default_log_level(),
        }
    }
}

/// How sender IDs become conversation keys.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhoneConfig {
    /// Prefixed onto bare local numbers. Empty disables prefixing.
    #[serde(default = "default_country_code")]
    pub default_country_code: String,
    /// Digit count of a local number without country code.
    #[serde(default = "default_local_length")]
    pub local_length: usize,
}

impl Default for PhoneConfig {
    fn default() -> Self {
        Self {
            default_country_code: default_country_code(),
            local_length: default_local_length(),
        }
    }
}

/// Channel configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ChannelConfig {
    pub bridge: Option<BridgeConfig>,
}

/// HTTP bridge to the external messaging transport.
///
/// Deliveries are POSTed to `{url}/send`; inbound events arrive on the
/// API's `/api/inbound` route.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_bridge_url")]
    pub url: String,
    /// Bearer token for the bridge. Empty = no auth header.
    #[serde(default)]
    pub token: String,
    /// Skip group chats entirely.
    #[serde(default = "default_true")]
    pub ignore_groups: bool,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: default_bridge_url(),
            token: String::new(),
            ignore_groups: true,
        }
    }
}

/// Voice-note transcription. Presence of `api_key` = voice enabled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhisperConfig {
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_whisper_url")]
    pub base_url: String,
    #[serde(default = "default_whisper_model")]
    pub model: String,
}

impl Default for WhisperConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: default_whisper_url(),
            model: default_whisper_model(),
        }
    }
}

/// Storage config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}

/// Generative fallback (OpenAI-compatible chat completions).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_provider_url")]
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_provider_model")]
    pub model: String,
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
    /// Sent when no keyword rule matches and the generative call fails
    /// or is disabled.
    #[serde(default = "default_fallback_reply")]
    pub fallback_reply: String,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            base_url: default_provider_url(),
            api_key: String::new(),
            model: default_provider_model(),
            system_prompt: default_system_prompt(),
            fallback_reply: default_fallback_reply(),
        }
    }
}

/// Fragment coalescing windows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebounceConfig {
    /// Quiet period after the latest fragment.
    #[serde(default = "default_wait_ms")]
    pub wait_ms: u64,
    /// Ceiling measured from the first fragment.
    #[serde(default = "default_max_wait_ms")]
    pub max_wait_ms: u64,
}

impl Default for DebounceConfig {
    fn default() -> Self {
        Self {
            wait_ms: default_wait_ms(),
            max_wait_ms: default_max_wait_ms(),
        }
    }
}

/// Scheduled backlog dispatch -- paced to stay under transport abuse limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    /// First hour (inclusive, 0-23) sends are allowed.
    #[serde(default = "default_active_start_hour")]
    pub active_start_hour: u32,
    /// Hour (exclusive, 1-24) sends stop.
    #[serde(default = "default_active_end_hour")]
    pub active_end_hour: u32,
    #[serde(default = "default_max_daily_messages")]
    pub max_daily_messages: u32,
    #[serde(default = "default_min_delay_ms")]
    pub min_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval_secs: default_poll_interval(),
            active_start_hour: default_active_start_hour(),
            active_end_hour: default_active_end_hour(),
            max_daily_messages: default_max_daily_messages(),
            min_delay_ms: default_min_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl DispatchConfig {
    /// Whether `hour` falls inside the send window. A start after the end
    /// wraps midnight (e.g. 22 → 6).
    pub fn hour_allowed(&self, hour: u32) -> bool {
        let (start, end) = (self.active_start_hour, self.active_end_hour);
        if start <= end {
            hour >= start && hour < end
        } else {
            hour >= start || hour < end
        }
    }

    fn validate(&self) -> Result<(), ConciergeError> {
        if self.active_start_hour > 23 || self.active_end_hour > 24 {
            return Err(ConciergeError::Config(format!(
                "dispatch window {}-{} is not a valid hour range",
                self.active_start_hour, self.active_end_hour
            )));
        }
        if self.min_delay_ms > self.max_delay_ms {
            return Err(ConciergeError::Config(format!(
                "dispatch min_delay_ms ({}) exceeds max_delay_ms ({})",
                self.min_delay_ms, self.max_delay_ms
            )));
        }
        if self.poll_interval_secs == 0 {
            return Err(ConciergeError::Config(
                "dispatch poll_interval_secs must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// HTTP API configuration -- operator endpoints and the bridge webhook.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_api_host")]
    pub host: String,
    #[serde(default = "default_api_port")]
    pub port: u16,
    /// Bearer token for API authentication. Empty = no auth (for local-only use).
    #[serde(default)]
    pub api_key: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: default_api_host(),
            port: default_api_port(),
            api_key: String::new(),
        }
    }
}

/// Expand `~` to home directory.
pub fn shellexpand(path: &str) -> String {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = std::env::var_os("HOME") {
            return format!("{}/{rest}", home.to_string_lossy());
        }
    }
    path.to_string()
}

/// Load configuration from a TOML file.
///
/// Falls back to defaults if the file does not exist.
pub fn load(path: &str) -> Result<Config, ConciergeError> {
    let path = Path::new(path);
    if !path.exists() {
        tracing::info!(
            "Config file not found at {}, using defaults",
            path.display()
        );
        return Ok(Config::default());
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| ConciergeError::Config(format!("failed to read {}: {}", path.display(), e)))?;

    let config: Config = toml::from_str(&content)
        .map_err(|e| ConciergeError::Config(format!("failed to parse config: {}", e)))?;

    config.dispatch.validate()?;
    config.handoff.validate()?;
    if config.debounce.wait_ms == 0 || config.debounce.max_wait_ms < config.debounce.wait_ms {
        return Err(ConciergeError::Config(format!(
            "debounce windows invalid: wait_ms={} max_wait_ms={}",
            config.debounce.wait_ms, config.debounce.max_wait_ms
        )));
    }

    Ok(config)
}
