//! Cached runtime settings for the conversation modes.
//!
//! Store rows are overlaid on the `config.toml` sections. A snapshot is
//! reused until it ages out or `invalidate()` is called; a partial read is
//! served once but never cached.

use concierge_core::{
    config::{HandoffConfig, SurveyConfig},
    traits::ConfigSource,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

const CACHE_TTL: Duration = Duration::from_secs(300);

/// Effective handoff and survey settings at one point in time.
#[derive(Debug, Clone)]
pub struct ModeSettings {
    pub handoff: HandoffConfig,
    pub survey: SurveyConfig,
    pub questions: Vec<String>,
}

pub struct SettingsCache {
    handoff: HandoffConfig,
    survey: SurveyConfig,
    source: Arc<dyn ConfigSource>,
    cached: Mutex<Option<(Instant, ModeSettings)>>,
}

impl SettingsCache {
    pub fn new(handoff: HandoffConfig, survey: SurveyConfig, source: Arc<dyn ConfigSource>) -> Self {
        Self {
            handoff,
            survey,
            source,
            cached: Mutex::new(None),
        }
    }

    pub async fn current(&self) -> ModeSettings {
        let mut cached = self.cached.lock().await;
        if let Some((at, ref settings)) = *cached {
            if at.elapsed() < CACHE_TTL {
                return settings.clone();
            }
        }

        let (settings, complete) = self.load().await;
        *cached = complete.then(|| (Instant::now(), settings.clone()));
        settings
    }

    /// Drop the cached snapshot; the next turn reloads from the store.
    pub async fn invalidate(&self) {
        *self.cached.lock().await = None;
        debug!("settings cache invalidated");
    }

    async fn load(&self) -> (ModeSettings, bool) {
        let mut settings = ModeSettings {
            handoff: self.handoff.clone(),
            survey: self.survey.clone(),
            questions: self.survey.questions.clone(),
        };
        let mut complete = true;

        match self.source.handoff_settings().await {
            Ok(pairs) => settings.handoff.apply_overrides(&pairs),
            Err(e) => {
                warn!("handoff settings unavailable, using defaults: {e}");
                complete = false;
            }
        }
        match self.source.survey_settings().await {
            Ok(pairs) => settings.survey.apply_overrides(&pairs),
            Err(e) => {
                warn!("survey settings unavailable, using defaults: {e}");
                complete = false;
            }
        }
        match self.source.survey_questions().await {
            Ok(questions) if !questions.is_empty() => settings.questions = questions,
            Ok(_) => {}
            Err(e) => {
                warn!("survey questions unavailable, using defaults: {e}");
                complete = false;
            }
        }

        (settings, complete)
    }
}
