//! Survey flow engine: walks a sender through an ordered question list.

use chrono::Utc;
use concierge_core::{config::SurveyConfig, phone::ConversationKey, traits::SurveyResults};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{error, info, warn};

/// Where a conversation stands in its survey.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurveyState {
    NotStarted,
    /// Waiting for the answer to question `i`.
    AwaitingAnswer(usize),
    Completed,
}

/// Result of feeding one answer into a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SurveyStep {
    pub state: SurveyState,
    pub reply: String,
}

struct SurveySession {
    /// Questions as they were when the survey started.
    questions: Vec<String>,
    answers: Vec<String>,
    thank_you: String,
}

pub struct SurveyEngine {
    sessions: Mutex<HashMap<ConversationKey, SurveySession>>,
    results: Arc<dyn SurveyResults>,
}

impl SurveyEngine {
    pub fn new(results: Arc<dyn SurveyResults>) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            results,
        }
    }

    /// Open a session and return the welcome text plus the first question.
    ///
    /// Returns `None` (and opens nothing) when `questions` is empty.
    pub fn start(
        &self,
        key: &ConversationKey,
        questions: Vec<String>,
        config: &SurveyConfig,
    ) -> Option<String> {
        let first = match questions.first() {
            Some(q) => q.clone(),
            None => {
                error!("[{key}] survey requested but no questions are configured");
                return None;
            }
        };

        let count = questions.len();
        self.lock().insert(
            key.clone(),
            SurveySession {
                questions,
                answers: Vec::with_capacity(count),
                thank_you: config.thank_you_message.clone(),
            },
        );
        info!("[{key}] survey started ({count} questions)");
        Some(format!("{}\n\n{first}", config.welcome_message))
    }

    /// Record `text` as the answer to the current question.
    ///
    /// Returns `None` when the sender has no open session.
    pub async fn answer(&self, key: &ConversationKey, text: &str) -> Option<SurveyStep> {
        let finished = {
            let mut sessions = self.lock();
            let session = sessions.get_mut(key)?;
            session.answers.push(text.trim().to_string());
            let next = session.answers.len();

            if next < session.questions.len() {
                return Some(SurveyStep {
                    state: SurveyState::AwaitingAnswer(next),
                    reply: session.questions[next].clone(),
                });
            }
            sessions.remove(key)?
        };

        if let Err(e) = self
            .results
            .append(key, Utc::now(), &finished.answers)
            .await
        {
            error!("[{key}] failed to persist survey answers: {e}");
        } else {
            info!("[{key}] survey completed ({} answers)", finished.answers.len());
        }

        Some(SurveyStep {
            state: SurveyState::Completed,
            reply: finished.thank_you,
        })
    }

    /// Drop the session for `key`; returns whether one existed.
    pub fn cancel(&self, key: &ConversationKey) -> bool {
        let existed = self.lock().remove(key).is_some();
        if existed {
            warn!("[{key}] survey cancelled");
        }
        existed
    }

    pub fn state(&self, key: &ConversationKey) -> SurveyState {
        match self.lock().get(key) {
            Some(session) => SurveyState::AwaitingAnswer(session.answers.len()),
            None => SurveyState::NotStarted,
        }
    }

    pub fn is_active(&self, key: &ConversationKey) -> bool {
        self.lock().contains_key(key)
    }

    pub fn active_count(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<ConversationKey, SurveySession>> {
        self.sessions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::testing::MemorySurveyResults;

    fn key() -> ConversationKey {
        ConversationKey::from_canonical("56911112222")
    }

    fn config() -> SurveyConfig {
        SurveyConfig {
            welcome_message: "¡Gracias por participar!".to_string(),
            thank_you_message: "¡Listo, gracias!".to_string(),
            ..Default::default()
        }
    }

    fn questions(list: &[&str]) -> Vec<String> {
        list.iter().map(|q| q.to_string()).collect()
    }

    #[tokio::test]
    async fn test_full_survey_persists_aligned_answers() {
        let results = Arc::new(MemorySurveyResults::default());
        let engine = SurveyEngine::new(results.clone());
        let k = key();

        let opening = engine
            .start(&k, questions(&["Q1", "Q2", "Q3"]), &config())
            .unwrap();
        assert_eq!(opening, "¡Gracias por participar!\n\nQ1");
        assert_eq!(engine.state(&k), SurveyState::AwaitingAnswer(0));

        let step = engine.answer(&k, "a1").await.unwrap();
        assert_eq!(step.state, SurveyState::AwaitingAnswer(1));
        assert_eq!(step.reply, "Q2");

        let step = engine.answer(&k, " a2 ").await.unwrap();
        assert_eq!(step.reply, "Q3");

        let step = engine.answer(&k, "a3").await.unwrap();
        assert_eq!(step.state, SurveyState::Completed);
        assert_eq!(step.reply, "¡Listo, gracias!");

        assert!(!engine.is_active(&k));
        assert_eq!(engine.state(&k), SurveyState::NotStarted);
        let rows = results.rows.lock().unwrap().clone();
        assert_eq!(
            rows,
            vec![("56911112222".to_string(), questions(&["a1", "a2", "a3"]))]
        );
    }

    #[test]
    fn test_empty_question_list_opens_nothing() {
        let engine = SurveyEngine::new(Arc::new(MemorySurveyResults::default()));
        assert!(engine.start(&key(), Vec::new(), &config()).is_none());
        assert!(!engine.is_active(&key()));
    }

    #[tokio::test]
    async fn test_answer_without_session_is_none() {
        let engine = SurveyEngine::new(Arc::new(MemorySurveyResults::default()));
        assert!(engine.answer(&key(), "hola").await.is_none());
    }

    #[tokio::test]
    async fn test_persist_failure_still_completes() {
        let results = Arc::new(MemorySurveyResults {
            broken: true,
            ..Default::default()
        });
        let engine = SurveyEngine::new(results);
        let k = key();
        engine.start(&k, questions(&["Q1"]), &config()).unwrap();

        let step = engine.answer(&k, "a1").await.unwrap();
        assert_eq!(step.state, SurveyState::Completed);
        assert_eq!(step.reply, "¡Listo, gracias!");
        assert!(!engine.is_active(&k));
    }

    #[tokio::test]
    async fn test_cancel_drops_session() {
        let engine = SurveyEngine::new(Arc::new(MemorySurveyResults::default()));
        let k = key();
        assert!(!engine.cancel(&k));
        engine.start(&k, questions(&["Q1", "Q2"]), &config()).unwrap();
        engine.answer(&k, "a1").await.unwrap();
        assert!(engine.cancel(&k));
        assert!(engine.answer(&k, "a2").await.is_none());
        assert_eq!(engine.active_count(), 0);
    }

    #[tokio::test]
    async fn test_restart_replaces_running_session() {
        let results = Arc::new(MemorySurveyResults::default());
        let engine = SurveyEngine::new(results.clone());
        let k = key();
        engine.start(&k, questions(&["Q1", "Q2"]), &config()).unwrap();
        engine.answer(&k, "viejo").await.unwrap();

        engine.start(&k, questions(&["N1"]), &config()).unwrap();
        let step = engine.answer(&k, "nuevo").await.unwrap();
        assert_eq!(step.state, SurveyState::Completed);
        assert_eq!(results.rows.lock().unwrap()[0].1, questions(&["nuevo"]));
    }
}
