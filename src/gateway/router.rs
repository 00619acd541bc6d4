//! Conversation mode router: decides what happens to a coalesced turn.
//!
//! Order is fixed: block list, pause, handoff intent, active survey, survey
//! keyword, responder. The first match wins.

use super::{handoff::HandoffManager, settings::SettingsCache, survey::SurveyEngine};
use concierge_core::{
    message::OutgoingMessage,
    phone::ConversationKey,
    traits::{BlockList, Channel, Responder},
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, error, info, warn};

/// What the router did with a turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOutcome {
    Blocked,
    Paused,
    /// Handoff acknowledged; the ack text was already delivered.
    HandedOff(String),
    /// Reply from an in-progress survey.
    Survey(String),
    SurveyStarted(String),
    Responded(String),
    /// The responder failed; nothing was sent.
    Failed,
}

impl RouteOutcome {
    /// Text still to be delivered to the sender.
    fn pending_reply(&self) -> Option<&str> {
        match self {
            Self::Survey(r) | Self::SurveyStarted(r) | Self::Responded(r) => Some(r),
            _ => None,
        }
    }
}

pub struct ModeRouter {
    block_list: Arc<dyn BlockList>,
    handoff: Arc<HandoffManager>,
    surveys: Arc<SurveyEngine>,
    settings: Arc<SettingsCache>,
    responder: Arc<dyn Responder>,
    locks: Mutex<HashMap<ConversationKey, Arc<tokio::sync::Mutex<()>>>>,
}

impl ModeRouter {
    pub fn new(
        block_list: Arc<dyn BlockList>,
        handoff: Arc<HandoffManager>,
        surveys: Arc<SurveyEngine>,
        settings: Arc<SettingsCache>,
        responder: Arc<dyn Responder>,
    ) -> Self {
        Self {
            block_list,
            handoff,
            surveys,
            settings,
            responder,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Route one turn and deliver its reply. Turns for the same key are
    /// serialized.
    pub async fn handle(
        &self,
        key: &ConversationKey,
        text: &str,
        channel: &dyn Channel,
        reply_target: &str,
    ) -> RouteOutcome {
        let lock = self.key_lock(key);
        let outcome = {
            let _guard = lock.lock().await;
            let outcome = self.route(key, text, channel, reply_target).await;
            if let Some(reply) = outcome.pending_reply() {
                if let Err(e) = channel.send(OutgoingMessage::to(reply_target, reply)).await {
                    warn!("[{key}] reply delivery failed: {e}");
                }
            }
            outcome
        };
        self.release_lock(key, lock);
        outcome
    }

    async fn route(
        &self,
        key: &ConversationKey,
        text: &str,
        channel: &dyn Channel,
        reply_target: &str,
    ) -> RouteOutcome {
        match self.block_list.is_blocked(key).await {
            Ok(true) => {
                debug!("[{key}] sender blocked, dropping turn");
                return RouteOutcome::Blocked;
            }
            Ok(false) => {}
            Err(e) => warn!("[{key}] block list lookup failed, treating as not blocked: {e}"),
        }

        if self.handoff.is_paused(key) {
            debug!("[{key}] conversation paused for a human, dropping turn");
            return RouteOutcome::Paused;
        }

        let settings = self.settings.current().await;

        if settings.handoff.enabled && settings.handoff.matches(text) {
            self.handoff
                .trigger(key, text, &settings.handoff, channel, reply_target)
                .await;
            return RouteOutcome::HandedOff(settings.handoff.ack_message);
        }

        if let Some(step) = self.surveys.answer(key, text).await {
            return RouteOutcome::Survey(step.reply);
        }

        if settings.survey.enabled && settings.survey.is_trigger(text) {
            if let Some(opening) = self.surveys.start(key, settings.questions, &settings.survey) {
                return RouteOutcome::SurveyStarted(opening);
            }
        }

        match self.responder.respond(text, key).await {
            Ok(reply) => {
                info!("[{key}] responded ({} chars)", reply.chars().count());
                RouteOutcome::Responded(reply)
            }
            Err(e) => {
                error!("[{key}] responder failed: {e}");
                RouteOutcome::Failed
            }
        }
    }

    fn key_lock(&self, key: &ConversationKey) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|p| p.into_inner());
        Arc::clone(locks.entry(key.clone()).or_default())
    }

    /// Forget the key's lock once nobody else holds or waits on it.
    fn release_lock(&self, key: &ConversationKey, lock: Arc<tokio::sync::Mutex<()>>) {
        let mut locks = self.locks.lock().unwrap_or_else(|p| p.into_inner());
        // One reference in the map, one here.
        if Arc::strong_count(&lock) <= 2 {
            locks.remove(key);
        }
    }

    #[cfg(test)]
    fn tracked_locks(&self) -> usize {
        self.locks.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::testing::{
        EchoResponder, MemoryBlockList, MemorySurveyResults, RecordingChannel, StaticConfigSource,
    };
    use concierge_core::config::{HandoffConfig, PhoneConfig, SurveyConfig};

    const CUSTOMER: &str = "56911112222";
    const ADMIN: &str = "56900000000";

    struct Harness {
        router: ModeRouter,
        channel: RecordingChannel,
        handoff: Arc<HandoffManager>,
        surveys: Arc<SurveyEngine>,
        results: Arc<MemorySurveyResults>,
        source: Arc<StaticConfigSource>,
        settings: Arc<SettingsCache>,
    }

    fn harness_with(block_list: MemoryBlockList, questions: &[&str]) -> Harness {
        harness_from(block_list, StaticConfigSource::with_questions(questions))
    }

    fn harness_from(block_list: MemoryBlockList, source: StaticConfigSource) -> Harness {
        let source = Arc::new(source);
        let handoff_cfg = HandoffConfig {
            admin_phone: ADMIN.to_string(),
            ack_message: "Un agente te contactará.".to_string(),
            admin_template: "{phone}: {message}".to_string(),
            ..Default::default()
        };
        let survey_cfg = SurveyConfig {
            keyword: "encuesta".to_string(),
            welcome_message: "Bienvenido".to_string(),
            thank_you_message: "Gracias".to_string(),
            ..Default::default()
        };
        let settings = Arc::new(SettingsCache::new(handoff_cfg, survey_cfg, source.clone()));
        let results = Arc::new(MemorySurveyResults::default());
        let handoff = Arc::new(HandoffManager::new(PhoneConfig::default()));
        let surveys = Arc::new(SurveyEngine::new(results.clone()));
        let router = ModeRouter::new(
            Arc::new(block_list),
            handoff.clone(),
            surveys.clone(),
            settings.clone(),
            Arc::new(EchoResponder),
        );
        Harness {
            router,
            channel: RecordingChannel::default(),
            handoff,
            surveys,
            results,
            source,
            settings,
        }
    }

    fn harness() -> Harness {
        harness_with(MemoryBlockList::default(), &["Q1", "Q2", "Q3"])
    }

    fn key() -> ConversationKey {
        ConversationKey::from_canonical(CUSTOMER)
    }

    impl Harness {
        async fn turn(&self, text: &str) -> RouteOutcome {
            self.router.handle(&key(), text, &self.channel, CUSTOMER).await
        }
    }

    #[tokio::test]
    async fn test_plain_turn_goes_to_responder() {
        let h = harness();
        assert_eq!(
            h.turn("Hola quiero comprar").await,
            RouteOutcome::Responded("echo: Hola quiero comprar".to_string())
        );
        assert_eq!(h.channel.texts_to(CUSTOMER), vec!["echo: Hola quiero comprar"]);
        assert_eq!(h.router.tracked_locks(), 0);
    }

    #[tokio::test]
    async fn test_blocked_sender_is_dropped() {
        let blocks = MemoryBlockList::default();
        blocks.keys.lock().unwrap().insert(CUSTOMER.to_string());
        let h = harness_with(blocks, &["Q1"]);

        assert_eq!(h.turn("quiero hablar con un agente").await, RouteOutcome::Blocked);
        assert!(h.channel.sent().is_empty());
        assert!(!h.handoff.is_paused(&key()));
    }

    #[tokio::test]
    async fn test_block_lookup_failure_fails_open() {
        let h = harness_with(MemoryBlockList::broken(), &["Q1"]);
        assert!(matches!(h.turn("hola").await, RouteOutcome::Responded(_)));
    }

    #[tokio::test]
    async fn test_handoff_then_silence() {
        let h = harness();

        let outcome = h.turn("Necesito HABLAR CON UN AGENTE por favor").await;
        assert_eq!(
            outcome,
            RouteOutcome::HandedOff("Un agente te contactará.".to_string())
        );
        assert!(h.handoff.is_paused(&key()));
        assert_eq!(h.channel.texts_to(CUSTOMER), vec!["Un agente te contactará."]);
        assert_eq!(
            h.channel.texts_to(ADMIN),
            vec!["56911112222: Necesito HABLAR CON UN AGENTE por favor"]
        );

        // Every turn while paused is dropped without a reply.
        assert_eq!(h.turn("¿hola?").await, RouteOutcome::Paused);
        assert_eq!(h.turn("encuesta").await, RouteOutcome::Paused);
        assert_eq!(h.channel.sent().len(), 2);

        assert!(h.handoff.resume(&key()));
        assert!(matches!(h.turn("hola").await, RouteOutcome::Responded(_)));
    }

    #[tokio::test]
    async fn test_handoff_survives_absurd_pause_override() {
        let source = StaticConfigSource {
            handoff: vec![(
                "pause_minutes".to_string(),
                "10000000000000".to_string(),
            )],
            ..StaticConfigSource::with_questions(&["Q1"])
        };
        let h = harness_from(MemoryBlockList::default(), source);

        let outcome = h.turn("quiero hablar con un agente").await;
        assert!(matches!(outcome, RouteOutcome::HandedOff(_)));
        assert!(h.handoff.is_paused(&key()));
        assert_eq!(h.settings.current().await.handoff.pause_minutes, 30);
    }

    #[tokio::test]
    async fn test_handoff_beats_active_survey() {
        let h = harness();
        h.turn("encuesta").await;
        assert!(h.surveys.is_active(&key()));

        assert!(matches!(
            h.turn("mejor hablar con un agente").await,
            RouteOutcome::HandedOff(_)
        ));
        // The survey is untouched, just unreachable while paused.
        assert!(h.surveys.is_active(&key()));
    }

    #[tokio::test]
    async fn test_survey_flow_end_to_end() {
        let h = harness();

        assert_eq!(
            h.turn("  ENCUESTA ").await,
            RouteOutcome::SurveyStarted("Bienvenido\n\nQ1".to_string())
        );

        // Questions edited mid-survey do not affect the running session.
        *h.source.questions.lock().unwrap() = vec!["X1".to_string()];
        h.settings.invalidate().await;

        assert_eq!(h.turn("a1").await, RouteOutcome::Survey("Q2".to_string()));
        // The keyword is just an answer while a survey runs.
        assert_eq!(h.turn("encuesta").await, RouteOutcome::Survey("Q3".to_string()));
        assert_eq!(h.turn("a3").await, RouteOutcome::Survey("Gracias".to_string()));

        let rows = h.results.rows.lock().unwrap().clone();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].1, vec!["a1", "encuesta", "a3"]);

        assert_eq!(
            h.channel.texts_to(CUSTOMER),
            vec!["Bienvenido\n\nQ1", "Q2", "Q3", "Gracias"]
        );

        // Next turn is back to normal handling.
        assert!(matches!(h.turn("hola").await, RouteOutcome::Responded(_)));
    }

    #[tokio::test]
    async fn test_keyword_inside_sentence_does_not_start_survey() {
        let h = harness();
        assert!(matches!(
            h.turn("quiero responder la encuesta").await,
            RouteOutcome::Responded(_)
        ));
        assert!(!h.surveys.is_active(&key()));
    }

    #[tokio::test]
    async fn test_survey_without_questions_falls_through() {
        let h = harness_with(MemoryBlockList::default(), &[]);
        assert_eq!(
            h.turn("encuesta").await,
            RouteOutcome::Responded("echo: encuesta".to_string())
        );
        assert!(!h.surveys.is_active(&key()));
    }

    #[tokio::test]
    async fn test_reply_delivery_failure_keeps_outcome() {
        let h = harness();
        h.channel.fail_for(CUSTOMER);
        assert!(matches!(h.turn("hola").await, RouteOutcome::Responded(_)));
        assert!(h.channel.sent().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_turns_for_same_key_are_serialized() {
        let h = Arc::new(harness());
        h.turn("encuesta").await;

        let mut tasks = Vec::new();
        for i in 0..3 {
            let h = Arc::clone(&h);
            tasks.push(tokio::spawn(async move { h.turn(&format!("a{i}")).await }));
        }
        for t in tasks {
            t.await.unwrap();
        }

        // Three answers, one completed survey, no lost or doubled answers.
        let rows = h.results.rows.lock().unwrap().clone();
        assert_eq!(rows.len(), 1);
        let mut answers = rows[0].1.clone();
        answers.sort();
        assert_eq!(answers, vec!["a0", "a1", "a2"]);
        assert_eq!(h.router.tracked_locks(), 0);
    }
}
