//! Test doubles shared by the gateway modules.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use concierge_core::{
    error::ConciergeError,
    message::{IncomingMessage, OutgoingMessage},
    phone::ConversationKey,
    schedule::{select_due, MessageStatus, ScheduledMessage},
    traits::{Backlog, BlockList, Channel, ConfigSource, Responder, SurveyResults},
};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use tokio::sync::mpsc;

/// Channel that records every delivery; targets in `failing` error out.
#[derive(Default)]
pub struct RecordingChannel {
    pub sent: Mutex<Vec<OutgoingMessage>>,
    pub failing: Mutex<HashSet<String>>,
}

impl RecordingChannel {
    pub fn fail_for(&self, target: &str) {
        self.failing.lock().unwrap().insert(target.to_string());
    }

    pub fn sent(&self) -> Vec<OutgoingMessage> {
        self.sent.lock().unwrap().clone()
    }

    pub fn texts_to(&self, target: &str) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter(|m| m.reply_target.as_deref() == Some(target))
            .map(|m| m.text)
            .collect()
    }
}

#[async_trait]
impl Channel for RecordingChannel {
    fn name(&self) -> &str {
        "recording"
    }

    async fn start(&self) -> Result<mpsc::Receiver<IncomingMessage>, ConciergeError> {
        let (_tx, rx) = mpsc::channel(1);
        Ok(rx)
    }

    async fn send(&self, message: OutgoingMessage) -> Result<(), ConciergeError> {
        let target = message.reply_target.clone().unwrap_or_default();
        if self.failing.lock().unwrap().contains(&target) {
            return Err(ConciergeError::Channel(format!("{target} unreachable")));
        }
        self.sent.lock().unwrap().push(message);
        Ok(())
    }

    async fn stop(&self) -> Result<(), ConciergeError> {
        Ok(())
    }
}

/// Block list backed by a set; `broken` makes every lookup fail.
#[derive(Default)]
pub struct MemoryBlockList {
    pub keys: Mutex<HashSet<String>>,
    pub broken: bool,
}

impl MemoryBlockList {
    pub fn broken() -> Self {
        Self {
            broken: true,
            ..Default::default()
        }
    }
}

#[async_trait]
impl BlockList for MemoryBlockList {
    async fn is_blocked(&self, key: &ConversationKey) -> Result<bool, ConciergeError> {
        if self.broken {
            return Err(ConciergeError::Store("block list offline".into()));
        }
        Ok(self.keys.lock().unwrap().contains(key.as_str()))
    }

    async fn add(&self, key: &ConversationKey, _reason: &str) -> Result<(), ConciergeError> {
        self.keys.lock().unwrap().insert(key.to_string());
        Ok(())
    }

    async fn remove(&self, key: &ConversationKey) -> Result<bool, ConciergeError> {
        Ok(self.keys.lock().unwrap().remove(key.as_str()))
    }
}

/// Config source with fixed rows and a read counter.
#[derive(Default)]
pub struct StaticConfigSource {
    pub handoff: Vec<(String, String)>,
    pub survey: Vec<(String, String)>,
    pub questions: Mutex<Vec<String>>,
    pub reads: AtomicUsize,
    pub broken: bool,
}

impl StaticConfigSource {
    pub fn with_questions(questions: &[&str]) -> Self {
        Self {
            questions: Mutex::new(questions.iter().map(|q| q.to_string()).collect()),
            ..Default::default()
        }
    }

    fn check(&self) -> Result<(), ConciergeError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if self.broken {
            return Err(ConciergeError::Store("settings offline".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl ConfigSource for StaticConfigSource {
    async fn handoff_settings(&self) -> Result<Vec<(String, String)>, ConciergeError> {
        self.check()?;
        Ok(self.handoff.clone())
    }

    async fn survey_settings(&self) -> Result<Vec<(String, String)>, ConciergeError> {
        self.check()?;
        Ok(self.survey.clone())
    }

    async fn survey_questions(&self) -> Result<Vec<String>, ConciergeError> {
        self.check()?;
        Ok(self.questions.lock().unwrap().clone())
    }
}

/// Survey sink that keeps completed rows in memory.
#[derive(Default)]
pub struct MemorySurveyResults {
    pub rows: Mutex<Vec<(String, Vec<String>)>>,
    pub broken: bool,
}

#[async_trait]
impl SurveyResults for MemorySurveyResults {
    async fn append(
        &self,
        key: &ConversationKey,
        _completed_at: DateTime<Utc>,
        answers: &[String],
    ) -> Result<(), ConciergeError> {
        if self.broken {
            return Err(ConciergeError::Store("results sheet offline".into()));
        }
        self.rows
            .lock()
            .unwrap()
            .push((key.to_string(), answers.to_vec()));
        Ok(())
    }
}

/// Responder that echoes the turn back.
pub struct EchoResponder;

#[async_trait]
impl Responder for EchoResponder {
    async fn respond(&self, text: &str, _key: &ConversationKey) -> Result<String, ConciergeError> {
        Ok(format!("echo: {text}"))
    }
}

/// In-memory backlog with status history; optionally blocks inside
/// `list_due` until released.
#[derive(Default)]
pub struct MemoryBacklog {
    pub rows: Mutex<Vec<ScheduledMessage>>,
    pub list_calls: AtomicUsize,
    pub broken: bool,
    pub gate: Option<tokio::sync::Semaphore>,
}

impl MemoryBacklog {
    pub fn new(rows: Vec<ScheduledMessage>) -> Self {
        Self {
            rows: Mutex::new(rows),
            ..Default::default()
        }
    }

    pub fn status_of(&self, id: &str) -> Option<MessageStatus> {
        self.rows
            .lock()
            .unwrap()
            .iter()
            .find(|m| m.id == id)
            .map(|m| m.status)
    }
}

#[async_trait]
impl Backlog for MemoryBacklog {
    async fn list_due(&self, now: NaiveDateTime) -> Result<Vec<ScheduledMessage>, ConciergeError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(ref gate) = self.gate {
            let _permit = gate
                .acquire()
                .await
                .map_err(|_| ConciergeError::Store("gate closed".into()))?;
        }
        if self.broken {
            return Err(ConciergeError::Store("backlog offline".into()));
        }
        let rows = self.rows.lock().unwrap().clone();
        Ok(select_due(rows, now))
    }

    async fn update_status(&self, id: &str, status: MessageStatus) -> Result<(), ConciergeError> {
        let mut rows = self.rows.lock().unwrap();
        let row = rows
            .iter_mut()
            .find(|m| m.id == id)
            .ok_or_else(|| ConciergeError::Store(format!("no row {id}")))?;
        row.status = status;
        Ok(())
    }
}

/// Build a pending backlog row.
pub fn scheduled(id: &str, recipient: &str, body: &str, due_at: &str) -> ScheduledMessage {
    ScheduledMessage {
        id: id.to_string(),
        recipient: recipient.to_string(),
        body: body.to_string(),
        media: None,
        due_at: due_at.to_string(),
        status: MessageStatus::Pending,
    }
}
