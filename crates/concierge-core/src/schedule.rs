//! Scheduled backlog rows and due-date handling.

use crate::message::MediaRef;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::warn;

/// Lifecycle of a backlog row. Only `Pending → Sent` and `Pending → Failed`
/// transitions are ever made by the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Pending,
    Sent,
    Failed,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Sent => "sent",
            Self::Failed => "failed",
        }
    }

    /// Parse a stored status. Unknown values yield `None`.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "sent" => Some(Self::Sent),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A pre-queued outbound message as stored in the backlog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledMessage {
    pub id: String,
    /// Recipient as written in the backlog; normalized before delivery.
    pub recipient: String,
    pub body: String,
    #[serde(default)]
    pub media: Option<MediaRef>,
    /// Raw due date text (local wall time).
    pub due_at: String,
    pub status: MessageStatus,
}

const DUE_FORMATS: &[&str] = &[
    "%d/%m/%Y %H:%M",
    "%d/%m/%Y %H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%dT%H:%M:%S",
];

/// Parse a due date in any accepted format. Returns `None` when the text is
/// not a real calendar instant (e.g. `31/02/2024 99:99`).
pub fn parse_due_at(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    DUE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
}

/// Keep the pending rows whose due date has arrived, in backlog order.
///
/// Rows with an unparsable due date are logged and never treated as due.
pub fn select_due(rows: Vec<ScheduledMessage>, now: NaiveDateTime) -> Vec<ScheduledMessage> {
    rows.into_iter()
        .filter(|row| row.status == MessageStatus::Pending)
        .filter(|row| match parse_due_at(&row.due_at) {
            Some(due) => due <= now,
            None => {
                warn!(
                    "backlog: skipping message {} with unparsable due date '{}'",
                    row.id, row.due_at
                );
                false
            }
        })
        .collect()
}
