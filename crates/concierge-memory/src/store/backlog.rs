//! Scheduled message backlog.

use super::Store;
use async_trait::async_trait;
use chrono::NaiveDateTime;
use concierge_core::{
    error::ConciergeError,
    message::MediaRef,
    schedule::{select_due, MessageStatus, ScheduledMessage},
    traits::Backlog,
};
use tracing::warn;
use uuid::Uuid;

type BacklogRow = (String, String, String, Option<String>, String, String);

fn into_message(row: BacklogRow) -> Option<ScheduledMessage> {
    let (id, recipient, body, media_url, due_at, status) = row;
    let Some(status) = MessageStatus::parse(&status) else {
        warn!("backlog: message {id} has unknown status '{status}', ignoring");
        return None;
    };
    Some(ScheduledMessage {
        id,
        recipient,
        body,
        media: media_url
            .filter(|u| !u.trim().is_empty())
            .map(|url| MediaRef {
                url,
                filename: None,
            }),
        due_at,
        status,
    })
}

impl Store {
    /// Append a message to the backlog. Returns its ID.
    pub async fn enqueue(
        &self,
        recipient: &str,
        body: &str,
        media_url: Option<&str>,
        due_at: &str,
    ) -> Result<String, ConciergeError> {
        let id = Uuid::new_v4().to_string();
        sqlx::query(
            "INSERT INTO scheduled_messages (id, recipient, body, media_url, due_at) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(recipient)
        .bind(body)
        .bind(media_url)
        .bind(due_at)
        .execute(&self.pool)
        .await
        .map_err(|e| ConciergeError::Store(format!("enqueue failed: {e}")))?;
        Ok(id)
    }

    /// Every backlog row in dispatch order, whatever its status.
    pub async fn list_backlog(&self) -> Result<Vec<ScheduledMessage>, ConciergeError> {
        let rows: Vec<BacklogRow> = sqlx::query_as(
            "SELECT id, recipient, body, media_url, due_at, status \
             FROM scheduled_messages ORDER BY rowid",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| ConciergeError::Store(format!("list backlog failed: {e}")))?;
        Ok(rows.into_iter().filter_map(into_message).collect())
    }
}

#[async_trait]
impl Backlog for Store {
    async fn list_due(&self, now: NaiveDateTime) -> Result<Vec<ScheduledMessage>, ConciergeError> {
        // due_at is free text, so the comparison happens in Rust.
        let rows: Vec<BacklogRow> = sqlx::query_as(
            "SELECT id, recipient, body, media_url, due_at, status \
             FROM scheduled_messages WHERE status = 'pending' ORDER BY rowid",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| ConciergeError::Store(format!("list due failed: {e}")))?;

        let pending = rows.into_iter().filter_map(into_message).collect();
        Ok(select_due(pending, now))
    }

    async fn update_status(&self, id: &str, status: MessageStatus) -> Result<(), ConciergeError> {
        let result = sqlx::query(
            "UPDATE scheduled_messages SET status = ?, updated_at = datetime('now') \
             WHERE id = ? AND status = 'pending'",
        )
        .bind(status.as_str())
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| ConciergeError::Store(format!("update status failed: {e}")))?;

        if result.rows_affected() == 0 {
            return Err(ConciergeError::Store(format!(
                "message {id} is not pending, status left unchanged"
            )));
        }
        Ok(())
    }
}
