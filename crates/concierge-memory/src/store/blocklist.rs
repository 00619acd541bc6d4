//! Block list: senders the assistant never answers.

use super::Store;
use async_trait::async_trait;
use concierge_core::{error::ConciergeError, phone::ConversationKey, traits::BlockList};

impl Store {
    /// Every blocked key with its reason, oldest first.
    pub async fn list_blocked(&self) -> Result<Vec<(String, String)>, ConciergeError> {
        sqlx::query_as("SELECT sender_key, reason FROM blocked_senders ORDER BY created_at, sender_key")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| ConciergeError::Store(format!("list blocked failed: {e}")))
    }
}

#[async_trait]
impl BlockList for Store {
    async fn is_blocked(&self, key: &ConversationKey) -> Result<bool, ConciergeError> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT sender_key FROM blocked_senders WHERE sender_key = ?")
                .bind(key.as_str())
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| ConciergeError::Store(format!("block lookup failed: {e}")))?;
        Ok(row.is_some())
    }

    async fn add(&self, key: &ConversationKey, reason: &str) -> Result<(), ConciergeError> {
        sqlx::query(
            "INSERT INTO blocked_senders (sender_key, reason) VALUES (?, ?) \
             ON CONFLICT(sender_key) DO UPDATE SET reason = excluded.reason",
        )
        .bind(key.as_str())
        .bind(reason)
        .execute(&self.pool)
        .await
        .map_err(|e| ConciergeError::Store(format!("block add failed: {e}")))?;
        Ok(())
    }

    async fn remove(&self, key: &ConversationKey) -> Result<bool, ConciergeError> {
        let result = sqlx::query("DELETE FROM blocked_senders WHERE sender_key = ?")
            .bind(key.as_str())
            .execute(&self.pool)
            .await
            .map_err(|e| ConciergeError::Store(format!("block remove failed: {e}")))?;
        Ok(result.rows_affected() > 0)
    }
}
