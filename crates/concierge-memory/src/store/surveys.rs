//! Completed survey results.

use super::Store;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use concierge_core::{error::ConciergeError, phone::ConversationKey, traits::SurveyResults};
use serde::Serialize;
use uuid::Uuid;

/// One completed survey as persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SurveyRecord {
    pub sender_key: String,
    pub completed_at: String,
    pub answers: Vec<String>,
}

impl SurveyRecord {
    /// Flat row form: key followed by the answers.
    pub fn to_row(&self) -> Vec<String> {
        std::iter::once(self.sender_key.clone())
            .chain(self.answers.iter().cloned())
            .collect()
    }
}

impl Store {
    /// Completed surveys, oldest first.
    pub async fn survey_records(&self) -> Result<Vec<SurveyRecord>, ConciergeError> {
        let rows: Vec<(String, String, String)> = sqlx::query_as(
            "SELECT sender_key, completed_at, answers FROM survey_results \
             ORDER BY completed_at, rowid",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| ConciergeError::Store(format!("survey records failed: {e}")))?;

        rows.into_iter()
            .map(|(sender_key, completed_at, answers)| -> Result<SurveyRecord, ConciergeError> {
                let answers: Vec<String> = serde_json::from_str(&answers)?;
                Ok(SurveyRecord {
                    sender_key,
                    completed_at,
                    answers,
                })
            })
            .collect()
    }
}

#[async_trait]
impl SurveyResults for Store {
    async fn append(
        &self,
        key: &ConversationKey,
        completed_at: DateTime<Utc>,
        answers: &[String],
    ) -> Result<(), ConciergeError> {
        let answers = serde_json::to_string(answers)?;
        sqlx::query(
            "INSERT INTO survey_results (id, sender_key, completed_at, answers) VALUES (?, ?, ?, ?)",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(key.as_str())
        .bind(completed_at.to_rfc3339())
        .bind(answers)
        .execute(&self.pool)
        .await
        .map_err(|e| ConciergeError::Store(format!("survey append failed: {e}")))?;
        Ok(())
    }
}
