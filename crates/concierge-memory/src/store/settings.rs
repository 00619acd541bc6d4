//! Runtime settings: key/value overrides per section plus survey questions.

use super::Store;
use async_trait::async_trait;
use concierge_core::{error::ConciergeError, traits::ConfigSource};

const HANDOFF_SECTION: &str = "handoff";
const SURVEY_SECTION: &str = "survey";

impl Store {
    /// Upsert one setting.
    pub async fn set_setting(
        &self,
        section: &str,
        key: &str,
        value: &str,
    ) -> Result<(), ConciergeError> {
        sqlx::query(
            "INSERT INTO settings (section, key, value) VALUES (?, ?, ?) \
             ON CONFLICT(section, key) DO UPDATE SET value = excluded.value, \
             updated_at = datetime('now')",
        )
        .bind(section)
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await
        .map_err(|e| ConciergeError::Store(format!("set setting failed: {e}")))?;
        Ok(())
    }

    /// All settings of a section, ordered by key.
    pub async fn get_section(&self, section: &str) -> Result<Vec<(String, String)>, ConciergeError> {
        sqlx::query_as("SELECT key, value FROM settings WHERE section = ? ORDER BY key")
            .bind(section)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| ConciergeError::Store(format!("get section {section} failed: {e}")))
    }

    /// Replace the survey question list.
    pub async fn replace_survey_questions(&self, questions: &[String]) -> Result<(), ConciergeError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| ConciergeError::Store(format!("begin failed: {e}")))?;

        sqlx::query("DELETE FROM survey_questions")
            .execute(&mut *tx)
            .await
            .map_err(|e| ConciergeError::Store(format!("clear questions failed: {e}")))?;

        for (i, text) in questions.iter().enumerate() {
            sqlx::query("INSERT INTO survey_questions (position, text) VALUES (?, ?)")
                .bind(i as i64)
                .bind(text)
                .execute(&mut *tx)
                .await
                .map_err(|e| ConciergeError::Store(format!("insert question failed: {e}")))?;
        }

        tx.commit()
            .await
            .map_err(|e| ConciergeError::Store(format!("commit failed: {e}")))
    }
}

#[async_trait]
impl ConfigSource for Store {
    async fn handoff_settings(&self) -> Result<Vec<(String, String)>, ConciergeError> {
        self.get_section(HANDOFF_SECTION).await
    }

    async fn survey_settings(&self) -> Result<Vec<(String, String)>, ConciergeError> {
        self.get_section(SURVEY_SECTION).await
    }

    async fn survey_questions(&self) -> Result<Vec<String>, ConciergeError> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT text FROM survey_questions WHERE trim(text) != '' ORDER BY position",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| ConciergeError::Store(format!("survey questions failed: {e}")))?;
        Ok(rows.into_iter().map(|(t,)| t).collect())
    }
}
