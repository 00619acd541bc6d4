//! Keyword → reply rules.

use super::Store;
use async_trait::async_trait;
use concierge_core::{
    error::ConciergeError,
    traits::{KeywordRule, KeywordRuleSource},
};

impl Store {
    /// Replace the rule table. Order of `rules` is match priority.
    pub async fn replace_keyword_rules(&self, rules: &[KeywordRule]) -> Result<(), ConciergeError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| ConciergeError::Store(format!("begin failed: {e}")))?;

        sqlx::query("DELETE FROM keyword_rules")
            .execute(&mut *tx)
            .await
            .map_err(|e| ConciergeError::Store(format!("clear rules failed: {e}")))?;

        for (i, rule) in rules.iter().enumerate() {
            sqlx::query("INSERT INTO keyword_rules (position, keyword, reply) VALUES (?, ?, ?)")
                .bind(i as i64)
                .bind(&rule.keyword)
                .bind(&rule.reply)
                .execute(&mut *tx)
                .await
                .map_err(|e| ConciergeError::Store(format!("insert rule failed: {e}")))?;
        }

        tx.commit()
            .await
            .map_err(|e| ConciergeError::Store(format!("commit failed: {e}")))
    }
}

#[async_trait]
impl KeywordRuleSource for Store {
    async fn keyword_rules(&self) -> Result<Vec<KeywordRule>, ConciergeError> {
        let rows: Vec<(String, String)> =
            sqlx::query_as("SELECT keyword, reply FROM keyword_rules ORDER BY position")
                .fetch_all(&self.pool)
                .await
                .map_err(|e| ConciergeError::Store(format!("keyword rules failed: {e}")))?;
        Ok(rows
            .into_iter()
            .map(|(keyword, reply)| KeywordRule { keyword, reply })
            .collect())
    }
}
