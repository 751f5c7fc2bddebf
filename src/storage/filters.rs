use std::collections::HashMap;

use anyhow::Result;

use super::schema::Database;
use crate::model::MessageFilter;

impl Database {
    // ========================================================================
    // Message Filter Definitions
    // ========================================================================

    pub async fn add_message_filter(&self, title: &str, script: &str) -> Result<MessageFilter> {
        let filter = sqlx::query_as::<_, MessageFilter>(
            "INSERT INTO message_filters (title, script) VALUES (?, ?) RETURNING id, title, script",
        )
        .bind(title)
        .bind(script)
        .fetch_one(&self.pool)
        .await?;
        Ok(filter)
    }

    pub async fn update_message_filter(&self, filter: &MessageFilter) -> Result<()> {
        sqlx::query("UPDATE message_filters SET title = ?, script = ? WHERE id = ?")
            .bind(&filter.title)
            .bind(&filter.script)
            .bind(filter.id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Deletes a filter definition and every feed assignment of it.
    pub async fn remove_message_filter(&self, filter_id: i64) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM message_filters_in_feeds WHERE filter = ?")
            .bind(filter_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM message_filters WHERE id = ?")
            .bind(filter_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn message_filters(&self) -> Result<Vec<MessageFilter>> {
        let filters = sqlx::query_as::<_, MessageFilter>(
            "SELECT id, title, script FROM message_filters ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(filters)
    }

    // ========================================================================
    // Feed Assignments
    // ========================================================================

    pub async fn assign_message_filter_to_feed(
        &self,
        filter_id: i64,
        feed_custom_id: &str,
        account_id: i64,
    ) -> Result<()> {
        sqlx::query(
            "INSERT OR IGNORE INTO message_filters_in_feeds (filter, feed_custom_id, account_id) VALUES (?, ?, ?)",
        )
        .bind(filter_id)
        .bind(feed_custom_id)
        .bind(account_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn remove_message_filter_from_feed(
        &self,
        filter_id: i64,
        feed_custom_id: &str,
        account_id: i64,
    ) -> Result<()> {
        sqlx::query(
            "DELETE FROM message_filters_in_feeds WHERE filter = ? AND feed_custom_id = ? AND account_id = ?",
        )
        .bind(filter_id)
        .bind(feed_custom_id)
        .bind(account_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Filter ids assigned to each feed of an account, in assignment order.
    pub async fn message_filters_in_feeds(&self, account_id: i64) -> Result<HashMap<String, Vec<i64>>> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT feed_custom_id, filter FROM message_filters_in_feeds WHERE account_id = ? ORDER BY rowid",
        )
        .bind(account_id)
        .fetch_all(&self.pool)
        .await?;

        let mut assignments: HashMap<String, Vec<i64>> = HashMap::new();
        for (feed, filter) in rows {
            assignments.entry(feed).or_default().push(filter);
        }
        Ok(assignments)
    }

    /// Drops assignments that point at feeds which no longer exist.
    pub async fn purge_leftover_message_filter_assignments(&self, account_id: i64) -> Result<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM message_filters_in_feeds
            WHERE account_id = ?1
              AND feed_custom_id NOT IN (SELECT custom_id FROM feeds WHERE account_id = ?1)
        "#,
        )
        .bind(account_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}
