use anyhow::Result;

use super::schema::Database;
use super::types::FeedRow;
use crate::model::{Feed, FeedStatus};

impl Database {
    // ========================================================================
    // Feed Operations
    // ========================================================================

    /// Subscribe a feed, returning its row id.
    ///
    /// Without an explicit `custom_id` the feed gets its stringified row id,
    /// which is what standalone accounts use. Re-inserting an existing
    /// custom id updates title and source instead.
    pub async fn insert_feed(
        &self,
        account_id: i64,
        source: &str,
        title: &str,
        custom_id: Option<&str>,
    ) -> Result<i64> {
        let mut tx = self.pool.begin().await?;

        let id = match custom_id {
            Some(custom_id) => {
                let (id,): (i64,) = sqlx::query_as(
                    r#"
                    INSERT INTO feeds (account_id, custom_id, title, source)
                    VALUES (?, ?, ?, ?)
                    ON CONFLICT(account_id, custom_id) DO UPDATE SET
                        title = excluded.title,
                        source = excluded.source
                    RETURNING id
                "#,
                )
                .bind(account_id)
                .bind(custom_id)
                .bind(title)
                .bind(source)
                .fetch_one(&mut *tx)
                .await?;
                id
            }
            None => {
                let existing: Option<(i64,)> =
                    sqlx::query_as("SELECT id FROM feeds WHERE account_id = ? AND source = ?")
                        .bind(account_id)
                        .bind(source)
                        .fetch_optional(&mut *tx)
                        .await?;

                match existing {
                    Some((id,)) => {
                        sqlx::query("UPDATE feeds SET title = ? WHERE id = ?")
                            .bind(title)
                            .bind(id)
                            .execute(&mut *tx)
                            .await?;
                        id
                    }
                    None => {
                        let result = sqlx::query(
                            "INSERT INTO feeds (account_id, custom_id, title, source) VALUES (?, '', ?, ?)",
                        )
                        .bind(account_id)
                        .bind(title)
                        .bind(source)
                        .execute(&mut *tx)
                        .await?;
                        let id = result.last_insert_rowid();

                        sqlx::query("UPDATE feeds SET custom_id = CAST(id AS TEXT) WHERE id = ?")
                            .bind(id)
                            .execute(&mut *tx)
                            .await?;
                        id
                    }
                }
            }
        };

        tx.commit().await?;
        Ok(id)
    }

    /// All feeds of an account, ordered by title.
    pub async fn feeds_for_account(&self, account_id: i64) -> Result<Vec<Feed>> {
        let rows = sqlx::query_as::<_, FeedRow>(
            r#"
            SELECT id, account_id, custom_id, title, source, status, status_message, last_fetched
            FROM feeds
            WHERE account_id = ?
            ORDER BY title
        "#,
        )
        .bind(account_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(FeedRow::into_feed).collect())
    }

    pub async fn feed_by_custom_id(&self, account_id: i64, custom_id: &str) -> Result<Option<Feed>> {
        let row = sqlx::query_as::<_, FeedRow>(
            r#"
            SELECT id, account_id, custom_id, title, source, status, status_message, last_fetched
            FROM feeds
            WHERE account_id = ? AND custom_id = ?
        "#,
        )
        .bind(account_id)
        .bind(custom_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(FeedRow::into_feed))
    }

    /// Persist the outcome of a processing pass.
    ///
    /// A non-error status also stamps `last_fetched`.
    pub async fn set_feed_status(&self, feed: &Feed) -> Result<()> {
        let fetched_at = (!feed.status.is_error()).then(|| chrono::Utc::now().timestamp());

        sqlx::query(
            r#"
            UPDATE feeds
            SET status = ?, status_message = ?, last_fetched = COALESCE(?, last_fetched)
            WHERE account_id = ? AND custom_id = ?
        "#,
        )
        .bind(feed.status.as_i64())
        .bind(feed.status_message.as_deref())
        .bind(fetched_at)
        .bind(feed.account_id)
        .bind(&feed.custom_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Reset every feed of an account back to `Normal` (e.g. after the user
    /// has seen the new messages).
    pub async fn clear_feed_statuses(&self, account_id: i64) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE feeds SET status = ?, status_message = NULL WHERE account_id = ? AND status = ?",
        )
        .bind(FeedStatus::Normal.as_i64())
        .bind(account_id)
        .bind(FeedStatus::NewMessages.as_i64())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}
