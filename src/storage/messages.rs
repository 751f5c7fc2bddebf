use std::collections::HashMap;

use anyhow::Result;
use sqlx::QueryBuilder;

use super::schema::Database;
use super::types::{MessageRow, MESSAGE_COLUMNS};
use crate::account::{Importance, ReadStatus};
use crate::model::{Label, Message};

/// Total and unread message counts of one container.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, sqlx::FromRow)]
pub struct MessageCounts {
    pub total: i64,
    pub unread: i64,
}

impl Database {
    // ========================================================================
    // Counters
    // ========================================================================

    /// Counts of undeleted messages in a feed.
    pub async fn message_counts_for_feed(&self, feed_custom_id: &str, account_id: i64) -> Result<MessageCounts> {
        let counts = sqlx::query_as::<_, MessageCounts>(
            r#"
            SELECT COUNT(*) AS total, COALESCE(SUM(is_read = 0), 0) AS unread
            FROM messages
            WHERE feed = ? AND is_deleted = 0 AND is_pdeleted = 0 AND account_id = ?
        "#,
        )
        .bind(feed_custom_id)
        .bind(account_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(counts)
    }

    /// Counts of undeleted messages for every feed of an account, keyed by
    /// feed custom id. Feeds without messages are absent.
    pub async fn message_counts_per_feed(&self, account_id: i64) -> Result<HashMap<String, MessageCounts>> {
        let rows: Vec<(String, i64, i64)> = sqlx::query_as(
            r#"
            SELECT feed, COUNT(*), COALESCE(SUM(is_read = 0), 0)
            FROM messages
            WHERE is_deleted = 0 AND is_pdeleted = 0 AND account_id = ?
            GROUP BY feed
        "#,
        )
        .bind(account_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(feed, total, unread)| (feed, MessageCounts { total, unread }))
            .collect())
    }

    pub async fn message_counts_for_label(&self, label: &Label) -> Result<MessageCounts> {
        let counts = sqlx::query_as::<_, MessageCounts>(
            r#"
            SELECT COUNT(*) AS total, COALESCE(SUM(m.is_read = 0), 0) AS unread
            FROM messages m
            INNER JOIN labels_in_messages lim
                ON lim.account_id = m.account_id AND lim.message = m.custom_id
            WHERE m.is_deleted = 0 AND m.is_pdeleted = 0 AND lim.account_id = ? AND lim.label = ?
        "#,
        )
        .bind(label.account_id)
        .bind(&label.custom_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(counts)
    }

    pub async fn important_message_counts(&self, account_id: i64) -> Result<MessageCounts> {
        let counts = sqlx::query_as::<_, MessageCounts>(
            r#"
            SELECT COUNT(*) AS total, COALESCE(SUM(is_read = 0), 0) AS unread
            FROM messages
            WHERE is_important = 1 AND is_deleted = 0 AND is_pdeleted = 0 AND account_id = ?
        "#,
        )
        .bind(account_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(counts)
    }

    pub async fn unread_message_count(&self, account_id: i64) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM messages WHERE is_read = 0 AND is_deleted = 0 AND is_pdeleted = 0 AND account_id = ?",
        )
        .bind(account_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    /// Counts of messages sitting in the recycle bin.
    pub async fn message_counts_for_bin(&self, account_id: i64) -> Result<MessageCounts> {
        let counts = sqlx::query_as::<_, MessageCounts>(
            r#"
            SELECT COUNT(*) AS total, COALESCE(SUM(is_read = 0), 0) AS unread
            FROM messages
            WHERE is_deleted = 1 AND is_pdeleted = 0 AND account_id = ?
        "#,
        )
        .bind(account_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(counts)
    }

    // ========================================================================
    // Listings
    // ========================================================================

    pub async fn message_by_id(&self, id: i64) -> Result<Option<Message>> {
        let row = sqlx::query_as::<_, MessageRow>(&format!(
            "SELECT {} FROM messages WHERE id = ?",
            MESSAGE_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(MessageRow::into_message))
    }

    /// Undeleted messages of a feed, newest first.
    pub async fn messages_for_feed(&self, feed_custom_id: &str, account_id: i64) -> Result<Vec<Message>> {
        let rows = sqlx::query_as::<_, MessageRow>(&undeleted_messages_sql("feed = ? AND account_id = ?"))
            .bind(feed_custom_id)
            .bind(account_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(MessageRow::into_message).collect())
    }

    pub async fn important_messages(&self, account_id: i64) -> Result<Vec<Message>> {
        let rows = sqlx::query_as::<_, MessageRow>(&undeleted_messages_sql(
            "is_important = 1 AND account_id = ?",
        ))
        .bind(account_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(MessageRow::into_message).collect())
    }

    pub async fn unread_messages(&self, account_id: i64) -> Result<Vec<Message>> {
        let rows = sqlx::query_as::<_, MessageRow>(&undeleted_messages_sql("is_read = 0 AND account_id = ?"))
            .bind(account_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(MessageRow::into_message).collect())
    }

    pub async fn messages_with_label(&self, label: &Label) -> Result<Vec<Message>> {
        let rows = sqlx::query_as::<_, MessageRow>(&undeleted_messages_sql(
            "account_id = ?1 AND custom_id IN \
             (SELECT message FROM labels_in_messages WHERE account_id = ?1 AND label = ?2)",
        ))
        .bind(label.account_id)
        .bind(&label.custom_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(MessageRow::into_message).collect())
    }

    /// Messages in the recycle bin, newest first.
    pub async fn bin_messages(&self, account_id: i64) -> Result<Vec<Message>> {
        let rows = sqlx::query_as::<_, MessageRow>(&format!(
            "SELECT {} FROM messages WHERE is_deleted = 1 AND is_pdeleted = 0 AND account_id = ? \
             ORDER BY date_created DESC",
            MESSAGE_COLUMNS
        ))
        .bind(account_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(MessageRow::into_message).collect())
    }

    // ========================================================================
    // State Mutations
    // ========================================================================

    pub async fn mark_messages_read(&self, ids: &[i64], read: ReadStatus) -> Result<u64> {
        let value = if read == ReadStatus::Read { "1" } else { "0" };
        self.update_where_id_in(&format!("UPDATE messages SET is_read = {}", value), ids)
            .await
    }

    /// Marks every undeleted message of a feed.
    pub async fn mark_feed_read(&self, feed_custom_id: &str, account_id: i64, read: ReadStatus) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE messages SET is_read = ? WHERE feed = ? AND is_deleted = 0 AND is_pdeleted = 0 AND account_id = ?",
        )
        .bind(read == ReadStatus::Read)
        .bind(feed_custom_id)
        .bind(account_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn set_message_importance(&self, id: i64, importance: Importance) -> Result<bool> {
        let result = sqlx::query("UPDATE messages SET is_important = ? WHERE id = ?")
            .bind(importance == Importance::Important)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Flips the starred flag of every given message.
    pub async fn switch_messages_importance(&self, ids: &[i64]) -> Result<u64> {
        self.update_where_id_in("UPDATE messages SET is_important = NOT is_important", ids)
            .await
    }

    pub async fn move_messages_to_bin(&self, ids: &[i64]) -> Result<u64> {
        self.update_where_id_in("UPDATE messages SET is_deleted = 1, is_pdeleted = 0", ids)
            .await
    }

    pub async fn restore_messages_from_bin(&self, ids: &[i64]) -> Result<u64> {
        self.update_where_id_in("UPDATE messages SET is_deleted = 0, is_pdeleted = 0", ids)
            .await
    }

    /// Restores the whole recycle bin of an account.
    pub async fn restore_bin(&self, account_id: i64) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE messages SET is_deleted = 0 WHERE is_deleted = 1 AND is_pdeleted = 0 AND account_id = ?",
        )
        .bind(account_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Hides messages for good without dropping the rows, so a later sync
    /// still recognizes them.
    pub async fn permanently_delete_messages(&self, ids: &[i64]) -> Result<u64> {
        self.update_where_id_in("UPDATE messages SET is_pdeleted = 1", ids)
            .await
    }

    /// Empties the recycle bin of an account (optionally only its read part).
    pub async fn purge_messages_from_bin(&self, account_id: i64, only_read: bool) -> Result<u64> {
        let sql = if only_read {
            "UPDATE messages SET is_pdeleted = 1 WHERE is_read = 1 AND is_deleted = 1 AND account_id = ?"
        } else {
            "UPDATE messages SET is_pdeleted = 1 WHERE is_deleted = 1 AND account_id = ?"
        };
        let result = sqlx::query(sql).bind(account_id).execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    async fn update_where_id_in(&self, update: &str, ids: &[i64]) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }

        let mut builder: QueryBuilder<sqlx::Sqlite> = QueryBuilder::new(update);
        builder.push(" WHERE id IN (");
        let mut separated = builder.separated(", ");
        for id in ids {
            separated.push_bind(*id);
        }
        separated.push_unseparated(")");

        let result = builder.build().execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    // ========================================================================
    // Physical Purges
    // ========================================================================

    /// Deletes unstarred binned messages of every account.
    pub async fn purge_recycle_bin(&self) -> Result<u64> {
        self.purge_where("is_important = 0 AND is_deleted = 1").await
    }

    /// Deletes read, unstarred messages outside the bin.
    pub async fn purge_read_messages(&self) -> Result<u64> {
        self.purge_where("is_important = 0 AND is_deleted = 0 AND is_read = 1")
            .await
    }

    /// Deletes unstarred messages created before the cutoff.
    pub async fn purge_old_messages(&self, older_than: chrono::DateTime<chrono::Utc>) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        let result = sqlx::query("DELETE FROM messages WHERE is_important = 0 AND date_created < ?")
            .bind(older_than.timestamp_millis())
            .execute(&mut *tx)
            .await?;
        purge_dangling_label_assignments(&mut tx).await?;
        tx.commit().await?;
        Ok(result.rows_affected())
    }

    async fn purge_where(&self, predicate: &str) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        let result = sqlx::query(&format!("DELETE FROM messages WHERE {}", predicate))
            .execute(&mut *tx)
            .await?;
        purge_dangling_label_assignments(&mut tx).await?;
        tx.commit().await?;

        tracing::debug!(purged = result.rows_affected(), "Purged messages");
        Ok(result.rows_affected())
    }

    /// Drops label associations whose message or label no longer exists.
    pub async fn purge_leftover_label_assignments(&self, account_id: i64) -> Result<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM labels_in_messages
            WHERE account_id = ?1 AND (
                message NOT IN (SELECT custom_id FROM messages WHERE account_id = ?1)
                OR label NOT IN (SELECT custom_id FROM labels WHERE account_id = ?1)
            )
        "#,
        )
        .bind(account_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            tracing::info!(account_id, removed = result.rows_affected(), "Removed leftover label assignments");
        }
        Ok(result.rows_affected())
    }
}

fn undeleted_messages_sql(predicate: &str) -> String {
    format!(
        "SELECT {} FROM messages WHERE is_deleted = 0 AND is_pdeleted = 0 AND {} ORDER BY date_created DESC",
        MESSAGE_COLUMNS, predicate
    )
}

async fn purge_dangling_label_assignments(conn: &mut sqlx::SqliteConnection) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        DELETE FROM labels_in_messages
        WHERE NOT EXISTS (
            SELECT 1 FROM messages
            WHERE messages.account_id = labels_in_messages.account_id
              AND messages.custom_id = labels_in_messages.message
        )
    "#,
    )
    .execute(conn)
    .await?;
    Ok(())
}
