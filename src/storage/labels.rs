use std::collections::HashMap;

use anyhow::Result;
use sqlx::SqliteConnection;

use super::schema::Database;
use crate::account::{BagOfMessages, TaggedMessages};
use crate::model::{Feed, Label, LabelKey, LabelRegistry, Message};

impl Database {
    // ========================================================================
    // Label Registry
    // ========================================================================

    /// Create (or retitle) a label of an account, returning its row id.
    pub async fn create_label(
        &self,
        account_id: i64,
        custom_id: &str,
        title: &str,
        color: &str,
    ) -> Result<i64> {
        let (id,): (i64,) = sqlx::query_as(
            r#"
            INSERT INTO labels (account_id, custom_id, title, color)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(account_id, custom_id) DO UPDATE SET
                title = excluded.title,
                color = excluded.color
            RETURNING id
        "#,
        )
        .bind(account_id)
        .bind(custom_id)
        .bind(title)
        .bind(color)
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    /// Delete a label together with every association to it.
    pub async fn delete_label(&self, label: &Label) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM labels_in_messages WHERE account_id = ? AND label = ?")
            .bind(label.account_id)
            .bind(&label.custom_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM labels WHERE id = ?")
            .bind(label.id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn labels_for_account(&self, account_id: i64) -> Result<LabelRegistry> {
        let labels = sqlx::query_as::<_, Label>(
            "SELECT id, account_id, custom_id, title, color FROM labels WHERE account_id = ? ORDER BY title",
        )
        .bind(account_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(LabelRegistry::new(labels))
    }

    /// Labels currently assigned to a stored message.
    pub async fn labels_for_message(&self, message: &Message) -> Result<Vec<Label>> {
        let labels = sqlx::query_as::<_, Label>(
            r#"
            SELECT l.id, l.account_id, l.custom_id, l.title, l.color
            FROM labels l
            INNER JOIN labels_in_messages lim
                ON lim.account_id = l.account_id AND lim.label = l.custom_id
            WHERE lim.account_id = ? AND lim.message = ?
            ORDER BY l.title
        "#,
        )
        .bind(message.account_id)
        .bind(message.label_key())
        .fetch_all(&self.pool)
        .await?;

        Ok(labels)
    }

    // ========================================================================
    // Label Assignment
    // ========================================================================

    pub async fn is_label_assigned_to_message(&self, label: &str, message: &Message) -> Result<bool> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM labels_in_messages WHERE account_id = ? AND label = ? AND message = ?",
        )
        .bind(message.account_id)
        .bind(label)
        .bind(message.label_key())
        .fetch_one(&self.pool)
        .await?;
        Ok(count > 0)
    }

    pub async fn assign_label_to_message(&self, label: &str, message: &Message) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM labels_in_messages WHERE account_id = ? AND label = ? AND message = ?")
            .bind(message.account_id)
            .bind(label)
            .bind(message.label_key())
            .execute(&mut *tx)
            .await?;
        sqlx::query("INSERT INTO labels_in_messages (account_id, label, message) VALUES (?, ?, ?)")
            .bind(message.account_id)
            .bind(label)
            .bind(message.label_key())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn deassign_label_from_message(&self, label: &str, message: &Message) -> Result<()> {
        sqlx::query("DELETE FROM labels_in_messages WHERE account_id = ? AND label = ? AND message = ?")
            .bind(message.account_id)
            .bind(label)
            .bind(message.label_key())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Replace every label association of a message.
    pub async fn set_labels_for_message<'a>(
        &self,
        labels: impl IntoIterator<Item = &'a LabelKey>,
        message: &Message,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        set_labels_for_message(&mut tx, labels, message).await?;
        tx.commit().await?;
        Ok(())
    }

    // ========================================================================
    // Pre-fetch Snapshots
    // ========================================================================

    /// Custom ids of a feed's stored messages in the given state.
    pub async fn bag_of_messages(&self, bag: BagOfMessages, feed: &Feed) -> Result<Vec<String>> {
        let predicate = match bag {
            BagOfMessages::Unread => "is_read = 0",
            BagOfMessages::Starred => "is_important = 1",
            BagOfMessages::Read => "is_read = 1",
        };

        let rows: Vec<(String,)> = sqlx::query_as(&format!(
            "SELECT custom_id FROM messages WHERE {} AND feed = ? AND account_id = ?",
            predicate
        ))
        .bind(&feed.custom_id)
        .bind(feed.account_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    /// Tagged message ids for every label of the registry.
    pub async fn bags_of_messages(&self, labels: &LabelRegistry) -> Result<TaggedMessages> {
        let mut bags = HashMap::with_capacity(labels.len());

        for label in labels.labels() {
            let rows: Vec<(String,)> = sqlx::query_as(
                "SELECT message FROM labels_in_messages WHERE label = ? AND account_id = ?",
            )
            .bind(&label.custom_id)
            .bind(label.account_id)
            .fetch_all(&self.pool)
            .await?;

            bags.insert(
                label.custom_id.clone(),
                rows.into_iter().map(|(id,)| id).collect(),
            );
        }

        Ok(bags)
    }
}

/// Delete-then-insert of a message's label associations on an open connection.
pub(crate) async fn set_labels_for_message<'a>(
    conn: &mut SqliteConnection,
    labels: impl IntoIterator<Item = &'a LabelKey>,
    message: &Message,
) -> Result<(), sqlx::Error> {
    let key = message.label_key();

    sqlx::query("DELETE FROM labels_in_messages WHERE account_id = ? AND message = ?")
        .bind(message.account_id)
        .bind(&key)
        .execute(&mut *conn)
        .await?;

    for label in labels {
        sqlx::query("INSERT INTO labels_in_messages (account_id, label, message) VALUES (?, ?, ?)")
            .bind(message.account_id)
            .bind(label)
            .bind(&key)
            .execute(&mut *conn)
            .await?;
    }

    Ok(())
}
