use sqlx::{QueryBuilder, Sqlite, SqliteConnection};

use super::identity::{resolve_existing, ExistingMessage};
use super::labels::set_labels_for_message;
use super::schema::Database;
use super::types::DatabaseError;
use crate::account::SyncPolicy;
use crate::model::{encode_enclosures, Feed, Message};

/// Rows per multi-row INSERT statement.
const INSERT_CHUNK_SIZE: usize = 1000;

/// Store-level knobs for [`Database::update_messages`].
#[derive(Debug, Clone, Copy)]
pub struct UpsertOptions {
    /// Wrap each feed's batch in one transaction.
    pub use_transactions: bool,
    /// Contents differences alone do not trigger an update.
    pub ignore_contents_changes: bool,
}

impl Default for UpsertOptions {
    fn default() -> Self {
        Self {
            use_transactions: true,
            ignore_contents_changes: false,
        }
    }
}

/// Messages written by one pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateCounts {
    /// Inserted or updated messages that are unread afterwards.
    pub unread: usize,
    /// All inserted or updated messages.
    pub total: usize,
}

impl UpdateCounts {
    fn record(&mut self, message: &Message) {
        if !message.is_read {
            self.unread += 1;
        }
        self.total += 1;
    }

    pub fn is_empty(&self) -> bool {
        self.unread == 0 && self.total == 0
    }
}

impl Database {
    // ========================================================================
    // Message Reconciliation
    // ========================================================================

    /// Persist one feed's batch of fetched messages.
    ///
    /// Each message is resolved against the store; unchanged ones are skipped,
    /// changed ones updated in place and unknown ones bulk inserted. On return
    /// every persisted message carries its row id.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError::Transaction` if the transaction could not be
    /// started or committed. Nothing of the batch is stored in that case and
    /// the messages keep the ids they came in with. Failures of single
    /// statements are logged and only drop the affected rows.
    pub async fn update_messages(
        &self,
        messages: &mut [Message],
        feed: &Feed,
        policy: SyncPolicy,
        force_update: bool,
        options: &UpsertOptions,
    ) -> Result<UpdateCounts, DatabaseError> {
        if messages.is_empty() {
            return Ok(UpdateCounts::default());
        }

        if !options.use_transactions {
            let mut conn = self.pool.acquire().await.map_err(DatabaseError::from_sqlx)?;
            return Ok(reconcile(&mut conn, messages, feed, policy, force_update, options).await);
        }

        // Dropping the guard before commit (error or cancellation) rolls back.
        let mut tx = match self.pool.begin().await {
            Ok(tx) => tx,
            Err(e) => {
                tracing::error!(feed = %feed.custom_id, error = %e, "Transaction start for message downloader failed");
                return Err(DatabaseError::Transaction(e.to_string()));
            }
        };

        let original_ids: Vec<i64> = messages.iter().map(|m| m.id).collect();
        let counts = reconcile(&mut tx, messages, feed, policy, force_update, options).await;

        if let Err(e) = tx.commit().await {
            tracing::error!(feed = %feed.custom_id, error = %e, "Transaction commit for message downloader failed");
            for (message, id) in messages.iter_mut().zip(original_ids) {
                message.id = id;
            }
            return Err(DatabaseError::Transaction(e.to_string()));
        }

        Ok(counts)
    }
}

async fn reconcile(
    conn: &mut SqliteConnection,
    messages: &mut [Message],
    feed: &Feed,
    policy: SyncPolicy,
    force_update: bool,
    options: &UpsertOptions,
) -> UpdateCounts {
    let account_id = feed.account_id;
    let mut counts = UpdateCounts::default();
    let mut to_insert = Vec::new();
    let mut unresolved = vec![false; messages.len()];

    for (index, message) in messages.iter_mut().enumerate() {
        let existing = match resolve_existing(conn, message, &feed.custom_id, account_id, policy).await {
            Ok(existing) => existing,
            Err(e) => {
                tracing::warn!(title = %message.title, error = %e, "Failed to check for existing message, skipping it");
                unresolved[index] = true;
                continue;
            }
        };

        let Some(existing) = existing else {
            to_insert.push(index);
            continue;
        };

        tracing::debug!(id = existing.id, custom_id = %message.custom_id, "Message is already present in store");
        message.id = existing.id;

        let overwrite = force_update
            || policy.should_overwrite(
                message,
                &existing,
                &feed.custom_id,
                options.ignore_contents_changes,
            );
        if !overwrite {
            continue;
        }

        match update_existing(conn, message, &existing, policy).await {
            Ok(()) => {
                tracing::debug!(title = %message.title, url = %message.url, "Overwriting message in store");
                counts.record(message);
            }
            Err(e) => {
                tracing::warn!(id = existing.id, error = %e, "Failed to update message in store");
            }
        }
    }

    for chunk in to_insert.chunks(INSERT_CHUNK_SIZE) {
        insert_chunk(conn, messages, chunk, feed, &mut counts).await;
    }

    for (message, _) in messages
        .iter()
        .zip(unresolved)
        .filter(|(_, unresolved)| !unresolved)
    {
        if message.assigned_labels.is_empty() {
            continue;
        }
        if !message.has_usable_identity() {
            tracing::warn!(title = %message.title, "Cannot set labels for message without id or custom id");
            continue;
        }
        if let Err(e) = set_labels_for_message(conn, &message.assigned_labels, message).await {
            tracing::warn!(message = %message.label_key(), error = %e, "Failed to set labels for message");
        }
    }

    if let Err(e) = sqlx::query("UPDATE messages SET custom_id = CAST(id AS TEXT) WHERE custom_id = ''")
        .execute(&mut *conn)
        .await
    {
        tracing::warn!(error = %e, "Failed to set custom id for all messages");
    }

    counts
}

async fn update_existing(
    conn: &mut SqliteConnection,
    message: &Message,
    existing: &ExistingMessage,
    policy: SyncPolicy,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE messages
        SET title = ?, is_read = ?, is_important = ?, is_deleted = ?, url = ?, author = ?,
            score = ?, date_created = ?, contents = ?, enclosures = ?, feed = ?
        WHERE id = ?
    "#,
    )
    .bind(&message.title)
    .bind(message.is_read)
    .bind(policy.important_to_store(message.is_important, existing.is_important))
    .bind(message.is_deleted)
    .bind(&message.url)
    .bind(&message.author)
    .bind(message.score)
    .bind(message.created_millis())
    .bind(&message.contents)
    .bind(encode_enclosures(&message.enclosures))
    .bind(&message.feed_id)
    .bind(existing.id)
    .execute(conn)
    .await?;
    Ok(())
}

/// Inserts one chunk with a single statement and derives the new row ids from
/// the last inserted id, relying on contiguous AUTOINCREMENT ids within the
/// statement.
async fn insert_chunk(
    conn: &mut SqliteConnection,
    messages: &mut [Message],
    chunk: &[usize],
    feed: &Feed,
    counts: &mut UpdateCounts,
) {
    let rows: Vec<usize> = chunk
        .iter()
        .copied()
        .filter(|&index| {
            let message = &messages[index];
            if message.title.is_empty() {
                tracing::error!(
                    custom_id = %message.custom_id,
                    "Message will not be inserted because it has no title"
                );
                false
            } else {
                true
            }
        })
        .collect();

    if rows.is_empty() {
        return;
    }

    let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
        "INSERT INTO messages (feed, title, is_read, is_important, is_deleted, url, author, \
         score, date_created, contents, enclosures, custom_id, custom_hash, account_id) ",
    );
    builder.push_values(rows.iter().map(|&index| &messages[index]), |mut b, message| {
        b.push_bind(feed.custom_id.clone())
            .push_bind(message.title.clone())
            .push_bind(message.is_read)
            .push_bind(message.is_important)
            .push_bind(message.is_deleted)
            .push_bind(message.url.clone())
            .push_bind(message.author.clone())
            .push_bind(message.score)
            .push_bind(message.created_millis())
            .push_bind(message.contents.clone())
            .push_bind(encode_enclosures(&message.enclosures))
            .push_bind(message.custom_id.clone())
            .push_bind(message.custom_hash.clone())
            .push_bind(feed.account_id);
    });

    match builder.build().execute(&mut *conn).await {
        Ok(result) => {
            let first_id = result.last_insert_rowid() - rows.len() as i64 + 1;
            for (position, &index) in rows.iter().enumerate() {
                let message = &mut messages[index];
                message.id = first_id + position as i64;
                counts.record(message);
            }
        }
        Err(e) => {
            tracing::error!(feed = %feed.custom_id, rows = rows.len(), error = %e, "Failed bulk insert of messages");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use pretty_assertions::assert_eq;

    fn feed() -> Feed {
        Feed {
            account_id: 1,
            custom_id: "f1".into(),
            title: "Feed".into(),
            source: "https://example.com/rss".into(),
            ..Default::default()
        }
    }

    fn message(custom_id: &str, title: &str) -> Message {
        Message {
            account_id: 1,
            feed_id: "f1".into(),
            custom_id: custom_id.into(),
            title: title.into(),
            url: format!("https://example.com/{}", custom_id),
            author: "Author".into(),
            contents: format!("Body of {}", title),
            created: Utc.timestamp_millis_opt(1_700_000_000_000).single(),
            created_from_feed: true,
            ..Default::default()
        }
    }

    async fn stored(db: &Database) -> Vec<(i64, String, String, bool)> {
        sqlx::query_as("SELECT id, custom_id, title, is_important FROM messages ORDER BY id")
            .fetch_all(&db.pool)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_resync_of_identical_batch_writes_nothing() {
        let db = Database::open(":memory:").await.unwrap();
        let batch = vec![message("a", "A"), message("b", "B"), message("c", "C")];

        let mut first = batch.clone();
        let counts = db
            .update_messages(&mut first, &feed(), SyncPolicy::Standalone, false, &UpsertOptions::default())
            .await
            .unwrap();
        assert_eq!(counts, UpdateCounts { unread: 3, total: 3 });
        let after_first = stored(&db).await;

        let mut second = batch.clone();
        let counts = db
            .update_messages(&mut second, &feed(), SyncPolicy::Standalone, false, &UpsertOptions::default())
            .await
            .unwrap();
        assert_eq!(counts, UpdateCounts::default());
        assert_eq!(stored(&db).await, after_first);

        let first_ids: Vec<i64> = first.iter().map(|m| m.id).collect();
        let second_ids: Vec<i64> = second.iter().map(|m| m.id).collect();
        assert_eq!(first_ids, second_ids);
    }

    #[tokio::test]
    async fn test_bulk_insert_ids_skip_untitled_rows() {
        let db = Database::open(":memory:").await.unwrap();
        let mut batch = vec![message("a", "A"), message("b", ""), message("c", "C")];

        let counts = db
            .update_messages(&mut batch, &feed(), SyncPolicy::Standalone, false, &UpsertOptions::default())
            .await
            .unwrap();
        assert_eq!(counts.total, 2);
        assert_eq!(batch[1].id, 0);

        let rows = stored(&db).await;
        assert_eq!(rows.len(), 2);
        assert_eq!((rows[0].0, rows[0].1.as_str()), (batch[0].id, "a"));
        assert_eq!((rows[1].0, rows[1].1.as_str()), (batch[2].id, "c"));
    }

    #[tokio::test]
    async fn test_ids_are_derived_across_chunks() {
        let db = Database::open(":memory:").await.unwrap();
        let mut batch: Vec<Message> = (0..INSERT_CHUNK_SIZE + 250)
            .map(|i| message(&format!("m{}", i), &format!("Title {}", i)))
            .collect();

        let counts = db
            .update_messages(&mut batch, &feed(), SyncPolicy::Standalone, false, &UpsertOptions::default())
            .await
            .unwrap();
        assert_eq!(counts.total, batch.len());

        let rows: Vec<(i64, String)> = sqlx::query_as("SELECT id, custom_id FROM messages")
            .fetch_all(&db.pool)
            .await
            .unwrap();
        let by_custom_id: std::collections::HashMap<String, i64> =
            rows.into_iter().map(|(id, custom_id)| (custom_id, id)).collect();
        for msg in &batch {
            assert_eq!(by_custom_id[&msg.custom_id], msg.id);
        }
    }

    #[tokio::test]
    async fn test_standalone_update_keeps_stored_star() {
        let db = Database::open(":memory:").await.unwrap();
        let mut starred = vec![message("a", "A")];
        starred[0].is_important = true;
        db.update_messages(&mut starred, &feed(), SyncPolicy::Standalone, false, &UpsertOptions::default())
            .await
            .unwrap();

        let mut incoming = vec![message("a", "A, edited")];
        let counts = db
            .update_messages(&mut incoming, &feed(), SyncPolicy::Standalone, false, &UpsertOptions::default())
            .await
            .unwrap();
        assert_eq!(counts.total, 1);

        let rows = stored(&db).await;
        assert_eq!(rows[0].2, "A, edited");
        assert!(rows[0].3);
    }

    #[tokio::test]
    async fn test_syncable_update_clears_star() {
        let db = Database::open(":memory:").await.unwrap();
        let mut starred = vec![message("a", "A")];
        starred[0].is_important = true;
        db.update_messages(&mut starred, &feed(), SyncPolicy::Syncable, false, &UpsertOptions::default())
            .await
            .unwrap();

        let mut incoming = vec![message("a", "A")];
        db.update_messages(&mut incoming, &feed(), SyncPolicy::Syncable, false, &UpsertOptions::default())
            .await
            .unwrap();

        assert!(!stored(&db).await[0].3);
    }

    #[tokio::test]
    async fn test_force_update_rewrites_unchanged_message() {
        let db = Database::open(":memory:").await.unwrap();
        let mut batch = vec![message("a", "A")];
        db.update_messages(&mut batch, &feed(), SyncPolicy::Standalone, false, &UpsertOptions::default())
            .await
            .unwrap();

        batch[0].is_read = true;
        let counts = db
            .update_messages(&mut batch, &feed(), SyncPolicy::Standalone, true, &UpsertOptions::default())
            .await
            .unwrap();
        assert_eq!(counts, UpdateCounts { unread: 0, total: 1 });

        let (is_read,): (bool,) = sqlx::query_as("SELECT is_read FROM messages")
            .fetch_one(&db.pool)
            .await
            .unwrap();
        assert!(is_read);
    }

    #[tokio::test]
    async fn test_labels_and_custom_id_backfill_without_transaction() {
        let db = Database::open(":memory:").await.unwrap();
        let mut batch = vec![message("", "Untagged guid")];
        batch[0].assigned_labels.insert("work".into());

        let options = UpsertOptions {
            use_transactions: false,
            ..Default::default()
        };
        db.update_messages(&mut batch, &feed(), SyncPolicy::Standalone, false, &options)
            .await
            .unwrap();

        let id = batch[0].id;
        assert!(id > 0);
        let rows = stored(&db).await;
        assert_eq!(rows[0].1, id.to_string());

        let (label,): (String,) = sqlx::query_as("SELECT label FROM labels_in_messages WHERE message = ?")
            .bind(id.to_string())
            .fetch_one(&db.pool)
            .await
            .unwrap();
        assert_eq!(label, "work");
    }

    #[tokio::test]
    async fn test_commit_failure_discards_whole_batch() {
        let db = Database::open(":memory:").await.unwrap();

        // Every inserted message leaves a dangling deferred reference, so the
        // statements succeed and only COMMIT fails.
        for statement in [
            "CREATE TABLE commit_guard_parent (id INTEGER PRIMARY KEY)",
            "CREATE TABLE commit_guard (parent INTEGER REFERENCES commit_guard_parent(id) DEFERRABLE INITIALLY DEFERRED)",
            "CREATE TRIGGER commit_guard_trigger AFTER INSERT ON messages BEGIN INSERT INTO commit_guard (parent) VALUES (-1); END",
        ] {
            sqlx::query(statement).execute(&db.pool).await.unwrap();
        }

        let mut batch = vec![message("a", "A"), message("b", "B"), message("c", "C")];
        let result = db
            .update_messages(&mut batch, &feed(), SyncPolicy::Standalone, false, &UpsertOptions::default())
            .await;

        assert!(matches!(result, Err(DatabaseError::Transaction(_))));
        assert!(stored(&db).await.is_empty());
        assert!(batch.iter().all(|m| m.id == 0));
    }

    #[tokio::test]
    async fn test_cancelled_upsert_releases_write_lock() {
        let path = std::env::temp_dir().join(format!("feedsync_cancelled_upsert_{}.db", std::process::id()));
        let path_str = path.to_str().unwrap().to_string();
        let db = Database::open(&path_str).await.unwrap();

        let mut large: Vec<Message> = (0..3000)
            .map(|i| message(&format!("bulk-{}", i), &format!("Bulk {}", i)))
            .collect();
        for (i, message) in large.iter_mut().enumerate() {
            message.contents = "x".repeat(2048 + i);
        }

        // Whether or not the batch finishes in time, no transaction may
        // outlive the dropped future.
        let _ = tokio::time::timeout(
            std::time::Duration::from_millis(30),
            db.update_messages(&mut large, &feed(), SyncPolicy::Standalone, false, &UpsertOptions::default()),
        )
        .await;

        let mut next = vec![message("after", "After cancel")];
        let counts = db
            .update_messages(&mut next, &feed(), SyncPolicy::Standalone, false, &UpsertOptions::default())
            .await
            .unwrap();
        assert_eq!(counts.total, 1);

        let other = Database::open(&path_str).await.unwrap();
        let mut from_other = vec![message("other", "Other handle")];
        let counts = other
            .update_messages(&mut from_other, &feed(), SyncPolicy::Standalone, false, &UpsertOptions::default())
            .await
            .unwrap();
        assert_eq!(counts.total, 1);

        drop(other);
        db.pool.close().await;
        for suffix in ["", "-wal", "-shm"] {
            std::fs::remove_file(format!("{}{}", path_str, suffix)).ok();
        }
    }

    #[tokio::test]
    async fn test_unresolved_messages_get_no_labels() {
        let db = Database::open(":memory:").await.unwrap();
        // Every identity lookup now fails.
        sqlx::query("DROP TABLE messages").execute(&db.pool).await.unwrap();

        let mut batch = vec![message("a", "A")];
        batch[0].assigned_labels.insert("work".into());
        let options = UpsertOptions {
            use_transactions: false,
            ..Default::default()
        };
        let counts = db
            .update_messages(&mut batch, &feed(), SyncPolicy::Standalone, false, &options)
            .await
            .unwrap();

        assert!(counts.is_empty());
        let (assignments,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM labels_in_messages")
            .fetch_one(&db.pool)
            .await
            .unwrap();
        assert_eq!(assignments, 0);
    }
}
