use anyhow::Result;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    SqlitePool,
};
use std::str::FromStr;
use std::time::Duration;

use super::types::DatabaseError;

// ============================================================================
// Database
// ============================================================================

/// Handle to the message store.
///
/// Cloning is cheap (the pool is reference counted). Every operation checks a
/// connection out of the pool, so the synchronization worker and readers on
/// other tasks never share a connection handle.
#[derive(Clone)]
pub struct Database {
    pub(crate) pool: SqlitePool,
}

impl Database {
    /// Open a database connection and run migrations
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError::InstanceLocked` if another process holds the
    /// database locked (SQLITE_BUSY, SQLITE_LOCKED, SQLITE_CANTOPEN).
    /// Returns `DatabaseError::Other` for other database errors.
    pub async fn open(path: &str) -> Result<Self, DatabaseError> {
        let url = format!("sqlite:{}?mode=rwc", path);

        // Message bodies and account state are private: create the file user-only.
        #[cfg(unix)]
        if path != ":memory:" {
            use std::os::unix::fs::PermissionsExt;
            let db_path = std::path::Path::new(path);
            if db_path.exists() {
                let perms = std::fs::Permissions::from_mode(0o600);
                if let Err(e) = std::fs::set_permissions(path, perms) {
                    tracing::warn!(path = %path, error = %e, "Failed to set database file permissions");
                }
            } else if let Some(parent) = db_path.parent() {
                if parent.exists() {
                    use std::os::unix::fs::OpenOptionsExt;
                    let _file = std::fs::OpenOptions::new()
                        .write(true)
                        .create_new(true)
                        .mode(0o600)
                        .open(db_path)
                        .ok(); // If creation fails, SQLite will report the error at connect_with.
                }
            }
        }

        // busy_timeout=5000: a reader waits up to 5 seconds for the sync
        // worker's write transaction instead of failing with SQLITE_BUSY.
        let options = SqliteConnectOptions::from_str(&url)
            .map_err(DatabaseError::from_sqlx)?
            .foreign_keys(true)
            .pragma("busy_timeout", "5000");
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(options)
            .await
            .map_err(DatabaseError::from_sqlx)?;
        let db = Self { pool };
        db.migrate().await.map_err(|e| {
            let error_string = e.to_string().to_lowercase();
            if error_string.contains("database is locked")
                || error_string.contains("database table is locked")
                || error_string.contains("sqlite_busy")
                || error_string.contains("sqlite_locked")
            {
                DatabaseError::InstanceLocked
            } else {
                DatabaseError::Migration(e.to_string())
            }
        })?;
        Ok(db)
    }

    /// Run database migrations atomically within a transaction.
    ///
    /// All statements use `IF NOT EXISTS`, so re-running on an existing
    /// database is a no-op. Text columns default to `''` rather than NULL so
    /// identity lookups can compare with `=`.
    async fn migrate(&self) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS feeds (
                id INTEGER PRIMARY KEY,
                account_id INTEGER NOT NULL,
                custom_id TEXT NOT NULL,
                title TEXT NOT NULL,
                source TEXT NOT NULL DEFAULT '',
                status INTEGER NOT NULL DEFAULT 0,
                status_message TEXT,
                last_fetched INTEGER,
                UNIQUE(account_id, custom_id)
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                account_id INTEGER NOT NULL,
                feed TEXT NOT NULL DEFAULT '',
                custom_id TEXT NOT NULL DEFAULT '',
                custom_hash TEXT NOT NULL DEFAULT '',
                title TEXT NOT NULL CHECK (title != ''),
                url TEXT NOT NULL DEFAULT '',
                author TEXT NOT NULL DEFAULT '',
                contents TEXT NOT NULL DEFAULT '',
                enclosures TEXT NOT NULL DEFAULT '',
                score REAL NOT NULL DEFAULT 0,
                date_created INTEGER NOT NULL DEFAULT 0,
                is_read INTEGER NOT NULL DEFAULT 0,
                is_important INTEGER NOT NULL DEFAULT 0,
                is_deleted INTEGER NOT NULL DEFAULT 0,
                is_pdeleted INTEGER NOT NULL DEFAULT 0
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS labels (
                id INTEGER PRIMARY KEY,
                account_id INTEGER NOT NULL,
                custom_id TEXT NOT NULL,
                title TEXT NOT NULL,
                color TEXT NOT NULL DEFAULT '',
                UNIQUE(account_id, custom_id)
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS labels_in_messages (
                account_id INTEGER NOT NULL,
                label TEXT NOT NULL,
                message TEXT NOT NULL
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS message_filters (
                id INTEGER PRIMARY KEY,
                title TEXT NOT NULL,
                script TEXT NOT NULL
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS message_filters_in_feeds (
                filter INTEGER NOT NULL REFERENCES message_filters(id) ON DELETE CASCADE,
                feed_custom_id TEXT NOT NULL,
                account_id INTEGER NOT NULL,
                UNIQUE(filter, feed_custom_id, account_id)
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        // Identity lookups: one index per resolution scheme.
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_messages_feed_custom_id ON messages(account_id, feed, custom_id)",
        )
        .execute(&mut *tx)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_messages_custom_id ON messages(account_id, custom_id)",
        )
        .execute(&mut *tx)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_messages_feed_title ON messages(account_id, feed, title)",
        )
        .execute(&mut *tx)
        .await?;

        // Counter queries filter on state flags per feed.
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_messages_feed_state ON messages(account_id, feed, is_deleted, is_pdeleted, is_read)",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_labels_in_messages_label ON labels_in_messages(account_id, label)",
        )
        .execute(&mut *tx)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_labels_in_messages_message ON labels_in_messages(account_id, message)",
        )
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(())
    }
}
