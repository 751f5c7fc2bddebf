use chrono::{TimeZone, Utc};
use thiserror::Error;

use crate::model::{decode_enclosures, Feed, FeedStatus, Message};

// ============================================================================
// Error Types
// ============================================================================

/// Database-specific errors with user-friendly messages
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Another process has locked the database
    #[error("Another instance appears to be using the database. Please close it and try again.")]
    InstanceLocked,

    /// Migration failed
    #[error("Database migration failed: {0}")]
    Migration(String),

    /// Transaction could not be started or committed; nothing was applied
    #[error("Database transaction failed: {0}")]
    Transaction(String),

    /// Generic database error
    #[error("Database error: {0}")]
    Other(#[from] sqlx::Error),
}

impl DatabaseError {
    /// Check if a sqlx error indicates database locking
    pub(crate) fn from_sqlx(err: sqlx::Error) -> Self {
        let error_string = err.to_string().to_lowercase();

        // SQLITE_BUSY (5): database is locked
        // SQLITE_LOCKED (6): database table is locked
        // SQLITE_CANTOPEN (14): unable to open database file
        if error_string.contains("database is locked")
            || error_string.contains("database table is locked")
            || error_string.contains("sqlite_busy")
            || error_string.contains("sqlite_locked")
            || error_string.contains("unable to open database file")
        {
            return DatabaseError::InstanceLocked;
        }

        DatabaseError::Other(err)
    }
}

// ============================================================================
// Row Types
// ============================================================================

/// Column list matching [`MessageRow`].
pub(crate) const MESSAGE_COLUMNS: &str = "id, account_id, feed, custom_id, custom_hash, title, url, \
     author, contents, enclosures, score, date_created, is_read, is_important, is_deleted, is_pdeleted";

/// Internal row type for message queries, converted via `into_message()`
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct MessageRow {
    pub id: i64,
    pub account_id: i64,
    pub feed: String,
    pub custom_id: String,
    pub custom_hash: String,
    pub title: String,
    pub url: String,
    pub author: String,
    pub contents: String,
    pub enclosures: String,
    pub score: f64,
    pub date_created: i64,
    pub is_read: bool,
    pub is_important: bool,
    pub is_deleted: bool,
    pub is_pdeleted: bool,
}

impl MessageRow {
    pub(crate) fn into_message(self) -> Message {
        Message {
            id: self.id,
            custom_id: self.custom_id,
            custom_hash: self.custom_hash,
            account_id: self.account_id,
            feed_id: self.feed,
            title: self.title,
            url: self.url,
            author: self.author,
            contents: self.contents,
            raw_contents: String::new(),
            created: Utc.timestamp_millis_opt(self.date_created).single(),
            created_from_feed: false,
            score: self.score,
            enclosures: decode_enclosures(&self.enclosures),
            is_read: self.is_read,
            is_important: self.is_important,
            is_deleted: self.is_deleted,
            is_pdeleted: self.is_pdeleted,
            assigned_labels: Default::default(),
        }
    }
}

/// Internal row type for feed queries
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct FeedRow {
    pub id: i64,
    pub account_id: i64,
    pub custom_id: String,
    pub title: String,
    pub source: String,
    pub status: i64,
    pub status_message: Option<String>,
    pub last_fetched: Option<i64>,
}

impl FeedRow {
    pub(crate) fn into_feed(self) -> Feed {
        Feed {
            id: self.id,
            account_id: self.account_id,
            custom_id: self.custom_id,
            title: self.title,
            source: self.source,
            status: FeedStatus::from_i64(self.status),
            status_message: self.status_message,
            last_fetched: self.last_fetched,
            filters: Vec::new(),
        }
    }
}
