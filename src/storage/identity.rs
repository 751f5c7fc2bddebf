use sqlx::SqliteConnection;

use crate::account::{IdentityRule, SyncPolicy};
use crate::model::Message;

/// Stored state of a message, as needed to decide whether an incoming copy
/// must be written back.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct ExistingMessage {
    pub id: i64,
    pub date_created: i64,
    pub is_read: bool,
    pub is_important: bool,
    #[sqlx(rename = "feed")]
    pub feed_id: String,
    pub title: String,
    pub author: String,
    pub contents: String,
}

const EXISTING_COLUMNS: &str = "id, date_created, is_read, is_important, feed, title, author, contents";

/// Looks up the stored copy of `message` using the rule the policy selects.
///
/// Returns `None` when the message has not been persisted yet.
pub(crate) async fn resolve_existing(
    conn: &mut SqliteConnection,
    message: &Message,
    feed_custom_id: &str,
    account_id: i64,
    policy: SyncPolicy,
) -> Result<Option<ExistingMessage>, sqlx::Error> {
    match policy.identity_rule(message) {
        IdentityRule::RowId(id) => {
            sqlx::query_as::<_, ExistingMessage>(&format!(
                "SELECT {} FROM messages WHERE id = ? AND account_id = ?",
                EXISTING_COLUMNS
            ))
            .bind(id)
            .bind(account_id)
            .fetch_optional(&mut *conn)
            .await
        }
        IdentityRule::Attributes => {
            sqlx::query_as::<_, ExistingMessage>(&format!(
                "SELECT {} FROM messages \
                 WHERE feed = ? AND title = ? AND url = ? AND author = ? AND account_id = ?",
                EXISTING_COLUMNS
            ))
            .bind(feed_custom_id)
            .bind(&message.title)
            .bind(&message.url)
            .bind(&message.author)
            .bind(account_id)
            .fetch_optional(&mut *conn)
            .await
        }
        IdentityRule::AccountCustomId => {
            sqlx::query_as::<_, ExistingMessage>(&format!(
                "SELECT {} FROM messages WHERE custom_id = ? AND account_id = ?",
                EXISTING_COLUMNS
            ))
            .bind(&message.custom_id)
            .bind(account_id)
            .fetch_optional(&mut *conn)
            .await
        }
        IdentityRule::FeedCustomId => {
            sqlx::query_as::<_, ExistingMessage>(&format!(
                "SELECT {} FROM messages WHERE feed = ? AND custom_id = ? AND account_id = ?",
                EXISTING_COLUMNS
            ))
            .bind(feed_custom_id)
            .bind(&message.custom_id)
            .bind(account_id)
            .fetch_optional(&mut *conn)
            .await
        }
    }
}
