use crate::model::Message;
use crate::storage::ExistingMessage;

/// How the store recognizes an already persisted copy of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityRule {
    /// Message carries its row id (re-processing of stored messages).
    RowId(i64),
    /// No custom id: exact (feed, title, url, author) match.
    Attributes,
    /// Custom ids are unique across the whole account.
    AccountCustomId,
    /// Custom ids are only unique within their feed.
    FeedCustomId,
}

/// Per-account reconciliation strategy.
///
/// Selected once per account from [`ServiceAccount::is_syncable`](super::ServiceAccount::is_syncable)
/// and consulted by the identity resolver and the upsert engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPolicy {
    /// State mirrored to and from a remote service; remote read/starred state is authoritative.
    Syncable,
    /// Plain feeds (RSS/Atom/JSON); local state is authoritative.
    Standalone,
}

impl SyncPolicy {
    pub fn from_syncable(syncable: bool) -> Self {
        if syncable {
            SyncPolicy::Syncable
        } else {
            SyncPolicy::Standalone
        }
    }

    pub fn is_syncable(self) -> bool {
        self == SyncPolicy::Syncable
    }

    pub fn identity_rule(self, message: &Message) -> IdentityRule {
        if message.id > 0 {
            IdentityRule::RowId(message.id)
        } else if message.custom_id.is_empty() {
            IdentityRule::Attributes
        } else if self.is_syncable() {
            IdentityRule::AccountCustomId
        } else {
            IdentityRule::FeedCustomId
        }
    }

    /// Decides whether a resolved message must be written back.
    ///
    /// `ignore_contents_changes` only gates the contents-differ clauses; a
    /// changed feed-derived timestamp still triggers an update on its own.
    pub fn should_overwrite(
        self,
        incoming: &Message,
        existing: &ExistingMessage,
        feed_custom_id: &str,
        ignore_contents_changes: bool,
    ) -> bool {
        let contents_changed = !ignore_contents_changes && incoming.contents != existing.contents;
        let date_changed = incoming.created_millis() != existing.date_created;
        let has_custom_id = !incoming.custom_id.is_empty();

        let syncable_changed = has_custom_id
            && self.is_syncable()
            && (date_changed
                || incoming.is_read != existing.is_read
                || incoming.is_important != existing.is_important
                || (incoming.feed_id != existing.feed_id && incoming.feed_id == feed_custom_id)
                || incoming.title != existing.title
                || contents_changed);

        let standalone_changed = has_custom_id
            && !self.is_syncable()
            && (incoming.title != existing.title
                || incoming.author != existing.author
                || contents_changed);

        let feed_date_changed = (incoming.created_from_feed && date_changed) || contents_changed;

        syncable_changed || standalone_changed || feed_date_changed
    }

    /// Importance value to write on update. Standalone accounts never clear a
    /// stored star from an incoming unstarred copy.
    pub fn important_to_store(self, incoming: bool, stored: bool) -> bool {
        if self.is_syncable() || incoming {
            incoming
        } else {
            stored
        }
    }
}
