//! Service account abstraction.
//!
//! A [`ServiceAccount`] owns feeds and labels and knows how to obtain new
//! messages for one of its feeds. Accounts backed by a remote service
//! (`is_syncable() == true`) use account-wide custom ids and receive the
//! before/after hooks so they can mirror state changes upstream.

mod policy;

use std::collections::HashMap;

use async_trait::async_trait;

use crate::feed::FetchError;
use crate::model::{Feed, LabelRegistry, Message};

pub use policy::{IdentityRule, SyncPolicy};

/// State buckets used for pre-fetch snapshots of stored messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BagOfMessages {
    Read,
    Unread,
    Starred,
}

/// Custom ids of one feed's stored messages, grouped by state.
pub type StatedMessages = HashMap<BagOfMessages, Vec<String>>;

/// Per-feed snapshots of one account, keyed by feed custom id.
pub type AccountStatedMessages = HashMap<String, StatedMessages>;

/// Tagged message ids per label custom id.
pub type TaggedMessages = HashMap<String, Vec<String>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadStatus {
    Unread,
    Read,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Importance {
    NotImportant,
    Important,
}

/// A requested importance switch of one message.
#[derive(Debug, Clone)]
pub struct ImportanceChange {
    pub message: Message,
    pub importance: Importance,
}

/// An account whose feeds the downloader can update.
///
/// Hook methods return `false` on failure; the downloader logs the failure
/// and carries on.
#[async_trait]
pub trait ServiceAccount: Send + Sync {
    fn account_id(&self) -> i64;

    /// Whether message state is mirrored with a remote service.
    fn is_syncable(&self) -> bool;

    fn policy(&self) -> SyncPolicy {
        SyncPolicy::from_syncable(self.is_syncable())
    }

    /// Whether the account wants Read/Unread/Starred and per-label snapshots
    /// before its feeds are fetched.
    fn wants_bagged_ids_of_existing_messages(&self) -> bool {
        false
    }

    fn labels(&self) -> LabelRegistry {
        LabelRegistry::default()
    }

    /// Whether the account caches local state changes for later upload.
    fn has_cache(&self) -> bool {
        false
    }

    /// Pushes cached local changes back to the remote service.
    async fn save_all_cached_data(&self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Called once per run with every feed of this account in the worklist.
    async fn about_to_begin_feed_fetching(
        &self,
        _feeds: &[Feed],
        _stated_messages: &AccountStatedMessages,
        _tagged_messages: &TaggedMessages,
    ) {
    }

    async fn obtain_new_messages(
        &self,
        feed: &Feed,
        stated_messages: &StatedMessages,
        tagged_messages: &TaggedMessages,
    ) -> Result<Vec<Message>, FetchError>;

    async fn on_before_set_messages_read(
        &self,
        _feed: &Feed,
        _messages: &[Message],
        _read: ReadStatus,
    ) -> bool {
        true
    }

    async fn on_after_set_messages_read(
        &self,
        _feed: &Feed,
        _messages: &[Message],
        _read: ReadStatus,
    ) -> bool {
        true
    }

    async fn on_before_switch_message_importance(
        &self,
        _feed: &Feed,
        _changes: &[ImportanceChange],
    ) -> bool {
        true
    }

    async fn on_after_switch_message_importance(
        &self,
        _feed: &Feed,
        _changes: &[ImportanceChange],
    ) -> bool {
        true
    }

    /// Notification that feeds changed (status, counts).
    fn item_changed(&self, _feeds: &[Feed]) {}
}
