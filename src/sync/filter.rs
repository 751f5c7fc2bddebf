use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Weak};

use anyhow::Result;
use thiserror::Error;

use crate::account::{Importance, ImportanceChange, ReadStatus, ServiceAccount};
use crate::model::{Feed, LabelKey, LabelRegistry, Message, MessageFilter};
use crate::storage::Database;

/// Decision a filter script returns for one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilteringAction {
    Accept,
    Ignore,
    Purge,
    /// A value this version does not know; treated like `Ignore`.
    Unrecognized(i64),
}

impl FilteringAction {
    /// Maps the numeric codes scripts return.
    pub fn from_code(code: i64) -> Self {
        match code {
            1 => FilteringAction::Accept,
            2 => FilteringAction::Ignore,
            4 => FilteringAction::Purge,
            other => FilteringAction::Unrecognized(other),
        }
    }

    pub fn removes_message(self) -> bool {
        match self {
            FilteringAction::Accept => false,
            FilteringAction::Ignore | FilteringAction::Purge => true,
            FilteringAction::Unrecognized(_) => true,
        }
    }
}

/// A filter script failed to evaluate.
#[derive(Debug, Error)]
#[error("Filter script failed: {0}")]
pub struct FilteringError(pub String);

/// Script runtime that evaluates stored [`MessageFilter`]s.
pub trait FilterEngine: Send + Sync {
    /// Sets up evaluation state for one feed. The context is shared by every
    /// message of the feed and dropped when the feed's pass ends.
    fn create_context(&self, feed: &Feed, labels: &LabelRegistry) -> Box<dyn FilterContext + Send>;
}

/// Per-feed evaluation state of a [`FilterEngine`].
pub trait FilterContext {
    /// Runs one filter against a message, which the script may modify
    /// (read and important flags, assigned labels).
    fn filter_message(
        &mut self,
        filter: &MessageFilter,
        message: &mut Message,
    ) -> Result<FilteringAction, FilteringError>;
}

/// Owner of the loaded filter definitions.
///
/// Feeds only hold weak references; removing a definition here turns those
/// references stale and the pipeline skips them.
#[derive(Debug, Default)]
pub struct FilterRegistry {
    filters: Vec<Arc<MessageFilter>>,
}

impl FilterRegistry {
    pub fn new(filters: impl IntoIterator<Item = MessageFilter>) -> Self {
        Self {
            filters: filters.into_iter().map(Arc::new).collect(),
        }
    }

    pub async fn load(db: &Database) -> Result<Self> {
        Ok(Self::new(db.message_filters().await?))
    }

    pub fn get(&self, id: i64) -> Option<&Arc<MessageFilter>> {
        self.filters.iter().find(|filter| filter.id == id)
    }

    pub fn remove(&mut self, id: i64) -> Option<Arc<MessageFilter>> {
        let index = self.filters.iter().position(|filter| filter.id == id)?;
        Some(self.filters.remove(index))
    }

    /// Attaches assigned filters (feed custom id to filter ids) to the feeds.
    pub fn attach(&self, feeds: &mut [Feed], assignments: &HashMap<String, Vec<i64>>) {
        for feed in feeds {
            feed.filters.clear();
            let Some(ids) = assignments.get(&feed.custom_id) else {
                continue;
            };
            for id in ids {
                match self.get(*id) {
                    Some(filter) => feed.attach_filter(filter),
                    None => tracing::warn!(feed = %feed.custom_id, filter = id, "Assigned filter does not exist"),
                }
            }
        }
    }
}

/// Runs the feed's filters over a fetched batch.
///
/// Messages a filter ignores or purges are dropped from `messages`. Changes
/// the scripts make to read and important flags are announced to the account
/// through its before/after hooks; label changes are written to the store
/// right away.
pub async fn apply_message_filters(
    account: &dyn ServiceAccount,
    db: &Database,
    engine: &dyn FilterEngine,
    feed: &Feed,
    messages: &mut Vec<Message>,
) {
    if !feed.has_filters() || messages.is_empty() {
        return;
    }

    let labels = account.labels();
    let mut context = engine.create_context(feed, &labels);
    let mut newly_read = Vec::new();
    let mut newly_important = Vec::new();
    let mut kept = Vec::with_capacity(messages.len());

    for mut message in messages.drain(..) {
        let was_read = message.is_read;
        let was_important = message.is_important;
        let labels_before = message.assigned_labels.clone();

        let remove = run_filter_chain(context.as_mut(), &feed.filters, &mut message);

        if !was_read && message.is_read {
            tracing::debug!(custom_id = %message.custom_id, "Message was marked as read by filters");
            newly_read.push(message.clone());
        }
        if !was_important && message.is_important {
            tracing::debug!(custom_id = %message.custom_id, "Message was marked as important by filters");
            newly_important.push(ImportanceChange {
                message: message.clone(),
                importance: Importance::Important,
            });
        }

        apply_label_changes(db, &labels, &labels_before, &mut message).await;

        if !remove {
            kept.push(message);
        }
    }

    *messages = kept;
    drop(context);

    if !newly_read.is_empty() {
        if account
            .on_before_set_messages_read(feed, &newly_read, ReadStatus::Read)
            .await
            && account
                .on_after_set_messages_read(feed, &newly_read, ReadStatus::Read)
                .await
        {
            tracing::debug!(count = newly_read.len(), "Notified account about messages marked as read by filters");
        } else {
            tracing::error!(feed = %feed.custom_id, "Notifying account about messages marked as read by filters failed");
        }
    }

    if !newly_important.is_empty() {
        if account
            .on_before_switch_message_importance(feed, &newly_important)
            .await
            && account
                .on_after_switch_message_importance(feed, &newly_important)
                .await
        {
            tracing::debug!(
                count = newly_important.len(),
                "Notified account about messages marked as important by filters"
            );
        } else {
            tracing::error!(
                feed = %feed.custom_id,
                "Notifying account about messages marked as important by filters failed"
            );
        }
    }
}

/// Returns whether the message must be dropped.
fn run_filter_chain(
    context: &mut (dyn FilterContext + Send),
    filters: &[Weak<MessageFilter>],
    message: &mut Message,
) -> bool {
    for filter in filters {
        let Some(filter) = filter.upgrade() else {
            tracing::debug!("Message filter was deleted, skipping it");
            continue;
        };

        match context.filter_message(&filter, message) {
            Ok(FilteringAction::Accept) => continue,
            Ok(action) => {
                tracing::debug!(filter = %filter.title, ?action, title = %message.title, "Filter dropped message");
                return action.removes_message();
            }
            Err(e) => {
                tracing::error!(
                    filter = %filter.title,
                    error = %e,
                    "Error when evaluating filter script, accepting message"
                );
            }
        }
    }

    false
}

async fn apply_label_changes(
    db: &Database,
    labels: &LabelRegistry,
    before: &BTreeSet<LabelKey>,
    message: &mut Message,
) {
    let unknown: Vec<LabelKey> = message
        .assigned_labels
        .difference(before)
        .filter(|key| !labels.contains(key))
        .cloned()
        .collect();
    for key in unknown {
        tracing::warn!(label = %key, "Filter assigned a label the account does not have, ignoring it");
        message.assigned_labels.remove(&key);
    }

    if before == &message.assigned_labels {
        return;
    }
    if !message.has_usable_identity() {
        // Stored together with the message once it has an id.
        return;
    }

    for key in before.difference(&message.assigned_labels) {
        tracing::debug!(label = %key, message = %message.label_key(), "Label was deassigned by filters");
        if let Err(e) = db.deassign_label_from_message(key, message).await {
            tracing::warn!(label = %key, error = %e, "Failed to deassign label");
        }
    }

    for key in message.assigned_labels.difference(before) {
        tracing::debug!(label = %key, message = %message.label_key(), "Label was assigned by filters");
        if let Err(e) = db.assign_label_to_message(key, message).await {
            tracing::warn!(label = %key, error = %e, "Failed to assign label");
        }
    }
}
