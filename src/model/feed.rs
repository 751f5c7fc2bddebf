use std::fmt;
use std::sync::{Arc, Weak};

use super::MessageFilter;

/// Outcome of the latest processing pass of a feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FeedStatus {
    #[default]
    Normal,
    NewMessages,
    NetworkError,
    AuthError,
    ParsingError,
    OtherError,
}

impl FeedStatus {
    pub fn as_i64(self) -> i64 {
        match self {
            FeedStatus::Normal => 0,
            FeedStatus::NewMessages => 1,
            FeedStatus::NetworkError => 2,
            FeedStatus::AuthError => 3,
            FeedStatus::ParsingError => 4,
            FeedStatus::OtherError => 5,
        }
    }

    /// Unknown stored values read back as `OtherError`.
    pub fn from_i64(value: i64) -> Self {
        match value {
            0 => FeedStatus::Normal,
            1 => FeedStatus::NewMessages,
            2 => FeedStatus::NetworkError,
            3 => FeedStatus::AuthError,
            4 => FeedStatus::ParsingError,
            _ => FeedStatus::OtherError,
        }
    }

    pub fn is_error(self) -> bool {
        !matches!(self, FeedStatus::Normal | FeedStatus::NewMessages)
    }
}

impl fmt::Display for FeedStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            FeedStatus::Normal => "normal",
            FeedStatus::NewMessages => "new messages",
            FeedStatus::NetworkError => "network error",
            FeedStatus::AuthError => "authentication error",
            FeedStatus::ParsingError => "parsing error",
            FeedStatus::OtherError => "other error",
        };
        f.write_str(text)
    }
}

/// A subscribed feed of one account.
///
/// `custom_id` is unique within the account and is what messages reference
/// in their `feed_id`. Filters are held as weak references: the
/// [`FilterRegistry`](crate::sync::FilterRegistry) owns the definitions and a
/// deleted definition simply stops upgrading.
#[derive(Debug, Clone, Default)]
pub struct Feed {
    pub id: i64,
    pub account_id: i64,
    pub custom_id: String,
    pub title: String,
    pub source: String,
    pub status: FeedStatus,
    pub status_message: Option<String>,
    pub last_fetched: Option<i64>,
    pub filters: Vec<Weak<MessageFilter>>,
}

impl Feed {
    pub fn set_status(&mut self, status: FeedStatus, message: Option<String>) {
        self.status = status;
        self.status_message = message;
    }

    pub fn attach_filter(&mut self, filter: &Arc<MessageFilter>) {
        self.filters.push(Arc::downgrade(filter));
    }

    pub fn has_filters(&self) -> bool {
        !self.filters.is_empty()
    }
}
