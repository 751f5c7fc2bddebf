use std::collections::BTreeSet;
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use url::Url;

use super::{Enclosure, Feed, LabelKey};

/// Narrow no-break space some feeds put into titles.
static NARROW_NBSP: LazyLock<Regex> = LazyLock::new(|| Regex::new("\u{202F}").expect("valid regex"));
static WHITESPACE_RUNS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s{2,}").expect("valid regex"));
static NEWLINES_AND_LEADING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([\n\r])|(^\s)").expect("valid regex"));

/// One article or mail-like item.
///
/// `id` is 0 until the message has been persisted. Which fields identify a
/// message depends on the owning account's [`SyncPolicy`](crate::account::SyncPolicy).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Message {
    pub id: i64,
    pub custom_id: String,
    pub custom_hash: String,
    pub account_id: i64,
    pub feed_id: String,

    pub title: String,
    pub url: String,
    pub author: String,
    pub contents: String,
    pub raw_contents: String,
    /// `None` when the source supplied an unparseable date.
    pub created: Option<DateTime<Utc>>,
    pub created_from_feed: bool,
    pub score: f64,
    pub enclosures: Vec<Enclosure>,

    pub is_read: bool,
    pub is_important: bool,
    pub is_deleted: bool,
    pub is_pdeleted: bool,

    pub assigned_labels: BTreeSet<LabelKey>,
}

impl Message {
    /// Creation time as stored: milliseconds since the epoch, 0 when unknown.
    pub fn created_millis(&self) -> i64 {
        self.created.map(|dt| dt.timestamp_millis()).unwrap_or(0)
    }

    /// Key used for label associations: custom id, or the stringified row id.
    pub fn label_key(&self) -> String {
        if self.custom_id.is_empty() {
            self.id.to_string()
        } else {
            self.custom_id.clone()
        }
    }

    /// Whether the message can be referenced from the label association table.
    pub fn has_usable_identity(&self) -> bool {
        !self.custom_id.is_empty() || self.id > 0
    }

    /// Normalizes a freshly fetched message. Running it twice changes nothing.
    pub fn sanitize(&mut self, feed: &Feed, fix_future_dates: bool) {
        self.title = sanitize_title(&self.title);

        if let Some(resolved) = resolve_url(&self.url, &feed.source) {
            self.url = resolved;
        }

        let now = Utc::now();
        let needs_fix = match self.created {
            None => self.created_from_feed,
            Some(created) => fix_future_dates && self.created_from_feed && created > now,
        };

        if needs_fix {
            tracing::warn!(
                title = %self.title,
                created = ?self.created,
                "Fixing date of article from invalid date/time"
            );
            self.created = Some(now);
            self.created_from_feed = false;
        }
    }
}

fn sanitize_title(title: &str) -> String {
    let title = NARROW_NBSP.replace_all(title, " ");
    let title = WHITESPACE_RUNS.replace_all(&title, " ");
    NEWLINES_AND_LEADING.replace_all(&title, "").into_owned()
}

/// Resolves protocol-relative and host-relative URLs against the scheme and
/// host of the feed source. Absolute and empty URLs are left alone.
fn resolve_url(url: &str, feed_source: &str) -> Option<String> {
    if url.is_empty() {
        return None;
    }

    match Url::parse(url) {
        Ok(_) => return None,
        Err(url::ParseError::RelativeUrlWithoutBase) => {}
        Err(_) => return None,
    }

    let base = Url::parse(feed_source).ok().and_then(|source| {
        let host = source.host_str()?;
        let root = match source.port() {
            Some(port) => format!("{}://{}:{}/", source.scheme(), host, port),
            None => format!("{}://{}/", source.scheme(), host),
        };
        Url::parse(&root).ok()
    });

    match base {
        Some(base) => base.join(url).ok().map(String::from),
        None if url.starts_with("//") => Some(format!("https:{}", url)),
        None => None,
    }
}
