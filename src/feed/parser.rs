use anyhow::Result;
use chrono::Utc;
use feed_rs::model::Entry;
use feed_rs::parser;
use sha2::{Digest, Sha256};

use crate::model::{Enclosure, Message};

/// Parses an RSS, Atom or JSON Feed document into fresh, unpersisted messages.
///
/// Entries without a title keep an empty title; the store refuses to insert
/// those and logs them.
pub fn parse_messages(bytes: &[u8]) -> Result<Vec<Message>> {
    let feed = parser::parse(bytes)?;
    Ok(feed.entries.into_iter().map(entry_to_message).collect())
}

fn entry_to_message(entry: Entry) -> Message {
    let url = entry
        .links
        .first()
        .map(|link| link.href.clone())
        .unwrap_or_default();
    let title = entry.title.map(|t| t.content).unwrap_or_default();
    let author = entry
        .authors
        .iter()
        .map(|person| person.name.trim())
        .filter(|name| !name.is_empty())
        .collect::<Vec<_>>()
        .join(", ");
    let contents = entry
        .content
        .and_then(|c| c.body)
        .or_else(|| entry.summary.map(|s| s.content))
        .unwrap_or_default();

    let (created, created_from_feed) = match entry.published.or(entry.updated) {
        Some(date) => (date, true),
        None => (Utc::now(), false),
    };

    let enclosures = entry
        .media
        .iter()
        .flat_map(|media| media.content.iter())
        .filter_map(|content| {
            let url = content.url.as_ref()?;
            let mime = content
                .content_type
                .as_ref()
                .map(|mime| mime.to_string())
                .unwrap_or_default();
            Some(Enclosure::new(url.as_str(), mime))
        })
        .collect();

    let custom_hash = content_hash(&title, &url, &author);

    Message {
        custom_id: entry.id.trim().to_string(),
        custom_hash,
        title,
        url,
        author,
        contents,
        created: Some(created),
        created_from_feed,
        enclosures,
        ..Default::default()
    }
}

fn content_hash(title: &str, url: &str, author: &str) -> String {
    let input = format!("{}|{}|{}", title, url, author);
    format!("{:x}", Sha256::digest(input.as_bytes()))
}
