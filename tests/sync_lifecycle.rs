//! Integration tests for full synchronization passes: fetch over HTTP,
//! filter, deduplicate, store, and report.
//!
//! Each test serves its feeds from a wiremock server and stores into its own
//! in-memory SQLite database.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use feedsync::account::{ReadStatus, ServiceAccount};
use feedsync::feed::StandardAccount;
use feedsync::model::{Feed, FeedStatus, LabelRegistry, Message, MessageFilter};
use feedsync::storage::Database;
use feedsync::sync::{
    DownloaderSettings, FeedDownloader, FeedJob, FilterContext, FilterEngine, FilterRegistry,
    FilteringAction, FilteringError, SyncEvent, UpdateLock,
};
use pretty_assertions::assert_eq;
use tokio::sync::mpsc;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const ACCOUNT_ID: i64 = 1;

fn rss(items: &[(&str, &str)]) -> String {
    let items: String = items
        .iter()
        .map(|(guid, title)| {
            format!(
                "<item><guid>{guid}</guid><title>{title}</title>\
                 <link>https://example.com/{guid}</link>\
                 <pubDate>Tue, 14 Nov 2023 10:00:00 GMT</pubDate>\
                 <description>Body of {title}</description></item>"
            )
        })
        .collect();
    format!(r#"<?xml version="1.0"?><rss version="2.0"><channel><title>T</title>{items}</channel></rss>"#)
}

async fn serve(server: &MockServer, route: &str, body: String) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(body)
                .insert_header("Content-Type", "application/rss+xml"),
        )
        .mount(server)
        .await;
}

async fn subscribe(db: &Database, server: &MockServer, route: &str, title: &str) {
    db.insert_feed(ACCOUNT_ID, &format!("{}{}", server.uri(), route), title, None)
        .await
        .unwrap();
}

fn account() -> Arc<dyn ServiceAccount> {
    Arc::new(StandardAccount::new(ACCOUNT_ID, Duration::from_secs(5)).unwrap())
}

async fn jobs(db: &Database, account: &Arc<dyn ServiceAccount>) -> Vec<FeedJob> {
    db.feeds_for_account(ACCOUNT_ID)
        .await
        .unwrap()
        .into_iter()
        .map(|feed| FeedJob::new(account.clone(), feed))
        .collect()
}

fn downloader(db: &Database) -> (FeedDownloader, mpsc::Receiver<SyncEvent>) {
    let (tx, rx) = mpsc::channel(64);
    (
        FeedDownloader::new(db.clone(), DownloaderSettings::default(), UpdateLock::new(), tx),
        rx,
    )
}

fn drain(rx: &mut mpsc::Receiver<SyncEvent>) -> Vec<SyncEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

// ============================================================================
// Orchestration
// ============================================================================

#[tokio::test]
async fn test_broken_feed_does_not_block_siblings() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/missing"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    serve(&server, "/news", rss(&[("a", "Alpha"), ("b", "Beta"), ("b", "Beta")])).await;

    let db = Database::open(":memory:").await.unwrap();
    subscribe(&db, &server, "/missing", "Missing").await;
    subscribe(&db, &server, "/news", "News").await;

    let account = account();
    let (downloader, mut rx) = downloader(&db);
    let results = downloader.update_feeds(jobs(&db, &account).await).await;

    assert_eq!(results.updated_feeds(), &[("News".to_string(), 2)]);

    let events = drain(&mut rx);
    let finished = events
        .iter()
        .filter(|event| matches!(event, SyncEvent::Finished(_)))
        .count();
    assert_eq!(finished, 1);
    assert!(matches!(events.last(), Some(SyncEvent::Finished(_))));

    let progress: Vec<(String, FeedStatus, usize)> = events
        .iter()
        .filter_map(|event| match event {
            SyncEvent::Progress { feed, processed, .. } => {
                Some((feed.title.clone(), feed.status, *processed))
            }
            _ => None,
        })
        .collect();
    assert_eq!(
        progress,
        vec![
            ("Missing".to_string(), FeedStatus::NetworkError, 1),
            ("News".to_string(), FeedStatus::NewMessages, 2),
        ]
    );

    let feeds = db.feeds_for_account(ACCOUNT_ID).await.unwrap();
    assert_eq!(feeds[0].status, FeedStatus::NetworkError);
    assert!(feeds[0].status_message.is_some());
    assert_eq!(feeds[1].status, FeedStatus::NewMessages);
}

#[tokio::test]
async fn test_resync_is_idempotent_and_keeps_local_state() {
    let server = MockServer::start().await;
    serve(&server, "/news", rss(&[("a", "Alpha"), ("b", "Beta")])).await;

    let db = Database::open(":memory:").await.unwrap();
    subscribe(&db, &server, "/news", "News").await;
    let account = account();
    let (downloader, _rx) = downloader(&db);

    downloader.update_feeds(jobs(&db, &account).await).await;

    let feed_id = db.feeds_for_account(ACCOUNT_ID).await.unwrap()[0].custom_id.clone();
    let stored = db.messages_for_feed(&feed_id, ACCOUNT_ID).await.unwrap();
    assert_eq!(stored.len(), 2);
    assert!(stored.iter().all(|message| !message.custom_id.is_empty()));

    let ids: Vec<i64> = stored.iter().map(|message| message.id).collect();
    db.mark_messages_read(&ids, ReadStatus::Read).await.unwrap();

    let results = downloader.update_feeds(jobs(&db, &account).await).await;

    assert!(results.is_empty());
    let stored = db.messages_for_feed(&feed_id, ACCOUNT_ID).await.unwrap();
    assert_eq!(stored.len(), 2);
    assert!(stored.iter().all(|message| message.is_read));
    assert_eq!(db.unread_message_count(ACCOUNT_ID).await.unwrap(), 0);
}

#[tokio::test]
async fn test_changed_title_updates_message_in_place() {
    let server = MockServer::start().await;
    let db = Database::open(":memory:").await.unwrap();
    subscribe(&db, &server, "/news", "News").await;
    let account = account();
    let (downloader, _rx) = downloader(&db);

    serve(&server, "/news", rss(&[("a", "Draft")])).await;
    downloader.update_feeds(jobs(&db, &account).await).await;

    server.reset().await;
    serve(&server, "/news", rss(&[("a", "Final")])).await;
    downloader.update_feeds(jobs(&db, &account).await).await;

    let feed_id = db.feeds_for_account(ACCOUNT_ID).await.unwrap()[0].custom_id.clone();
    let stored = db.messages_for_feed(&feed_id, ACCOUNT_ID).await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].title, "Final");
}

// ============================================================================
// Filters
// ============================================================================

/// Drops messages whose title contains the script text, labels the rest.
struct KeywordEngine;

struct KeywordContext;

impl FilterEngine for KeywordEngine {
    fn create_context(&self, _feed: &Feed, _labels: &LabelRegistry) -> Box<dyn FilterContext + Send> {
        Box::new(KeywordContext)
    }
}

impl FilterContext for KeywordContext {
    fn filter_message(
        &mut self,
        filter: &MessageFilter,
        message: &mut Message,
    ) -> Result<FilteringAction, FilteringError> {
        if message.title.contains(filter.script.as_str()) {
            return Ok(FilteringAction::Purge);
        }
        message.assigned_labels.insert("kept".to_string());
        Ok(FilteringAction::Accept)
    }
}

#[tokio::test]
async fn test_filters_drop_and_label_messages() {
    let server = MockServer::start().await;
    serve(&server, "/news", rss(&[("a", "Sponsored post"), ("b", "Real news")])).await;

    let db = Database::open(":memory:").await.unwrap();
    subscribe(&db, &server, "/news", "News").await;
    db.create_label(ACCOUNT_ID, "kept", "Kept", "#00ff00").await.unwrap();

    let filter = db.add_message_filter("No ads", "Sponsored").await.unwrap();
    let mut feeds = db.feeds_for_account(ACCOUNT_ID).await.unwrap();
    db.assign_message_filter_to_feed(filter.id, &feeds[0].custom_id, ACCOUNT_ID)
        .await
        .unwrap();

    let registry = FilterRegistry::load(&db).await.unwrap();
    let assignments: HashMap<String, Vec<i64>> =
        db.message_filters_in_feeds(ACCOUNT_ID).await.unwrap();
    registry.attach(&mut feeds, &assignments);
    assert!(feeds[0].has_filters());

    let account: Arc<dyn ServiceAccount> = Arc::new(
        StandardAccount::new(ACCOUNT_ID, Duration::from_secs(5))
            .unwrap()
            .with_labels(db.labels_for_account(ACCOUNT_ID).await.unwrap()),
    );
    let (tx, _rx) = mpsc::channel(64);
    let downloader = FeedDownloader::new(db.clone(), DownloaderSettings::default(), UpdateLock::new(), tx)
        .with_filter_engine(Arc::new(KeywordEngine));

    let jobs = feeds
        .into_iter()
        .map(|feed| FeedJob::new(account.clone(), feed))
        .collect();
    let results = downloader.update_feeds(jobs).await;
    assert_eq!(results.updated_feeds(), &[("News".to_string(), 1)]);

    let labels = db.labels_for_account(ACCOUNT_ID).await.unwrap();
    let kept = labels.get("kept").unwrap();
    let labelled = db.messages_with_label(kept).await.unwrap();
    assert_eq!(labelled.len(), 1);
    assert_eq!(labelled[0].title, "Real news");
}
