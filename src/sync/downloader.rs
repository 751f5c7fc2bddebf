use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tokio::sync::mpsc;

use super::dedup::remove_duplicate_messages;
use super::filter::{apply_message_filters, FilterEngine};
use super::lock::UpdateLock;
use super::results::FeedDownloadResults;
use crate::account::{
    AccountStatedMessages, BagOfMessages, ServiceAccount, StatedMessages, TaggedMessages,
};
use crate::feed::FetchError;
use crate::model::{Feed, FeedStatus};
use crate::storage::{Database, UpdateCounts, UpsertOptions};

/// Knobs of one downloader instance.
#[derive(Debug, Clone, Copy)]
pub struct DownloaderSettings {
    /// Replace feed-provided creation dates that lie in the future.
    pub fix_future_dates: bool,
    /// Upper bound for fetching one feed.
    pub feed_fetch_timeout: Duration,
    pub upsert: UpsertOptions,
}

impl Default for DownloaderSettings {
    fn default() -> Self {
        Self {
            fix_future_dates: false,
            feed_fetch_timeout: Duration::from_secs(30),
            upsert: UpsertOptions::default(),
        }
    }
}

/// One worklist entry.
#[derive(Clone)]
pub struct FeedJob {
    pub account: Arc<dyn ServiceAccount>,
    pub feed: Feed,
}

impl FeedJob {
    pub fn new(account: Arc<dyn ServiceAccount>, feed: Feed) -> Self {
        Self { account, feed }
    }
}

/// Lifecycle notifications of a run, in emission order.
#[derive(Debug, Clone)]
pub enum SyncEvent {
    Started,
    Progress {
        feed: Feed,
        processed: usize,
        total: usize,
    },
    /// Emitted exactly once per run, after the last progress event.
    Finished(FeedDownloadResults),
}

/// Pre-fetch snapshots of every account touched by a run.
#[derive(Default)]
struct RunContext {
    stated: HashMap<i64, AccountStatedMessages>,
    tagged: HashMap<i64, TaggedMessages>,
}

struct Inner {
    db: Database,
    settings: DownloaderSettings,
    filter_engine: Option<Arc<dyn FilterEngine>>,
    update_lock: UpdateLock,
    events: mpsc::Sender<SyncEvent>,
    worklist: Mutex<VecDeque<FeedJob>>,
    processed: AtomicUsize,
    total: AtomicUsize,
    stop_cache_synchronization: AtomicBool,
    cache_synchronization_running: AtomicBool,
}

/// Runs synchronization passes over a worklist of feeds.
///
/// Feeds are processed one at a time in worklist order. Each goes through
/// fetch, sanitization, filtering, deduplication and the upsert engine; the
/// outcome ends up in the feed's status. No per-feed failure ends a run
/// early. Only [`FeedDownloader::stop_running_update`] does.
///
/// Cloning is cheap and every clone drives the same state, so a handle can be
/// kept around to cancel a run spawned elsewhere.
#[derive(Clone)]
pub struct FeedDownloader {
    inner: Arc<Inner>,
}

impl FeedDownloader {
    pub fn new(
        db: Database,
        settings: DownloaderSettings,
        update_lock: UpdateLock,
        events: mpsc::Sender<SyncEvent>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                db,
                settings,
                filter_engine: None,
                update_lock,
                events,
                worklist: Mutex::new(VecDeque::new()),
                processed: AtomicUsize::new(0),
                total: AtomicUsize::new(0),
                stop_cache_synchronization: AtomicBool::new(false),
                cache_synchronization_running: AtomicBool::new(false),
            }),
        }
    }

    /// Sets the script runtime for message filters. Must be called before the
    /// handle is cloned.
    pub fn with_filter_engine(mut self, engine: Arc<dyn FilterEngine>) -> Self {
        match Arc::get_mut(&mut self.inner) {
            Some(inner) => inner.filter_engine = Some(engine),
            None => tracing::warn!("Downloader is already shared, filter engine not installed"),
        }
        self
    }

    /// `true` while feeds are still queued.
    pub fn is_update_running(&self) -> bool {
        !self.worklist().is_empty()
    }

    pub fn is_cache_synchronization_running(&self) -> bool {
        self.inner.cache_synchronization_running.load(Ordering::SeqCst)
    }

    /// Drops the queued feeds; the feed being processed right now completes.
    /// Also aborts a running cache flush at the next account boundary.
    pub fn stop_running_update(&self) {
        self.inner
            .stop_cache_synchronization
            .store(true, Ordering::SeqCst);

        let dropped = {
            let mut worklist = self.worklist();
            let dropped = worklist.len();
            worklist.clear();
            dropped
        };

        self.inner.processed.store(0, Ordering::SeqCst);
        self.inner.total.store(0, Ordering::SeqCst);
        tracing::info!(dropped, "Stopping running feed update");
    }

    /// Pushes locally cached state changes of the accounts back to their
    /// services, best effort.
    pub async fn synchronize_account_caches(&self, accounts: &[Arc<dyn ServiceAccount>]) {
        self.inner
            .cache_synchronization_running
            .store(true, Ordering::SeqCst);

        for account in accounts.iter().filter(|account| account.has_cache()) {
            tracing::debug!(account = account.account_id(), "Synchronizing cache back to server");

            if let Err(e) = account.save_all_cached_data().await {
                tracing::warn!(account = account.account_id(), error = %e, "Failed to synchronize account cache");
            }

            if self
                .inner
                .stop_cache_synchronization
                .swap(false, Ordering::SeqCst)
            {
                tracing::warn!("Aborting cache synchronization");
                break;
            }
        }

        self.inner
            .cache_synchronization_running
            .store(false, Ordering::SeqCst);
        tracing::debug!("All caches synchronized");
    }

    /// Runs one synchronization pass over `jobs` and returns its results,
    /// which are also published in [`SyncEvent::Finished`].
    ///
    /// Callers must not start a second pass while one is running.
    pub async fn update_feeds(&self, jobs: Vec<FeedJob>) -> FeedDownloadResults {
        let _update_guard = self.inner.update_lock.lock_for_update().await;
        let mut results = FeedDownloadResults::default();

        if jobs.is_empty() {
            tracing::debug!("No feeds to update, aborting update");
            return self.finalize_update(results).await;
        }

        tracing::info!(feeds = jobs.len(), "Starting feed update");
        {
            let mut worklist = self.worklist();
            worklist.clear();
            worklist.extend(jobs.iter().cloned());
        }
        self.inner.total.store(jobs.len(), Ordering::SeqCst);
        self.inner.processed.store(0, Ordering::SeqCst);
        self.emit(SyncEvent::Started).await;

        let accounts = distinct_accounts(&jobs);
        self.synchronize_account_caches(&accounts).await;
        let context = self.prepare_accounts(&accounts, &jobs).await;

        let no_stated = StatedMessages::new();
        let no_tagged = TaggedMessages::new();

        loop {
            let Some(job) = self.worklist().pop_front() else {
                break;
            };

            let account_id = job.account.account_id();
            let stated = context
                .stated
                .get(&account_id)
                .and_then(|per_feed| per_feed.get(&job.feed.custom_id))
                .unwrap_or(&no_stated);
            let tagged = context.tagged.get(&account_id).unwrap_or(&no_tagged);

            let feed = self.update_one_feed(job, stated, tagged, &mut results).await;

            let processed = self.inner.processed.fetch_add(1, Ordering::SeqCst) + 1;
            let total = self.inner.total.load(Ordering::SeqCst);
            self.emit(SyncEvent::Progress {
                feed,
                processed,
                total,
            })
            .await;
        }

        self.finalize_update(results).await
    }

    /// Loads pre-fetch snapshots and fires the "beginning fetch" hook of
    /// every account.
    async fn prepare_accounts(
        &self,
        accounts: &[Arc<dyn ServiceAccount>],
        jobs: &[FeedJob],
    ) -> RunContext {
        let mut context = RunContext::default();

        for account in accounts {
            let account_id = account.account_id();
            let feeds: Vec<Feed> = jobs
                .iter()
                .filter(|job| job.account.account_id() == account_id)
                .map(|job| job.feed.clone())
                .collect();

            if account.wants_bagged_ids_of_existing_messages() {
                let tagged = match self.inner.db.bags_of_messages(&account.labels()).await {
                    Ok(tagged) => tagged,
                    Err(e) => {
                        tracing::warn!(account = account_id, error = %e, "Failed to load tagged messages");
                        TaggedMessages::new()
                    }
                };

                let mut per_feed = AccountStatedMessages::with_capacity(feeds.len());
                for feed in &feeds {
                    per_feed.insert(feed.custom_id.clone(), self.stated_messages(feed).await);
                }

                context.stated.insert(account_id, per_feed);
                context.tagged.insert(account_id, tagged);
            }

            let stated = context.stated.remove(&account_id).unwrap_or_default();
            let tagged = context.tagged.remove(&account_id).unwrap_or_default();
            account
                .about_to_begin_feed_fetching(&feeds, &stated, &tagged)
                .await;
            context.stated.insert(account_id, stated);
            context.tagged.insert(account_id, tagged);
        }

        context
    }

    async fn stated_messages(&self, feed: &Feed) -> StatedMessages {
        let mut stated = StatedMessages::with_capacity(3);

        for bag in [BagOfMessages::Read, BagOfMessages::Unread, BagOfMessages::Starred] {
            let ids = match self.inner.db.bag_of_messages(bag, feed).await {
                Ok(ids) => ids,
                Err(e) => {
                    tracing::warn!(feed = %feed.custom_id, ?bag, error = %e, "Failed to load bag of messages");
                    Vec::new()
                }
            };
            stated.insert(bag, ids);
        }

        stated
    }

    /// Processes one feed and returns it with its new status.
    async fn update_one_feed(
        &self,
        job: FeedJob,
        stated: &StatedMessages,
        tagged: &TaggedMessages,
        results: &mut FeedDownloadResults,
    ) -> Feed {
        let FeedJob { account, mut feed } = job;
        let started = Instant::now();

        tracing::debug!(
            feed = %feed.custom_id,
            source = %feed.source,
            title = %feed.title,
            "Downloading new messages"
        );

        match self
            .download_and_store(account.as_ref(), &feed, stated, tagged)
            .await
        {
            Ok(counts) => {
                if feed.status != FeedStatus::NewMessages {
                    let status = if counts.is_empty() {
                        FeedStatus::Normal
                    } else {
                        FeedStatus::NewMessages
                    };
                    feed.set_status(status, None);
                }

                if counts.unread > 0 {
                    results.append_updated_feed(feed.title.clone(), counts.unread);
                }

                tracing::debug!(
                    feed = %feed.custom_id,
                    unread = counts.unread,
                    total = counts.total,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Updated feed"
                );
            }
            Err(e) => {
                tracing::error!(feed = %feed.custom_id, error = %e, "Feed update failed");
                feed.set_status(e.feed_status(), Some(e.to_string()));
            }
        }

        if let Err(e) = self.inner.db.set_feed_status(&feed).await {
            tracing::warn!(feed = %feed.custom_id, error = %e, "Failed to store feed status");
        }

        account.item_changed(std::slice::from_ref(&feed));
        feed
    }

    async fn download_and_store(
        &self,
        account: &dyn ServiceAccount,
        feed: &Feed,
        stated: &StatedMessages,
        tagged: &TaggedMessages,
    ) -> Result<UpdateCounts, FetchError> {
        let settings = &self.inner.settings;

        let mut messages = tokio::time::timeout(
            settings.feed_fetch_timeout,
            account.obtain_new_messages(feed, stated, tagged),
        )
        .await
        .map_err(|_| FetchError::Timeout)??;

        tracing::debug!(feed = %feed.custom_id, count = messages.len(), "Downloaded messages");

        for message in &mut messages {
            message.account_id = account.account_id();
            if message.feed_id.is_empty() {
                message.feed_id = feed.custom_id.clone();
            }
            message.sanitize(feed, settings.fix_future_dates);
        }

        if feed.has_filters() {
            match &self.inner.filter_engine {
                Some(engine) => {
                    apply_message_filters(account, &self.inner.db, engine.as_ref(), feed, &mut messages)
                        .await
                }
                None => tracing::warn!(
                    feed = %feed.custom_id,
                    "Feed has message filters but no filter engine is installed, skipping filtering"
                ),
            }
        }

        remove_duplicate_messages(&mut messages);

        self.inner
            .db
            .update_messages(&mut messages, feed, account.policy(), false, &settings.upsert)
            .await
            .map_err(|e| FetchError::Application(e.to_string()))
    }

    async fn finalize_update(&self, mut results: FeedDownloadResults) -> FeedDownloadResults {
        tracing::info!(updated = results.updated_feeds().len(), "Finished feed updates");

        results.sort();
        self.worklist().clear();
        self.inner.processed.store(0, Ordering::SeqCst);
        self.inner.total.store(0, Ordering::SeqCst);

        self.emit(SyncEvent::Finished(results.clone())).await;
        results
    }

    async fn emit(&self, event: SyncEvent) {
        if let Err(e) = self.inner.events.send(event).await {
            tracing::warn!(error = %e, "Sync event channel send failed (receiver dropped)");
        }
    }

    fn worklist(&self) -> MutexGuard<'_, VecDeque<FeedJob>> {
        self.inner
            .worklist
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Owning accounts of the jobs, in first-seen order.
fn distinct_accounts(jobs: &[FeedJob]) -> Vec<Arc<dyn ServiceAccount>> {
    let mut accounts: Vec<Arc<dyn ServiceAccount>> = Vec::new();
    for job in jobs {
        if !accounts
            .iter()
            .any(|account| account.account_id() == job.account.account_id())
        {
            accounts.push(job.account.clone());
        }
    }
    accounts
}
