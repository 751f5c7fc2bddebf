//! Synchronization pipeline.
//!
//! A run takes a worklist of feeds and pushes each one, strictly in order,
//! through:
//!
//! 1. fetch via the owning [`ServiceAccount`](crate::account::ServiceAccount)
//! 2. [`Message::sanitize`](crate::model::Message::sanitize)
//! 3. [`apply_message_filters`]
//! 4. [`remove_duplicate_messages`]
//! 5. [`Database::update_messages`](crate::storage::Database::update_messages)
//!
//! [`FeedDownloader`] drives the run and reports it through [`SyncEvent`]s.

mod dedup;
mod downloader;
mod filter;
mod lock;
mod results;

pub use dedup::remove_duplicate_messages;
pub use downloader::{DownloaderSettings, FeedDownloader, FeedJob, SyncEvent};
pub use filter::{
    apply_message_filters, FilterContext, FilterEngine, FilterRegistry, FilteringAction,
    FilteringError,
};
pub use lock::UpdateLock;
pub use results::FeedDownloadResults;
