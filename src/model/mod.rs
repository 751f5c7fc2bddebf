//! Domain types shared by the storage layer and the synchronization pipeline.
//!
//! - [`Message`] - one article with its identity, content and state flags
//! - [`Enclosure`] - media attachment, stored through [`encode_enclosures`]
//! - [`Feed`] / [`FeedStatus`] - a subscription and the outcome of its last pass
//! - [`Label`] / [`LabelRegistry`] - account-owned tags referenced by key
//! - [`MessageFilter`] - a stored user filter script

mod enclosure;
mod feed;
mod filter;
mod label;
mod message;

pub use enclosure::{decode_enclosures, encode_enclosures, Enclosure};
pub use feed::{Feed, FeedStatus};
pub use filter::MessageFilter;
pub use label::{Label, LabelKey, LabelRegistry};
pub use message::Message;
