//! Fetching and parsing of plain RSS/Atom/JSON feeds.
//!
//! - [`fetcher`] - HTTP download with retry, backoff and a body size cap
//! - [`parser`] - `feed-rs` entries converted into [`Message`](crate::model::Message)s
//! - [`StandardAccount`] - the non-syncable [`ServiceAccount`](crate::account::ServiceAccount)
//!   built on the two

mod account;
pub mod fetcher;
pub mod parser;

pub use account::StandardAccount;
pub use fetcher::{build_client, fetch_document, FetchError};
pub use parser::parse_messages;
