//! Feed synchronization and message reconciliation.
//!
//! - [`model`] - messages, feeds, labels and filter definitions
//! - [`account`] - the [`ServiceAccount`](account::ServiceAccount) abstraction and sync policies
//! - [`feed`] - HTTP fetching and parsing for plain RSS/Atom/JSON feeds
//! - [`storage`] - the SQLite message store and the upsert engine
//! - [`sync`] - the per-run pipeline and its orchestrator
//! - [`config`] - TOML configuration

pub mod account;
pub mod config;
pub mod feed;
pub mod model;
pub mod storage;
pub mod sync;
