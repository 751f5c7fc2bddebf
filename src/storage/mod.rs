mod feeds;
mod filters;
mod identity;
mod labels;
mod messages;
mod schema;
mod types;
mod upsert;

pub use identity::ExistingMessage;
pub use messages::MessageCounts;
pub use schema::Database;
pub use types::DatabaseError;
pub use upsert::{UpdateCounts, UpsertOptions};
