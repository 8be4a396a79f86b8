//! Feed registration store: the persistent `id → Feed` map.

mod codec;
mod store;
mod types;

pub use store::{default_store_path, FeedStore, PersistenceError};
pub use types::{feed_id, Feed, FeedType, UnknownFeedType};
