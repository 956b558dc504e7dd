pub mod cache;
pub mod sqlite;

use crate::app::Result;
use crate::domain::Article;

pub use cache::{CacheEntry, ItemCache};
pub use sqlite::SqliteCacheStore;

/// Durable side of the item cache: one record per source identifier.
pub trait CacheStore: Send + Sync {
    /// Metadata only; the returned entry has no article list.
    fn load_metadata(&self, uri: &str) -> Result<Option<CacheEntry>>;
    fn load_articles(&self, uri: &str) -> Result<Vec<Article>>;
    /// Writes metadata, and the article list when the entry carries one.
    fn save(&self, entry: &CacheEntry) -> Result<()>;
    fn delete(&self, uri: &str) -> Result<()>;
}
