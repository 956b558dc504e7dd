use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::app::error::{FeedwatchError, Result};
use crate::config::Config;
use crate::fetcher::http_fetcher::HttpFetcher;
use crate::fetcher::Fetcher;
use crate::store::{ItemCache, SqliteCacheStore};
use crate::subscription::SubscriptionTree;

const CACHE_FILE: &str = "cache.db";
const SUBSCRIPTIONS_FILE: &str = "subscriptions.json";

pub struct AppContext {
    pub config: Config,
    pub tree: SubscriptionTree<SqliteCacheStore>,
    data_dir: PathBuf,
}

impl AppContext {
    pub fn new(config: Config) -> Result<Self> {
        let data_dir = match config.storage.data_dir.clone() {
            Some(p) => p,
            None => Self::default_data_dir()?,
        };
        let fetcher: Arc<dyn Fetcher + Send + Sync> = Arc::new(HttpFetcher::new()?);
        Self::open(config, data_dir, fetcher)
    }

    /// Open the cache and subscription list stored in `data_dir`.
    pub fn open(
        config: Config,
        data_dir: PathBuf,
        fetcher: Arc<dyn Fetcher + Send + Sync>,
    ) -> Result<Self> {
        std::fs::create_dir_all(&data_dir)?;

        let store = Arc::new(SqliteCacheStore::new(data_dir.join(CACHE_FILE))?);
        let cache = ItemCache::new(store).with_sampling(
            config.schedule.sample_window,
            config.schedule.min_samples,
        );
        let settings = config
            .tree_settings()
            .map_err(|e| FeedwatchError::Config(e.to_string()))?;
        let tree = SubscriptionTree::new(cache, fetcher, settings);
        tree.load(&data_dir.join(SUBSCRIPTIONS_FILE))?;

        Ok(Self {
            config,
            tree,
            data_dir,
        })
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn subscriptions_path(&self) -> PathBuf {
        self.data_dir.join(SUBSCRIPTIONS_FILE)
    }

    /// Write the subscription list and every modified cache entry.
    pub fn save(&self) -> Result<()> {
        self.tree.save(&self.subscriptions_path())
    }

    fn default_data_dir() -> Result<PathBuf> {
        let data_dir = dirs::data_dir()
            .ok_or_else(|| FeedwatchError::Config("Could not find data directory".into()))?;
        Ok(data_dir.join("feedwatch"))
    }
}
