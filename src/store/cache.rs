//! In-memory item cache backed by a [`CacheStore`].
//!
//! Entries are hydrated lazily: a miss in memory falls through to the store,
//! and an evicted entry keeps its metadata while its article list lives only
//! on disk until the next full read.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Duration, Utc};

use crate::app::Result;
use crate::domain::{observed_cadence, Article, FeedSnapshot};
use crate::store::CacheStore;

pub const DEFAULT_SAMPLE_WINDOW: usize = 10;
pub const DEFAULT_MIN_SAMPLES: usize = 2;

#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub uri: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub link: Option<String>,
    pub last_checked: Option<DateTime<Utc>>,
    pub article_count: usize,
    pub unread_count: usize,
    /// Observed average gap between publish times.
    pub cadence: Option<Duration>,
    /// `None` while the article list lives only on disk.
    pub articles: Option<Vec<Article>>,
}

impl CacheEntry {
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            title: None,
            description: None,
            link: None,
            last_checked: None,
            article_count: 0,
            unread_count: 0,
            cadence: None,
            articles: Some(Vec::new()),
        }
    }

    pub fn is_hydrated(&self) -> bool {
        self.articles.is_some()
    }

    pub fn display_title(&self) -> &str {
        self.title.as_deref().unwrap_or(&self.uri)
    }

    /// Recompute the counters from the article list, if loaded.
    pub fn recount(&mut self) {
        if let Some(ref articles) = self.articles {
            self.article_count = articles.len();
            self.unread_count = articles.iter().filter(|a| !a.read).count();
        }
    }

    fn metadata(&self) -> CacheEntry {
        CacheEntry {
            articles: None,
            ..self.clone()
        }
    }
}

struct Slot {
    entry: CacheEntry,
    dirty: bool,
}

type SharedSlot = Arc<RwLock<Slot>>;

pub struct ItemCache<S> {
    store: Arc<S>,
    slots: RwLock<HashMap<String, SharedSlot>>,
    sample_window: usize,
    min_samples: usize,
}

impl<S: CacheStore> ItemCache<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            slots: RwLock::new(HashMap::new()),
            sample_window: DEFAULT_SAMPLE_WINDOW,
            min_samples: DEFAULT_MIN_SAMPLES,
        }
    }

    /// Set how many recent articles feed the cadence estimate.
    pub fn with_sampling(mut self, window: usize, min_samples: usize) -> Self {
        self.sample_window = window;
        self.min_samples = min_samples;
        self
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn contains_key(&self, uri: &str) -> Result<bool> {
        Ok(self.slot(uri)?.is_some())
    }

    /// Metadata of an entry without touching its article list.
    pub fn metadata(&self, uri: &str) -> Result<Option<CacheEntry>> {
        Ok(self.slot(uri)?.map(|slot| read(&slot).entry.metadata()))
    }

    /// A fully hydrated copy of an entry.
    pub fn get(&self, uri: &str) -> Result<Option<CacheEntry>> {
        let Some(slot) = self.slot(uri)? else {
            return Ok(None);
        };
        self.hydrate(&slot)?;
        let entry = read(&slot).entry.clone();
        Ok(Some(entry))
    }

    pub fn put(&self, mut entry: CacheEntry) {
        entry.recount();
        let uri = entry.uri.clone();
        let slot = Arc::new(RwLock::new(Slot { entry, dirty: true }));
        self.slots
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(uri, slot);
    }

    /// Merge a fresh snapshot into the entry for its source.
    ///
    /// Articles already known by id keep their stored state. Returns the
    /// snapshot reduced to the newly seen articles.
    pub fn merge(&self, snapshot: &FeedSnapshot) -> Result<FeedSnapshot> {
        let slot = match self.slot(&snapshot.uri)? {
            Some(slot) => {
                self.hydrate(&slot)?;
                slot
            }
            None => self.insert_if_absent(CacheEntry::new(snapshot.uri.clone())),
        };

        let mut guard = write(&slot);
        let entry = &mut guard.entry;
        let known: HashSet<String> = entry
            .articles
            .iter()
            .flatten()
            .map(|a| a.id.clone())
            .collect();
        let fresh: Vec<Article> = snapshot
            .articles
            .iter()
            .filter(|a| !known.contains(&a.id))
            .cloned()
            .collect();

        let mut articles = fresh.clone();
        articles.extend(entry.articles.take().unwrap_or_default());

        if snapshot.title.is_some() {
            entry.title = snapshot.title.clone();
        }
        if snapshot.description.is_some() {
            entry.description = snapshot.description.clone();
        }
        if snapshot.link.is_some() {
            entry.link = snapshot.link.clone();
        }
        entry.last_checked = Some(snapshot.last_checked);
        entry.cadence = observed_cadence(&articles, self.sample_window, self.min_samples);
        entry.articles = Some(articles);
        entry.recount();
        guard.dirty = true;

        Ok(FeedSnapshot {
            articles: fresh,
            ..snapshot_metadata(snapshot)
        })
    }

    /// Set the read flag of one article. Returns whether it was found.
    pub fn set_read(&self, uri: &str, article_id: &str, read_flag: bool) -> Result<bool> {
        let Some(slot) = self.slot(uri)? else {
            return Ok(false);
        };
        self.hydrate(&slot)?;

        let mut guard = write(&slot);
        let found = guard
            .entry
            .articles
            .iter_mut()
            .flatten()
            .find(|a| a.id == article_id)
            .map(|a| a.read = read_flag)
            .is_some();
        if found {
            guard.entry.recount();
            guard.dirty = true;
        }
        Ok(found)
    }

    /// Mark every article read. Returns how many changed.
    pub fn read_all(&self, uri: &str) -> Result<usize> {
        let Some(slot) = self.slot(uri)? else {
            return Ok(0);
        };
        self.hydrate(&slot)?;

        let mut guard = write(&slot);
        let mut changed = 0;
        for article in guard.entry.articles.iter_mut().flatten() {
            if !article.read {
                article.read = true;
                changed += 1;
            }
        }
        if changed > 0 {
            guard.entry.recount();
            guard.dirty = true;
        }
        Ok(changed)
    }

    /// Persist the entry, then release its article list from memory.
    ///
    /// The list is kept when persisting fails.
    pub fn evict_to_disk(&self, uri: &str) -> Result<bool> {
        let slot = match self.loaded(uri) {
            Some(slot) => slot,
            None => return Ok(false),
        };

        let mut guard = write(&slot);
        if !guard.entry.is_hydrated() {
            return Ok(false);
        }
        self.store.save(&guard.entry)?;
        guard.entry.articles = None;
        guard.dirty = false;
        tracing::debug!(uri, "Evicted cached articles to disk");
        Ok(true)
    }

    /// Drop cached articles and counters while keeping the entry itself.
    pub fn reset(&self, uri: &str) -> Result<()> {
        self.store.delete(uri)?;
        let slot = self.slot(uri)?;
        let mut entry = CacheEntry::new(uri);
        if let Some(slot) = slot {
            let previous = read(&slot).entry.metadata();
            entry.title = previous.title;
            entry.description = previous.description;
            entry.link = previous.link;
        }
        self.put(entry);
        Ok(())
    }

    /// Forget an entry in memory and on disk. Returns whether it existed.
    pub fn remove(&self, uri: &str) -> Result<bool> {
        let in_memory = self
            .slots
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(uri)
            .is_some();
        let on_disk = self.store.load_metadata(uri)?.is_some();
        if on_disk {
            self.store.delete(uri)?;
        }
        Ok(in_memory || on_disk)
    }

    /// Persist every modified entry. Failures are logged and skipped.
    pub fn save_all(&self) -> usize {
        let slots: Vec<SharedSlot> = self
            .slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();

        let mut saved = 0;
        for slot in slots {
            let mut guard = write(&slot);
            if !guard.dirty {
                continue;
            }
            match self.store.save(&guard.entry) {
                Ok(()) => {
                    guard.dirty = false;
                    saved += 1;
                }
                Err(e) => tracing::error!(uri = %guard.entry.uri, error = %e, "Failed to save cache entry"),
            }
        }
        saved
    }

    /// Source identifiers currently held in memory.
    pub fn loaded_uris(&self) -> Vec<String> {
        self.slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    fn loaded(&self, uri: &str) -> Option<SharedSlot> {
        self.slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(uri)
            .cloned()
    }

    fn slot(&self, uri: &str) -> Result<Option<SharedSlot>> {
        if let Some(slot) = self.loaded(uri) {
            return Ok(Some(slot));
        }
        match self.store.load_metadata(uri)? {
            Some(entry) => Ok(Some(self.insert_if_absent(entry))),
            None => Ok(None),
        }
    }

    fn insert_if_absent(&self, entry: CacheEntry) -> SharedSlot {
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        slots
            .entry(entry.uri.clone())
            .or_insert_with(|| Arc::new(RwLock::new(Slot { entry, dirty: false })))
            .clone()
    }

    fn hydrate(&self, slot: &SharedSlot) -> Result<()> {
        if read(slot).entry.is_hydrated() {
            return Ok(());
        }
        let mut guard = write(slot);
        if !guard.entry.is_hydrated() {
            let articles = self.store.load_articles(&guard.entry.uri)?;
            tracing::debug!(uri = %guard.entry.uri, count = articles.len(), "Rehydrated cached articles");
            guard.entry.articles = Some(articles);
            guard.entry.recount();
        }
        Ok(())
    }
}

fn read(slot: &SharedSlot) -> std::sync::RwLockReadGuard<'_, Slot> {
    slot.read().unwrap_or_else(PoisonError::into_inner)
}

fn write(slot: &SharedSlot) -> std::sync::RwLockWriteGuard<'_, Slot> {
    slot.write().unwrap_or_else(PoisonError::into_inner)
}

fn snapshot_metadata(snapshot: &FeedSnapshot) -> FeedSnapshot {
    FeedSnapshot {
        uri: snapshot.uri.clone(),
        title: snapshot.title.clone(),
        description: snapshot.description.clone(),
        link: snapshot.link.clone(),
        articles: Vec::new(),
        last_checked: snapshot.last_checked,
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::normalizer::generic::GenericFeedConverter;
    use crate::normalizer::ContentConverter;
    use crate::store::SqliteCacheStore;

    const URI: &str = "http://example.test/rss";

    fn cache() -> ItemCache<SqliteCacheStore> {
        ItemCache::new(Arc::new(SqliteCacheStore::in_memory().unwrap()))
    }

    fn snapshot(ids: &[&str]) -> FeedSnapshot {
        let mut snapshot = FeedSnapshot::new(URI);
        snapshot.title = Some("Example".into());
        // "a" is published on Jan 1st, "b" on the 2nd and so on
        snapshot.articles = ids
            .iter()
            .map(|id| {
                let day = 1 + (id.as_bytes()[0] - b'a') as u32;
                let mut article = Article::new(*id);
                article.published_at = Some(Utc.with_ymd_and_hms(2024, 1, day, 0, 0, 0).unwrap());
                article
            })
            .collect();
        snapshot
    }

    #[test]
    fn test_merge_reports_only_new_articles() {
        let cache = cache();
        let first = cache.merge(&snapshot(&["a", "b"])).unwrap();
        assert_eq!(first.articles.len(), 2);

        let second = cache.merge(&snapshot(&["c", "a", "b"])).unwrap();
        let ids: Vec<&str> = second.articles.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, vec!["c"]);

        let entry = cache.get(URI).unwrap().unwrap();
        assert_eq!(entry.article_count, 3);
        assert_eq!(entry.unread_count, 3);
        assert_eq!(entry.articles.unwrap()[0].id, "c");
        assert_eq!(entry.cadence, Some(Duration::days(1)));
    }

    #[test]
    fn test_repeated_polls_of_unidentifiable_entry_add_nothing() {
        let cache = cache();
        let body = br#"<?xml version="1.0"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title>Anonymous</title>
  <entry><summary>only a summary</summary></entry>
</feed>"#;

        for _ in 0..3 {
            let snapshot = GenericFeedConverter.convert(URI, body).unwrap();
            assert!(cache.merge(&snapshot).unwrap().articles.is_empty());
        }
        let cached = cache.metadata(URI).unwrap().map_or(0, |m| m.article_count);
        assert_eq!(cached, 0);
    }

    #[test]
    fn test_merge_keeps_read_state() {
        let cache = cache();
        cache.merge(&snapshot(&["a", "b"])).unwrap();
        assert!(cache.set_read(URI, "a", true).unwrap());

        cache.merge(&snapshot(&["a", "b"])).unwrap();
        let entry = cache.get(URI).unwrap().unwrap();
        assert_eq!(entry.unread_count, 1);
        assert!(entry.articles.unwrap().iter().any(|a| a.id == "a" && a.read));
    }

    #[test]
    fn test_evict_keeps_metadata_and_rehydrates() {
        let cache = cache();
        cache.merge(&snapshot(&["a", "b"])).unwrap();
        cache.read_all(URI).unwrap();

        assert!(cache.evict_to_disk(URI).unwrap());
        let meta = cache.metadata(URI).unwrap().unwrap();
        assert!(!meta.is_hydrated());
        assert_eq!(meta.title, Some("Example".into()));
        assert_eq!(meta.article_count, 2);
        assert_eq!(meta.unread_count, 0);

        let entry = cache.get(URI).unwrap().unwrap();
        let articles = entry.articles.unwrap();
        assert_eq!(articles.len(), 2);
        assert!(articles.iter().all(|a| a.read));
    }

    #[test]
    fn test_miss_in_memory_hits_disk() {
        let store = Arc::new(SqliteCacheStore::in_memory().unwrap());
        {
            let cache = ItemCache::new(store.clone());
            cache.merge(&snapshot(&["a"])).unwrap();
            assert_eq!(cache.save_all(), 1);
            assert_eq!(cache.save_all(), 0);
        }

        let cache = ItemCache::new(store);
        assert!(cache.loaded_uris().is_empty());
        assert!(cache.contains_key(URI).unwrap());
        let entry = cache.get(URI).unwrap().unwrap();
        assert_eq!(entry.articles.unwrap()[0].id, "a");
    }

    #[test]
    fn test_reset_clears_articles_and_counters() {
        let cache = cache();
        cache.merge(&snapshot(&["a", "b"])).unwrap();
        cache.save_all();

        cache.reset(URI).unwrap();
        let entry = cache.get(URI).unwrap().unwrap();
        assert_eq!(entry.title, Some("Example".into()));
        assert_eq!(entry.article_count, 0);
        assert_eq!(entry.unread_count, 0);
        assert_eq!(entry.last_checked, None);
        assert!(entry.articles.unwrap().is_empty());
        assert!(cache.store().load_articles(URI).unwrap().is_empty());
    }

    #[test]
    fn test_remove_is_idempotent() {
        let cache = cache();
        cache.merge(&snapshot(&["a"])).unwrap();
        cache.save_all();

        assert!(cache.remove(URI).unwrap());
        assert!(!cache.remove(URI).unwrap());
        assert!(!cache.contains_key(URI).unwrap());
    }

    #[test]
    fn test_set_read_unknown_article() {
        let cache = cache();
        cache.merge(&snapshot(&["a"])).unwrap();
        assert!(!cache.set_read(URI, "zzz", true).unwrap());
        assert!(!cache.set_read("http://missing.test/rss", "a", true).unwrap());
    }

    #[test]
    fn test_evict_unknown_is_noop() {
        let cache = cache();
        assert!(!cache.evict_to_disk(URI).unwrap());
    }
}
