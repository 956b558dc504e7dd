//! The subscription tree.
//!
//! [`SubscriptionTree`] owns the category/entry hierarchy, the item cache and
//! the High and Low feed monitors. Every structural change is serialized
//! through one lock, announced as [`SubscriptionEvent::CollectionChanged`]
//! and queued for a debounced save.

pub mod autosave;
pub mod persist;
pub mod schedule;

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::app::{FeedwatchError, Result};
use crate::domain::node::{
    children_mut, collect_entries, find_entry_mut, node_at, remove_at, remove_entry,
};
use crate::domain::{Article, Category, CheckFrequency, Entry, FeedSnapshot, SubscriptionNode};
use crate::fetcher::{Fetcher, RequestOptions};
use crate::monitor::{FeedMonitor, PollOutcome, Subscription, TierSettings, TimerState};
use crate::normalizer::Classified;
use crate::store::{CacheEntry, CacheStore, ItemCache};

pub use autosave::{spawn_autosaver, AutoSaverHandle};
pub use schedule::{SchedulePolicy, Tier, Tiers};

const EVENT_CAPACITY: usize = 256;

/// Everything needed to build the two tiers.
#[derive(Debug, Clone)]
pub struct TreeSettings {
    pub high: TierSettings,
    pub low: TierSettings,
    pub high_initial_delay: Duration,
    pub low_initial_delay: Duration,
    pub policy: SchedulePolicy,
    pub request: RequestOptions,
}

impl Default for TreeSettings {
    fn default() -> Self {
        Self {
            high: TierSettings::default(),
            low: TierSettings {
                interval: Duration::from_secs(86400),
                ..TierSettings::default()
            },
            high_initial_delay: Duration::from_secs(3),
            low_initial_delay: Duration::from_secs(60),
            policy: SchedulePolicy::default(),
            request: RequestOptions::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub enum SubscriptionEvent {
    /// A poll succeeded; `feed` holds the articles not seen before.
    Received { uri: String, feed: Arc<FeedSnapshot> },
    CollectionChanged,
}

#[derive(Default)]
struct TreeState {
    roots: Vec<SubscriptionNode>,
    selected: Option<String>,
}

impl TreeState {
    fn contains(&self, uri: &str) -> bool {
        self.entries().iter().any(|e| e.uri == uri)
    }

    fn entries(&self) -> Vec<&Entry> {
        let mut out = Vec::new();
        collect_entries(&self.roots, &mut out);
        out
    }
}

struct TreeInner<S> {
    state: Mutex<TreeState>,
    cache: ItemCache<S>,
    tiers: Tiers,
    policy: SchedulePolicy,
    high_initial_delay: Duration,
    low_initial_delay: Duration,
    events: broadcast::Sender<SubscriptionEvent>,
    autosave: Mutex<Option<AutoSaverHandle>>,
}

impl<S: CacheStore + 'static> TreeInner<S> {
    fn state(&self) -> MutexGuard<'_, TreeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn on_received(&self, uri: &str, snapshot: &FeedSnapshot) -> Result<()> {
        let fresh = {
            let mut state = self.state();
            let Some(entry) = find_entry_mut(&mut state.roots, uri) else {
                debug!(uri, "Dropping result for removed entry");
                return Ok(());
            };
            let fresh = self.cache.merge(snapshot)?;
            entry.last_checked = Some(snapshot.last_checked);
            if entry.title == entry.uri {
                if let Some(title) = &snapshot.title {
                    entry.title = title.clone();
                }
            }
            let (frequency, last_checked) = (entry.frequency, entry.last_checked);
            self.reschedule_entry(uri, frequency, last_checked)?;
            fresh
        };

        info!(uri, new = fresh.articles.len(), "Received feed");
        self.request_save();
        let _ = self.events.send(SubscriptionEvent::Received {
            uri: uri.to_string(),
            feed: Arc::new(fresh),
        });
        Ok(())
    }

    fn reschedule_entry(
        &self,
        uri: &str,
        frequency: CheckFrequency,
        last_checked: Option<DateTime<Utc>>,
    ) -> Result<bool> {
        let cadence = self.cache.metadata(uri)?.and_then(|m| m.cadence);
        let target = self.policy.classify(frequency, cadence);
        Ok(self.tiers.assign(uri, target, last_checked))
    }

    /// Drop every trace of the given entries outside the tree itself.
    fn release(&self, uris: &[String]) {
        for uri in uris {
            self.tiers.remove(uri);
            if let Err(e) = self.cache.remove(uri) {
                error!(uri, error = %e, "Failed to remove cache entry");
            }
        }
    }

    fn request_save(&self) {
        if let Some(handle) = self
            .autosave
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
        {
            handle.request();
        }
    }

    fn changed(&self) {
        self.request_save();
        let _ = self.events.send(SubscriptionEvent::CollectionChanged);
    }

    fn save_to(&self, path: &Path) -> Result<()> {
        let roots = self.state().roots.clone();
        persist::save(&roots, path)?;
        let saved = self.cache.save_all();
        debug!(path = %path.display(), cache_entries = saved, "Saved subscriptions");
        Ok(())
    }
}

pub struct SubscriptionTree<S: CacheStore + 'static> {
    inner: Arc<TreeInner<S>>,
    autosave_task: Mutex<Option<JoinHandle<()>>>,
    _subscriptions: Vec<Subscription>,
}

impl<S: CacheStore + 'static> SubscriptionTree<S> {
    pub fn new(
        cache: ItemCache<S>,
        fetcher: Arc<dyn Fetcher + Send + Sync>,
        settings: TreeSettings,
    ) -> Self {
        let high = FeedMonitor::new(fetcher.clone(), settings.high);
        let low = FeedMonitor::new(fetcher, settings.low);
        for monitor in [&high, &low] {
            monitor.set_timeout(settings.request.timeout);
            monitor.set_user_agent(settings.request.user_agent.clone());
        }

        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let inner = Arc::new(TreeInner {
            state: Mutex::new(TreeState::default()),
            cache,
            tiers: Tiers::new(high, low),
            policy: settings.policy,
            high_initial_delay: settings.high_initial_delay,
            low_initial_delay: settings.low_initial_delay,
            events,
            autosave: Mutex::new(None),
        });

        let subscriptions = inner
            .tiers
            .iter()
            .map(|(_, monitor)| {
                let tree: Weak<TreeInner<S>> = Arc::downgrade(&inner);
                monitor.subscribe(move |uri, snapshot| match tree.upgrade() {
                    Some(tree) => Ok(tree.on_received(uri, snapshot)?),
                    None => Ok(()),
                })
            })
            .collect();

        Self {
            inner,
            autosave_task: Mutex::new(None),
            _subscriptions: subscriptions,
        }
    }

    pub fn events(&self) -> broadcast::Receiver<SubscriptionEvent> {
        self.inner.events.subscribe()
    }

    pub fn cache(&self) -> &ItemCache<S> {
        &self.inner.cache
    }

    pub fn tiers(&self) -> &Tiers {
        &self.inner.tiers
    }

    pub fn tier_of(&self, uri: &str) -> Option<Tier> {
        self.inner.tiers.tier_of(uri)
    }

    /// Save to `path` whenever the tree changes, at most once per `window`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn autosave_to(&self, path: impl Into<PathBuf>, window: Duration) -> Result<()> {
        tokio::runtime::Handle::try_current()
            .map_err(|e| FeedwatchError::Other(format!("Cannot start autosave: {e}")))?;

        let path = path.into();
        let tree = Arc::downgrade(&self.inner);
        let (handle, task) = spawn_autosaver(window, move || {
            if let Some(tree) = tree.upgrade() {
                if let Err(e) = tree.save_to(&path) {
                    error!(path = %path.display(), error = %e, "Failed to save subscriptions");
                }
            }
        });

        let previous = self
            .inner
            .autosave
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(handle);
        if let Some(previous) = previous {
            previous.shutdown();
        }
        *self
            .autosave_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(task);
        Ok(())
    }

    /// Subscribe to a new source after checking that it serves a feed.
    pub async fn register_new_source(&self, uri: &str) -> Result<Entry> {
        url::Url::parse(uri)?;
        if self.contains(uri) {
            return Err(FeedwatchError::AlreadyExists(uri.to_string()));
        }

        let snapshot = match self.inner.tiers.get(Tier::High).fetch(uri).await {
            Ok(Classified::Value(snapshot)) => snapshot,
            Ok(other) => {
                warn!(uri, outcome = ?other.status(), "Source did not return a feed");
                return Err(FeedwatchError::NotFound(uri.to_string()));
            }
            Err(e) => {
                warn!(uri, error = %e, "Source is unreachable");
                return Err(FeedwatchError::NotFound(uri.to_string()));
            }
        };

        let entry = {
            let mut state = self.inner.state();
            if state.contains(uri) {
                return Err(FeedwatchError::AlreadyExists(uri.to_string()));
            }
            let mut entry = Entry::new(uri);
            entry.title = snapshot.display_title().to_string();
            entry.last_checked = Some(snapshot.last_checked);
            state.roots.push(SubscriptionNode::Entry(entry.clone()));

            self.inner.cache.merge(&snapshot)?;
            self.inner
                .reschedule_entry(uri, entry.frequency, entry.last_checked)?;
            entry
        };

        info!(uri, articles = snapshot.articles.len(), tier = ?self.tier_of(uri), "Registered source");
        self.inner.changed();
        Ok(entry)
    }

    /// Append nodes to the root list.
    pub fn add(&self, nodes: Vec<SubscriptionNode>) -> Result<usize> {
        self.add_to(&[], nodes)
    }

    /// Append nodes to the category at `parent`. Entries whose source is
    /// already subscribed are skipped. Returns how many entries were added.
    pub fn add_to(&self, parent: &[usize], mut nodes: Vec<SubscriptionNode>) -> Result<usize> {
        let added = {
            let mut state = self.inner.state();
            let mut seen: HashSet<String> = state.entries().iter().map(|e| e.uri.clone()).collect();
            drop_duplicates(&mut nodes, &mut seen);

            let mut added = Vec::new();
            collect_entries(&nodes, &mut added);
            let added: Vec<Entry> = added.into_iter().cloned().collect();

            children_mut(&mut state.roots, parent)
                .ok_or_else(|| FeedwatchError::NoSuchNode(format!("{parent:?}")))?
                .extend(nodes);

            for entry in &added {
                if !self.inner.cache.contains_key(&entry.uri)? {
                    let mut cached = CacheEntry::new(entry.uri.clone());
                    cached.last_checked = entry.last_checked;
                    self.inner.cache.put(cached);
                }
                self.inner
                    .reschedule_entry(&entry.uri, entry.frequency, entry.last_checked)?;
            }
            added.len()
        };

        self.inner.changed();
        Ok(added)
    }

    /// Unsubscribe a source. Removing an unknown source is a no-op.
    pub fn remove_entry(&self, uri: &str) -> Result<bool> {
        {
            let mut state = self.inner.state();
            if remove_entry(&mut state.roots, uri).is_none() {
                return Ok(false);
            }
            if state.selected.as_deref() == Some(uri) {
                state.selected = None;
            }
            self.inner.release(&[uri.to_string()]);
        }
        info!(uri, "Removed source");
        self.inner.changed();
        Ok(true)
    }

    /// Detach the node at `path` along with every entry below it.
    pub fn remove(&self, path: &[usize]) -> Result<SubscriptionNode> {
        let node = {
            let mut state = self.inner.state();
            let node = remove_at(&mut state.roots, path)
                .ok_or_else(|| FeedwatchError::NoSuchNode(format!("{path:?}")))?;
            let uris: Vec<String> = node.entries().iter().map(|e| e.uri.clone()).collect();
            if let Some(selected) = &state.selected {
                if uris.contains(selected) {
                    state.selected = None;
                }
            }
            self.inner.release(&uris);
            node
        };
        self.inner.changed();
        Ok(node)
    }

    /// Insert a category into `parent`, ahead of the parent's entries.
    pub fn create_category(&self, parent: &[usize], title: &str) -> Result<Vec<usize>> {
        let path = {
            let mut state = self.inner.state();
            let children = children_mut(&mut state.roots, parent)
                .ok_or_else(|| FeedwatchError::NoSuchNode(format!("{parent:?}")))?;
            let index = children
                .iter()
                .position(|n| n.as_entry().is_some())
                .unwrap_or(children.len());
            children.insert(index, SubscriptionNode::Category(Category::new(title)));

            let mut path = parent.to_vec();
            path.push(index);
            path
        };
        self.inner.changed();
        Ok(path)
    }

    /// Move the node at `src` to position `index` of the category at
    /// `dest_parent`. Returns the node's new path.
    pub fn move_node(&self, src: &[usize], dest_parent: &[usize], index: usize) -> Result<Vec<usize>> {
        let path = {
            let mut state = self.inner.state();
            let (&src_index, src_parent) = src
                .split_last()
                .ok_or_else(|| FeedwatchError::NoSuchNode("[]".to_string()))?;
            if dest_parent.starts_with(src) {
                return Err(FeedwatchError::Other(format!(
                    "Cannot move {src:?} into its own subtree"
                )));
            }
            if children_mut(&mut state.roots, dest_parent).is_none() {
                return Err(FeedwatchError::NoSuchNode(format!("{dest_parent:?}")));
            }

            let node = remove_at(&mut state.roots, src)
                .ok_or_else(|| FeedwatchError::NoSuchNode(format!("{src:?}")))?;

            // removal shifts later siblings (and their subtrees) up by one
            let mut dest = dest_parent.to_vec();
            let depth = src_parent.len();
            let mut index = index;
            if dest.len() > depth && dest.starts_with(src_parent) && dest[depth] > src_index {
                dest[depth] -= 1;
            } else if dest == src_parent && index > src_index {
                index -= 1;
            }

            let children = children_mut(&mut state.roots, &dest)
                .ok_or_else(|| FeedwatchError::NoSuchNode(format!("{dest:?}")))?;
            let index = index.min(children.len());
            children.insert(index, node);
            dest.push(index);
            dest
        };
        self.inner.changed();
        Ok(path)
    }

    /// Remove every node.
    pub fn clear(&self) {
        {
            let mut state = self.inner.state();
            let uris: Vec<String> = state.entries().iter().map(|e| e.uri.clone()).collect();
            state.roots.clear();
            state.selected = None;
            self.inner.release(&uris);
        }
        self.inner.changed();
    }

    pub fn contains(&self, uri: &str) -> bool {
        self.inner.state().contains(uri)
    }

    pub fn find(&self, uri: &str) -> Option<Entry> {
        self.inner
            .state()
            .entries()
            .into_iter()
            .find(|e| e.uri == uri)
            .cloned()
    }

    pub fn node(&self, path: &[usize]) -> Option<SubscriptionNode> {
        node_at(&self.inner.state().roots, path).cloned()
    }

    pub fn roots(&self) -> Vec<SubscriptionNode> {
        self.inner.state().roots.clone()
    }

    /// All entries, depth first in tree order.
    pub fn entries(&self) -> Vec<Entry> {
        self.inner
            .state()
            .entries()
            .into_iter()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.state().entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Change an entry's check-frequency override and reschedule it.
    pub fn set_frequency(&self, uri: &str, frequency: CheckFrequency) -> Result<()> {
        {
            let mut state = self.inner.state();
            let entry = find_entry_mut(&mut state.roots, uri)
                .ok_or_else(|| FeedwatchError::NotFound(uri.to_string()))?;
            entry.frequency = frequency;
            let last_checked = entry.last_checked;
            self.inner.reschedule_entry(uri, frequency, last_checked)?;
        }
        self.inner.changed();
        Ok(())
    }

    /// Clear cached articles and counters, then poll the source again.
    ///
    /// A source set to never be checked is cleared but not polled.
    pub fn reset(&self, uri: &str) -> Result<()> {
        {
            let mut state = self.inner.state();
            let entry = find_entry_mut(&mut state.roots, uri)
                .ok_or_else(|| FeedwatchError::NotFound(uri.to_string()))?;
            self.inner.cache.reset(uri)?;
            entry.last_checked = None;

            let tiers = &self.inner.tiers;
            let target = tiers.tier_of(uri).or(match entry.frequency {
                CheckFrequency::Never => None,
                CheckFrequency::Low => Some(Tier::Low),
                CheckFrequency::High | CheckFrequency::Auto => Some(Tier::High),
            });
            if let Some(tier) = target {
                tiers.remove(uri);
                tiers.get(tier).register(uri, None);
                tiers.get(tier).update(&[uri]);
            }
        }
        info!(uri, "Reset source");
        self.inner.changed();
        Ok(())
    }

    /// Poll the given sources now. Returns how many were scheduled.
    pub fn update<U: AsRef<str>>(&self, uris: &[U]) -> usize {
        self.inner.tiers.update(uris)
    }

    /// Poll every source at or below `path` now.
    pub fn update_node(&self, path: &[usize]) -> Result<usize> {
        let uris = self.uris_below(path)?;
        Ok(self.update(&uris))
    }

    pub fn update_all(&self) -> usize {
        let uris: Vec<String> = self.entries().into_iter().map(|e| e.uri).collect();
        self.update(&uris)
    }

    /// Poll the due sources of both tiers once and wait for the results.
    pub async fn poll_due(&self) -> Vec<(String, Result<PollOutcome>)> {
        let tiers = &self.inner.tiers;
        let (high, low) = futures::join!(tiers.get(Tier::High).tick(), tiers.get(Tier::Low).tick());
        high.into_iter().chain(low).collect()
    }

    /// Re-evaluate the tier of one source. Returns whether it moved.
    pub fn reschedule(&self, uri: &str) -> Result<bool> {
        let state = self.inner.state();
        let entry = state
            .entries()
            .into_iter()
            .find(|e| e.uri == uri)
            .cloned()
            .ok_or_else(|| FeedwatchError::NotFound(uri.to_string()))?;
        self.inner
            .reschedule_entry(uri, entry.frequency, entry.last_checked)
    }

    /// Change how often sources in `tier` are checked. A running tier is
    /// restarted with the new interval as its initial delay.
    pub fn set_interval(&self, tier: Tier, interval: Duration) -> Result<()> {
        let monitor = self.inner.tiers.get(tier);
        if monitor.interval() == interval {
            return Ok(());
        }
        let was_running = monitor.state() == TimerState::Running;
        monitor.stop();
        monitor.set_interval(interval);
        if was_running {
            monitor.start(interval)?;
        }
        info!(%tier, ?interval, "Changed tier interval");
        Ok(())
    }

    pub fn set_timeout(&self, timeout: Duration) {
        for (_, monitor) in self.inner.tiers.iter() {
            monitor.set_timeout(timeout);
        }
    }

    pub fn start(&self) -> Result<()> {
        let tiers = &self.inner.tiers;
        tiers.get(Tier::High).start(self.inner.high_initial_delay)?;
        tiers.get(Tier::Low).start(self.inner.low_initial_delay)?;
        info!(
            high = tiers.get(Tier::High).uris().len(),
            low = tiers.get(Tier::Low).uris().len(),
            "Monitoring started"
        );
        Ok(())
    }

    pub fn stop(&self) {
        for (_, monitor) in self.inner.tiers.iter() {
            monitor.stop();
        }
    }

    pub fn suspend(&self) {
        for (_, monitor) in self.inner.tiers.iter() {
            monitor.suspend();
        }
    }

    pub fn state(&self, tier: Tier) -> TimerState {
        self.inner.tiers.get(tier).state()
    }

    /// Make `uri` the current entry and return its cached articles.
    ///
    /// The previously selected entry has its article list evicted to disk
    /// when it has no unread articles left.
    pub fn select(&self, uri: Option<&str>) -> Result<Option<CacheEntry>> {
        let previous = {
            let mut state = self.inner.state();
            if let Some(uri) = uri {
                if !state.contains(uri) {
                    return Err(FeedwatchError::NotFound(uri.to_string()));
                }
            }
            std::mem::replace(&mut state.selected, uri.map(str::to_string))
        };

        if let Some(previous) = previous.filter(|p| Some(p.as_str()) != uri) {
            let unread = self
                .inner
                .cache
                .metadata(&previous)?
                .map(|m| m.unread_count)
                .unwrap_or(0);
            if unread == 0 {
                if let Err(e) = self.inner.cache.evict_to_disk(&previous) {
                    error!(uri = %previous, error = %e, "Failed to evict cache entry");
                }
            }
        }

        match uri {
            Some(uri) => self.inner.cache.get(uri),
            None => Ok(None),
        }
    }

    pub fn selected(&self) -> Option<String> {
        self.inner.state().selected.clone()
    }

    pub fn articles(&self, uri: &str) -> Result<Vec<Article>> {
        Ok(self
            .inner
            .cache
            .get(uri)?
            .and_then(|e| e.articles)
            .unwrap_or_default())
    }

    pub fn mark_read(&self, uri: &str, article_id: &str, read: bool) -> Result<bool> {
        let found = self.inner.cache.set_read(uri, article_id, read)?;
        if found {
            self.inner.request_save();
        }
        Ok(found)
    }

    pub fn read_all(&self, uri: &str) -> Result<usize> {
        let changed = self.inner.cache.read_all(uri)?;
        if changed > 0 {
            self.inner.request_save();
        }
        Ok(changed)
    }

    /// Mark everything at or below `path` read.
    pub fn read_all_node(&self, path: &[usize]) -> Result<usize> {
        let mut changed = 0;
        for uri in self.uris_below(path)? {
            changed += self.read_all(&uri)?;
        }
        Ok(changed)
    }

    /// Append the nodes stored at `path`.
    pub fn load(&self, path: &Path) -> Result<usize> {
        let nodes = persist::load(path)?;
        let added = self.add(nodes)?;
        info!(path = %path.display(), entries = added, "Loaded subscriptions");
        Ok(added)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        self.inner.save_to(path)
    }

    /// Stop both tiers, write pending changes and stop the autosaver.
    pub async fn shutdown(&self) {
        self.stop();

        let handle = self
            .inner
            .autosave
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            handle.flush().await;
            handle.shutdown();
        }
        let task = self
            .autosave_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            let _ = task.await;
        }

        let saved = self.inner.cache.save_all();
        info!(cache_entries = saved, "Subscriptions shut down");
    }

    fn uris_below(&self, path: &[usize]) -> Result<Vec<String>> {
        let state = self.inner.state();
        let node = node_at(&state.roots, path)
            .ok_or_else(|| FeedwatchError::NoSuchNode(format!("{path:?}")))?;
        Ok(node.entries().iter().map(|e| e.uri.clone()).collect())
    }
}

/// Remove entries whose source is in `seen`, recording the rest.
fn drop_duplicates(nodes: &mut Vec<SubscriptionNode>, seen: &mut HashSet<String>) {
    nodes.retain_mut(|node| match node {
        SubscriptionNode::Entry(e) => {
            let fresh = seen.insert(e.uri.clone());
            if !fresh {
                warn!(uri = %e.uri, "Skipping duplicate entry");
            }
            fresh
        }
        SubscriptionNode::Category(c) => {
            drop_duplicates(&mut c.children, seen);
            true
        }
    });
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use async_trait::async_trait;
    use chrono::TimeZone;
    use reqwest::StatusCode;

    use super::*;
    use crate::fetcher::FetchResponse;
    use crate::store::SqliteCacheStore;

    const URI: &str = "http://example.test/rss";

    fn rss(title: &str, days: &[u32]) -> String {
        let items: String = days
            .iter()
            .map(|day| {
                format!(
                    "<item><guid>{title}-{day}</guid><title>Item {day}</title>\
                     <link>http://example.test/{day}</link>\
                     <pubDate>{}</pubDate></item>",
                    Utc.with_ymd_and_hms(2024, 1, *day, 0, 0, 0).unwrap().to_rfc2822()
                )
            })
            .collect();
        format!(
            r#"<?xml version="1.0"?><rss version="2.0"><channel><title>{title}</title><link>http://example.test/</link><description>d</description>{items}</channel></rss>"#
        )
    }

    #[derive(Default)]
    struct FakeWeb {
        pages: Mutex<HashMap<String, (u16, String)>>,
    }

    impl FakeWeb {
        fn serve(&self, uri: &str, status: u16, body: String) {
            self.pages
                .lock()
                .unwrap()
                .insert(uri.to_string(), (status, body));
        }
    }

    #[async_trait]
    impl Fetcher for FakeWeb {
        async fn fetch(&self, url: &str, _options: &RequestOptions) -> Result<FetchResponse> {
            let page = self.pages.lock().unwrap().get(url).cloned();
            match page {
                Some((status, body)) => Ok(FetchResponse {
                    status: StatusCode::from_u16(status).unwrap(),
                    body: body.into_bytes(),
                }),
                None => Err(FeedwatchError::Timeout(url.to_string())),
            }
        }
    }

    fn new_tree() -> (SubscriptionTree<SqliteCacheStore>, Arc<FakeWeb>) {
        let web = Arc::new(FakeWeb::default());
        let cache = ItemCache::new(Arc::new(SqliteCacheStore::in_memory().unwrap()));
        let mut settings = TreeSettings::default();
        settings.high.max_jitter = Duration::ZERO;
        settings.low.max_jitter = Duration::ZERO;
        (SubscriptionTree::new(cache, web.clone(), settings), web)
    }

    #[tokio::test]
    async fn test_register_new_source() {
        let (tree, web) = new_tree();
        web.serve(URI, 200, rss("Example", &[1, 2]));

        let entry = tree.register_new_source(URI).await.unwrap();
        assert_eq!(entry.title, "Example");
        assert!(tree.contains(URI));

        let cached = tree.cache().get(URI).unwrap().unwrap();
        assert_eq!(cached.article_count, 2);
        assert_eq!(cached.unread_count, 2);
        // one day between posts
        assert_eq!(tree.tier_of(URI), Some(Tier::High));
    }

    #[tokio::test]
    async fn test_registration_errors() {
        let (tree, web) = new_tree();
        web.serve(URI, 200, rss("Example", &[1, 2]));
        web.serve("http://html.test/", 200, "<html></html>".into());
        web.serve("http://gone.test/rss", 404, String::new());

        tree.register_new_source(URI).await.unwrap();
        assert!(matches!(
            tree.register_new_source(URI).await,
            Err(FeedwatchError::AlreadyExists(_))
        ));
        for uri in ["http://html.test/", "http://gone.test/rss", "http://down.test/rss"] {
            assert!(matches!(
                tree.register_new_source(uri).await,
                Err(FeedwatchError::NotFound(_))
            ));
            assert!(!tree.contains(uri));
        }
        assert!(matches!(
            tree.register_new_source("not a url").await,
            Err(FeedwatchError::InvalidUrl(_))
        ));
    }

    #[tokio::test]
    async fn test_unclassifiable_source_is_unassigned() {
        let (tree, web) = new_tree();
        web.serve(URI, 200, rss("Example", &[1]));
        tree.register_new_source(URI).await.unwrap();
        assert_eq!(tree.tier_of(URI), None);

        tree.set_frequency(URI, CheckFrequency::Low).unwrap();
        assert_eq!(tree.tier_of(URI), Some(Tier::Low));
        tree.set_frequency(URI, CheckFrequency::Never).unwrap();
        assert_eq!(tree.tier_of(URI), None);
    }

    #[tokio::test]
    async fn test_poll_merges_and_notifies() {
        let (tree, web) = new_tree();
        web.serve(URI, 200, rss("Example", &[1, 2]));
        tree.register_new_source(URI).await.unwrap();
        let mut events = tree.events();

        web.serve(URI, 200, rss("Example", &[1, 2, 3]));
        tree.update(&[URI]);
        tree.tiers().get(Tier::High).tick().await;

        match events.recv().await.unwrap() {
            SubscriptionEvent::Received { uri, feed } => {
                assert_eq!(uri, URI);
                assert_eq!(feed.articles.len(), 1);
                assert_eq!(feed.articles[0].id, "Example-3");
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert_eq!(tree.cache().get(URI).unwrap().unwrap().article_count, 3);
        assert!(tree.find(URI).unwrap().last_checked.is_some());
    }

    #[tokio::test]
    async fn test_reschedule_follows_cadence() {
        let (tree, web) = new_tree();
        web.serve(URI, 200, rss("Example", &[1, 2]));
        tree.register_new_source(URI).await.unwrap();
        assert_eq!(tree.tier_of(URI), Some(Tier::High));
        let stamp = tree.tiers().get(Tier::High).last_checked(URI).unwrap();

        // a week between posts pushes the source to the Low tier
        tree.cache().reset(URI).unwrap();
        let mut snapshot = FeedSnapshot::new(URI);
        for (id, day) in [("w1", 1), ("w2", 8), ("w3", 15)] {
            let mut article = Article::new(id);
            article.published_at = Some(Utc.with_ymd_and_hms(2024, 1, day, 0, 0, 0).unwrap());
            snapshot.articles.push(article);
        }
        tree.cache().merge(&snapshot).unwrap();

        assert!(tree.reschedule(URI).unwrap());
        assert_eq!(tree.tier_of(URI), Some(Tier::Low));
        assert!(!tree.tiers().get(Tier::High).contains(URI));
        assert_eq!(tree.tiers().get(Tier::Low).last_checked(URI).unwrap(), stamp);
        assert!(!tree.reschedule(URI).unwrap());
    }

    #[tokio::test]
    async fn test_server_fault_changes_nothing() {
        let (tree, web) = new_tree();
        web.serve(URI, 200, rss("Example", &[1, 2]));
        tree.register_new_source(URI).await.unwrap();
        let before = tree.find(URI).unwrap().last_checked;
        let mut events = tree.events();

        web.serve(URI, 503, String::new());
        tree.update(&[URI]);
        let results = tree.tiers().get(Tier::High).tick().await;
        assert!(results[0].1.is_err());
        assert!(events.try_recv().is_err());
        assert_eq!(tree.find(URI).unwrap().last_checked, before);
    }

    #[tokio::test]
    async fn test_poll_due_covers_both_tiers() {
        let (tree, web) = new_tree();
        let mut low = Entry::new("http://low.test/rss");
        low.frequency = CheckFrequency::Low;
        web.serve("http://low.test/rss", 200, rss("Low", &[1, 20]));
        web.serve(URI, 200, rss("Example", &[1, 2]));
        tree.add(vec![
            SubscriptionNode::Entry(low),
            SubscriptionNode::Entry(Entry::new(URI)),
        ])
        .unwrap();
        // an unassigned Auto entry is not polled
        assert_eq!(tree.tier_of(URI), None);

        let results = tree.poll_due().await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].0, "http://low.test/rss");
        assert!(matches!(results[0].1, Ok(PollOutcome::Published)));
        assert!(tree.poll_due().await.is_empty());
    }

    #[tokio::test]
    async fn test_select_evicts_fully_read_entry() {
        let (tree, web) = new_tree();
        web.serve(URI, 200, rss("Example", &[1, 2]));
        web.serve("http://other.test/rss", 200, rss("Other", &[1, 2]));
        tree.register_new_source(URI).await.unwrap();
        tree.register_new_source("http://other.test/rss").await.unwrap();

        let selected = tree.select(Some(URI)).unwrap().unwrap();
        for article in selected.articles.unwrap() {
            assert!(tree.mark_read(URI, &article.id, true).unwrap());
        }

        tree.select(Some("http://other.test/rss")).unwrap();
        let meta = tree.cache().metadata(URI).unwrap().unwrap();
        assert!(!meta.is_hydrated());
        assert_eq!(meta.title.as_deref(), Some("Example"));
        assert_eq!(meta.article_count, 2);
        assert_eq!(meta.unread_count, 0);

        // an entry with unread articles stays in memory
        tree.select(None).unwrap();
        let other = tree.cache().metadata("http://other.test/rss").unwrap().unwrap();
        assert!(other.is_hydrated());

        let restored = tree.cache().get(URI).unwrap().unwrap();
        assert!(restored.articles.unwrap().iter().all(|a| a.read));
    }

    #[tokio::test]
    async fn test_remove_is_idempotent() {
        let (tree, web) = new_tree();
        web.serve(URI, 200, rss("Example", &[1, 2]));
        tree.register_new_source(URI).await.unwrap();

        assert!(tree.remove_entry(URI).unwrap());
        assert!(!tree.remove_entry(URI).unwrap());
        assert!(!tree.contains(URI));
        assert_eq!(tree.tier_of(URI), None);
        assert!(!tree.cache().contains_key(URI).unwrap());
    }

    #[tokio::test]
    async fn test_reset_forces_repoll() {
        let (tree, web) = new_tree();
        web.serve(URI, 200, rss("Example", &[1, 2]));
        tree.register_new_source(URI).await.unwrap();
        tree.read_all(URI).unwrap();

        tree.reset(URI).unwrap();
        let cached = tree.cache().get(URI).unwrap().unwrap();
        assert_eq!(cached.article_count, 0);
        assert_eq!(tree.find(URI).unwrap().last_checked, None);

        let results = tree.tiers().get(Tier::High).tick().await;
        assert_eq!(results.len(), 1);
        let cached = tree.cache().get(URI).unwrap().unwrap();
        assert_eq!(cached.unread_count, 2);
        assert!(tree.find(URI).unwrap().last_checked.is_some());
    }

    #[tokio::test]
    async fn test_categories_and_moves() {
        let (tree, _) = new_tree();
        tree.add(vec![
            SubscriptionNode::Entry(Entry::new("http://a.test/rss")),
            SubscriptionNode::Entry(Entry::new("http://b.test/rss")),
        ])
        .unwrap();

        let news = tree.create_category(&[], "News").unwrap();
        assert_eq!(news, vec![0]);
        assert_eq!(tree.node(&[1]).unwrap().title(), "http://a.test/rss");

        let moved = tree.move_node(&[2], &news, 0).unwrap();
        assert_eq!(moved, vec![0, 0]);
        let moved = tree.move_node(&[1], &news, 5).unwrap();
        assert_eq!(moved, vec![0, 1]);
        assert_eq!(tree.roots().len(), 1);

        assert!(tree.move_node(&[0], &[0], 0).is_err());
        assert!(tree.move_node(&[9], &[], 0).is_err());

        let entries: Vec<String> = tree.entries().into_iter().map(|e| e.uri).collect();
        assert_eq!(entries, vec!["http://b.test/rss", "http://a.test/rss"]);

        tree.remove(&news).unwrap();
        assert!(tree.is_empty());
        assert!(!tree.cache().contains_key("http://a.test/rss").unwrap());
    }

    #[tokio::test]
    async fn test_move_before_later_sibling() {
        let (tree, _) = new_tree();
        let nested = tree.create_category(&[], "Nested").unwrap();
        tree.add(vec![SubscriptionNode::Entry(Entry::new("http://a.test/rss"))])
            .unwrap();
        let target = tree.create_category(&[], "Target").unwrap();
        assert_eq!(target, vec![1]);
        assert_eq!(nested, vec![0]);

        // moving [0] out shifts Target from [1] to [0]
        let moved = tree.move_node(&nested, &target, 0).unwrap();
        assert_eq!(moved, vec![0, 0]);
        assert_eq!(tree.node(&[0]).unwrap().title(), "Target");
    }

    #[tokio::test]
    async fn test_add_skips_duplicates_and_uses_overrides() {
        let (tree, _) = new_tree();
        let mut low = Entry::new("http://a.test/rss");
        low.frequency = CheckFrequency::Low;
        let added = tree
            .add(vec![
                SubscriptionNode::Entry(low),
                SubscriptionNode::Entry(Entry::new("http://a.test/rss")),
            ])
            .unwrap();
        assert_eq!(added, 1);
        assert_eq!(tree.tier_of("http://a.test/rss"), Some(Tier::Low));
        assert_eq!(tree.add(vec![SubscriptionNode::Entry(Entry::new("http://a.test/rss"))]).unwrap(), 0);
    }

    #[tokio::test]
    async fn test_collection_changed_events() {
        let (tree, _) = new_tree();
        let mut events = tree.events();
        tree.create_category(&[], "News").unwrap();
        tree.clear();
        for _ in 0..2 {
            assert!(matches!(
                events.recv().await.unwrap(),
                SubscriptionEvent::CollectionChanged
            ));
        }
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("subscriptions.json");
        let (tree, web) = new_tree();
        web.serve(URI, 200, rss("Example", &[1, 2]));
        tree.register_new_source(URI).await.unwrap();
        let category = tree.create_category(&[], "Empty").unwrap();
        tree.save(&path).unwrap();

        let (restored, _) = new_tree();
        assert_eq!(restored.load(&path).unwrap(), 1);
        assert_eq!(restored.roots(), tree.roots());
        assert_eq!(restored.node(&category).unwrap().title(), "Empty");
    }

    #[tokio::test]
    async fn test_set_interval_restarts_running_tier() {
        let (tree, _) = new_tree();
        tree.set_interval(Tier::Low, Duration::from_secs(7200)).unwrap();
        assert_eq!(tree.state(Tier::Low), TimerState::Stopped);

        tree.start().unwrap();
        tree.set_interval(Tier::High, Duration::from_secs(600)).unwrap();
        assert_eq!(tree.state(Tier::High), TimerState::Running);
        assert_eq!(tree.tiers().get(Tier::High).interval(), Duration::from_secs(600));

        tree.suspend();
        assert_eq!(tree.state(Tier::High), TimerState::Suspended);
        tree.shutdown().await;
        assert_eq!(tree.state(Tier::Low), TimerState::Stopped);
    }

    #[tokio::test]
    async fn test_autosave_writes_after_changes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("subscriptions.json");
        let (tree, _) = new_tree();
        tree.autosave_to(&path, Duration::from_millis(20)).unwrap();

        tree.create_category(&[], "News").unwrap();
        tree.create_category(&[], "Blogs").unwrap();
        tree.shutdown().await;

        let nodes = persist::load(&path).unwrap();
        assert_eq!(nodes.len(), 2);
    }
}
