use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;

use crate::app::Result;
use crate::domain::FeedSnapshot;
use crate::fetcher::Fetcher;
use crate::monitor::{HttpMonitor, PollOutcome, Schedule, Subscription, TimerState};
use crate::normalizer::{Classified, ContentHandler};

/// Timing of one monitor tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TierSettings {
    /// Minimum time between two checks of the same source.
    pub interval: Duration,
    /// Timer resolution.
    pub tick: Duration,
    /// Upper bound of the per-source random delay added to `interval`.
    pub max_jitter: Duration,
}

impl Default for TierSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(3600),
            tick: Duration::from_secs(60),
            max_jitter: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone)]
struct Tracked {
    last_checked: Option<DateTime<Utc>>,
    jitter: Duration,
    forced: bool,
}

impl Tracked {
    fn is_due(&self, now: DateTime<Utc>, interval: Duration) -> bool {
        if self.forced {
            return true;
        }
        let Some(last) = self.last_checked else {
            return true;
        };
        match (now - last).to_std() {
            Ok(elapsed) => elapsed >= interval.saturating_add(self.jitter),
            // last check lies in the future
            Err(_) => false,
        }
    }
}

/// Per-source last-checked stamps and due-ness for one tier.
pub struct FeedSchedule {
    tracked: Mutex<HashMap<String, Tracked>>,
    interval: RwLock<Duration>,
    max_jitter: Duration,
}

impl FeedSchedule {
    pub fn new(interval: Duration, max_jitter: Duration) -> Self {
        Self {
            tracked: Mutex::new(HashMap::new()),
            interval: RwLock::new(interval),
            max_jitter,
        }
    }

    pub fn interval(&self) -> Duration {
        *self.interval.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_interval(&self, interval: Duration) {
        *self.interval.write().unwrap_or_else(PoisonError::into_inner) = interval;
    }

    /// Track a source. Registering again replaces its stamp.
    pub fn register(&self, uri: &str, last_checked: Option<DateTime<Utc>>) {
        let jitter = self.sample_jitter();
        self.tracked().insert(
            uri.to_string(),
            Tracked {
                last_checked,
                jitter,
                forced: false,
            },
        );
    }

    pub fn remove(&self, uri: &str) -> bool {
        self.tracked().remove(uri).is_some()
    }

    pub fn contains(&self, uri: &str) -> bool {
        self.tracked().contains_key(uri)
    }

    /// Make the given sources due on the next tick. Returns how many are
    /// tracked here.
    pub fn force<S: AsRef<str>>(&self, uris: &[S]) -> usize {
        let mut tracked = self.tracked();
        let mut forced = 0;
        for uri in uris {
            if let Some(entry) = tracked.get_mut(uri.as_ref()) {
                entry.forced = true;
                forced += 1;
            }
        }
        forced
    }

    /// `None` when the source is not tracked here.
    pub fn last_checked(&self, uri: &str) -> Option<Option<DateTime<Utc>>> {
        self.tracked().get(uri).map(|t| t.last_checked)
    }

    pub fn uris(&self) -> Vec<String> {
        let mut uris: Vec<String> = self.tracked().keys().cloned().collect();
        uris.sort();
        uris
    }

    pub fn len(&self) -> usize {
        self.tracked().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn sample_jitter(&self) -> Duration {
        let max = self.max_jitter.as_millis() as u64;
        if max == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::rng().random_range(0..=max))
    }

    fn tracked(&self) -> MutexGuard<'_, HashMap<String, Tracked>> {
        self.tracked.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Schedule<FeedSnapshot> for FeedSchedule {
    fn due(&self, now: DateTime<Utc>, in_flight: &HashSet<String>) -> Vec<String> {
        let interval = self.interval();
        let mut tracked = self.tracked();
        let mut due: Vec<String> = tracked
            .iter_mut()
            .filter(|(uri, _)| !in_flight.contains(*uri))
            .filter(|(_, entry)| entry.is_due(now, interval))
            .map(|(uri, entry)| {
                entry.forced = false;
                uri.clone()
            })
            .collect();
        due.sort();
        due
    }

    fn completed(&self, uri: &str, value: &FeedSnapshot) {
        if let Some(entry) = self.tracked().get_mut(uri) {
            entry.last_checked = Some(value.last_checked);
        }
    }
}

/// A poller for syndication feeds with its own due-set.
pub struct FeedMonitor {
    schedule: Arc<FeedSchedule>,
    monitor: HttpMonitor<FeedSnapshot>,
}

impl FeedMonitor {
    pub fn new(fetcher: Arc<dyn Fetcher + Send + Sync>, settings: TierSettings) -> Self {
        Self::with_handler(fetcher, ContentHandler::feeds(), settings)
    }

    pub fn with_handler(
        fetcher: Arc<dyn Fetcher + Send + Sync>,
        handler: ContentHandler<FeedSnapshot>,
        settings: TierSettings,
    ) -> Self {
        let schedule = Arc::new(FeedSchedule::new(settings.interval, settings.max_jitter));
        let monitor = HttpMonitor::new(fetcher, handler, schedule.clone());
        monitor.set_period(settings.tick);
        Self { schedule, monitor }
    }

    pub fn register(&self, uri: &str, last_checked: Option<DateTime<Utc>>) {
        self.schedule.register(uri, last_checked);
    }

    pub fn remove(&self, uri: &str) -> bool {
        self.schedule.remove(uri)
    }

    pub fn contains(&self, uri: &str) -> bool {
        self.schedule.contains(uri)
    }

    /// Force the given sources to be polled now, regardless of schedule.
    pub fn update<S: AsRef<str>>(&self, uris: &[S]) -> usize {
        let forced = self.schedule.force(uris);
        if forced > 0 {
            self.monitor.wake();
        }
        forced
    }

    pub fn last_checked(&self, uri: &str) -> Option<Option<DateTime<Utc>>> {
        self.schedule.last_checked(uri)
    }

    pub fn uris(&self) -> Vec<String> {
        self.schedule.uris()
    }

    pub fn interval(&self) -> Duration {
        self.schedule.interval()
    }

    pub fn set_interval(&self, interval: Duration) {
        self.schedule.set_interval(interval);
    }

    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&str, &FeedSnapshot) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.monitor.subscribe(callback)
    }

    pub fn timeout(&self) -> Duration {
        self.monitor.timeout()
    }

    pub fn set_timeout(&self, timeout: Duration) {
        self.monitor.set_timeout(timeout);
    }

    pub fn set_user_agent(&self, user_agent: impl Into<String>) {
        self.monitor.set_user_agent(user_agent);
    }

    pub fn state(&self) -> TimerState {
        self.monitor.state()
    }

    pub fn start(&self, initial_delay: Duration) -> Result<()> {
        self.monitor.start(initial_delay)
    }

    pub fn stop(&self) {
        self.monitor.stop();
    }

    pub fn suspend(&self) {
        self.monitor.suspend();
    }

    pub async fn tick(&self) -> Vec<(String, Result<PollOutcome>)> {
        self.monitor.tick().await
    }

    pub async fn fetch(&self, uri: &str) -> Result<Classified<FeedSnapshot>> {
        self.monitor.fetch(uri).await
    }
}
