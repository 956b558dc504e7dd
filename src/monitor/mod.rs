//! Periodic HTTP polling.
//!
//! [`HttpMonitor`] owns a fetcher, a content handler, a subscriber list and a
//! timer. On every tick it asks its [`Schedule`] which sources are due, issues
//! one request per source concurrently and publishes converted values.
//! Requests run in their own task so stopping the timer never cancels them.

pub mod feed_monitor;
pub mod subscribers;
pub mod timer;

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use futures::FutureExt;
use reqwest::StatusCode;
use tokio::sync::Notify;

use crate::app::{FeedwatchError, Result};
use crate::fetcher::{Fetcher, RequestOptions};
use crate::normalizer::{Classified, ContentHandler};

pub use feed_monitor::{FeedMonitor, FeedSchedule, TierSettings};
pub use subscribers::{SubscriberList, Subscription};
pub use timer::{Timer, TimerState};

pub const DEFAULT_TICK: Duration = Duration::from_secs(60);

/// Decides which sources a monitor polls.
pub trait Schedule<T>: Send + Sync {
    /// Sources due at `now`, excluding those with a request outstanding.
    fn due(&self, now: DateTime<Utc>, in_flight: &HashSet<String>) -> Vec<String>;

    /// Called once per converted value, before subscribers see it.
    fn completed(&self, uri: &str, value: &T);
}

/// Non-fault outcome of polling one source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    Published,
    Redirected(StatusCode),
    ClientError(StatusCode),
    Unsupported(StatusCode),
}

struct Shared<T> {
    fetcher: Arc<dyn Fetcher + Send + Sync>,
    handler: ContentHandler<T>,
    schedule: Arc<dyn Schedule<T>>,
    subscribers: Arc<SubscriberList<T>>,
    options: RwLock<RequestOptions>,
    period: RwLock<Duration>,
    in_flight: Arc<Mutex<HashSet<String>>>,
    wake: Notify,
}

/// Releases a source's in-flight claim however its request ends.
struct InFlight {
    set: Arc<Mutex<HashSet<String>>>,
    uri: String,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.set
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.uri);
    }
}

impl<T: Send + Sync + 'static> Shared<T> {
    fn options(&self) -> RequestOptions {
        self.options
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn period(&self) -> Duration {
        *self.period.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn claim_due(&self, now: DateTime<Utc>) -> Vec<InFlight> {
        let mut busy = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        let due = self.schedule.due(now, &busy);
        due.into_iter()
            .filter(|uri| busy.insert(uri.clone()))
            .map(|uri| InFlight {
                set: self.in_flight.clone(),
                uri,
            })
            .collect()
    }

    async fn tick(self: Arc<Self>) -> Vec<(String, Result<PollOutcome>)> {
        let claims = self.claim_due(Utc::now());
        if claims.is_empty() {
            return Vec::new();
        }
        tracing::debug!(
            count = claims.len(),
            subscribers = self.subscribers.len(),
            "Polling due sources"
        );

        let polls = claims.into_iter().map(|claim| {
            let this = self.clone();
            async move {
                let result = this.poll(&claim.uri).await;
                (claim.uri.clone(), result)
            }
        });
        join_all(polls).await
    }

    async fn poll(&self, uri: &str) -> Result<PollOutcome> {
        let response = match self.fetcher.fetch(uri, &self.options()).await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(uri, error = %e, "Request failed");
                return Err(e);
            }
        };

        match self.handler.classify(uri, &response) {
            Classified::Value(value) => {
                self.schedule.completed(uri, &value);
                self.subscribers.publish(uri, &value);
                Ok(PollOutcome::Published)
            }
            Classified::Redirect(status) => {
                tracing::debug!(uri, status = status.as_u16(), "Redirect response");
                Ok(PollOutcome::Redirected(status))
            }
            Classified::ClientError(status) => {
                tracing::warn!(uri, status = status.as_u16(), "Client error response");
                Ok(PollOutcome::ClientError(status))
            }
            Classified::ServerError(status) => {
                tracing::warn!(uri, status = status.as_u16(), "Server fault response");
                Err(FeedwatchError::ServerFault {
                    uri: uri.to_string(),
                    status: status.as_u16(),
                })
            }
            Classified::Unsupported(status) => {
                tracing::warn!(uri, status = status.as_u16(), "Unsupported content");
                Ok(PollOutcome::Unsupported(status))
            }
        }
    }
}

async fn run_timer<T: Send + Sync + 'static>(shared: Arc<Shared<T>>, initial_delay: Duration) {
    tokio::select! {
        _ = tokio::time::sleep(initial_delay) => {}
        _ = shared.wake.notified() => {}
    }
    loop {
        tokio::spawn(shared.clone().tick());
        let period = shared.period();
        tokio::select! {
            _ = tokio::time::sleep(period) => {}
            _ = shared.wake.notified() => {}
        }
    }
}

pub struct HttpMonitor<T> {
    shared: Arc<Shared<T>>,
    timer: Mutex<Timer>,
}

impl<T: Send + Sync + 'static> HttpMonitor<T> {
    pub fn new(
        fetcher: Arc<dyn Fetcher + Send + Sync>,
        handler: ContentHandler<T>,
        schedule: Arc<dyn Schedule<T>>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                fetcher,
                handler,
                schedule,
                subscribers: SubscriberList::new(),
                options: RwLock::new(RequestOptions::default()),
                period: RwLock::new(DEFAULT_TICK),
                in_flight: Arc::new(Mutex::new(HashSet::new())),
                wake: Notify::new(),
            }),
            timer: Mutex::new(Timer::new()),
        }
    }

    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&str, &T) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.shared.subscribers.subscribe(callback)
    }

    pub fn timeout(&self) -> Duration {
        self.shared.options().timeout
    }

    /// Applies to the next request. A zero timeout is rejected and logged.
    pub fn set_timeout(&self, timeout: Duration) {
        if timeout.is_zero() {
            tracing::warn!(?timeout, "Timeout cannot be applied");
            return;
        }
        self.shared
            .options
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .timeout = timeout;
    }

    pub fn user_agent(&self) -> String {
        self.shared.options().user_agent
    }

    pub fn set_user_agent(&self, user_agent: impl Into<String>) {
        self.shared
            .options
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .user_agent = user_agent.into();
    }

    /// Time between two ticks of the timer.
    pub fn period(&self) -> Duration {
        self.shared.period()
    }

    pub fn set_period(&self, period: Duration) {
        *self
            .shared
            .period
            .write()
            .unwrap_or_else(PoisonError::into_inner) = period;
    }

    pub fn state(&self) -> TimerState {
        self.timer().state()
    }

    /// Arm the timer; the first tick fires after `initial_delay`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self, initial_delay: Duration) -> Result<()> {
        let handle = tokio::runtime::Handle::try_current()
            .map_err(|e| FeedwatchError::Other(format!("Cannot start monitor: {e}")))?;
        let shared = self.shared.clone();
        if self.timer().start(|| {
            // a wake() issued while stopped must not skip the initial delay
            let _ = shared.wake.notified().now_or_never();
            handle.spawn(run_timer(shared, initial_delay))
        }) {
            tracing::debug!(?initial_delay, "Monitor started");
        }
        Ok(())
    }

    pub fn stop(&self) {
        self.timer().stop();
        tracing::debug!("Monitor stopped");
    }

    pub fn suspend(&self) {
        if self.timer().suspend() {
            tracing::debug!("Monitor suspended");
        }
    }

    /// Cut the current wait short so due sources are polled now.
    pub fn wake(&self) {
        self.shared.wake.notify_one();
    }

    /// Run one polling cycle and wait for every request it issued.
    pub async fn tick(&self) -> Vec<(String, Result<PollOutcome>)> {
        self.shared.clone().tick().await
    }

    /// Fetch and classify one source without publishing the result.
    pub async fn fetch(&self, uri: &str) -> Result<Classified<T>> {
        let response = self.shared.fetcher.fetch(uri, &self.shared.options()).await?;
        Ok(self.shared.handler.classify(uri, &response))
    }

    fn timer(&self) -> std::sync::MutexGuard<'_, Timer> {
        self.timer.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
