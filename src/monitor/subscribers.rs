use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use crate::app::FeedwatchError;

pub type Callback<T> = Arc<dyn Fn(&str, &T) -> anyhow::Result<()> + Send + Sync>;

/// Registry of result callbacks.
pub struct SubscriberList<T> {
    next_id: AtomicU64,
    callbacks: Mutex<Vec<(u64, Callback<T>)>>,
}

impl<T> Default for SubscriberList<T> {
    fn default() -> Self {
        Self {
            next_id: AtomicU64::new(0),
            callbacks: Mutex::new(Vec::new()),
        }
    }
}

impl<T: 'static> SubscriberList<T> {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register a callback. Dropping the returned handle removes it.
    pub fn subscribe<F>(self: &Arc<Self>, callback: F) -> Subscription
    where
        F: Fn(&str, &T) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, Arc::new(callback)));

        let list: Weak<Self> = Arc::downgrade(self);
        Subscription {
            release: Some(Box::new(move || {
                if let Some(list) = list.upgrade() {
                    list.remove(id);
                }
            })),
        }
    }

    pub fn len(&self) -> usize {
        self.callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Invoke every callback in registration order.
    ///
    /// A failing or panicking callback is logged and skipped. Returns the
    /// faults that were contained.
    pub fn publish(&self, uri: &str, value: &T) -> Vec<FeedwatchError> {
        let callbacks: Vec<Callback<T>> = self
            .callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, cb)| cb.clone())
            .collect();

        let mut faults = Vec::new();
        for callback in callbacks {
            let fault = match catch_unwind(AssertUnwindSafe(|| callback(uri, value))) {
                Ok(Ok(())) => continue,
                Ok(Err(e)) => FeedwatchError::SubscriberFault(e.to_string()),
                Err(panic) => FeedwatchError::SubscriberFault(panic_message(&panic)),
            };
            tracing::warn!(uri, error = %fault, "Subscriber failed");
            faults.push(fault);
        }
        faults
    }

    fn remove(&self, id: u64) {
        self.callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|(existing, _)| *existing != id);
    }
}

fn panic_message(panic: &Box<dyn std::any::Any + Send>) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "panic".to_string())
}

/// Unsubscribes its callback when dropped.
///
/// Safe to drop after the publisher itself is gone.
#[must_use = "dropping a Subscription immediately unsubscribes"]
pub struct Subscription {
    release: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    pub fn unsubscribe(mut self) {
        self.release_now();
    }

    fn release_now(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release_now();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.release.is_some())
            .finish()
    }
}
