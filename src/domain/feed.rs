use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::Article;

/// Normalized result of one successful poll of a source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedSnapshot {
    pub uri: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub link: Option<String>,
    pub articles: Vec<Article>,
    pub last_checked: DateTime<Utc>,
}

impl FeedSnapshot {
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            title: None,
            description: None,
            link: None,
            articles: Vec::new(),
            last_checked: Utc::now(),
        }
    }

    pub fn display_title(&self) -> &str {
        self.title.as_deref().unwrap_or(&self.uri)
    }

    pub fn unread_count(&self) -> usize {
        self.articles.iter().filter(|a| !a.read).count()
    }
}

/// Average gap between the most recent publish times.
///
/// Only the newest `window` dated articles are considered. Returns `None`
/// when fewer than `min_samples` (and never fewer than two) are available.
pub fn observed_cadence(articles: &[Article], window: usize, min_samples: usize) -> Option<Duration> {
    let mut times: Vec<DateTime<Utc>> = articles.iter().filter_map(|a| a.published_at).collect();
    times.sort_unstable_by(|a, b| b.cmp(a));
    times.truncate(window);

    if times.len() < min_samples.max(2) {
        return None;
    }

    let span = times[0] - times[times.len() - 1];
    Some(span / (times.len() as i32 - 1))
}
