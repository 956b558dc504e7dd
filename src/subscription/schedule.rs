//! Two-tier assignment of sources to feed monitors.

use std::fmt;

use chrono::{DateTime, Duration, Utc};

use crate::domain::CheckFrequency;
use crate::monitor::FeedMonitor;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tier {
    High,
    Low,
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tier::High => write!(f, "high"),
            Tier::Low => write!(f, "low"),
        }
    }
}

/// Maps an entry's override and observed cadence to a tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulePolicy {
    /// Sources publishing at least this often go to the High tier.
    pub high_cadence: Duration,
}

impl Default for SchedulePolicy {
    fn default() -> Self {
        Self {
            high_cadence: Duration::days(3),
        }
    }
}

impl SchedulePolicy {
    pub fn new(high_cadence: Duration) -> Self {
        Self { high_cadence }
    }

    /// `None` leaves the source unpolled.
    pub fn classify(&self, frequency: CheckFrequency, cadence: Option<Duration>) -> Option<Tier> {
        match frequency {
            CheckFrequency::Never => None,
            CheckFrequency::High => Some(Tier::High),
            CheckFrequency::Low => Some(Tier::Low),
            CheckFrequency::Auto => {
                let cadence = cadence?;
                if cadence <= self.high_cadence {
                    Some(Tier::High)
                } else {
                    Some(Tier::Low)
                }
            }
        }
    }
}

/// The High and Low monitors. A source is tracked by at most one of them.
pub struct Tiers {
    high: FeedMonitor,
    low: FeedMonitor,
}

impl Tiers {
    pub fn new(high: FeedMonitor, low: FeedMonitor) -> Self {
        Self { high, low }
    }

    pub fn get(&self, tier: Tier) -> &FeedMonitor {
        match tier {
            Tier::High => &self.high,
            Tier::Low => &self.low,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (Tier, &FeedMonitor)> {
        [(Tier::High, &self.high), (Tier::Low, &self.low)].into_iter()
    }

    pub fn tier_of(&self, uri: &str) -> Option<Tier> {
        self.iter()
            .find(|(_, monitor)| monitor.contains(uri))
            .map(|(tier, _)| tier)
    }

    /// Move `uri` to `target`, keeping its last-checked stamp.
    ///
    /// Returns false when it was already there.
    pub fn assign(&self, uri: &str, target: Option<Tier>, last_checked: Option<DateTime<Utc>>) -> bool {
        let current = self.tier_of(uri);
        if current == target {
            return false;
        }
        if let Some(tier) = current {
            self.get(tier).remove(uri);
        }
        if let Some(tier) = target {
            self.get(tier).register(uri, last_checked);
        }
        tracing::debug!(
            uri,
            from = ?current,
            to = ?target,
            "Rescheduled source"
        );
        true
    }

    pub fn remove(&self, uri: &str) -> bool {
        let high = self.high.remove(uri);
        let low = self.low.remove(uri);
        high || low
    }

    /// Force every tracked source in `uris` to be polled now.
    pub fn update<S: AsRef<str>>(&self, uris: &[S]) -> usize {
        self.high.update(uris) + self.low.update(uris)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;

    use super::*;
    use crate::app::{FeedwatchError, Result};
    use crate::fetcher::{FetchResponse, Fetcher, RequestOptions};
    use crate::monitor::TierSettings;

    struct Offline;

    #[async_trait]
    impl Fetcher for Offline {
        async fn fetch(&self, url: &str, _options: &RequestOptions) -> Result<FetchResponse> {
            Err(FeedwatchError::Timeout(url.to_string()))
        }
    }

    fn tiers() -> Tiers {
        let fetcher: Arc<dyn Fetcher + Send + Sync> = Arc::new(Offline);
        Tiers::new(
            FeedMonitor::new(fetcher.clone(), TierSettings::default()),
            FeedMonitor::new(fetcher, TierSettings::default()),
        )
    }

    #[test]
    fn test_overrides_win_over_cadence() {
        let policy = SchedulePolicy::default();
        let fast = Some(Duration::hours(1));
        assert_eq!(policy.classify(CheckFrequency::Never, fast), None);
        assert_eq!(policy.classify(CheckFrequency::Low, fast), Some(Tier::Low));
        assert_eq!(policy.classify(CheckFrequency::High, None), Some(Tier::High));
    }

    #[test]
    fn test_auto_uses_threshold() {
        let policy = SchedulePolicy::new(Duration::days(3));
        assert_eq!(policy.classify(CheckFrequency::Auto, None), None);
        assert_eq!(
            policy.classify(CheckFrequency::Auto, Some(Duration::hours(5))),
            Some(Tier::High)
        );
        // on the threshold both tiers qualify; High wins
        assert_eq!(
            policy.classify(CheckFrequency::Auto, Some(Duration::days(3))),
            Some(Tier::High)
        );
        assert_eq!(
            policy.classify(CheckFrequency::Auto, Some(Duration::days(4))),
            Some(Tier::Low)
        );
    }

    #[test]
    fn test_assign_moves_between_tiers() {
        let tiers = tiers();
        let uri = "http://example.test/rss";
        let stamp = Some(Utc::now());

        assert!(tiers.assign(uri, Some(Tier::Low), stamp));
        assert_eq!(tiers.tier_of(uri), Some(Tier::Low));
        assert!(!tiers.assign(uri, Some(Tier::Low), None));
        assert_eq!(tiers.get(Tier::Low).last_checked(uri), Some(stamp));

        assert!(tiers.assign(uri, Some(Tier::High), stamp));
        assert!(tiers.get(Tier::High).contains(uri));
        assert!(!tiers.get(Tier::Low).contains(uri));
        assert_eq!(tiers.get(Tier::High).last_checked(uri), Some(stamp));

        assert!(tiers.assign(uri, None, stamp));
        assert_eq!(tiers.tier_of(uri), None);
        assert!(!tiers.remove(uri));
    }

    #[test]
    fn test_at_most_one_tier() {
        let tiers = tiers();
        let targets = [Some(Tier::High), None, Some(Tier::Low), Some(Tier::High), Some(Tier::Low)];
        for (i, target) in targets.iter().cycle().take(20).enumerate() {
            let uri = format!("http://s{}.test/rss", i % 3);
            tiers.assign(&uri, *target, None);
            for n in 0..3 {
                let uri = format!("http://s{n}.test/rss");
                let owners = tiers.iter().filter(|(_, m)| m.contains(&uri)).count();
                assert!(owners <= 1);
            }
        }
    }
}
