//! Long-running monitor process.
//!
//! Loads the subscription tree, starts both tiers and logs what arrives
//! until SIGINT or SIGTERM, then shuts the tree down.

use std::time::Duration;

use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use crate::app::{AppContext, Result};
use crate::subscription::{SubscriptionEvent, Tier};

/// Daemon configuration
#[derive(Debug, Clone, Default)]
pub struct DaemonConfig {
    /// Override of the High tier check interval in seconds
    pub high_interval_secs: Option<u64>,
    /// Override of the Low tier check interval in seconds
    pub low_interval_secs: Option<u64>,
    /// Force a check of every source on start
    pub update_on_start: bool,
}

const UNITS: [(char, u64); 4] = [('d', 86400), ('h', 3600), ('m', 60), ('s', 1)];

impl DaemonConfig {
    /// Parse interval string like "1h", "30m", "6h", "1d". Bare numbers are seconds.
    pub fn parse_interval(s: &str) -> std::result::Result<u64, String> {
        let s = s.trim().to_lowercase();
        let (digits, scale) = match s.char_indices().last() {
            Some((i, unit)) if unit.is_ascii_alphabetic() => {
                let (_, scale) = UNITS
                    .iter()
                    .find(|(u, _)| *u == unit)
                    .ok_or_else(|| format!("Unknown unit '{unit}' in {s}"))?;
                (&s[..i], *scale)
            }
            _ => (s.as_str(), 1),
        };

        digits
            .parse::<u64>()
            .ok()
            .and_then(|n| n.checked_mul(scale))
            .ok_or_else(|| format!("Invalid interval: {s}. Use format like '1h', '30m', '1d'"))
    }

    /// Format interval for display, in the largest unit that divides it
    pub fn format_interval(secs: u64) -> String {
        UNITS
            .iter()
            .find(|(_, n)| secs >= *n && secs % n == 0)
            .map(|(unit, n)| format!("{}{}", secs / n, unit))
            .unwrap_or_else(|| format!("{secs}s"))
    }
}

pub struct Daemon<'a> {
    ctx: &'a AppContext,
    config: DaemonConfig,
}

impl<'a> Daemon<'a> {
    pub fn new(ctx: &'a AppContext, config: DaemonConfig) -> Self {
        Self { ctx, config }
    }

    /// Run until a shutdown signal arrives
    pub async fn run(&self) -> Result<()> {
        self.run_until(shutdown_signal()).await
    }

    /// Run until `shutdown` completes
    pub async fn run_until(&self, shutdown: impl std::future::Future<Output = ()>) -> Result<()> {
        let tree = &self.ctx.tree;

        for (tier, secs) in [
            (Tier::High, self.config.high_interval_secs),
            (Tier::Low, self.config.low_interval_secs),
        ] {
            if let Some(secs) = secs {
                tree.set_interval(tier, Duration::from_secs(secs))?;
            }
        }

        tree.autosave_to(
            self.ctx.subscriptions_path(),
            self.ctx.config.storage.autosave_window(),
        )?;
        let mut events = tree.events();
        tree.start()?;

        info!(
            sources = tree.len(),
            high = %DaemonConfig::format_interval(tree.tiers().get(Tier::High).interval().as_secs()),
            low = %DaemonConfig::format_interval(tree.tiers().get(Tier::Low).interval().as_secs()),
            pid = std::process::id(),
            "feedwatch daemon started"
        );

        if self.config.update_on_start {
            let forced = tree.update_all();
            info!(forced, "Running initial update");
        }

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                event = events.recv() => match event {
                    Ok(SubscriptionEvent::Received { uri, feed }) => {
                        for article in &feed.articles {
                            info!(uri = %uri, title = article.display_title(), "New article");
                        }
                    }
                    Ok(SubscriptionEvent::CollectionChanged) => debug!("Subscriptions changed"),
                    Err(RecvError::Lagged(skipped)) => warn!(skipped, "Event listener fell behind"),
                    Err(RecvError::Closed) => break,
                },
            }
        }

        info!("Daemon shutting down...");
        tree.shutdown().await;
        self.ctx.save()
    }
}

/// Resolves on SIGINT or SIGTERM.
pub async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
            (Ok(mut sigterm), Ok(mut sigint)) => {
                tokio::select! {
                    _ = sigterm.recv() => {},
                    _ = sigint.recv() => {},
                }
            }
            _ => {
                warn!("Failed to install signal handlers, falling back to Ctrl-C");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
