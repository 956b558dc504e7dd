//! # feedwatch
//!
//! Background monitoring of RSS/Atom feeds.
//!
//! ## Architecture
//!
//! ```text
//! Fetcher → Normalizer → Monitor → Subscription tree → Item cache
//! ```
//!
//! Sources are split between two monitors: the High tier checks sources
//! that publish often, the Low tier checks the rest. After every successful
//! poll the subscription tree merges the new articles into the item cache,
//! re-estimates the source's posting cadence and moves it between tiers
//! when that cadence crosses the configured threshold.
//!
//! ## Quick Start
//!
//! ```bash
//! # Add a feed
//! feedwatch add https://blog.rust-lang.org/feed.xml
//!
//! # List feeds
//! feedwatch list
//!
//! # Check all scheduled feeds once
//! feedwatch update
//!
//! # Keep monitoring until interrupted
//! feedwatch run
//! ```

/// Application context and error handling.
///
/// The [`AppContext`](app::AppContext) struct wires together the item cache,
/// the fetcher and the subscription tree.
pub mod app;

/// Configuration management.
///
/// Loads from `~/.config/feedwatch/config.toml`: request settings, tier
/// intervals, the cadence threshold and storage location.
pub mod config;

/// Long-running monitor process used by `feedwatch run`.
pub mod daemon;

/// Command-line interface using clap.
pub mod cli;

/// Core domain models.
///
/// - [`Article`](domain::Article): One item of a feed, with its read flag
/// - [`FeedSnapshot`](domain::FeedSnapshot): A parsed poll result
/// - [`SubscriptionNode`](domain::SubscriptionNode): Categories and entries
pub mod domain;

/// HTTP fetching.
///
/// - [`Fetcher`](fetcher::Fetcher): Async trait for issuing requests
/// - [`HttpFetcher`](fetcher::http_fetcher::HttpFetcher): reqwest-based implementation
pub mod fetcher;

/// Response classification and feed parsing.
///
/// Converts RSS 0.9x/1.0/2.0, Atom and JSON Feed documents into
/// [`FeedSnapshot`](domain::FeedSnapshot)s.
pub mod normalizer;

/// Periodic polling of registered sources.
pub mod monitor;

/// Item cache with lazy hydration over SQLite.
pub mod store;

/// The subscription tree and its two-tier scheduling.
pub mod subscription;
