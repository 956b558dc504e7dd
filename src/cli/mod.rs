pub mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use crate::daemon::DaemonConfig;
use crate::domain::CheckFrequency;

#[derive(Parser)]
#[command(name = "feedwatch")]
#[command(about = "Watches RSS/Atom feeds and reports new articles", long_about = None)]
pub struct Cli {
    /// Path to the configuration file (default: ~/.config/feedwatch/config.toml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Subscribe to a feed after checking that it serves one
    Add {
        /// URL of the feed to add
        url: String,
    },
    /// Unsubscribe from a feed
    Remove {
        /// URL of the feed to remove
        url: String,
    },
    /// Import feeds from an OPML file
    Import {
        /// Path to the OPML file
        path: PathBuf,
    },
    /// List subscriptions with unread counts and tiers
    List,
    /// Show the cached articles of a feed
    Articles {
        /// URL of the feed
        url: String,
        /// Only show unread articles
        #[arg(long)]
        unread: bool,
    },
    /// Mark articles read; without ids every article of the feed
    Read {
        /// URL of the feed
        url: String,
        /// Article ids as shown by `articles`
        ids: Vec<String>,
    },
    /// Drop cached articles of a feed and fetch it again
    Reset {
        /// URL of the feed
        url: String,
    },
    /// Check feeds once; without urls every scheduled feed
    Update {
        /// URLs of the feeds to check
        urls: Vec<String>,
    },
    /// Override how often a feed is checked
    Frequency {
        /// URL of the feed
        url: String,
        #[arg(value_enum)]
        frequency: FrequencyArg,
    },
    /// Monitor feeds until interrupted
    Run {
        /// High tier check interval (e.g., "30m", "1h")
        #[arg(long, value_parser = DaemonConfig::parse_interval)]
        high: Option<u64>,

        /// Low tier check interval (e.g., "6h", "1d")
        #[arg(long, value_parser = DaemonConfig::parse_interval)]
        low: Option<u64>,

        /// Skip the initial update on start
        #[arg(long)]
        no_initial_update: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum FrequencyArg {
    Auto,
    High,
    Low,
    Never,
}

impl From<FrequencyArg> for CheckFrequency {
    fn from(arg: FrequencyArg) -> Self {
        match arg {
            FrequencyArg::Auto => CheckFrequency::Auto,
            FrequencyArg::High => CheckFrequency::High,
            FrequencyArg::Low => CheckFrequency::Low,
            FrequencyArg::Never => CheckFrequency::Never,
        }
    }
}
