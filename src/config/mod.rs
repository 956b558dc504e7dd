//! Configuration management for feedwatch.
//!
//! Configuration is read from `~/.config/feedwatch/config.toml` at startup.
//! If the file doesn't exist, a default configuration with comments is created.

use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::fetcher::{RequestOptions, DEFAULT_USER_AGENT};
use crate::monitor::TierSettings;
use crate::subscription::{SchedulePolicy, TreeSettings};

/// Main configuration struct.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub monitor: MonitorConfig,
    pub schedule: ScheduleConfig,
    pub storage: StorageConfig,
}

/// Polling of the two monitor tiers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// User agent sent with every request
    pub user_agent: String,

    /// Per-request timeout in milliseconds (default: 2000)
    pub timeout_ms: u64,

    /// Timer resolution of each tier in seconds (default: 60)
    pub tick_secs: u64,

    /// Maximum random delay added per source in seconds (default: 30)
    pub jitter_secs: u64,

    /// High tier check interval in seconds (default: 3600)
    pub high_interval_secs: u64,

    /// Low tier check interval in seconds (default: 86400)
    pub low_interval_secs: u64,

    pub high_initial_delay_secs: u64,
    pub low_initial_delay_secs: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            timeout_ms: 2000,
            tick_secs: 60,
            jitter_secs: 30,
            high_interval_secs: 3600,
            low_interval_secs: 86400,
            high_initial_delay_secs: 3,
            low_initial_delay_secs: 60,
        }
    }
}

impl MonitorConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn tier(&self, interval_secs: u64) -> TierSettings {
        TierSettings {
            interval: Duration::from_secs(interval_secs),
            tick: Duration::from_secs(self.tick_secs),
            max_jitter: Duration::from_secs(self.jitter_secs),
        }
    }

    pub fn request_options(&self) -> RequestOptions {
        RequestOptions {
            timeout: self.timeout(),
            user_agent: self.user_agent.clone(),
        }
    }
}

/// Tier assignment thresholds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    /// Average publish gap at or under which a source is High (default: 3 days)
    pub high_cadence_secs: u64,

    /// Fewer dated articles than this leave a source unassigned (default: 2)
    pub min_samples: usize,

    /// How many of the newest articles feed the cadence estimate (default: 10)
    pub sample_window: usize,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            high_cadence_secs: 259200,
            min_samples: 2,
            sample_window: 10,
        }
    }
}

impl ScheduleConfig {
    pub fn policy(&self) -> Result<SchedulePolicy, ConfigError> {
        let high_cadence = i64::try_from(self.high_cadence_secs)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .ok_or(ConfigError::InvalidValue {
                key: "schedule.high_cadence_secs",
                value: self.high_cadence_secs,
            })?;
        Ok(SchedulePolicy::new(high_cadence))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding the subscription list and the cache database
    pub data_dir: Option<PathBuf>,

    /// Debounce window for subscription list saves in milliseconds (default: 1000)
    pub autosave_ms: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            autosave_ms: 1000,
        }
    }
}

impl StorageConfig {
    pub fn autosave_window(&self) -> Duration {
        Duration::from_millis(self.autosave_ms)
    }
}

impl Config {
    /// Load configuration from the default path.
    ///
    /// If the config file doesn't exist, creates a default one with comments.
    /// If the config file exists but is invalid, returns an error.
    /// Missing fields in the config file will use default values.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::default_config_path()?;
        Self::load_from(&config_path)
    }

    /// Load configuration from `path`, creating a commented default there
    /// when it is missing.
    pub fn load_from(config_path: &Path) -> Result<Self, ConfigError> {
        if !config_path.exists() {
            Self::create_default_config(config_path)?;
            return Ok(Self::default());
        }

        let content = fs::read_to_string(config_path).map_err(|e| ConfigError::Io {
            path: config_path.to_path_buf(),
            source: e,
        })?;

        let config: Config = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: config_path.to_path_buf(),
            source: e,
        })?;
        config.tree_settings()?;

        Ok(config)
    }

    /// Get the default config file path: `~/.config/feedwatch/config.toml`
    pub fn default_config_path() -> Result<PathBuf, ConfigError> {
        let config_dir = dirs::config_dir().ok_or(ConfigError::NoConfigDir)?;
        Ok(config_dir.join("feedwatch").join("config.toml"))
    }

    /// Settings for the subscription tree and its two tiers.
    pub fn tree_settings(&self) -> Result<TreeSettings, ConfigError> {
        let monitor = &self.monitor;
        Ok(TreeSettings {
            high: monitor.tier(monitor.high_interval_secs),
            low: monitor.tier(monitor.low_interval_secs),
            high_initial_delay: Duration::from_secs(monitor.high_initial_delay_secs),
            low_initial_delay: Duration::from_secs(monitor.low_initial_delay_secs),
            policy: self.schedule.policy()?,
            request: monitor.request_options(),
        })
    }

    /// Create a default config file with comments.
    fn create_default_config(path: &Path) -> Result<(), ConfigError> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| ConfigError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        let default_config = Self::default_config_content();

        let mut file = fs::File::create(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;

        file.write_all(default_config.as_bytes())
            .map_err(|e| ConfigError::Io {
                path: path.to_path_buf(),
                source: e,
            })?;

        Ok(())
    }

    /// Generate the default config file content with comments.
    fn default_config_content() -> String {
        format!(
            r##"# feedwatch configuration
#
# Sources are split between two tiers. Sources that publish often are
# checked by the High tier, the rest by the Low tier. Sources with too
# little history are not checked until they are reset or given an
# explicit frequency.

[monitor]
# User agent sent with every request
user_agent = "{DEFAULT_USER_AGENT}"

# Per-request timeout in milliseconds
timeout_ms = 2000

# How often each tier looks for due sources, in seconds
tick_secs = 60

# Maximum random delay added per source, in seconds
jitter_secs = 30

# Minimum time between two checks of one source, per tier, in seconds
high_interval_secs = 3600
low_interval_secs = 86400

# Delay before the first check after startup, in seconds
high_initial_delay_secs = 3
low_initial_delay_secs = 60

[schedule]
# Sources whose average gap between posts is at or under this many
# seconds go to the High tier
high_cadence_secs = 259200

# Sources with fewer dated articles than this stay unassigned
min_samples = 2

# Number of most recent articles used to estimate the posting cadence
sample_window = 10

[storage]
# Directory for the subscription list and cache database
# (default: the platform data directory)
# data_dir = "/home/me/.local/share/feedwatch"

# Subscription list changes within this window are saved together
autosave_ms = 1000
"##
        )
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Could not determine config directory")]
    NoConfigDir,

    #[error("Failed to read/write config file at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file at {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Invalid value {value} for {key}")]
    InvalidValue { key: &'static str, value: u64 },
}
