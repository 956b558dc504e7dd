pub mod http_fetcher;

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;

use crate::app::Result;

pub use http_fetcher::HttpFetcher;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);
pub const DEFAULT_USER_AGENT: &str = concat!("feedwatch/", env!("CARGO_PKG_VERSION"));

/// Per-request settings, read fresh for every request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestOptions {
    pub timeout: Duration,
    pub user_agent: String,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

/// A completed HTTP response.
#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub status: StatusCode,
    pub body: Vec<u8>,
}

#[async_trait]
pub trait Fetcher {
    /// Issue one GET request. Network failures and timeouts are errors;
    /// any status code is a successful response.
    async fn fetch(&self, url: &str, options: &RequestOptions) -> Result<FetchResponse>;
}
