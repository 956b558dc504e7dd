use async_trait::async_trait;
use reqwest::header::{HeaderValue, USER_AGENT};
use reqwest::{redirect, Client};

use crate::app::{FeedwatchError, Result};
use crate::fetcher::{FetchResponse, Fetcher, RequestOptions, DEFAULT_USER_AGENT};

/// Redirect hops followed before the last 3xx is handed back as a response.
const MAX_REDIRECTS: usize = 10;

/// reqwest-backed fetcher.
///
/// Redirects with a `Location` are followed, so a 3xx only reaches the
/// classifier for 304 Not Modified, 300 Multiple Choices, a 3xx without a
/// `Location`, or a chain longer than [`MAX_REDIRECTS`].
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .gzip(true)
            .brotli(true)
            .user_agent(DEFAULT_USER_AGENT)
            .redirect(redirect::Policy::limited(MAX_REDIRECTS))
            .build()?;

        Ok(Self { client })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str, options: &RequestOptions) -> Result<FetchResponse> {
        let mut request = self.client.get(url).timeout(options.timeout);

        match HeaderValue::from_str(&options.user_agent) {
            Ok(value) => request = request.header(USER_AGENT, value),
            Err(_) => tracing::warn!(user_agent = %options.user_agent, "Invalid user agent ignored"),
        }

        let response = request.send().await.map_err(|e| map_error(url, e))?;
        let status = response.status();
        let body = response.bytes().await.map_err(|e| map_error(url, e))?.to_vec();

        Ok(FetchResponse { status, body })
    }
}

fn map_error(url: &str, err: reqwest::Error) -> FeedwatchError {
    if err.is_timeout() {
        FeedwatchError::Timeout(url.to_string())
    } else {
        FeedwatchError::Http(err)
    }
}
