use thiserror::Error;

#[derive(Error, Debug)]
pub enum FeedwatchError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Feed not found: {0}")]
    NotFound(String),

    #[error("Feed already subscribed: {0}")]
    AlreadyExists(String),

    #[error("Server fault HTTP {status} from {uri}")]
    ServerFault { uri: String, status: u16 },

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("No subscription node at {0}")]
    NoSuchNode(String),

    #[error("Subscriber failed: {0}")]
    SubscriberFault(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl FeedwatchError {
    /// Faults that the next scheduled tick may recover from.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            FeedwatchError::ServerFault { .. } | FeedwatchError::Timeout(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, FeedwatchError>;
