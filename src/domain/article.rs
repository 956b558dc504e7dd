use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Article {
    pub id: String,
    pub title: Option<String>,
    pub summary: Option<String>,
    pub content: Option<String>,
    pub link: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub read: bool,
}

impl Article {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: None,
            summary: None,
            content: None,
            link: None,
            published_at: None,
            read: false,
        }
    }

    /// Resolve the dedup id of an article.
    ///
    /// A non-empty source id wins. Otherwise an id is derived from the link
    /// and title, and `None` is returned when either of those is missing,
    /// which excludes the article from the snapshot.
    pub fn resolve_id(
        source_uri: &str,
        guid: Option<&str>,
        title: Option<&str>,
        link: Option<&str>,
    ) -> Option<String> {
        if let Some(guid) = guid.map(str::trim).filter(|g| !g.is_empty()) {
            return Some(guid.to_string());
        }
        match (title, link) {
            (Some(title), Some(link)) if !title.is_empty() && !link.is_empty() => {
                Some(Self::generate_id(source_uri, link, title))
            }
            _ => None,
        }
    }

    /// Generate a deterministic ID from the source URI, link and title
    pub fn generate_id(source_uri: &str, link: &str, title: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(source_uri.as_bytes());
        hasher.update(link.as_bytes());
        hasher.update(title.as_bytes());
        hex::encode(hasher.finalize())
    }

    pub fn display_title(&self) -> &str {
        self.title.as_deref().unwrap_or("(Untitled)")
    }
}
