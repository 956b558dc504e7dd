use chrono::{DateTime, Utc};

use crate::domain::{Article, FeedSnapshot};
use crate::normalizer::{clean_text, ContentConverter};

/// RSS 2.0: a `channel` element containing `item` elements.
pub struct Rss2Converter;

impl ContentConverter<FeedSnapshot> for Rss2Converter {
    fn name(&self) -> &'static str {
        "rss2"
    }

    fn convert(&self, uri: &str, body: &[u8]) -> Option<FeedSnapshot> {
        let channel = match rss::Channel::read_from(body) {
            Ok(channel) => channel,
            Err(e) => {
                tracing::debug!(uri, error = %e, "Not an RSS 2.0 document");
                return None;
            }
        };

        let mut snapshot = FeedSnapshot::new(uri);
        snapshot.title = clean_text(channel.title());
        snapshot.description = clean_text(channel.description());
        snapshot.link = non_empty(channel.link());
        snapshot.articles = channel
            .items()
            .iter()
            .filter_map(|item| convert_item(uri, item))
            .collect();

        Some(snapshot)
    }
}

fn convert_item(uri: &str, item: &rss::Item) -> Option<Article> {
    let title = item.title().and_then(clean_text);
    let link = item.link().and_then(non_empty);
    let id = Article::resolve_id(
        uri,
        item.guid().map(|g| g.value()),
        title.as_deref(),
        link.as_deref(),
    )?;

    let mut article = Article::new(id);
    article.title = title;
    article.link = link;
    article.summary = item.description().and_then(clean_text);
    article.content = item.content().and_then(clean_text);
    article.published_at = item.pub_date().and_then(parse_date);
    Some(article)
}

fn parse_date(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(value.trim())
        .or_else(|_| DateTime::parse_from_rfc3339(value.trim()))
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}

fn non_empty(s: &str) -> Option<String> {
    let s = s.trim();
    if s.is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}
