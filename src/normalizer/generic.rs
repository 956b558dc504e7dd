use chrono::Utc;
use feed_rs::parser;

use crate::domain::{Article, FeedSnapshot};
use crate::normalizer::{clean_text, ContentConverter};

/// Atom, RSS 0.9x/1.0 and JSON Feed through feed-rs.
pub struct GenericFeedConverter;

impl ContentConverter<FeedSnapshot> for GenericFeedConverter {
    fn name(&self) -> &'static str {
        "generic"
    }

    fn convert(&self, uri: &str, body: &[u8]) -> Option<FeedSnapshot> {
        // feed-rs invents ids for entries without one; leave them empty so the
        // title+link fallback or exclusion applies
        let parser = parser::Builder::new()
            .id_generator(|_, _, _| String::new())
            .build();
        let feed = match parser.parse(body) {
            Ok(feed) => feed,
            Err(e) => {
                tracing::debug!(uri, error = %e, "Not a recognized feed document");
                return None;
            }
        };

        let mut snapshot = FeedSnapshot::new(uri);
        snapshot.title = feed.title.and_then(|t| clean_text(&t.content));
        snapshot.description = feed.description.and_then(|d| clean_text(&d.content));
        snapshot.link = feed.links.first().map(|l| l.href.clone());
        snapshot.articles = feed
            .entries
            .into_iter()
            .filter_map(|entry| {
                let title = entry.title.and_then(|t| clean_text(&t.content));
                let link = entry.links.first().map(|l| l.href.clone());
                let id = Article::resolve_id(uri, Some(entry.id.as_str()), title.as_deref(), link.as_deref())?;

                let mut article = Article::new(id);
                article.title = title;
                article.link = link;
                article.summary = entry.summary.and_then(|s| clean_text(&s.content));
                article.content = entry.content.and_then(|c| c.body).and_then(|b| clean_text(&b));
                article.published_at = entry
                    .published
                    .or(entry.updated)
                    .map(|dt| dt.with_timezone(&Utc));
                Some(article)
            })
            .collect();

        Some(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ATOM_SAMPLE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title>Atom Test Feed</title>
  <subtitle>An Atom test feed</subtitle>
  <entry>
    <title>Atom Entry 1</title>
    <link href="http://example.test/atom1"/>
    <id>atom-entry-1</id>
    <updated>2024-01-01T00:00:00Z</updated>
    <summary>This is Atom entry 1</summary>
  </entry>
</feed>"#;

    #[test]
    fn test_parse_atom() {
        let snapshot = GenericFeedConverter
            .convert("http://example.test/atom", ATOM_SAMPLE.as_bytes())
            .unwrap();

        assert_eq!(snapshot.title, Some("Atom Test Feed".into()));
        assert_eq!(snapshot.description, Some("An Atom test feed".into()));
        assert_eq!(snapshot.articles.len(), 1);
        assert_eq!(snapshot.articles[0].id, "atom-entry-1");
        assert_eq!(snapshot.articles[0].link, Some("http://example.test/atom1".into()));
        assert!(snapshot.articles[0].published_at.is_some());
    }

    const ATOM_WITHOUT_IDS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title>No Ids</title>
  <entry>
    <summary>Nothing to identify this entry by</summary>
  </entry>
  <entry>
    <title>Linked Entry</title>
    <link href="http://example.test/linked"/>
    <summary>Identified by title and link</summary>
  </entry>
</feed>"#;

    #[test]
    fn test_entries_without_id() {
        let uri = "http://example.test/atom";
        let first = GenericFeedConverter.convert(uri, ATOM_WITHOUT_IDS.as_bytes()).unwrap();
        let second = GenericFeedConverter.convert(uri, ATOM_WITHOUT_IDS.as_bytes()).unwrap();

        // the bare entry is dropped, the linked one gets a stable derived id
        assert_eq!(first.articles.len(), 1);
        assert_eq!(first.articles[0].title.as_deref(), Some("Linked Entry"));
        assert_eq!(
            first.articles[0].id,
            Article::generate_id(uri, "http://example.test/linked", "Linked Entry")
        );
        assert_eq!(first.articles[0].id, second.articles[0].id);
    }

    #[test]
    fn test_garbage_is_not_this_format() {
        assert!(GenericFeedConverter.convert("u", b"not xml at all").is_none());
    }
}
