use std::path::Path;

use crate::app::{AppContext, FeedwatchError, Result};
use crate::domain::{CheckFrequency, SubscriptionNode};
use crate::monitor::PollOutcome;
use crate::subscription::SubscriptionEvent;

pub async fn add_feed(ctx: &AppContext, url: &str) -> Result<()> {
    let entry = match ctx.tree.register_new_source(url).await {
        Ok(entry) => entry,
        Err(FeedwatchError::AlreadyExists(_)) => {
            println!("Feed already exists: {}", url);
            return Ok(());
        }
        Err(e) => return Err(e),
    };

    println!("Added feed: {}", entry.title);
    let articles = ctx
        .tree
        .cache()
        .metadata(url)?
        .map(|m| m.article_count)
        .unwrap_or(0);
    println!("Fetched {} articles", articles);
    match ctx.tree.tier_of(url) {
        Some(tier) => println!("Checked by the {} tier", tier),
        None => println!("Not scheduled until more articles are published"),
    }

    ctx.save()
}

pub fn remove_feed(ctx: &AppContext, url: &str) -> Result<()> {
    if ctx.tree.remove_entry(url)? {
        println!("Removed feed: {}", url);
    } else {
        println!("Not subscribed: {}", url);
    }
    ctx.save()
}

pub fn list_feeds(ctx: &AppContext) -> Result<()> {
    let roots = ctx.tree.roots();
    if roots.is_empty() {
        println!("No feeds");
        return Ok(());
    }
    print_nodes(ctx, &roots, 0)
}

fn print_nodes(ctx: &AppContext, nodes: &[SubscriptionNode], depth: usize) -> Result<()> {
    let indent = "  ".repeat(depth);
    for node in nodes {
        match node {
            SubscriptionNode::Category(category) => {
                println!("{}{}/", indent, category.title);
                print_nodes(ctx, &category.children, depth + 1)?;
            }
            SubscriptionNode::Entry(entry) => {
                let unread = ctx
                    .tree
                    .cache()
                    .metadata(&entry.uri)?
                    .map(|m| m.unread_count)
                    .unwrap_or(0);
                let tier = match (ctx.tree.tier_of(&entry.uri), entry.frequency) {
                    (Some(tier), _) => tier.to_string(),
                    (None, CheckFrequency::Never) => "never".to_string(),
                    (None, _) => "unscheduled".to_string(),
                };
                println!("{}{} ({} unread) [{}]", indent, entry.title, unread, tier);
                println!("{}  {}", indent, entry.uri);
            }
        }
    }
    Ok(())
}

pub fn list_articles(ctx: &AppContext, url: &str, unread_only: bool) -> Result<()> {
    if !ctx.tree.contains(url) {
        return Err(FeedwatchError::NotFound(url.to_string()));
    }

    let articles = ctx.tree.articles(url)?;
    let mut shown = 0;
    for article in articles.iter().filter(|a| !unread_only || !a.read) {
        let read_marker = if article.read { " " } else { "●" };
        let date = article
            .published_at
            .map(|d| d.format("%Y-%m-%d").to_string())
            .unwrap_or_else(|| "          ".to_string());

        println!("{} {} {}", read_marker, date, article.display_title());
        println!("             {}", article.id);
        shown += 1;
    }

    if shown == 0 {
        println!("No articles");
    }
    Ok(())
}

pub fn mark_read(ctx: &AppContext, url: &str, ids: &[String]) -> Result<()> {
    if !ctx.tree.contains(url) {
        return Err(FeedwatchError::NotFound(url.to_string()));
    }

    if ids.is_empty() {
        let changed = ctx.tree.read_all(url)?;
        println!("Marked {} articles read", changed);
    } else {
        for id in ids {
            if !ctx.tree.mark_read(url, id, true)? {
                eprintln!("  No article {} in {}", id, url);
            }
        }
    }
    ctx.save()
}

pub fn set_frequency(ctx: &AppContext, url: &str, frequency: CheckFrequency) -> Result<()> {
    ctx.tree.set_frequency(url, frequency)?;
    match ctx.tree.tier_of(url) {
        Some(tier) => println!("{} is checked by the {} tier", url, tier),
        None => println!("{} is not scheduled", url),
    }
    ctx.save()
}

pub async fn reset_feed(ctx: &AppContext, url: &str) -> Result<()> {
    ctx.tree.reset(url)?;
    println!("Reset feed: {}", url);
    run_polls(ctx).await?;
    ctx.save()
}

/// Check the given feeds, or every scheduled feed, once.
pub async fn update_feeds(ctx: &AppContext, urls: &[String]) -> Result<usize> {
    let forced = if urls.is_empty() {
        ctx.tree.update_all()
    } else {
        ctx.tree.update(urls)
    };

    if forced == 0 {
        println!("No feeds to update");
        return Ok(0);
    }

    println!("Updating {} feeds...", forced);
    let total_new = run_polls(ctx).await?;
    ctx.save()?;
    Ok(total_new)
}

/// Poll everything due and report per-feed results. Returns the number of
/// new articles.
async fn run_polls(ctx: &AppContext) -> Result<usize> {
    let mut events = ctx.tree.events();
    let results = ctx.tree.poll_due().await;

    let mut total_new = 0;
    while let Ok(event) = events.try_recv() {
        if let SubscriptionEvent::Received { uri, feed } = event {
            if !feed.articles.is_empty() {
                let title = ctx
                    .tree
                    .find(&uri)
                    .map(|e| e.title)
                    .unwrap_or_else(|| uri.clone());
                println!("  {} new articles from {}", feed.articles.len(), title);
            }
            total_new += feed.articles.len();
        }
    }

    let mut errors = 0;
    for (uri, result) in results {
        match result {
            Ok(PollOutcome::Published) => {}
            Ok(PollOutcome::Redirected(status)) => {
                eprintln!("  {} moved ({})", uri, status);
            }
            Ok(PollOutcome::ClientError(status)) | Ok(PollOutcome::Unsupported(status)) => {
                errors += 1;
                eprintln!("  Error updating {}: HTTP {}", uri, status);
            }
            Err(e) => {
                errors += 1;
                eprintln!("  Error updating {}: {}", uri, e);
            }
        }
    }

    println!("Update complete: {} new articles, {} errors", total_new, errors);
    Ok(total_new)
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct ImportSummary {
    pub added: usize,
    pub skipped: usize,
    pub errors: usize,
}

/// Import feeds from an OPML file
pub async fn import_opml(ctx: &AppContext, path: &Path) -> Result<ImportSummary> {
    let content = std::fs::read_to_string(path)?;
    let feeds = parse_opml(&content);

    let mut summary = ImportSummary::default();
    if feeds.is_empty() {
        println!("No feeds found in OPML file");
        return Ok(summary);
    }

    println!("Found {} feeds in OPML file", feeds.len());

    for (title, url) in feeds {
        match ctx.tree.register_new_source(&url).await {
            Ok(entry) => {
                let articles = ctx
                    .tree
                    .cache()
                    .metadata(&url)?
                    .map(|m| m.article_count)
                    .unwrap_or(0);
                println!("  + {} ({} articles)", entry.title, articles);
                summary.added += 1;
            }
            Err(FeedwatchError::AlreadyExists(_)) => summary.skipped += 1,
            Err(e) => {
                eprintln!("  ! {} - {}", title, e);
                summary.errors += 1;
            }
        }
    }

    println!(
        "\nImport complete: {} added, {} skipped (already exist), {} errors",
        summary.added, summary.skipped, summary.errors
    );

    ctx.save()?;
    Ok(summary)
}

/// Parse OPML content and extract feed URLs with titles
fn parse_opml(content: &str) -> Vec<(String, String)> {
    let mut feeds = Vec::new();

    // one outline element per line, as written by common readers
    for line in content.lines() {
        if !line.contains("xmlUrl") {
            continue;
        }
        if let Some(url) = extract_attr(line, "xmlUrl") {
            let title = extract_attr(line, "title")
                .or_else(|| extract_attr(line, "text"))
                .unwrap_or_else(|| url.clone());
            feeds.push((title, url));
        }
    }

    feeds
}

/// Extract an attribute value from an XML element string
fn extract_attr(line: &str, attr: &str) -> Option<String> {
    let pattern = format!(" {}=\"", attr);
    let start = line.find(&pattern)? + pattern.len();
    let rest = &line[start..];
    let end = rest.find('"')?;
    let value = &rest[..end];
    Some(html_escape::decode_html_entities(value).to_string())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use reqwest::StatusCode;

    use super::*;
    use crate::config::Config;
    use crate::fetcher::{FetchResponse, Fetcher, RequestOptions};

    const FEED: &str = r#"<?xml version="1.0"?><rss version="2.0"><channel><title>Blog</title><link>http://blog.test/</link><description>d</description><item><guid>a</guid><title>A</title></item></channel></rss>"#;

    const OPML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<opml version="2.0">
  <body>
    <outline text="Tech">
      <outline type="rss" text="Blog &amp; Co" xmlUrl="http://blog.test/rss"/>
      <outline type="rss" title="Down" text="ignored" xmlUrl="http://down.test/rss"/>
      <outline type="rss" xmlUrl="http://bare.test/rss"/>
    </outline>
  </body>
</opml>"#;

    #[derive(Default)]
    struct FakeWeb {
        pages: Mutex<HashMap<String, String>>,
    }

    #[async_trait]
    impl Fetcher for FakeWeb {
        async fn fetch(&self, url: &str, _options: &RequestOptions) -> Result<FetchResponse> {
            match self.pages.lock().unwrap().get(url) {
                Some(body) => Ok(FetchResponse {
                    status: StatusCode::OK,
                    body: body.clone().into_bytes(),
                }),
                None => Err(FeedwatchError::Timeout(url.to_string())),
            }
        }
    }

    #[test]
    fn test_parse_opml() {
        let feeds = parse_opml(OPML);
        assert_eq!(
            feeds,
            vec![
                ("Blog & Co".to_string(), "http://blog.test/rss".to_string()),
                ("Down".to_string(), "http://down.test/rss".to_string()),
                ("http://bare.test/rss".to_string(), "http://bare.test/rss".to_string()),
            ]
        );
    }

    #[test]
    fn test_extract_attr_matches_whole_name() {
        let line = r#"<outline htmlUrl="http://site.test/" xmlUrl="http://site.test/rss"/>"#;
        assert_eq!(extract_attr(line, "xmlUrl").as_deref(), Some("http://site.test/rss"));
        assert_eq!(extract_attr(line, "Url"), None);
    }

    #[tokio::test]
    async fn test_import_counts_outcomes() {
        let dir = tempfile::tempdir().unwrap();
        let opml = dir.path().join("feeds.opml");
        std::fs::write(&opml, OPML).unwrap();

        let web = Arc::new(FakeWeb::default());
        for uri in ["http://blog.test/rss", "http://bare.test/rss"] {
            web.pages.lock().unwrap().insert(uri.to_string(), FEED.to_string());
        }
        let ctx = AppContext::open(Config::default(), dir.path().join("data"), web).unwrap();

        let summary = import_opml(&ctx, &opml).await.unwrap();
        assert_eq!(
            summary,
            ImportSummary {
                added: 2,
                skipped: 0,
                errors: 1
            }
        );
        assert!(ctx.subscriptions_path().exists());

        let again = import_opml(&ctx, &opml).await.unwrap();
        assert_eq!(again.skipped, 2);
        assert_eq!(ctx.tree.len(), 2);
    }

    #[tokio::test]
    async fn test_update_without_scheduled_feeds() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = AppContext::open(
            Config::default(),
            dir.path().to_path_buf(),
            Arc::new(FakeWeb::default()),
        )
        .unwrap();
        assert_eq!(update_feeds(&ctx, &[]).await.unwrap(), 0);
    }
}
