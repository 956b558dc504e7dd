use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use rusqlite_migration::{Migrations, M};

use crate::app::{FeedwatchError, Result};
use crate::domain::Article;
use crate::store::{CacheEntry, CacheStore};

pub struct SqliteCacheStore {
    conn: Mutex<Connection>,
}

impl SqliteCacheStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.run_migrations()?;
        Ok(store)
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.run_migrations()?;
        Ok(store)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|e| {
            FeedwatchError::Database(rusqlite::Error::SqliteFailure(
                rusqlite::ffi::Error::new(1),
                Some(e.to_string()),
            ))
        })
    }

    fn run_migrations(&self) -> Result<()> {
        let migrations = Migrations::new(vec![M::up(include_str!(
            "../../migrations/001-initial/up.sql"
        ))]);

        let mut conn = self.conn()?;
        conn.execute("PRAGMA foreign_keys = ON", [])?;
        migrations
            .to_latest(&mut conn)
            .map_err(|_| FeedwatchError::Database(rusqlite::Error::InvalidQuery))?;

        Ok(())
    }

    fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
    }
}

impl CacheStore for SqliteCacheStore {
    fn load_metadata(&self, uri: &str) -> Result<Option<CacheEntry>> {
        let conn = self.conn()?;

        let result = conn
            .query_row(
                "SELECT uri, title, description, link, last_checked, cadence_secs,
                        article_count, unread_count
                 FROM feeds WHERE uri = ?1",
                params![uri],
                |row| {
                    Ok(CacheEntry {
                        uri: row.get(0)?,
                        title: row.get(1)?,
                        description: row.get(2)?,
                        link: row.get(3)?,
                        last_checked: row
                            .get::<_, Option<String>>(4)?
                            .and_then(|s| Self::parse_datetime(&s)),
                        cadence: row.get::<_, Option<i64>>(5)?.and_then(Duration::try_seconds),
                        article_count: row.get::<_, i64>(6)? as usize,
                        unread_count: row.get::<_, i64>(7)? as usize,
                        articles: None,
                    })
                },
            )
            .optional()?;

        Ok(result)
    }

    fn load_articles(&self, uri: &str) -> Result<Vec<Article>> {
        let conn = self.conn()?;

        let mut stmt = conn.prepare(
            "SELECT id, title, summary, content, link, published_at, is_read
             FROM articles WHERE feed_uri = ?1 ORDER BY position",
        )?;

        let articles = stmt
            .query_map(params![uri], |row| {
                Ok(Article {
                    id: row.get(0)?,
                    title: row.get(1)?,
                    summary: row.get(2)?,
                    content: row.get(3)?,
                    link: row.get(4)?,
                    published_at: row
                        .get::<_, Option<String>>(5)?
                        .and_then(|s| Self::parse_datetime(&s)),
                    read: row.get(6)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(articles)
    }

    fn save(&self, entry: &CacheEntry) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        tx.execute(
            "INSERT INTO feeds (uri, title, description, link, last_checked, cadence_secs,
                                article_count, unread_count)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(uri) DO UPDATE SET
                title = excluded.title,
                description = excluded.description,
                link = excluded.link,
                last_checked = excluded.last_checked,
                cadence_secs = excluded.cadence_secs,
                article_count = excluded.article_count,
                unread_count = excluded.unread_count",
            params![
                entry.uri,
                entry.title,
                entry.description,
                entry.link,
                entry.last_checked.map(|dt| dt.to_rfc3339()),
                entry.cadence.map(|d| d.num_seconds()),
                entry.article_count as i64,
                entry.unread_count as i64,
            ],
        )?;

        if let Some(ref articles) = entry.articles {
            tx.execute("DELETE FROM articles WHERE feed_uri = ?1", params![entry.uri])?;
            for (position, article) in articles.iter().enumerate() {
                tx.execute(
                    "INSERT OR IGNORE INTO articles
                        (feed_uri, id, position, title, summary, content, link, published_at, is_read)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                    params![
                        entry.uri,
                        article.id,
                        position as i64,
                        article.title,
                        article.summary,
                        article.content,
                        article.link,
                        article.published_at.map(|dt| dt.to_rfc3339()),
                        article.read,
                    ],
                )?;
            }
        }

        tx.commit()?;
        Ok(())
    }

    fn delete(&self, uri: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute("DELETE FROM feeds WHERE uri = ?1", params![uri])?;
        Ok(())
    }
}
