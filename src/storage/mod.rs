//! Record sinks
//!
//! A sink accepts one finished record at a time, tagged by kind, and
//! stores it keyed by its identifier. Sink failures are logged by the
//! orchestrator and never abort the crawl.
//!
//! Two backends: [`JsonDirSink`] writes one pretty-printed JSON file
//! per record, [`SqliteSink`] upserts into a relational schema.

pub mod checkpoint;

use async_trait::async_trait;
use rusqlite::{params, Connection};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::debug;

use crate::error::StoreError;
use crate::models::{Platform, Record};

/// Destination for finished records
#[async_trait]
pub trait Sink: Send + Sync {
    async fn store(&self, record: &Record) -> Result<(), StoreError>;
}

// ============================================================================
// JSON directory sink
// ============================================================================

/// Writes each record to `<dir>/<kind>_<id>.json`
pub struct JsonDirSink {
    dir: PathBuf,
}

impl JsonDirSink {
    /// Create the sink, ensuring the output directory exists
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }
}

#[async_trait]
impl Sink for JsonDirSink {
    async fn store(&self, record: &Record) -> Result<(), StoreError> {
        let path = self
            .dir
            .join(format!("{}_{}.json", record.kind(), record.id()));
        let body = serde_json::to_vec_pretty(record)?;
        tokio::fs::write(&path, body).await?;
        debug!(path = %path.display(), "record written");
        Ok(())
    }
}

// ============================================================================
// SQLite sink
// ============================================================================

/// Upserts records into accounts/posts/comments/products tables
///
/// rusqlite is synchronous; writes are short single-row upserts, so the
/// connection sits behind a plain mutex rather than a blocking-task
/// round trip.
pub struct SqliteSink {
    conn: Mutex<Connection>,
    platform: Platform,
}

impl SqliteSink {
    /// Open (or create) the database and its schema
    pub fn new(path: &Path, platform: Platform) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            platform,
        })
    }

    /// In-memory database, used by tests
    pub fn in_memory(platform: Platform) -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            platform,
        })
    }

    fn init_schema(conn: &Connection) -> Result<(), StoreError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS accounts (
                account_id  TEXT PRIMARY KEY,
                nickname    TEXT NOT NULL,
                followers   INTEGER NOT NULL,
                following   INTEGER NOT NULL,
                description TEXT,
                tags        TEXT,
                platform    TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS posts (
                post_id     TEXT PRIMARY KEY,
                account_id  TEXT NOT NULL,
                title       TEXT,
                description TEXT,
                likes       INTEGER NOT NULL,
                comments    INTEGER NOT NULL,
                shares      INTEGER NOT NULL,
                tags        TEXT,
                product_id  TEXT,
                platform    TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_posts_account ON posts(account_id);
            CREATE TABLE IF NOT EXISTS comments (
                comment_id  TEXT PRIMARY KEY,
                post_id     TEXT NOT NULL,
                account_id  TEXT NOT NULL,
                content     TEXT NOT NULL,
                likes       INTEGER NOT NULL,
                replies     INTEGER NOT NULL,
                timestamp   INTEGER NOT NULL,
                platform    TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_comments_post ON comments(post_id);
            CREATE TABLE IF NOT EXISTS products (
                product_id  TEXT PRIMARY KEY,
                name        TEXT NOT NULL,
                price       REAL NOT NULL,
                category    TEXT,
                description TEXT,
                sales       INTEGER NOT NULL,
                platform    TEXT NOT NULL
            );",
        )?;
        Ok(())
    }

    fn upsert(&self, record: &Record) -> Result<(), StoreError> {
        let conn = self.conn.lock().expect("sqlite lock poisoned");
        let platform = self.platform.as_str();

        match record {
            Record::Profile(p) => {
                conn.execute(
                    "INSERT INTO accounts
                         (account_id, nickname, followers, following, description, tags, platform)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                     ON CONFLICT(account_id) DO UPDATE SET
                         nickname = excluded.nickname,
                         followers = excluded.followers,
                         following = excluded.following,
                         description = excluded.description,
                         tags = excluded.tags",
                    params![
                        p.account_id,
                        p.nickname,
                        p.followers,
                        p.following,
                        p.description,
                        p.tags.join(","),
                        platform
                    ],
                )?;
            }
            Record::Post(p) => {
                conn.execute(
                    "INSERT INTO posts
                         (post_id, account_id, title, description, likes, comments, shares,
                          tags, product_id, platform)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                     ON CONFLICT(post_id) DO UPDATE SET
                         likes = excluded.likes,
                         comments = excluded.comments,
                         shares = excluded.shares",
                    params![
                        p.post_id,
                        p.user_id,
                        p.title,
                        p.description,
                        p.likes,
                        p.comments,
                        p.shares,
                        p.tags.join(","),
                        p.product_id(),
                        platform
                    ],
                )?;
            }
            Record::Comment(c) => {
                conn.execute(
                    "INSERT INTO comments
                         (comment_id, post_id, account_id, content, likes, replies,
                          timestamp, platform)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                     ON CONFLICT(comment_id) DO UPDATE SET
                         likes = excluded.likes,
                         replies = excluded.replies",
                    params![
                        c.comment_id,
                        c.post_id,
                        c.user_id,
                        c.content,
                        c.likes,
                        c.replies,
                        c.timestamp,
                        platform
                    ],
                )?;
            }
            Record::Product(p) => {
                conn.execute(
                    "INSERT INTO products
                         (product_id, name, price, category, description, sales, platform)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                     ON CONFLICT(product_id) DO UPDATE SET
                         price = excluded.price,
                         sales = excluded.sales",
                    params![
                        p.product_id,
                        p.name,
                        p.price,
                        p.category,
                        p.description,
                        p.sales,
                        platform
                    ],
                )?;
            }
        }

        Ok(())
    }

    #[cfg(test)]
    fn count(&self, table: &str) -> i64 {
        let conn = self.conn.lock().expect("sqlite lock poisoned");
        conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |r| r.get(0))
            .unwrap()
    }
}

#[async_trait]
impl Sink for SqliteSink {
    async fn store(&self, record: &Record) -> Result<(), StoreError> {
        self.upsert(record)
    }
}
