//! Checkpoint store for resumable crawling
//!
//! The store keeps the full crawl progress in memory (processed-ID
//! sets, per-parent pagination cursors and aggregate counters) and
//! persists it as a JSON snapshot. Saves go through a temp file and an
//! atomic rename so an interrupted write never corrupts the previous
//! snapshot. Mutations run an auto-save check throttled to the
//! configured interval; `save()` can also be called explicitly and is
//! required at shutdown.
//!
//! Loading tolerates snapshots written by older versions (missing
//! fields default to empty), but an unreadable or undecodable file is a
//! fatal error: resuming from corrupt state is unsafe.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::error::StoreError;

/// Persisted snapshot of crawl progress
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckpointData {
    /// Platform tag for the run that produced this snapshot
    pub platform: String,

    /// When the crawl first started
    pub started_at: DateTime<Utc>,

    /// Last mutation time
    pub updated_at: DateTime<Utc>,

    /// Accounts fully traversed
    pub processed_accounts: HashSet<String>,

    /// Posts fully traversed (comments + product fetched)
    pub processed_posts: HashSet<String>,

    /// Post-pagination cursor per account
    pub post_cursors: HashMap<String, String>,

    /// Comment-pagination cursor per post
    pub comment_cursors: HashMap<String, String>,

    /// Aggregate counters
    pub stats: CheckpointStats,
}

impl Default for CheckpointData {
    fn default() -> Self {
        let now = Utc::now();
        Self {
            platform: String::new(),
            started_at: now,
            updated_at: now,
            processed_accounts: HashSet::new(),
            processed_posts: HashSet::new(),
            post_cursors: HashMap::new(),
            comment_cursors: HashMap::new(),
            stats: CheckpointStats::default(),
        }
    }
}

/// Aggregate record counters
///
/// The counters increment on every mark/record call, including re-marks
/// of an already-processed ID, so across resumed runs they can exceed
/// the set cardinalities. That matches the persisted format this store
/// inherits; consumers wanting exact counts should use the set sizes.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckpointStats {
    pub accounts: u64,
    pub posts: u64,
    pub comments: u64,
    pub products: u64,
}

struct Inner {
    data: CheckpointData,
    last_save: Instant,
}

/// Thread-safe checkpoint store shared by all workers
///
/// A single internal lock serializes every access; file writes happen
/// under the lock, which is acceptable because saves are throttled.
pub struct CheckpointStore {
    path: PathBuf,
    save_interval: Duration,
    inner: Mutex<Inner>,
}

impl CheckpointStore {
    /// Create a store persisting to `path`, auto-saving at most once
    /// per `save_interval`
    pub fn new(path: impl Into<PathBuf>, save_interval: Duration) -> Self {
        Self {
            path: path.into(),
            save_interval,
            inner: Mutex::new(Inner {
                data: CheckpointData::default(),
                last_save: Instant::now(),
            }),
        }
    }

    /// Populate state from the snapshot on disk, if one exists
    ///
    /// A missing file is not an error; the store simply starts empty.
    /// A present-but-unreadable file is fatal.
    pub fn load(&self) -> Result<(), StoreError> {
        if !self.path.exists() {
            info!(path = %self.path.display(), "no checkpoint found, starting fresh");
            return Ok(());
        }

        let file = File::open(&self.path)?;
        let data: CheckpointData = serde_json::from_reader(BufReader::new(file))?;

        let mut inner = self.inner.lock().expect("checkpoint lock poisoned");
        info!(
            path = %self.path.display(),
            accounts = data.processed_accounts.len(),
            posts = data.processed_posts.len(),
            updated_at = %data.updated_at,
            "resumed from checkpoint"
        );
        inner.data = data;
        Ok(())
    }

    /// Serialize the full snapshot and atomically replace the file
    pub fn save(&self) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().expect("checkpoint lock poisoned");
        inner.data.updated_at = Utc::now();
        Self::write_snapshot(&self.path, &inner.data)?;
        inner.last_save = Instant::now();
        debug!(path = %self.path.display(), "checkpoint saved");
        Ok(())
    }

    fn write_snapshot(path: &Path, data: &CheckpointData) -> Result<(), StoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let temp = path.with_extension("json.tmp");
        let file = File::create(&temp)?;
        serde_json::to_writer_pretty(BufWriter::new(file), data)?;
        fs::rename(&temp, path)?;
        Ok(())
    }

    /// Set the platform tag recorded in the snapshot
    pub fn set_platform(&self, platform: &str) {
        let mut inner = self.inner.lock().expect("checkpoint lock poisoned");
        inner.data.platform = platform.to_string();
    }

    /// Record an account as fully processed
    ///
    /// Set membership is idempotent; the counter increments every call.
    pub fn mark_account_processed(&self, account_id: &str) {
        {
            let mut inner = self.inner.lock().expect("checkpoint lock poisoned");
            inner.data.processed_accounts.insert(account_id.to_string());
            inner.data.stats.accounts += 1;
            inner.data.updated_at = Utc::now();
        }
        self.maybe_autosave();
    }

    /// Record a post as fully processed
    pub fn mark_post_processed(&self, post_id: &str) {
        {
            let mut inner = self.inner.lock().expect("checkpoint lock poisoned");
            inner.data.processed_posts.insert(post_id.to_string());
            inner.data.stats.posts += 1;
            inner.data.updated_at = Utc::now();
        }
        self.maybe_autosave();
    }

    pub fn is_account_processed(&self, account_id: &str) -> bool {
        let inner = self.inner.lock().expect("checkpoint lock poisoned");
        inner.data.processed_accounts.contains(account_id)
    }

    pub fn is_post_processed(&self, post_id: &str) -> bool {
        let inner = self.inner.lock().expect("checkpoint lock poisoned");
        inner.data.processed_posts.contains(post_id)
    }

    /// Resume cursor for an account's post listing ("" = start)
    pub fn post_cursor(&self, account_id: &str) -> String {
        let inner = self.inner.lock().expect("checkpoint lock poisoned");
        inner
            .data
            .post_cursors
            .get(account_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Record the latest post-pagination cursor for an account
    pub fn set_post_cursor(&self, account_id: &str, cursor: &str) {
        {
            let mut inner = self.inner.lock().expect("checkpoint lock poisoned");
            inner
                .data
                .post_cursors
                .insert(account_id.to_string(), cursor.to_string());
            inner.data.updated_at = Utc::now();
        }
        self.maybe_autosave();
    }

    /// Resume cursor for a post's comment listing ("" = start)
    pub fn comment_cursor(&self, post_id: &str) -> String {
        let inner = self.inner.lock().expect("checkpoint lock poisoned");
        inner
            .data
            .comment_cursors
            .get(post_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Record the latest comment-pagination cursor for a post
    pub fn set_comment_cursor(&self, post_id: &str, cursor: &str) {
        {
            let mut inner = self.inner.lock().expect("checkpoint lock poisoned");
            inner
                .data
                .comment_cursors
                .insert(post_id.to_string(), cursor.to_string());
            inner.data.updated_at = Utc::now();
        }
        self.maybe_autosave();
    }

    /// Count one stored comment
    pub fn record_comment(&self) {
        {
            let mut inner = self.inner.lock().expect("checkpoint lock poisoned");
            inner.data.stats.comments += 1;
        }
        self.maybe_autosave();
    }

    /// Count one stored product
    pub fn record_product(&self) {
        {
            let mut inner = self.inner.lock().expect("checkpoint lock poisoned");
            inner.data.stats.products += 1;
        }
        self.maybe_autosave();
    }

    /// Current counter snapshot
    pub fn stats(&self) -> CheckpointStats {
        let inner = self.inner.lock().expect("checkpoint lock poisoned");
        inner.data.stats
    }

    /// Save only if the configured interval has elapsed since the last
    /// save. Failures are logged; the crawl continues best-effort.
    fn maybe_autosave(&self) {
        let due = {
            let inner = self.inner.lock().expect("checkpoint lock poisoned");
            inner.last_save.elapsed() >= self.save_interval
        };

        if due {
            if let Err(e) = self.save() {
                warn!(error = %e, "checkpoint auto-save failed");
            }
        }
    }

    #[cfg(test)]
    fn snapshot(&self) -> CheckpointData {
        self.inner
            .lock()
            .expect("checkpoint lock poisoned")
            .data
            .clone()
    }
}
