//! creel - resumable short-video platform crawler
//!
//! A fault-tolerant crawling core for account-centric platforms: given a
//! list of seed accounts it walks each account's profile, posts, comments
//! and attached shop products through cursor-paginated APIs, with a
//! shared rate limiter, a rotating proxy pool and a durable checkpoint
//! that lets an interrupted run pick up where it left off.
//!
//! # Architecture
//!
//! - [`config`] - Configuration management and settings
//! - [`crawler`] - Orchestrator, worker pool and pagination walker
//! - [`scraper`] - Platform API clients (Douyin, Kuaishou)
//! - [`models`] - Core data structures and types
//! - [`storage`] - Record sinks and the checkpoint store
//! - [`ratelimit`] - Shared token-bucket rate limiter
//! - [`proxy`] - Rotating proxy pool with health tracking
//!
//! # Example
//!
//! ```no_run
//! use creel::prelude::*;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env()?;
//!     config.validate()?;
//!
//!     let scraper = creel::scraper::build_scraper(&config, None)?;
//!     let sink = Arc::new(creel::storage::JsonDirSink::new("output")?);
//!     let checkpoint = Arc::new(CheckpointStore::new(
//!         "data/checkpoint.json",
//!         Duration::from_secs(60),
//!     ));
//!     let limiter = Arc::new(RateLimiter::new(true, 60));
//!
//!     let orchestrator = Orchestrator::new(config, scraper, sink, checkpoint, limiter);
//!     orchestrator.run(vec!["some_account_id".into()]).await;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod crawler;
pub mod error;
pub mod models;
pub mod proxy;
pub mod ratelimit;
pub mod scraper;
pub mod storage;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::crawler::{CrawlSummary, Orchestrator};
    pub use crate::error::{ScrapeError, ScrapeResult, StoreError};
    pub use crate::models::{Comment, Page, Platform, Post, Product, Profile, Record};
    pub use crate::ratelimit::RateLimiter;
    pub use crate::scraper::Scraper;
    pub use crate::storage::checkpoint::CheckpointStore;
    pub use crate::storage::Sink;
}

// Direct re-exports for convenience
pub use models::{Page, Platform, Record};
