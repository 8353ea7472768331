//! Configuration management for the creel crawler
//!
//! This module handles loading and validating configuration from
//! environment variables, TOML files, and command-line arguments.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::models::Platform;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Crawler configuration
    pub crawler: CrawlerConfig,

    /// Rate limiter configuration
    pub ratelimit: RateLimitConfig,

    /// Checkpoint configuration
    pub checkpoint: CheckpointConfig,

    /// Proxy pool configuration
    pub proxy: ProxyConfig,

    /// Storage configuration
    pub storage: StorageConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Crawler-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CrawlerConfig {
    /// Platform to crawl
    pub platform: Platform,

    /// Number of concurrent workers
    pub concurrency: usize,

    /// Timeout in seconds. One knob with three uses: the per-request
    /// timeout, the retry backoff, and the between-seed pacing sleep.
    pub timeout_secs: u64,

    /// Maximum retries per paginated resource
    pub max_retries: u32,

    /// User agent sent with every request
    pub user_agent: String,

    /// Session cookie string (required for both platforms)
    pub cookies: String,

    /// Pacing sleep between successive posts, in seconds
    pub post_delay_secs: u64,

    /// Pacing sleep between post-list pages, in seconds
    pub post_page_delay_secs: u64,

    /// Pacing sleep between comment-list pages, in seconds
    pub comment_page_delay_secs: u64,
}

/// Rate limiter configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Enable the shared token bucket
    pub enabled: bool,

    /// Bucket capacity: requests allowed per minute
    pub requests_per_minute: u32,
}

/// Checkpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckpointConfig {
    /// Enable checkpointing
    pub enabled: bool,

    /// Minimum seconds between auto-saves
    pub interval_secs: u64,

    /// Checkpoint file path
    pub file: PathBuf,
}

/// Proxy pool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// Enable the rotating proxy pool
    pub enabled: bool,

    /// Proxy list file path
    pub file: PathBuf,

    /// Endpoint probed when validating a proxy
    pub test_url: String,

    /// Failures after which a proxy is no longer handed out
    pub max_failures: u32,

    /// Seconds between background validation sweeps
    pub validation_interval_secs: u64,
}

/// Storage (sink) configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Sink backend: "json" or "sqlite"
    pub backend: String,

    /// Output directory for the JSON sink
    pub output_dir: PathBuf,

    /// Database path for the SQLite sink
    pub sqlite_path: PathBuf,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (text, json)
    pub format: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Some(platform) = env_var("CREEL_PLATFORM") {
            config.crawler.platform = platform
                .parse()
                .map_err(|e: String| anyhow::anyhow!(e))
                .context("CREEL_PLATFORM")?;
        }
        if let Some(v) = env_parse::<usize>("CREEL_CONCURRENCY") {
            config.crawler.concurrency = v;
        }
        if let Some(v) = env_parse::<u64>("CREEL_TIMEOUT") {
            config.crawler.timeout_secs = v;
        }
        if let Some(v) = env_parse::<u32>("CREEL_MAX_RETRIES") {
            config.crawler.max_retries = v;
        }
        if let Some(v) = env_var("CREEL_USER_AGENT") {
            config.crawler.user_agent = v;
        }
        if let Some(v) = env_var("CREEL_COOKIES") {
            config.crawler.cookies = v;
        }
        if let Some(v) = env_parse::<u32>("CREEL_REQUESTS_PER_MINUTE") {
            config.ratelimit.requests_per_minute = v;
        }
        if let Some(v) = env_var("CREEL_CHECKPOINT_FILE") {
            config.checkpoint.file = v.into();
        }
        if let Some(v) = env_parse::<u64>("CREEL_CHECKPOINT_INTERVAL") {
            config.checkpoint.interval_secs = v;
        }
        if let Some(v) = env_var("CREEL_PROXY_FILE") {
            config.proxy.file = v.into();
            config.proxy.enabled = true;
        }
        if let Some(v) = env_var("CREEL_OUTPUT_DIR") {
            config.storage.output_dir = v.into();
        }
        if let Some(v) = env_var("CREEL_LOG_LEVEL") {
            config.logging.level = v;
        }

        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse TOML config file: {}", path.display()))?;

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.crawler.concurrency == 0 {
            anyhow::bail!("concurrency must be greater than 0");
        }

        if self.ratelimit.enabled && self.ratelimit.requests_per_minute == 0 {
            anyhow::bail!("requests_per_minute must be greater than 0");
        }

        if self.proxy.enabled && self.proxy.max_failures == 0 {
            anyhow::bail!("proxy max_failures must be greater than 0");
        }

        match self.storage.backend.as_str() {
            "json" | "sqlite" => {}
            other => anyhow::bail!("unknown storage backend: {other}"),
        }

        Ok(())
    }

    /// Per-request timeout as Duration
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.crawler.timeout_secs)
    }

    /// Retry backoff / inter-seed pacing as Duration (same knob)
    #[must_use]
    pub fn backoff(&self) -> Duration {
        Duration::from_secs(self.crawler.timeout_secs)
    }

    /// Pacing sleep between posts
    #[must_use]
    pub fn post_delay(&self) -> Duration {
        Duration::from_secs(self.crawler.post_delay_secs)
    }

    /// Pacing sleep between post-list pages
    #[must_use]
    pub fn post_page_delay(&self) -> Duration {
        Duration::from_secs(self.crawler.post_page_delay_secs)
    }

    /// Pacing sleep between comment-list pages
    #[must_use]
    pub fn comment_page_delay(&self) -> Duration {
        Duration::from_secs(self.crawler.comment_page_delay_secs)
    }
}

fn env_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env_var(key).and_then(|v| v.parse().ok())
}

impl Default for Config {
    fn default() -> Self {
        Self {
            crawler: CrawlerConfig::default(),
            ratelimit: RateLimitConfig::default(),
            checkpoint: CheckpointConfig::default(),
            proxy: ProxyConfig::default(),
            storage: StorageConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            platform: Platform::Douyin,
            concurrency: 5,
            timeout_secs: 30,
            max_retries: 3,
            user_agent: String::from(
                "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 \
                 (KHTML, like Gecko) Chrome/122.0.0.0 Safari/537.36",
            ),
            cookies: String::new(),
            post_delay_secs: 2,
            post_page_delay_secs: 5,
            comment_page_delay_secs: 3,
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            requests_per_minute: 60,
        }
    }
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 60,
            file: PathBuf::from("data/checkpoint.json"),
        }
    }
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            file: PathBuf::from("data/proxies.json"),
            test_url: String::from("https://www.baidu.com"),
            max_failures: 3,
            validation_interval_secs: 30 * 60,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: String::from("json"),
            output_dir: PathBuf::from("output"),
            sqlite_path: PathBuf::from("data/creel.db"),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: String::from("info"),
            format: String::from("text"),
        }
    }
}
