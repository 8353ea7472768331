//! Platform scrapers
//!
//! A [`Scraper`] turns the remote platform APIs into five opaque calls:
//! session validation, profile lookup, cursor-paginated post and
//! comment listings, and product lookup. The orchestrator is generic
//! over this trait; [`build_scraper`] selects the concrete client from
//! the configured platform.
//!
//! Both clients authenticate with a browser cookie string and send
//! browser-shaped headers. When a proxy pool is supplied, a proxy is
//! chosen at client construction; the choice is advisory (a concurrent
//! validation sweep may invalidate it) and an empty pool falls back to
//! a direct connection.

pub mod douyin;
pub mod kuaishou;

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::Config;
use crate::error::{ScrapeError, ScrapeResult};
use crate::models::{Comment, Page, Platform, Post, Product, Profile};
use crate::proxy::ProxyPool;

/// Remote platform capability
#[async_trait]
pub trait Scraper: Send + Sync {
    /// Platform this scraper talks to
    fn platform(&self) -> Platform;

    /// Validate the session; failure is fatal to startup
    async fn initialize(&self) -> ScrapeResult<()>;

    async fn get_profile(&self, account_id: &str) -> ScrapeResult<Profile>;

    async fn get_posts(&self, account_id: &str, cursor: &str) -> ScrapeResult<Page<Post>>;

    async fn get_comments(&self, post_id: &str, cursor: &str) -> ScrapeResult<Page<Comment>>;

    async fn get_product(&self, product_id: &str) -> ScrapeResult<Product>;
}

/// Build the scraper for the configured platform
pub fn build_scraper(
    config: &Config,
    proxies: Option<&ProxyPool>,
) -> ScrapeResult<Arc<dyn Scraper>> {
    let client = build_client(config, proxies)?;
    let cookies = config.crawler.cookies.clone();

    let scraper: Arc<dyn Scraper> = match config.crawler.platform {
        Platform::Douyin => Arc::new(douyin::DouyinScraper::new(client, cookies)),
        Platform::Kuaishou => Arc::new(kuaishou::KuaishouScraper::new(client, cookies)),
    };
    Ok(scraper)
}

/// Shared HTTP client construction: timeout, UA, gzip, optional proxy
fn build_client(config: &Config, proxies: Option<&ProxyPool>) -> ScrapeResult<reqwest::Client> {
    let mut builder = reqwest::Client::builder()
        .user_agent(&config.crawler.user_agent)
        .timeout(config.request_timeout())
        .gzip(true)
        .cookie_store(true);

    if let Some(pool) = proxies {
        match pool.get_proxy() {
            Some(entry) => {
                info!(proxy = %format!("{}:{}", entry.address, entry.port), "routing through proxy");
                builder = builder.proxy(reqwest::Proxy::all(entry.url())?);
            }
            None => {
                warn!("no usable proxy available, falling back to direct connection");
            }
        }
    }

    Ok(builder.build()?)
}

/// Map a reqwest failure to the scrape taxonomy
pub(crate) fn transport_error(err: reqwest::Error) -> ScrapeError {
    if err.is_timeout() {
        ScrapeError::Timeout
    } else {
        ScrapeError::Http(err)
    }
}

/// Read a response body as text, surfacing non-success statuses first
pub(crate) async fn read_body(response: reqwest::Response) -> ScrapeResult<String> {
    let status = response.status();
    if !status.is_success() {
        return Err(ScrapeError::Status(status.as_u16()));
    }
    response.text().await.map_err(transport_error)
}

/// Session probe shared by both initialize() implementations: fetch the
/// platform landing page with the session cookie, any non-200 means the
/// cookie was rejected or the client is blocked
pub(crate) async fn check_landing_page(
    client: &reqwest::Client,
    url: &str,
    cookies: &str,
) -> ScrapeResult<()> {
    let response = client
        .get(url)
        .header(reqwest::header::COOKIE, cookies)
        .send()
        .await
        .map_err(transport_error)?;

    if !response.status().is_success() {
        return Err(ScrapeError::Auth(format!(
            "cookie rejected by {url} (status {})",
            response.status().as_u16()
        )));
    }
    Ok(())
}
