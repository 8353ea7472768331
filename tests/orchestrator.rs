//! End-to-end orchestration tests against a scripted platform client
//! and an in-memory sink.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

use creel::config::Config;
use creel::crawler::Orchestrator;
use creel::error::{ScrapeError, ScrapeResult, StoreError};
use creel::models::{Comment, Page, Platform, Post, Product, ProductRef, Profile, Record, RecordKind};
use creel::ratelimit::RateLimiter;
use creel::scraper::Scraper;
use creel::storage::checkpoint::CheckpointStore;
use creel::storage::Sink;

/// Scripted platform client
///
/// `u1` has three posts over two pages; the second page repeats its own
/// cursor, which must terminate pagination. `v1` carries a product and
/// two comments. `u2` is an empty account. `u-broken` fails profile
/// lookup outright.
#[derive(Default)]
struct ScriptedScraper {
    post_fetches: Mutex<HashMap<String, u32>>,
    profile_fetches: Mutex<HashMap<String, u32>>,
}

impl ScriptedScraper {
    fn post_fetch_count(&self, account_id: &str) -> u32 {
        *self
            .post_fetches
            .lock()
            .unwrap()
            .get(account_id)
            .unwrap_or(&0)
    }

    fn profile_fetch_count(&self, account_id: &str) -> u32 {
        *self
            .profile_fetches
            .lock()
            .unwrap()
            .get(account_id)
            .unwrap_or(&0)
    }
}

fn post(id: &str, user: &str, product: Option<&str>) -> Post {
    Post {
        post_id: id.into(),
        user_id: user.into(),
        product: product.map(|p| ProductRef {
            product_id: p.into(),
            name: String::new(),
        }),
        ..Default::default()
    }
}

#[async_trait]
impl Scraper for ScriptedScraper {
    fn platform(&self) -> Platform {
        Platform::Douyin
    }

    async fn initialize(&self) -> ScrapeResult<()> {
        Ok(())
    }

    async fn get_profile(&self, account_id: &str) -> ScrapeResult<Profile> {
        *self
            .profile_fetches
            .lock()
            .unwrap()
            .entry(account_id.to_string())
            .or_insert(0) += 1;

        if account_id == "u-broken" {
            return Err(ScrapeError::Auth("cookie rejected".into()));
        }
        Ok(Profile {
            account_id: account_id.into(),
            nickname: format!("nick-{account_id}"),
            ..Default::default()
        })
    }

    async fn get_posts(&self, account_id: &str, cursor: &str) -> ScrapeResult<Page<Post>> {
        *self
            .post_fetches
            .lock()
            .unwrap()
            .entry(account_id.to_string())
            .or_insert(0) += 1;

        Ok(match (account_id, cursor) {
            ("u1", "") => Page::new(
                vec![post("v1", "u1", Some("p1")), post("v2", "u1", None)],
                "c1",
            ),
            // next cursor equals the requested cursor: end of listing
            ("u1", "c1") => Page::new(vec![post("v3", "u1", None)], "c1"),
            _ => Page::new(vec![], ""),
        })
    }

    async fn get_comments(&self, post_id: &str, _cursor: &str) -> ScrapeResult<Page<Comment>> {
        Ok(match post_id {
            "v1" => Page::new(
                vec![
                    Comment {
                        comment_id: "cm1".into(),
                        post_id: "v1".into(),
                        ..Default::default()
                    },
                    Comment {
                        comment_id: "cm2".into(),
                        post_id: "v1".into(),
                        ..Default::default()
                    },
                ],
                "",
            ),
            _ => Page::new(vec![], ""),
        })
    }

    async fn get_product(&self, product_id: &str) -> ScrapeResult<Product> {
        Ok(Product {
            product_id: product_id.into(),
            name: "scripted".into(),
            ..Default::default()
        })
    }
}

/// Like [`ScriptedScraper`] for posts, but the comment fetch for `v1`
/// signals the test and then never completes, freezing the crawl in
/// the middle of the first post page.
struct StallingScraper {
    stalled: Arc<tokio::sync::Notify>,
}

#[async_trait]
impl Scraper for StallingScraper {
    fn platform(&self) -> Platform {
        Platform::Douyin
    }

    async fn initialize(&self) -> ScrapeResult<()> {
        Ok(())
    }

    async fn get_profile(&self, account_id: &str) -> ScrapeResult<Profile> {
        Ok(Profile {
            account_id: account_id.into(),
            ..Default::default()
        })
    }

    async fn get_posts(&self, account_id: &str, cursor: &str) -> ScrapeResult<Page<Post>> {
        Ok(match (account_id, cursor) {
            ("u1", "") => Page::new(vec![post("v1", "u1", None), post("v2", "u1", None)], "c1"),
            ("u1", "c1") => Page::new(vec![post("v3", "u1", None)], "c1"),
            _ => Page::new(vec![], ""),
        })
    }

    async fn get_comments(&self, post_id: &str, _cursor: &str) -> ScrapeResult<Page<Comment>> {
        if post_id == "v1" {
            self.stalled.notify_one();
            std::future::pending::<()>().await;
        }
        Ok(Page::new(vec![], ""))
    }

    async fn get_product(&self, product_id: &str) -> ScrapeResult<Product> {
        Ok(Product {
            product_id: product_id.into(),
            ..Default::default()
        })
    }
}

/// Collects every stored record as `(kind, id)`
#[derive(Default)]
struct CollectingSink {
    records: Mutex<Vec<(RecordKind, String)>>,
}

impl CollectingSink {
    fn ids_of(&self, kind: RecordKind) -> Vec<String> {
        let mut ids: Vec<String> = self
            .records
            .lock()
            .unwrap()
            .iter()
            .filter(|(k, _)| *k == kind)
            .map(|(_, id)| id.clone())
            .collect();
        ids.sort();
        ids
    }
}

#[async_trait]
impl Sink for CollectingSink {
    async fn store(&self, record: &Record) -> Result<(), StoreError> {
        self.records
            .lock()
            .unwrap()
            .push((record.kind(), record.id().to_string()));
        Ok(())
    }
}

fn fast_config(checkpoint_file: &std::path::Path) -> Config {
    let mut config = Config::default();
    // zero knob: no request timeout pressure, no backoff, no pacing
    config.crawler.timeout_secs = 0;
    config.crawler.post_delay_secs = 0;
    config.crawler.post_page_delay_secs = 0;
    config.crawler.comment_page_delay_secs = 0;
    config.crawler.concurrency = 2;
    config.checkpoint.file = checkpoint_file.to_path_buf();
    config
}

fn orchestrator_parts(
    dir: &TempDir,
) -> (
    Config,
    Arc<ScriptedScraper>,
    Arc<CollectingSink>,
    Arc<CheckpointStore>,
) {
    let checkpoint_file = dir.path().join("checkpoint.json");
    let config = fast_config(&checkpoint_file);
    let scraper = Arc::new(ScriptedScraper::default());
    let sink = Arc::new(CollectingSink::default());
    let checkpoint = Arc::new(CheckpointStore::new(
        &checkpoint_file,
        Duration::from_secs(3600),
    ));
    (config, scraper, sink, checkpoint)
}

#[tokio::test]
async fn test_full_crawl_visits_everything_once() {
    let dir = TempDir::new().unwrap();
    let (config, scraper, sink, checkpoint) = orchestrator_parts(&dir);

    let orchestrator = Orchestrator::new(
        config,
        scraper.clone(),
        sink.clone(),
        checkpoint.clone(),
        Arc::new(RateLimiter::disabled()),
    );

    let summary = orchestrator
        .run(vec!["u1".to_string(), "u2".to_string()])
        .await;

    assert_eq!(summary.completed, 2);
    assert_eq!(summary.skipped, 0);
    assert_eq!(summary.abandoned, 0);

    // repeated cursor terminated after exactly two post-list fetches
    assert_eq!(scraper.post_fetch_count("u1"), 2);
    assert_eq!(scraper.post_fetch_count("u2"), 1);

    assert_eq!(sink.ids_of(RecordKind::Profile), vec!["u1", "u2"]);
    assert_eq!(sink.ids_of(RecordKind::Post), vec!["v1", "v2", "v3"]);
    assert_eq!(sink.ids_of(RecordKind::Comment), vec!["cm1", "cm2"]);
    assert_eq!(sink.ids_of(RecordKind::Product), vec!["p1"]);

    let stats = checkpoint.stats();
    assert_eq!(stats.accounts, 2);
    assert_eq!(stats.posts, 3);
    assert_eq!(stats.comments, 2);
    assert_eq!(stats.products, 1);

    // final save happened
    assert!(dir.path().join("checkpoint.json").exists());
}

#[tokio::test]
async fn test_failing_account_does_not_poison_the_run() {
    let dir = TempDir::new().unwrap();
    let (config, scraper, sink, checkpoint) = orchestrator_parts(&dir);

    let orchestrator = Orchestrator::new(
        config,
        scraper.clone(),
        sink.clone(),
        checkpoint.clone(),
        Arc::new(RateLimiter::disabled()),
    );

    let summary = orchestrator
        .run(vec!["u-broken".to_string(), "u1".to_string()])
        .await;

    assert_eq!(summary.abandoned, 1);
    assert_eq!(summary.completed, 1);

    // the broken account stored nothing and is not marked processed
    assert_eq!(sink.ids_of(RecordKind::Profile), vec!["u1"]);
    assert!(!checkpoint.is_account_processed("u-broken"));
    assert!(checkpoint.is_account_processed("u1"));
}

#[tokio::test]
async fn test_resumed_run_skips_processed_accounts() {
    let dir = TempDir::new().unwrap();
    let (config, scraper, sink, checkpoint) = orchestrator_parts(&dir);

    // first run processes everything
    let orchestrator = Orchestrator::new(
        config.clone(),
        scraper.clone(),
        sink.clone(),
        checkpoint.clone(),
        Arc::new(RateLimiter::disabled()),
    );
    orchestrator
        .run(vec!["u1".to_string(), "u2".to_string()])
        .await;

    // second run resumes from the snapshot with a fresh scraper
    let resumed = Arc::new(CheckpointStore::new(
        &config.checkpoint.file,
        Duration::from_secs(3600),
    ));
    resumed.load().unwrap();

    let scraper2 = Arc::new(ScriptedScraper::default());
    let sink2 = Arc::new(CollectingSink::default());
    let orchestrator = Orchestrator::new(
        config,
        scraper2.clone(),
        sink2.clone(),
        resumed,
        Arc::new(RateLimiter::disabled()),
    );
    let summary = orchestrator
        .run(vec!["u1".to_string(), "u2".to_string()])
        .await;

    assert_eq!(summary.skipped, 2);
    assert_eq!(summary.completed, 0);
    assert_eq!(scraper2.profile_fetch_count("u1"), 0);
    assert_eq!(scraper2.post_fetch_count("u1"), 0);
    assert!(sink2.records.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_cursor_does_not_advance_past_an_unfinished_page() {
    // A crawl frozen in the middle of a post page must leave the
    // pagination cursor at that page, so a resumed run re-fetches it
    // and picks up the posts the interrupted run never reached.
    let dir = TempDir::new().unwrap();
    let checkpoint_file = dir.path().join("checkpoint.json");
    let config = fast_config(&checkpoint_file);

    let stalled = Arc::new(tokio::sync::Notify::new());
    let scraper = Arc::new(StallingScraper {
        stalled: stalled.clone(),
    });
    let sink = Arc::new(CollectingSink::default());
    let checkpoint = Arc::new(CheckpointStore::new(
        &checkpoint_file,
        Duration::from_secs(3600),
    ));

    let orchestrator = Orchestrator::new(
        config,
        scraper,
        sink.clone(),
        checkpoint.clone(),
        Arc::new(RateLimiter::disabled()),
    );
    let run = tokio::spawn(async move { orchestrator.run(vec!["u1".to_string()]).await });

    // wait until the crawl is stuck inside v1's comment listing
    stalled.notified().await;

    // v1 made it to the sink, v2 has not, and crucially the post
    // cursor still points at the in-flight page, not the next one
    assert_eq!(sink.ids_of(RecordKind::Post), vec!["v1"]);
    assert_eq!(checkpoint.post_cursor("u1"), "");
    assert!(!checkpoint.is_post_processed("v2"));
    assert!(!checkpoint.is_account_processed("u1"));

    run.abort();
}

#[tokio::test]
async fn test_processed_posts_are_not_restored() {
    let dir = TempDir::new().unwrap();
    let (config, scraper, sink, checkpoint) = orchestrator_parts(&dir);

    // pretend v1 and v2 were finished by an earlier run
    checkpoint.mark_post_processed("v1");
    checkpoint.mark_post_processed("v2");

    let orchestrator = Orchestrator::new(
        config,
        scraper.clone(),
        sink.clone(),
        checkpoint.clone(),
        Arc::new(RateLimiter::disabled()),
    );
    let summary = orchestrator.run(vec!["u1".to_string()]).await;

    assert_eq!(summary.completed, 1);
    // only the unseen post is stored, and v1's product is not re-fetched
    assert_eq!(sink.ids_of(RecordKind::Post), vec!["v3"]);
    assert!(sink.ids_of(RecordKind::Product).is_empty());
    assert!(sink.ids_of(RecordKind::Comment).is_empty());
}
