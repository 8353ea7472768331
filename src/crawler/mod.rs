//! Crawl orchestration
//!
//! The [`Orchestrator`] owns the crawl: it feeds seed account IDs into
//! a bounded worker pool and drives each account through the full
//! traversal (profile, paginated posts, per-post comments and product).
//! Workers share one queue, one rate limiter, one checkpoint store and
//! one sink; a failing account is abandoned with a warning and never
//! takes the rest of the crawl down with it.
//!
//! Resume semantics come from the checkpoint store: accounts and posts
//! already marked processed are skipped outright, and pagination picks
//! up from the last persisted cursor instead of page one.

pub mod paginate;

use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::models::{Post, Record};
use crate::ratelimit::RateLimiter;
use crate::scraper::Scraper;
use crate::storage::checkpoint::CheckpointStore;
use crate::storage::Sink;

use paginate::{Paginator, WalkOutcome};

/// Totals reported when a crawl finishes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CrawlSummary {
    /// Accounts fully traversed this run
    pub completed: u64,
    /// Accounts skipped because a previous run finished them
    pub skipped: u64,
    /// Accounts given up on after errors
    pub abandoned: u64,
}

#[derive(Clone)]
pub struct Orchestrator {
    config: Arc<Config>,
    scraper: Arc<dyn Scraper>,
    sink: Arc<dyn Sink>,
    checkpoint: Arc<CheckpointStore>,
    limiter: Arc<RateLimiter>,
}

impl Orchestrator {
    pub fn new(
        config: Config,
        scraper: Arc<dyn Scraper>,
        sink: Arc<dyn Sink>,
        checkpoint: Arc<CheckpointStore>,
        limiter: Arc<RateLimiter>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            scraper,
            sink,
            checkpoint,
            limiter,
        }
    }

    /// Crawl every seed account, then flush the checkpoint
    ///
    /// Seeds are distributed over `crawler.concurrency` workers pulling
    /// from a shared queue; the call returns once the queue drains and
    /// every worker has finished its last account.
    pub async fn run(&self, seeds: Vec<String>) -> CrawlSummary {
        let concurrency = self.config.crawler.concurrency.max(1);
        info!(
            platform = %self.scraper.platform(),
            seeds = seeds.len(),
            workers = concurrency,
            "starting crawl"
        );

        self.checkpoint
            .set_platform(self.scraper.platform().as_str());

        let (tx, rx) = mpsc::channel::<String>(seeds.len().max(1));
        let rx = Arc::new(Mutex::new(rx));

        let mut workers = Vec::with_capacity(concurrency);
        for worker_id in 0..concurrency {
            let this = self.clone();
            let rx = Arc::clone(&rx);
            workers.push(tokio::spawn(async move {
                this.worker(worker_id, rx).await
            }));
        }

        for seed in seeds {
            // workers only stop when the channel closes, so this cannot fail
            let _ = tx.send(seed).await;
        }
        drop(tx);

        let mut summary = CrawlSummary::default();
        for handle in workers {
            match handle.await {
                Ok(tally) => {
                    summary.completed += tally.completed;
                    summary.skipped += tally.skipped;
                    summary.abandoned += tally.abandoned;
                }
                Err(e) => error!(error = %e, "worker task panicked"),
            }
        }

        if self.config.checkpoint.enabled {
            if let Err(e) = self.checkpoint.save() {
                error!(error = %e, "final checkpoint save failed");
            }
        }

        let stats = self.checkpoint.stats();
        info!(
            completed = summary.completed,
            skipped = summary.skipped,
            abandoned = summary.abandoned,
            posts = stats.posts,
            comments = stats.comments,
            products = stats.products,
            "crawl finished"
        );
        summary
    }

    /// Pull seeds off the shared queue until it closes
    async fn worker(&self, worker_id: usize, rx: Arc<Mutex<mpsc::Receiver<String>>>) -> CrawlSummary {
        let mut tally = CrawlSummary::default();

        loop {
            // Hold the lock only for the dequeue so other workers are
            // never blocked behind an in-flight account.
            let seed = { rx.lock().await.recv().await };
            let Some(seed) = seed else {
                debug!(worker = worker_id, "queue drained, worker exiting");
                return tally;
            };

            if self.checkpoint.is_account_processed(&seed) {
                info!(worker = worker_id, account = %seed, "account already processed, skipping");
                tally.skipped += 1;
                continue;
            }

            info!(worker = worker_id, account = %seed, "processing account");
            match self.process_account(&seed).await {
                WalkOutcome::Completed => {
                    self.checkpoint.mark_account_processed(&seed);
                    tally.completed += 1;
                }
                WalkOutcome::Abandoned => {
                    warn!(worker = worker_id, account = %seed, "account abandoned");
                    tally.abandoned += 1;
                }
            }

            // Pace between seeds with the same knob as the retry backoff
            tokio::time::sleep(self.config.backoff()).await;
        }
    }

    /// Full traversal of one account: profile, posts, comments, products
    async fn process_account(&self, account_id: &str) -> WalkOutcome {
        self.limiter.wait().await;
        let profile = match self.scraper.get_profile(account_id).await {
            Ok(profile) => profile,
            Err(e) => {
                warn!(account = account_id, error = %e, "profile fetch failed");
                return WalkOutcome::Abandoned;
            }
        };
        self.store(Record::Profile(profile)).await;

        let paginator = Paginator::new(
            Arc::clone(&self.limiter),
            self.config.crawler.max_retries,
            self.config.backoff(),
            self.config.post_page_delay(),
        );

        let resume = self.checkpoint.post_cursor(account_id);
        if !resume.is_empty() {
            info!(account = account_id, cursor = %resume, "resuming post listing");
        }

        paginator
            .walk(
                account_id,
                resume,
                |cursor| {
                    let scraper = Arc::clone(&self.scraper);
                    async move { scraper.get_posts(account_id, &cursor).await }
                },
                |posts, next_cursor| async move {
                    for post in posts {
                        self.process_post(post).await;
                        tokio::time::sleep(self.config.post_delay()).await;
                    }
                    // Advance only once every post on the page is done:
                    // an interrupted run re-fetches the in-flight page
                    // and the processed-set filters what it already did.
                    self.checkpoint.set_post_cursor(account_id, &next_cursor);
                },
            )
            .await
    }

    /// Store one post plus its comments and attached product
    ///
    /// Comment-walk failures downgrade to a warning: the post still
    /// counts as processed so a flaky comment endpoint cannot pin the
    /// crawl to one post forever.
    async fn process_post(&self, post: Post) {
        if self.checkpoint.is_post_processed(&post.post_id) {
            debug!(post = %post.post_id, "post already processed, skipping");
            return;
        }

        let post_id = post.post_id.clone();
        let product_id = post.product_id().map(str::to_string);
        self.store(Record::Post(post)).await;

        let paginator = Paginator::new(
            Arc::clone(&self.limiter),
            self.config.crawler.max_retries,
            self.config.backoff(),
            self.config.comment_page_delay(),
        );

        let outcome = paginator
            .walk(
                &post_id,
                self.checkpoint.comment_cursor(&post_id),
                |cursor| {
                    let scraper = Arc::clone(&self.scraper);
                    let post_id = post_id.clone();
                    async move { scraper.get_comments(&post_id, &cursor).await }
                },
                |comments, next_cursor| {
                    let post_id = post_id.clone();
                    async move {
                        for comment in comments {
                            self.store(Record::Comment(comment)).await;
                            self.checkpoint.record_comment();
                        }
                        self.checkpoint.set_comment_cursor(&post_id, &next_cursor);
                    }
                },
            )
            .await;
        if outcome == WalkOutcome::Abandoned {
            warn!(post = %post_id, "comment listing abandoned, keeping post");
        }

        if let Some(product_id) = product_id {
            self.fetch_product(&product_id).await;
        }

        self.checkpoint.mark_post_processed(&post_id);
    }

    async fn fetch_product(&self, product_id: &str) {
        self.limiter.wait().await;
        match self.scraper.get_product(product_id).await {
            Ok(product) => {
                self.store(Record::Product(product)).await;
                self.checkpoint.record_product();
            }
            Err(e) => {
                warn!(product = product_id, error = %e, "product fetch failed");
            }
        }
    }

    /// Hand a record to the sink; storage failures never stop the crawl
    async fn store(&self, record: Record) {
        let kind = record.kind();
        let id = record.id().to_string();
        if let Err(e) = self.sink.store(&record).await {
            warn!(kind = %kind, id = %id, error = %e, "sink write failed");
        }
    }
}
