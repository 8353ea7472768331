//! Generic cursor-pagination walker
//!
//! Drives any `fetch(cursor) -> (items, next_cursor)` operation to
//! completion: retries transient failures with a fixed backoff, hands
//! every fetched page to a visitor, and terminates when the remote
//! signals the end of the listing. The empty cursor is the shared
//! sentinel: it starts a listing before the first call and ends one
//! when returned; a next cursor equal to the current cursor means the
//! same thing. A terminal cursor is never submitted again.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{ScrapeError, ScrapeResult};
use crate::models::Page;
use crate::ratelimit::RateLimiter;

/// How a walk ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkOutcome {
    /// The listing was exhausted
    Completed,
    /// Retries ran out; the resource was abandoned mid-listing
    Abandoned,
}

/// Cursor walker with a retry budget and pacing policy
///
/// One instance per resource kind: the orchestrator builds one for post
/// listings and one for comment listings, differing only in the pacing
/// delay applied between pages.
pub struct Paginator {
    limiter: Arc<RateLimiter>,
    max_retries: u32,
    backoff: Duration,
    page_delay: Duration,
}

impl Paginator {
    pub fn new(
        limiter: Arc<RateLimiter>,
        max_retries: u32,
        backoff: Duration,
        page_delay: Duration,
    ) -> Self {
        Self {
            limiter,
            max_retries,
            backoff,
            page_delay,
        }
    }

    /// Walk the listing for `parent_id` starting from `resume_cursor`
    ///
    /// `fetch` is invoked once per page behind the shared rate limiter.
    /// On success the visitor receives the page items together with the
    /// next cursor (so the caller can persist its checkpoint before the
    /// walk advances). On error the same cursor is retried after the
    /// backoff sleep until the retry budget is exhausted, at which
    /// point the resource is abandoned; any success resets the budget.
    pub async fn walk<T, F, Fut, V, VFut>(
        &self,
        parent_id: &str,
        resume_cursor: String,
        fetch: F,
        mut visit: V,
    ) -> WalkOutcome
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = ScrapeResult<Page<T>>>,
        V: FnMut(Vec<T>, String) -> VFut,
        VFut: Future<Output = ()>,
    {
        let mut cursor = resume_cursor;
        let mut retries: u32 = 0;

        loop {
            self.limiter.wait().await;

            let page = match fetch(cursor.clone()).await {
                Ok(page) => page,
                Err(e) => {
                    retries += 1;
                    if retries > self.max_retries || !should_retry(&e) {
                        warn!(
                            parent = parent_id,
                            cursor = %cursor,
                            retries,
                            error = %e,
                            "abandoning paginated resource"
                        );
                        return WalkOutcome::Abandoned;
                    }
                    debug!(
                        parent = parent_id,
                        cursor = %cursor,
                        attempt = retries,
                        error = %e,
                        "page fetch failed, backing off"
                    );
                    tokio::time::sleep(self.backoff).await;
                    continue;
                }
            };

            retries = 0;

            let next = page.next_cursor.clone();
            let done = page.is_last(&cursor);
            visit(page.items, next.clone()).await;

            if done {
                debug!(parent = parent_id, "listing exhausted");
                return WalkOutcome::Completed;
            }

            cursor = next;
            tokio::time::sleep(self.page_delay).await;
        }
    }
}

fn should_retry(err: &ScrapeError) -> bool {
    err.is_transient()
}
