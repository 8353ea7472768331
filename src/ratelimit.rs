//! Shared token-bucket rate limiter
//!
//! A single limiter instance throttles every outbound platform call.
//! Tokens replenish lazily from elapsed time rather than from a ticking
//! task: each `wait()` first credits `elapsed / refill_interval` tokens
//! (capped at capacity), then either consumes one or sleeps until the
//! next token accrues. Built on `tokio::time` so tests can run under
//! paused virtual time.

use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

/// Token bucket limiter shared by all workers
pub struct RateLimiter {
    enabled: bool,
    capacity: u32,
    refill_interval: Duration,
    bucket: Mutex<Bucket>,
}

struct Bucket {
    tokens: u32,
    last_refill: Instant,
}

impl RateLimiter {
    /// Create a limiter allowing `requests_per_minute` calls per minute
    pub fn new(enabled: bool, requests_per_minute: u32) -> Self {
        let capacity = requests_per_minute.max(1);
        let refill_interval = Duration::from_secs(60) / capacity;

        Self {
            enabled,
            capacity,
            refill_interval,
            bucket: Mutex::new(Bucket {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    /// A limiter that never blocks
    pub fn disabled() -> Self {
        Self::new(false, 1)
    }

    /// Block until one token is available, then consume it
    ///
    /// No-op when the limiter is disabled. No fairness ordering among
    /// concurrent waiters beyond serialization through the lock.
    pub async fn wait(&self) {
        if !self.enabled {
            return;
        }

        let mut bucket = self.bucket.lock().await;

        // Credit tokens for the time elapsed since the last refill
        let elapsed = bucket.last_refill.elapsed();
        let tokens_to_add = (elapsed.as_nanos() / self.refill_interval.as_nanos().max(1)) as u32;
        if tokens_to_add > 0 {
            bucket.tokens = self.capacity.min(bucket.tokens.saturating_add(tokens_to_add));
            bucket.last_refill += self.refill_interval * tokens_to_add;
        }

        if bucket.tokens == 0 {
            let wait = self
                .refill_interval
                .saturating_sub(bucket.last_refill.elapsed());
            drop(bucket);

            if !wait.is_zero() {
                debug!(wait_ms = wait.as_millis() as u64, "rate limited, waiting");
                tokio::time::sleep(wait).await;
            }

            // Take the freshly accrued token and reset the refill anchor
            let mut bucket = self.bucket.lock().await;
            bucket.tokens = 0;
            bucket.last_refill = Instant::now();
            return;
        }

        bucket.tokens -= 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_burst_up_to_capacity_is_immediate() {
        let limiter = RateLimiter::new(true, 60);

        let start = Instant::now();
        for _ in 0..60 {
            limiter.wait().await;
        }
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_call_beyond_capacity_waits_one_interval() {
        // capacity 60/min => one token per second
        let limiter = RateLimiter::new(true, 60);

        for _ in 0..60 {
            limiter.wait().await;
        }

        let start = Instant::now();
        limiter.wait().await;
        assert!(
            start.elapsed() >= Duration::from_secs(1),
            "61st call should wait at least one refill interval, waited {:?}",
            start.elapsed()
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_refill_caps_at_capacity() {
        let limiter = RateLimiter::new(true, 10);

        // Drain the bucket, then idle far longer than a full refill
        for _ in 0..10 {
            limiter.wait().await;
        }
        tokio::time::sleep(Duration::from_secs(3600)).await;

        // Only `capacity` calls should pass without waiting
        let start = Instant::now();
        for _ in 0..10 {
            limiter.wait().await;
        }
        assert_eq!(start.elapsed(), Duration::ZERO);

        let start = Instant::now();
        limiter.wait().await;
        assert!(start.elapsed() > Duration::ZERO);
    }

    #[tokio::test]
    async fn test_disabled_never_blocks() {
        let limiter = RateLimiter::disabled();
        for _ in 0..1000 {
            limiter.wait().await;
        }
    }
}
