//! Token-bucket admission gate shared by every query-generation call.
//!
//! Tokens accrue continuously at `capacity` per second up to a burst of
//! `capacity` tokens; each call spends one. Concurrency limits bound how many
//! documents are open, this bounds how fast the provider is hit, and the two
//! are tuned independently.
//!
//! The bucket sits behind a single `tokio::sync::Mutex`. A caller that finds
//! the bucket empty sleeps for the deficit *while holding the lock*, so
//! waiters queue on the (FIFO-fair) mutex instead of racing each other, and
//! aggregate throughput converges to `capacity` no matter how many producers
//! call [`RateLimiter::acquire`].

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};
use tokio::sync::Mutex as AsyncMutex;
use tokio::time::{sleep, Duration, Instant};
use tracing::debug;

/// Width of the observed-throughput window.
const SUCCESS_WINDOW: Duration = Duration::from_secs(30);

/// Tokio timers have millisecond resolution; shorter waits would spin.
const MIN_WAIT: Duration = Duration::from_millis(1);

/// Absorbs float drift when a refill lands a hair under one token.
const EPSILON: f64 = 1e-9;

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

struct SuccessWindow {
    completed: VecDeque<Instant>,
    last_report: Instant,
}

/// Shared token-bucket rate limiter.
pub struct RateLimiter {
    capacity: f64,
    burst: f64,
    started: Instant,
    bucket: AsyncMutex<Bucket>,
    successes: Mutex<SuccessWindow>,
}

impl RateLimiter {
    /// Create a limiter admitting `requests_per_second` calls per second.
    ///
    /// The bucket starts full. Rates below 1/s still admit whole calls: the
    /// burst is never smaller than one token.
    pub fn new(requests_per_second: f64) -> Self {
        let capacity = requests_per_second.max(f64::MIN_POSITIVE);
        let burst = capacity.max(1.0);
        let now = Instant::now();
        Self {
            capacity,
            burst,
            started: now,
            bucket: AsyncMutex::new(Bucket {
                tokens: burst,
                last_refill: now,
            }),
            successes: Mutex::new(SuccessWindow {
                completed: VecDeque::new(),
                last_report: now,
            }),
        }
    }

    pub fn capacity(&self) -> f64 {
        self.capacity
    }

    /// Wait until a token is available, then spend it.
    ///
    /// Never fails; only delays.
    pub async fn acquire(&self) {
        let mut bucket = self.bucket.lock().await;
        loop {
            let now = Instant::now();
            let elapsed = now.saturating_duration_since(bucket.last_refill);
            bucket.last_refill = now;
            bucket.tokens = (bucket.tokens + elapsed.as_secs_f64() * self.capacity).min(self.burst);

            if bucket.tokens + EPSILON >= 1.0 {
                bucket.tokens = (bucket.tokens - 1.0).max(0.0);
                return;
            }

            let deficit = 1.0 - bucket.tokens;
            let wait = Duration::from_secs_f64(deficit / self.capacity).max(MIN_WAIT);
            sleep(wait).await;
        }
    }

    /// Tokens currently in the bucket, without refilling.
    pub async fn available_tokens(&self) -> f64 {
        self.bucket.lock().await.tokens
    }

    /// Count a completed call towards the observed-rate window.
    ///
    /// Purely observational; has no effect on admission.
    pub fn record_success(&self) {
        let now = Instant::now();
        let mut window = self
            .successes
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        window.completed.push_back(now);
        prune(&mut window.completed, now);

        if now.saturating_duration_since(window.last_report) >= Duration::from_secs(1) {
            window.last_report = now;
            let rps = self.rate_over(window.completed.len(), now);
            debug!("Observed rate (last 30s): {:.2} req/s", rps);
        }
    }

    /// Successful calls per second over the last 30 seconds (or since
    /// creation, if the limiter is younger than that).
    pub fn observed_rps(&self) -> f64 {
        let now = Instant::now();
        let mut window = self
            .successes
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        prune(&mut window.completed, now);
        self.rate_over(window.completed.len(), now)
    }

    fn rate_over(&self, count: usize, now: Instant) -> f64 {
        let span = now
            .saturating_duration_since(self.started)
            .min(SUCCESS_WINDOW)
            .as_secs_f64();
        if span <= 0.0 {
            0.0
        } else {
            count as f64 / span
        }
    }
}

fn prune(completed: &mut VecDeque<Instant>, now: Instant) {
    while completed
        .front()
        .is_some_and(|t| now.saturating_duration_since(*t) > SUCCESS_WINDOW)
    {
        completed.pop_front();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn burst_is_admitted_immediately() {
        let limiter = RateLimiter::new(5.0);
        let start = Instant::now();
        for _ in 0..5 {
            limiter.acquire().await;
        }
        assert_eq!(start.elapsed(), Duration::ZERO);
        assert!(limiter.available_tokens().await < 1.0);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_bucket_waits_for_refill() {
        let limiter = RateLimiter::new(10.0);
        for _ in 0..10 {
            limiter.acquire().await;
        }
        let start = Instant::now();
        limiter.acquire().await;
        let waited = start.elapsed();
        assert!(waited >= Duration::from_millis(100), "waited {waited:?}");
        assert!(waited <= Duration::from_millis(102), "waited {waited:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn tokens_never_exceed_capacity_after_idle() {
        let limiter = RateLimiter::new(3.0);
        limiter.acquire().await;
        sleep(Duration::from_secs(60)).await;
        // Refill is capped: only three calls pass without waiting.
        let start = Instant::now();
        for _ in 0..3 {
            limiter.acquire().await;
        }
        assert_eq!(start.elapsed(), Duration::ZERO);
        limiter.acquire().await;
        assert!(start.elapsed() > Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn tokens_never_negative() {
        let limiter = Arc::new(RateLimiter::new(4.0));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let l = Arc::clone(&limiter);
            handles.push(tokio::spawn(async move { l.acquire().await }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert!(limiter.available_tokens().await >= 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn fractional_rate_still_admits() {
        let limiter = RateLimiter::new(0.5);
        let start = Instant::now();
        limiter.acquire().await;
        limiter.acquire().await;
        let waited = start.elapsed();
        assert!(waited >= Duration::from_secs(2), "waited {waited:?}");
        assert!(waited < Duration::from_millis(2100), "waited {waited:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn observed_rps_counts_successes() {
        let limiter = RateLimiter::new(100.0);
        sleep(Duration::from_secs(10)).await;
        for _ in 0..50 {
            limiter.record_success();
        }
        let rps = limiter.observed_rps();
        assert!((rps - 5.0).abs() < 1e-9, "rps {rps}");

        sleep(Duration::from_secs(31)).await;
        assert_eq!(limiter.observed_rps(), 0.0);
    }
}
