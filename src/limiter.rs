//! Per-client token-bucket rate limiting.
//!
//! The registry keeps one [`TokenBucket`] per client IP, created on the
//! first request from that client and reaped by [`RateLimiter::sweep`] once
//! the client has been idle longer than the retention window.
//!
//! The table is a sharded [`DashMap`]: lookups take a shard read lock, the
//! create path takes the shard write lock and re-checks before inserting, so
//! concurrent first requests from one client always share a single bucket.
//! Each bucket sits behind its own mutex, held only for the arithmetic of one
//! check, and always while the shard guard is held. A sweep therefore never
//! removes a bucket between lookup and update: a client is either reaped
//! before its check (and starts over with a full bucket) or its check
//! refreshes `last_seen` first and the sweep keeps it. A sweep locks one
//! shard at a time and never blocks admission for clients in other shards.

use std::net::IpAddr;
use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::debug;

use crate::error::Error;

/// Token-bucket parameters shared by every client.
#[derive(Debug, Clone)]
pub struct LimiterConfig {
    /// Sustained refill rate, in tokens per second.
    pub requests_per_second: f64,
    /// Bucket capacity; also the number of requests a new client may burst.
    pub burst: u32,
    /// Buckets untouched for longer than this are removed by a sweep.
    pub idle_retention: Duration,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            requests_per_second: 10.0,
            burst: 20,
            idle_retention: Duration::from_secs(3 * 60),
        }
    }
}

/// Outcome of one admission check.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Decision {
    Admitted,
    /// No token was available; none was consumed.
    Rejected { retry_after: Duration },
}

impl Decision {
    pub fn is_admitted(self) -> bool {
        matches!(self, Self::Admitted)
    }
}

// ── TokenBucket ───────────────────────────────────────────────────────────────

#[derive(Debug)]
struct TokenBucket {
    tokens: f64,
    last_refill: Instant,
    last_seen: Instant,
}

impl TokenBucket {
    fn full(capacity: f64, now: Instant) -> Self {
        Self { tokens: capacity, last_refill: now, last_seen: now }
    }

    fn try_acquire(&mut self, rate: f64, capacity: f64, now: Instant) -> Decision {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * rate).min(capacity);
        self.last_refill = now;
        self.last_seen = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            Decision::Admitted
        } else {
            let wait = (1.0 - self.tokens) / rate;
            // A zero rate never refills.
            let retry_after = Duration::try_from_secs_f64(wait).unwrap_or(Duration::MAX);
            Decision::Rejected { retry_after }
        }
    }
}

// ── RateLimiter ───────────────────────────────────────────────────────────────

/// Registry of per-client token buckets.
#[derive(Debug)]
pub struct RateLimiter {
    config: LimiterConfig,
    buckets: DashMap<IpAddr, Mutex<TokenBucket>>,
}

impl RateLimiter {
    pub fn new(config: LimiterConfig) -> Self {
        Self { config, buckets: DashMap::new() }
    }

    pub fn config(&self) -> &LimiterConfig {
        &self.config
    }

    /// Checks and, on success, consumes one token for `client`.
    pub fn check(&self, client: IpAddr) -> Decision {
        let rate = self.config.requests_per_second;
        let capacity = f64::from(self.config.burst);

        if let Some(bucket) = self.buckets.get(&client) {
            return bucket.lock().try_acquire(rate, capacity, Instant::now());
        }

        // `entry` holds the shard write lock and re-checks, so two racing
        // first requests end up with the same bucket.
        let bucket = self.buckets
            .entry(client)
            .or_insert_with(|| Mutex::new(TokenBucket::full(capacity, Instant::now())));
        bucket.lock().try_acquire(rate, capacity, Instant::now())
    }

    /// `true` if the request from `client` is admitted.
    pub fn admit(&self, client: IpAddr) -> bool {
        self.check(client).is_admitted()
    }

    /// Removes buckets idle for longer than the retention window.
    /// Returns how many were removed.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let retention = self.config.idle_retention;
        let before = self.buckets.len();
        self.buckets
            .retain(|_, bucket| now.saturating_duration_since(bucket.lock().last_seen) <= retention);
        let removed = before.saturating_sub(self.buckets.len());
        debug!(removed, tracked = self.buckets.len(), "rate limiter sweep");
        removed
    }

    /// Number of clients currently tracked.
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Runs [`sweep`](Self::sweep) every `interval` on a background task.
    ///
    /// The task holds only a weak reference: it exits on its own once the
    /// last `Arc<RateLimiter>` is dropped. Abort the handle to stop it sooner.
    /// A zero `interval` is rejected with [`Error::Config`].
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> Result<JoinHandle<()>, Error> {
        if interval.is_zero() {
            return Err(Error::Config("sweep interval must be non-zero".into()));
        }
        let weak: Weak<Self> = Arc::downgrade(self);
        Ok(tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(limiter) = weak.upgrade() else { break };
                limiter.sweep();
            }
            debug!("rate limiter sweeper stopped");
        }))
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;
    use std::sync::Barrier;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    fn ip(last: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(10, 0, 0, last))
    }

    fn limiter(rps: f64, burst: u32) -> RateLimiter {
        RateLimiter::new(LimiterConfig {
            requests_per_second: rps,
            burst,
            idle_retention: Duration::from_secs(180),
        })
    }

    #[tokio::test(start_paused = true)]
    async fn burst_then_reject_then_one_token_per_interval() {
        let rl = limiter(4.0, 3);

        for _ in 0..3 {
            assert!(rl.admit(ip(1)));
        }
        assert!(!rl.admit(ip(1)));

        tokio::time::advance(Duration::from_millis(250)).await;
        assert!(rl.admit(ip(1)));
        assert!(!rl.admit(ip(1)));
    }

    #[tokio::test(start_paused = true)]
    async fn rejection_reports_time_until_next_token() {
        let rl = limiter(2.0, 1);
        assert!(rl.admit(ip(1)));
        match rl.check(ip(1)) {
            Decision::Rejected { retry_after } => assert_eq!(retry_after, Duration::from_millis(500)),
            Decision::Admitted => panic!("expected rejection"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn refill_is_capped_at_burst() {
        let rl = limiter(10.0, 2);
        assert!(rl.admit(ip(1)));
        tokio::time::advance(Duration::from_secs(60)).await;

        assert!(rl.admit(ip(1)));
        assert!(rl.admit(ip(1)));
        assert!(!rl.admit(ip(1)));
    }

    #[tokio::test(start_paused = true)]
    async fn clients_have_independent_buckets() {
        let rl = limiter(1.0, 1);
        assert!(rl.admit(ip(1)));
        assert!(!rl.admit(ip(1)));
        assert!(rl.admit(ip(2)));
        assert_eq!(rl.len(), 2);
    }

    #[test]
    fn concurrent_first_requests_share_one_bucket() {
        const THREADS: usize = 64;
        let rl = limiter(0.001, 10);
        let barrier = Barrier::new(THREADS);
        let admitted = AtomicUsize::new(0);

        std::thread::scope(|s| {
            for _ in 0..THREADS {
                s.spawn(|| {
                    barrier.wait();
                    if rl.admit(ip(7)) {
                        admitted.fetch_add(1, Ordering::Relaxed);
                    }
                });
            }
        });

        assert_eq!(rl.len(), 1);
        assert_eq!(admitted.load(Ordering::Relaxed), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_removes_only_idle_clients() {
        let rl = limiter(10.0, 5);
        rl.admit(ip(1));
        tokio::time::advance(Duration::from_secs(200)).await;
        rl.admit(ip(2));

        assert_eq!(rl.sweep(), 1);
        assert_eq!(rl.len(), 1);
        assert!(rl.buckets.contains_key(&ip(2)));
    }

    #[tokio::test(start_paused = true)]
    async fn swept_client_comes_back_with_a_full_bucket() {
        let rl = limiter(0.001, 2);
        rl.admit(ip(1));
        rl.admit(ip(1));
        assert!(!rl.admit(ip(1)));

        tokio::time::advance(Duration::from_secs(181)).await;
        rl.sweep();
        assert!(rl.is_empty());

        assert!(rl.admit(ip(1)));
        assert!(rl.admit(ip(1)));
    }

    #[tokio::test(start_paused = true)]
    async fn sweeper_reaps_in_the_background_and_stops_with_the_registry() {
        let rl = Arc::new(limiter(10.0, 5));
        rl.admit(ip(1));
        let handle = rl.spawn_sweeper(Duration::from_secs(60)).unwrap();

        tokio::time::sleep(Duration::from_secs(241)).await;
        assert!(rl.is_empty());

        drop(rl);
        tokio::time::sleep(Duration::from_secs(61)).await;
        assert!(handle.is_finished());
    }

    #[tokio::test]
    async fn zero_sweep_interval_is_rejected() {
        let rl = Arc::new(limiter(10.0, 5));
        assert!(matches!(rl.spawn_sweeper(Duration::ZERO), Err(Error::Config(_))));
    }

    #[test]
    fn a_client_checked_during_a_sweep_stays_tracked() {
        // No refill: a reaped client is only ever readmitted by a fresh bucket.
        let rl = RateLimiter::new(LimiterConfig {
            requests_per_second: 0.0,
            burst: 1,
            idle_retention: Duration::from_millis(100),
        });

        for round in 0..8 {
            rl.buckets.clear();
            assert!(rl.admit(ip(9)));
            std::thread::sleep(Duration::from_millis(150));

            let barrier = Barrier::new(2);
            let admitted = std::thread::scope(|s| {
                let checker = s.spawn(|| {
                    barrier.wait();
                    rl.admit(ip(9))
                });
                s.spawn(|| {
                    barrier.wait();
                    rl.sweep();
                });
                checker.join().unwrap()
            });

            // Either the sweep won and the check created a fresh bucket, or
            // the check won and the sweep kept the freshly seen client. A
            // rejection charged to a reaped bucket would leave nothing behind.
            assert_eq!(rl.len(), 1, "round {round}, admitted {admitted}");
        }
    }
}
