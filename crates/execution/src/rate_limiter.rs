//! Token-bucket rate limiter for outbound order traffic.
//!
//! The destination venue accepts a bounded number of order operations per
//! second. Tokens refill continuously at `refill_rate` per second up to
//! `capacity`; every submit or cancel consumes one token. The limiter is
//! safe under concurrent callers and needs no background task: refill is
//! computed lazily from elapsed time on each acquisition.

use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Snapshot of the limiter's state, for status reporting.
#[derive(Debug, Clone, Copy)]
pub struct RateLimiterStatus {
    /// Tokens currently available (fractional).
    pub tokens: f64,
    /// Burst capacity.
    pub capacity: u32,
    /// Tokens refilled per second.
    pub refill_rate: f64,
    /// Fraction of capacity currently consumed, in `[0, 1]`.
    pub utilization: f64,
}

/// Bucket state guarded by one lock so refill and deduction are atomic.
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// Continuous-refill token bucket.
pub struct RateLimiter {
    capacity: u32,
    refill_rate: f64,
    bucket: Mutex<Bucket>,
}

impl RateLimiter {
    /// Create a limiter with `capacity` burst tokens refilling at
    /// `refill_rate` per second. The bucket starts full.
    pub fn new(capacity: u32, refill_rate: f64) -> Self {
        assert!(refill_rate > 0.0, "refill_rate must be positive");
        Self {
            capacity,
            refill_rate,
            bucket: Mutex::new(Bucket {
                tokens: capacity as f64,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Try to consume `n` tokens without waiting.
    ///
    /// Refills from elapsed time, then deducts if enough tokens are
    /// available. Returns whether the tokens were taken.
    pub fn try_acquire(&self, n: u32) -> bool {
        let mut bucket = self.bucket.lock();
        self.refill(&mut bucket);
        let needed = n as f64;
        if bucket.tokens >= needed {
            bucket.tokens -= needed;
            true
        } else {
            false
        }
    }

    /// Wait cooperatively until `n` tokens can be consumed.
    ///
    /// Sleeps in increments bounded by 100 ms, sized from the current
    /// token deficit, so cancellation and shutdown stay responsive.
    pub async fn wait(&self, n: u32) {
        loop {
            let deficit = {
                let mut bucket = self.bucket.lock();
                self.refill(&mut bucket);
                let needed = n as f64;
                if bucket.tokens >= needed {
                    bucket.tokens -= needed;
                    return;
                }
                needed - bucket.tokens
            };

            let wait_secs = (deficit / self.refill_rate).min(0.1);
            tokio::time::sleep(Duration::from_secs_f64(wait_secs.max(0.001))).await;
        }
    }

    /// Current limiter status.
    pub fn status(&self) -> RateLimiterStatus {
        let mut bucket = self.bucket.lock();
        self.refill(&mut bucket);
        let used = self.capacity as f64 - bucket.tokens;
        RateLimiterStatus {
            tokens: bucket.tokens,
            capacity: self.capacity,
            refill_rate: self.refill_rate,
            utilization: (used / self.capacity as f64).clamp(0.0, 1.0),
        }
    }

    /// Refill from elapsed wall-clock time, capped at capacity.
    fn refill(&self, bucket: &mut Bucket) {
        let now = Instant::now();
        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        if elapsed > 0.0 {
            bucket.tokens =
                (bucket.tokens + elapsed * self.refill_rate).min(self.capacity as f64);
            bucket.last_refill = now;
        }
    }
}
