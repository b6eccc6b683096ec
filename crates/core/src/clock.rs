//! Injectable time source.
//!
//! Production code uses [`SystemClock`]; tests that exercise requote gating,
//! retry schedules, or staleness windows substitute a [`ManualClock`] and
//! advance it explicitly.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

/// Time source used by every time-dependent component.
#[async_trait]
pub trait Clock: Send + Sync {
    /// Current wall-clock time, seconds since the Unix epoch.
    fn now(&self) -> f64;

    /// Suspend the calling task for `duration`.
    async fn sleep(&self, duration: Duration);
}

/// Shared handle to a clock.
pub type SharedClock = Arc<dyn Clock>;

/// Real wall-clock time backed by the OS.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> f64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("system clock before UNIX epoch")
            .as_secs_f64()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Hand-driven clock for tests.
///
/// `sleep` advances the clock by the requested duration instead of
/// suspending, so time-dependent loops run instantly and deterministically.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: parking_lot::Mutex<f64>,
}

impl ManualClock {
    /// Create a manual clock starting at `start` seconds.
    pub fn new(start: f64) -> Self {
        Self {
            now: parking_lot::Mutex::new(start),
        }
    }

    /// Advance the clock by `secs`.
    pub fn advance(&self, secs: f64) {
        *self.now.lock() += secs;
    }

    /// Set the clock to an absolute time.
    pub fn set(&self, now: f64) {
        *self.now.lock() = now;
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> f64 {
        *self.now.lock()
    }

    async fn sleep(&self, duration: Duration) {
        self.advance(duration.as_secs_f64());
        // Yield so concurrent tasks interleave the way they would under a
        // real timer.
        tokio::task::yield_now().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_clock_monotonic_enough() {
        let clock = SystemClock;
        let a = clock.now();
        let b = clock.now();
        assert!(b >= a);
        assert!(a > 1_600_000_000.0); // after Sep 2020
    }

    #[test]
    fn test_manual_clock_advance() {
        let clock = ManualClock::new(100.0);
        assert_eq!(clock.now(), 100.0);
        clock.advance(0.25);
        assert_eq!(clock.now(), 100.25);
        clock.set(500.0);
        assert_eq!(clock.now(), 500.0);
    }

    #[tokio::test]
    async fn test_manual_clock_sleep_advances() {
        let clock = ManualClock::new(0.0);
        clock.sleep(Duration::from_millis(100)).await;
        assert!((clock.now() - 0.1).abs() < 1e-9);
    }
}
