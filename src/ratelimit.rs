//! Pacing between batch windows.
//!
//! The orchestrator only sees [`RateLimiter`]; swapping the fixed delay for
//! adaptive backoff needs no change to batching code.

use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::sleep;
use tracing::debug;

#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Waits before the next window is released.
    async fn wait(&self);

    /// The provider answered with 429/503 during the last window.
    fn record_throttled(&self) {}

    /// A window completed without throttling.
    fn record_success(&self) {}
}

/// No pause at all.
pub struct NoDelay;

#[async_trait]
impl RateLimiter for NoDelay {
    async fn wait(&self) {}
}

/// Sleeps for the same duration between every window.
pub struct FixedDelay {
    delay: Duration,
}

impl FixedDelay {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

#[async_trait]
impl RateLimiter for FixedDelay {
    async fn wait(&self) {
        sleep(self.delay).await;
    }
}

/// Doubles the delay on every throttled window up to `max`, and halves it
/// back toward `base` after each clean window.
pub struct AdaptiveBackoff {
    base: Duration,
    max: Duration,
    current_ms: AtomicU64,
}

impl AdaptiveBackoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        let max = max.max(base);
        Self {
            base,
            max,
            current_ms: AtomicU64::new(base.as_millis() as u64),
        }
    }

    pub fn current_delay(&self) -> Duration {
        Duration::from_millis(self.current_ms.load(Ordering::Relaxed))
    }

    fn update(&self, f: impl Fn(u64) -> u64) {
        let _ = self
            .current_ms
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |ms| Some(f(ms)));
    }
}

#[async_trait]
impl RateLimiter for AdaptiveBackoff {
    async fn wait(&self) {
        let delay = self.current_delay();
        debug!(delay_ms = delay.as_millis() as u64, "Rate limiter pause");
        sleep(delay).await;
    }

    fn record_throttled(&self) {
        let max = self.max.as_millis() as u64;
        self.update(|ms| ms.max(1).saturating_mul(2).min(max));
    }

    fn record_success(&self) {
        let base = self.base.as_millis() as u64;
        self.update(|ms| (ms / 2).max(base));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_adaptive_backoff_grows_and_recovers() {
        let limiter = AdaptiveBackoff::new(Duration::from_millis(100), Duration::from_millis(500));
        assert_eq!(limiter.current_delay(), Duration::from_millis(100));

        limiter.record_throttled();
        assert_eq!(limiter.current_delay(), Duration::from_millis(200));
        limiter.record_throttled();
        limiter.record_throttled();
        assert_eq!(limiter.current_delay(), Duration::from_millis(500));

        limiter.record_success();
        assert_eq!(limiter.current_delay(), Duration::from_millis(250));
        limiter.record_success();
        limiter.record_success();
        assert_eq!(limiter.current_delay(), Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_fixed_delay_sleeps() {
        let limiter = FixedDelay::new(Duration::from_millis(50));
        let start = std::time::Instant::now();
        limiter.wait().await;
        assert!(start.elapsed() >= Duration::from_millis(50));
    }
}
