//! Request limiting using a token bucket
//!
//! The RequestLimiter caps the aggregate rate of generation calls across all
//! concurrent slot workers. It only matters when more than one worker runs;
//! the sequential pipeline is already paced by the post-success cooldown.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Token units per request, so partial refills are not lost to rounding
const UNITS_PER_REQUEST: u64 = 1_000_000;

/// Shared request-rate limiter
///
/// Lock-free token bucket:
/// - `rate_per_minute`: requests allowed per minute (0 = unlimited)
/// - `tokens`: available units (one request costs [`UNITS_PER_REQUEST`])
/// - `last_refill`: timestamp of the last refill in nanoseconds
///
/// The bucket holds at most one request, so calls are spread evenly and
/// never burst past the quota.
#[derive(Clone)]
pub struct RequestLimiter {
    rate_per_minute: Arc<AtomicU64>,
    tokens: Arc<AtomicU64>,
    last_refill: Arc<AtomicU64>,
}

impl RequestLimiter {
    /// Create a limiter allowing `requests_per_minute` (None = unlimited)
    ///
    /// ```
    /// use content_press::limiter::RequestLimiter;
    ///
    /// let limiter = RequestLimiter::new(Some(6));
    /// assert_eq!(limiter.rate_per_minute(), Some(6));
    ///
    /// let unlimited = RequestLimiter::new(None);
    /// assert_eq!(unlimited.rate_per_minute(), None);
    /// ```
    #[must_use]
    pub fn new(requests_per_minute: Option<u32>) -> Self {
        let rate = u64::from(requests_per_minute.unwrap_or(0));
        let initial = if rate == 0 { 0 } else { UNITS_PER_REQUEST };

        Self {
            rate_per_minute: Arc::new(AtomicU64::new(rate)),
            tokens: Arc::new(AtomicU64::new(initial)),
            last_refill: Arc::new(AtomicU64::new(Self::now_nanos())),
        }
    }

    /// Current rate, or None when unlimited
    pub fn rate_per_minute(&self) -> Option<u32> {
        let rate = self.rate_per_minute.load(Ordering::Relaxed);
        if rate == 0 {
            None
        } else {
            Some(u32::try_from(rate).unwrap_or(u32::MAX))
        }
    }

    /// Wait until one request may be made
    pub async fn acquire(&self) {
        loop {
            let rate = self.rate_per_minute.load(Ordering::Relaxed);
            if rate == 0 {
                return;
            }

            self.refill_tokens();

            let current = self.tokens.load(Ordering::SeqCst);
            if current >= UNITS_PER_REQUEST {
                if self
                    .tokens
                    .compare_exchange(
                        current,
                        current - UNITS_PER_REQUEST,
                        Ordering::SeqCst,
                        Ordering::SeqCst,
                    )
                    .is_ok()
                {
                    return;
                }
                continue;
            }

            let missing = UNITS_PER_REQUEST - current;
            let wait = Self::units_to_duration(missing, rate);
            tracing::trace!(
                wait_ms = wait.as_millis() as u64,
                "Request limiter waiting for quota"
            );
            tokio::time::sleep(wait.clamp(Duration::from_millis(10), Duration::from_secs(1)))
                .await;
        }
    }

    fn refill_tokens(&self) {
        let rate = self.rate_per_minute.load(Ordering::Relaxed);
        if rate == 0 {
            return;
        }

        let now = Self::now_nanos();
        let last = self.last_refill.load(Ordering::SeqCst);
        let elapsed_secs = now.saturating_sub(last) as f64 / 1_000_000_000.0;

        let units_to_add = (rate as f64 / 60.0 * elapsed_secs * UNITS_PER_REQUEST as f64) as u64;
        if units_to_add > 0
            && self
                .last_refill
                .compare_exchange(last, now, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
        {
            let current = self.tokens.load(Ordering::SeqCst);
            let refilled = current.saturating_add(units_to_add).min(UNITS_PER_REQUEST);
            self.tokens.store(refilled, Ordering::SeqCst);
        }
    }

    fn units_to_duration(units: u64, rate_per_minute: u64) -> Duration {
        let requests = units as f64 / UNITS_PER_REQUEST as f64;
        Duration::from_secs_f64(requests * 60.0 / rate_per_minute as f64)
    }

    /// Monotonic nanoseconds since an arbitrary process-wide epoch
    fn now_nanos() -> u64 {
        static START: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();
        let start = START.get_or_init(Instant::now);
        start.elapsed().as_nanos() as u64
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unlimited_returns_immediately() {
        let limiter = RequestLimiter::new(None);
        let start = Instant::now();
        for _ in 0..100 {
            limiter.acquire().await;
        }
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[tokio::test]
    async fn first_request_is_immediate() {
        let limiter = RequestLimiter::new(Some(1));
        let start = Instant::now();
        limiter.acquire().await;
        assert!(start.elapsed() < Duration::from_millis(50));
        assert!(limiter.tokens.load(Ordering::SeqCst) < UNITS_PER_REQUEST);
    }

    #[tokio::test]
    async fn second_request_waits_for_refill() {
        // 600/min = one request every 100ms
        let limiter = RequestLimiter::new(Some(600));
        limiter.acquire().await;

        let start = Instant::now();
        limiter.acquire().await;
        let elapsed = start.elapsed();
        assert!(
            elapsed >= Duration::from_millis(60),
            "second acquire should wait for refill, took {elapsed:?}"
        );
    }

    #[test]
    fn bucket_never_exceeds_one_request() {
        let limiter = RequestLimiter::new(Some(6000));
        std::thread::sleep(Duration::from_millis(50));
        limiter.refill_tokens();
        assert!(limiter.tokens.load(Ordering::SeqCst) <= UNITS_PER_REQUEST);
    }

    #[test]
    fn wait_duration_matches_rate() {
        let d = RequestLimiter::units_to_duration(UNITS_PER_REQUEST, 60);
        assert_eq!(d, Duration::from_secs(1));
    }
}
