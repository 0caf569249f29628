//! Quota-aware retry controller
//!
//! Wraps a single generation call with bounded retries:
//! rate limits wait out a cooldown window, transient faults back off
//! exponentially, and everything else fails the slot immediately.
//! A successful call is followed by a mandatory cooldown, which acts as a
//! self-imposed rate limit across the whole batch.
//!
//! The controller never returns an error. Every slot ends as either
//! [`SlotGeneration::Generated`] or [`SlotGeneration::Failed`], and the
//! pipeline substitutes the slot's fallback for the latter.
//!
//! # Example
//!
//! ```no_run
//! use content_press::retry::{RetryPolicy, SlotGeneration, TokioSleeper, generate_with_retry};
//! use content_press::error::GenerationError;
//!
//! # async fn example() {
//! let policy = RetryPolicy::default();
//! let outcome = generate_with_retry(&policy, &TokioSleeper, || async {
//!     Ok::<_, GenerationError>(vec![0u8; 16])
//! })
//! .await;
//! assert!(matches!(outcome, SlotGeneration::Generated { .. }));
//! # }
//! ```

use async_trait::async_trait;
use rand::Rng;
use std::future::Future;
use std::time::Duration;

use crate::config::RetryConfig;
use crate::error::{Error, GenerationError};

/// Trait for errors that can be classified as retryable or not
pub trait IsRetryable {
    /// Returns true if the error is transient and the operation should be retried
    fn is_retryable(&self) -> bool;

    /// Returns true if the error means the quota was exceeded
    fn is_rate_limited(&self) -> bool {
        false
    }

    /// Server-provided wait hint, if any
    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

impl IsRetryable for GenerationError {
    fn is_retryable(&self) -> bool {
        matches!(
            self,
            GenerationError::RateLimited { .. } | GenerationError::Transient(_)
        )
    }

    fn is_rate_limited(&self) -> bool {
        matches!(self, GenerationError::RateLimited { .. })
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            GenerationError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

impl IsRetryable for Error {
    fn is_retryable(&self) -> bool {
        match self {
            Error::Generation(e) => e.is_retryable(),
            Error::Network(e) => e.is_timeout() || e.is_connect(),
            Error::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::ConnectionRefused
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::Interrupted
            ),
            _ => false,
        }
    }

    fn is_rate_limited(&self) -> bool {
        matches!(self, Error::Generation(e) if e.is_rate_limited())
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            Error::Generation(e) => e.retry_after(),
            _ => None,
        }
    }
}

/// Source of delays
///
/// Production code sleeps on the tokio timer; tests record the requested
/// durations instead of waiting.
#[async_trait]
pub trait Sleeper: Send + Sync {
    /// Wait for `duration`
    async fn sleep(&self, duration: Duration);
}

/// Sleeper backed by `tokio::time::sleep`
#[derive(Clone, Copy, Debug, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Retry and cooldown policy for one slot
#[derive(Clone, Debug, PartialEq)]
pub struct RetryPolicy {
    /// Total calls allowed, first attempt included (0 behaves as 1)
    pub max_attempts: u32,
    /// Wait after a rate-limit response
    pub rate_limit_cooldown: Duration,
    /// Initial wait after a transient fault
    pub transient_delay: Duration,
    /// Growth factor for successive transient waits
    pub backoff_multiplier: f64,
    /// Upper bound for transient waits
    pub max_delay: Duration,
    /// Randomize transient waits
    pub jitter: bool,
    /// Wait after every success
    pub success_cooldown: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            rate_limit_cooldown: config.rate_limit_cooldown,
            transient_delay: config.transient_delay,
            backoff_multiplier: config.backoff_multiplier,
            max_delay: config.max_delay,
            jitter: config.jitter,
            success_cooldown: config.success_cooldown,
        }
    }
}

impl RetryPolicy {
    fn attempt_budget(&self) -> u32 {
        self.max_attempts.max(1)
    }

    fn cooldown_for<E: IsRetryable>(&self, error: &E) -> Duration {
        match error.retry_after() {
            Some(hint) if hint > self.rate_limit_cooldown => hint,
            _ => self.rate_limit_cooldown,
        }
    }
}

/// Progress of one slot's generation
///
/// Lives only for the duration of [`generate_with_retry`].
#[derive(Clone, Debug)]
pub struct RetryState {
    /// Calls made so far
    pub attempts: u32,
    /// Class of the most recent failure
    pub last_error: Option<&'static str>,
    /// Next transient backoff
    pub next_delay: Duration,
}

impl RetryState {
    fn new(policy: &RetryPolicy) -> Self {
        Self {
            attempts: 0,
            last_error: None,
            next_delay: policy.transient_delay,
        }
    }

    fn advance_backoff(&mut self, policy: &RetryPolicy) {
        // Capped in f64 first; the raw product can exceed what Duration holds.
        let next = (self.next_delay.as_secs_f64() * policy.backoff_multiplier.max(1.0))
            .min(policy.max_delay.as_secs_f64());
        self.next_delay = Duration::try_from_secs_f64(next).unwrap_or(policy.max_delay);
    }
}

/// Final result of generating one slot
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SlotGeneration {
    /// The service returned an image
    Generated {
        /// Image bytes
        bytes: Vec<u8>,
        /// Calls spent
        attempts: u32,
    },
    /// The slot failed permanently and must use its fallback
    Failed {
        /// Last error, rendered
        reason: String,
        /// Calls spent
        attempts: u32,
        /// No credential was available; later slots should not call again
        unavailable: bool,
    },
}

impl SlotGeneration {
    /// Calls spent on this slot
    pub fn attempts(&self) -> u32 {
        match self {
            SlotGeneration::Generated { attempts, .. } | SlotGeneration::Failed { attempts, .. } => {
                *attempts
            }
        }
    }
}

/// Run `operation` under `policy`
///
/// Sleeps only through `sleeper`, so the schedule is observable in tests.
pub async fn generate_with_retry<F, Fut>(
    policy: &RetryPolicy,
    sleeper: &dyn Sleeper,
    mut operation: F,
) -> SlotGeneration
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Vec<u8>, GenerationError>>,
{
    let budget = policy.attempt_budget();
    let mut state = RetryState::new(policy);

    loop {
        state.attempts += 1;
        match operation().await {
            Ok(bytes) => {
                if state.attempts > 1 {
                    tracing::info!(
                        attempts = state.attempts,
                        last_error = ?state.last_error,
                        "Generation succeeded after retry"
                    );
                }
                if !policy.success_cooldown.is_zero() {
                    tracing::debug!(
                        cooldown_ms = policy.success_cooldown.as_millis() as u64,
                        "Applying post-success cooldown"
                    );
                    sleeper.sleep(policy.success_cooldown).await;
                }
                return SlotGeneration::Generated {
                    bytes,
                    attempts: state.attempts,
                };
            }
            Err(e) if e.is_retryable() && state.attempts < budget => {
                state.last_error = Some(e.code());
                let delay = if e.is_rate_limited() {
                    policy.cooldown_for(&e)
                } else {
                    let delay = if policy.jitter {
                        add_jitter(state.next_delay)
                    } else {
                        state.next_delay
                    };
                    state.advance_backoff(policy);
                    delay
                };

                tracing::warn!(
                    error = %e,
                    class = e.code(),
                    attempt = state.attempts,
                    max_attempts = budget,
                    delay_ms = delay.as_millis() as u64,
                    "Generation failed, retrying"
                );
                sleeper.sleep(delay).await;
            }
            Err(e) => {
                if e.is_retryable() {
                    tracing::warn!(
                        error = %e,
                        attempts = state.attempts,
                        "Generation failed after all retry attempts exhausted"
                    );
                } else {
                    tracing::warn!(
                        error = %e,
                        class = e.code(),
                        "Generation failed with non-retryable error"
                    );
                }
                return SlotGeneration::Failed {
                    reason: e.to_string(),
                    attempts: state.attempts,
                    unavailable: matches!(e, GenerationError::Unavailable(_)),
                };
            }
        }
    }
}

/// Add random jitter to a delay
///
/// The result lies between `delay` and `2 * delay`.
fn add_jitter(delay: Duration) -> Duration {
    let mut rng = rand::thread_rng();
    let jitter_factor: f64 = rng.gen_range(0.0..=1.0);
    Duration::try_from_secs_f64(delay.as_secs_f64() * (1.0 + jitter_factor)).unwrap_or(delay)
}

/// Sleeper that records requested durations without waiting
#[cfg(test)]
#[derive(Default)]
pub(crate) struct RecordingSleeper {
    pub(crate) sleeps: std::sync::Mutex<Vec<Duration>>,
}

#[cfg(test)]
impl RecordingSleeper {
    #[allow(clippy::unwrap_used)]
    pub(crate) fn recorded(&self) -> Vec<Duration> {
        self.sleeps.lock().unwrap().clone()
    }
}

#[cfg(test)]
#[async_trait]
impl Sleeper for RecordingSleeper {
    #[allow(clippy::unwrap_used)]
    async fn sleep(&self, duration: Duration) {
        self.sleeps.lock().unwrap().push(duration);
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            rate_limit_cooldown: Duration::from_secs(30),
            transient_delay: Duration::from_secs(5),
            backoff_multiplier: 2.0,
            max_delay: Duration::from_secs(8),
            jitter: false,
            success_cooldown: Duration::from_secs(10),
        }
    }

    /// Replays `script` in order, one entry per call
    fn scripted(
        script: Vec<Result<Vec<u8>, GenerationError>>,
    ) -> (
        Arc<AtomicU32>,
        impl FnMut() -> std::future::Ready<Result<Vec<u8>, GenerationError>>,
    ) {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let op = move || {
            let n = counter.fetch_add(1, Ordering::SeqCst) as usize;
            let result = script
                .get(n)
                .cloned()
                .unwrap_or_else(|| Err(GenerationError::Transient("script exhausted".into())));
            std::future::ready(result)
        };
        (calls, op)
    }

    #[tokio::test]
    async fn huge_backoff_multiplier_is_capped_at_max_delay() {
        let sleeper = RecordingSleeper::default();
        let policy = RetryPolicy {
            backoff_multiplier: 1e300,
            ..policy()
        };
        let (calls, op) = scripted(vec![
            Err(GenerationError::Transient("503".into())),
            Err(GenerationError::Transient("503".into())),
            Err(GenerationError::Transient("503".into())),
        ]);

        let outcome = generate_with_retry(&policy, &sleeper, op).await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(matches!(outcome, SlotGeneration::Failed { attempts: 3, .. }));
        assert_eq!(
            sleeper.recorded(),
            vec![Duration::from_secs(5), Duration::from_secs(8)]
        );
    }

    #[tokio::test]
    async fn jitter_on_near_maximum_delays_does_not_overflow() {
        let sleeper = RecordingSleeper::default();
        let near_max = Duration::from_secs(u64::MAX / 2 + 1);
        let policy = RetryPolicy {
            transient_delay: near_max,
            max_delay: Duration::MAX,
            backoff_multiplier: 4.0,
            jitter: true,
            ..policy()
        };
        let (_calls, op) = scripted(vec![
            Err(GenerationError::Transient("timeout".into())),
            Err(GenerationError::Transient("timeout".into())),
            Ok(vec![7]),
        ]);

        let outcome = generate_with_retry(&policy, &sleeper, op).await;

        assert!(matches!(outcome, SlotGeneration::Generated { attempts: 3, .. }));
        let sleeps = sleeper.recorded();
        assert_eq!(sleeps.len(), 3);
        assert!(sleeps[0] >= near_max);
        assert!(sleeps[1] >= near_max);
    }

    #[tokio::test]
    async fn success_first_try_still_cools_down() {
        let sleeper = RecordingSleeper::default();
        let (calls, op) = scripted(vec![Ok(vec![1, 2, 3])]);

        let outcome = generate_with_retry(&policy(), &sleeper, op).await;

        assert_eq!(
            outcome,
            SlotGeneration::Generated {
                bytes: vec![1, 2, 3],
                attempts: 1
            }
        );
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(sleeper.recorded(), vec![Duration::from_secs(10)]);
    }

    #[tokio::test]
    async fn rate_limited_twice_then_success_sleeps_two_cooldowns() {
        let sleeper = RecordingSleeper::default();
        let (calls, op) = scripted(vec![
            Err(GenerationError::RateLimited { retry_after: None }),
            Err(GenerationError::RateLimited { retry_after: None }),
            Ok(vec![9]),
        ]);

        let outcome = generate_with_retry(&policy(), &sleeper, op).await;

        assert_eq!(outcome.attempts(), 3);
        assert!(matches!(outcome, SlotGeneration::Generated { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        let cooldowns: Vec<_> = sleeper
            .recorded()
            .into_iter()
            .filter(|d| *d == Duration::from_secs(30))
            .collect();
        assert_eq!(cooldowns.len(), 2);
        assert_eq!(
            sleeper.recorded(),
            vec![
                Duration::from_secs(30),
                Duration::from_secs(30),
                Duration::from_secs(10)
            ]
        );
    }

    #[tokio::test]
    async fn always_rate_limited_stops_at_max_attempts() {
        let sleeper = RecordingSleeper::default();
        let (calls, op) = scripted(vec![
            Err(GenerationError::RateLimited { retry_after: None });
            10
        ]);

        let outcome = generate_with_retry(&policy(), &sleeper, op).await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        match outcome {
            SlotGeneration::Failed {
                attempts,
                unavailable,
                ..
            } => {
                assert_eq!(attempts, 3);
                assert!(!unavailable);
            }
            other => panic!("expected Failed, got {other:?}"),
        }
        // No sleep after the final attempt
        assert_eq!(sleeper.recorded().len(), 2);
    }

    #[tokio::test]
    async fn rejected_is_not_retried() {
        let sleeper = RecordingSleeper::default();
        let (calls, op) = scripted(vec![Err(GenerationError::Rejected("policy".into()))]);

        let outcome = generate_with_retry(&policy(), &sleeper, op).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(outcome, SlotGeneration::Failed { attempts: 1, .. }));
        assert!(sleeper.recorded().is_empty());
    }

    #[tokio::test]
    async fn unavailable_is_not_retried_and_flagged() {
        let sleeper = RecordingSleeper::default();
        let (calls, op) = scripted(vec![Err(GenerationError::Unavailable("no token".into()))]);

        let outcome = generate_with_retry(&policy(), &sleeper, op).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(
            outcome,
            SlotGeneration::Failed {
                unavailable: true,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn transient_backoff_grows_and_caps() {
        let sleeper = RecordingSleeper::default();
        let mut p = policy();
        p.max_attempts = 4;
        let (_, op) = scripted(vec![
            Err(GenerationError::Transient("503".into()));
            4
        ]);

        generate_with_retry(&p, &sleeper, op).await;

        assert_eq!(
            sleeper.recorded(),
            vec![
                Duration::from_secs(5),
                Duration::from_secs(8),
                Duration::from_secs(8)
            ]
        );
    }

    #[tokio::test]
    async fn long_retry_after_hint_wins() {
        let sleeper = RecordingSleeper::default();
        let (_, op) = scripted(vec![
            Err(GenerationError::RateLimited {
                retry_after: Some(Duration::from_secs(90)),
            }),
            Err(GenerationError::RateLimited {
                retry_after: Some(Duration::from_secs(1)),
            }),
            Ok(vec![1]),
        ]);

        generate_with_retry(&policy(), &sleeper, op).await;

        assert_eq!(
            &sleeper.recorded()[..2],
            &[Duration::from_secs(90), Duration::from_secs(30)]
        );
    }

    #[tokio::test]
    async fn zero_attempts_behaves_as_one() {
        let sleeper = RecordingSleeper::default();
        let mut p = policy();
        p.max_attempts = 0;
        let (calls, op) = scripted(vec![Err(GenerationError::Transient("x".into())); 3]);

        let outcome = generate_with_retry(&p, &sleeper, op).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(outcome.attempts(), 1);
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let base = Duration::from_secs(4);
        for _ in 0..100 {
            let d = add_jitter(base);
            assert!(d >= base && d <= base * 2);
        }
    }

    #[test]
    fn error_classification() {
        assert!(GenerationError::RateLimited { retry_after: None }.is_retryable());
        assert!(GenerationError::Transient("x".into()).is_retryable());
        assert!(!GenerationError::Rejected("x".into()).is_retryable());
        assert!(!GenerationError::Unavailable("x".into()).is_retryable());
        assert!(Error::Generation(GenerationError::RateLimited { retry_after: None })
            .is_rate_limited());
        assert!(!Error::config("k", "v").is_retryable());
    }
}
