//! Retry policy for transient failures
//!
//! Backoff is computed from the retry count persisted on the operation row,
//! so a restart resumes the schedule where it left off:
//!
//! ```text
//! delay = min(max_delay, base_delay * multiplier^attempt) * (1 ± jitter)
//! ```
//!
//! A server-provided `Retry-After` raises the delay to at least that value.

use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;

use foldsync_core::config::RetryConfig;

/// Shortest delay ever returned, so a retry is never scheduled in the past
const MIN_DELAY: Duration = Duration::from_millis(1);

/// Longest server-requested wait honoured
const MAX_REQUESTED_DELAY: Duration = Duration::from_secs(3600);

/// What to do with an operation after a transient failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Requeue with the new retry count once `next_attempt_at` has passed
    Retry {
        retry_count: u32,
        next_attempt_at: DateTime<Utc>,
        delay: Duration,
    },
    /// Attempts exhausted; the operation becomes `failed`
    GiveUp { retry_count: u32 },
}

/// Exponential backoff with jitter and a capped number of attempts
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    base_delay: Duration,
    multiplier: f64,
    jitter: f64,
    max_attempts: u32,
    max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl RetryPolicy {
    pub fn new(
        base_delay: Duration,
        multiplier: f64,
        jitter: f64,
        max_attempts: u32,
        max_delay: Duration,
    ) -> Self {
        Self {
            base_delay,
            multiplier: multiplier.max(1.0),
            jitter: jitter.clamp(0.0, 0.99),
            max_attempts: max_attempts.max(1),
            max_delay,
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(
            config.base_delay(),
            config.multiplier,
            config.jitter,
            config.max_attempts,
            config.max_delay(),
        )
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay before retrying after failed attempt number `attempt` (0-based)
    pub fn delay_for<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let raw = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);
        let capped = raw.min(self.max_delay.as_secs_f64());

        let factor = if self.jitter > 0.0 {
            rng.gen_range(1.0 - self.jitter..=1.0 + self.jitter)
        } else {
            1.0
        };

        Duration::try_from_secs_f64(capped * factor)
            .unwrap_or(self.max_delay)
            .max(MIN_DELAY)
    }

    /// Decides the fate of an operation that failed with `retry_count`
    /// previous failures
    pub fn decide(
        &self,
        retry_count: u32,
        retry_after: Option<Duration>,
        now: DateTime<Utc>,
    ) -> RetryDecision {
        self.decide_with_rng(retry_count, retry_after, now, &mut rand::thread_rng())
    }

    pub fn decide_with_rng<R: Rng + ?Sized>(
        &self,
        retry_count: u32,
        retry_after: Option<Duration>,
        now: DateTime<Utc>,
        rng: &mut R,
    ) -> RetryDecision {
        let attempts = retry_count.saturating_add(1);
        if attempts >= self.max_attempts {
            return RetryDecision::GiveUp {
                retry_count: attempts,
            };
        }

        let mut delay = self.delay_for(retry_count, rng);
        if let Some(requested) = retry_after {
            delay = delay.max(requested.min(MAX_REQUESTED_DELAY));
        }
        let next_attempt_at = chrono::Duration::from_std(delay)
            .ok()
            .and_then(|d| now.checked_add_signed(d))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        RetryDecision::Retry {
            retry_count: attempts,
            next_attempt_at,
            delay,
        }
    }
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use super::*;

    fn policy(jitter: f64) -> RetryPolicy {
        RetryPolicy::new(
            Duration::from_secs(1),
            2.0,
            jitter,
            5,
            Duration::from_secs(10),
        )
    }

    #[test]
    fn test_delay_grows_exponentially_without_jitter() {
        let p = policy(0.0);
        let mut rng = StdRng::seed_from_u64(7);
        let delays: Vec<u64> = (0..4).map(|a| p.delay_for(a, &mut rng).as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8]);
    }

    #[test]
    fn test_delay_capped_at_max() {
        let p = policy(0.0);
        let mut rng = StdRng::seed_from_u64(7);
        assert_eq!(p.delay_for(4, &mut rng), Duration::from_secs(10));
        assert_eq!(p.delay_for(60, &mut rng), Duration::from_secs(10));
        assert_eq!(p.delay_for(u32::MAX, &mut rng), Duration::from_secs(10));
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let p = policy(0.25);
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..200 {
            let d = p.delay_for(2, &mut rng).as_secs_f64();
            assert!((3.0..=5.0).contains(&d), "delay {d} outside 4s ± 25%");
        }
    }

    #[test]
    fn test_jitter_is_deterministic_for_seed() {
        let p = policy(0.2);
        let a = p.delay_for(3, &mut StdRng::seed_from_u64(99));
        let b = p.delay_for(3, &mut StdRng::seed_from_u64(99));
        assert_eq!(a, b);
    }

    #[test]
    fn test_delay_never_zero() {
        let p = RetryPolicy::new(Duration::ZERO, 1.0, 0.0, 3, Duration::ZERO);
        let mut rng = StdRng::seed_from_u64(1);
        assert!(p.delay_for(0, &mut rng) > Duration::ZERO);
    }

    #[test]
    fn test_retry_count_increments_and_schedule_advances() {
        let p = policy(0.1);
        let mut rng = StdRng::seed_from_u64(3);
        let mut now = Utc::now();
        let mut count = 0;
        let mut last_attempt = now;

        for expected in 1..5 {
            match p.decide_with_rng(count, None, now, &mut rng) {
                RetryDecision::Retry {
                    retry_count,
                    next_attempt_at,
                    ..
                } => {
                    assert_eq!(retry_count, expected);
                    assert!(next_attempt_at > last_attempt);
                    last_attempt = next_attempt_at;
                    count = retry_count;
                    now = next_attempt_at;
                }
                RetryDecision::GiveUp { .. } => panic!("gave up after {count} failures"),
            }
        }

        assert_eq!(
            p.decide_with_rng(count, None, now, &mut rng),
            RetryDecision::GiveUp { retry_count: 5 }
        );
    }

    #[test]
    fn test_single_attempt_policy_gives_up_immediately() {
        let p = RetryPolicy::new(Duration::from_secs(1), 2.0, 0.0, 1, Duration::from_secs(5));
        assert_eq!(
            p.decide(0, None, Utc::now()),
            RetryDecision::GiveUp { retry_count: 1 }
        );
    }

    #[test]
    fn test_retry_after_raises_delay() {
        let p = policy(0.0);
        let now = Utc::now();
        let mut rng = StdRng::seed_from_u64(5);
        match p.decide_with_rng(0, Some(Duration::from_secs(30)), now, &mut rng) {
            RetryDecision::Retry {
                delay,
                next_attempt_at,
                ..
            } => {
                assert_eq!(delay, Duration::from_secs(30));
                assert_eq!(next_attempt_at, now + chrono::Duration::seconds(30));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_huge_retry_after_is_capped() {
        let p = policy(0.0);
        let now = Utc::now();
        let mut rng = StdRng::seed_from_u64(5);
        match p.decide_with_rng(0, Some(Duration::from_secs(99_999_999_999_999)), now, &mut rng) {
            RetryDecision::Retry {
                delay,
                next_attempt_at,
                ..
            } => {
                assert_eq!(delay, MAX_REQUESTED_DELAY);
                assert_eq!(next_attempt_at, now + chrono::Duration::hours(1));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_schedule_saturates_instead_of_overflowing() {
        let p = RetryPolicy::new(
            Duration::from_secs(u64::MAX / 4),
            2.0,
            0.0,
            5,
            Duration::from_secs(u64::MAX / 2),
        );
        let mut rng = StdRng::seed_from_u64(5);
        match p.decide_with_rng(3, None, Utc::now(), &mut rng) {
            RetryDecision::Retry { next_attempt_at, .. } => {
                assert_eq!(next_attempt_at, DateTime::<Utc>::MAX_UTC);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_from_config_clamps_values() {
        let config = RetryConfig {
            base_delay_ms: 500,
            multiplier: 0.5,
            jitter: 3.0,
            max_attempts: 0,
            max_delay_secs: 60,
        };
        let p = RetryPolicy::from_config(&config);
        assert_eq!(p.max_attempts(), 1);
        assert_eq!(p.multiplier, 1.0);
        assert!(p.jitter < 1.0);
    }
}
