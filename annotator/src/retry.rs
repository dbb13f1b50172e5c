//! Retry policy for vendor calls.
//!
//! The decision of whether and how long to wait is a pure function of the
//! policy, the attempt number, the elapsed time and a jitter sample. Time and
//! randomness reach the transport through the [`Clock`], [`Sleeper`] and
//! [`Jitter`] seams so tests can drive them deterministically.

use async_trait::async_trait;
use http::StatusCode;
use rand::Rng;
use std::time::{Duration, Instant};

#[derive(Clone, Debug, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts per call, including the first one.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    /// Upper bound of the random delay added to each backoff.
    pub jitter: Duration,
    /// No retry is started if its delay would end past this budget.
    pub max_elapsed: Duration,
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 4,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
            multiplier: 2.0,
            jitter: Duration::from_millis(250),
            max_elapsed: Duration::from_secs(60),
            attempt_timeout: Duration::from_secs(30),
        }
    }
}

/// Why a single attempt did not succeed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailureClass {
    Timeout,
    Network,
    RateLimited { retry_after: Option<Duration> },
    ServerError,
    ClientError,
}

impl FailureClass {
    /// Classifies a non-success status code.
    pub fn from_status(status: StatusCode, retry_after: Option<Duration>) -> Self {
        if status == StatusCode::TOO_MANY_REQUESTS {
            FailureClass::RateLimited { retry_after }
        } else if status.is_server_error() {
            FailureClass::ServerError
        } else {
            FailureClass::ClientError
        }
    }

    pub fn is_retryable(&self) -> bool {
        !matches!(self, FailureClass::ClientError)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetryDecision {
    RetryAfter(Duration),
    GiveUp,
}

impl RetryPolicy {
    /// Backoff before the attempt following `attempt` (1-based), without jitter.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let secs = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);
        Duration::try_from_secs_f64(secs)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Decides what to do after `attempt` failed with `failure`.
    ///
    /// `elapsed` is the time spent on this call so far and `jitter` a random
    /// sample; it is clamped to the policy's jitter bound.
    pub fn decide(
        &self,
        attempt: u32,
        elapsed: Duration,
        failure: &FailureClass,
        jitter: Duration,
    ) -> RetryDecision {
        if !failure.is_retryable() || attempt >= self.max_attempts {
            return RetryDecision::GiveUp;
        }

        let mut delay = self.backoff(attempt) + jitter.min(self.jitter);
        if let FailureClass::RateLimited {
            retry_after: Some(retry_after),
        } = failure
        {
            delay = delay.max(*retry_after);
        }
        let delay = delay.min(self.max_delay);

        if elapsed + delay > self.max_elapsed {
            return RetryDecision::GiveUp;
        }
        RetryDecision::RetryAfter(delay)
    }
}

pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

pub trait Jitter: Send + Sync {
    /// Returns a duration in `[0, max]`.
    fn sample(&self, max: Duration) -> Duration;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct RandomJitter;

impl Jitter for RandomJitter {
    fn sample(&self, max: Duration) -> Duration {
        let max_ms = u64::try_from(max.as_millis()).unwrap_or(u64::MAX);
        if max_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..=max_ms))
    }
}

/// Jitter source that always returns zero.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoJitter;

impl Jitter for NoJitter {
    fn sample(&self, _max: Duration) -> Duration {
        Duration::ZERO
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 4,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(3),
            multiplier: 2.0,
            jitter: Duration::from_millis(100),
            max_elapsed: Duration::from_secs(10),
            attempt_timeout: Duration::from_secs(30),
        }
    }

    #[test]
    fn exponential_backoff_is_capped() {
        let policy = policy();
        assert_eq!(policy.backoff(1), Duration::from_millis(500));
        assert_eq!(policy.backoff(2), Duration::from_millis(1000));
        assert_eq!(policy.backoff(3), Duration::from_millis(2000));
        assert_eq!(policy.backoff(4), Duration::from_secs(3));
        assert_eq!(policy.backoff(u32::MAX), Duration::from_secs(3));
    }

    #[test]
    fn classification() {
        assert_eq!(
            FailureClass::from_status(StatusCode::TOO_MANY_REQUESTS, None),
            FailureClass::RateLimited { retry_after: None }
        );
        assert_eq!(
            FailureClass::from_status(StatusCode::BAD_GATEWAY, None),
            FailureClass::ServerError
        );
        assert_eq!(
            FailureClass::from_status(StatusCode::NOT_FOUND, None),
            FailureClass::ClientError
        );
        assert!(!FailureClass::ClientError.is_retryable());
        assert!(FailureClass::Timeout.is_retryable());
        assert!(FailureClass::Network.is_retryable());
    }

    #[test]
    fn decisions_are_deterministic_for_fixed_jitter() {
        let policy = policy();
        let jitter = Duration::from_millis(40);

        assert_eq!(
            policy.decide(1, Duration::ZERO, &FailureClass::ServerError, jitter),
            RetryDecision::RetryAfter(Duration::from_millis(540))
        );
        assert_eq!(
            policy.decide(2, Duration::ZERO, &FailureClass::Timeout, jitter),
            RetryDecision::RetryAfter(Duration::from_millis(1040))
        );
        // Jitter above the bound is clamped.
        assert_eq!(
            policy.decide(1, Duration::ZERO, &FailureClass::Network, Duration::from_secs(5)),
            RetryDecision::RetryAfter(Duration::from_millis(600))
        );
    }

    #[test]
    fn gives_up_on_client_errors_and_exhaustion() {
        let policy = policy();
        assert_eq!(
            policy.decide(1, Duration::ZERO, &FailureClass::ClientError, Duration::ZERO),
            RetryDecision::GiveUp
        );
        assert_eq!(
            policy.decide(4, Duration::ZERO, &FailureClass::ServerError, Duration::ZERO),
            RetryDecision::GiveUp
        );
    }

    #[test]
    fn respects_elapsed_budget() {
        let policy = policy();
        assert_eq!(
            policy.decide(
                1,
                Duration::from_millis(9_600),
                &FailureClass::ServerError,
                Duration::ZERO
            ),
            RetryDecision::GiveUp
        );
        assert_eq!(
            policy.decide(
                1,
                Duration::from_millis(9_500),
                &FailureClass::ServerError,
                Duration::ZERO
            ),
            RetryDecision::RetryAfter(Duration::from_millis(500))
        );
    }

    #[test]
    fn retry_after_raises_delay_up_to_cap() {
        let policy = policy();
        let limited = FailureClass::RateLimited {
            retry_after: Some(Duration::from_secs(2)),
        };
        assert_eq!(
            policy.decide(1, Duration::ZERO, &limited, Duration::ZERO),
            RetryDecision::RetryAfter(Duration::from_secs(2))
        );

        let limited = FailureClass::RateLimited {
            retry_after: Some(Duration::from_secs(120)),
        };
        assert_eq!(
            policy.decide(1, Duration::ZERO, &limited, Duration::ZERO),
            RetryDecision::RetryAfter(Duration::from_secs(3))
        );
    }

    #[test]
    fn random_jitter_stays_in_bounds() {
        let jitter = RandomJitter;
        for _ in 0..100 {
            assert!(jitter.sample(Duration::from_millis(50)) <= Duration::from_millis(50));
        }
        assert_eq!(jitter.sample(Duration::ZERO), Duration::ZERO);
    }
}
