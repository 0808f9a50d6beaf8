//! Retry executor: status-aware exponential backoff around remote calls.
//!
//! Only [`crate::error::RETRYABLE_STATUSES`] are retried. Backoff for attempt
//! `n` (0-indexed) is `base * 2^n` capped at `max_delay`, then jittered by
//! ±25%. A remote-supplied retry-after is used as-is (capped, no jitter).
//! Exhausting the attempts returns the last error observed.

use std::time::Duration;

use rand::Rng;

use featcat_core::config::RetryConfig;

use crate::cancel::CancelToken;
use crate::error::RemoteError;

/// Fraction of the computed delay added or removed at random.
pub const JITTER_FACTOR: f64 = 0.25;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total invocations, including the first. Values below 1 act as 1.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(cfg: &RetryConfig) -> Self {
        Self {
            max_attempts: cfg.max_attempts,
            base_delay: Duration::from_millis(cfg.base_delay_ms),
            max_delay: Duration::from_millis(cfg.max_delay_ms),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RetryExecutor {
    policy: RetryPolicy,
}

impl RetryExecutor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Invoke `call` until it succeeds, fails with a non-retryable error, or
    /// the attempts run out. `op` names the call in log events.
    pub fn run<T, F>(&self, op: &str, cancel: &CancelToken, mut call: F) -> Result<T, RemoteError>
    where
        F: FnMut() -> Result<T, RemoteError>,
    {
        let attempts = self.policy.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            cancel.check()?;
            let err = match call() {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };
            if !err.is_retryable() || attempt + 1 >= attempts {
                return Err(err);
            }
            cancel.check()?;
            let delay = self.backoff(attempt, err.retry_after());
            tracing::warn!(
                op,
                attempt = attempt + 1,
                max_attempts = attempts,
                status = err.status(),
                delay_ms = delay.as_millis() as u64,
                "remote call failed; retrying"
            );
            cancel.sleep(delay)?;
            attempt += 1;
        }
    }

    /// Delay before retrying after attempt `attempt` (0-indexed).
    pub fn backoff(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        if let Some(explicit) = retry_after {
            return explicit.min(self.policy.max_delay);
        }
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        let exponential = self
            .policy
            .base_delay
            .checked_mul(factor)
            .unwrap_or(self.policy.max_delay)
            .min(self.policy.max_delay);
        apply_jitter(exponential, JITTER_FACTOR)
    }
}

fn apply_jitter(duration: Duration, factor: f64) -> Duration {
    if duration.is_zero() {
        return duration;
    }
    let jitter = rand::rng().random_range(-factor..=factor);
    duration.mul_f64((1.0 + jitter).max(0.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::time::Instant;

    fn instant_policy(max_attempts: u32) -> RetryExecutor {
        RetryExecutor::new(RetryPolicy {
            max_attempts,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        })
    }

    #[test]
    fn succeeds_on_third_attempt_after_503s() {
        let calls = Cell::new(0);
        let exec = instant_policy(3);
        let out = exec.run("get", &CancelToken::new(), || {
            calls.set(calls.get() + 1);
            if calls.get() < 3 {
                Err(RemoteError::status_code(503, "unavailable"))
            } else {
                Ok("ok")
            }
        });
        assert_eq!(out.unwrap(), "ok");
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn persistent_503_fails_after_max_attempts_with_last_error() {
        let calls = Cell::new(0);
        let exec = instant_policy(3);
        let err = exec
            .run::<(), _>("get", &CancelToken::new(), || {
                calls.set(calls.get() + 1);
                Err(RemoteError::status_code(503, format!("attempt {}", calls.get())))
            })
            .unwrap_err();
        assert_eq!(calls.get(), 3);
        assert!(err.to_string().contains("attempt 3"), "{err}");
    }

    #[test]
    fn not_found_is_not_retried() {
        let calls = Cell::new(0);
        let err = instant_policy(3)
            .run::<(), _>("get", &CancelToken::new(), || {
                calls.set(calls.get() + 1);
                Err(RemoteError::status_code(404, "missing"))
            })
            .unwrap_err();
        assert_eq!(calls.get(), 1);
        assert_eq!(err.status(), Some(404));
    }

    #[test]
    fn transport_errors_are_not_retried() {
        let calls = Cell::new(0);
        let _ = instant_policy(5).run::<(), _>("get", &CancelToken::new(), || {
            calls.set(calls.get() + 1);
            Err(RemoteError::Transport("connection refused".into()))
        });
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn zero_attempts_still_calls_once() {
        let calls = Cell::new(0);
        let _ = instant_policy(0).run::<(), _>("get", &CancelToken::new(), || {
            calls.set(calls.get() + 1);
            Err(RemoteError::status_code(503, "x"))
        });
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn cancelled_token_prevents_any_call() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let calls = Cell::new(0);
        let err = instant_policy(3)
            .run::<(), _>("get", &cancel, || {
                calls.set(calls.get() + 1);
                Ok(())
            })
            .unwrap_err();
        assert!(matches!(err, RemoteError::Cancelled));
        assert_eq!(calls.get(), 0);
    }

    #[test]
    fn cancel_during_backoff_aborts_promptly() {
        let exec = RetryExecutor::new(RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_secs(20),
            max_delay: Duration::from_secs(30),
        });
        let cancel = CancelToken::new();
        let trigger = cancel.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(30));
            trigger.cancel();
        });
        let calls = Cell::new(0);
        let started = Instant::now();
        let err = exec
            .run::<(), _>("get", &cancel, || {
                calls.set(calls.get() + 1);
                Err(RemoteError::status_code(429, "slow down"))
            })
            .unwrap_err();
        handle.join().unwrap();
        assert!(matches!(err, RemoteError::Cancelled));
        assert_eq!(calls.get(), 1);
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn first_backoff_is_jittered_around_base() {
        let exec = RetryExecutor::default();
        for _ in 0..200 {
            let d = exec.backoff(0, None);
            assert!(d >= Duration::from_millis(750), "{d:?}");
            assert!(d <= Duration::from_millis(1250), "{d:?}");
        }
    }

    #[test]
    fn backoff_grows_and_is_capped_before_jitter() {
        let exec = RetryExecutor::default();
        let d = exec.backoff(2, None);
        assert!(d >= Duration::from_millis(3000) && d <= Duration::from_millis(5000), "{d:?}");
        let capped = exec.backoff(40, None);
        assert!(capped >= Duration::from_millis(22_500), "{capped:?}");
        assert!(capped <= Duration::from_millis(37_500), "{capped:?}");
    }

    #[test]
    fn explicit_retry_after_is_exact_and_capped() {
        let exec = RetryExecutor::default();
        assert_eq!(exec.backoff(0, Some(Duration::from_secs(10))), Duration::from_secs(10));
        assert_eq!(exec.backoff(1, Some(Duration::from_secs(60))), Duration::from_secs(30));
    }
}
