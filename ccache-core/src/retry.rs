//! # Retry Wrapper
//!
//! Thin decorator around a fallible operation: bounded attempts, exponential
//! backoff between them, and an overall deadline. A closure that reports
//! success is never re-invoked, so a committed mutation cannot be replayed.

use std::time::{Duration, Instant};

/// Backoff and budget parameters.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_interval: Duration,
    pub max_interval: Duration,
    pub multiplier: f64,
    /// Overall deadline across all attempts and sleeps.
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 3,
            initial_interval: Duration::from_millis(10),
            max_interval: Duration::from_millis(500),
            multiplier: 2.0,
            timeout: Duration::from_secs(5),
        }
    }
}

/// Terminal outcomes of a retried operation.
#[derive(Debug, PartialEq, Eq)]
pub enum RetryError<E> {
    /// Deadline elapsed; carries the last operation error, if any attempt ran.
    Timeout(Option<E>),
    /// Attempt budget exhausted; carries the final error.
    MaxAttemptsExceeded(E),
}

pub struct Retry {
    policy: RetryPolicy,
}

impl Retry {
    pub fn new(policy: RetryPolicy) -> Self {
        Retry { policy }
    }

    /// Runs `op` until it succeeds, the attempt budget runs out, or the
    /// deadline passes. Sleeps are truncated to the remaining deadline.
    pub fn call<T, E>(&self, mut op: impl FnMut() -> Result<T, E>) -> Result<T, RetryError<E>> {
        let deadline = Instant::now() + self.policy.timeout;
        let mut interval = self.policy.initial_interval;
        let mut last_err: Option<E> = None;

        for attempt in 1..=self.policy.max_attempts.max(1) {
            if Instant::now() >= deadline {
                return Err(RetryError::Timeout(last_err));
            }

            match op() {
                Ok(value) => return Ok(value),
                Err(err) => last_err = Some(err),
            }

            if attempt == self.policy.max_attempts.max(1) {
                break;
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(RetryError::Timeout(last_err));
            }
            std::thread::sleep(interval.min(remaining));
            interval = scale(interval, self.policy.multiplier).min(self.policy.max_interval);
        }

        Err(RetryError::MaxAttemptsExceeded(
            last_err.expect("at least one attempt ran"),
        ))
    }
}

fn scale(interval: Duration, multiplier: f64) -> Duration {
    Duration::from_secs_f64((interval.as_secs_f64() * multiplier).max(0.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quick_policy(attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts: attempts,
            initial_interval: Duration::from_millis(1),
            max_interval: Duration::from_millis(2),
            multiplier: 2.0,
            timeout: Duration::from_secs(1),
        }
    }

    #[test]
    fn success_stops_retrying() {
        let retry = Retry::new(quick_policy(5));
        let mut calls = 0;
        let result: Result<u32, RetryError<&str>> = retry.call(|| {
            calls += 1;
            if calls < 3 { Err("not yet") } else { Ok(7) }
        });
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls, 3);
    }

    #[test]
    fn exhausted_attempts_return_last_error() {
        let retry = Retry::new(quick_policy(3));
        let mut calls = 0;
        let result: Result<(), RetryError<u32>> = retry.call(|| {
            calls += 1;
            Err(calls)
        });
        assert_eq!(result, Err(RetryError::MaxAttemptsExceeded(3)));
    }

    #[test]
    fn deadline_cuts_off_attempts() {
        let retry = Retry::new(RetryPolicy {
            max_attempts: 1_000,
            initial_interval: Duration::from_millis(20),
            max_interval: Duration::from_millis(20),
            multiplier: 1.0,
            timeout: Duration::from_millis(50),
        });
        let result: Result<(), RetryError<&str>> = retry.call(|| Err("still failing"));
        assert!(matches!(result, Err(RetryError::Timeout(Some("still failing")))));
    }

    #[test]
    fn successful_op_runs_exactly_once() {
        let retry = Retry::new(quick_policy(5));
        let mut calls = 0;
        let result: Result<&str, RetryError<&str>> = retry.call(|| {
            calls += 1;
            Ok("done")
        });
        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls, 1);
    }
}
