//! Retry policies.
//!
//! Two kinds of failure are retried in ownergraph: store contention (a
//! uniqueness race that a fresh read resolves) and timeout-class downstream
//! errors. Both go through [`retry`], which hands control of the decision to
//! the caller through [`Attempt`].

use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Outcome of one attempt.
#[derive(Debug)]
pub enum Attempt<T, E> {
    /// Finished successfully.
    Done(T),
    /// Failed in a way another attempt may fix.
    Retry(E),
    /// Failed permanently.
    Fail(E),
}

/// How many times to try and how long to wait between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts including the first. `None` retries until success.
    pub max_attempts: Option<u32>,
    /// Wait before the first retry.
    pub initial_backoff_ms: u64,
    /// Upper bound for the exponential backoff.
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::unbounded()
    }
}

impl RetryPolicy {
    /// Retry until success without waiting.
    #[must_use]
    pub const fn unbounded() -> Self {
        Self {
            max_attempts: None,
            initial_backoff_ms: 0,
            max_backoff_ms: 0,
        }
    }

    /// One retry after the first attempt.
    #[must_use]
    pub const fn once() -> Self {
        Self {
            max_attempts: Some(2),
            initial_backoff_ms: 0,
            max_backoff_ms: 0,
        }
    }

    /// A single attempt.
    #[must_use]
    pub const fn never() -> Self {
        Self {
            max_attempts: Some(1),
            initial_backoff_ms: 0,
            max_backoff_ms: 0,
        }
    }

    /// Same attempt bound, with exponential backoff.
    #[must_use]
    pub const fn with_backoff(mut self, initial_ms: u64, max_ms: u64) -> Self {
        self.initial_backoff_ms = initial_ms;
        self.max_backoff_ms = max_ms;
        self
    }

    /// Wait before retry number `retry` (1-based).
    #[must_use]
    pub fn backoff_for(&self, retry: u32) -> Duration {
        if self.initial_backoff_ms == 0 {
            return Duration::ZERO;
        }
        let shift = retry.saturating_sub(1).min(20);
        let ms = self
            .initial_backoff_ms
            .saturating_mul(1u64 << shift)
            .min(self.max_backoff_ms.max(self.initial_backoff_ms));
        Duration::from_millis(ms)
    }

    /// Returns true if another attempt is allowed after `attempts` so far.
    #[must_use]
    pub fn allows(&self, attempts: u32) -> bool {
        self.max_attempts.map_or(true, |max| attempts < max)
    }
}

/// Runs `op` until it is done, fails, or the policy is exhausted.
///
/// `op` receives the zero-based attempt number. When the policy runs out, the
/// last retryable error is returned.
///
/// # Examples
///
/// ```
/// use ownergraph::retry::{retry, Attempt, RetryPolicy};
///
/// let out: Result<u32, &str> = retry(&RetryPolicy::unbounded(), |n| {
///     if n < 3 { Attempt::Retry("busy") } else { Attempt::Done(n) }
/// });
/// assert_eq!(out, Ok(3));
/// ```
pub fn retry<T, E, F>(policy: &RetryPolicy, mut op: F) -> Result<T, E>
where
    F: FnMut(u32) -> Attempt<T, E>,
{
    let mut attempt = 0u32;
    loop {
        match op(attempt) {
            Attempt::Done(value) => return Ok(value),
            Attempt::Fail(err) => return Err(err),
            Attempt::Retry(err) => {
                attempt = attempt.saturating_add(1);
                if !policy.allows(attempt) {
                    return Err(err);
                }
                let wait = policy.backoff_for(attempt);
                if !wait.is_zero() {
                    thread::sleep(wait);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_once_allows_exactly_two_attempts() {
        let mut calls = 0;
        let out: Result<(), &str> = retry(&RetryPolicy::once(), |_| {
            calls += 1;
            Attempt::Retry("conflict")
        });
        assert_eq!(out, Err("conflict"));
        assert_eq!(calls, 2);
    }

    #[test]
    fn test_never_makes_one_attempt() {
        let mut calls = 0;
        let _: Result<(), &str> = retry(&RetryPolicy::never(), |_| {
            calls += 1;
            Attempt::Retry("x")
        });
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_fail_stops_immediately() {
        let mut calls = 0;
        let out: Result<(), &str> = retry(&RetryPolicy::unbounded(), |_| {
            calls += 1;
            Attempt::Fail("bad")
        });
        assert_eq!(out, Err("bad"));
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_backoff_is_capped() {
        let policy = RetryPolicy::unbounded().with_backoff(10, 50);
        assert_eq!(policy.backoff_for(1), Duration::from_millis(10));
        assert_eq!(policy.backoff_for(2), Duration::from_millis(20));
        assert_eq!(policy.backoff_for(3), Duration::from_millis(40));
        assert_eq!(policy.backoff_for(4), Duration::from_millis(50));
        assert_eq!(policy.backoff_for(100), Duration::from_millis(50));
        assert_eq!(RetryPolicy::unbounded().backoff_for(5), Duration::ZERO);
    }

    #[test]
    fn test_policy_deserializes_with_defaults() {
        let policy: RetryPolicy = serde_json::from_str(r#"{"max_attempts": 5}"#).unwrap();
        assert_eq!(policy.max_attempts, Some(5));
        assert_eq!(policy.initial_backoff_ms, 0);
    }
}
