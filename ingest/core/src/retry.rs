//! Retry and Backoff
//!
//! Bounded retry loop around the connection-open attempt. Only the initial
//! open is retried; failures after the stream is established are final.
//!
//! Delay before retry `n` (1-based) is `min(base * 2^(n-1), cap)`, which with
//! the default tunables is 1s, 2s, 4s, 8s, 10s, 10s, ...

use std::time::Duration;

use crate::config::EngineConfig;

/// Backoff parameters
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries allowed after the first failure
    pub max_retries: u32,
    /// First backoff delay
    pub base_delay: Duration,
    /// Upper bound on any delay
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(10_000),
        }
    }
}

impl RetryPolicy {
    /// Build a policy from engine tunables and a per-connection retry budget
    #[must_use]
    pub fn from_engine(engine: &EngineConfig, max_retries: u32) -> Self {
        Self {
            max_retries,
            base_delay: Duration::from_millis(engine.backoff_base_ms),
            max_delay: Duration::from_millis(engine.backoff_cap_ms),
        }
    }

    /// Delay before retry number `retry` (1-based)
    #[must_use]
    pub fn backoff_for_retry(&self, retry: u32) -> Duration {
        backoff_delay(retry, self.base_delay, self.max_delay)
    }
}

/// `min(base * 2^(retry-1), cap)`; retry 0 yields no delay
#[must_use]
pub fn backoff_delay(retry: u32, base: Duration, cap: Duration) -> Duration {
    if retry == 0 {
        return Duration::ZERO;
    }
    // 2^31 already exceeds any sane cap; avoid overflowing the shift
    let exponent = (retry - 1).min(31);
    base.checked_mul(1u32 << exponent)
        .map_or(cap, |delay| delay.min(cap))
}

/// Wait out a backoff delay before the next attempt
pub async fn sleep_backoff(delay: Duration) {
    tokio::time::sleep(delay).await;
}

/// What to do after a failed attempt
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetryDecision {
    /// Sleep for the delay, then try again
    Retry {
        /// Which retry this will be (1-based)
        retry: u32,
        /// Backoff before the next attempt
        delay: Duration,
    },
    /// Budget exhausted
    GiveUp {
        /// Total attempts made, including the first
        attempts: u32,
    },
}

/// Per-connection retry bookkeeping
#[derive(Clone, Debug)]
pub struct RetryState {
    policy: RetryPolicy,
    failures: u32,
}

impl RetryState {
    /// Fresh state for a new connection
    #[must_use]
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            failures: 0,
        }
    }

    /// Failed attempts so far
    #[must_use]
    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// Attempts started so far, counting the one in flight
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.failures + 1
    }

    /// Record one failed attempt and decide whether to try again
    pub fn on_failure(&mut self) -> RetryDecision {
        self.failures += 1;
        if self.failures <= self.policy.max_retries {
            RetryDecision::Retry {
                retry: self.failures,
                delay: self.policy.backoff_for_retry(self.failures),
            }
        } else {
            RetryDecision::GiveUp {
                attempts: self.failures,
            }
        }
    }
}
