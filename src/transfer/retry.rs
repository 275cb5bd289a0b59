//! Fixed-delay retry policy for per-file transfers.
//!
//! A transfer is attempted once and then retried up to
//! [`RetryPolicy::max_retries`] times with a constant pause in between. There
//! is no backoff and no jitter; the portal is slow rather than rate limited.

use std::time::Duration;

use super::TransferError;

/// Retries after the first attempt.
pub const DEFAULT_MAX_RETRIES: u32 = 2;

/// Pause between attempts.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(2);

/// Decision on whether to retry a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Sleep for `delay`, then make attempt number `attempt` (1-indexed).
    Retry { delay: Duration, attempt: u32 },
    /// Give up.
    DoNotRetry { reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_retries: u32,
    delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            delay: DEFAULT_RETRY_DELAY,
        }
    }
}

impl RetryPolicy {
    #[must_use]
    pub fn new(max_retries: u32, delay: Duration) -> Self {
        Self { max_retries, delay }
    }

    /// Same retry count, no pause. For tests against a mock portal.
    #[must_use]
    pub fn without_delay(self) -> Self {
        Self {
            delay: Duration::ZERO,
            ..self
        }
    }

    #[must_use]
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    #[must_use]
    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Decides what to do after `attempts_made` attempts ended in `error`.
    #[must_use]
    pub fn should_retry(&self, error: &TransferError, attempts_made: u32) -> RetryDecision {
        if !error.is_retryable() {
            return RetryDecision::DoNotRetry {
                reason: format!("not retryable: {error}"),
            };
        }
        if attempts_made >= self.max_attempts() {
            return RetryDecision::DoNotRetry {
                reason: format!("max retries ({}) exhausted", self.max_retries),
            };
        }
        RetryDecision::Retry {
            delay: self.delay,
            attempt: attempts_made + 1,
        }
    }
}
