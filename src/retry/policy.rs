//! Retry policy for read-only transactions.
//!
//! Mutating transactions are never retried here. A transport failure leaves
//! their outcome unknown, and only the caller can tell whether resubmitting
//! is safe.

use super::classify::{classify_kv, FailureKind};
use crate::core::config::{ReadRetryMode, RetryConfig};
use crate::core::error::KvError;
use std::time::Duration;

/// When a failed read-only transaction is resubmitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadRetryPolicy {
    /// Surface every failure.
    #[default]
    Disabled,
    /// Retry `Unavailable` failures up to `max_attempts` total attempts.
    Bounded { max_attempts: u32, backoff: Duration },
}

impl ReadRetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        match config.read_retry {
            ReadRetryMode::Disabled => Self::Disabled,
            ReadRetryMode::Bounded => Self::Bounded {
                max_attempts: config.max_attempts.max(1),
                backoff: Duration::from_millis(config.backoff_ms),
            },
        }
    }

    /// Total attempts allowed for a transaction.
    pub fn max_attempts(&self, read_only: bool) -> u32 {
        match self {
            Self::Bounded { max_attempts, .. } if read_only => *max_attempts,
            _ => 1,
        }
    }

    /// Delay before the next attempt, or `None` if `err` after `attempt`
    /// attempts must be surfaced.
    pub fn next_delay(&self, read_only: bool, attempt: u32, err: &KvError) -> Option<Duration> {
        let Self::Bounded { backoff, .. } = self else {
            return None;
        };
        let retry = attempt < self.max_attempts(read_only)
            && classify_kv(err) == FailureKind::Unavailable;
        retry.then_some(*backoff)
    }
}
