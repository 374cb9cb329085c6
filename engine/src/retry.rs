//! Retry policy for transient failures.

use crate::Timestamp;
use serde::{Deserialize, Serialize};

/// Bounded exponential backoff.
///
/// The delay before attempt `n + 1` is `base_delay_ms * 2^(n - 1)`, capped at
/// `max_delay_ms`. After `max_attempts` transient failures the entry is marked
/// failed and waits for an operator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryPolicy {
    /// Attempts allowed before giving up automatically
    pub max_attempts: u32,
    /// Delay after the first transient failure (ms)
    pub base_delay_ms: u64,
    /// Upper bound on any single delay (ms)
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 1_000,
            max_delay_ms: 60_000,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay_ms: u64, max_delay_ms: u64) -> Self {
        Self {
            max_attempts,
            base_delay_ms,
            max_delay_ms,
        }
    }

    /// Backoff after `attempts` failed attempts.
    pub fn delay_for(&self, attempts: u32) -> u64 {
        if attempts == 0 {
            return 0;
        }
        let factor = 1u64.checked_shl(attempts - 1).unwrap_or(u64::MAX);
        self.base_delay_ms
            .saturating_mul(factor)
            .min(self.max_delay_ms)
    }

    /// When the next attempt may start.
    pub fn next_attempt_at(&self, attempts: u32, now: Timestamp) -> Timestamp {
        now.saturating_add(self.delay_for(attempts))
    }

    /// Whether `attempts` has reached the automatic retry ceiling.
    pub fn is_exhausted(&self, attempts: u32) -> bool {
        attempts >= self.max_attempts
    }
}
