//! Capped exponential backoff for failed detail fetches.
//!
//! After the `n`-th consecutive failure (`retry_count = n`) the item waits
//!
//! ```text
//! delay(n) = clamp(base × factor^(n-1), 1s, max)
//! ```
//!
//! before it becomes due again. Once `retry_count` exceeds `max_retries`
//! the item is exhausted and never fetched again.
//!
//! Delays never exceed [`MAX_DELAY_SECS`], whatever the configured cap.

use chrono::{DateTime, Duration, Utc};

/// Upper bound on any single delay: one year.
pub const MAX_DELAY_SECS: u64 = 365 * 24 * 3600;

/// Backoff parameters, taken from the `[detail]` config section.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    pub base_secs: u64,
    pub factor: f64,
    pub max_secs: u64,
    pub max_retries: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_secs: 60,
            factor: 2.0,
            max_secs: 3600,
            max_retries: 5,
        }
    }
}

/// What to do with an item after a failed attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum RetryDecision {
    /// Requeue with the incremented count, due at `next_attempt_at`.
    Retry {
        retry_count: u32,
        delay: Duration,
        next_attempt_at: DateTime<Utc>,
    },
    /// Retries spent; the item is terminal.
    Exhausted { retry_count: u32 },
}

impl BackoffPolicy {
    /// Delay before the next attempt once `retry_count` failures have been
    /// recorded. `retry_count` is 1-based; 0 is treated as 1.
    pub fn delay_for(&self, retry_count: u32) -> Duration {
        let exponent = retry_count.saturating_sub(1).min(i32::MAX as u32) as i32;
        let raw = self.base_secs as f64 * self.factor.powi(exponent);
        let max = self.max_secs.min(MAX_DELAY_SECS) as f64;
        let capped = if raw.is_finite() { raw.min(max) } else { max };
        Duration::seconds(capped.max(1.0) as i64)
    }

    /// Apply one failure to an item whose stored count is `current_retries`.
    pub fn on_failure(&self, current_retries: u32, now: DateTime<Utc>) -> RetryDecision {
        let retry_count = current_retries.saturating_add(1);
        if retry_count > self.max_retries {
            return RetryDecision::Exhausted { retry_count };
        }
        let delay = self.delay_for(retry_count);
        RetryDecision::Retry {
            retry_count,
            delay,
            next_attempt_at: now.checked_add_signed(delay).unwrap_or(DateTime::<Utc>::MAX_UTC),
        }
    }
}
