//! Backoff policy for submission retries and stream reconnects

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Backoff strategy for retries
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Exponential backoff: delay = base_seconds * 2^attempt
    Exponential { base_seconds: u64 },
    /// Linear backoff: delay = increment_seconds * attempt
    Linear { increment_seconds: u64 },
    /// Fixed interval between retries
    Fixed { interval_seconds: u64 },
}

impl Default for BackoffStrategy {
    fn default() -> Self {
        BackoffStrategy::Exponential { base_seconds: 1 }
    }
}

impl BackoffStrategy {
    /// Delay to wait after `attempt` (1-based) has failed
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let seconds = match self {
            BackoffStrategy::Exponential { base_seconds } => {
                // 2s, 4s, 8s ... capped at 2^6
                let exp = attempt.min(6);
                base_seconds.saturating_mul(2u64.pow(exp))
            }
            BackoffStrategy::Linear { increment_seconds } => {
                increment_seconds.saturating_mul(attempt as u64)
            }
            BackoffStrategy::Fixed { interval_seconds } => *interval_seconds,
        };

        Duration::from_secs(seconds)
    }
}

/// Reconnect delay for long-lived streams: exponential in the number of
/// consecutive failures, never above `cap`.
pub fn reconnect_delay(consecutive_failures: u32, cap: Duration) -> Duration {
    let exp = consecutive_failures.saturating_sub(1).min(16);
    Duration::from_secs(2u64.pow(exp)).min(cap)
}
