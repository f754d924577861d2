//! Backoff policies for the retry loops.
//!
//! Every retry loop in the crate asks a [`BackoffPolicy`] how long to
//! wait before the next attempt. The elements only need a fixed pause,
//! but the policy is a trait so callers can plug in something else.

use std::time::Duration;

/// Computes the pause after a failed attempt.
pub trait BackoffPolicy: Send + Sync {
    /// Delay after the given failed attempt (1-based).
    fn delay(&self, attempt: u32) -> Duration;
}

/// Same pause after every attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedDelay(pub Duration);

impl BackoffPolicy for FixedDelay {
    fn delay(&self, _attempt: u32) -> Duration {
        self.0
    }
}

/// Exponential backoff capped at `max`.
///
/// Delay for attempt `n` is `base * 2^(n-1)`, saturating.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExponentialBackoff {
    /// Delay after the first failure.
    pub base: Duration,
    /// Upper bound for any delay.
    pub max: Duration,
}

impl BackoffPolicy for ExponentialBackoff {
    fn delay(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let shift = attempt.saturating_sub(1).min(30);
        self.base.saturating_mul(1 << shift).min(self.max)
    }
}

/// Sleep for the policy's delay after `attempt`, skipping zero delays.
pub(crate) async fn pause(policy: &dyn BackoffPolicy, attempt: u32) {
    let delay = policy.delay(attempt);
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
}
