//! Retry policy for queue items

use std::time::Duration;

/// Default number of retries after the first failed attempt
pub const DEFAULT_MAX_RETRIES: u32 = 3;
/// Default base delay for exponential backoff
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);
/// Default cap for exponential backoff
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(30);

/// Backoff strategy, chosen when the policy is built
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Backoff {
    /// Explicit ordered delays; retry `n` waits `delays[n - 1]`.
    /// Retries past the end of the table reuse the last entry.
    Explicit(Vec<Duration>),
    /// `base * 2^(n - 1)`, capped at `max`
    Exponential { base: Duration, max: Duration },
}

impl Backoff {
    /// Delay before retry number `attempt` (1-indexed)
    pub fn delay(&self, attempt: u32) -> Duration {
        let index = attempt.saturating_sub(1);
        match self {
            Backoff::Explicit(delays) => delays
                .get(index as usize)
                .or_else(|| delays.last())
                .copied()
                .unwrap_or(Duration::ZERO),
            Backoff::Exponential { base, max } => {
                let factor = 1u32.checked_shl(index).unwrap_or(u32::MAX);
                base.saturating_mul(factor).min(*max)
            }
        }
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Backoff::Exponential {
            base: DEFAULT_BASE_DELAY,
            max: DEFAULT_MAX_DELAY,
        }
    }
}

/// Outcome of consulting the policy after a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry(Duration),
    GiveUp,
}

/// Maps a failed attempt number to a retry decision
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            backoff: Backoff::default(),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, backoff: Backoff) -> Self {
        Self {
            max_retries,
            backoff,
        }
    }

    /// Policy that never retries
    pub fn no_retry() -> Self {
        Self::new(0, Backoff::Explicit(Vec::new()))
    }

    /// Decide what to do after `attempt` failures (1 = the first attempt failed).
    pub fn decide(&self, attempt: u32) -> RetryDecision {
        if self.should_retry(attempt) {
            RetryDecision::Retry(self.backoff.delay(attempt))
        } else {
            RetryDecision::GiveUp
        }
    }

    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt >= 1 && attempt <= self.max_retries
    }
}
