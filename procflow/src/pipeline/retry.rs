//! Delays between job retries.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::ProcSettings;

/// Growth of the retry delay with the attempt number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// delay = base * 2^retry
    Exponential,
    /// delay = base * (retry + 1)
    Linear,
    /// delay = base
    #[default]
    Constant,
}

/// Randomization applied on top of the backoff delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JitterStrategy {
    /// Exact delays.
    #[default]
    None,
    /// Uniform in `0..=delay`.
    Full,
    /// Half fixed, half random.
    Equal,
}

/// Retry policy of one process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries allowed after the first attempt.
    pub num_retries: u32,
    /// Delay before the first retry.
    pub base_delay_ms: u64,
    /// Upper bound of any delay.
    pub max_delay_ms: u64,
    /// Delay growth.
    pub backoff: BackoffStrategy,
    /// Randomization.
    pub jitter: JitterStrategy,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            num_retries: 3,
            base_delay_ms: 0,
            max_delay_ms: 60_000,
            backoff: BackoffStrategy::Constant,
            jitter: JitterStrategy::None,
        }
    }
}

impl RetryPolicy {
    /// Builds the policy from resolved process settings.
    #[must_use]
    pub fn from_settings(settings: &ProcSettings) -> Self {
        Self {
            num_retries: settings.num_retries,
            base_delay_ms: settings.retry_delay_ms,
            backoff: settings.retry_backoff,
            ..Self::default()
        }
    }

    /// Sets the jitter strategy.
    #[must_use]
    pub fn with_jitter(mut self, jitter: JitterStrategy) -> Self {
        self.jitter = jitter;
        self
    }

    /// Returns true if a job that already retried `retry_count` times may retry again.
    #[must_use]
    pub fn can_retry(&self, retry_count: u32) -> bool {
        retry_count < self.num_retries
    }

    /// Returns the delay before retry number `retry_count + 1`.
    #[must_use]
    pub fn delay(&self, retry_count: u32) -> Duration {
        let base = self.base_delay_ms;
        let delay = match self.backoff {
            BackoffStrategy::Exponential => base.saturating_mul(2u64.saturating_pow(retry_count)),
            BackoffStrategy::Linear => base.saturating_mul(u64::from(retry_count) + 1),
            BackoffStrategy::Constant => base,
        }
        .min(self.max_delay_ms);

        let jittered = match self.jitter {
            JitterStrategy::None => delay,
            JitterStrategy::Full if delay > 0 => rand::thread_rng().gen_range(0..=delay),
            JitterStrategy::Equal if delay / 2 > 0 => {
                let half = delay / 2;
                half + rand::thread_rng().gen_range(0..=half)
            }
            JitterStrategy::Full | JitterStrategy::Equal => delay,
        };
        Duration::from_millis(jittered)
    }
}
