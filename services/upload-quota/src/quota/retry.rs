use std::time::Duration;

use crate::config::UploadQuotaConfig;

const INITIAL_BACKOFF_MS: u64 = 25;
const MAX_BACKOFF_MS: u64 = 1_000;

/// Bounded exponential backoff for transient reserve conflicts.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// Overall budget of one reserve call, retries included.
    pub deadline: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_backoff: Duration::from_millis(INITIAL_BACKOFF_MS),
            max_backoff: Duration::from_millis(MAX_BACKOFF_MS),
            deadline: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &UploadQuotaConfig) -> Self {
        Self {
            max_retries: config.max_transaction_retries,
            deadline: config.transaction_timeout(),
            ..Self::default()
        }
    }

    /// Delay before retry number `attempt` (zero based), without jitter.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.initial_backoff
            .checked_mul(factor)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }

    /// Backoff plus up to 50% random jitter.
    pub fn backoff_with_jitter(&self, attempt: u32) -> Duration {
        let base = self.backoff(attempt);
        base + base.mul_f64(rand::random::<f64>() * 0.5)
    }
}
