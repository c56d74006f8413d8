//! Exponential backoff with jitter around external API calls.
//!
//! Classification lives on [`EngineError::is_retryable`]: transient errors
//! are retried up to `max_attempts`, permanent ones are rethrown on the spot.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::errors::{EngineError, EngineResult};

/// Retry configuration shared by the page fetcher and extraction workers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    /// Base delay; attempt k backs off `base * 2^(k-1)` plus jitter.
    pub base_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1000,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay_ms: u64) -> Self {
        Self {
            max_attempts,
            base_delay_ms,
        }
    }

    /// Backoff before retrying after failed attempt `attempt` (1-based):
    /// `base * 2^(attempt-1)` plus uniform jitter in `[0, base)`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.max(1) - 1;
        let exponential = self
            .base_delay_ms
            .saturating_mul(2u64.saturating_pow(exponent));
        let jitter = if self.base_delay_ms == 0 {
            0
        } else {
            fastrand::u64(0..self.base_delay_ms)
        };
        Duration::from_millis(exponential.saturating_add(jitter))
    }

    /// Run `op`, retrying transient failures with backoff. Permanent errors
    /// and exhausted attempts return the last error unchanged.
    pub async fn run<F, Fut, T>(&self, mut op: F) -> EngineResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = EngineResult<T>>,
    {
        let mut attempt: u32 = 1;
        loop {
            match op().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!("call succeeded on attempt {}/{}", attempt, self.max_attempts);
                    }
                    return Ok(value);
                }
                Err(err) if err.is_retryable() && attempt < self.max_attempts => {
                    let delay = self.delay_for_attempt(attempt);
                    warn!(
                        "🔄 attempt {}/{} failed ({}), retrying in {:?}",
                        attempt, self.max_attempts, err, delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
