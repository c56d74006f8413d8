//! Shared gate in front of the external API.
//!
//! Two constraints compose: at most `max_concurrent` calls in flight
//! (semaphore, FIFO) and at most `max_requests_per_second` call starts
//! (governor token bucket). One [`ApiRateLimiter`] is constructed per run and
//! injected everywhere an external call happens, so the sync pipeline and all
//! extraction workers draw from the same budget.

use std::future::Future;
use std::num::NonZeroU32;

use anyhow::{Context, Result};
use governor::clock::DefaultClock;
use governor::state::direct::NotKeyed;
use governor::state::InMemoryState;
use governor::{Quota, RateLimiter};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::errors::{EngineError, EngineResult};

pub struct ApiRateLimiter {
    slots: Semaphore,
    rate: RateLimiter<NotKeyed, InMemoryState, DefaultClock>,
    max_concurrent: u32,
    max_requests_per_second: u32,
}

impl ApiRateLimiter {
    pub fn new(max_concurrent: u32, max_requests_per_second: u32) -> Result<Self> {
        let quota = Quota::per_second(
            NonZeroU32::new(max_requests_per_second)
                .context("Requests per second must be greater than 0")?,
        );
        if max_concurrent == 0 {
            anyhow::bail!("Max concurrent calls must be greater than 0");
        }

        Ok(Self {
            slots: Semaphore::new(max_concurrent as usize),
            rate: RateLimiter::direct(quota),
            max_concurrent,
            max_requests_per_second,
        })
    }

    /// Run `task` once a concurrency slot and a rate token are available.
    ///
    /// The slot is held until `task` settles and released on both success and
    /// error; rate tokens are consumed and regenerate on the governor clock.
    /// The limiter never fails by itself, it propagates the task's error.
    pub async fn execute<F, Fut, T>(&self, task: F) -> EngineResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = EngineResult<T>>,
    {
        let _permit = self
            .slots
            .acquire()
            .await
            .map_err(|_| EngineError::Cancelled)?;
        self.rate.until_ready().await;
        task().await
    }

    /// Like [`execute`](Self::execute) but abandons both waits when the token
    /// fires. The task itself is responsible for honoring the token past this
    /// point.
    pub async fn execute_with_cancellation<F, Fut, T>(
        &self,
        cancellation_token: &CancellationToken,
        task: F,
    ) -> EngineResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = EngineResult<T>>,
    {
        if cancellation_token.is_cancelled() {
            return Err(EngineError::Cancelled);
        }

        let _permit = tokio::select! {
            permit = self.slots.acquire() => permit.map_err(|_| EngineError::Cancelled)?,
            _ = cancellation_token.cancelled() => return Err(EngineError::Cancelled),
        };

        tokio::select! {
            _ = self.rate.until_ready() => {}
            _ = cancellation_token.cancelled() => return Err(EngineError::Cancelled),
        }

        task().await
    }

    pub fn max_concurrent(&self) -> u32 {
        self.max_concurrent
    }

    pub fn max_requests_per_second(&self) -> u32 {
        self.max_requests_per_second
    }

    /// Currently free concurrency slots. Exposed for tests and diagnostics.
    pub fn available_slots(&self) -> usize {
        self.slots.available_permits()
    }
}

impl std::fmt::Debug for ApiRateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiRateLimiter")
            .field("max_concurrent", &self.max_concurrent)
            .field("max_requests_per_second", &self.max_requests_per_second)
            .field("available_slots", &self.available_slots())
            .finish()
    }
}
