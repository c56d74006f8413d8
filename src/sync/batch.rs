//! Bounded-concurrency batch mapping.
//!
//! The single fan-out primitive shared by every sync level. Results come back
//! aligned to input order no matter which worker finishes first, the output
//! length always equals the input length, and at most `concurrency` workers
//! run at once.

use std::future::Future;

use futures::stream::{self, StreamExt};
use tracing::debug;

/// Maps `worker` over `items` with at most `concurrency` in flight.
pub async fn process_batch<T, R, F, Fut>(items: Vec<T>, concurrency: usize, worker: F) -> Vec<R>
where
    F: Fn(T) -> Fut,
    Fut: Future<Output = R>,
{
    process_batch_with_progress(items, concurrency, worker, |_, _| {}).await
}

/// Same as [`process_batch`], invoking `on_progress(completed, total)` once
/// per completion, in completion order.
pub async fn process_batch_with_progress<T, R, F, Fut, P>(
    items: Vec<T>,
    concurrency: usize,
    worker: F,
    mut on_progress: P,
) -> Vec<R>
where
    F: Fn(T) -> Fut,
    Fut: Future<Output = R>,
    P: FnMut(usize, usize),
{
    let total = items.len();
    if total == 0 {
        return Vec::new();
    }
    let concurrency = concurrency.max(1);

    let mut completions = stream::iter(items.into_iter().enumerate())
        .map(|(index, item)| {
            let task = worker(item);
            async move { (index, task.await) }
        })
        .buffer_unordered(concurrency);

    let mut indexed: Vec<(usize, R)> = Vec::with_capacity(total);
    let mut completed = 0usize;
    while let Some(entry) = completions.next().await {
        completed += 1;
        on_progress(completed, total);
        indexed.push(entry);
    }

    debug!(
        "Batch completed: {} items with concurrency {}",
        total, concurrency
    );
    indexed.sort_by_key(|(index, _)| *index);
    indexed.into_iter().map(|(_, result)| result).collect()
}
