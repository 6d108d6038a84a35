//! Bounded-concurrency batch executor.
//!
//! Runs an ordered sequence of work items in fixed-size batches. Within
//! a batch every item runs concurrently and the executor waits for all
//! of them to settle; between batches it sleeps a fixed delay as
//! backpressure against the crawled source. A failing item never
//! cancels its siblings: work functions return their outcome as a plain
//! value, error included.

use std::future::Future;
use std::time::Duration;

use futures::future::join_all;

/// Hard ceiling on batch size, independent of the configured limit.
/// Bounds peak connections no matter how the limit is tuned.
pub const BATCH_CAP: usize = 20;

#[derive(Debug, Clone)]
pub struct BatchExecutor {
    limit: usize,
    inter_batch_delay: Duration,
}

impl BatchExecutor {
    /// A limit of zero is treated as one: the executor always makes
    /// progress.
    pub fn new(limit: usize, inter_batch_delay: Duration) -> Self {
        Self {
            limit: limit.max(1),
            inter_batch_delay,
        }
    }

    /// Effective batch size: `min(limit, BATCH_CAP)`.
    pub fn batch_size(&self) -> usize {
        self.limit.min(BATCH_CAP)
    }

    /// Run `work` over every item, in input order grouped into batches.
    ///
    /// Returns exactly one outcome per input item, in input order. The
    /// inter-batch delay is inserted between batches only, never after
    /// the last.
    pub async fn run<T, R, F, Fut>(&self, items: Vec<T>, work: F) -> Vec<R>
    where
        F: Fn(T) -> Fut,
        Fut: Future<Output = R>,
    {
        let total = items.len();
        let batch_size = self.batch_size();
        let mut outcomes = Vec::with_capacity(total);

        let mut remaining = items.into_iter().peekable();
        let mut batch_index = 0usize;

        while remaining.peek().is_some() {
            let batch: Vec<T> = remaining.by_ref().take(batch_size).collect();
            tracing::debug!(
                batch_index,
                batch_len = batch.len(),
                total,
                "running batch"
            );

            let settled = join_all(batch.into_iter().map(&work)).await;
            outcomes.extend(settled);

            if remaining.peek().is_some() {
                tokio::time::sleep(self.inter_batch_delay).await;
            }
            batch_index += 1;
        }

        outcomes
    }
}
