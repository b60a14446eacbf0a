//! Bounded-concurrency batch processing.
//!
//! Items are grouped into fixed windows of `batch_size`. Every item of a window
//! runs concurrently; the next window starts only once the current one has
//! fully settled, so in-flight operations never exceed `batch_size`. Results
//! always come back in input order, independent of completion order.
//!
//! Two modes:
//!
//! - **fail-together** ([`BatchProcessor::process`]): the first failure of a
//!   window (in input order) is returned and later windows never run.
//!   Side effects of sibling items in the failing window are left in place;
//!   callers that need them undone run the batch inside a transaction step.
//! - **collect-all** ([`BatchProcessor::process_settled`]): every window runs
//!   to completion and failures are collected next to their original item.
//!
//! [`BatchProcessor::process_with_partial_retry`] builds on collect-all and
//! re-runs only the retryable failures, round after round.

use std::future::Future;
use std::sync::Arc;

use futures_util::future::join_all;
use thiserror::Error;
use tracing::{debug, warn};

use forgepress_core::Classify;

use crate::retry::RetryPolicy;

/// Window size for move operations (controlled concurrency against the remote API).
pub const MOVE_BATCH_SIZE: usize = 10;

/// Chunk size for delete operations (hard ceiling of the remote API).
pub const DELETE_BATCH_SIZE: usize = 1000;

/// Progress report emitted after each window.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct BatchProgress {
    pub processed: usize,
    pub total: usize,
}

/// Progress callback type.
pub type ProgressCallback = Arc<dyn Fn(BatchProgress) + Send + Sync>;

/// A failed item of a collect-all batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchFailure<T, E> {
    /// Position of the item in the original input.
    pub index: usize,
    pub item: T,
    pub error: E,
    /// How many times the item was attempted before giving up.
    pub attempts: u32,
}

impl<T, E: core::fmt::Display> BatchFailure<T, E> {
    pub fn message(&self) -> String {
        self.error.to_string()
    }
}

/// Outcome of a collect-all batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchOutcome<T, R, E> {
    /// Successful results, in input order.
    pub successes: Vec<R>,
    /// Failed items, in input order.
    pub failures: Vec<BatchFailure<T, E>>,
}

impl<T, R, E> BatchOutcome<T, R, E> {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn total(&self) -> usize {
        self.successes.len() + self.failures.len()
    }

    /// Escalate to a hard failure when nothing succeeded at all.
    pub fn require_any_success(self) -> Result<Self, PartialBatchError>
    where
        E: core::fmt::Display,
    {
        if self.successes.is_empty() && !self.failures.is_empty() {
            return Err(PartialBatchError::from_outcome(&self));
        }
        Ok(self)
    }
}

/// Summary of a batch in which some items failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{failed} of {total} batch items failed (first: {})", .details.first().map(String::as_str).unwrap_or("n/a"))]
pub struct PartialBatchError {
    pub succeeded: usize,
    pub failed: usize,
    pub total: usize,
    /// One line per failed item: `#index: message`.
    pub details: Vec<String>,
}

impl PartialBatchError {
    pub fn from_outcome<T, R, E: core::fmt::Display>(outcome: &BatchOutcome<T, R, E>) -> Self {
        Self {
            succeeded: outcome.successes.len(),
            failed: outcome.failures.len(),
            total: outcome.total(),
            details: outcome
                .failures
                .iter()
                .map(|f| format!("#{}: {}", f.index, f.error))
                .collect(),
        }
    }
}

/// Runs many independent operations with bounded parallelism.
#[derive(Clone)]
pub struct BatchProcessor {
    batch_size: usize,
    on_progress: Option<ProgressCallback>,
}

impl core::fmt::Debug for BatchProcessor {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("BatchProcessor")
            .field("batch_size", &self.batch_size)
            .field("on_progress", &self.on_progress.is_some())
            .finish()
    }
}

impl BatchProcessor {
    /// Create a processor; a zero batch size is treated as 1.
    pub fn new(batch_size: usize) -> Self {
        Self {
            batch_size: batch_size.max(1),
            on_progress: None,
        }
    }

    pub fn with_progress<F>(mut self, callback: F) -> Self
    where
        F: Fn(BatchProgress) + Send + Sync + 'static,
    {
        self.on_progress = Some(Arc::new(callback));
        self
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Number of windows needed for `total` items.
    pub fn window_count(&self, total: usize) -> usize {
        total.div_ceil(self.batch_size)
    }

    /// Fail-together mode.
    pub async fn process<T, R, E, F, Fut>(&self, items: Vec<T>, op: F) -> Result<Vec<R>, E>
    where
        F: Fn(T) -> Fut,
        Fut: Future<Output = Result<R, E>>,
        E: core::fmt::Display,
    {
        let total = items.len();
        let windows = into_windows(items, self.batch_size);
        let window_total = windows.len();
        let mut results = Vec::with_capacity(total);
        let mut processed = 0;

        for (window_index, window) in windows.into_iter().enumerate() {
            let len = window.len();
            let outcomes = join_all(window.into_iter().map(&op)).await;

            for (offset, outcome) in outcomes.into_iter().enumerate() {
                match outcome {
                    Ok(value) => results.push(value),
                    Err(err) => {
                        warn!(
                            window = window_index + 1,
                            windows = window_total,
                            item = processed + offset,
                            error = %err,
                            "batch window failed, aborting remaining windows"
                        );
                        return Err(err);
                    }
                }
            }

            processed += len;
            debug!(window = window_index + 1, windows = window_total, processed, total, "batch window settled");
            self.report(processed, total);
        }

        Ok(results)
    }

    /// Collect-all mode. Never fails; see [`BatchOutcome`].
    pub async fn process_settled<T, R, E, F, Fut>(&self, items: Vec<T>, op: F) -> BatchOutcome<T, R, E>
    where
        T: Clone,
        F: Fn(T) -> Fut,
        Fut: Future<Output = Result<R, E>>,
    {
        let indexed = items.into_iter().enumerate().collect();
        let (successes, failures) = self.run_settled(indexed, &op, true).await;

        BatchOutcome {
            successes: successes.into_iter().map(|(_, value)| value).collect(),
            failures,
        }
    }

    /// Collect-all mode that re-runs retryable failures.
    ///
    /// Round 0 processes every item. Each later round waits the policy's
    /// backoff delay and processes only the items that failed retryably in the
    /// previous round. Successes accumulate and are never re-run. Items that
    /// fail non-retryably, or fail in the last permitted round, are reported
    /// as failures.
    pub async fn process_with_partial_retry<T, R, E, F, Fut>(
        &self,
        items: Vec<T>,
        policy: &RetryPolicy,
        op: F,
    ) -> BatchOutcome<T, R, E>
    where
        T: Clone,
        F: Fn(T) -> Fut,
        Fut: Future<Output = Result<R, E>>,
        E: Classify + core::fmt::Display,
    {
        let max_rounds = policy.max_attempts.max(1);
        let mut pending: Vec<(usize, T)> = items.into_iter().enumerate().collect();
        let mut successes: Vec<(usize, R)> = Vec::with_capacity(pending.len());
        let mut failures: Vec<BatchFailure<T, E>> = Vec::new();
        let mut round: u32 = 0;

        while !pending.is_empty() {
            if round > 0 {
                let delay = policy.delay_for_attempt(round - 1);
                debug!(round, retrying = pending.len(), delay_ms = delay.as_millis() as u64, "retrying failed batch items");
                tokio::time::sleep(delay).await;
            }

            let (ok, failed) = self.run_settled(std::mem::take(&mut pending), &op, round == 0).await;
            successes.extend(ok);

            let last_round = round + 1 >= max_rounds;
            for mut failure in failed {
                if !last_round && policy.is_retryable(&failure.error) {
                    pending.push((failure.index, failure.item));
                } else {
                    failure.attempts = round + 1;
                    failures.push(failure);
                }
            }

            round += 1;
        }

        if !failures.is_empty() {
            warn!(
                succeeded = successes.len(),
                failed = failures.len(),
                rounds = round,
                "batch finished with permanent failures"
            );
        }

        successes.sort_by_key(|(index, _)| *index);
        failures.sort_by_key(|f| f.index);

        BatchOutcome {
            successes: successes.into_iter().map(|(_, value)| value).collect(),
            failures,
        }
    }

    async fn run_settled<T, R, E, F, Fut>(
        &self,
        items: Vec<(usize, T)>,
        op: &F,
        report_progress: bool,
    ) -> (Vec<(usize, R)>, Vec<BatchFailure<T, E>>)
    where
        T: Clone,
        F: Fn(T) -> Fut,
        Fut: Future<Output = Result<R, E>>,
    {
        let total = items.len();
        let mut successes = Vec::with_capacity(total);
        let mut failures = Vec::new();
        let mut processed = 0;

        for window in into_windows(items, self.batch_size) {
            let len = window.len();
            let settled = join_all(window.into_iter().map(|(index, item)| async move {
                let result = op(item.clone()).await;
                (index, item, result)
            }))
            .await;

            for (index, item, result) in settled {
                match result {
                    Ok(value) => successes.push((index, value)),
                    Err(error) => failures.push(BatchFailure {
                        index,
                        item,
                        error,
                        attempts: 1,
                    }),
                }
            }

            processed += len;
            if report_progress {
                self.report(processed, total);
            }
        }

        (successes, failures)
    }

    fn report(&self, processed: usize, total: usize) {
        if let Some(callback) = &self.on_progress {
            callback(BatchProgress { processed, total });
        }
    }
}

/// Split `items` into consecutive windows of at most `size` items.
pub(crate) fn into_windows<T>(items: Vec<T>, size: usize) -> Vec<Vec<T>> {
    let size = size.max(1);
    let mut windows = Vec::with_capacity(items.len().div_ceil(size));
    let mut iter = items.into_iter().peekable();
    while iter.peek().is_some() {
        windows.push(iter.by_ref().take(size).collect());
    }
    windows
}
