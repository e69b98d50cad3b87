// crates/elspeth-core/src/runtime/batch.rs
// ============================================================================
// Module: Elspeth Batch Worker Pool
// Description: Bounded worker pool with FIFO reorder for batch-aware plugins.
// Purpose: Run plugin work concurrently while the processor sees synchronous order.
// Dependencies: crate::{contracts, pipeline, runtime::services}, std::thread
// ============================================================================

//! ## Overview
//! Batch-aware transforms keep the synchronous `process` contract while a
//! bounded pool races rows internally. Sequence numbers are allocated under
//! the queue lock so submission order equals sequence order; per-row futures
//! deliver results to the submitting caller, and a reorder buffer restores
//! FIFO for any consumer that drains buffered completions. Worker panics and
//! errors surface through the future as ordinary plugin errors.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::panic::catch_unwind;
use std::sync::Arc;
use std::sync::Condvar;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use thiserror::Error;

use crate::contracts::TransformErrorReason;
use crate::contracts::TransformResult;
use crate::pipeline::BatchSettings;
use crate::runtime::services::RateLimiterRegistry;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised by the batch worker pool.
#[derive(Debug, Error)]
pub enum BatchPoolError {
    /// The row exceeded its configured timeout.
    #[error("batch-aware row timed out after {timeout_ms} ms")]
    Timeout {
        /// Configured per-row timeout in milliseconds.
        timeout_ms: u64,
    },
    /// The pool shut down before the row completed.
    #[error("batch worker pool closed before the row completed")]
    Closed,
}

// ============================================================================
// SECTION: Lock Helper
// ============================================================================

/// Locks a mutex, recovering the inner value on poisoning.
fn lock_recover<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ============================================================================
// SECTION: Pool Internals
// ============================================================================

/// A queued unit of plugin work.
struct Job {
    /// Sequence number allocated at submission.
    seq: u64,
    /// Plugin work to execute.
    work: Box<dyn FnOnce() -> TransformResult + Send + 'static>,
    /// Channel delivering the result to the submitting caller.
    result_tx: mpsc::SyncSender<TransformResult>,
}

/// Guarded submission queue state.
struct PoolQueue {
    /// Pending jobs in submission order.
    jobs: VecDeque<Job>,
    /// Submitted rows not yet completed.
    pending: usize,
    /// Next sequence number to allocate.
    next_seq: u64,
    /// True once the pool is shutting down.
    shutdown: bool,
}

/// Reorder buffer restoring FIFO over completions.
struct ReorderBuffer {
    /// Next sequence number eligible to drain.
    next_drain: u64,
    /// Completed results awaiting their turn.
    ready: BTreeMap<u64, TransformResult>,
}

/// State shared between the pool handle and its workers.
struct PoolShared {
    /// Guarded submission queue.
    queue: Mutex<PoolQueue>,
    /// Signalled when a job is queued or shutdown begins.
    job_ready: Condvar,
    /// Signalled when a pending slot frees.
    slot_free: Condvar,
    /// Guarded reorder buffer.
    completions: Mutex<ReorderBuffer>,
}

// ============================================================================
// SECTION: Row Future
// ============================================================================

/// Per-row completion future returned by [`BatchWorkerPool::submit`].
pub struct RowFuture {
    /// Result channel for this row.
    receiver: mpsc::Receiver<TransformResult>,
    /// Per-row timeout, when configured.
    timeout_ms: Option<u64>,
}

impl RowFuture {
    /// Blocks until the row completes, honouring the configured timeout.
    ///
    /// # Errors
    ///
    /// Returns [`BatchPoolError::Timeout`] when the row exceeds its budget
    /// and [`BatchPoolError::Closed`] when the pool shut down first.
    pub fn wait(self) -> Result<TransformResult, BatchPoolError> {
        match self.timeout_ms {
            Some(timeout_ms) => self
                .receiver
                .recv_timeout(Duration::from_millis(timeout_ms))
                .map_err(|err| match err {
                    mpsc::RecvTimeoutError::Timeout => BatchPoolError::Timeout {
                        timeout_ms,
                    },
                    mpsc::RecvTimeoutError::Disconnected => BatchPoolError::Closed,
                }),
            None => self.receiver.recv().map_err(|_| BatchPoolError::Closed),
        }
    }
}

// ============================================================================
// SECTION: Batch Worker Pool
// ============================================================================

/// Bounded worker pool owned by a batch-aware plugin.
pub struct BatchWorkerPool {
    /// Shared queue and completion state.
    shared: Arc<PoolShared>,
    /// Worker join handles.
    workers: Vec<thread::JoinHandle<()>>,
    /// Pool configuration.
    settings: BatchSettings,
}

impl BatchWorkerPool {
    /// Starts a pool with the given settings.
    ///
    /// Each worker acquires a permit from the named rate-limit service before
    /// executing a job; when the pool size exceeds the limiter budget, excess
    /// workers idle on acquisition. That is a configuration mismatch, not a
    /// correctness issue.
    #[must_use]
    pub fn start(settings: BatchSettings, rate_limits: Arc<RateLimiterRegistry>) -> Self {
        let shared = Arc::new(PoolShared {
            queue: Mutex::new(PoolQueue {
                jobs: VecDeque::new(),
                pending: 0,
                next_seq: 0,
                shutdown: false,
            }),
            job_ready: Condvar::new(),
            slot_free: Condvar::new(),
            completions: Mutex::new(ReorderBuffer {
                next_drain: 0,
                ready: BTreeMap::new(),
            }),
        });
        let pool_size = settings.pool_size.max(1);
        let mut workers = Vec::with_capacity(pool_size);
        for _ in 0..pool_size {
            let shared = Arc::clone(&shared);
            let rate_limits = Arc::clone(&rate_limits);
            let service = settings.service.clone();
            workers.push(thread::spawn(move || worker_loop(&shared, &rate_limits, service)));
        }
        Self {
            shared,
            workers,
            settings,
        }
    }

    /// Submits one row's work, blocking on backpressure.
    ///
    /// The sequence number is allocated under the queue lock, so submission
    /// order equals sequence order.
    ///
    /// # Errors
    ///
    /// Returns [`BatchPoolError::Closed`] when the pool is shutting down.
    pub fn submit(
        &self,
        work: Box<dyn FnOnce() -> TransformResult + Send + 'static>,
    ) -> Result<RowFuture, BatchPoolError> {
        let max_pending = self.settings.max_pending.max(1);
        let (result_tx, receiver) = mpsc::sync_channel(1);
        {
            let mut queue = lock_recover(&self.shared.queue);
            while queue.pending >= max_pending && !queue.shutdown {
                queue = self
                    .shared
                    .slot_free
                    .wait(queue)
                    .unwrap_or_else(PoisonError::into_inner);
            }
            if queue.shutdown {
                return Err(BatchPoolError::Closed);
            }
            let seq = queue.next_seq;
            queue.next_seq += 1;
            queue.pending += 1;
            queue.jobs.push_back(Job {
                seq,
                work,
                result_tx,
            });
        }
        self.shared.job_ready.notify_one();
        Ok(RowFuture {
            receiver,
            timeout_ms: self.settings.row_timeout_ms,
        })
    }

    /// Drains buffered completions in submission order.
    ///
    /// Results are withheld until every earlier sequence number has
    /// completed, so consumers observe strict FIFO.
    #[must_use]
    pub fn drain_completed(&self) -> Vec<(u64, TransformResult)> {
        let mut completions = lock_recover(&self.shared.completions);
        let mut drained = Vec::new();
        loop {
            let seq = completions.next_drain;
            let Some(result) = completions.ready.remove(&seq) else {
                break;
            };
            drained.push((seq, result));
            completions.next_drain += 1;
        }
        drained
    }
}

impl Drop for BatchWorkerPool {
    fn drop(&mut self) {
        {
            let mut queue = lock_recover(&self.shared.queue);
            queue.shutdown = true;
        }
        self.shared.job_ready.notify_all();
        self.shared.slot_free.notify_all();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

// ============================================================================
// SECTION: Worker Loop
// ============================================================================

/// Executes queued jobs until shutdown.
fn worker_loop(
    shared: &Arc<PoolShared>,
    rate_limits: &Arc<RateLimiterRegistry>,
    service: Option<String>,
) {
    loop {
        let job = {
            let mut queue = lock_recover(&shared.queue);
            loop {
                if let Some(job) = queue.jobs.pop_front() {
                    break job;
                }
                if queue.shutdown {
                    return;
                }
                queue = shared.job_ready.wait(queue).unwrap_or_else(PoisonError::into_inner);
            }
        };

        let permit = service.as_deref().and_then(|name| rate_limits.acquire(name));
        let work = job.work;
        let result = catch_unwind(AssertUnwindSafe(work)).unwrap_or_else(|_| {
            TransformResult::error(TransformErrorReason::fatal("worker panicked during process"))
        });
        drop(permit);

        {
            let mut completions = lock_recover(&shared.completions);
            completions.ready.insert(job.seq, result.clone());
        }
        // The submitting caller may have timed out and dropped its receiver.
        let _ = job.result_tx.send(result);

        {
            let mut queue = lock_recover(&shared.queue);
            queue.pending = queue.pending.saturating_sub(1);
        }
        shared.slot_free.notify_one();
    }
}
