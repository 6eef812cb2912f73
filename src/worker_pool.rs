// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Worker pool draining a bounded queue of pending transactions.
//!
//! A fixed number of OS threads each loop: dequeue one transaction, hand it
//! to the [`TransactionProcessor`], bump the success or failure counter.
//!
//! # Ordering
//!
//! Nothing is ordered across workers. Two transactions for the same account
//! are applied in whichever order their workers take the account lock, so
//! the per-account result order is not deterministic across runs. Ledger
//! invariants hold regardless.
//!
//! # Shutdown and Cancellation
//!
//! [`WorkerPool::shutdown`] closes the queue, lets the workers drain it and
//! joins every thread before reporting. [`WorkerPool::cancel`] makes workers
//! stop pulling new work; a transaction already dequeued still runs to its
//! terminal status, and whatever is left in the queue is reported as
//! abandoned.

use crate::PoolError;
use crate::processor::TransactionProcessor;
use crate::transaction::Transaction;
use crate::transaction_queue::TransactionQueue;
use crossbeam::channel::{self, Receiver, Sender};
use crossbeam::select;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info};

/// Worker pool sizing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolConfig {
    pub workers: usize,
    pub queue_capacity: usize,
}

impl PoolConfig {
    pub const DEFAULT_WORKERS: usize = 4;
    pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

    pub fn validate(&self) -> Result<(), PoolError> {
        if self.workers == 0 {
            return Err(PoolError::InvalidConfig("workers must be at least 1"));
        }
        if self.queue_capacity == 0 {
            return Err(PoolError::InvalidConfig("queue capacity must be at least 1"));
        }
        Ok(())
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: Self::DEFAULT_WORKERS,
            queue_capacity: Self::DEFAULT_QUEUE_CAPACITY,
        }
    }
}

/// Outcome counts reported when the pool stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolSummary {
    pub succeeded: u64,
    pub failed: u64,
    /// Transactions still queued when a cancelled pool stopped.
    pub abandoned: u64,
}

#[derive(Debug, Default)]
struct PoolCounters {
    succeeded: AtomicU64,
    failed: AtomicU64,
}

/// Cancellation signal shared with the workers.
///
/// Dropping the sender disconnects the channel, which wakes every worker
/// blocked in `select!`.
#[derive(Debug)]
struct CancelSignal {
    cancelled: AtomicBool,
    sender: Mutex<Option<Sender<()>>>,
    receiver: Receiver<()>,
}

impl CancelSignal {
    fn new() -> Self {
        let (sender, receiver) = channel::bounded(0);
        Self {
            cancelled: AtomicBool::new(false),
            sender: Mutex::new(Some(sender)),
            receiver,
        }
    }

    fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
        self.sender.lock().take();
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// Fixed-size pool of worker threads processing queued transactions.
#[derive(Debug)]
pub struct WorkerPool {
    queue: Arc<TransactionQueue>,
    counters: Arc<PoolCounters>,
    cancel: Arc<CancelSignal>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Starts `config.workers` threads feeding `processor`.
    ///
    /// # Errors
    ///
    /// - [`PoolError::InvalidConfig`] - zero workers or zero capacity.
    /// - [`PoolError::Spawn`] - a worker thread could not be started; any
    ///   already started are stopped again.
    pub fn start(processor: Arc<TransactionProcessor>, config: PoolConfig) -> Result<Self, PoolError> {
        config.validate()?;

        let mut pool = Self {
            queue: Arc::new(TransactionQueue::bounded(config.queue_capacity)),
            counters: Arc::new(PoolCounters::default()),
            cancel: Arc::new(CancelSignal::new()),
            workers: Vec::with_capacity(config.workers),
        };

        for index in 0..config.workers {
            let worker = Worker {
                index,
                queue: Arc::clone(&pool.queue),
                processor: Arc::clone(&processor),
                counters: Arc::clone(&pool.counters),
                cancel: Arc::clone(&pool.cancel),
            };

            let handle = thread::Builder::new()
                .name(format!("ledger-worker-{index}"))
                .spawn(move || worker.run())
                .map_err(|e| PoolError::Spawn(e.to_string()))?;
            pool.workers.push(handle);
        }

        info!(
            workers = config.workers,
            queue_capacity = config.queue_capacity,
            "worker pool started"
        );
        Ok(pool)
    }

    /// Enqueues a pending transaction, blocking while the queue is full.
    ///
    /// # Errors
    ///
    /// - [`PoolError::Closed`] - the pool is shutting down or cancelled.
    /// - [`PoolError::DuplicateTransaction`] - the ID was already submitted.
    pub fn submit(&self, transaction: Transaction) -> Result<(), PoolError> {
        if self.cancel.is_cancelled() {
            return Err(PoolError::Closed);
        }
        self.queue.push(transaction)
    }

    /// Stops workers from taking new transactions.
    pub fn cancel(&self) {
        info!("worker pool cancelled");
        self.queue.close();
        self.cancel.cancel();
    }

    /// Counts so far, while the pool is still running.
    pub fn summary(&self) -> PoolSummary {
        PoolSummary {
            succeeded: self.counters.succeeded.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            abandoned: 0,
        }
    }

    /// Closes the queue, waits for every worker to exit and reports the
    /// final counts.
    pub fn shutdown(mut self) -> PoolSummary {
        self.stop();

        let abandoned = self.queue.drain().len() as u64;
        let summary = PoolSummary {
            abandoned,
            ..self.summary()
        };

        info!(
            succeeded = summary.succeeded,
            failed = summary.failed,
            abandoned = summary.abandoned,
            "worker pool stopped"
        );
        summary
    }

    fn stop(&mut self) {
        self.queue.close();
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                error!("worker thread panicked");
            }
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.stop();
    }
}

struct Worker {
    index: usize,
    queue: Arc<TransactionQueue>,
    processor: Arc<TransactionProcessor>,
    counters: Arc<PoolCounters>,
    cancel: Arc<CancelSignal>,
}

impl Worker {
    fn run(self) {
        debug!(worker = self.index, "worker started");

        while let Some(transaction) = self.next() {
            match self.processor.process(transaction) {
                Ok(_) => {
                    self.counters.succeeded.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    // Rejections are already logged by the processor.
                    if !e.is_client_error() {
                        error!(worker = self.index, error = %e, "worker continuing after failure");
                    }
                    self.counters.failed.fetch_add(1, Ordering::Relaxed);
                }
            }
        }

        debug!(worker = self.index, "worker exiting");
    }

    /// Blocks for the next transaction; `None` once the queue is closed and
    /// drained, or the pool is cancelled.
    fn next(&self) -> Option<Transaction> {
        if self.cancel.is_cancelled() {
            return None;
        }

        select! {
            recv(self.queue.receiver()) -> message => message.ok(),
            recv(self.cancel.receiver) -> _ => None,
        }
    }
}
