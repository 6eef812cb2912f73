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

//! Bounded, thread-safe queue of pending transactions with deduplication.
//!
//! Producers block while the queue is full. Once closed, the queue accepts
//! nothing new, producers still blocked on a full queue are released with
//! [`PoolError::Closed`], and consumers see the end of the queue after
//! draining what was already accepted.

use crate::PoolError;
use crate::base::TransactionId;
use crate::transaction::Transaction;
use crossbeam::channel::{self, Receiver, Sender};
use crossbeam::select;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::Mutex;

/// A bounded transaction queue with duplicate detection.
///
/// Combines a [`DashMap`] of every accepted transaction ID with a bounded
/// crossbeam channel preserving FIFO order.
#[derive(Debug)]
pub struct TransactionQueue {
    /// IDs accepted so far, for O(1) duplicate detection.
    accepted: DashMap<TransactionId, ()>,

    /// `None` once the queue is closed.
    input: Mutex<Option<QueueInput>>,

    receiver: Receiver<Transaction>,

    /// Disconnects when the queue is closed, waking blocked producers.
    closed: Receiver<()>,
}

#[derive(Debug)]
struct QueueInput {
    sender: Sender<Transaction>,
    _close_signal: Sender<()>,
}

impl TransactionQueue {
    /// Creates a queue holding at most `capacity` transactions.
    pub fn bounded(capacity: usize) -> Self {
        let (sender, receiver) = channel::bounded(capacity);
        let (close_signal, closed) = channel::bounded(0);
        Self {
            accepted: DashMap::new(),
            input: Mutex::new(Some(QueueInput {
                sender,
                _close_signal: close_signal,
            })),
            receiver,
            closed,
        }
    }

    /// Adds a pending transaction, blocking while the queue is full.
    ///
    /// # Errors
    ///
    /// - [`PoolError::DuplicateTransaction`] - the ID was already accepted.
    /// - [`PoolError::Closed`] - the queue was closed, including while this
    ///   call was waiting for space.
    pub fn push(&self, transaction: Transaction) -> Result<(), PoolError> {
        // Clone the sender so a blocked push does not hold the close lock.
        let sender = self
            .input
            .lock()
            .as_ref()
            .map(|input| input.sender.clone())
            .ok_or(PoolError::Closed)?;
        let transaction_id = transaction.id;

        // Use entry API for atomic check-and-insert to prevent race conditions
        match self.accepted.entry(transaction_id) {
            Entry::Occupied(_) => return Err(PoolError::DuplicateTransaction(transaction_id)),
            Entry::Vacant(entry) => {
                entry.insert(());
            }
        }

        let sent = select! {
            send(sender, transaction) -> result => result.is_ok(),
            recv(self.closed) -> _ => false,
        };
        if sent {
            Ok(())
        } else {
            self.accepted.remove(&transaction_id);
            Err(PoolError::Closed)
        }
    }

    /// Stops accepting transactions. Idempotent.
    pub fn close(&self) {
        self.input.lock().take();
    }

    pub fn is_closed(&self) -> bool {
        self.input.lock().is_none()
    }

    /// Consumer side of the queue.
    pub fn receiver(&self) -> &Receiver<Transaction> {
        &self.receiver
    }

    /// Removes and returns everything still queued, without blocking.
    pub fn drain(&self) -> Vec<Transaction> {
        self.receiver.try_iter().collect()
    }

    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }
}
