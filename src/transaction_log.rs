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

//! Append-only transaction log.
//!
//! Entries are kept in append order, which is the order transactions
//! reached their terminal status. Per-account listings are returned in
//! creation order (ascending [`TransactionId`]).
//!
//! Writers take the log's write lock for the duration of one append
//! (journal write included); readers take the read lock and see either the
//! log before or after an append, never a partial entry.

use crate::LedgerError;
use crate::base::{AccountId, TransactionId};
use crate::journal::Journal;
use crate::transaction::{BalanceEntry, Transaction, TransactionStatus};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Default)]
struct LogState {
    entries: Vec<Transaction>,
    /// Positions in `entries` per referenced account.
    by_account: HashMap<AccountId, Vec<usize>>,
    by_id: HashMap<TransactionId, usize>,
    /// Original ID to the completed transaction compensating it.
    reversed: HashMap<TransactionId, TransactionId>,
    /// Originals with a reversal in flight.
    reversing: HashSet<TransactionId>,
    journal: Option<Box<dyn Journal>>,
}

impl LogState {
    fn insert(&mut self, transaction: Transaction) {
        let position = self.entries.len();

        self.by_account
            .entry(transaction.account_id)
            .or_default()
            .push(position);
        if let Some(counterparty) = transaction.counterparty_id {
            self.by_account.entry(counterparty).or_default().push(position);
        }
        self.by_id.insert(transaction.id, position);
        if let Some(original) = transaction.reverses {
            if transaction.status == TransactionStatus::Completed {
                self.reversed.insert(original, transaction.id);
                self.reversing.remove(&original);
            }
        }
        self.entries.push(transaction);
    }

    fn for_account(&self, account_id: AccountId) -> Vec<&Transaction> {
        let mut transactions: Vec<&Transaction> = self
            .by_account
            .get(&account_id)
            .map(|positions| positions.iter().map(|&i| &self.entries[i]).collect())
            .unwrap_or_default();
        transactions.sort_by_key(|tx| tx.id);
        transactions
    }
}

/// Ordered record of every applied or rejected transaction.
pub struct TransactionLog {
    next_id: AtomicU64,
    state: RwLock<LogState>,
}

impl TransactionLog {
    /// Creates an empty in-memory log.
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            state: RwLock::new(LogState::default()),
        }
    }

    /// Creates a log that writes every entry through to `journal` first.
    pub fn with_journal(journal: impl Journal + 'static) -> Self {
        let log = Self::new();
        log.state.write().journal = Some(Box::new(journal));
        log
    }

    /// Issues a fresh transaction ID.
    ///
    /// IDs are strictly increasing and never repeat, however many threads
    /// call this concurrently.
    pub fn next_id(&self) -> TransactionId {
        TransactionId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Appends a terminal transaction.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::StorageFailure`] if the transaction is still
    /// pending or the journal write fails. Nothing is appended in either
    /// case.
    pub fn append(&self, transaction: Transaction) -> Result<(), LedgerError> {
        if transaction.is_pending() {
            return Err(LedgerError::StorageFailure(format!(
                "refusing to log pending transaction {}",
                transaction.id
            )));
        }

        let mut state = self.state.write();
        if let Some(journal) = state.journal.as_mut() {
            journal.record(&transaction)?;
        }
        state.insert(transaction);
        Ok(())
    }

    /// Inserts an entry read back from a journal, without writing it again.
    ///
    /// Keeps `next_id` ahead of every restored ID.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::StorageFailure`] for an ID no successor can
    /// be issued after.
    pub(crate) fn restore(&self, transaction: Transaction) -> Result<(), LedgerError> {
        let next = transaction.id.0.checked_add(1).ok_or_else(|| {
            LedgerError::StorageFailure(format!("transaction id {} is out of range", transaction.id))
        })?;
        self.next_id.fetch_max(next, Ordering::Relaxed);
        self.state.write().insert(transaction);
        Ok(())
    }

    /// Reserves `original` for a reversal so concurrent callers cannot both
    /// compensate it.
    pub(crate) fn claim_reversal(&self, original: TransactionId) -> Result<(), LedgerError> {
        let mut state = self.state.write();
        if state.reversed.contains_key(&original) || !state.reversing.insert(original) {
            return Err(LedgerError::AlreadyReversed(original));
        }
        Ok(())
    }

    /// Drops a claim whose reversal did not complete.
    pub(crate) fn release_reversal(&self, original: TransactionId) {
        self.state.write().reversing.remove(&original);
    }

    /// ID of the completed transaction reversing `original`, if any.
    pub fn reversal_of(&self, original: TransactionId) -> Option<TransactionId> {
        self.state.read().reversed.get(&original).copied()
    }

    /// Attaches a journal to a log, typically after [`TransactionLog::restore`].
    pub(crate) fn attach_journal(&self, journal: Box<dyn Journal>) {
        self.state.write().journal = Some(journal);
    }

    /// Returns every transaction touching `account_id`, in creation order.
    pub fn list_by_account(&self, account_id: AccountId) -> Vec<Transaction> {
        self.state
            .read()
            .for_account(account_id)
            .into_iter()
            .cloned()
            .collect()
    }

    pub fn get(&self, id: TransactionId) -> Option<Transaction> {
        let state = self.state.read();
        state.by_id.get(&id).map(|&i| state.entries[i].clone())
    }

    /// Returns all entries in append order.
    pub fn entries(&self) -> Vec<Transaction> {
        self.state.read().entries.clone()
    }

    pub fn len(&self) -> usize {
        self.state.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Balance movements for `account_id`, in creation order.
    pub fn history(&self, account_id: AccountId) -> Vec<BalanceEntry> {
        self.state
            .read()
            .for_account(account_id)
            .into_iter()
            .flat_map(|tx| tx.balance_entries())
            .filter(|entry| entry.account_id == account_id)
            .collect()
    }

    /// Balance of `account_id` derived from the history, counting every
    /// completed transaction created at or before `at`.
    pub fn balance_at(&self, account_id: AccountId, at: DateTime<Utc>) -> Decimal {
        self.history(account_id)
            .iter()
            .filter(|entry| entry.created_at <= at)
            .map(|entry| entry.delta)
            .sum()
    }
}

impl Default for TransactionLog {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TransactionLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.read();
        f.debug_struct("TransactionLog")
            .field("next_id", &self.next_id.load(Ordering::Relaxed))
            .field("entries", &state.entries.len())
            .field("journal", &state.journal.is_some())
            .finish()
    }
}
