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

//! Ledger engine.
//!
//! The [`Engine`] ties the [`Ledger`], the [`TransactionLog`] and the
//! [`TransactionProcessor`] together and is the entry point for callers
//! such as an HTTP layer or the CLI.
//!
//! # Operations
//!
//! - **Credits**: Add funds to an open account.
//! - **Debits**: Remove funds (fails if the balance is insufficient).
//! - **Transfers**: Debit one account and credit another as one step.
//! - **Reversals**: Post a compensating transaction for a completed one;
//!   the original entry is never modified.
//! - **Queued processing**: [`Engine::start_pool`] runs the same operations
//!   on a pool of worker threads.
//!
//! # Thread Safety
//!
//! All operations take `&self`. Operations on different accounts run in
//! parallel; operations on the same account are serialized by its lock.

use crate::base::{AccountId, TransactionId};
use crate::journal::Journal;
use crate::ledger::Ledger;
use crate::processor::TransactionProcessor;
use crate::transaction::{BalanceEntry, Transaction, TransactionRequest, TransactionStatus};
use crate::transaction_log::TransactionLog;
use crate::worker_pool::{PoolConfig, WorkerPool};
use crate::{LedgerError, PoolError};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::info;

/// Ledger engine owning balances, the transaction log and the processor.
///
/// # Invariants
///
/// - Every balance equals the sum of the deltas of its completed
///   transactions.
/// - Balances never go negative.
/// - Transfers conserve the sum of all balances.
#[derive(Debug)]
pub struct Engine {
    processor: Arc<TransactionProcessor>,
}

impl Engine {
    /// Creates an engine with no accounts and an in-memory log.
    pub fn new() -> Self {
        Self::with_log(TransactionLog::new())
    }

    /// Creates an engine whose log writes through to `journal`.
    pub fn with_journal(journal: impl Journal + 'static) -> Self {
        Self::with_log(TransactionLog::with_journal(journal))
    }

    fn with_log(log: TransactionLog) -> Self {
        Engine {
            processor: Arc::new(TransactionProcessor::new(
                Arc::new(Ledger::new()),
                Arc::new(log),
            )),
        }
    }

    /// Rebuilds an engine from journaled transactions.
    ///
    /// Every entry is restored into the log; `completed` entries are
    /// replayed against the ledger in journal order, opening accounts as
    /// they appear. Failed entries are kept for audit only. If `journal`
    /// is given, new transactions are appended to it.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::StorageFailure`] if the journal holds a
    /// pending or malformed transaction, an ID at the end of the ID range,
    /// or replay would drive a balance negative.
    pub fn restore<I>(transactions: I, journal: Option<Box<dyn Journal>>) -> Result<Self, LedgerError>
    where
        I: IntoIterator<Item = Transaction>,
    {
        let engine = Self::new();
        let ledger = engine.ledger();
        let log = engine.log();

        for transaction in transactions {
            match transaction.status {
                TransactionStatus::Pending => {
                    return Err(LedgerError::StorageFailure(format!(
                        "journal contains pending transaction {}",
                        transaction.id
                    )));
                }
                TransactionStatus::Completed => {
                    if transaction.request().is_err() {
                        return Err(LedgerError::StorageFailure(format!(
                            "journal contains malformed transaction {}",
                            transaction.id
                        )));
                    }
                    for entry in transaction.balance_entries() {
                        let balance = ledger.balance(entry.account_id).unwrap_or(Decimal::ZERO);
                        if balance + entry.delta < Decimal::ZERO {
                            return Err(LedgerError::StorageFailure(format!(
                                "replaying transaction {} overdraws account {}",
                                transaction.id, entry.account_id
                            )));
                        }
                        ledger.replay_delta(entry.account_id, entry.delta);
                    }
                }
                TransactionStatus::Failed => {}
            }
            // Accounts referenced only by failed entries are still known.
            for account_id in std::iter::once(transaction.account_id).chain(transaction.counterparty_id) {
                if !ledger.contains(account_id) {
                    let _ = ledger.open_account(account_id);
                }
            }
            log.restore(transaction)?;
        }

        if let Some(journal) = journal {
            log.attach_journal(journal);
        }

        info!(
            transactions = log.len(),
            accounts = ledger.account_ids().len(),
            "ledger restored"
        );
        Ok(engine)
    }

    pub fn ledger(&self) -> &Arc<Ledger> {
        self.processor.ledger()
    }

    pub fn log(&self) -> &Arc<TransactionLog> {
        self.processor.log()
    }

    pub fn processor(&self) -> &Arc<TransactionProcessor> {
        &self.processor
    }

    /// Opens a zero-balance account.
    pub fn open_account(&self, account_id: AccountId) -> Result<(), LedgerError> {
        self.ledger().open_account(account_id)
    }

    pub fn has_account(&self, account_id: AccountId) -> bool {
        self.ledger().contains(account_id)
    }

    pub fn credit(&self, account_id: AccountId, amount: Decimal) -> Result<Transaction, LedgerError> {
        self.execute(TransactionRequest::Credit { account_id, amount })
    }

    pub fn debit(&self, account_id: AccountId, amount: Decimal) -> Result<Transaction, LedgerError> {
        self.execute(TransactionRequest::Debit { account_id, amount })
    }

    pub fn transfer(
        &self,
        from: AccountId,
        to: AccountId,
        amount: Decimal,
    ) -> Result<Transaction, LedgerError> {
        self.execute(TransactionRequest::Transfer { from, to, amount })
    }

    /// Processes a request synchronously.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::InvalidAmount`] - amount is not positive.
    /// - [`LedgerError::InsufficientBalance`] - debit or transfer exceeds the balance.
    /// - [`LedgerError::UnknownAccount`] - an account is not open.
    /// - [`LedgerError::SameAccount`] - transfer to the source account.
    /// - [`LedgerError::StorageFailure`] - the log could not be written.
    pub fn execute(&self, request: TransactionRequest) -> Result<Transaction, LedgerError> {
        self.processor.execute(request)
    }

    /// Posts a compensating transaction for a completed one.
    ///
    /// See [`TransactionProcessor::reverse`].
    pub fn reverse(&self, original: TransactionId) -> Result<Transaction, LedgerError> {
        self.processor.reverse(original)
    }

    /// Creates a pending transaction with a fresh ID, for
    /// [`WorkerPool::submit`].
    pub fn new_transaction(&self, request: TransactionRequest) -> Transaction {
        Transaction::pending(self.log().next_id(), request)
    }

    pub fn balance(&self, account_id: AccountId) -> Result<Decimal, LedgerError> {
        self.ledger().balance(account_id)
    }

    /// All balances as one consistent snapshot, in account order.
    pub fn balances(&self) -> Vec<(AccountId, Decimal)> {
        self.ledger().snapshot_all()
    }

    /// Every logged transaction touching `account_id`, in creation order.
    pub fn transactions(&self, account_id: AccountId) -> Vec<Transaction> {
        self.log().list_by_account(account_id)
    }

    pub fn transaction(&self, id: TransactionId) -> Option<Transaction> {
        self.log().get(id)
    }

    pub fn history(&self, account_id: AccountId) -> Vec<BalanceEntry> {
        self.log().history(account_id)
    }

    /// Balance of an open account as of `at`, derived from its history.
    pub fn balance_at(&self, account_id: AccountId, at: DateTime<Utc>) -> Result<Decimal, LedgerError> {
        if !self.has_account(account_id) {
            return Err(LedgerError::UnknownAccount(account_id));
        }
        Ok(self.log().balance_at(account_id, at))
    }

    /// Starts a worker pool processing against this engine.
    pub fn start_pool(&self, config: PoolConfig) -> Result<WorkerPool, PoolError> {
        WorkerPool::start(Arc::clone(&self.processor), config)
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn restore_replays_completed_transactions_only() {
        let source = Engine::new();
        source.open_account(AccountId(1)).unwrap();
        source.open_account(AccountId(2)).unwrap();
        source.credit(AccountId(1), dec!(100)).unwrap();
        source.transfer(AccountId(1), AccountId(2), dec!(40)).unwrap();
        let _ = source.debit(AccountId(2), dec!(500));

        let restored = Engine::restore(source.log().entries(), None).unwrap();

        assert_eq!(restored.balances(), source.balances());
        assert_eq!(restored.log().len(), 3);
        assert_eq!(restored.new_transaction(TransactionRequest::Credit {
            account_id: AccountId(1),
            amount: dec!(1),
        }).id, TransactionId(4));
    }

    #[test]
    fn restore_rejects_pending_entries() {
        let pending = Transaction::pending(
            TransactionId(1),
            TransactionRequest::Credit {
                account_id: AccountId(1),
                amount: dec!(1),
            },
        );
        assert!(matches!(
            Engine::restore([pending], None),
            Err(LedgerError::StorageFailure(_))
        ));
    }

    #[test]
    fn restore_rejects_overdrawing_replay() {
        let debit = Transaction::pending(
            TransactionId(1),
            TransactionRequest::Debit {
                account_id: AccountId(1),
                amount: dec!(10),
            },
        )
        .complete();
        assert!(matches!(
            Engine::restore([debit], None),
            Err(LedgerError::StorageFailure(_))
        ));
    }

    #[test]
    fn restore_rejects_malformed_completed_entries() {
        let mut transfer = Transaction::pending(
            TransactionId(1),
            TransactionRequest::Transfer {
                from: AccountId(1),
                to: AccountId(2),
                amount: dec!(10),
            },
        );
        transfer.counterparty_id = None;
        assert!(matches!(
            Engine::restore([transfer.complete()], None),
            Err(LedgerError::StorageFailure(_))
        ));
    }

    #[test]
    fn restore_rejects_id_at_end_of_range() {
        let credit = Transaction::pending(
            TransactionId(u64::MAX),
            TransactionRequest::Credit {
                account_id: AccountId(1),
                amount: dec!(1),
            },
        )
        .complete();
        assert!(matches!(
            Engine::restore([credit], None),
            Err(LedgerError::StorageFailure(_))
        ));
    }

    #[test]
    fn restored_reversals_are_not_repeated() {
        let source = Engine::new();
        source.open_account(AccountId(1)).unwrap();
        let credit = source.credit(AccountId(1), dec!(10)).unwrap();
        source.reverse(credit.id).unwrap();

        let restored = Engine::restore(source.log().entries(), None).unwrap();

        assert_eq!(restored.balance(AccountId(1)), Ok(dec!(0)));
        assert_eq!(
            restored.reverse(credit.id),
            Err(LedgerError::AlreadyReversed(credit.id))
        );
    }

    #[test]
    fn balance_at_requires_open_account() {
        let engine = Engine::new();
        assert_eq!(
            engine.balance_at(AccountId(1), Utc::now()),
            Err(LedgerError::UnknownAccount(AccountId(1)))
        );
    }
}
