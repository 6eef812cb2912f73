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

//! Transaction processing.
//!
//! Turns a pending [`Transaction`] into a ledger mutation plus a
//! `completed` log entry, or into a `failed` log entry with no mutation.
//!
//! | Outcome | Ledger | Log | Returned |
//! |---------|--------|-----|----------|
//! | Applied | mutated | `completed` entry | `Ok(transaction)` |
//! | Rejected | untouched | `failed` entry | `Err(error)` |
//! | Storage failure | untouched | nothing | `Err(StorageFailure)` |

use crate::LedgerError;
use crate::ledger::Ledger;
use crate::base::TransactionId;
use crate::transaction::{Transaction, TransactionRequest, TransactionStatus};
use crate::transaction_log::TransactionLog;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Applies transactions against a [`Ledger`] and records them in a
/// [`TransactionLog`].
#[derive(Debug, Clone)]
pub struct TransactionProcessor {
    ledger: Arc<Ledger>,
    log: Arc<TransactionLog>,
}

impl TransactionProcessor {
    pub fn new(ledger: Arc<Ledger>, log: Arc<TransactionLog>) -> Self {
        Self { ledger, log }
    }

    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    pub fn log(&self) -> &Arc<TransactionLog> {
        &self.log
    }

    /// Issues an ID for `request` and processes it immediately.
    pub fn execute(&self, request: TransactionRequest) -> Result<Transaction, LedgerError> {
        self.process(Transaction::pending(self.log.next_id(), request))
    }

    /// Processes a pending transaction to its terminal status.
    ///
    /// The `completed` entry is appended while the account locks used for
    /// the mutation are still held, so the log never disagrees with the
    /// ledger for any single account.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::NotPending`] - the transaction is already terminal;
    ///   nothing is logged.
    /// - [`LedgerError::MalformedTransaction`], [`LedgerError::InvalidAmount`],
    ///   [`LedgerError::InsufficientBalance`], [`LedgerError::UnknownAccount`],
    ///   [`LedgerError::SameAccount`] - the transaction is logged as `failed`.
    /// - [`LedgerError::StorageFailure`] - nothing is mutated, and the
    ///   transaction is not logged.
    pub fn process(&self, transaction: Transaction) -> Result<Transaction, LedgerError> {
        if !transaction.is_pending() {
            return Err(LedgerError::NotPending(transaction.id));
        }

        let outcome = match transaction.request() {
            Err(malformed) => Err(malformed),
            Ok(_) if transaction.amount <= Decimal::ZERO => Err(LedgerError::InvalidAmount),
            Ok(request) => self.apply(&transaction, request),
        };

        match outcome {
            Ok(completed) => {
                debug!(
                    id = %completed.id,
                    kind = ?completed.kind,
                    account = %completed.account_id,
                    amount = %completed.amount,
                    "transaction completed"
                );
                Ok(completed)
            }
            Err(LedgerError::StorageFailure(reason)) => {
                error!(id = %transaction.id, %reason, "transaction could not be stored");
                Err(LedgerError::StorageFailure(reason))
            }
            Err(rejection) => {
                let id = transaction.id;
                warn!(%id, error = %rejection, "transaction rejected");
                if let Err(e) = self.log.append(transaction.fail()) {
                    error!(%id, %rejection, error = %e, "rejected transaction could not be stored");
                    return Err(e);
                }
                Err(rejection)
            }
        }
    }

    /// Posts a compensating transaction undoing a completed one.
    ///
    /// The original stays in the log untouched. The reversal is processed
    /// like any other transaction, so reversing a credit that has since
    /// been spent fails with [`LedgerError::InsufficientBalance`] and is
    /// logged as `failed`. Each transaction can be reversed once.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::UnknownTransaction`] - `original` was never logged.
    /// - [`LedgerError::NotReversible`] - `original` failed, or is itself a
    ///   reversal.
    /// - [`LedgerError::AlreadyReversed`] - a reversal already completed or
    ///   is in progress.
    /// - Any error from [`TransactionProcessor::process`].
    pub fn reverse(&self, original: TransactionId) -> Result<Transaction, LedgerError> {
        let transaction = self
            .log
            .get(original)
            .ok_or(LedgerError::UnknownTransaction(original))?;
        if transaction.status != TransactionStatus::Completed || transaction.reverses.is_some() {
            return Err(LedgerError::NotReversible(original));
        }
        let request = transaction.request()?.inverse();

        self.log.claim_reversal(original)?;
        let result = self.process(Transaction::reversal(self.log.next_id(), request, original));
        if result.is_err() {
            self.log.release_reversal(original);
        }
        result
    }

    fn apply(
        &self,
        transaction: &Transaction,
        request: TransactionRequest,
    ) -> Result<Transaction, LedgerError> {
        let completed = transaction.clone().complete();
        let append = || self.log.append(completed.clone());

        match request {
            TransactionRequest::Credit { account_id, amount } => {
                self.ledger.credit_with(account_id, amount, append)?;
            }
            TransactionRequest::Debit { account_id, amount } => {
                self.ledger.debit_with(account_id, amount, append)?;
            }
            TransactionRequest::Transfer { from, to, amount } => {
                self.ledger.transfer_with(from, to, amount, append)?;
            }
        }

        Ok(completed)
    }
}
