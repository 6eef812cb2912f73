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

//! Error types for ledger operations and the worker pool.

use crate::base::{AccountId, TransactionId};
use thiserror::Error;

/// Ledger and transaction processing errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// Amount is zero or negative
    #[error("invalid amount (must be positive)")]
    InvalidAmount,

    /// Debit or transfer would exceed the current balance
    #[error("insufficient balance")]
    InsufficientBalance,

    /// Referenced account has not been opened
    #[error("unknown account {0}")]
    UnknownAccount(AccountId),

    /// Account was already opened
    #[error("account {0} already exists")]
    AccountExists(AccountId),

    /// Transfer source and destination are the same account
    #[error("cannot transfer to the same account")]
    SameAccount,

    /// Transaction already reached a terminal status
    #[error("transaction {0} is not pending")]
    NotPending(TransactionId),

    /// Transaction kind and counterparty disagree
    #[error("transaction {0} is malformed")]
    MalformedTransaction(TransactionId),

    /// No transaction with this ID has been logged
    #[error("unknown transaction {0}")]
    UnknownTransaction(TransactionId),

    /// Only completed, non-compensating transactions can be reversed
    #[error("transaction {0} cannot be reversed")]
    NotReversible(TransactionId),

    #[error("transaction {0} was already reversed")]
    AlreadyReversed(TransactionId),

    /// The transaction log or its journal could not be written
    #[error("storage failure: {0}")]
    StorageFailure(String),
}

impl LedgerError {
    /// Returns `true` for errors caused by the request itself.
    ///
    /// Everything except [`LedgerError::StorageFailure`] is a client error;
    /// transport layers map the rest to a server error.
    pub fn is_client_error(&self) -> bool {
        !matches!(self, Self::StorageFailure(_))
    }
}

/// Worker pool errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
    /// Pool configuration is unusable
    #[error("invalid pool configuration: {0}")]
    InvalidConfig(&'static str),

    /// Queue no longer accepts transactions
    #[error("transaction queue is closed")]
    Closed,

    /// Transaction ID was already submitted
    #[error("duplicate transaction ID {0}")]
    DuplicateTransaction(TransactionId),

    /// Worker thread could not be started
    #[error("failed to spawn worker: {0}")]
    Spawn(String),
}
