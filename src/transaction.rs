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

//! Transaction records.
//!
//! Transactions follow a one-way state machine:
//! - [`Pending`] → [`Completed`] (ledger mutation applied)
//! - [`Pending`] → [`Failed`] (rejected, no mutation)
//!
//! The transition methods consume the transaction, so a terminal record
//! cannot be moved to another status.
//!
//! [`Pending`]: TransactionStatus::Pending
//! [`Completed`]: TransactionStatus::Completed
//! [`Failed`]: TransactionStatus::Failed

use crate::LedgerError;
use crate::base::{AccountId, TransactionId};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TransactionKind {
    Credit,
    Debit,
    Transfer,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Pending,
    Completed,
    Failed,
}

/// A requested balance-affecting operation, before an ID is issued.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TransactionRequest {
    Credit {
        account_id: AccountId,
        amount: Decimal,
    },
    Debit {
        account_id: AccountId,
        amount: Decimal,
    },
    Transfer {
        from: AccountId,
        to: AccountId,
        amount: Decimal,
    },
}

impl TransactionRequest {
    pub fn kind(&self) -> TransactionKind {
        match self {
            Self::Credit { .. } => TransactionKind::Credit,
            Self::Debit { .. } => TransactionKind::Debit,
            Self::Transfer { .. } => TransactionKind::Transfer,
        }
    }

    pub fn amount(&self) -> Decimal {
        match self {
            Self::Credit { amount, .. }
            | Self::Debit { amount, .. }
            | Self::Transfer { amount, .. } => *amount,
        }
    }

    /// The request undoing this one's balance movement.
    pub fn inverse(&self) -> Self {
        match *self {
            Self::Credit { account_id, amount } => Self::Debit { account_id, amount },
            Self::Debit { account_id, amount } => Self::Credit { account_id, amount },
            Self::Transfer { from, to, amount } => Self::Transfer {
                from: to,
                to: from,
                amount,
            },
        }
    }
}

/// A single ledger transaction.
///
/// For transfers `account_id` is the source and `counterparty_id` the
/// destination; other kinds carry no counterparty. A compensating
/// transaction names the one it undoes in `reverses`. The field layout
/// matches the persisted `transactions` table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Transaction {
    pub id: TransactionId,
    pub account_id: AccountId,
    pub counterparty_id: Option<AccountId>,
    pub amount: Decimal,
    #[serde(rename = "type")]
    pub kind: TransactionKind,
    pub status: TransactionStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub reverses: Option<TransactionId>,
}

/// A signed balance movement derived from a completed transaction.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct BalanceEntry {
    pub account_id: AccountId,
    pub transaction_id: TransactionId,
    pub delta: Decimal,
    pub created_at: DateTime<Utc>,
}

impl Transaction {
    /// Creates a pending transaction stamped with the current time.
    pub fn pending(id: TransactionId, request: TransactionRequest) -> Self {
        Self::pending_at(id, request, Utc::now())
    }

    pub fn pending_at(
        id: TransactionId,
        request: TransactionRequest,
        created_at: DateTime<Utc>,
    ) -> Self {
        let (account_id, counterparty_id) = match request {
            TransactionRequest::Credit { account_id, .. }
            | TransactionRequest::Debit { account_id, .. } => (account_id, None),
            TransactionRequest::Transfer { from, to, .. } => (from, Some(to)),
        };

        Self {
            id,
            account_id,
            counterparty_id,
            amount: request.amount(),
            kind: request.kind(),
            status: TransactionStatus::Pending,
            created_at,
            reverses: None,
        }
    }

    /// Creates a pending transaction compensating `original`.
    pub fn reversal(id: TransactionId, request: TransactionRequest, original: TransactionId) -> Self {
        Self {
            reverses: Some(original),
            ..Self::pending(id, request)
        }
    }

    /// Rebuilds the request this transaction was created from.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::MalformedTransaction`] if a transfer has no
    /// counterparty, or a credit or debit has one.
    pub fn request(&self) -> Result<TransactionRequest, LedgerError> {
        let account_id = self.account_id;
        let amount = self.amount;

        match (self.kind, self.counterparty_id) {
            (TransactionKind::Credit, None) => Ok(TransactionRequest::Credit { account_id, amount }),
            (TransactionKind::Debit, None) => Ok(TransactionRequest::Debit { account_id, amount }),
            (TransactionKind::Transfer, Some(to)) => Ok(TransactionRequest::Transfer {
                from: account_id,
                to,
                amount,
            }),
            _ => Err(LedgerError::MalformedTransaction(self.id)),
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == TransactionStatus::Pending
    }

    pub fn complete(self) -> Self {
        Self {
            status: TransactionStatus::Completed,
            ..self
        }
    }

    pub fn fail(self) -> Self {
        Self {
            status: TransactionStatus::Failed,
            ..self
        }
    }

    /// Returns `true` if the transaction references `account_id` on
    /// either side.
    pub fn touches(&self, account_id: AccountId) -> bool {
        self.account_id == account_id || self.counterparty_id == Some(account_id)
    }

    /// Balance movements produced by this transaction.
    ///
    /// Empty unless the transaction is completed and well formed.
    pub fn balance_entries(&self) -> Vec<BalanceEntry> {
        if self.status != TransactionStatus::Completed {
            return Vec::new();
        }
        let Ok(request) = self.request() else {
            return Vec::new();
        };

        let entry = |account_id, delta| BalanceEntry {
            account_id,
            transaction_id: self.id,
            delta,
            created_at: self.created_at,
        };

        match request {
            TransactionRequest::Credit { account_id, amount } => vec![entry(account_id, amount)],
            TransactionRequest::Debit { account_id, amount } => vec![entry(account_id, -amount)],
            TransactionRequest::Transfer { from, to, amount } => {
                vec![entry(from, -amount), entry(to, amount)]
            }
        }
    }
}
