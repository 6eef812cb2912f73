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

//! Durable write-through storage for the transaction log.
//!
//! # CSV Layout
//!
//! Transactions: `id, account_id, counterparty_id, amount, type, status, created_at, reverses`
//!
//! Balances: `account_id, amount`
//!
//! ```csv
//! id,account_id,counterparty_id,amount,type,status,created_at,reverses
//! 1,1,,100.00,credit,completed,2025-01-01T00:00:00Z,
//! 2,1,2,30.00,transfer,completed,2025-01-01T00:00:01Z,
//! 3,2,1,30.00,transfer,completed,2025-01-01T00:00:02Z,2
//! ```
//!
//! Journals without the `reverses` column are still readable.

use crate::LedgerError;
use crate::base::AccountId;
use crate::transaction::Transaction;
use csv::{ReaderBuilder, Trim, Writer, WriterBuilder};
use rust_decimal::Decimal;
use serde::Serialize;
use std::io::{Read, Write};

/// A sink every terminal transaction is written to before it enters the
/// in-memory log.
pub trait Journal: Send + Sync {
    /// Persists one transaction.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::StorageFailure`] if the record could not be
    /// written.
    fn record(&mut self, transaction: &Transaction) -> Result<(), LedgerError>;
}

/// Journal writing the `transactions` layout as CSV, flushing after every
/// record.
pub struct CsvJournal<W: Write> {
    writer: Writer<W>,
}

impl<W: Write> CsvJournal<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Writer::from_writer(writer),
        }
    }

    /// Journal continuing an existing file; no header row is written.
    pub fn appending(writer: W) -> Self {
        Self {
            writer: WriterBuilder::new().has_headers(false).from_writer(writer),
        }
    }

    /// Flushes and returns the underlying writer.
    pub fn into_inner(self) -> Result<W, LedgerError> {
        self.writer
            .into_inner()
            .map_err(|e| LedgerError::StorageFailure(e.to_string()))
    }
}

impl<W: Write + Send + Sync> Journal for CsvJournal<W> {
    fn record(&mut self, transaction: &Transaction) -> Result<(), LedgerError> {
        self.writer.serialize(transaction).map_err(storage_failure)?;
        self.writer
            .flush()
            .map_err(|e| LedgerError::StorageFailure(e.to_string()))
    }
}

fn storage_failure(error: csv::Error) -> LedgerError {
    LedgerError::StorageFailure(error.to_string())
}

/// Reads a journal written by [`CsvJournal`], in file order.
///
/// # Errors
///
/// Returns [`LedgerError::StorageFailure`] on the first unreadable row; a
/// journal with a hole in it cannot be replayed safely.
pub fn read_journal<R: Read>(reader: R) -> Result<Vec<Transaction>, LedgerError> {
    let mut rdr = ReaderBuilder::new()
        .trim(Trim::All)
        .has_headers(true)
        .from_reader(reader);

    rdr.deserialize::<Transaction>()
        .map(|row| row.map_err(storage_failure))
        .collect()
}

#[derive(Debug, Serialize)]
struct BalanceRow {
    account_id: AccountId,
    amount: Decimal,
}

/// Writes balances in the `balances` layout.
///
/// # Example
///
/// ```csv
/// account_id,amount
/// 1,70
/// 2,80.5
/// ```
pub fn write_balances<W: Write>(
    balances: &[(AccountId, Decimal)],
    writer: W,
) -> Result<(), LedgerError> {
    let mut wtr = Writer::from_writer(writer);

    for (account_id, amount) in balances {
        wtr.serialize(BalanceRow {
            account_id: *account_id,
            amount: amount.round_dp(4),
        })
        .map_err(storage_failure)?;
    }

    wtr.flush()
        .map_err(|e| LedgerError::StorageFailure(e.to_string()))
}
