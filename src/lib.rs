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

//! # Ledger Engine
//!
//! This library keeps per-account balances consistent under concurrent
//! credits, debits and transfers, records every operation in an
//! append-only log, and processes queued transactions on a worker pool.
//!
//! ## Core Components
//!
//! - [`Ledger`]: Account balances with per-account locks
//! - [`TransactionLog`]: Append-only record of applied and rejected transactions
//! - [`TransactionProcessor`]: Applies one transaction with no partial effects
//! - [`WorkerPool`]: Fixed set of threads draining a bounded transaction queue
//! - [`Engine`]: Entry point tying the above together
//!
//! ## Example
//!
//! ```
//! use ledger_engine::{AccountId, Engine, LedgerError};
//! use rust_decimal_macros::dec;
//!
//! let engine = Engine::new();
//! engine.open_account(AccountId(1)).unwrap();
//! engine.open_account(AccountId(2)).unwrap();
//!
//! engine.credit(AccountId(1), dec!(100.00)).unwrap();
//! engine.transfer(AccountId(1), AccountId(2), dec!(30.00)).unwrap();
//!
//! assert_eq!(engine.balance(AccountId(1)).unwrap(), dec!(70.00));
//! assert_eq!(engine.balance(AccountId(2)).unwrap(), dec!(30.00));
//! assert_eq!(
//!     engine.debit(AccountId(2), dec!(1000)),
//!     Err(LedgerError::InsufficientBalance)
//! );
//! ```
//!
//! ## Queued Processing
//!
//! ```
//! use ledger_engine::{AccountId, Engine, PoolConfig, TransactionRequest};
//! use rust_decimal_macros::dec;
//!
//! let engine = Engine::new();
//! engine.open_account(AccountId(1)).unwrap();
//!
//! let pool = engine.start_pool(PoolConfig::default()).unwrap();
//! for _ in 0..10 {
//!     let tx = engine.new_transaction(TransactionRequest::Credit {
//!         account_id: AccountId(1),
//!         amount: dec!(1),
//!     });
//!     pool.submit(tx).unwrap();
//! }
//!
//! let summary = pool.shutdown();
//! assert_eq!(summary.succeeded, 10);
//! assert_eq!(engine.balance(AccountId(1)).unwrap(), dec!(10));
//! ```
//!
//! ## Thread Safety
//!
//! Operations on different accounts run in parallel. Multi-account
//! operations lock accounts in ascending [`AccountId`] order, so opposing
//! transfers cannot deadlock.

pub mod account;
mod base;
mod engine;
pub mod error;
pub mod journal;
mod ledger;
mod processor;
mod transaction;
mod transaction_log;
mod transaction_queue;
mod worker_pool;

pub use account::Account;
pub use base::{AccountId, TransactionId};
pub use engine::Engine;
pub use error::{LedgerError, PoolError};
pub use journal::{CsvJournal, Journal, read_journal, write_balances};
pub use ledger::Ledger;
pub use processor::TransactionProcessor;
pub use transaction::{
    BalanceEntry, Transaction, TransactionKind, TransactionRequest, TransactionStatus,
};
pub use transaction_log::TransactionLog;
pub use transaction_queue::TransactionQueue;
pub use worker_pool::{PoolConfig, PoolSummary, WorkerPool};
