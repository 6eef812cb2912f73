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

use clap::Parser;
use csv::{ReaderBuilder, Trim};
use ledger_engine::{
    AccountId, CsvJournal, Engine, Journal, LedgerError, PoolConfig, PoolSummary,
    TransactionRequest, read_journal, write_balances,
};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::fs::{File, OpenOptions};
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use std::process;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Ledger Engine - Process credit, debit and transfer CSV files
///
/// Reads requests from a CSV file, runs them on a worker pool and writes the
/// resulting balances to stdout.
#[derive(Parser, Debug)]
#[command(name = "ledger-engine")]
#[command(about = "Runs ledger requests from a CSV through a worker pool", long_about = None)]
struct Args {
    /// Path to CSV file with requests
    ///
    /// Expected format: type,account,counterparty,amount
    /// Example: cargo run -- requests.csv > balances.csv
    #[arg(value_name = "FILE")]
    input: PathBuf,

    /// Number of worker threads
    #[arg(long, env = "LEDGER_WORKERS", default_value_t = PoolConfig::DEFAULT_WORKERS)]
    workers: usize,

    /// Maximum number of queued requests before producers block
    #[arg(long, env = "LEDGER_QUEUE_CAPACITY", default_value_t = PoolConfig::DEFAULT_QUEUE_CAPACITY)]
    queue_capacity: usize,

    /// Append every processed transaction to this CSV journal
    #[arg(long, env = "LEDGER_JOURNAL", value_name = "PATH")]
    journal: Option<PathBuf>,

    /// Rebuild balances from this CSV journal before processing
    #[arg(long, env = "LEDGER_RESTORE", value_name = "PATH")]
    restore: Option<PathBuf>,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let engine = match build_engine(args.restore.as_deref(), args.journal.as_deref()) {
        Ok(engine) => engine,
        Err(e) => {
            error!(error = %e, "could not initialize ledger");
            process::exit(1);
        }
    };

    let file = match File::open(&args.input) {
        Ok(f) => f,
        Err(e) => {
            error!(path = %args.input.display(), error = %e, "could not open input");
            process::exit(1);
        }
    };

    let config = PoolConfig {
        workers: args.workers,
        queue_capacity: args.queue_capacity,
    };

    let summary = match process_requests(&engine, config, BufReader::new(file)) {
        Ok(summary) => summary,
        Err(e) => {
            error!(error = %e, "processing failed");
            process::exit(1);
        }
    };
    info!(
        succeeded = summary.succeeded,
        failed = summary.failed,
        "processing finished"
    );

    if let Err(e) = write_balances(&engine.balances(), std::io::stdout()) {
        error!(error = %e, "could not write balances");
        process::exit(1);
    }
}

/// Creates the engine, optionally replaying an existing journal and
/// attaching one for new transactions.
///
/// Restoring and journaling to the same path continues that file.
fn build_engine(restore: Option<&Path>, journal: Option<&Path>) -> Result<Engine, LedgerError> {
    let io_failure = |e: std::io::Error| LedgerError::StorageFailure(e.to_string());

    let Some(restore) = restore else {
        return match journal {
            Some(path) => Ok(Engine::with_journal(CsvJournal::new(
                File::create(path).map_err(io_failure)?,
            ))),
            None => Ok(Engine::new()),
        };
    };

    let transactions = read_journal(File::open(restore).map_err(io_failure)?)?;
    let sink: Option<Box<dyn Journal>> = match journal {
        Some(path) if path == restore => {
            let file = OpenOptions::new().append(true).open(path).map_err(io_failure)?;
            // An empty file still needs its header row.
            let journal = if file.metadata().map_err(io_failure)?.len() == 0 {
                CsvJournal::new(file)
            } else {
                CsvJournal::appending(file)
            };
            Some(Box::new(journal))
        }
        Some(path) => Some(Box::new(CsvJournal::new(
            File::create(path).map_err(io_failure)?,
        ))),
        None => None,
    };

    Engine::restore(transactions, sink)
}

/// Raw CSV record matching the input format.
///
/// Fields: `type, account, counterparty, amount`
#[derive(Debug, Deserialize)]
struct CsvRecord {
    #[serde(rename = "type")]
    tx_type: String,
    account: u32,
    #[serde(deserialize_with = "csv::invalid_option")]
    counterparty: Option<u32>,
    amount: Decimal,
}

impl CsvRecord {
    /// Converts CSV record to a request.
    ///
    /// Returns `None` for unknown types or a transfer without counterparty.
    fn into_request(self) -> Option<TransactionRequest> {
        let account_id = AccountId(self.account);
        let amount = self.amount;

        match self.tx_type.to_lowercase().as_str() {
            "credit" => Some(TransactionRequest::Credit { account_id, amount }),
            "debit" => Some(TransactionRequest::Debit { account_id, amount }),
            "transfer" => Some(TransactionRequest::Transfer {
                from: account_id,
                to: AccountId(self.counterparty?),
                amount,
            }),
            _ => None,
        }
    }
}

/// Opens every account a request references, standing in for the user
/// management layer that owns account creation.
fn open_accounts(engine: &Engine, request: &TransactionRequest) -> Result<(), LedgerError> {
    let ids = match *request {
        TransactionRequest::Credit { account_id, .. } | TransactionRequest::Debit { account_id, .. } => {
            vec![account_id]
        }
        TransactionRequest::Transfer { from, to, .. } => vec![from, to],
    };

    for id in ids {
        if !engine.has_account(id) {
            engine.open_account(id)?;
        }
    }
    Ok(())
}

/// Streams requests from a CSV reader into a worker pool and waits for it
/// to drain.
///
/// Malformed rows are skipped with a warning. Result order for a single
/// account depends on worker scheduling and can differ between runs.
///
/// # CSV Format
///
/// ```csv
/// type,account,counterparty,amount
/// credit,1,,100.0
/// transfer,1,2,30.0
/// debit,2,,5.0
/// ```
///
/// # Errors
///
/// Returns an error if the pool cannot be started or refuses a request.
fn process_requests<R: Read>(
    engine: &Engine,
    config: PoolConfig,
    reader: R,
) -> Result<PoolSummary, Box<dyn std::error::Error>> {
    let mut rdr = ReaderBuilder::new()
        .trim(Trim::All) // Handle whitespace in fields like " credit "
        .flexible(true)
        .has_headers(true)
        .from_reader(reader);

    let pool = engine.start_pool(config)?;

    for (row, result) in rdr.deserialize::<CsvRecord>().enumerate() {
        let record = match result {
            Ok(record) => record,
            Err(e) => {
                warn!(row, error = %e, "skipping malformed row");
                continue;
            }
        };

        let Some(request) = record.into_request() else {
            warn!(row, "skipping invalid request record");
            continue;
        };

        open_accounts(engine, &request)?;
        pool.submit(engine.new_transaction(request))?;
    }

    Ok(pool.shutdown())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::io::Cursor;

    fn run(csv: &str) -> (Engine, PoolSummary) {
        let engine = Engine::new();
        let summary =
            process_requests(&engine, PoolConfig::default(), Cursor::new(csv.to_owned())).unwrap();
        (engine, summary)
    }

    #[test]
    fn parse_simple_credit() {
        let (engine, summary) = run("type,account,counterparty,amount\ncredit,1,,100.0\n");

        assert_eq!(summary.succeeded, 1);
        assert_eq!(engine.balance(AccountId(1)), Ok(dec!(100.0)));
    }

    #[test]
    fn parse_transfer_opens_both_accounts() {
        let (engine, summary) = run("type,account,counterparty,amount\n\
                                     transfer,1,2,30.0\n");

        // Account 1 is empty, so the transfer fails, but both accounts exist.
        assert_eq!(summary.failed, 1);
        assert_eq!(engine.balances().len(), 2);
    }

    #[test]
    fn parse_with_whitespace() {
        let (engine, _) = run("type,account,counterparty,amount\n credit , 1 , , 100.0 \n");
        assert_eq!(engine.balance(AccountId(1)), Ok(dec!(100.0)));
    }

    #[test]
    fn skip_malformed_rows() {
        let (engine, summary) = run("type,account,counterparty,amount\n\
                                     credit,1,,100.0\n\
                                     invalid,row,data,here\n\
                                     refund,1,,5.0\n\
                                     transfer,1,,5.0\n\
                                     credit,2,,50.0\n");

        assert_eq!(summary.succeeded, 2);
        assert_eq!(engine.balances().len(), 2);
    }

    #[test]
    fn rejected_debit_counts_as_failure() {
        let (engine, summary) = run("type,account,counterparty,amount\n\
                                     credit,1,,10.0\n\
                                     debit,2,,5.0\n");

        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(engine.balance(AccountId(2)), Ok(Decimal::ZERO));
    }

    #[test]
    fn restore_and_continue_same_journal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("journal.csv");

        let first = build_engine(None, Some(&path)).unwrap();
        first.open_account(AccountId(1)).unwrap();
        first.credit(AccountId(1), dec!(25)).unwrap();
        drop(first);

        let second = build_engine(Some(&path), Some(&path)).unwrap();
        second.credit(AccountId(1), dec!(5)).unwrap();
        assert_eq!(second.balance(AccountId(1)), Ok(dec!(30)));
        drop(second);

        let third = build_engine(Some(&path), None).unwrap();
        assert_eq!(third.balance(AccountId(1)), Ok(dec!(30)));
        assert_eq!(third.log().len(), 2);
    }

    #[test]
    fn continue_journal_with_header_only() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("journal.csv");
        std::fs::write(
            &path,
            "id,account_id,counterparty_id,amount,type,status,created_at,reverses\n",
        )
        .unwrap();

        let engine = build_engine(Some(&path), Some(&path)).unwrap();
        engine.open_account(AccountId(1)).unwrap();
        engine.credit(AccountId(1), dec!(5)).unwrap();
        drop(engine);

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 2);
        let restored = build_engine(Some(&path), None).unwrap();
        assert_eq!(restored.balance(AccountId(1)), Ok(dec!(5)));
    }

    #[test]
    fn continue_empty_journal_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("journal.csv");
        File::create(&path).unwrap();

        let engine = build_engine(Some(&path), Some(&path)).unwrap();
        engine.open_account(AccountId(1)).unwrap();
        engine.credit(AccountId(1), dec!(5)).unwrap();
        drop(engine);

        let restored = build_engine(Some(&path), None).unwrap();
        assert_eq!(restored.balance(AccountId(1)), Ok(dec!(5)));
    }
}
