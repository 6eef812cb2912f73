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

//! Worker pool integration tests.

use ledger_engine::{
    AccountId, Engine, Journal, LedgerError, PoolConfig, PoolError, PoolSummary, Transaction,
    TransactionRequest, TransactionStatus,
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

fn config(workers: usize, queue_capacity: usize) -> PoolConfig {
    PoolConfig {
        workers,
        queue_capacity,
    }
}

/// Builds a transaction whose outcome follows its ID's parity: even IDs
/// credit an open account and succeed, odd IDs debit an empty account and
/// fail on the balance check.
fn parity_fixture(engine: &Engine) -> Transaction {
    let id = engine.log().next_id();
    let request = if id.0 % 2 == 0 {
        TransactionRequest::Credit {
            account_id: AccountId(1),
            amount: dec!(10),
        }
    } else {
        TransactionRequest::Debit {
            account_id: AccountId(2),
            amount: dec!(10),
        }
    };
    Transaction::pending(id, request)
}

#[test]
fn even_ids_succeed_and_odd_ids_fail() {
    let engine = Engine::new();
    engine.open_account(AccountId(1)).unwrap();
    engine.open_account(AccountId(2)).unwrap();

    let pool = engine.start_pool(config(5, 16)).unwrap();
    for _ in 0..10 {
        pool.submit(parity_fixture(&engine)).unwrap();
    }
    let summary = pool.shutdown();

    assert_eq!(
        summary,
        PoolSummary {
            succeeded: 5,
            failed: 5,
            abandoned: 0,
        }
    );
    assert_eq!(engine.balance(AccountId(1)), Ok(dec!(50)));
    assert_eq!(engine.balance(AccountId(2)), Ok(Decimal::ZERO));

    for tx in engine.log().entries() {
        let expected = if tx.id.0 % 2 == 0 {
            TransactionStatus::Completed
        } else {
            TransactionStatus::Failed
        };
        assert_eq!(tx.status, expected, "transaction {}", tx.id);
    }
}

#[test]
fn shutdown_drains_the_queue() {
    let engine = Engine::new();
    engine.open_account(AccountId(1)).unwrap();

    // Tiny queue so producers hit backpressure.
    let pool = engine.start_pool(config(2, 1)).unwrap();
    for _ in 0..200 {
        let tx = engine.new_transaction(TransactionRequest::Credit {
            account_id: AccountId(1),
            amount: dec!(0.5),
        });
        pool.submit(tx).unwrap();
    }
    let summary = pool.shutdown();

    assert_eq!(summary.succeeded, 200);
    assert_eq!(summary.failed, 0);
    assert_eq!(engine.balance(AccountId(1)), Ok(dec!(100)));
}

#[test]
fn concurrent_producers_and_transfers_conserve_funds() {
    const PRODUCERS: usize = 4;
    const PER_PRODUCER: usize = 250;
    const ACCOUNTS: u32 = 5;

    let engine = Arc::new(Engine::new());
    for id in 1..=ACCOUNTS {
        engine.open_account(AccountId(id)).unwrap();
        engine.credit(AccountId(id), dec!(100)).unwrap();
    }
    let initial_total = engine.ledger().total();

    let pool = Arc::new(engine.start_pool(config(8, 32)).unwrap());
    let producers: Vec<_> = (0..PRODUCERS)
        .map(|p| {
            let engine = Arc::clone(&engine);
            let pool = Arc::clone(&pool);
            thread::spawn(move || {
                for i in 0..PER_PRODUCER {
                    let from = ((p + i) as u32 % ACCOUNTS) + 1;
                    let to = ((p + i + 1) as u32 % ACCOUNTS) + 1;
                    let tx = engine.new_transaction(TransactionRequest::Transfer {
                        from: AccountId(from),
                        to: AccountId(to),
                        amount: Decimal::from((i % 7) as u32 + 1),
                    });
                    pool.submit(tx).unwrap();
                }
            })
        })
        .collect();

    for producer in producers {
        producer.join().expect("Thread panicked");
    }

    let pool = Arc::into_inner(pool).expect("producers still hold the pool");
    let summary = pool.shutdown();

    assert_eq!(
        summary.succeeded + summary.failed,
        (PRODUCERS * PER_PRODUCER) as u64
    );
    assert_eq!(engine.ledger().total(), initial_total);
    for (_, balance) in engine.balances() {
        assert!(balance >= Decimal::ZERO);
    }
}

#[test]
fn duplicate_submission_is_rejected() {
    let engine = Engine::new();
    engine.open_account(AccountId(1)).unwrap();

    let pool = engine.start_pool(config(1, 4)).unwrap();
    let tx = engine.new_transaction(TransactionRequest::Credit {
        account_id: AccountId(1),
        amount: dec!(1),
    });

    pool.submit(tx.clone()).unwrap();
    assert_eq!(pool.submit(tx.clone()), Err(PoolError::DuplicateTransaction(tx.id)));

    let summary = pool.shutdown();
    assert_eq!(summary.succeeded, 1);
    assert_eq!(engine.balance(AccountId(1)), Ok(dec!(1)));
}

#[test]
fn invalid_config_is_rejected() {
    let engine = Engine::new();
    assert!(matches!(
        engine.start_pool(config(0, 4)),
        Err(PoolError::InvalidConfig(_))
    ));
    assert!(matches!(
        engine.start_pool(config(4, 0)),
        Err(PoolError::InvalidConfig(_))
    ));
}

#[test]
fn cancelled_pool_stops_taking_work() {
    let engine = Engine::new();
    engine.open_account(AccountId(1)).unwrap();

    let pool = engine.start_pool(config(2, 64)).unwrap();
    pool.cancel();

    let tx = engine.new_transaction(TransactionRequest::Credit {
        account_id: AccountId(1),
        amount: dec!(1),
    });
    assert_eq!(pool.submit(tx), Err(PoolError::Closed));

    let summary = pool.shutdown();
    assert_eq!(summary.succeeded + summary.failed, 0);
    assert_eq!(engine.balance(AccountId(1)), Ok(Decimal::ZERO));
}

#[test]
fn cancellation_accounts_for_every_submitted_transaction() {
    const SUBMITTED: u64 = 500;

    let engine = Engine::new();
    engine.open_account(AccountId(1)).unwrap();

    let pool = engine.start_pool(config(1, SUBMITTED as usize)).unwrap();
    for _ in 0..SUBMITTED {
        let tx = engine.new_transaction(TransactionRequest::Credit {
            account_id: AccountId(1),
            amount: dec!(1),
        });
        pool.submit(tx).unwrap();
    }
    pool.cancel();
    let summary = pool.shutdown();

    assert_eq!(summary.succeeded + summary.failed + summary.abandoned, SUBMITTED);
    // Whatever ran finished completely.
    assert_eq!(
        engine.balance(AccountId(1)),
        Ok(Decimal::from(summary.succeeded))
    );
}

/// Journal taking a while per write, keeping a worker busy.
struct SlowJournal;

impl Journal for SlowJournal {
    fn record(&mut self, _: &Transaction) -> Result<(), LedgerError> {
        thread::sleep(Duration::from_millis(200));
        Ok(())
    }
}

#[test]
fn cancel_releases_producer_blocked_on_full_queue() {
    const ATTEMPTS: u64 = 20;

    let engine = Arc::new(Engine::with_journal(SlowJournal));
    engine.open_account(AccountId(1)).unwrap();

    // One busy worker and a single slot: the producer blocks on its third
    // submission while the first is still being written.
    let pool = Arc::new(engine.start_pool(config(1, 1)).unwrap());
    let (done_tx, done_rx) = crossbeam::channel::bounded(1);

    let producer = {
        let engine = Arc::clone(&engine);
        let pool = Arc::clone(&pool);
        thread::spawn(move || {
            let mut accepted = 0u64;
            let mut outcome = Ok(());
            for _ in 0..ATTEMPTS {
                let tx = engine.new_transaction(TransactionRequest::Credit {
                    account_id: AccountId(1),
                    amount: dec!(1),
                });
                if let Err(e) = pool.submit(tx) {
                    outcome = Err(e);
                    break;
                }
                accepted += 1;
            }
            done_tx.send((accepted, outcome)).unwrap();
        })
    };

    thread::sleep(Duration::from_millis(100));
    pool.cancel();

    let (accepted, outcome) = done_rx
        .recv_timeout(Duration::from_secs(5))
        .expect("producer still blocked after cancel");
    producer.join().expect("Thread panicked");

    assert_eq!(outcome, Err(PoolError::Closed));
    assert!(accepted < ATTEMPTS);

    let pool = Arc::into_inner(pool).expect("producer still holds the pool");
    let summary = pool.shutdown();

    // The credit in flight at cancellation still completes.
    assert!(summary.succeeded >= 1);
    assert_eq!(summary.succeeded + summary.failed + summary.abandoned, accepted);
    assert_eq!(
        engine.balance(AccountId(1)),
        Ok(Decimal::from(summary.succeeded))
    );
    assert_eq!(engine.log().len() as u64, summary.succeeded + summary.failed);
}

/// Journal failing every third write.
struct FlakyJournal {
    writes: Arc<AtomicUsize>,
}

impl Journal for FlakyJournal {
    fn record(&mut self, _: &Transaction) -> Result<(), LedgerError> {
        if self.writes.fetch_add(1, Ordering::SeqCst) % 3 == 2 {
            Err(LedgerError::StorageFailure("write timed out".into()))
        } else {
            Ok(())
        }
    }
}

#[test]
fn storage_failures_do_not_halt_the_pool() {
    let writes = Arc::new(AtomicUsize::new(0));
    let engine = Engine::with_journal(FlakyJournal {
        writes: Arc::clone(&writes),
    });
    engine.open_account(AccountId(1)).unwrap();

    let pool = engine.start_pool(config(3, 8)).unwrap();
    for _ in 0..30 {
        let tx = engine.new_transaction(TransactionRequest::Credit {
            account_id: AccountId(1),
            amount: dec!(1),
        });
        pool.submit(tx).unwrap();
    }
    let summary = pool.shutdown();

    assert_eq!(summary.succeeded, 20);
    assert_eq!(summary.failed, 10);
    assert_eq!(engine.balance(AccountId(1)), Ok(dec!(20)));
    assert_eq!(engine.log().len(), 20);
}
