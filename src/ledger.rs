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

//! Account ledger.
//!
//! The [`Ledger`] owns every account balance and the rules for mutating
//! them. Accounts live in a [`DashMap`] as `Arc<Account>`; an operation
//! clones the handles it needs out of the map before locking any account,
//! so no map shard is held while waiting on an account mutex.
//!
//! # Lock Ordering
//!
//! Any operation that locks more than one account locks them in ascending
//! [`AccountId`] order. Two transfers moving funds in opposite directions
//! between the same pair of accounts therefore contend on the same first
//! lock instead of deadlocking.
//!
//! # Commit Hooks
//!
//! The `*_with` variants run a hook after every check has passed but before
//! the new balances are written, while all involved locks are still held.
//! If the hook fails, nothing is written. The transaction processor uses
//! this to append to the transaction log inside the critical section.

use crate::account::Account;
use crate::base::AccountId;
use crate::LedgerError;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use rust_decimal::Decimal;
use std::sync::Arc;

/// Authoritative store of account balances.
///
/// # Invariants
///
/// - A balance is never negative.
/// - A transfer never changes the sum of all balances.
/// - No observer holding an account lock sees a half-applied transfer.
#[derive(Debug, Default)]
pub struct Ledger {
    accounts: DashMap<AccountId, Arc<Account>>,
}

impl Ledger {
    pub fn new() -> Self {
        Self {
            accounts: DashMap::new(),
        }
    }

    /// Opens a zero-balance account.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::AccountExists`] if the account is already open.
    pub fn open_account(&self, account_id: AccountId) -> Result<(), LedgerError> {
        match self.accounts.entry(account_id) {
            Entry::Occupied(_) => Err(LedgerError::AccountExists(account_id)),
            Entry::Vacant(entry) => {
                entry.insert(Arc::new(Account::new(account_id)));
                Ok(())
            }
        }
    }

    pub fn contains(&self, account_id: AccountId) -> bool {
        self.accounts.contains_key(&account_id)
    }

    /// Returns all open account IDs in ascending order.
    pub fn account_ids(&self) -> Vec<AccountId> {
        let mut ids: Vec<AccountId> = self.accounts.iter().map(|entry| *entry.key()).collect();
        ids.sort_unstable();
        ids
    }

    /// Returns a shared handle to an account.
    pub fn account(&self, account_id: AccountId) -> Result<Arc<Account>, LedgerError> {
        self.accounts
            .get(&account_id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(LedgerError::UnknownAccount(account_id))
    }

    pub fn balance(&self, account_id: AccountId) -> Result<Decimal, LedgerError> {
        Ok(self.account(account_id)?.balance())
    }

    /// Credits `amount`, returning the new balance.
    pub fn credit(&self, account_id: AccountId, amount: Decimal) -> Result<Decimal, LedgerError> {
        self.credit_with(account_id, amount, || Ok(()))
    }

    /// Debits `amount`, returning the new balance.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::InvalidAmount`] - `amount` is not positive.
    /// - [`LedgerError::InsufficientBalance`] - balance is below `amount`.
    /// - [`LedgerError::UnknownAccount`] - account is not open.
    pub fn debit(&self, account_id: AccountId, amount: Decimal) -> Result<Decimal, LedgerError> {
        self.debit_with(account_id, amount, || Ok(()))
    }

    /// Moves `amount` from `from` to `to` as one atomic step, returning the
    /// new `(from, to)` balances.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::InvalidAmount`] - `amount` is not positive.
    /// - [`LedgerError::SameAccount`] - `from` and `to` are the same account.
    /// - [`LedgerError::InsufficientBalance`] - `from` cannot cover `amount`.
    /// - [`LedgerError::UnknownAccount`] - either account is not open.
    pub fn transfer(
        &self,
        from: AccountId,
        to: AccountId,
        amount: Decimal,
    ) -> Result<(Decimal, Decimal), LedgerError> {
        self.transfer_with(from, to, amount, || Ok(()))
    }

    pub(crate) fn credit_with<F>(
        &self,
        account_id: AccountId,
        amount: Decimal,
        on_commit: F,
    ) -> Result<Decimal, LedgerError>
    where
        F: FnOnce() -> Result<(), LedgerError>,
    {
        let account = self.account(account_id)?;
        let mut data = account.lock();
        let balance = data.staged_credit(amount)?;
        on_commit()?;
        data.commit(balance);
        Ok(balance)
    }

    pub(crate) fn debit_with<F>(
        &self,
        account_id: AccountId,
        amount: Decimal,
        on_commit: F,
    ) -> Result<Decimal, LedgerError>
    where
        F: FnOnce() -> Result<(), LedgerError>,
    {
        let account = self.account(account_id)?;
        let mut data = account.lock();
        let balance = data.staged_debit(amount)?;
        on_commit()?;
        data.commit(balance);
        Ok(balance)
    }

    pub(crate) fn transfer_with<F>(
        &self,
        from: AccountId,
        to: AccountId,
        amount: Decimal,
        on_commit: F,
    ) -> Result<(Decimal, Decimal), LedgerError>
    where
        F: FnOnce() -> Result<(), LedgerError>,
    {
        if amount <= Decimal::ZERO {
            return Err(LedgerError::InvalidAmount);
        }
        if from == to {
            return Err(LedgerError::SameAccount);
        }

        let source = self.account(from)?;
        let destination = self.account(to)?;

        // Ascending account order, whichever side that is.
        let (mut source_data, mut destination_data) = if from < to {
            let source_data = source.lock();
            let destination_data = destination.lock();
            (source_data, destination_data)
        } else {
            let destination_data = destination.lock();
            let source_data = source.lock();
            (source_data, destination_data)
        };

        let source_balance = source_data.staged_debit(amount)?;
        let destination_balance = destination_data.staged_credit(amount)?;
        on_commit()?;
        source_data.commit(source_balance);
        destination_data.commit(destination_balance);

        Ok((source_balance, destination_balance))
    }

    /// Reads several balances as one consistent snapshot.
    ///
    /// Duplicate IDs are collapsed; the result is in ascending ID order.
    pub fn snapshot(&self, account_ids: &[AccountId]) -> Result<Vec<(AccountId, Decimal)>, LedgerError> {
        let mut ids = account_ids.to_vec();
        ids.sort_unstable();
        ids.dedup();

        let accounts = ids
            .iter()
            .map(|id| self.account(*id))
            .collect::<Result<Vec<_>, _>>()?;
        let guards: Vec<_> = accounts.iter().map(|account| account.lock()).collect();

        Ok(guards
            .iter()
            .map(|data| (data.account_id, data.balance))
            .collect())
    }

    /// Consistent snapshot of every open account.
    pub fn snapshot_all(&self) -> Vec<(AccountId, Decimal)> {
        let ids = self.account_ids();
        // Accounts are never removed, so every listed ID resolves.
        self.snapshot(&ids).unwrap_or_default()
    }

    /// Sum of all balances, read under every account lock.
    pub fn total(&self) -> Decimal {
        self.snapshot_all().iter().map(|(_, balance)| *balance).sum()
    }

    /// Applies a signed delta without a balance check, opening the account
    /// if needed. Used when replaying a journal, where intermediate
    /// balances are already known to have been valid.
    pub(crate) fn replay_delta(&self, account_id: AccountId, delta: Decimal) {
        let account = Arc::clone(
            self.accounts
                .entry(account_id)
                .or_insert_with(|| Arc::new(Account::new(account_id)))
                .value(),
        );
        let mut data = account.lock();
        let balance = data.balance + delta;
        data.commit(balance);
    }
}
