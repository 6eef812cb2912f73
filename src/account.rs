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

//! Account balances.
//!
//! Each [`Account`] guards its balance with its own mutex. Mutations are
//! staged first (checked against the current balance) and only written once
//! every check of the surrounding operation has passed, so a rejected
//! operation never leaves a partial change behind.
//!
//! # Example
//!
//! ```
//! use rust_decimal_macros::dec;
//! use ledger_engine::{Account, AccountId};
//!
//! let account = Account::new(AccountId(1));
//! assert_eq!(account.balance(), dec!(0.00));
//! ```

use crate::LedgerError;
use crate::base::AccountId;
use parking_lot::{Mutex, MutexGuard};
use rust_decimal::Decimal;
use serde::ser::{Serialize, SerializeStruct, Serializer};

#[derive(Debug)]
pub(crate) struct AccountData {
    pub(crate) account_id: AccountId,
    pub(crate) balance: Decimal,
}

impl AccountData {
    fn new(account_id: AccountId) -> Self {
        Self {
            account_id,
            balance: Decimal::ZERO,
        }
    }

    fn assert_invariants(&self) {
        debug_assert!(
            self.balance >= Decimal::ZERO,
            "Invariant violated: balance of account {} went negative: {}",
            self.account_id,
            self.balance
        );
    }

    /// Balance after crediting `amount`, without applying it.
    pub(crate) fn staged_credit(&self, amount: Decimal) -> Result<Decimal, LedgerError> {
        if amount <= Decimal::ZERO {
            return Err(LedgerError::InvalidAmount);
        }
        self.balance
            .checked_add(amount)
            .ok_or(LedgerError::InvalidAmount)
    }

    /// Balance after debiting `amount`, without applying it.
    pub(crate) fn staged_debit(&self, amount: Decimal) -> Result<Decimal, LedgerError> {
        if amount <= Decimal::ZERO {
            return Err(LedgerError::InvalidAmount);
        }
        if self.balance < amount {
            return Err(LedgerError::InsufficientBalance);
        }
        Ok(self.balance - amount)
    }

    pub(crate) fn commit(&mut self, balance: Decimal) {
        self.balance = balance;
        self.assert_invariants();
    }
}

/// Ledger account.
#[derive(Debug)]
pub struct Account {
    inner: Mutex<AccountData>,
}

impl Account {
    const DECIMAL_PRECISION: u32 = 4;

    pub fn new(account_id: AccountId) -> Self {
        Self {
            inner: Mutex::new(AccountData::new(account_id)),
        }
    }

    pub fn id(&self) -> AccountId {
        self.inner.lock().account_id
    }

    pub fn balance(&self) -> Decimal {
        self.inner.lock().balance
    }

    /// Locks the account for a read-modify-write.
    ///
    /// Callers holding more than one account guard must have acquired them
    /// in ascending [`AccountId`] order.
    pub(crate) fn lock(&self) -> MutexGuard<'_, AccountData> {
        self.inner.lock()
    }
}

impl Serialize for Account {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let data = self.inner.lock();
        let mut state = serializer.serialize_struct("Account", 2)?;
        state.serialize_field("account_id", &data.account_id)?;
        state.serialize_field("amount", &data.balance.round_dp(Account::DECIMAL_PRECISION))?;
        state.end()
    }
}
