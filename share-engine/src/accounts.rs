//! Account store
//!
//! Each account's balance and holdings live in one DashMap entry; every
//! operation runs under that entry's shard guard, so the balance check and
//! the subtraction in [`AccountStore::debit`] are one indivisible step and a
//! negative balance is never observable.

use crate::{
    types::{Account, AccountId, ItemId, Ownership},
    Error, Result,
};
use dashmap::DashMap;
use rust_decimal::Decimal;

/// Wallet balances and ownership sets
pub trait AccountStore: Send + Sync {
    /// Register a new account with its opening balance
    fn register(&self, account_id: AccountId, opening_balance: Decimal) -> Result<()>;

    /// Remove an account that owns nothing and holds no balance
    fn close(&self, account_id: &AccountId) -> Result<()>;

    /// Snapshot of an account
    fn get(&self, account_id: &AccountId) -> Result<Account>;

    /// Whether the account exists
    fn exists(&self, account_id: &AccountId) -> bool;

    /// Check `balance >= amount` and subtract in one step, returning the new balance
    fn debit(&self, account_id: &AccountId, amount: Decimal) -> Result<Decimal>;

    /// Add to the balance, returning the new balance
    fn credit(&self, account_id: &AccountId, amount: Decimal) -> Result<Decimal>;

    /// Record that the account holds `percentage` of the item
    fn add_ownership(&self, account_id: &AccountId, item_id: ItemId, percentage: Decimal)
        -> Result<()>;

    /// Drop the ownership record, returning the percentage that was held
    fn remove_ownership(&self, account_id: &AccountId, item_id: ItemId) -> Result<Decimal>;

    /// Ownership records of an account
    fn holdings(&self, account_id: &AccountId) -> Result<Vec<Ownership>>;

    /// All registered account IDs
    fn account_ids(&self) -> Vec<AccountId>;
}

/// Reject a negative opening balance
pub(crate) fn check_opening_balance(opening_balance: Decimal) -> Result<()> {
    if opening_balance < Decimal::ZERO {
        return Err(Error::InvalidAmount(format!(
            "Opening balance must not be negative, got {}",
            opening_balance
        )));
    }
    Ok(())
}

/// In-memory account store
#[derive(Debug, Default)]
pub struct MemoryAccounts {
    accounts: DashMap<AccountId, Account>,
}

impl MemoryAccounts {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    fn update<T>(
        &self,
        account_id: &AccountId,
        f: impl FnOnce(&mut Account) -> Result<T>,
    ) -> Result<T> {
        let mut account = self
            .accounts
            .get_mut(account_id)
            .ok_or_else(|| Error::AccountNotFound(account_id.clone()))?;
        f(account.value_mut())
    }
}

impl AccountStore for MemoryAccounts {
    fn register(&self, account_id: AccountId, opening_balance: Decimal) -> Result<()> {
        check_opening_balance(opening_balance)?;

        match self.accounts.entry(account_id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(Error::DuplicateAccount(account_id)),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(Account::new(account_id, opening_balance));
                Ok(())
            }
        }
    }

    fn close(&self, account_id: &AccountId) -> Result<()> {
        let removed = self
            .accounts
            .remove_if(account_id, |_, account| account.is_closable());

        match removed {
            Some(_) => Ok(()),
            None if self.accounts.contains_key(account_id) => {
                Err(Error::AccountInUse(account_id.clone()))
            }
            None => Err(Error::AccountNotFound(account_id.clone())),
        }
    }

    fn get(&self, account_id: &AccountId) -> Result<Account> {
        self.accounts
            .get(account_id)
            .map(|account| account.clone())
            .ok_or_else(|| Error::AccountNotFound(account_id.clone()))
    }

    fn exists(&self, account_id: &AccountId) -> bool {
        self.accounts.contains_key(account_id)
    }

    fn debit(&self, account_id: &AccountId, amount: Decimal) -> Result<Decimal> {
        self.update(account_id, |account| account.debit(amount))
    }

    fn credit(&self, account_id: &AccountId, amount: Decimal) -> Result<Decimal> {
        self.update(account_id, |account| account.credit(amount))
    }

    fn add_ownership(
        &self,
        account_id: &AccountId,
        item_id: ItemId,
        percentage: Decimal,
    ) -> Result<()> {
        self.update(account_id, |account| account.add_ownership(item_id, percentage))
    }

    fn remove_ownership(&self, account_id: &AccountId, item_id: ItemId) -> Result<Decimal> {
        self.update(account_id, |account| account.remove_ownership(item_id))
    }

    fn holdings(&self, account_id: &AccountId) -> Result<Vec<Ownership>> {
        self.accounts
            .get(account_id)
            .map(|account| account.ownerships())
            .ok_or_else(|| Error::AccountNotFound(account_id.clone()))
    }

    fn account_ids(&self) -> Vec<AccountId> {
        let mut ids: Vec<AccountId> = self.accounts.iter().map(|a| a.key().clone()).collect();
        ids.sort();
        ids
    }
}
