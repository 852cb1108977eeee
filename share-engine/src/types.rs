//! Core types for the share engine
//!
//! All types are designed for:
//! - Exact arithmetic (Decimal for money and percentages, never floats)
//! - Time-ordered identifiers (UUIDv7)
//! - Serde serialization for config, catalog and durable storage

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Account identifier, as supplied by the identity service
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AccountId(String);

impl AccountId {
    /// Create new account ID
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Inventory item identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ItemId(Uuid);

impl ItemId {
    /// Generate a fresh time-ordered item ID
    pub fn generate() -> Self {
        Self(Uuid::now_v7())
    }

    /// Wrap an existing UUID
    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    /// Underlying UUID
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Rarity classification, ordered from most to least common
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum Tier {
    /// Most common tier
    Common = 1,
    /// Uncommon
    Uncommon = 2,
    /// Rare
    Rare = 3,
    /// Epic
    Epic = 4,
    /// Rarest tier
    Legendary = 5,
}

impl Tier {
    /// All tiers in ascending rarity
    pub const ALL: [Tier; 5] = [
        Tier::Common,
        Tier::Uncommon,
        Tier::Rare,
        Tier::Epic,
        Tier::Legendary,
    ];

    /// Lowercase label
    pub fn label(&self) -> &'static str {
        match self {
            Tier::Common => "common",
            Tier::Uncommon => "uncommon",
            Tier::Rare => "rare",
            Tier::Epic => "epic",
            Tier::Legendary => "legendary",
        }
    }
}

impl FromStr for Tier {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "common" => Ok(Tier::Common),
            "uncommon" => Ok(Tier::Uncommon),
            "rare" => Ok(Tier::Rare),
            "epic" => Ok(Tier::Epic),
            "legendary" => Ok(Tier::Legendary),
            other => Err(crate::Error::Catalog(format!("Unknown tier: {}", other))),
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// One allocatable, scarce, fractional-ownership unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InventoryItem {
    /// Item ID
    pub item_id: ItemId,

    /// Display name (category label)
    pub name: String,

    /// Ownership percentage conveyed by holding this item
    pub share_percentage: Decimal,

    /// Fixed market value, paid on purchase and credited on sale
    pub market_value: Decimal,

    /// Rarity tier
    pub tier: Tier,
}

impl InventoryItem {
    /// Create a new item with a fresh ID
    pub fn new(
        name: impl Into<String>,
        share_percentage: Decimal,
        market_value: Decimal,
        tier: Tier,
    ) -> Self {
        Self {
            item_id: ItemId::generate(),
            name: name.into(),
            share_percentage,
            market_value,
            tier,
        }
    }

    /// Check catalog invariants
    pub fn validate(&self) -> crate::Result<()> {
        if self.market_value <= Decimal::ZERO {
            return Err(crate::Error::InvalidAmount(format!(
                "Market value of {} must be positive, got {}",
                self.name, self.market_value
            )));
        }
        if self.share_percentage <= Decimal::ZERO || self.share_percentage > Decimal::ONE_HUNDRED {
            return Err(crate::Error::InvalidAmount(format!(
                "Share percentage of {} must be in (0, 100], got {}",
                self.name, self.share_percentage
            )));
        }
        Ok(())
    }
}

/// Entry in the live availability snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Candidate {
    /// Item ID
    pub item_id: ItemId,
    /// Tier, used by weighted selection
    pub tier: Tier,
}

/// Account record held by the account store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    /// Account ID
    pub account_id: AccountId,

    /// Current wallet balance
    pub balance: Decimal,

    /// Balance at registration, the base of ledger replay
    pub opening_balance: Decimal,

    /// Owned items and the percentage held of each
    pub holdings: BTreeMap<ItemId, Decimal>,

    /// Registration timestamp
    pub created_at: DateTime<Utc>,
}

impl Account {
    /// New account with the given opening balance
    pub fn new(account_id: AccountId, opening_balance: Decimal) -> Self {
        Self {
            account_id,
            balance: opening_balance,
            opening_balance,
            holdings: BTreeMap::new(),
            created_at: Utc::now(),
        }
    }

    /// Check `balance >= amount` and subtract, returning the new balance
    pub fn debit(&mut self, amount: Decimal) -> crate::Result<Decimal> {
        ensure_positive(amount)?;
        if self.balance < amount {
            return Err(crate::Error::InsufficientFunds {
                account: self.account_id.clone(),
                balance: self.balance,
                required: amount,
            });
        }

        self.balance -= amount;
        Ok(self.balance)
    }

    /// Add to the balance, returning the new balance
    pub fn credit(&mut self, amount: Decimal) -> crate::Result<Decimal> {
        ensure_positive(amount)?;
        self.balance += amount;
        Ok(self.balance)
    }

    /// Record a holding; an item is held at most once
    pub fn add_ownership(&mut self, item_id: ItemId, percentage: Decimal) -> crate::Result<()> {
        if self.holdings.contains_key(&item_id) {
            return Err(crate::Error::DuplicateOwnership {
                account: self.account_id.clone(),
                item: item_id,
            });
        }

        self.holdings.insert(item_id, percentage);
        Ok(())
    }

    /// Drop a holding, returning the percentage that was held
    pub fn remove_ownership(&mut self, item_id: ItemId) -> crate::Result<Decimal> {
        self.holdings
            .remove(&item_id)
            .ok_or_else(|| crate::Error::NotOwned {
                account: self.account_id.clone(),
                item: item_id,
            })
    }

    /// Ownership records in item order
    pub fn ownerships(&self) -> Vec<Ownership> {
        self.holdings
            .iter()
            .map(|(item_id, percentage)| Ownership {
                account_id: self.account_id.clone(),
                item_id: *item_id,
                percentage: *percentage,
            })
            .collect()
    }

    /// Nothing owned and nothing left in the wallet
    pub fn is_closable(&self) -> bool {
        self.holdings.is_empty() && self.balance.is_zero()
    }
}

fn ensure_positive(amount: Decimal) -> crate::Result<()> {
    if amount <= Decimal::ZERO {
        return Err(crate::Error::InvalidAmount(format!(
            "Amount must be positive, got {}",
            amount
        )));
    }
    Ok(())
}

/// Ownership record: the percentage an account holds of an item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ownership {
    /// Owning account
    pub account_id: AccountId,
    /// Owned item
    pub item_id: ItemId,
    /// Percentage held
    pub percentage: Decimal,
}

/// Ledger transaction kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum TransactionKind {
    /// Wallet debited, item allocated
    Purchase = 1,
    /// Item released, wallet credited
    Sale = 2,
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionKind::Purchase => write!(f, "purchase"),
            TransactionKind::Sale => write!(f, "sale"),
        }
    }
}

/// Entry to be appended; the ledger assigns id, sequence, timestamp and hashes
#[derive(Debug, Clone, PartialEq)]
pub struct NewEntry {
    /// Account the entry belongs to
    pub account_id: AccountId,
    /// Item transacted
    pub item_id: ItemId,
    /// Kind
    pub kind: TransactionKind,
    /// Item market value at the time of the transaction
    pub amount: Decimal,
}

/// Immutable ledger entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Unique entry ID (UUIDv7 for time-ordering)
    pub entry_id: Uuid,

    /// Global append sequence, the replay order
    pub sequence: u64,

    /// Account reference
    pub account_id: AccountId,

    /// Item reference
    pub item_id: ItemId,

    /// Transaction kind
    pub kind: TransactionKind,

    /// Amount (item market value)
    pub amount: Decimal,

    /// Append timestamp
    pub timestamp: DateTime<Utc>,

    /// Hash of the previous entry in this account's chain
    pub prev_hash: [u8; 32],

    /// Hash of this entry
    pub hash: [u8; 32],
}

impl LedgerEntry {
    /// Compute the chained hash over this entry's contents
    pub fn compute_hash(&self) -> [u8; 32] {
        use sha2::{Digest, Sha256};

        let mut hasher = Sha256::new();
        hasher.update(self.sequence.to_be_bytes());
        hasher.update(self.entry_id.as_bytes());
        hasher.update(self.account_id.as_str().as_bytes());
        hasher.update(self.item_id.as_uuid().as_bytes());
        hasher.update([self.kind as u8]);
        hasher.update(self.amount.serialize());
        hasher.update(self.timestamp.timestamp_nanos_opt().unwrap_or(0).to_be_bytes());
        hasher.update(self.prev_hash);

        hasher.finalize().into()
    }

    /// Signed effect of this entry on the wallet balance
    pub fn balance_delta(&self) -> Decimal {
        match self.kind {
            TransactionKind::Purchase => -self.amount,
            TransactionKind::Sale => self.amount,
        }
    }
}

/// Public view of an allocated item, returned by a purchase
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocatedItem {
    /// Item ID
    pub item_id: ItemId,
    /// Name
    pub name: String,
    /// Ownership percentage
    pub percentage: Decimal,
    /// Tier
    pub tier: Tier,
    /// Market value debited
    pub market_value: Decimal,
}

impl From<&InventoryItem> for AllocatedItem {
    fn from(item: &InventoryItem) -> Self {
        Self {
            item_id: item.item_id,
            name: item.name.clone(),
            percentage: item.share_percentage,
            tier: item.tier,
            market_value: item.market_value,
        }
    }
}

/// Result of a successful sale
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaleReceipt {
    /// Item sold
    pub item_id: ItemId,
    /// Amount credited to the wallet
    pub credited_amount: Decimal,
    /// Balance after the credit
    pub new_balance: Decimal,
}

/// Holding as reported in an account state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OwnedItem {
    /// Item ID
    pub item_id: ItemId,
    /// Name
    pub name: String,
    /// Percentage held
    pub percentage: Decimal,
    /// Tier
    pub tier: Tier,
    /// Market value
    pub market_value: Decimal,
}

/// Consistent snapshot of an account
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountState {
    /// Account ID
    pub account_id: AccountId,
    /// Wallet balance
    pub balance: Decimal,
    /// Owned items
    pub owned_items: Vec<OwnedItem>,
}

/// Outcome of replaying an account's ledger against its stored balance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reconciliation {
    /// Account ID
    pub account_id: AccountId,
    /// Balance held by the account store
    pub stored: Decimal,
    /// Balance reconstructed from the ledger
    pub reconstructed: Decimal,
    /// Number of entries replayed
    pub entries: usize,
    /// Whether the hash chain verified
    pub chain_valid: bool,
}

impl Reconciliation {
    /// Stored and reconstructed balances agree and the chain verifies
    pub fn is_consistent(&self) -> bool {
        self.chain_valid && self.stored == self.reconstructed
    }
}
