//! Error types for the share engine

use crate::types::{AccountId, ItemId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, Error>;

/// Engine errors
#[derive(Error, Debug)]
pub enum Error {
    /// No available inventory, or the claim retry bound was exhausted
    #[error("Out of stock")]
    OutOfStock,

    /// Wallet balance below the item's market value
    #[error("Insufficient funds in {account}: balance {balance}, required {required}")]
    InsufficientFunds {
        /// Account debited
        account: AccountId,
        /// Balance at the time of the debit attempt
        balance: Decimal,
        /// Amount required
        required: Decimal,
    },

    /// Account not registered
    #[error("Account not found: {0}")]
    AccountNotFound(AccountId),

    /// Account holds no ownership record for the item
    #[error("Item {item} not owned by {account}")]
    NotOwned {
        /// Account
        account: AccountId,
        /// Item
        item: ItemId,
    },

    /// Partial failure inside a multi-step operation
    #[error("Integrity error: {0}")]
    Integrity(String),

    /// Item not in the catalog
    #[error("Item not found: {0}")]
    ItemNotFound(ItemId),

    /// Account registered twice
    #[error("Account already exists: {0}")]
    DuplicateAccount(AccountId),

    /// Item seeded twice
    #[error("Item already exists: {0}")]
    DuplicateItem(ItemId),

    /// Second ownership record for the same (account, item)
    #[error("Item {item} already owned by {account}")]
    DuplicateOwnership {
        /// Account
        account: AccountId,
        /// Item
        item: ItemId,
    },

    /// Account still owns items or holds a balance
    #[error("Account {0} cannot be closed while it holds items or balance")]
    AccountInUse(AccountId),

    /// Non-positive amount or out-of-range percentage
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    /// Catalog parse or content error
    #[error("Catalog error: {0}")]
    Catalog(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Storage error (RocksDB)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Error taxonomy used for propagation and user-visible mapping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Out of stock, insufficient funds: caller-correctable
    ResourceExhausted,
    /// Unknown account, item not owned: caller error
    NotFound,
    /// Partial multi-step failure requiring manual reconciliation
    Integrity,
    /// Malformed request or conflicting registration
    Invalid,
    /// Storage, IO and configuration failures
    Internal,
}

/// Caller-facing description of a failed operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Rejection {
    /// Error class
    pub kind: ErrorKind,
    /// Stable machine-readable code
    pub code: &'static str,
    /// Human-readable message, free of internal detail for server-side failures
    pub message: String,
}

impl Error {
    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::OutOfStock | Error::InsufficientFunds { .. } => ErrorKind::ResourceExhausted,
            Error::AccountNotFound(_) | Error::NotOwned { .. } | Error::ItemNotFound(_) => {
                ErrorKind::NotFound
            }
            Error::Integrity(_) => ErrorKind::Integrity,
            Error::DuplicateAccount(_)
            | Error::DuplicateItem(_)
            | Error::DuplicateOwnership { .. }
            | Error::AccountInUse(_)
            | Error::InvalidAmount(_) => ErrorKind::Invalid,
            Error::Catalog(_)
            | Error::Config(_)
            | Error::Storage(_)
            | Error::Serialization(_)
            | Error::Io(_) => ErrorKind::Internal,
        }
    }

    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            Error::OutOfStock => "out_of_stock",
            Error::InsufficientFunds { .. } => "insufficient_funds",
            Error::AccountNotFound(_) => "account_not_found",
            Error::NotOwned { .. } => "not_owned",
            Error::Integrity(_) => "integrity_error",
            Error::ItemNotFound(_) => "item_not_found",
            Error::DuplicateAccount(_) => "duplicate_account",
            Error::DuplicateItem(_) => "duplicate_item",
            Error::DuplicateOwnership { .. } => "duplicate_ownership",
            Error::AccountInUse(_) => "account_in_use",
            Error::InvalidAmount(_) => "invalid_amount",
            Error::Catalog(_)
            | Error::Config(_)
            | Error::Storage(_)
            | Error::Serialization(_)
            | Error::Io(_) => "internal_error",
        }
    }

    /// Caller-facing rejection; server-side failures expose no detail
    pub fn rejection(&self) -> Rejection {
        let message = match self.kind() {
            ErrorKind::Integrity | ErrorKind::Internal => {
                "internal error, operation not applied".to_string()
            }
            _ => self.to_string(),
        };

        Rejection {
            kind: self.kind(),
            code: self.code(),
            message,
        }
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::Config(err.to_string())
    }
}

#[cfg(feature = "rocksdb")]
impl From<rocksdb::Error> for Error {
    fn from(err: rocksdb::Error) -> Self {
        Error::Storage(err.to_string())
    }
}

#[cfg(feature = "rocksdb")]
impl From<bincode::Error> for Error {
    fn from(err: bincode::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}
