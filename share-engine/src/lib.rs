//! Share Engine
//!
//! Share purchase and inventory allocation engine: users spend wallet
//! balance on a randomly-assigned fractional share drawn from a finite,
//! shared inventory, and later sell it back for credit.
//!
//! # Architecture
//!
//! - **Inventory store**: catalog with an atomic compare-and-set availability flag
//! - **Account store**: wallet balances and ownership sets, atomic per account
//! - **Ledger store**: append-only purchase/sale record, hash-chained per account
//! - **Storage** (feature `rocksdb`): the three stores persisted in one RocksDB
//! - **Selection policy**: pure, seedable choice of the next candidate
//! - **Allocation engine**: composes the stores into atomic purchases and sales

#![forbid(unsafe_code)]
//!
//! # Invariants
//!
//! - No double allocation: an item is owned by at most one account
//! - Non-negative balance: never observable below zero, even transiently
//! - Replay: `opening_balance - Σ purchases + Σ sales == balance` per account
//! - Append-only: ledger entries are never modified or deleted
//!
//! # Example
//!
//! ```
//! use rust_decimal::Decimal;
//! use share_engine::{AccountId, AllocationEngine, Config, InventoryItem, Tier};
//!
//! let engine = AllocationEngine::new(&Config::default())?;
//! engine.seed_item(InventoryItem::new("Charizard", Decimal::new(25, 1), Decimal::from(10), Tier::Rare))?;
//!
//! let alice = AccountId::new("alice");
//! engine.register_account(alice.clone(), Decimal::from(15))?;
//!
//! let item = engine.purchase(&alice)?;
//! assert_eq!(engine.account_state(&alice)?.balance, Decimal::from(5));
//!
//! engine.sell(&alice, item.item_id)?;
//! assert!(engine.reconcile(&alice)?.is_consistent());
//! # Ok::<(), share_engine::Error>(())
//! ```

#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod accounts;
pub mod catalog;
pub mod config;
pub mod engine;
pub mod error;
pub mod inventory;
pub mod ledger;
pub mod locks;
pub mod metrics;
pub mod selection;
pub mod service;
#[cfg(feature = "rocksdb")]
pub mod storage;
pub mod types;

// Re-exports
pub use config::Config;
pub use engine::AllocationEngine;
pub use error::{Error, ErrorKind, Rejection, Result};
pub use service::ShareService;
pub use types::{
    AccountId, AccountState, AllocatedItem, InventoryItem, ItemId, LedgerEntry, Reconciliation,
    SaleReceipt, Tier, TransactionKind,
};
