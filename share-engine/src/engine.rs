//! Allocation engine
//!
//! Orchestrates purchases and sales as single atomic units spanning the
//! inventory, account and ledger stores.
//!
//! # Purchase
//!
//! ```text
//! account exists? ──no──► AccountNotFound
//!      │
//!      ▼
//! ┌─► snapshot = list_available(tier) ──empty──► OutOfStock
//! │        │
//! │        ▼
//! │   candidate = policy.select(snapshot)
//! │        │
//! │   [item lock] try_claim(candidate)
//! │        │
//! └─ AlreadyClaimed (≤ max_claim_attempts, then OutOfStock)
//!          │ Claimed
//!          ▼
//!     [account lock] debit ──InsufficientFunds──► release, InsufficientFunds
//!          │
//!          ▼
//!     add_ownership ─► ledger append ─► AllocatedItem
//! ```
//!
//! Locks are taken item first, then account. Failures after the debit roll
//! back every applied sub-step and surface as [`Error::Integrity`].

use crate::{
    accounts::{AccountStore, MemoryAccounts},
    config::{Config, StorageBackend},
    inventory::{ClaimOutcome, InventoryStore, MemoryInventory, ReleaseOutcome},
    ledger::{self, LedgerStore, MemoryLedger},
    locks::LockTable,
    metrics::Metrics,
    selection::{RngSource, Selection, SelectionPolicy},
    types::{
        AccountId, AccountState, AllocatedItem, InventoryItem, ItemId, LedgerEntry, NewEntry,
        OwnedItem, Reconciliation, SaleReceipt, Tier, TransactionKind,
    },
    Error, Result,
};
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Instant;

/// Share purchase and inventory allocation engine
pub struct AllocationEngine {
    inventory: Arc<dyn InventoryStore>,
    accounts: Arc<dyn AccountStore>,
    ledger: Arc<dyn LedgerStore>,
    policy: SelectionPolicy,
    rng: RngSource,
    locks: LockTable,
    max_claim_attempts: u32,
    metrics: Option<Metrics>,
}

impl std::fmt::Debug for AllocationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AllocationEngine")
            .field("policy", &self.policy)
            .field("seed", &self.rng.seed())
            .field("max_claim_attempts", &self.max_claim_attempts)
            .field("items", &self.inventory.len())
            .field("ledger_entries", &self.ledger.len())
            .finish()
    }
}

impl AllocationEngine {
    /// Engine over the stores of the configured backend
    pub fn new(config: &Config) -> Result<Self> {
        match config.storage.backend {
            StorageBackend::Memory => Self::with_stores(
                config,
                Arc::new(MemoryInventory::new()),
                Arc::new(MemoryAccounts::new()),
                Arc::new(MemoryLedger::new()),
            ),
            #[cfg(feature = "rocksdb")]
            StorageBackend::Rocksdb => {
                let stores = crate::storage::RocksStores::open(&config.storage.data_dir)?;
                Self::with_stores(config, stores.inventory, stores.accounts, stores.ledger)
            }
            #[cfg(not(feature = "rocksdb"))]
            StorageBackend::Rocksdb => Err(Error::Config(
                "rocksdb storage backend requires the `rocksdb` feature".to_string(),
            )),
        }
    }

    /// Engine over caller-supplied stores
    pub fn with_stores(
        config: &Config,
        inventory: Arc<dyn InventoryStore>,
        accounts: Arc<dyn AccountStore>,
        ledger: Arc<dyn LedgerStore>,
    ) -> Result<Self> {
        config.validate()?;

        let rng = RngSource::new(config.selection.seed);
        tracing::info!(
            policy = ?config.selection.policy,
            seed = rng.seed(),
            max_claim_attempts = config.allocation.max_claim_attempts,
            "Allocation engine ready"
        );

        Ok(Self {
            inventory,
            accounts,
            ledger,
            policy: SelectionPolicy::from_config(&config.selection),
            rng,
            locks: LockTable::new(),
            max_claim_attempts: config.allocation.max_claim_attempts,
            metrics: None,
        })
    }

    /// Attach a metrics collector
    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Attached metrics, if any
    pub fn metrics(&self) -> Option<&Metrics> {
        self.metrics.as_ref()
    }

    /// Register an account with its opening balance
    pub fn register_account(&self, account_id: AccountId, opening_balance: Decimal) -> Result<()> {
        self.accounts.register(account_id.clone(), opening_balance)?;
        tracing::info!(account = %account_id, %opening_balance, "Account registered");
        Ok(())
    }

    /// Close an account that owns nothing and holds no balance
    pub fn close_account(&self, account_id: &AccountId) -> Result<()> {
        self.ensure_account(account_id)?;

        self.locks.with_account(account_id, || {
            self.accounts.close(account_id)?;
            self.locks.forget_account(account_id);
            tracing::info!(account = %account_id, "Account closed");
            Ok(())
        })
    }

    fn ensure_account(&self, account_id: &AccountId) -> Result<()> {
        if !self.accounts.exists(account_id) {
            return Err(Error::AccountNotFound(account_id.clone()));
        }
        Ok(())
    }

    /// Add one item to the catalog
    pub fn seed_item(&self, item: InventoryItem) -> Result<ItemId> {
        let item_id = item.item_id;
        self.inventory.insert(item)?;
        Ok(item_id)
    }

    /// Add many items to the catalog
    pub fn seed_catalog(&self, items: Vec<InventoryItem>) -> Result<usize> {
        let count = items.len();
        for item in items {
            self.seed_item(item)?;
        }
        tracing::info!(count, available = self.available_count(None), "Catalog seeded");
        Ok(count)
    }

    /// Look up a catalog item
    pub fn item(&self, item_id: ItemId) -> Option<InventoryItem> {
        self.inventory.get(item_id)
    }

    /// Number of catalog items, claimed or not
    pub fn catalog_len(&self) -> usize {
        self.inventory.len()
    }

    /// Available items, read from the live availability index
    pub fn available_count(&self, tier: Option<Tier>) -> usize {
        self.inventory.available_count(tier)
    }

    /// Allocate a random available item to the account
    pub fn purchase(&self, account_id: &AccountId) -> Result<AllocatedItem> {
        self.timed_purchase(account_id, None)
    }

    /// Allocate a random available item of one tier
    pub fn purchase_in_tier(&self, account_id: &AccountId, tier: Tier) -> Result<AllocatedItem> {
        self.timed_purchase(account_id, Some(tier))
    }

    fn timed_purchase(&self, account_id: &AccountId, tier: Option<Tier>) -> Result<AllocatedItem> {
        let started = Instant::now();
        let outcome = self.allocate(account_id, tier);

        if let Some(metrics) = &self.metrics {
            metrics.record_purchase(&outcome, started.elapsed().as_secs_f64());
        }
        outcome
    }

    fn allocate(&self, account_id: &AccountId, tier: Option<Tier>) -> Result<AllocatedItem> {
        self.ensure_account(account_id)?;

        let mut rng = self.rng.next_rng();

        for attempt in 1..=self.max_claim_attempts {
            let snapshot = self.inventory.list_available(tier);
            let item_id = match self.policy.select(&snapshot, &mut rng) {
                Selection::Candidate(item_id) => item_id,
                Selection::NoInventory => return Err(Error::OutOfStock),
            };

            let claimed = self.locks.with_item(item_id, || -> Result<Option<AllocatedItem>> {
                match self.inventory.try_claim(item_id)? {
                    ClaimOutcome::AlreadyClaimed => Ok(None),
                    ClaimOutcome::Claimed => {
                        let item = self.claimed_item(item_id)?;
                        self.locks
                            .with_account(account_id, || self.commit_purchase(account_id, &item))
                            .map(Some)
                    }
                }
            })?;

            match claimed {
                Some(allocated) => return Ok(allocated),
                None => {
                    tracing::debug!(account = %account_id, item = %item_id, attempt, "Claim lost to concurrent buyer");
                    if let Some(metrics) = &self.metrics {
                        metrics.record_claim_conflict();
                    }
                }
            }
        }

        tracing::warn!(
            account = %account_id,
            attempts = self.max_claim_attempts,
            "Claim attempts exhausted"
        );
        Err(Error::OutOfStock)
    }

    /// Catalog data for an item this caller just claimed
    fn claimed_item(&self, item_id: ItemId) -> Result<InventoryItem> {
        match self.inventory.get(item_id) {
            Some(item) => Ok(item),
            None => {
                self.inventory.release(item_id);
                Err(Error::ItemNotFound(item_id))
            }
        }
    }

    /// Debit, record ownership and append the ledger entry; item and account locks held
    fn commit_purchase(&self, account_id: &AccountId, item: &InventoryItem) -> Result<AllocatedItem> {
        let new_balance = match self.accounts.debit(account_id, item.market_value) {
            Ok(balance) => balance,
            Err(err) => {
                // Claim already succeeded: put the item back before reporting
                if self.inventory.release(item.item_id) != ReleaseOutcome::Released {
                    return Err(self.integrity(format!(
                        "purchase of {} by {} rejected ({}) but the claim could not be released",
                        item.item_id, account_id, err
                    )));
                }
                tracing::warn!(account = %account_id, item = %item.item_id, error = %err, "Purchase rejected, claim released");
                return Err(err);
            }
        };

        if let Err(err) =
            self.accounts
                .add_ownership(account_id, item.item_id, item.share_percentage)
        {
            return Err(self.roll_back_purchase(account_id, item, false, err));
        }

        let entry = NewEntry {
            account_id: account_id.clone(),
            item_id: item.item_id,
            kind: TransactionKind::Purchase,
            amount: item.market_value,
        };
        if let Err(err) = self.ledger.append(entry) {
            return Err(self.roll_back_purchase(account_id, item, true, err));
        }

        tracing::info!(
            account = %account_id,
            item = %item.item_id,
            tier = %item.tier,
            amount = %item.market_value,
            balance = %new_balance,
            "Share purchased"
        );
        Ok(AllocatedItem::from(item))
    }

    fn roll_back_purchase(
        &self,
        account_id: &AccountId,
        item: &InventoryItem,
        ownership_added: bool,
        cause: Error,
    ) -> Error {
        let mut restored = true;
        if ownership_added {
            restored &= self.accounts.remove_ownership(account_id, item.item_id).is_ok();
        }
        restored &= self.accounts.credit(account_id, item.market_value).is_ok();
        restored &= self.inventory.release(item.item_id) == ReleaseOutcome::Released;

        self.integrity(format!(
            "purchase of {} by {} failed after debit: {} (rolled back: {})",
            item.item_id, account_id, cause, restored
        ))
    }

    /// Sell an owned item back for its market value
    pub fn sell(&self, account_id: &AccountId, item_id: ItemId) -> Result<SaleReceipt> {
        let outcome = self.liquidate(account_id, item_id);

        if let Some(metrics) = &self.metrics {
            metrics.record_sale(&outcome);
        }
        outcome
    }

    fn liquidate(&self, account_id: &AccountId, item_id: ItemId) -> Result<SaleReceipt> {
        self.ensure_account(account_id)?;

        let Some(item) = self.inventory.get(item_id) else {
            return Err(Error::NotOwned {
                account: account_id.clone(),
                item: item_id,
            });
        };

        self.locks.with_item(item_id, || {
            self.locks
                .with_account(account_id, || self.commit_sale(account_id, &item))
        })
    }

    /// Remove ownership, release, credit and append; item and account locks held
    fn commit_sale(&self, account_id: &AccountId, item: &InventoryItem) -> Result<SaleReceipt> {
        // NotOwned propagates unchanged; nothing has been applied yet
        let percentage = self.accounts.remove_ownership(account_id, item.item_id)?;

        let released = self.inventory.release(item.item_id);
        if released != ReleaseOutcome::Released {
            let restored = self
                .accounts
                .add_ownership(account_id, item.item_id, percentage)
                .is_ok();
            return Err(self.integrity(format!(
                "sale of {} by {}: owned item was not claimed ({:?}, rolled back: {})",
                item.item_id, account_id, released, restored
            )));
        }

        let new_balance = match self.accounts.credit(account_id, item.market_value) {
            Ok(balance) => balance,
            Err(err) => {
                let restored = self.reclaim(account_id, item.item_id, percentage);
                return Err(self.integrity(format!(
                    "sale of {} by {} failed at credit: {} (rolled back: {})",
                    item.item_id, account_id, err, restored
                )));
            }
        };

        let entry = NewEntry {
            account_id: account_id.clone(),
            item_id: item.item_id,
            kind: TransactionKind::Sale,
            amount: item.market_value,
        };
        if let Err(err) = self.ledger.append(entry) {
            let restored = self.accounts.debit(account_id, item.market_value).is_ok()
                && self.reclaim(account_id, item.item_id, percentage);
            return Err(self.integrity(format!(
                "sale of {} by {} failed at ledger append: {} (rolled back: {})",
                item.item_id, account_id, err, restored
            )));
        }

        tracing::info!(
            account = %account_id,
            item = %item.item_id,
            amount = %item.market_value,
            balance = %new_balance,
            "Share sold"
        );
        Ok(SaleReceipt {
            item_id: item.item_id,
            credited_amount: item.market_value,
            new_balance,
        })
    }

    /// Undo a release and an ownership removal; the item lock must be held
    fn reclaim(&self, account_id: &AccountId, item_id: ItemId, percentage: Decimal) -> bool {
        let claimed = matches!(self.inventory.try_claim(item_id), Ok(ClaimOutcome::Claimed));
        claimed && self.accounts.add_ownership(account_id, item_id, percentage).is_ok()
    }

    fn integrity(&self, detail: String) -> Error {
        tracing::error!(detail = %detail, "Integrity failure, manual reconciliation required");
        Error::Integrity(detail)
    }

    /// Balance and owned items, consistent with in-flight purchases and sales
    pub fn account_state(&self, account_id: &AccountId) -> Result<AccountState> {
        self.ensure_account(account_id)?;

        self.locks.with_account(account_id, || {
            let account = self.accounts.get(account_id)?;

            let owned_items = self
                .accounts
                .holdings(account_id)?
                .into_iter()
                .map(|ownership| {
                    let item = self.inventory.get(ownership.item_id).ok_or_else(|| {
                        self.integrity(format!(
                            "{} owns {} which is missing from the catalog",
                            account_id, ownership.item_id
                        ))
                    })?;
                    Ok(OwnedItem {
                        item_id: ownership.item_id,
                        name: item.name,
                        percentage: ownership.percentage,
                        tier: item.tier,
                        market_value: item.market_value,
                    })
                })
                .collect::<Result<Vec<_>>>()?;

            Ok(AccountState {
                account_id: account.account_id,
                balance: account.balance,
                owned_items,
            })
        })
    }

    /// Ledger entries of one account in sequence order
    pub fn ledger_for(&self, account_id: &AccountId) -> Result<Vec<LedgerEntry>> {
        self.ledger.entries_for(account_id)
    }

    /// All ledger entries in sequence order
    pub fn ledger_entries(&self) -> Result<Vec<LedgerEntry>> {
        self.ledger.entries()
    }

    /// Replay an account's ledger against its stored balance
    pub fn reconcile(&self, account_id: &AccountId) -> Result<Reconciliation> {
        self.ensure_account(account_id)?;

        self.locks.with_account(account_id, || {
            let account = self.accounts.get(account_id)?;
            let entries = self.ledger.entries_for(account_id)?;

            Ok(Reconciliation {
                account_id: account_id.clone(),
                stored: account.balance,
                reconstructed: ledger::replay_balance(account.opening_balance, &entries),
                entries: entries.len(),
                chain_valid: ledger::verify_chain(&entries),
            })
        })
    }

    /// Reconcile every registered account
    pub fn reconcile_all(&self) -> Result<Vec<Reconciliation>> {
        self.accounts
            .account_ids()
            .iter()
            .map(|account_id| self.reconcile(account_id))
            .collect()
    }
}
