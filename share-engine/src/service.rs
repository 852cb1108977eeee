//! Async operation surface
//!
//! Each call runs the synchronous engine operation on Tokio's blocking
//! pool. A caller that drops its future (client disconnect, timeout) only
//! stops waiting: the operation either never started or runs to completion,
//! so no request is ever observed half-applied.

use crate::{
    engine::AllocationEngine,
    types::{AccountId, AccountState, AllocatedItem, ItemId, SaleReceipt, Tier},
    Error, Result,
};
use std::sync::Arc;

/// Cloneable async handle over a shared engine
#[derive(Debug, Clone)]
pub struct ShareService {
    engine: Arc<AllocationEngine>,
}

impl ShareService {
    /// Wrap an engine
    pub fn new(engine: Arc<AllocationEngine>) -> Self {
        Self { engine }
    }

    /// Underlying engine
    pub fn engine(&self) -> &Arc<AllocationEngine> {
        &self.engine
    }

    async fn run<T, F>(&self, op: F) -> Result<T>
    where
        F: FnOnce(&AllocationEngine) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let engine = Arc::clone(&self.engine);
        tokio::task::spawn_blocking(move || op(&engine))
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Engine task aborted");
                Error::Integrity(format!("Engine task aborted: {}", e))
            })?
    }

    /// Allocate a random available item
    pub async fn purchase(&self, account_id: AccountId) -> Result<AllocatedItem> {
        self.run(move |engine| engine.purchase(&account_id)).await
    }

    /// Allocate a random available item of one tier
    pub async fn purchase_in_tier(&self, account_id: AccountId, tier: Tier) -> Result<AllocatedItem> {
        self.run(move |engine| engine.purchase_in_tier(&account_id, tier))
            .await
    }

    /// Sell an owned item
    pub async fn sell(&self, account_id: AccountId, item_id: ItemId) -> Result<SaleReceipt> {
        self.run(move |engine| engine.sell(&account_id, item_id)).await
    }

    /// Balance and owned items
    pub async fn account_state(&self, account_id: AccountId) -> Result<AccountState> {
        self.run(move |engine| engine.account_state(&account_id))
            .await
    }
}
