//! Inventory store
//!
//! Holds the catalog of allocatable items and their availability flag.
//! Claim and release are single compare-and-set operations on a per-item
//! `AtomicBool`, so two callers racing for the same item always produce
//! exactly one winner; the loser observes [`ClaimOutcome::AlreadyClaimed`].

use crate::{
    types::{Candidate, InventoryItem, ItemId, Tier},
    Error, Result,
};
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};

/// Outcome of a claim attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// Item moved from available to claimed by this caller
    Claimed,
    /// Item was already claimed, possibly by a concurrent caller
    AlreadyClaimed,
}

/// Outcome of a release
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// Item moved from claimed back to available
    Released,
    /// Item not in the catalog
    NotFound,
    /// Item was already available
    NotClaimed,
}

/// Catalog of allocatable items with an availability index
pub trait InventoryStore: Send + Sync {
    /// Add an item to the catalog as available
    fn insert(&self, item: InventoryItem) -> Result<()>;

    /// Look up an item
    fn get(&self, item_id: ItemId) -> Option<InventoryItem>;

    /// Atomic available → claimed transition
    fn try_claim(&self, item_id: ItemId) -> Result<ClaimOutcome>;

    /// Atomic claimed → available transition
    fn release(&self, item_id: ItemId) -> ReleaseOutcome;

    /// Live snapshot of available items, optionally restricted to a tier
    ///
    /// Presence in the snapshot does not guarantee a later claim succeeds.
    fn list_available(&self, tier: Option<Tier>) -> Vec<Candidate>;

    /// Number of available items, read from the live index
    fn available_count(&self, tier: Option<Tier>) -> usize {
        self.list_available(tier).len()
    }

    /// Number of catalog items
    fn len(&self) -> usize;

    /// Whether the catalog is empty
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

struct Slot {
    item: InventoryItem,
    available: AtomicBool,
}

/// In-memory inventory keyed by item ID
#[derive(Default)]
pub struct MemoryInventory {
    slots: DashMap<ItemId, Slot>,
}

impl MemoryInventory {
    /// Create an empty inventory
    pub fn new() -> Self {
        Self::default()
    }
}

impl std::fmt::Debug for MemoryInventory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryInventory")
            .field("items", &self.slots.len())
            .finish()
    }
}

impl InventoryStore for MemoryInventory {
    fn insert(&self, item: InventoryItem) -> Result<()> {
        item.validate()?;

        match self.slots.entry(item.item_id) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(Error::DuplicateItem(item.item_id)),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(Slot {
                    item,
                    available: AtomicBool::new(true),
                });
                Ok(())
            }
        }
    }

    fn get(&self, item_id: ItemId) -> Option<InventoryItem> {
        self.slots.get(&item_id).map(|slot| slot.item.clone())
    }

    fn try_claim(&self, item_id: ItemId) -> Result<ClaimOutcome> {
        let slot = self.slots.get(&item_id).ok_or(Error::ItemNotFound(item_id))?;

        match slot
            .available
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => Ok(ClaimOutcome::Claimed),
            Err(_) => Ok(ClaimOutcome::AlreadyClaimed),
        }
    }

    fn release(&self, item_id: ItemId) -> ReleaseOutcome {
        let Some(slot) = self.slots.get(&item_id) else {
            return ReleaseOutcome::NotFound;
        };

        match slot
            .available
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => ReleaseOutcome::Released,
            Err(_) => ReleaseOutcome::NotClaimed,
        }
    }

    fn list_available(&self, tier: Option<Tier>) -> Vec<Candidate> {
        let mut candidates: Vec<Candidate> = self
            .slots
            .iter()
            .filter(|slot| slot.available.load(Ordering::Acquire))
            .filter(|slot| tier.map_or(true, |t| slot.item.tier == t))
            .map(|slot| Candidate {
                item_id: slot.item.item_id,
                tier: slot.item.tier,
            })
            .collect();

        // Shard iteration order is not stable; seeded selection needs a fixed order
        candidates.sort_by_key(|c| c.item_id);
        candidates
    }

    fn len(&self) -> usize {
        self.slots.len()
    }
}
