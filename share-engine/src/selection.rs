//! Selection policy
//!
//! Pure choice of the next candidate from an availability snapshot. The
//! policy never touches the inventory; the engine claims whatever it picks
//! and retries with a fresh snapshot if the claim is lost.

use crate::{
    config::{PolicyKind, SelectionConfig},
    types::{Candidate, ItemId, Tier},
};
use rand::distributions::{Distribution, WeightedIndex};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Result of a selection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selection {
    /// Item to attempt to claim
    Candidate(ItemId),
    /// Snapshot was empty
    NoInventory,
}

/// How the next item is chosen
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectionPolicy {
    /// Uniform over every available item, independent of tier
    Uniform,
    /// Pick a tier by weight among tiers present, then uniform within it
    TierWeighted(BTreeMap<Tier, u32>),
}

impl SelectionPolicy {
    /// Build from configuration
    pub fn from_config(config: &SelectionConfig) -> Self {
        match config.policy {
            PolicyKind::Uniform => SelectionPolicy::Uniform,
            PolicyKind::TierWeighted => SelectionPolicy::TierWeighted(config.tier_weights.clone()),
        }
    }

    /// Choose one candidate from the snapshot
    pub fn select<R: Rng + ?Sized>(&self, snapshot: &[Candidate], rng: &mut R) -> Selection {
        if snapshot.is_empty() {
            return Selection::NoInventory;
        }

        match self {
            SelectionPolicy::Uniform => uniform(snapshot, rng),
            SelectionPolicy::TierWeighted(weights) => weighted(snapshot, weights, rng),
        }
    }
}

fn uniform<R: Rng + ?Sized>(snapshot: &[Candidate], rng: &mut R) -> Selection {
    let index = rng.gen_range(0..snapshot.len());
    Selection::Candidate(snapshot[index].item_id)
}

fn weighted<R: Rng + ?Sized>(
    snapshot: &[Candidate],
    weights: &BTreeMap<Tier, u32>,
    rng: &mut R,
) -> Selection {
    let mut by_tier: BTreeMap<Tier, Vec<Candidate>> = BTreeMap::new();
    for candidate in snapshot {
        by_tier.entry(candidate.tier).or_default().push(*candidate);
    }

    let tiers: Vec<(Tier, u32)> = by_tier
        .keys()
        .map(|tier| (*tier, weights.get(tier).copied().unwrap_or(0)))
        .filter(|(_, weight)| *weight > 0)
        .collect();

    // Only zero-weight tiers left in stock: fall back to uniform
    let Ok(dist) = WeightedIndex::new(tiers.iter().map(|(_, w)| *w)) else {
        return uniform(snapshot, rng);
    };

    let tier = tiers[dist.sample(rng)].0;
    match by_tier.get(&tier) {
        Some(pool) => uniform(pool, rng),
        None => uniform(snapshot, rng),
    }
}

/// Per-request RNG streams derived from one base seed
///
/// Each request gets its own `StdRng`, so selection never serialises on a
/// shared generator, and a fixed seed reproduces the same stream sequence.
#[derive(Debug)]
pub struct RngSource {
    seed: u64,
    counter: AtomicU64,
}

impl RngSource {
    /// Source with a fixed seed, or a random one when `None`
    pub fn new(seed: Option<u64>) -> Self {
        Self {
            seed: seed.unwrap_or_else(rand::random),
            counter: AtomicU64::new(0),
        }
    }

    /// Base seed in use
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Next independent generator
    pub fn next_rng(&self) -> StdRng {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        StdRng::seed_from_u64(self.seed ^ n.wrapping_mul(0x9E37_79B9_7F4A_7C15))
    }
}
