//! Append-only transaction ledger
//!
//! Every purchase and sale appends one immutable [`LedgerEntry`]. Entries
//! carry a global sequence number (the replay order) and are chained per
//! account with SHA-256, so each account's history can be audited
//! independently and appends for different accounts never contend.
//!
//! # Invariants
//!
//! - Append-only: entries are never modified or deleted
//! - Replay: `opening_balance - Σ purchases + Σ sales == balance`
//! - Chain: `entry.prev_hash` equals the previous entry's `hash` within an account

use crate::{
    types::{AccountId, LedgerEntry, NewEntry},
    Result,
};
use chrono::Utc;
use dashmap::DashMap;
use rust_decimal::Decimal;
use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

/// Genesis hash for the first entry of every account chain
pub const GENESIS_HASH: [u8; 32] = [0u8; 32];

/// Append-only ledger of purchases and sales
pub trait LedgerStore: Send + Sync {
    /// Append an entry, assigning id, sequence, timestamp and hashes
    fn append(&self, entry: NewEntry) -> Result<LedgerEntry>;

    /// Entries of one account in sequence order
    fn entries_for(&self, account_id: &AccountId) -> Result<Vec<LedgerEntry>>;

    /// All entries in sequence order
    fn entries(&self) -> Result<Vec<LedgerEntry>>;

    /// Number of entries
    fn len(&self) -> usize;

    /// Whether the ledger is empty
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Build an immutable entry from its content and chain position
pub fn seal(entry: NewEntry, sequence: u64, prev_hash: [u8; 32]) -> LedgerEntry {
    let mut sealed = LedgerEntry {
        entry_id: Uuid::now_v7(),
        sequence,
        account_id: entry.account_id,
        item_id: entry.item_id,
        kind: entry.kind,
        amount: entry.amount,
        timestamp: Utc::now(),
        prev_hash,
        hash: GENESIS_HASH,
    };
    sealed.hash = sealed.compute_hash();
    sealed
}

/// Fold entries against the registration-time balance
pub fn replay_balance(opening_balance: Decimal, entries: &[LedgerEntry]) -> Decimal {
    let mut ordered: Vec<&LedgerEntry> = entries.iter().collect();
    ordered.sort_by_key(|e| (e.timestamp, e.sequence));

    ordered
        .into_iter()
        .fold(opening_balance, |balance, entry| balance + entry.balance_delta())
}

/// Verify one account's hash chain (entries in sequence order)
pub fn verify_chain(entries: &[LedgerEntry]) -> bool {
    let mut expected_prev = GENESIS_HASH;
    let mut last_sequence = None;

    for entry in entries {
        if entry.prev_hash != expected_prev || entry.compute_hash() != entry.hash {
            return false;
        }
        if last_sequence.is_some_and(|seq| entry.sequence <= seq) {
            return false;
        }
        expected_prev = entry.hash;
        last_sequence = Some(entry.sequence);
    }

    true
}

/// In-memory ledger partitioned by account
#[derive(Debug, Default)]
pub struct MemoryLedger {
    partitions: DashMap<AccountId, Vec<LedgerEntry>>,
    next_sequence: AtomicU64,
}

impl MemoryLedger {
    /// Create an empty ledger
    pub fn new() -> Self {
        Self::default()
    }
}

impl LedgerStore for MemoryLedger {
    fn append(&self, entry: NewEntry) -> Result<LedgerEntry> {
        let mut partition = self.partitions.entry(entry.account_id.clone()).or_default();

        // Sequence taken under the partition guard keeps per-account order monotonic
        let sequence = self.next_sequence.fetch_add(1, Ordering::SeqCst);
        let prev_hash = partition.last().map_or(GENESIS_HASH, |last| last.hash);

        let sealed = seal(entry, sequence, prev_hash);
        partition.push(sealed.clone());

        Ok(sealed)
    }

    fn entries_for(&self, account_id: &AccountId) -> Result<Vec<LedgerEntry>> {
        Ok(self
            .partitions
            .get(account_id)
            .map(|partition| partition.clone())
            .unwrap_or_default())
    }

    fn entries(&self) -> Result<Vec<LedgerEntry>> {
        let mut all: Vec<LedgerEntry> = self
            .partitions
            .iter()
            .flat_map(|partition| partition.value().clone())
            .collect();
        all.sort_by_key(|e| e.sequence);
        Ok(all)
    }

    fn len(&self) -> usize {
        self.partitions.iter().map(|p| p.value().len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ItemId, TransactionKind};

    fn new_entry(account: &str, kind: TransactionKind, amount: i64) -> NewEntry {
        NewEntry {
            account_id: AccountId::new(account),
            item_id: ItemId::generate(),
            kind,
            amount: Decimal::from(amount),
        }
    }

    #[test]
    fn test_append_assigns_sequence_and_chain() {
        let ledger = MemoryLedger::new();
        let first = ledger.append(new_entry("alice", TransactionKind::Purchase, 10)).unwrap();
        let second = ledger.append(new_entry("alice", TransactionKind::Sale, 10)).unwrap();

        assert_eq!(first.sequence, 0);
        assert_eq!(second.sequence, 1);
        assert_eq!(first.prev_hash, GENESIS_HASH);
        assert_eq!(second.prev_hash, first.hash);
        assert_eq!(ledger.len(), 2);
    }

    #[test]
    fn test_partitions_are_independent_chains() {
        let ledger = MemoryLedger::new();
        ledger.append(new_entry("alice", TransactionKind::Purchase, 10)).unwrap();
        let bob = ledger.append(new_entry("bob", TransactionKind::Purchase, 5)).unwrap();

        assert_eq!(bob.prev_hash, GENESIS_HASH);
        assert_eq!(ledger.entries_for(&AccountId::new("bob")).unwrap().len(), 1);
        assert!(ledger.entries_for(&AccountId::new("carol")).unwrap().is_empty());

        let all = ledger.entries().unwrap();
        assert_eq!(all.len(), 2);
        assert!(all[0].sequence < all[1].sequence);
    }

    #[test]
    fn test_replay_balance() {
        let ledger = MemoryLedger::new();
        ledger.append(new_entry("alice", TransactionKind::Purchase, 10)).unwrap();
        ledger.append(new_entry("alice", TransactionKind::Purchase, 3)).unwrap();
        ledger.append(new_entry("alice", TransactionKind::Sale, 10)).unwrap();

        let entries = ledger.entries_for(&AccountId::new("alice")).unwrap();
        assert_eq!(replay_balance(Decimal::from(20), &entries), Decimal::from(17));
    }

    #[test]
    fn test_verify_chain_detects_tampering() {
        let ledger = MemoryLedger::new();
        for _ in 0..3 {
            ledger.append(new_entry("alice", TransactionKind::Purchase, 1)).unwrap();
        }
        let mut entries = ledger.entries_for(&AccountId::new("alice")).unwrap();
        assert!(verify_chain(&entries));

        entries[1].amount = Decimal::from(100);
        assert!(!verify_chain(&entries));

        let mut gapped = ledger.entries_for(&AccountId::new("alice")).unwrap();
        gapped.remove(1);
        assert!(!verify_chain(&gapped));
    }
}
