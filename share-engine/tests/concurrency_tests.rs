//! Concurrency tests for allocation
//!
//! Many buyers race for a finite inventory; the engine must hand out each
//! item at most once, never drive a balance negative, and keep the ledger
//! in step with the account store under any interleaving.

use rust_decimal::Decimal;
use share_engine::{
    types::InventoryItem, AccountId, AllocationEngine, Config, Error, ItemId, ShareService, Tier,
};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

fn engine_with_items(values: &[i64]) -> AllocationEngine {
    // Every lost claim removes an item from later snapshots, so this many
    // attempts only run out once the pool is empty
    let mut config = Config::default();
    config.allocation.max_claim_attempts = values.len() as u32 + 1;

    let engine = AllocationEngine::new(&config).unwrap();
    for value in values {
        engine
            .seed_item(InventoryItem::new(
                "Pikachu",
                Decimal::new(1, 1),
                Decimal::from(*value),
                Tier::Common,
            ))
            .unwrap();
    }
    engine
}

fn assert_consistent(engine: &AllocationEngine, accounts: &[AccountId], total_items: usize) {
    let mut owned = BTreeSet::new();
    for account_id in accounts {
        let state = engine.account_state(account_id).unwrap();
        assert!(state.balance >= Decimal::ZERO);
        for item in state.owned_items {
            assert!(owned.insert(item.item_id), "item {} owned twice", item.item_id);
        }
    }
    assert_eq!(owned.len() + engine.available_count(None), total_items);

    for reconciliation in engine.reconcile_all().unwrap() {
        assert!(reconciliation.is_consistent(), "{:?}", reconciliation);
    }
}

#[test]
fn test_more_buyers_than_items() {
    const ITEMS: usize = 10;
    const BUYERS: usize = 40;

    let engine = engine_with_items(&[5; ITEMS]);
    let buyers: Vec<AccountId> = (0..BUYERS)
        .map(|i| AccountId::new(format!("buyer-{}", i)))
        .collect();
    for buyer in &buyers {
        engine.register_account(buyer.clone(), Decimal::from(100)).unwrap();
    }

    let outcomes: Vec<Result<_, Error>> = std::thread::scope(|s| {
        let engine = &engine;
        let handles: Vec<_> = buyers
            .iter()
            .map(|buyer| s.spawn(move || engine.purchase(buyer)))
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let allocated: Vec<ItemId> = outcomes
        .iter()
        .filter_map(|outcome| outcome.as_ref().ok().map(|item| item.item_id))
        .collect();
    let unique: BTreeSet<_> = allocated.iter().collect();

    assert_eq!(allocated.len(), ITEMS);
    assert_eq!(unique.len(), ITEMS);
    assert!(outcomes
        .iter()
        .filter(|outcome| outcome.is_err())
        .all(|outcome| matches!(outcome, Err(Error::OutOfStock))));
    assert_eq!(engine.available_count(None), 0);
    assert_consistent(&engine, &buyers, ITEMS);
}

#[test]
fn test_same_account_cannot_overspend() {
    // Two items of 10 each, balance 15: only one purchase fits
    let engine = engine_with_items(&[10, 10]);
    let alice = AccountId::new("alice");
    engine.register_account(alice.clone(), Decimal::from(15)).unwrap();

    let outcomes: Vec<Result<_, Error>> = std::thread::scope(|s| {
        let first = s.spawn(|| engine.purchase(&alice));
        let second = s.spawn(|| engine.purchase(&alice));
        vec![first.join().unwrap(), second.join().unwrap()]
    });

    let successes = outcomes.iter().filter(|outcome| outcome.is_ok()).count();
    assert_eq!(successes, 1);
    assert!(outcomes.iter().any(|outcome| matches!(
        outcome,
        Err(Error::InsufficientFunds { .. }) | Err(Error::OutOfStock)
    )));

    let state = engine.account_state(&alice).unwrap();
    assert_eq!(state.balance, Decimal::from(5));
    assert_eq!(state.owned_items.len(), 1);
    // The losing claim was released back to the pool
    assert_eq!(engine.available_count(None), 1);
    assert_eq!(engine.ledger_for(&alice).unwrap().len(), 1);
}

#[test]
fn test_concurrent_buys_and_sells() {
    const ITEMS: usize = 16;

    let engine = engine_with_items(&[3; ITEMS]);
    let accounts: Vec<AccountId> = (0..8)
        .map(|i| AccountId::new(format!("trader-{}", i)))
        .collect();
    for account_id in &accounts {
        engine.register_account(account_id.clone(), Decimal::from(20)).unwrap();
    }

    std::thread::scope(|s| {
        for account_id in &accounts {
            let engine = &engine;
            s.spawn(move || {
                for _ in 0..50 {
                    match engine.purchase(account_id) {
                        Ok(item) => {
                            engine.sell(account_id, item.item_id).unwrap();
                        }
                        Err(Error::OutOfStock) | Err(Error::InsufficientFunds { .. }) => {}
                        Err(other) => panic!("unexpected error: {}", other),
                    }
                }
            });
        }
    });

    for account_id in &accounts {
        let state = engine.account_state(account_id).unwrap();
        assert_eq!(state.balance, Decimal::from(20));
        assert!(state.owned_items.is_empty());
    }
    assert_eq!(engine.available_count(None), ITEMS);
    assert_consistent(&engine, &accounts, ITEMS);
}

#[test]
fn test_concurrent_sell_of_same_item() {
    let engine = engine_with_items(&[10]);
    let alice = AccountId::new("alice");
    engine.register_account(alice.clone(), Decimal::from(10)).unwrap();
    let item = engine.purchase(&alice).unwrap();

    let item_id = item.item_id;
    let outcomes: Vec<Result<_, Error>> = std::thread::scope(|s| {
        let (engine, alice) = (&engine, &alice);
        let handles: Vec<_> = (0..4)
            .map(|_| s.spawn(move || engine.sell(alice, item_id)))
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert_eq!(outcomes.iter().filter(|outcome| outcome.is_ok()).count(), 1);
    assert!(outcomes
        .iter()
        .filter(|outcome| outcome.is_err())
        .all(|outcome| matches!(outcome, Err(Error::NotOwned { .. }))));
    assert_eq!(engine.account_state(&alice).unwrap().balance, Decimal::from(10));
    assert_consistent(&engine, &[alice], 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_service_concurrent_purchases() {
    const ITEMS: usize = 5;

    let engine = Arc::new(engine_with_items(&[1; ITEMS]));
    let service = ShareService::new(Arc::clone(&engine));
    let buyers: Vec<AccountId> = (0..20)
        .map(|i| AccountId::new(format!("async-{}", i)))
        .collect();
    for buyer in &buyers {
        engine.register_account(buyer.clone(), Decimal::from(1)).unwrap();
    }

    let handles: Vec<_> = buyers
        .iter()
        .cloned()
        .map(|buyer| {
            let service = service.clone();
            tokio::spawn(async move { service.purchase(buyer).await })
        })
        .collect();

    let mut successes = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => successes += 1,
            Err(err) => assert!(matches!(err, Error::OutOfStock)),
        }
    }

    assert_eq!(successes, ITEMS);
    assert_consistent(&engine, &buyers, ITEMS);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_cancelled_callers_leave_no_partial_state() {
    const ITEMS: usize = 50;

    let engine = Arc::new(engine_with_items(&[2; ITEMS]));
    let service = ShareService::new(Arc::clone(&engine));
    let buyers: Vec<AccountId> = (0..ITEMS)
        .map(|i| AccountId::new(format!("impatient-{}", i)))
        .collect();
    for buyer in &buyers {
        engine.register_account(buyer.clone(), Decimal::from(4)).unwrap();
    }

    // Callers give up almost immediately; their operations may or may not run
    for buyer in &buyers {
        let _ = tokio::time::timeout(Duration::from_micros(1), service.purchase(buyer.clone())).await;
    }

    // Let any operation that did start finish on the blocking pool
    tokio::time::sleep(Duration::from_millis(200)).await;

    for buyer in &buyers {
        let state = service.account_state(buyer.clone()).await.unwrap();
        let spent = Decimal::from(2) * Decimal::from(state.owned_items.len() as u64);
        assert_eq!(state.balance, Decimal::from(4) - spent);
    }
    assert_consistent(&engine, &buyers, ITEMS);
}
