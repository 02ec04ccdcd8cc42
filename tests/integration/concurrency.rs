//! Concurrent placements on one wallet must never overdraw it.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;

use wager::engine::BettingEngine;
use wager::types::{BetType, WagerError};

use crate::harness::{memory_engine, moneyline, schedule, sqlite_engine};

const ATTEMPTS: usize = 20;

/// Place one $10 bet, retrying lock contention.
async fn place_ten(engine: Arc<BettingEngine>, i: usize) -> Result<(), WagerError> {
    let leg = moneyline(&format!("e{}", i % 8 + 1), "Home", 150);
    loop {
        match engine
            .place_bet("erin", BetType::Straight, vec![leg.clone()], dec!(10), None)
            .await
        {
            Err(e) if e.is_retryable() => tokio::task::yield_now().await,
            other => return other.map(|_| ()),
        }
    }
}

/// 20 racing $10 bets on a $100 wallet: exactly 10 succeed, balance ends at 0.
async fn no_overdraft_under_contention(engine: BettingEngine) {
    engine.open_account("erin", dec!(100)).await.unwrap();
    let engine = Arc::new(engine);

    let handles: Vec<_> = (0..ATTEMPTS)
        .map(|i| tokio::spawn(place_ten(engine.clone(), i)))
        .collect();
    let results = futures::future::join_all(handles).await;

    let mut placed = 0;
    let mut rejected = 0;
    for result in results {
        match result.unwrap() {
            Ok(()) => placed += 1,
            Err(e) => {
                assert_eq!(e.kind(), "insufficient_funds", "unexpected error: {e}");
                rejected += 1;
            }
        }
    }
    assert_eq!(placed, 10);
    assert_eq!(rejected, 10);

    let account = engine.account("erin").await.unwrap();
    assert_eq!(account.balance, Decimal::ZERO);

    let ledger = engine.ledger("erin").await.unwrap();
    assert_eq!(ledger.len(), 11);
    let sum: Decimal = ledger.iter().map(|e| e.amount).sum();
    assert_eq!(sum, account.balance);
    assert!(ledger.iter().all(|e| e.balance_after >= Decimal::ZERO));
    assert!(engine.verify_ledger("erin").await.unwrap().is_consistent);
}

/// Different users never block each other's balances.
async fn users_are_isolated(engine: BettingEngine) {
    let engine = Arc::new(engine);
    for user in ["u1", "u2", "u3"] {
        engine.open_account(user, dec!(50)).await.unwrap();
    }

    let handles: Vec<_> = ["u1", "u2", "u3"]
        .into_iter()
        .flat_map(|user| {
            let engine = engine.clone();
            (0..5).map(move |i| {
                let engine = engine.clone();
                tokio::spawn(async move {
                    let leg = moneyline(&format!("e{}", i + 1), "Home", -110);
                    loop {
                        match engine
                            .place_bet(user, BetType::Straight, vec![leg.clone()], dec!(10), None)
                            .await
                        {
                            Err(e) if e.is_retryable() => tokio::task::yield_now().await,
                            other => return other.map(|_| ()),
                        }
                    }
                })
            })
        })
        .collect();
    for result in futures::future::join_all(handles).await {
        result.unwrap().unwrap();
    }

    for audit in engine.verify_all().await.unwrap() {
        assert!(audit.is_consistent);
        assert_eq!(audit.cached_balance, Decimal::ZERO);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_memory_no_overdraft_under_contention() {
    no_overdraft_under_contention(memory_engine(schedule())).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_sqlite_no_overdraft_under_contention() {
    no_overdraft_under_contention(sqlite_engine(schedule()).await).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_memory_users_are_isolated() {
    users_are_isolated(memory_engine(schedule())).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_sqlite_users_are_isolated() {
    users_are_isolated(sqlite_engine(schedule()).await).await;
}
