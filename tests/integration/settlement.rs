//! Placement → settlement flows, run against both stores.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use wager::engine::BettingEngine;
use wager::types::{BetStatus, BetType, LedgerEntryType, LegResult, SettlementOutcome};

use crate::harness::{memory_engine, moneyline, schedule, spread, sqlite_engine, starts_in};

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

/// Balance after a mixed run equals initial − all stakes + credits.
async fn money_is_conserved(engine: BettingEngine) {
    engine.open_account("alice", dec!(1000)).await.unwrap();

    let won = engine
        .place_bet("alice", BetType::Straight, vec![moneyline("e1", "Chiefs", 150)], dec!(100), None)
        .await
        .unwrap();
    let lost = engine
        .place_bet(
            "alice",
            BetType::Parlay,
            vec![moneyline("e2", "Bills", 100), moneyline("e3", "Jets", -110)],
            dec!(50),
            None,
        )
        .await
        .unwrap();
    let pushed = engine
        .place_bet("alice", BetType::Straight, vec![moneyline("e4", "Eagles", -200)], dec!(30), None)
        .await
        .unwrap();
    let cancelled = engine
        .place_bet("alice", BetType::Straight, vec![moneyline("e5", "Rams", 120)], dec!(20), None)
        .await
        .unwrap();
    let open = engine
        .place_bet("alice", BetType::Straight, vec![moneyline("e6", "Bears", 110)], dec!(10), None)
        .await
        .unwrap();
    assert_eq!(open.new_balance, dec!(790));

    engine.settle_bet(won.bet_id, SettlementOutcome::Won, None).await.unwrap();
    engine.settle_bet(lost.bet_id, SettlementOutcome::Lost, None).await.unwrap();
    engine.settle_bet(pushed.bet_id, SettlementOutcome::Pushed, None).await.unwrap();
    engine.cancel_bet(cancelled.bet_id).await.unwrap();

    // 1000 − (100 + 50 + 30 + 20 + 10) + 250 + 30 + 20
    let expected = dec!(1000) - dec!(210) + dec!(250) + dec!(30) + dec!(20);
    let account = engine.account("alice").await.unwrap();
    assert_eq!(account.balance, expected);

    let ledger = engine.ledger("alice").await.unwrap();
    let sum: Decimal = ledger.iter().map(|e| e.amount).sum();
    assert_eq!(sum, account.balance);
    assert!(engine.verify_ledger("alice").await.unwrap().is_consistent);

    let credits = ledger
        .iter()
        .filter(|e| e.entry_type == LedgerEntryType::RefundCredit)
        .count();
    assert_eq!(credits, 2);

    let stats = engine.user_stats("alice").await.unwrap();
    assert_eq!(stats.total, 5);
    assert_eq!(stats.won, 1);
    assert_eq!(stats.lost, 1);
    assert_eq!(stats.pending, 1);
    assert_eq!(stats.win_rate, dec!(50));
    assert_eq!(stats.net_profit, dec!(100));
}

/// A second settlement fails and leaves the first credit alone.
async fn settlement_happens_once(engine: BettingEngine) {
    engine.open_account("bob", dec!(100)).await.unwrap();
    let placed = engine
        .place_bet("bob", BetType::Straight, vec![moneyline("e1", "Chiefs", 150)], dec!(100), None)
        .await
        .unwrap();

    let first = engine
        .settle_bet(placed.bet_id, SettlementOutcome::Won, None)
        .await
        .unwrap();
    assert_eq!(first.actual_payout, dec!(250));
    assert_eq!(first.new_balance, dec!(250));

    for outcome in [
        SettlementOutcome::Won,
        SettlementOutcome::Lost,
        SettlementOutcome::Pushed,
        SettlementOutcome::Cancelled,
    ] {
        let err = engine.settle_bet(placed.bet_id, outcome, None).await.unwrap_err();
        assert_eq!(err.kind(), "already_settled");
    }
    assert_eq!(engine.cancel_bet(placed.bet_id).await.unwrap_err().kind(), "already_settled");

    assert_eq!(engine.account("bob").await.unwrap().balance, dec!(250));
    assert_eq!(engine.ledger("bob").await.unwrap().len(), 3);
}

/// Cancelling 10 minutes out refunds; 2 minutes out (buffer 5) is locked.
async fn cancellation_window(engine: BettingEngine, events: &wager::engine::events::InMemoryEvents) {
    engine.open_account("carol", dec!(100)).await.unwrap();

    starts_in(events, "e1", 10);
    let early = engine
        .place_bet("carol", BetType::Straight, vec![moneyline("e1", "Chiefs", 150)], dec!(40), None)
        .await
        .unwrap();
    let receipt = engine.cancel_bet(early.bet_id).await.unwrap();
    assert_eq!(receipt.refund_amount, dec!(40));
    assert_eq!(receipt.new_balance, dec!(100));

    let late = engine
        .place_bet("carol", BetType::Straight, vec![moneyline("e2", "Bills", 120)], dec!(40), None)
        .await
        .unwrap();
    starts_in(events, "e2", 2);

    let err = engine.cancel_bet(late.bet_id).await.unwrap_err();
    assert_eq!(err.kind(), "bet_locked");
    let err = engine
        .settle_bet(late.bet_id, SettlementOutcome::Cancelled, None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "bet_locked");
    assert_eq!(engine.bet(late.bet_id).await.unwrap().status, BetStatus::Pending);
    assert_eq!(engine.account("carol").await.unwrap().balance, dec!(60));

    // Operator voids after lock-out go through as pushes.
    let pushed = engine
        .settle_bet(late.bet_id, SettlementOutcome::Pushed, None)
        .await
        .unwrap();
    assert_eq!(pushed.new_balance, dec!(100));

    // Placement closes at the same cut-off.
    let err = engine
        .place_bet("carol", BetType::Straight, vec![moneyline("e2", "Bills", 120)], dec!(10), None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "betting_closed");
}

/// If-bets chain payouts; teasers price from the table and re-price on pushes.
async fn chained_and_table_priced_bets(engine: BettingEngine) {
    engine.open_account("dave", dec!(500)).await.unwrap();

    let mut first = moneyline("e1", "Chiefs", 100);
    let mut second = moneyline("e2", "Bills", -200);
    first.stake = Some(dec!(20));
    second.stake = Some(dec!(20));
    let if_bet = engine
        .place_bet("dave", BetType::IfBet, vec![first, second], dec!(20), None)
        .await
        .unwrap();
    assert_eq!(if_bet.potential_payout, dec!(60));

    let legs = vec![
        spread("e3", "Jets", dec!(3.5), -110),
        spread("e4", "Eagles", dec!(-1), -110),
        spread("e5", "Rams", dec!(2.5), -110),
    ];
    let teaser = engine
        .place_bet("dave", BetType::Teaser, legs, dec!(10), Some(dec!(6)))
        .await
        .unwrap();
    assert_eq!(teaser.potential_payout, dec!(26));

    let settled = engine
        .settle_bet(
            teaser.bet_id,
            SettlementOutcome::Won,
            Some(vec![LegResult::Won, LegResult::Won, LegResult::Pushed]),
        )
        .await
        .unwrap();
    assert_eq!(settled.actual_payout, dec!(19.09));

    let err = engine
        .place_bet(
            "dave",
            BetType::Teaser,
            vec![spread("e6", "Bears", dec!(1), -110), spread("e7", "Lions", dec!(2), -110)],
            dec!(10),
            Some(dec!(5)),
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "validation_error");

    engine.settle_bet(if_bet.bet_id, SettlementOutcome::Won, None).await.unwrap();
    // 500 − 20 − 10 + 19.09 + 60
    assert_eq!(engine.account("dave").await.unwrap().balance, dec!(549.09));
    assert!(engine.verify_ledger("dave").await.unwrap().is_consistent);
}

// ---------------------------------------------------------------------------
// Memory store
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_memory_money_is_conserved() {
    money_is_conserved(memory_engine(schedule())).await;
}

#[tokio::test]
async fn test_memory_settlement_happens_once() {
    settlement_happens_once(memory_engine(schedule())).await;
}

#[tokio::test]
async fn test_memory_cancellation_window() {
    let events = schedule();
    cancellation_window(memory_engine(events.clone()), &events).await;
}

#[tokio::test]
async fn test_memory_chained_and_table_priced_bets() {
    chained_and_table_priced_bets(memory_engine(schedule())).await;
}

// ---------------------------------------------------------------------------
// SQLite store
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_sqlite_money_is_conserved() {
    money_is_conserved(sqlite_engine(schedule()).await).await;
}

#[tokio::test]
async fn test_sqlite_settlement_happens_once() {
    settlement_happens_once(sqlite_engine(schedule()).await).await;
}

#[tokio::test]
async fn test_sqlite_cancellation_window() {
    let events = schedule();
    cancellation_window(sqlite_engine(events.clone()).await, &events).await;
}

#[tokio::test]
async fn test_sqlite_chained_and_table_priced_bets() {
    chained_and_table_priced_bets(sqlite_engine(schedule()).await).await;
}
