//! Shared fixtures: engines over each store with a controllable schedule.
//!
//! Events live in an `InMemoryEvents` the test keeps a handle to, so a test
//! can move an event's start time after a bet is placed.

use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use uuid::Uuid;

use wager::config::EngineConfig;
use wager::engine::events::{EventRecord, InMemoryEvents};
use wager::engine::BettingEngine;
use wager::limits::BettingLimits;
use wager::odds::AmericanOdds;
use wager::storage::{LedgerStore, MemoryStore, SqliteStore};
use wager::types::{Market, Selection};

/// Events e1..e8 all start an hour from now.
pub fn schedule() -> Arc<InMemoryEvents> {
    let start = Utc::now() + Duration::hours(1);
    Arc::new(InMemoryEvents::with_events(
        (1..=8).map(|i| EventRecord::scheduled(&format!("e{i}"), start)),
    ))
}

/// Move an event so it starts `minutes` from now.
pub fn starts_in(events: &InMemoryEvents, event_id: &str, minutes: i64) {
    events.upsert(EventRecord::scheduled(
        event_id,
        Utc::now() + Duration::minutes(minutes),
    ));
}

fn engine_over(store: Arc<dyn LedgerStore>, events: Arc<InMemoryEvents>) -> BettingEngine {
    BettingEngine::new(
        &EngineConfig::default(),
        BettingLimits::default(),
        store,
        events,
    )
}

pub fn memory_engine(events: Arc<InMemoryEvents>) -> BettingEngine {
    engine_over(Arc::new(MemoryStore::new()), events)
}

/// File-backed so concurrent transactions use separate connections.
pub async fn sqlite_engine(events: Arc<InMemoryEvents>) -> BettingEngine {
    let path = std::env::temp_dir().join(format!("wager-test-{}.db", Uuid::new_v4()));
    let store = SqliteStore::connect(&format!("sqlite://{}", path.display()))
        .await
        .unwrap();
    store.migrate().await.unwrap();
    engine_over(Arc::new(store), events)
}

pub fn moneyline(event: &str, team: &str, price: i32) -> Selection {
    Selection {
        event_id: event.to_string(),
        market: Market::H2h,
        selected_outcome: team.to_string(),
        point: None,
        price: AmericanOdds::new(price),
        sport: "american_football".to_string(),
        stake: None,
    }
}

pub fn spread(event: &str, team: &str, point: Decimal, price: i32) -> Selection {
    Selection {
        event_id: event.to_string(),
        market: Market::Spreads,
        selected_outcome: team.to_string(),
        point: Some(point),
        price: AmericanOdds::new(price),
        sport: "american_football".to_string(),
        stake: None,
    }
}
