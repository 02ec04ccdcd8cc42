//! WAGER ledger audit
//!
//! Entry point. Loads configuration, initialises structured logging, opens
//! the ledger database (creating the schema if needed) and verifies that
//! every wallet's cached balance equals the sum of its ledger entries.

use anyhow::{bail, Context, Result};
use std::sync::Arc;
use tracing::{error, info};

use wager::config;
use wager::engine::events::InMemoryEvents;
use wager::engine::BettingEngine;
use wager::storage::SqliteStore;

const CONFIG_FILE: &str = "wager.toml";

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let cfg = config::AppConfig::load_or_default(CONFIG_FILE)?;

    init_logging();

    let url = cfg.database_url();
    info!(
        database = %url,
        min_stake = %cfg.engine.min_stake,
        max_stake = %cfg.engine.max_stake,
        cancel_buffer_mins = cfg.engine.cancel_buffer_mins,
        "WAGER starting ledger audit"
    );

    let store = SqliteStore::connect(&url)
        .await
        .with_context(|| format!("Failed to open ledger database: {url}"))?;
    store.migrate().await.context("Failed to migrate ledger schema")?;

    // The audit never places bets, so no event schedule is needed.
    let engine = BettingEngine::new(
        &cfg.engine,
        cfg.limits.clone(),
        Arc::new(store),
        Arc::new(InMemoryEvents::new()),
    );

    let audits = engine.verify_all().await.context("Ledger audit failed")?;
    let mismatched: Vec<_> = audits.iter().filter(|a| !a.is_consistent).collect();

    for audit in &mismatched {
        error!(
            user_id = %audit.user_id,
            cached = format!("${:.2}", audit.cached_balance),
            ledger = format!("${:.2}", audit.ledger_sum),
            first_divergence = ?audit.first_divergence,
            "Balance does not match ledger"
        );
    }

    info!(
        accounts = audits.len(),
        entries = audits.iter().map(|a| a.entries).sum::<usize>(),
        mismatched = mismatched.len(),
        "Ledger audit complete"
    );

    if !mismatched.is_empty() {
        bail!("{} account(s) failed ledger verification", mismatched.len());
    }
    Ok(())
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("wager=info"));

    let json_logging = std::env::var("WAGER_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}
