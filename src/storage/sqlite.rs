//! SQLite ledger store.
//!
//! Every money movement runs in one transaction whose first statement is a
//! write to the user's wallet row. That takes SQLite's write lock up front,
//! so the balance read that follows cannot go stale before commit. Lock
//! contention beyond the busy timeout surfaces as `ConcurrencyConflict`.
//!
//! Decimals are stored as TEXT to keep them exact; timestamps as RFC 3339.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

use super::{
    apply_resolution, authorize_placement, post_entry, transfer_amount, LedgerStore, ResolvedBet,
    Resolver,
};
use crate::limits::{BettingLimits, RecentStakes};
use crate::types::{
    Bet, BetStatus, BetType, LedgerEntry, LedgerEntryType, Selection, WagerError, WalletAccount,
};

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS wallets (
        user_id     TEXT PRIMARY KEY,
        balance     TEXT NOT NULL,
        limits      TEXT NOT NULL,
        opened_at   TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS bets (
        id                      TEXT PRIMARY KEY,
        user_id                 TEXT NOT NULL REFERENCES wallets(user_id),
        bet_type                TEXT NOT NULL,
        legs                    TEXT NOT NULL,
        stake                   TEXT NOT NULL,
        decimal_odds_combined   TEXT NOT NULL,
        potential_payout        TEXT NOT NULL,
        actual_payout           TEXT,
        status                  TEXT NOT NULL,
        teaser_points           TEXT,
        placed_at               TEXT NOT NULL,
        settled_at              TEXT
    )",
    "CREATE INDEX IF NOT EXISTS idx_bets_user ON bets(user_id)",
    "CREATE TABLE IF NOT EXISTS ledger_entries (
        seq                 INTEGER PRIMARY KEY AUTOINCREMENT,
        id                  TEXT NOT NULL UNIQUE,
        user_id             TEXT NOT NULL REFERENCES wallets(user_id),
        entry_type          TEXT NOT NULL,
        amount              TEXT NOT NULL,
        reference_bet_id    TEXT,
        balance_after       TEXT NOT NULL,
        timestamp           TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_ledger_user ON ledger_entries(user_id, seq)",
];

const BET_COLUMNS: &str = "id, user_id, bet_type, legs, stake, decimal_odds_combined, \
     potential_payout, actual_payout, status, teaser_points, placed_at, settled_at";

const ENTRY_COLUMNS: &str =
    "id, user_id, entry_type, amount, reference_bet_id, balance_after, timestamp";

#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if missing) the database at `url`, e.g. `sqlite://wager.db`
    /// or `sqlite::memory:`.
    pub async fn connect(url: &str) -> Result<Self, WagerError> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(map_sqlx)?
            .create_if_missing(true)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));

        // An in-memory database lives and dies with its single connection.
        let pool = if url.contains(":memory:") {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(Option::<Duration>::None)
                .max_lifetime(Option::<Duration>::None)
                .connect_with(options)
                .await
        } else {
            SqlitePoolOptions::new()
                .max_connections(5)
                .connect_with(options)
                .await
        }
        .map_err(map_sqlx)?;

        info!(url, "Connected to ledger database");
        Ok(Self { pool })
    }

    /// Create tables and indexes if they do not exist.
    pub async fn migrate(&self) -> Result<(), WagerError> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(map_sqlx)?;
        }
        debug!("Ledger schema ready");
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

// ---------------------------------------------------------------------------
// Error & value mapping
// ---------------------------------------------------------------------------

/// Busy / locked databases are contention, everything else is a storage fault.
fn map_sqlx(e: sqlx::Error) -> WagerError {
    match &e {
        sqlx::Error::Database(db) => {
            if matches!(db.code().as_deref(), Some("5" | "6" | "261" | "262" | "517")) {
                WagerError::ConcurrencyConflict(db.message().to_string())
            } else {
                WagerError::Storage(e.to_string())
            }
        }
        sqlx::Error::PoolTimedOut => {
            WagerError::ConcurrencyConflict("timed out waiting for a connection".to_string())
        }
        _ => WagerError::Storage(e.to_string()),
    }
}

fn corrupt(column: &str, detail: impl std::fmt::Display) -> WagerError {
    WagerError::Storage(format!("invalid {column} in database: {detail}"))
}

fn text(row: &SqliteRow, column: &str) -> Result<String, WagerError> {
    row.try_get::<String, _>(column).map_err(map_sqlx)
}

fn opt_text(row: &SqliteRow, column: &str) -> Result<Option<String>, WagerError> {
    row.try_get::<Option<String>, _>(column).map_err(map_sqlx)
}

fn decimal(row: &SqliteRow, column: &str) -> Result<Decimal, WagerError> {
    let raw = text(row, column)?;
    Decimal::from_str(&raw).map_err(|e| corrupt(column, e))
}

fn opt_decimal(row: &SqliteRow, column: &str) -> Result<Option<Decimal>, WagerError> {
    opt_text(row, column)?
        .map(|raw| Decimal::from_str(&raw).map_err(|e| corrupt(column, e)))
        .transpose()
}

fn parse_time(column: &str, raw: &str) -> Result<DateTime<Utc>, WagerError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| corrupt(column, e))
}

fn time(row: &SqliteRow, column: &str) -> Result<DateTime<Utc>, WagerError> {
    parse_time(column, &text(row, column)?)
}

fn uuid(column: &str, raw: &str) -> Result<Uuid, WagerError> {
    Uuid::parse_str(raw).map_err(|e| corrupt(column, e))
}

fn wallet_from_row(row: &SqliteRow) -> Result<WalletAccount, WagerError> {
    let limits: BettingLimits =
        serde_json::from_str(&text(row, "limits")?).map_err(|e| corrupt("limits", e))?;
    Ok(WalletAccount {
        user_id: text(row, "user_id")?,
        balance: decimal(row, "balance")?,
        limits,
        opened_at: time(row, "opened_at")?,
    })
}

fn bet_from_row(row: &SqliteRow) -> Result<Bet, WagerError> {
    let legs: Vec<Selection> =
        serde_json::from_str(&text(row, "legs")?).map_err(|e| corrupt("legs", e))?;
    Ok(Bet {
        id: uuid("id", &text(row, "id")?)?,
        user_id: text(row, "user_id")?,
        bet_type: text(row, "bet_type")?.parse::<BetType>().map_err(|e| corrupt("bet_type", e))?,
        legs,
        stake: decimal(row, "stake")?,
        decimal_odds_combined: decimal(row, "decimal_odds_combined")?,
        potential_payout: decimal(row, "potential_payout")?,
        actual_payout: opt_decimal(row, "actual_payout")?,
        status: text(row, "status")?.parse::<BetStatus>().map_err(|e| corrupt("status", e))?,
        teaser_points: opt_decimal(row, "teaser_points")?,
        placed_at: time(row, "placed_at")?,
        settled_at: opt_text(row, "settled_at")?
            .map(|raw| parse_time("settled_at", &raw))
            .transpose()?,
    })
}

fn entry_from_row(row: &SqliteRow) -> Result<LedgerEntry, WagerError> {
    Ok(LedgerEntry {
        id: uuid("id", &text(row, "id")?)?,
        user_id: text(row, "user_id")?,
        entry_type: text(row, "entry_type")?
            .parse::<LedgerEntryType>()
            .map_err(|e| corrupt("entry_type", e))?,
        amount: decimal(row, "amount")?,
        reference_bet_id: opt_text(row, "reference_bet_id")?
            .map(|raw| uuid("reference_bet_id", &raw))
            .transpose()?,
        balance_after: decimal(row, "balance_after")?,
        timestamp: time(row, "timestamp")?,
    })
}

// ---------------------------------------------------------------------------
// Transaction helpers
// ---------------------------------------------------------------------------

/// Take the write lock on a wallet row and read it back.
async fn lock_wallet(
    tx: &mut Transaction<'_, Sqlite>,
    user_id: &str,
) -> Result<WalletAccount, WagerError> {
    let touched = sqlx::query("UPDATE wallets SET balance = balance WHERE user_id = ?")
        .bind(user_id)
        .execute(&mut **tx)
        .await
        .map_err(map_sqlx)?
        .rows_affected();
    if touched == 0 {
        return Err(WagerError::UserNotFound(user_id.to_string()));
    }

    let row = sqlx::query("SELECT user_id, balance, limits, opened_at FROM wallets WHERE user_id = ?")
        .bind(user_id)
        .fetch_one(&mut **tx)
        .await
        .map_err(map_sqlx)?;
    wallet_from_row(&row)
}

async fn store_balance(
    tx: &mut Transaction<'_, Sqlite>,
    account: &WalletAccount,
) -> Result<(), WagerError> {
    sqlx::query("UPDATE wallets SET balance = ? WHERE user_id = ?")
        .bind(account.balance.to_string())
        .bind(&account.user_id)
        .execute(&mut **tx)
        .await
        .map(|_| ())
        .map_err(map_sqlx)
}

async fn insert_entry(
    tx: &mut Transaction<'_, Sqlite>,
    entry: &LedgerEntry,
) -> Result<(), WagerError> {
    sqlx::query(
        "INSERT INTO ledger_entries (id, user_id, entry_type, amount, reference_bet_id, balance_after, timestamp) \
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(entry.id.to_string())
    .bind(&entry.user_id)
    .bind(entry.entry_type.as_str())
    .bind(entry.amount.to_string())
    .bind(entry.reference_bet_id.map(|id| id.to_string()))
    .bind(entry.balance_after.to_string())
    .bind(entry.timestamp.to_rfc3339())
    .execute(&mut **tx)
    .await
    .map(|_| ())
    .map_err(map_sqlx)
}

async fn insert_bet(tx: &mut Transaction<'_, Sqlite>, bet: &Bet) -> Result<(), WagerError> {
    let legs = serde_json::to_string(&bet.legs).map_err(|e| WagerError::Storage(e.to_string()))?;
    sqlx::query(
        "INSERT INTO bets (id, user_id, bet_type, legs, stake, decimal_odds_combined, potential_payout, \
         actual_payout, status, teaser_points, placed_at, settled_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(bet.id.to_string())
    .bind(&bet.user_id)
    .bind(bet.bet_type.as_str())
    .bind(legs)
    .bind(bet.stake.to_string())
    .bind(bet.decimal_odds_combined.to_string())
    .bind(bet.potential_payout.to_string())
    .bind(bet.actual_payout.map(|d| d.to_string()))
    .bind(bet.status.as_str())
    .bind(bet.teaser_points.map(|d| d.to_string()))
    .bind(bet.placed_at.to_rfc3339())
    .bind(bet.settled_at.map(|t| t.to_rfc3339()))
    .execute(&mut **tx)
    .await
    .map(|_| ())
    .map_err(map_sqlx)
}

async fn store_settlement(tx: &mut Transaction<'_, Sqlite>, bet: &Bet) -> Result<(), WagerError> {
    sqlx::query("UPDATE bets SET status = ?, actual_payout = ?, settled_at = ? WHERE id = ? AND status = 'pending'")
        .bind(bet.status.as_str())
        .bind(bet.actual_payout.map(|d| d.to_string()))
        .bind(bet.settled_at.map(|t| t.to_rfc3339()))
        .bind(bet.id.to_string())
        .execute(&mut **tx)
        .await
        .map_err(map_sqlx)
        .and_then(|done| {
            if done.rows_affected() == 1 {
                Ok(())
            } else {
                Err(WagerError::ConcurrencyConflict(format!(
                    "bet {} changed during settlement",
                    bet.id
                )))
            }
        })
}

async fn stake_debits(
    tx: &mut Transaction<'_, Sqlite>,
    user_id: &str,
) -> Result<Vec<LedgerEntry>, WagerError> {
    let sql = format!(
        "SELECT {ENTRY_COLUMNS} FROM ledger_entries WHERE user_id = ? AND entry_type = 'stake_debit' ORDER BY seq"
    );
    sqlx::query(&sql)
        .bind(user_id)
        .fetch_all(&mut **tx)
        .await
        .map_err(map_sqlx)?
        .iter()
        .map(entry_from_row)
        .collect()
}

// ---------------------------------------------------------------------------
// LedgerStore
// ---------------------------------------------------------------------------

#[async_trait]
impl LedgerStore for SqliteStore {
    async fn open_account(
        &self,
        user_id: &str,
        opening_balance: Decimal,
        limits: BettingLimits,
    ) -> Result<WalletAccount, WagerError> {
        let now = Utc::now();
        let mut account = WalletAccount {
            user_id: user_id.to_string(),
            balance: Decimal::ZERO,
            limits,
            opened_at: now,
        };
        let limits_json =
            serde_json::to_string(&account.limits).map_err(|e| WagerError::Storage(e.to_string()))?;

        let mut tx = self.pool.begin().await.map_err(map_sqlx)?;
        let inserted = sqlx::query(
            "INSERT OR IGNORE INTO wallets (user_id, balance, limits, opened_at) VALUES (?, ?, ?, ?)",
        )
        .bind(user_id)
        .bind(Decimal::ZERO.to_string())
        .bind(limits_json)
        .bind(now.to_rfc3339())
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx)?
        .rows_affected();
        if inserted == 0 {
            return Err(WagerError::AccountExists(user_id.to_string()));
        }

        if opening_balance > Decimal::ZERO {
            let entry = post_entry(&mut account, LedgerEntryType::Deposit, opening_balance, None, now)?;
            insert_entry(&mut tx, &entry).await?;
            store_balance(&mut tx, &account).await?;
        }
        tx.commit().await.map_err(map_sqlx)?;
        Ok(account)
    }

    async fn account(&self, user_id: &str) -> Result<WalletAccount, WagerError> {
        let row = sqlx::query("SELECT user_id, balance, limits, opened_at FROM wallets WHERE user_id = ?")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx)?
            .ok_or_else(|| WagerError::UserNotFound(user_id.to_string()))?;
        wallet_from_row(&row)
    }

    async fn accounts(&self) -> Result<Vec<WalletAccount>, WagerError> {
        sqlx::query("SELECT user_id, balance, limits, opened_at FROM wallets ORDER BY user_id")
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx)?
            .iter()
            .map(wallet_from_row)
            .collect()
    }

    async fn set_limits(
        &self,
        user_id: &str,
        limits: BettingLimits,
    ) -> Result<WalletAccount, WagerError> {
        let limits_json =
            serde_json::to_string(&limits).map_err(|e| WagerError::Storage(e.to_string()))?;
        let touched = sqlx::query("UPDATE wallets SET limits = ? WHERE user_id = ?")
            .bind(limits_json)
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx)?
            .rows_affected();
        if touched == 0 {
            return Err(WagerError::UserNotFound(user_id.to_string()));
        }
        self.account(user_id).await
    }

    async fn bet(&self, bet_id: Uuid) -> Result<Bet, WagerError> {
        let sql = format!("SELECT {BET_COLUMNS} FROM bets WHERE id = ?");
        let row = sqlx::query(&sql)
            .bind(bet_id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx)?
            .ok_or(WagerError::BetNotFound(bet_id))?;
        bet_from_row(&row)
    }

    async fn bets_for_user(&self, user_id: &str) -> Result<Vec<Bet>, WagerError> {
        self.account(user_id).await?;
        let sql = format!("SELECT {BET_COLUMNS} FROM bets WHERE user_id = ? ORDER BY rowid");
        sqlx::query(&sql)
            .bind(user_id)
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx)?
            .iter()
            .map(bet_from_row)
            .collect()
    }

    async fn entries_for_user(&self, user_id: &str) -> Result<Vec<LedgerEntry>, WagerError> {
        self.account(user_id).await?;
        let sql = format!("SELECT {ENTRY_COLUMNS} FROM ledger_entries WHERE user_id = ? ORDER BY seq");
        sqlx::query(&sql)
            .bind(user_id)
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx)?
            .iter()
            .map(entry_from_row)
            .collect()
    }

    async fn transfer(
        &self,
        user_id: &str,
        entry_type: LedgerEntryType,
        amount: Decimal,
    ) -> Result<LedgerEntry, WagerError> {
        let signed = transfer_amount(entry_type, amount)?;
        let mut tx = self.pool.begin().await.map_err(map_sqlx)?;
        let mut account = lock_wallet(&mut tx, user_id).await?;
        let entry = post_entry(&mut account, entry_type, signed, None, Utc::now())?;
        insert_entry(&mut tx, &entry).await?;
        store_balance(&mut tx, &account).await?;
        tx.commit().await.map_err(map_sqlx)?;
        Ok(entry)
    }

    async fn place(&self, bet: Bet) -> Result<LedgerEntry, WagerError> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx)?;
        let mut account = lock_wallet(&mut tx, &bet.user_id).await?;

        let recent = RecentStakes::from_entries(&stake_debits(&mut tx, &bet.user_id).await?, bet.placed_at);
        authorize_placement(&account, &recent, &bet)?;

        let entry = post_entry(
            &mut account,
            LedgerEntryType::StakeDebit,
            -bet.stake,
            Some(bet.id),
            bet.placed_at,
        )?;
        insert_bet(&mut tx, &bet).await?;
        insert_entry(&mut tx, &entry).await?;
        store_balance(&mut tx, &account).await?;
        tx.commit().await.map_err(map_sqlx)?;

        debug!(user_id = %entry.user_id, balance = %entry.balance_after, "Stake debited");
        Ok(entry)
    }

    async fn resolve(&self, bet_id: Uuid, resolver: &Resolver<'_>) -> Result<ResolvedBet, WagerError> {
        let owner: String = sqlx::query("SELECT user_id FROM bets WHERE id = ?")
            .bind(bet_id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx)?
            .ok_or(WagerError::BetNotFound(bet_id))?
            .try_get("user_id")
            .map_err(map_sqlx)?;

        let mut tx = self.pool.begin().await.map_err(map_sqlx)?;
        let mut account = lock_wallet(&mut tx, &owner).await?;

        let sql = format!("SELECT {BET_COLUMNS} FROM bets WHERE id = ?");
        let row = sqlx::query(&sql)
            .bind(bet_id.to_string())
            .fetch_one(&mut *tx)
            .await
            .map_err(map_sqlx)?;
        let mut bet = bet_from_row(&row)?;

        let resolution = resolver(&bet)?;
        let entry = apply_resolution(&mut account, &mut bet, &resolution)?;
        store_settlement(&mut tx, &bet).await?;
        if let Some(e) = &entry {
            insert_entry(&mut tx, e).await?;
            store_balance(&mut tx, &account).await?;
        }
        tx.commit().await.map_err(map_sqlx)?;

        Ok(ResolvedBet {
            bet,
            entry,
            balance: account.balance,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
