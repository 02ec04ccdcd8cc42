//! Responsible-gaming limits.
//!
//! Enforces account suspension, a per-bet stake ceiling, and rolling
//! 24-hour / 7-day staking caps. Checked by the ledger while it holds the
//! wallet lock, so two concurrent bets cannot both slip under a cap.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::types::{LedgerEntry, LedgerEntryType, WagerError};

/// Per-account limits. `None` means uncapped.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BettingLimits {
    pub suspended: bool,
    pub per_bet_limit: Option<Decimal>,
    pub daily_limit: Option<Decimal>,
    pub weekly_limit: Option<Decimal>,
}

/// Stakes already placed inside the rolling windows.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RecentStakes {
    pub last_day: Decimal,
    pub last_week: Decimal,
}

impl RecentStakes {
    /// Sum stake debits newer than 24h / 7d before `now`.
    pub fn from_entries(entries: &[LedgerEntry], now: DateTime<Utc>) -> Self {
        let day_cutoff = now - Duration::days(1);
        let week_cutoff = now - Duration::days(7);
        let mut recent = RecentStakes::default();
        for entry in entries
            .iter()
            .filter(|e| e.entry_type == LedgerEntryType::StakeDebit)
        {
            let staked = entry.amount.abs();
            if entry.timestamp > week_cutoff {
                recent.last_week = recent.last_week.saturating_add(staked);
            }
            if entry.timestamp > day_cutoff {
                recent.last_day = recent.last_day.saturating_add(staked);
            }
        }
        recent
    }
}

impl BettingLimits {
    pub fn unlimited() -> Self {
        Self::default()
    }

    /// Approve a new stake against the limits, or explain which cap it breaks.
    pub fn check(&self, stake: Decimal, recent: &RecentStakes) -> Result<(), WagerError> {
        if self.suspended {
            return Err(WagerError::LimitExceeded(
                "betting privileges are suspended for this account".to_string(),
            ));
        }

        if let Some(limit) = self.per_bet_limit {
            if stake > limit {
                return Err(WagerError::LimitExceeded(format!(
                    "stake ${stake:.2} exceeds the per-bet limit of ${limit:.2}"
                )));
            }
        }

        if let Some(limit) = self.daily_limit {
            if exceeds(recent.last_day, stake, limit) {
                let remaining = limit.saturating_sub(recent.last_day).max(Decimal::ZERO);
                return Err(WagerError::LimitExceeded(format!(
                    "stake would exceed the daily limit of ${limit:.2} (remaining ${remaining:.2})"
                )));
            }
        }

        if let Some(limit) = self.weekly_limit {
            if exceeds(recent.last_week, stake, limit) {
                let remaining = limit.saturating_sub(recent.last_week).max(Decimal::ZERO);
                return Err(WagerError::LimitExceeded(format!(
                    "stake would exceed the weekly limit of ${limit:.2} (remaining ${remaining:.2})"
                )));
            }
        }

        debug!(stake = %stake, day = %recent.last_day, week = %recent.last_week, "Limits ok");
        Ok(())
    }
}

/// A total too large to represent is over any cap.
fn exceeds(already: Decimal, stake: Decimal, limit: Decimal) -> bool {
    already.checked_add(stake).map_or(true, |total| total > limit)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
