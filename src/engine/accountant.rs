//! Accountant: ledger audit and per-user betting statistics.
//!
//! Recomputes a wallet from its ledger entries and checks it against the
//! cached balance, and summarises a user's bet history.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::payout::round_cents;
use crate::types::{Bet, BetStatus, LedgerEntry, WalletAccount};

// ---------------------------------------------------------------------------
// Ledger audit
// ---------------------------------------------------------------------------

/// Result of replaying a user's ledger.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LedgerAudit {
    pub user_id: String,
    pub cached_balance: Decimal,
    pub ledger_sum: Decimal,
    pub entries: usize,
    /// First entry whose `balance_after` disagrees with the running sum.
    pub first_divergence: Option<Uuid>,
    pub is_consistent: bool,
}

// ---------------------------------------------------------------------------
// User statistics
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct UserStats {
    pub total: usize,
    pub pending: usize,
    pub won: usize,
    pub lost: usize,
    pub pushed: usize,
    pub cancelled: usize,
    /// Percentage of decided (won + lost) bets that won, to 2 dp.
    pub win_rate: Decimal,
    /// Stakes on every bet that was not cancelled.
    pub total_wagered: Decimal,
    /// Credits from won and pushed bets.
    pub total_returned: Decimal,
    /// Σ (actual payout − stake) over settled, non-cancelled bets.
    pub net_profit: Decimal,
}

// ---------------------------------------------------------------------------
// Accountant
// ---------------------------------------------------------------------------

pub struct Accountant;

impl Accountant {
    /// Replay `entries` (posting order) and compare with the cached balance.
    pub fn audit(account: &WalletAccount, entries: &[LedgerEntry]) -> LedgerAudit {
        let mut running = Decimal::ZERO;
        let mut first_divergence = None;
        for entry in entries {
            running += entry.amount;
            if first_divergence.is_none() && entry.balance_after != running {
                first_divergence = Some(entry.id);
            }
        }

        let is_consistent = first_divergence.is_none() && running == account.balance;
        let audit = LedgerAudit {
            user_id: account.user_id.clone(),
            cached_balance: account.balance,
            ledger_sum: running,
            entries: entries.len(),
            first_divergence,
            is_consistent,
        };

        if is_consistent {
            info!(
                user_id = %audit.user_id,
                balance = format!("${:.2}", audit.cached_balance),
                entries = audit.entries,
                "Ledger verified"
            );
        } else {
            warn!(
                user_id = %audit.user_id,
                cached = format!("${:.2}", audit.cached_balance),
                ledger = format!("${:.2}", audit.ledger_sum),
                divergence = ?audit.first_divergence,
                "Ledger mismatch"
            );
        }

        audit
    }

    pub fn stats(bets: &[Bet]) -> UserStats {
        let mut stats = UserStats {
            total: bets.len(),
            ..Default::default()
        };

        for bet in bets {
            match bet.status {
                BetStatus::Pending => stats.pending += 1,
                BetStatus::Won => stats.won += 1,
                BetStatus::Lost => stats.lost += 1,
                BetStatus::Pushed => stats.pushed += 1,
                BetStatus::Cancelled => stats.cancelled += 1,
            }

            if bet.status == BetStatus::Cancelled {
                continue;
            }
            stats.total_wagered += bet.stake;

            if bet.status.is_terminal() {
                let paid = bet.actual_payout.unwrap_or(Decimal::ZERO);
                stats.total_returned += paid;
                stats.net_profit += paid - bet.stake;
            }
        }

        let decided = stats.won + stats.lost;
        if decided > 0 {
            stats.win_rate =
                round_cents(Decimal::from(stats.won) * dec!(100) / Decimal::from(decided));
        }

        stats
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::limits::BettingLimits;
    use crate::types::{BetType, LedgerEntryType};
    use chrono::Utc;

    fn make_account(balance: Decimal) -> WalletAccount {
        WalletAccount {
            user_id: "u1".to_string(),
            balance,
            limits: BettingLimits::default(),
            opened_at: Utc::now(),
        }
    }

    fn make_entry(entry_type: LedgerEntryType, amount: Decimal, balance_after: Decimal) -> LedgerEntry {
        LedgerEntry {
            id: Uuid::new_v4(),
            user_id: "u1".to_string(),
            entry_type,
            amount,
            reference_bet_id: None,
            balance_after,
            timestamp: Utc::now(),
        }
    }

    fn make_bet(status: BetStatus, stake: Decimal, actual_payout: Option<Decimal>) -> Bet {
        Bet {
            id: Uuid::new_v4(),
            user_id: "u1".to_string(),
            bet_type: BetType::Straight,
            legs: Vec::new(),
            stake,
            decimal_odds_combined: dec!(2),
            potential_payout: stake * dec!(2),
            actual_payout,
            status,
            teaser_points: None,
            placed_at: Utc::now(),
            settled_at: None,
        }
    }

    #[test]
    fn test_audit_consistent_ledger() {
        let entries = vec![
            make_entry(LedgerEntryType::Deposit, dec!(100), dec!(100)),
            make_entry(LedgerEntryType::StakeDebit, dec!(-25), dec!(75)),
            make_entry(LedgerEntryType::PayoutCredit, dec!(50), dec!(125)),
        ];
        let audit = Accountant::audit(&make_account(dec!(125)), &entries);
        assert!(audit.is_consistent);
        assert_eq!(audit.ledger_sum, dec!(125));
        assert_eq!(audit.entries, 3);
    }

    #[test]
    fn test_audit_detects_cached_balance_drift() {
        let entries = vec![make_entry(LedgerEntryType::Deposit, dec!(100), dec!(100))];
        let audit = Accountant::audit(&make_account(dec!(90)), &entries);
        assert!(!audit.is_consistent);
        assert!(audit.first_divergence.is_none());
    }

    #[test]
    fn test_audit_detects_bad_running_total() {
        let bad = make_entry(LedgerEntryType::StakeDebit, dec!(-10), dec!(95));
        let bad_id = bad.id;
        let entries = vec![make_entry(LedgerEntryType::Deposit, dec!(100), dec!(100)), bad];
        let audit = Accountant::audit(&make_account(dec!(90)), &entries);
        assert!(!audit.is_consistent);
        assert_eq!(audit.first_divergence, Some(bad_id));
    }

    #[test]
    fn test_stats() {
        let bets = vec![
            make_bet(BetStatus::Won, dec!(10), Some(dec!(25))),
            make_bet(BetStatus::Lost, dec!(20), Some(Decimal::ZERO)),
            make_bet(BetStatus::Lost, dec!(5), Some(Decimal::ZERO)),
            make_bet(BetStatus::Pushed, dec!(8), Some(dec!(8))),
            make_bet(BetStatus::Cancelled, dec!(50), Some(dec!(50))),
            make_bet(BetStatus::Pending, dec!(4), None),
        ];
        let stats = Accountant::stats(&bets);
        assert_eq!(stats.total, 6);
        assert_eq!(stats.pending, 1);
        assert_eq!(stats.cancelled, 1);
        assert_eq!(stats.win_rate, dec!(33.33));
        assert_eq!(stats.total_wagered, dec!(47));
        assert_eq!(stats.total_returned, dec!(33));
        assert_eq!(stats.net_profit, dec!(-10));
    }

    #[test]
    fn test_stats_empty() {
        let stats = Accountant::stats(&[]);
        assert_eq!(stats.total, 0);
        assert_eq!(stats.win_rate, Decimal::ZERO);
    }
}
