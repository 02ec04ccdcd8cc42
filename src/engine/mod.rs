//! Betting engine: the public face of WAGER.
//!
//! Wires validation, pricing, the lifecycle machine and the ledger together.
//! Every call is a self-contained request; all state lives in the injected
//! `LedgerStore` and `EventSource`.

pub mod accountant;
pub mod events;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::lifecycle::{self, CancellationWindow};
use crate::limits::BettingLimits;
use crate::odds::OddsNormalizer;
use crate::payout::{PayoutCalculator, PayoutQuote, TeaserTable};
use crate::rules::{BetOptions, BetValidator, RuleBook, RuleViolation, RuleWarning, StakeBounds, ValidationReport};
use crate::storage::LedgerStore;
use crate::types::{
    Bet, BetStatus, BetType, LedgerEntry, LedgerEntryType, LegResult, Selection,
    SettlementOutcome, WagerError, WalletAccount,
};
use accountant::{Accountant, LedgerAudit, UserStats};
use events::{EventSource, EventStatus};

// ---------------------------------------------------------------------------
// Receipts
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlacementReceipt {
    pub bet_id: Uuid,
    pub new_balance: Decimal,
    pub potential_payout: Decimal,
    /// Soft findings from validation (e.g. uncommon SGP combinations).
    pub warnings: Vec<RuleWarning>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SettlementReceipt {
    pub bet_id: Uuid,
    pub status: BetStatus,
    pub actual_payout: Decimal,
    pub new_balance: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CancellationReceipt {
    pub bet_id: Uuid,
    pub refund_amount: Decimal,
    pub new_balance: Decimal,
}

/// Bet history filter. Empty filter returns everything.
#[derive(Debug, Clone, Default)]
pub struct BetFilter {
    pub status: Option<BetStatus>,
    pub bet_type: Option<BetType>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

impl BetFilter {
    fn matches(&self, bet: &Bet) -> bool {
        self.status.map_or(true, |s| bet.status == s)
            && self.bet_type.map_or(true, |t| bet.bet_type == t)
            && self.since.map_or(true, |t| bet.placed_at >= t)
            && self.until.map_or(true, |t| bet.placed_at < t)
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

pub struct BettingEngine {
    validator: BetValidator,
    payout: PayoutCalculator,
    window: CancellationWindow,
    default_limits: BettingLimits,
    store: Arc<dyn LedgerStore>,
    events: Arc<dyn EventSource>,
}

impl BettingEngine {
    pub fn new(
        config: &EngineConfig,
        default_limits: BettingLimits,
        store: Arc<dyn LedgerStore>,
        events: Arc<dyn EventSource>,
    ) -> Self {
        let odds = OddsNormalizer::new(config.max_abs_odds);
        let teasers = TeaserTable::default();
        let stakes = StakeBounds {
            min: config.min_stake,
            max: config.max_stake,
        };
        Self {
            validator: BetValidator::new(RuleBook::default(), stakes, odds, teasers.clone()),
            payout: PayoutCalculator::new(odds, teasers),
            window: CancellationWindow::from_minutes(config.cancel_buffer_mins),
            default_limits,
            store,
            events,
        }
    }

    // -- Validation & pricing ------------------------------------------------

    pub fn validate_betting_request(
        &self,
        selections: &[Selection],
        bet_type: BetType,
        options: &BetOptions,
    ) -> ValidationReport {
        self.validator.validate(selections, bet_type, options)
    }

    pub fn calculate_payout(
        &self,
        bet_type: BetType,
        legs: &[Selection],
        stake: Decimal,
        options: &BetOptions,
    ) -> Result<PayoutQuote, WagerError> {
        self.payout.quote(bet_type, legs, stake, options.teaser_points)
    }

    // -- Accounts ------------------------------------------------------------

    pub async fn open_account(
        &self,
        user_id: &str,
        opening_balance: Decimal,
    ) -> Result<WalletAccount, WagerError> {
        if !opening_balance.is_zero() {
            check_amount(opening_balance)?;
        }
        let account = self
            .store
            .open_account(user_id, opening_balance, self.default_limits.clone())
            .await?;
        info!(user_id, balance = format!("${:.2}", account.balance), "Account opened");
        Ok(account)
    }

    pub async fn deposit(&self, user_id: &str, amount: Decimal) -> Result<LedgerEntry, WagerError> {
        check_amount(amount)?;
        let entry = self.store.transfer(user_id, LedgerEntryType::Deposit, amount).await?;
        info!(
            user_id,
            amount = format!("${:.2}", amount),
            balance = format!("${:.2}", entry.balance_after),
            "Deposit"
        );
        Ok(entry)
    }

    pub async fn withdraw(&self, user_id: &str, amount: Decimal) -> Result<LedgerEntry, WagerError> {
        check_amount(amount)?;
        let entry = self
            .store
            .transfer(user_id, LedgerEntryType::Withdrawal, amount)
            .await?;
        info!(
            user_id,
            amount = format!("${:.2}", amount),
            balance = format!("${:.2}", entry.balance_after),
            "Withdrawal"
        );
        Ok(entry)
    }

    pub async fn set_limits(
        &self,
        user_id: &str,
        limits: BettingLimits,
    ) -> Result<WalletAccount, WagerError> {
        let account = self.store.set_limits(user_id, limits).await?;
        info!(user_id, limits = ?account.limits, "Betting limits updated");
        Ok(account)
    }

    pub async fn account(&self, user_id: &str) -> Result<WalletAccount, WagerError> {
        self.store.account(user_id).await
    }

    // -- Placement -----------------------------------------------------------

    /// Validate, price and atomically place a bet.
    pub async fn place_bet(
        &self,
        user_id: &str,
        bet_type: BetType,
        legs: Vec<Selection>,
        stake: Decimal,
        teaser_points: Option<Decimal>,
    ) -> Result<PlacementReceipt, WagerError> {
        let options = BetOptions {
            stake: Some(stake),
            teaser_points,
        };
        let report = self.validator.validate(&legs, bet_type, &options);
        if !report.is_valid {
            warn!(
                user_id,
                bet_type = %bet_type,
                errors = ?report.error_messages(),
                "Bet rejected by rules"
            );
            return Err(WagerError::Validation(report.errors));
        }

        let quote = self.payout.quote(bet_type, &legs, stake, teaser_points)?;

        let now = Utc::now();
        for event_id in distinct_events(&legs) {
            self.ensure_betting_open(event_id, now).await?;
        }

        let bet = Bet {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            bet_type,
            legs,
            stake,
            decimal_odds_combined: quote.combined_decimal_odds,
            potential_payout: quote.potential_payout,
            actual_payout: None,
            status: BetStatus::Pending,
            teaser_points: if bet_type == BetType::Teaser { teaser_points } else { None },
            placed_at: now,
            settled_at: None,
        };
        let bet_id = bet.id;

        let entry = self.store.place(bet).await.map_err(|e| {
            warn!(user_id, stake = %stake, error = %e, "Placement failed");
            e
        })?;

        info!(
            bet_id = %bet_id,
            user_id,
            bet_type = %bet_type,
            stake = format!("${:.2}", stake),
            to_win = format!("${:.2}", quote.potential_payout),
            balance = format!("${:.2}", entry.balance_after),
            "Bet placed"
        );

        Ok(PlacementReceipt {
            bet_id,
            new_balance: entry.balance_after,
            potential_payout: quote.potential_payout,
            warnings: report.warnings,
        })
    }

    // -- Settlement ----------------------------------------------------------

    /// Move a pending bet to its terminal status and credit the wallet.
    ///
    /// `leg_results`, when given, must have one entry per leg; pushed legs are
    /// dropped from the payout.
    pub async fn settle_bet(
        &self,
        bet_id: Uuid,
        outcome: SettlementOutcome,
        leg_results: Option<Vec<LegResult>>,
    ) -> Result<SettlementReceipt, WagerError> {
        let bet = self.store.bet(bet_id).await?;
        if bet.status.is_terminal() {
            warn!(bet_id = %bet_id, status = %bet.status, "Settlement of settled bet refused");
            return Err(WagerError::AlreadySettled {
                bet_id,
                status: bet.status,
            });
        }

        let cancel_locks_at = if outcome == SettlementOutcome::Cancelled {
            Some(self.cancel_locks_at(&bet).await?)
        } else {
            None
        };

        let now = Utc::now();
        let payout = &self.payout;
        let results = leg_results.as_deref();
        let resolver = |b: &Bet| lifecycle::resolve(b, outcome, results, payout, cancel_locks_at, now);

        let resolved = self.store.resolve(bet_id, &resolver).await.map_err(|e| {
            warn!(bet_id = %bet_id, outcome = %outcome, error = %e, "Settlement failed");
            e
        })?;

        let actual_payout = resolved.bet.actual_payout.unwrap_or(Decimal::ZERO);
        info!(
            bet_id = %bet_id,
            user_id = %resolved.bet.user_id,
            status = %resolved.bet.status,
            payout = format!("${:.2}", actual_payout),
            balance = format!("${:.2}", resolved.balance),
            "Bet settled"
        );

        Ok(SettlementReceipt {
            bet_id,
            status: resolved.bet.status,
            actual_payout,
            new_balance: resolved.balance,
        })
    }

    /// User-initiated cancellation: full refund while the window is open.
    pub async fn cancel_bet(&self, bet_id: Uuid) -> Result<CancellationReceipt, WagerError> {
        let receipt = self
            .settle_bet(bet_id, SettlementOutcome::Cancelled, None)
            .await?;
        Ok(CancellationReceipt {
            bet_id,
            refund_amount: receipt.actual_payout,
            new_balance: receipt.new_balance,
        })
    }

    // -- History & audit -----------------------------------------------------

    pub async fn bet(&self, bet_id: Uuid) -> Result<Bet, WagerError> {
        self.store.bet(bet_id).await
    }

    /// Matching bets, newest first.
    pub async fn bet_history(&self, user_id: &str, filter: &BetFilter) -> Result<Vec<Bet>, WagerError> {
        let mut bets: Vec<Bet> = self
            .store
            .bets_for_user(user_id)
            .await?
            .into_iter()
            .filter(|b| filter.matches(b))
            .collect();
        bets.reverse();
        bets.sort_by(|a, b| b.placed_at.cmp(&a.placed_at));
        if let Some(limit) = filter.limit {
            bets.truncate(limit);
        }
        Ok(bets)
    }

    pub async fn ledger(&self, user_id: &str) -> Result<Vec<LedgerEntry>, WagerError> {
        self.store.entries_for_user(user_id).await
    }

    /// Replay the ledger against the cached balance. Meaningful when no
    /// operation for the user is in flight.
    pub async fn verify_ledger(&self, user_id: &str) -> Result<LedgerAudit, WagerError> {
        let account = self.store.account(user_id).await?;
        let entries = self.store.entries_for_user(user_id).await?;
        Ok(Accountant::audit(&account, &entries))
    }

    /// Audit every account in the store.
    pub async fn verify_all(&self) -> Result<Vec<LedgerAudit>, WagerError> {
        let mut audits = Vec::new();
        for account in self.store.accounts().await? {
            let entries = self.store.entries_for_user(&account.user_id).await?;
            audits.push(Accountant::audit(&account, &entries));
        }
        Ok(audits)
    }

    pub async fn user_stats(&self, user_id: &str) -> Result<UserStats, WagerError> {
        let bets = self.store.bets_for_user(user_id).await?;
        Ok(Accountant::stats(&bets))
    }

    // -- Event checks --------------------------------------------------------

    async fn ensure_betting_open(&self, event_id: &str, now: DateTime<Utc>) -> Result<(), WagerError> {
        let event = self
            .events
            .event(event_id)
            .await?
            .ok_or_else(|| WagerError::EventNotFound(event_id.to_string()))?;
        let closed_at = self.window.locks_at(event.commence_time);
        if event.status != EventStatus::Scheduled || !self.window.is_open(event.commence_time, now) {
            warn!(event_id, status = ?event.status, closed_at = %closed_at, "Betting closed");
            return Err(WagerError::BettingClosed {
                event_id: event_id.to_string(),
                closed_at,
            });
        }
        Ok(())
    }

    /// Lock instant for cancelling `bet`: the buffer before its earliest event.
    async fn cancel_locks_at(&self, bet: &Bet) -> Result<DateTime<Utc>, WagerError> {
        let mut earliest: Option<DateTime<Utc>> = None;
        for event_id in bet.event_ids() {
            let event = self
                .events
                .event(event_id)
                .await?
                .ok_or_else(|| WagerError::EventNotFound(event_id.to_string()))?;
            earliest = Some(earliest.map_or(event.commence_time, |t| t.min(event.commence_time)));
        }
        earliest
            .map(|t| self.window.locks_at(t))
            .ok_or_else(|| WagerError::Validation(vec![RuleViolation::NoSelections]))
    }
}

fn distinct_events(legs: &[Selection]) -> Vec<&str> {
    let mut ids: Vec<&str> = Vec::new();
    for leg in legs {
        if !ids.contains(&leg.event_id.as_str()) {
            ids.push(leg.event_id.as_str());
        }
    }
    ids
}

/// Money amounts must be positive with at most two decimal places.
fn check_amount(amount: Decimal) -> Result<(), WagerError> {
    if amount <= Decimal::ZERO || amount.normalize().scale() > 2 {
        return Err(WagerError::Validation(vec![RuleViolation::InvalidAmount { amount }]));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
