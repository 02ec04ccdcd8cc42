//! Shared types for the WAGER engine.
//!
//! These types form the data model used across all modules. Validation,
//! pricing, lifecycle and storage all speak in terms of `Selection`, `Bet`,
//! `WalletAccount` and `LedgerEntry`, so they live here to avoid circular
//! references between those modules.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::limits::BettingLimits;
use crate::odds::AmericanOdds;
use crate::rules::RuleViolation;

// ---------------------------------------------------------------------------
// Markets & selections
// ---------------------------------------------------------------------------

/// Market a selection is drawn from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Market {
    /// Moneyline: which side wins outright.
    H2h,
    Spreads,
    Totals,
    #[serde(alias = "player_props")]
    PlayerProp,
    #[serde(alias = "team_props")]
    TeamProp,
}

impl Market {
    pub const ALL: &'static [Market] = &[
        Market::H2h,
        Market::Spreads,
        Market::Totals,
        Market::PlayerProp,
        Market::TeamProp,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Market::H2h => "h2h",
            Market::Spreads => "spreads",
            Market::Totals => "totals",
            Market::PlayerProp => "player_prop",
            Market::TeamProp => "team_prop",
        }
    }

    /// Markets whose selections are meaningless without a line.
    pub fn requires_point(&self) -> bool {
        matches!(self, Market::Spreads | Market::Totals)
    }
}

impl fmt::Display for Market {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parse the wire spelling of a market (case-insensitive, plural props accepted).
impl std::str::FromStr for Market {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "h2h" | "moneyline" => Ok(Market::H2h),
            "spreads" | "spread" => Ok(Market::Spreads),
            "totals" | "total" => Ok(Market::Totals),
            "player_prop" | "player_props" => Ok(Market::PlayerProp),
            "team_prop" | "team_props" => Ok(Market::TeamProp),
            _ => Err(anyhow::anyhow!("Unknown market: {s}")),
        }
    }
}

/// Direction of a totals pick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TotalDirection {
    Over,
    Under,
}

impl TotalDirection {
    /// Read the direction out of a selected outcome label ("Over", "u", ...).
    pub fn from_outcome(outcome: &str) -> Option<Self> {
        match outcome.trim().to_lowercase().as_str() {
            "over" | "o" => Some(TotalDirection::Over),
            "under" | "u" => Some(TotalDirection::Under),
            _ => None,
        }
    }

    pub fn opposite(&self) -> Self {
        match self {
            TotalDirection::Over => TotalDirection::Under,
            TotalDirection::Under => TotalDirection::Over,
        }
    }
}

/// One wager selection, frozen from an odds snapshot at selection time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Selection {
    pub event_id: String,
    pub market: Market,
    /// Team name for h2h/spreads, "Over"/"Under" for totals, free text for props.
    pub selected_outcome: String,
    /// Line for spreads and totals.
    #[serde(default)]
    pub point: Option<Decimal>,
    /// Native (American) price.
    pub price: AmericanOdds,
    pub sport: String,
    /// Per-leg stake as submitted on the slip, if the slip carries one.
    #[serde(default)]
    pub stake: Option<Decimal>,
}

impl fmt::Display for Selection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {} {}", self.event_id, self.market, self.selected_outcome)?;
        if let Some(point) = self.point {
            write!(f, " {point}")?;
        }
        write!(f, " @ {}", self.price)
    }
}

impl Selection {
    /// Over/Under for a totals leg; `None` for other markets or unreadable labels.
    pub fn total_direction(&self) -> Option<TotalDirection> {
        if self.market != Market::Totals {
            return None;
        }
        TotalDirection::from_outcome(&self.selected_outcome)
    }

    /// Whether two legs name the same side (case-insensitive, whitespace-trimmed).
    pub fn same_outcome(&self, other: &Selection) -> bool {
        self.selected_outcome
            .trim()
            .eq_ignore_ascii_case(other.selected_outcome.trim())
    }
}

// ---------------------------------------------------------------------------
// Bet types & statuses
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BetType {
    #[serde(rename = "straight")]
    Straight,
    #[serde(rename = "parlay")]
    Parlay,
    /// Same-game parlay.
    #[serde(rename = "sgp")]
    Sgp,
    #[serde(rename = "teaser")]
    Teaser,
    #[serde(rename = "if-bet")]
    IfBet,
}

impl BetType {
    pub const ALL: &'static [BetType] = &[
        BetType::Straight,
        BetType::Parlay,
        BetType::Sgp,
        BetType::Teaser,
        BetType::IfBet,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BetType::Straight => "straight",
            BetType::Parlay => "parlay",
            BetType::Sgp => "sgp",
            BetType::Teaser => "teaser",
            BetType::IfBet => "if-bet",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            BetType::Straight => "Straight",
            BetType::Parlay => "Parlay",
            BetType::Sgp => "Same Game Parlay",
            BetType::Teaser => "Teaser",
            BetType::IfBet => "If Bet",
        }
    }
}

impl fmt::Display for BetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for BetType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "straight" | "single" => Ok(BetType::Straight),
            "parlay" => Ok(BetType::Parlay),
            "sgp" | "same-game-parlay" => Ok(BetType::Sgp),
            "teaser" => Ok(BetType::Teaser),
            "if-bet" | "if_bet" | "ifbet" => Ok(BetType::IfBet),
            _ => Err(anyhow::anyhow!("Unknown bet type: {s}")),
        }
    }
}

/// Bet lifecycle status. `Pending` is the only non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BetStatus {
    Pending,
    Won,
    Lost,
    Cancelled,
    Pushed,
}

impl BetStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, BetStatus::Pending)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BetStatus::Pending => "pending",
            BetStatus::Won => "won",
            BetStatus::Lost => "lost",
            BetStatus::Cancelled => "cancelled",
            BetStatus::Pushed => "pushed",
        }
    }
}

impl fmt::Display for BetStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for BetStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pending" => Ok(BetStatus::Pending),
            "won" => Ok(BetStatus::Won),
            "lost" => Ok(BetStatus::Lost),
            "cancelled" | "canceled" => Ok(BetStatus::Cancelled),
            "pushed" | "push" => Ok(BetStatus::Pushed),
            _ => Err(anyhow::anyhow!("Unknown bet status: {s}")),
        }
    }
}

/// Outcome delivered by the external settlement trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettlementOutcome {
    Won,
    Lost,
    Pushed,
    Cancelled,
}

impl SettlementOutcome {
    /// Terminal status this outcome moves a pending bet into.
    pub fn status(&self) -> BetStatus {
        match self {
            SettlementOutcome::Won => BetStatus::Won,
            SettlementOutcome::Lost => BetStatus::Lost,
            SettlementOutcome::Pushed => BetStatus::Pushed,
            SettlementOutcome::Cancelled => BetStatus::Cancelled,
        }
    }
}

impl fmt::Display for SettlementOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.status().as_str())
    }
}

/// Result of a single leg, supplied optionally at settlement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LegResult {
    Won,
    Lost,
    Pushed,
}

// ---------------------------------------------------------------------------
// Bet
// ---------------------------------------------------------------------------

/// A placed wager. Owns its legs; never deleted, only moved to a terminal status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bet {
    pub id: Uuid,
    pub user_id: String,
    pub bet_type: BetType,
    pub legs: Vec<Selection>,
    pub stake: Decimal,
    pub decimal_odds_combined: Decimal,
    pub potential_payout: Decimal,
    pub actual_payout: Option<Decimal>,
    pub status: BetStatus,
    pub teaser_points: Option<Decimal>,
    pub placed_at: DateTime<Utc>,
    pub settled_at: Option<DateTime<Utc>>,
}

impl fmt::Display for Bet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} ({} leg{}) stake=${:.2} odds={:.4} to_win=${:.2} [{}]",
            self.id,
            self.bet_type,
            self.legs.len(),
            if self.legs.len() == 1 { "" } else { "s" },
            self.stake,
            self.decimal_odds_combined,
            self.potential_payout,
            self.status,
        )
    }
}

impl Bet {
    /// Distinct event ids across the legs, in leg order.
    pub fn event_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = Vec::new();
        for leg in &self.legs {
            if !ids.contains(&leg.event_id.as_str()) {
                ids.push(leg.event_id.as_str());
            }
        }
        ids
    }

    pub fn is_settled(&self) -> bool {
        self.status.is_terminal()
    }

    /// Profit over stake the bet would make if it wins.
    pub fn potential_profit(&self) -> Decimal {
        self.potential_payout - self.stake
    }
}

// ---------------------------------------------------------------------------
// Wallet & ledger
// ---------------------------------------------------------------------------

/// Cached wallet balance. Only the ledger writes to `balance`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalletAccount {
    pub user_id: String,
    pub balance: Decimal,
    pub limits: BettingLimits,
    pub opened_at: DateTime<Utc>,
}

impl fmt::Display for WalletAccount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} balance=${:.2}", self.user_id, self.balance)?;
        if self.limits.suspended {
            write!(f, " (suspended)")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerEntryType {
    StakeDebit,
    PayoutCredit,
    RefundCredit,
    Deposit,
    Withdrawal,
}

impl LedgerEntryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LedgerEntryType::StakeDebit => "stake_debit",
            LedgerEntryType::PayoutCredit => "payout_credit",
            LedgerEntryType::RefundCredit => "refund_credit",
            LedgerEntryType::Deposit => "deposit",
            LedgerEntryType::Withdrawal => "withdrawal",
        }
    }

    /// Whether entries of this type take money out of the wallet.
    pub fn is_debit(&self) -> bool {
        matches!(self, LedgerEntryType::StakeDebit | LedgerEntryType::Withdrawal)
    }
}

impl fmt::Display for LedgerEntryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for LedgerEntryType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stake_debit" => Ok(LedgerEntryType::StakeDebit),
            "payout_credit" => Ok(LedgerEntryType::PayoutCredit),
            "refund_credit" => Ok(LedgerEntryType::RefundCredit),
            "deposit" => Ok(LedgerEntryType::Deposit),
            "withdrawal" => Ok(LedgerEntryType::Withdrawal),
            _ => Err(anyhow::anyhow!("Unknown ledger entry type: {s}")),
        }
    }
}

/// Append-only audit record of one balance movement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: Uuid,
    pub user_id: String,
    pub entry_type: LedgerEntryType,
    /// Signed: negative for debits.
    pub amount: Decimal,
    pub reference_bet_id: Option<Uuid>,
    pub balance_after: Decimal,
    pub timestamp: DateTime<Utc>,
}

impl fmt::Display for LedgerEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {:+.2} -> ${:.2}",
            self.timestamp.format("%Y-%m-%d %H:%M:%S"),
            self.entry_type,
            self.amount,
            self.balance_after,
        )
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

fn join_violations(violations: &[RuleViolation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Domain-specific error types for WAGER.
///
/// Every variant has a stable `kind()` code so a service layer can map it
/// without string matching.
#[derive(Debug, thiserror::Error)]
pub enum WagerError {
    #[error("Bet validation failed: {}", join_violations(.0))]
    Validation(Vec<RuleViolation>),

    #[error("Invalid odds: {0}")]
    InvalidOdds(String),

    #[error("Insufficient funds: need ${needed:.2}, have ${available:.2}")]
    InsufficientFunds { needed: Decimal, available: Decimal },

    #[error("Bet {bet_id} is locked: cancellation closed at {locked_at}")]
    BetLocked {
        bet_id: Uuid,
        locked_at: DateTime<Utc>,
    },

    #[error("Betting is closed for event {event_id} (closed at {closed_at})")]
    BettingClosed {
        event_id: String,
        closed_at: DateTime<Utc>,
    },

    #[error("Bet not found: {0}")]
    BetNotFound(Uuid),

    #[error("User not found: {0}")]
    UserNotFound(String),

    #[error("Event not found: {0}")]
    EventNotFound(String),

    #[error("Bet {bet_id} is already settled ({status})")]
    AlreadySettled { bet_id: Uuid, status: BetStatus },

    #[error("Concurrency conflict: {0}")]
    ConcurrencyConflict(String),

    #[error("Unsupported teaser configuration: {sport} {points} points, {legs} legs")]
    UnsupportedTeaserConfiguration {
        sport: String,
        points: Decimal,
        legs: usize,
    },

    #[error("Betting limit exceeded: {0}")]
    LimitExceeded(String),

    #[error("Account already exists: {0}")]
    AccountExists(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl WagerError {
    /// Stable machine-readable error code.
    pub fn kind(&self) -> &'static str {
        match self {
            WagerError::Validation(_) => "validation_error",
            WagerError::InvalidOdds(_) => "invalid_odds",
            WagerError::InsufficientFunds { .. } => "insufficient_funds",
            WagerError::BetLocked { .. } => "bet_locked",
            WagerError::BettingClosed { .. } => "betting_closed",
            WagerError::BetNotFound(_) => "bet_not_found",
            WagerError::UserNotFound(_) => "user_not_found",
            WagerError::EventNotFound(_) => "event_not_found",
            WagerError::AlreadySettled { .. } => "already_settled",
            WagerError::ConcurrencyConflict(_) => "concurrency_conflict",
            WagerError::UnsupportedTeaserConfiguration { .. } => "unsupported_teaser_configuration",
            WagerError::LimitExceeded(_) => "limit_exceeded",
            WagerError::AccountExists(_) => "account_exists",
            WagerError::Storage(_) => "storage_error",
        }
    }

    /// Only lock contention is safe to retry with fresh balance data.
    pub fn is_retryable(&self) -> bool {
        matches!(self, WagerError::ConcurrencyConflict(_))
    }

    /// Rule violations carried by a validation error.
    pub fn violations(&self) -> &[RuleViolation] {
        match self {
            WagerError::Validation(v) => v,
            _ => &[],
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn leg(market: Market, outcome: &str) -> Selection {
        Selection {
            event_id: "evt-1".to_string(),
            market,
            selected_outcome: outcome.to_string(),
            point: None,
            price: AmericanOdds::new(-110),
            sport: "basketball".to_string(),
            stake: None,
        }
    }

    #[test]
    fn test_market_wire_names() {
        let m: Market = serde_json::from_str("\"player_props\"").unwrap();
        assert_eq!(m, Market::PlayerProp);
        assert_eq!(serde_json::to_string(&Market::H2h).unwrap(), "\"h2h\"");
        assert_eq!("Team_Props".parse::<Market>().unwrap(), Market::TeamProp);
        assert!("corners".parse::<Market>().is_err());
    }

    #[test]
    fn test_bet_type_if_bet_spelling() {
        assert_eq!(serde_json::to_string(&BetType::IfBet).unwrap(), "\"if-bet\"");
        let t: BetType = serde_json::from_str("\"sgp\"").unwrap();
        assert_eq!(t, BetType::Sgp);
        assert_eq!("if_bet".parse::<BetType>().unwrap(), BetType::IfBet);
        assert_eq!(BetType::Sgp.display_name(), "Same Game Parlay");
    }

    #[test]
    fn test_status_terminality() {
        assert!(!BetStatus::Pending.is_terminal());
        for s in [BetStatus::Won, BetStatus::Lost, BetStatus::Cancelled, BetStatus::Pushed] {
            assert!(s.is_terminal());
            assert_eq!(s.as_str().parse::<BetStatus>().unwrap(), s);
        }
        assert_eq!(SettlementOutcome::Pushed.status(), BetStatus::Pushed);
    }

    #[test]
    fn test_total_direction_from_outcome() {
        assert_eq!(leg(Market::Totals, "Over").total_direction(), Some(TotalDirection::Over));
        assert_eq!(leg(Market::Totals, " under ").total_direction(), Some(TotalDirection::Under));
        assert_eq!(leg(Market::H2h, "Over").total_direction(), None);
        assert_eq!(TotalDirection::Over.opposite(), TotalDirection::Under);
    }

    #[test]
    fn test_same_outcome_ignores_case() {
        assert!(leg(Market::H2h, "Lakers").same_outcome(&leg(Market::Spreads, "lakers ")));
        assert!(!leg(Market::H2h, "Lakers").same_outcome(&leg(Market::H2h, "Celtics")));
    }

    #[test]
    fn test_entry_type_roundtrip_and_direction() {
        for t in [
            LedgerEntryType::StakeDebit,
            LedgerEntryType::PayoutCredit,
            LedgerEntryType::RefundCredit,
            LedgerEntryType::Deposit,
            LedgerEntryType::Withdrawal,
        ] {
            assert_eq!(t.as_str().parse::<LedgerEntryType>().unwrap(), t);
        }
        assert!(LedgerEntryType::StakeDebit.is_debit());
        assert!(!LedgerEntryType::RefundCredit.is_debit());
    }

    #[test]
    fn test_wager_error_display_and_kind() {
        let e = WagerError::InsufficientFunds {
            needed: dec!(10),
            available: dec!(5),
        };
        assert!(format!("{e}").contains("10.00"));
        assert!(format!("{e}").contains("5.00"));
        assert_eq!(e.kind(), "insufficient_funds");
        assert!(!e.is_retryable());

        let e = WagerError::ConcurrencyConflict("database is locked".into());
        assert!(e.is_retryable());

        let e = WagerError::Validation(vec![RuleViolation::NoSelections, RuleViolation::MissingTeaserPoints]);
        assert_eq!(e.kind(), "validation_error");
        assert_eq!(e.violations().len(), 2);
        assert!(format!("{e}").contains("; "));
    }
}
