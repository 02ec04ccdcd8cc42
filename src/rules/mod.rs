//! Bet-type rule validation.
//!
//! Decides whether a list of selections forms a legal bet of the requested
//! type. The validator is total: every leg and every rule is evaluated and
//! all violations are reported together, so a client sees every problem in
//! one round trip.

pub mod conflict;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::debug;

use crate::odds::{AmericanOdds, OddsNormalizer};
use crate::payout::TeaserTable;
use crate::types::{BetType, LegResult, Market, Selection, SettlementOutcome};

// ---------------------------------------------------------------------------
// Violations & warnings
// ---------------------------------------------------------------------------

/// A hard rule failure. Leg indices are zero-based; messages number legs from 1.
#[derive(Debug, Clone, PartialEq, Serialize, thiserror::Error)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum RuleViolation {
    #[error("No selections provided")]
    NoSelections,

    #[error("{bet_type} requires at least {min} selection(s), got {actual}")]
    TooFewLegs {
        bet_type: BetType,
        min: usize,
        actual: usize,
    },

    #[error("{bet_type} cannot exceed {max} selections, got {actual}")]
    TooManyLegs {
        bet_type: BetType,
        max: usize,
        actual: usize,
    },

    #[error("leg {}: market '{market}' not allowed for {bet_type} bets", .leg + 1)]
    MarketNotAllowed {
        leg: usize,
        market: Market,
        bet_type: BetType,
    },

    #[error("leg {}: missing required field: {field}", .leg + 1)]
    MissingField { leg: usize, field: &'static str },

    #[error("leg {}: totals outcome must be Over or Under, got '{outcome}'", .leg + 1)]
    InvalidTotalsOutcome { leg: usize, outcome: String },

    #[error("{}: stake ${stake:.2} must be between ${min:.2} and ${max:.2}", stake_subject(.leg))]
    StakeOutOfRange {
        leg: Option<usize>,
        stake: Decimal,
        min: Decimal,
        max: Decimal,
    },

    #[error("{}: stake {stake} has more than 2 decimal places", stake_subject(.leg))]
    StakePrecision { leg: Option<usize>, stake: Decimal },

    #[error("leg {}: invalid odds {price}", .leg + 1)]
    InvalidOdds { leg: usize, price: AmericanOdds },

    #[error("Duplicate selection in event {event_id}: {outcome}")]
    DuplicateSelection { event_id: String, outcome: String },

    #[error("Cannot combine both moneylines in the same event {event_id}")]
    OpposingMoneylines { event_id: String },

    #[error("Cannot combine Moneyline and Spread for the same team: {team}")]
    MoneylineAndSpreadSameTeam { event_id: String, team: String },

    #[error("Cannot combine Over and Under on the same total ({point}) in event {event_id}")]
    OpposingTotals { event_id: String, point: Decimal },

    #[error("All selections must be from the same game for a Same Game Parlay")]
    MixedEvents,

    #[error("Teaser selections must be from different games (event {event_id} repeated)")]
    RepeatedEvent { event_id: String },

    #[error("leg {}: sport '{sport}' does not offer teasers", .leg + 1)]
    SportNotTeaserEligible { leg: usize, sport: String },

    #[error("Teaser selections must all be from the same sport")]
    MixedTeaserSports,

    #[error("Teaser points are required for a teaser")]
    MissingTeaserPoints,

    #[error("Invalid teaser points {points} for {sport} (allowed: {})", join_points(.allowed))]
    InvalidTeaserPoints {
        sport: String,
        points: Decimal,
        allowed: Vec<Decimal>,
    },

    #[error("No {points}-point {sport} teaser is offered with {legs} legs")]
    UnsupportedTeaserLegCount {
        sport: String,
        points: Decimal,
        legs: usize,
    },

    #[error("All bets in an If Bet sequence must have equal stakes")]
    UnequalIfBetStakes,

    #[error("Amount ${amount} must be positive with at most 2 decimal places")]
    InvalidAmount { amount: Decimal },

    #[error("Leg results do not support a '{outcome}' settlement: {detail}")]
    InconsistentLegResults {
        outcome: SettlementOutcome,
        detail: String,
    },
}

fn stake_subject(leg: &Option<usize>) -> String {
    match leg {
        Some(i) => format!("leg {}", i + 1),
        None => "bet".to_string(),
    }
}

fn join_points(points: &[Decimal]) -> String {
    points
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Soft findings: the bet is legal but worth flagging to the client.
#[derive(Debug, Clone, PartialEq, Serialize, thiserror::Error)]
#[serde(tag = "warning", rename_all = "snake_case")]
pub enum RuleWarning {
    #[error("This market combination may have limited availability: {}", join_markets(.markets))]
    UncommonCombination { markets: Vec<Market> },
}

fn join_markets(markets: &[Market]) -> String {
    markets
        .iter()
        .map(Market::as_str)
        .collect::<Vec<_>>()
        .join(" + ")
}

// ---------------------------------------------------------------------------
// Rule table
// ---------------------------------------------------------------------------

/// Limits for one bet type.
#[derive(Debug, Clone)]
pub struct BetTypeRules {
    pub allowed_markets: Vec<Market>,
    pub min_legs: usize,
    pub max_legs: usize,
}

impl BetTypeRules {
    fn new(allowed_markets: &[Market], min_legs: usize, max_legs: usize) -> Self {
        Self {
            allowed_markets: allowed_markets.to_vec(),
            min_legs,
            max_legs,
        }
    }

    pub fn allows(&self, market: Market) -> bool {
        self.allowed_markets.contains(&market)
    }
}

/// Per-type rule table plus the SGP market-pair allow-list.
#[derive(Debug, Clone)]
pub struct RuleBook {
    pub straight: BetTypeRules,
    pub parlay: BetTypeRules,
    pub sgp: BetTypeRules,
    pub teaser: BetTypeRules,
    pub if_bet: BetTypeRules,
    /// Market pairs that are routinely offered together in a same-game parlay.
    pub sgp_combinations: Vec<[Market; 2]>,
}

impl Default for RuleBook {
    fn default() -> Self {
        use Market::*;
        Self {
            straight: BetTypeRules::new(Market::ALL, 1, 1),
            parlay: BetTypeRules::new(&[H2h, Spreads, Totals], 2, 12),
            sgp: BetTypeRules::new(Market::ALL, 2, 8),
            teaser: BetTypeRules::new(&[Spreads, Totals], 2, 8),
            if_bet: BetTypeRules::new(&[H2h, Spreads, Totals], 2, 4),
            sgp_combinations: vec![
                [H2h, Totals],
                [Spreads, Totals],
                [Spreads, PlayerProp],
                [PlayerProp, TeamProp],
                [H2h, PlayerProp],
            ],
        }
    }
}

impl RuleBook {
    pub fn for_type(&self, bet_type: BetType) -> &BetTypeRules {
        match bet_type {
            BetType::Straight => &self.straight,
            BetType::Parlay => &self.parlay,
            BetType::Sgp => &self.sgp,
            BetType::Teaser => &self.teaser,
            BetType::IfBet => &self.if_bet,
        }
    }
}

/// Inclusive stake bounds applied to the bet stake and to every leg stake.
#[derive(Debug, Clone, Copy)]
pub struct StakeBounds {
    pub min: Decimal,
    pub max: Decimal,
}

impl Default for StakeBounds {
    fn default() -> Self {
        Self {
            min: dec!(1),
            max: dec!(10000),
        }
    }
}

// ---------------------------------------------------------------------------
// Validation report
// ---------------------------------------------------------------------------

/// Request-level options that some bet types need.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BetOptions {
    /// Stake for the bet as a whole.
    pub stake: Option<Decimal>,
    pub teaser_points: Option<Decimal>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ValidationReport {
    pub is_valid: bool,
    pub errors: Vec<RuleViolation>,
    pub warnings: Vec<RuleWarning>,
    /// Legs that passed their own checks and took part in no conflict.
    pub accepted: Vec<Selection>,
}

impl ValidationReport {
    /// Error messages as the client should see them.
    pub fn error_messages(&self) -> Vec<String> {
        self.errors.iter().map(ToString::to_string).collect()
    }

    pub fn warning_messages(&self) -> Vec<String> {
        self.warnings.iter().map(ToString::to_string).collect()
    }
}

// ---------------------------------------------------------------------------
// Validator
// ---------------------------------------------------------------------------

pub struct BetValidator {
    rules: RuleBook,
    stakes: StakeBounds,
    odds: OddsNormalizer,
    teasers: TeaserTable,
}

impl Default for BetValidator {
    fn default() -> Self {
        Self::new(
            RuleBook::default(),
            StakeBounds::default(),
            OddsNormalizer::default(),
            TeaserTable::default(),
        )
    }
}

impl BetValidator {
    pub fn new(
        rules: RuleBook,
        stakes: StakeBounds,
        odds: OddsNormalizer,
        teasers: TeaserTable,
    ) -> Self {
        Self {
            rules,
            stakes,
            odds,
            teasers,
        }
    }

    pub fn rules(&self) -> &RuleBook {
        &self.rules
    }

    /// Validate a betting request. Never short-circuits.
    pub fn validate(
        &self,
        selections: &[Selection],
        bet_type: BetType,
        options: &BetOptions,
    ) -> ValidationReport {
        let rules = self.rules.for_type(bet_type);
        let mut errors: Vec<RuleViolation> = Vec::new();
        let mut warnings: Vec<RuleWarning> = Vec::new();
        let mut rejected: HashSet<usize> = HashSet::new();

        if selections.is_empty() {
            errors.push(RuleViolation::NoSelections);
        } else if selections.len() < rules.min_legs {
            errors.push(RuleViolation::TooFewLegs {
                bet_type,
                min: rules.min_legs,
                actual: selections.len(),
            });
        }
        if selections.len() > rules.max_legs {
            errors.push(RuleViolation::TooManyLegs {
                bet_type,
                max: rules.max_legs,
                actual: selections.len(),
            });
        }

        if let Some(stake) = options.stake {
            self.check_stake(None, stake, &mut errors);
        }

        for (i, leg) in selections.iter().enumerate() {
            let before = errors.len();
            self.check_leg(i, leg, bet_type, rules, &mut errors);
            if errors.len() > before {
                rejected.insert(i);
            }
        }

        match bet_type {
            BetType::Straight => {}
            BetType::Parlay => {
                collect_conflicts(conflict::same_event_conflicts(selections), &mut errors, &mut rejected);
            }
            BetType::Sgp => {
                self.check_same_game(selections, &mut errors, &mut warnings, &mut rejected);
            }
            BetType::Teaser => {
                self.check_teaser(selections, options.teaser_points, &mut errors, &mut rejected);
            }
            BetType::IfBet => {
                check_if_bet_stakes(selections, options.stake, &mut errors);
            }
        }

        let accepted = selections
            .iter()
            .enumerate()
            .filter(|(i, _)| !rejected.contains(i))
            .map(|(_, leg)| leg.clone())
            .collect();

        let report = ValidationReport {
            is_valid: errors.is_empty(),
            errors,
            warnings,
            accepted,
        };

        debug!(
            bet_type = %bet_type,
            legs = selections.len(),
            errors = report.errors.len(),
            warnings = report.warnings.len(),
            "Bet validated"
        );

        report
    }

    /// Bound and precision check for a stake; `leg` is `None` for the bet stake.
    fn check_stake(&self, leg: Option<usize>, stake: Decimal, errors: &mut Vec<RuleViolation>) {
        let min = self.stakes.min.max(dec!(0.01));
        if stake < min || stake > self.stakes.max {
            errors.push(RuleViolation::StakeOutOfRange {
                leg,
                stake,
                min,
                max: self.stakes.max,
            });
        }
        if stake.normalize().scale() > 2 {
            errors.push(RuleViolation::StakePrecision { leg, stake });
        }
    }

    fn check_leg(
        &self,
        i: usize,
        leg: &Selection,
        bet_type: BetType,
        rules: &BetTypeRules,
        errors: &mut Vec<RuleViolation>,
    ) {
        if leg.event_id.trim().is_empty() {
            errors.push(RuleViolation::MissingField { leg: i, field: "event_id" });
        }
        if leg.selected_outcome.trim().is_empty() {
            errors.push(RuleViolation::MissingField { leg: i, field: "selected_outcome" });
        }
        if leg.sport.trim().is_empty() {
            errors.push(RuleViolation::MissingField { leg: i, field: "sport" });
        }
        if leg.market.requires_point() && leg.point.is_none() {
            errors.push(RuleViolation::MissingField { leg: i, field: "point" });
        }
        if leg.market == Market::Totals
            && !leg.selected_outcome.trim().is_empty()
            && leg.total_direction().is_none()
        {
            errors.push(RuleViolation::InvalidTotalsOutcome {
                leg: i,
                outcome: leg.selected_outcome.clone(),
            });
        }

        if !rules.allows(leg.market) {
            errors.push(RuleViolation::MarketNotAllowed {
                leg: i,
                market: leg.market,
                bet_type,
            });
        }

        if let Some(stake) = leg.stake {
            self.check_stake(Some(i), stake, errors);
        }

        if self.odds.to_decimal(leg.price).is_err() {
            errors.push(RuleViolation::InvalidOdds { leg: i, price: leg.price });
        }
    }

    fn check_same_game(
        &self,
        selections: &[Selection],
        errors: &mut Vec<RuleViolation>,
        warnings: &mut Vec<RuleWarning>,
        rejected: &mut HashSet<usize>,
    ) {
        if let Some(first) = selections.first() {
            if selections.iter().any(|s| s.event_id != first.event_id) {
                errors.push(RuleViolation::MixedEvents);
            }
        }

        collect_conflicts(conflict::same_event_conflicts(selections), errors, rejected);

        let mut markets: Vec<Market> = selections.iter().map(|s| s.market).collect();
        markets.sort();
        markets.dedup();
        if markets.len() > 1
            && !self
                .rules
                .sgp_combinations
                .iter()
                .any(|pair| pair.iter().all(|m| markets.contains(m)))
        {
            warnings.push(RuleWarning::UncommonCombination { markets });
        }
    }

    fn check_teaser(
        &self,
        selections: &[Selection],
        teaser_points: Option<Decimal>,
        errors: &mut Vec<RuleViolation>,
        rejected: &mut HashSet<usize>,
    ) {
        let mut seen: Vec<&str> = Vec::new();
        let mut repeated: Vec<&str> = Vec::new();
        for leg in selections {
            if seen.contains(&leg.event_id.as_str()) {
                if !repeated.contains(&leg.event_id.as_str()) {
                    repeated.push(leg.event_id.as_str());
                }
            } else {
                seen.push(leg.event_id.as_str());
            }
        }
        for event_id in repeated {
            errors.push(RuleViolation::RepeatedEvent {
                event_id: event_id.to_string(),
            });
        }

        for (i, leg) in selections.iter().enumerate() {
            if !self.teasers.supports_sport(&leg.sport) {
                errors.push(RuleViolation::SportNotTeaserEligible {
                    leg: i,
                    sport: leg.sport.clone(),
                });
                rejected.insert(i);
            }
        }

        let Some(first) = selections.first() else {
            return;
        };
        if selections.iter().any(|s| s.sport != first.sport) {
            errors.push(RuleViolation::MixedTeaserSports);
        }

        match teaser_points {
            None => errors.push(RuleViolation::MissingTeaserPoints),
            Some(points) => {
                let allowed = self.teasers.point_options(&first.sport);
                if !allowed.is_empty() && !allowed.contains(&points) {
                    errors.push(RuleViolation::InvalidTeaserPoints {
                        sport: first.sport.clone(),
                        points,
                        allowed,
                    });
                } else if !allowed.is_empty()
                    && (self.rules.teaser.min_legs..=self.rules.teaser.max_legs).contains(&selections.len())
                    && self.teasers.price(&first.sport, points, selections.len()).is_err()
                {
                    // Same lookup the pricer uses, so an accepted teaser always has a price.
                    errors.push(RuleViolation::UnsupportedTeaserLegCount {
                        sport: first.sport.clone(),
                        points,
                        legs: selections.len(),
                    });
                }
            }
        }
    }
}

fn collect_conflicts(
    conflicts: Vec<conflict::Conflict>,
    errors: &mut Vec<RuleViolation>,
    rejected: &mut HashSet<usize>,
) {
    for c in conflicts {
        rejected.insert(c.legs.0);
        rejected.insert(c.legs.1);
        errors.push(c.violation);
    }
}

/// Every leg stake (falling back to the bet stake) must be the same amount.
fn check_if_bet_stakes(
    selections: &[Selection],
    bet_stake: Option<Decimal>,
    errors: &mut Vec<RuleViolation>,
) {
    let mut stakes = selections.iter().filter_map(|s| s.stake.or(bet_stake));
    if let Some(first) = stakes.next().or(bet_stake) {
        let bet_matches = bet_stake.map_or(true, |s| s == first);
        if !bet_matches || stakes.any(|s| s != first) {
            errors.push(RuleViolation::UnequalIfBetStakes);
        }
    }
}

/// Check a settlement's per-leg results against the requested outcome.
pub fn check_leg_results(
    outcome: SettlementOutcome,
    leg_count: usize,
    results: &[LegResult],
) -> Result<(), RuleViolation> {
    let mismatch = |detail: String| RuleViolation::InconsistentLegResults { outcome, detail };

    if results.len() != leg_count {
        return Err(mismatch(format!(
            "expected {leg_count} leg result(s), got {}",
            results.len()
        )));
    }
    let any_lost = results.contains(&LegResult::Lost);
    let any_won = results.contains(&LegResult::Won);
    match outcome {
        SettlementOutcome::Won if any_lost => Err(mismatch("a leg lost".to_string())),
        SettlementOutcome::Won if !any_won => Err(mismatch("no leg won".to_string())),
        SettlementOutcome::Lost if !any_lost => Err(mismatch("no leg lost".to_string())),
        _ => Ok(()),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
