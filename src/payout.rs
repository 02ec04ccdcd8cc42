//! Payout calculation.
//!
//! Turns a validated set of legs and a stake into combined decimal odds and a
//! potential payout, and later into the realised payout at settlement. All
//! figures are recomputed from the prices frozen on the bet, never from live
//! odds, so a settled bet can be re-derived exactly during reconciliation.

use rust_decimal::prelude::*;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::odds::{AmericanOdds, OddsNormalizer};
use crate::rules::RuleViolation;
use crate::types::{Bet, BetType, LegResult, Selection, WagerError};

/// Round a money amount to cents, halves away from zero.
pub fn round_cents(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

// ---------------------------------------------------------------------------
// Teaser table
// ---------------------------------------------------------------------------

/// Prices for one (sport, points) teaser, keyed by leg count.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeaserLine {
    pub sport: String,
    pub points: Decimal,
    pub prices: Vec<(usize, AmericanOdds)>,
}

impl TeaserLine {
    fn new(sport: &str, points: Decimal, prices: &[i32]) -> Self {
        Self {
            sport: sport.to_string(),
            points,
            prices: prices
                .iter()
                .enumerate()
                .map(|(i, p)| (i + 2, AmericanOdds::new(*p)))
                .collect(),
        }
    }
}

/// Fixed teaser price table. Also the source of teaser eligibility, so
/// validation and pricing always agree on what is offered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeaserTable {
    lines: Vec<TeaserLine>,
}

impl Default for TeaserTable {
    fn default() -> Self {
        Self::new(vec![
            TeaserLine::new("american_football", dec!(6), &[-110, 160, 260, 400, 600]),
            TeaserLine::new("american_football", dec!(6.5), &[-120, 140, 240, 380, 580]),
            TeaserLine::new("american_football", dec!(7), &[-130, 120, 200, 350, 550]),
            TeaserLine::new("basketball", dec!(4), &[-110, 160, 260, 400]),
            TeaserLine::new("basketball", dec!(4.5), &[-120, 140, 240, 380]),
            TeaserLine::new("basketball", dec!(5), &[-130, 120, 200, 350]),
        ])
    }
}

impl TeaserTable {
    pub fn new(lines: Vec<TeaserLine>) -> Self {
        Self { lines }
    }

    pub fn supports_sport(&self, sport: &str) -> bool {
        self.lines.iter().any(|l| l.sport == sport)
    }

    /// Allowed teaser points for a sport, in table order. Empty if unsupported.
    pub fn point_options(&self, sport: &str) -> Vec<Decimal> {
        self.lines
            .iter()
            .filter(|l| l.sport == sport)
            .map(|l| l.points)
            .collect()
    }

    /// Native price for (sport, points, legs). Unknown combinations are an error.
    pub fn price(&self, sport: &str, points: Decimal, legs: usize) -> Result<AmericanOdds, WagerError> {
        self.lines
            .iter()
            .find(|l| l.sport == sport && l.points == points)
            .and_then(|l| l.prices.iter().find(|(n, _)| *n == legs))
            .map(|(_, price)| *price)
            .ok_or_else(|| WagerError::UnsupportedTeaserConfiguration {
                sport: sport.to_string(),
                points,
                legs,
            })
    }
}

// ---------------------------------------------------------------------------
// Quotes
// ---------------------------------------------------------------------------

/// Priced bet, before placement.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PayoutQuote {
    /// Exact combined decimal odds; never rounded.
    pub combined_decimal_odds: Decimal,
    pub potential_payout: Decimal,
    pub profit: Decimal,
    /// Table price used for a teaser.
    pub teaser_price: Option<AmericanOdds>,
}

/// Realised payout for a winning bet once per-leg results are known.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RealizedPayout {
    Paid(Decimal),
    /// Too few live legs remain; the stake goes back as a push.
    Refund,
}

// ---------------------------------------------------------------------------
// Calculator
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct PayoutCalculator {
    odds: OddsNormalizer,
    teasers: TeaserTable,
}

impl PayoutCalculator {
    pub fn new(odds: OddsNormalizer, teasers: TeaserTable) -> Self {
        Self { odds, teasers }
    }

    pub fn teasers(&self) -> &TeaserTable {
        &self.teasers
    }

    /// Price a bet of the given type.
    pub fn quote(
        &self,
        bet_type: BetType,
        legs: &[Selection],
        stake: Decimal,
        teaser_points: Option<Decimal>,
    ) -> Result<PayoutQuote, WagerError> {
        if legs.is_empty() {
            return Err(WagerError::Validation(vec![RuleViolation::NoSelections]));
        }

        let quote = match bet_type {
            BetType::Straight => self.straight(&legs[0], stake)?,
            BetType::Parlay | BetType::Sgp => self.parlay(legs, stake)?,
            BetType::IfBet => self.if_bet(legs, stake)?,
            BetType::Teaser => {
                let points = teaser_points
                    .ok_or_else(|| WagerError::Validation(vec![RuleViolation::MissingTeaserPoints]))?;
                self.teaser(&legs[0].sport, points, legs.len(), stake)?
            }
        };

        debug!(
            bet_type = %bet_type,
            legs = legs.len(),
            stake = %stake,
            odds = %quote.combined_decimal_odds.round_dp(4),
            payout = %quote.potential_payout,
            "Payout quoted"
        );

        Ok(quote)
    }

    /// `payout = stake × decimal`.
    pub fn straight(&self, leg: &Selection, stake: Decimal) -> Result<PayoutQuote, WagerError> {
        let decimal = self.odds.to_decimal(leg.price)?;
        apply(stake, decimal, None)
    }

    /// Product of the leg decimals applied to the stake. Same-game parlays use
    /// this too; legs are treated as independent.
    pub fn parlay(&self, legs: &[Selection], stake: Decimal) -> Result<PayoutQuote, WagerError> {
        let combined = self.combined(legs.iter().map(|l| l.price))?;
        apply(stake, combined, None)
    }

    /// Table-priced teaser settled like a straight bet at the table price.
    pub fn teaser(
        &self,
        sport: &str,
        points: Decimal,
        legs: usize,
        stake: Decimal,
    ) -> Result<PayoutQuote, WagerError> {
        let price = self.teasers.price(sport, points, legs)?;
        let decimal = self.odds.to_decimal(price)?;
        apply(stake, decimal, Some(price))
    }

    /// Each leg's stake is the previous leg's payout: `payoutᵢ = payoutᵢ₋₁ × decimalᵢ`.
    pub fn if_bet(&self, legs: &[Selection], stake: Decimal) -> Result<PayoutQuote, WagerError> {
        let mut running = stake;
        for leg in legs {
            let decimal = self.odds.to_decimal(leg.price)?;
            running = running.checked_mul(decimal).ok_or_else(overflow)?;
        }
        let payout = round_cents(running);
        let combined = if stake.is_zero() {
            self.combined(legs.iter().map(|l| l.price))?
        } else {
            running / stake
        };
        Ok(PayoutQuote {
            combined_decimal_odds: combined,
            potential_payout: payout,
            profit: payout - stake,
            teaser_price: None,
        })
    }

    /// Payout for a bet settled as won, honouring pushed legs when results are given.
    ///
    /// Pushed legs drop out of a multiplied bet (decimal 1.0). A teaser is re-priced
    /// at the reduced leg count, and refunded when fewer than two legs survive.
    pub fn realized_payout(
        &self,
        bet: &Bet,
        leg_results: Option<&[LegResult]>,
    ) -> Result<RealizedPayout, WagerError> {
        let Some(results) = leg_results else {
            return Ok(RealizedPayout::Paid(bet.potential_payout));
        };

        let live: Vec<&Selection> = bet
            .legs
            .iter()
            .zip(results)
            .filter(|(_, r)| **r == LegResult::Won)
            .map(|(leg, _)| leg)
            .collect();

        if live.is_empty() {
            return Ok(RealizedPayout::Refund);
        }
        if live.len() == bet.legs.len() {
            return Ok(RealizedPayout::Paid(bet.potential_payout));
        }

        let payout = match bet.bet_type {
            BetType::Straight => bet.potential_payout,
            BetType::Parlay | BetType::Sgp | BetType::IfBet => {
                let combined = self.combined(live.iter().map(|l| l.price))?;
                round_cents(bet.stake.checked_mul(combined).ok_or_else(overflow)?)
            }
            BetType::Teaser => {
                if live.len() < 2 {
                    return Ok(RealizedPayout::Refund);
                }
                let points = bet
                    .teaser_points
                    .ok_or_else(|| WagerError::Validation(vec![RuleViolation::MissingTeaserPoints]))?;
                self.teaser(&bet.legs[0].sport, points, live.len(), bet.stake)?
                    .potential_payout
            }
        };

        debug!(
            bet_id = %bet.id,
            live_legs = live.len(),
            legs = bet.legs.len(),
            payout = %payout,
            "Payout re-priced for pushed legs"
        );

        Ok(RealizedPayout::Paid(payout))
    }

    fn combined(&self, prices: impl Iterator<Item = AmericanOdds>) -> Result<Decimal, WagerError> {
        let mut combined = Decimal::ONE;
        for price in prices {
            let decimal = self.odds.to_decimal(price)?;
            combined = combined.checked_mul(decimal).ok_or_else(overflow)?;
        }
        Ok(combined)
    }
}

fn apply(stake: Decimal, decimal: Decimal, teaser_price: Option<AmericanOdds>) -> Result<PayoutQuote, WagerError> {
    let payout = round_cents(stake.checked_mul(decimal).ok_or_else(overflow)?);
    Ok(PayoutQuote {
        combined_decimal_odds: decimal,
        potential_payout: payout,
        profit: payout - stake,
        teaser_price,
    })
}

fn overflow() -> WagerError {
    WagerError::InvalidOdds("combined odds overflow decimal precision".to_string())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
