//! Odds normalisation.
//!
//! Converts between native (American) odds and decimal odds. Every payout
//! figure in the crate is derived from the decimal form produced here, using
//! exact decimal arithmetic.

use rust_decimal::prelude::*;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::WagerError;

/// Widest native price accepted by default (either sign).
pub const DEFAULT_MAX_ABS_ODDS: i32 = 100_000;

// ---------------------------------------------------------------------------
// American odds
// ---------------------------------------------------------------------------

/// Signed American price: `+150` pays 150 per 100 staked, `-110` needs 110 to win 100.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AmericanOdds(i32);

impl AmericanOdds {
    pub const fn new(value: i32) -> Self {
        Self(value)
    }

    pub fn value(&self) -> i32 {
        self.0
    }

    /// Positive prices pay more than the stake in profit.
    pub fn is_underdog(&self) -> bool {
        self.0 > 0
    }
}

impl fmt::Display for AmericanOdds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 > 0 {
            write!(f, "+{}", self.0)
        } else {
            write!(f, "{}", self.0)
        }
    }
}

impl From<i32> for AmericanOdds {
    fn from(value: i32) -> Self {
        Self(value)
    }
}

/// Parse a signed display string such as `+150`, `-110` or `150`.
impl FromStr for AmericanOdds {
    type Err = WagerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let digits = trimmed.strip_prefix('+').unwrap_or(trimmed);
        digits
            .parse::<i32>()
            .map(AmericanOdds)
            .map_err(|_| WagerError::InvalidOdds(format!("cannot parse '{s}' as American odds")))
    }
}

// ---------------------------------------------------------------------------
// Normaliser
// ---------------------------------------------------------------------------

/// Stateless converter with a configured sanity bound.
#[derive(Debug, Clone, Copy)]
pub struct OddsNormalizer {
    max_abs: i32,
}

impl Default for OddsNormalizer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ABS_ODDS)
    }
}

impl OddsNormalizer {
    pub fn new(max_abs: i32) -> Self {
        Self {
            max_abs: max_abs.max(1),
        }
    }

    pub fn max_abs(&self) -> i32 {
        self.max_abs
    }

    /// Reject zero and out-of-range prices.
    pub fn check(&self, odds: AmericanOdds) -> Result<(), WagerError> {
        let v = odds.value();
        if v == 0 {
            return Err(WagerError::InvalidOdds("odds of 0 are undefined".to_string()));
        }
        if v.unsigned_abs() > self.max_abs.unsigned_abs() {
            return Err(WagerError::InvalidOdds(format!(
                "{odds} is outside the accepted range ±{}",
                self.max_abs
            )));
        }
        Ok(())
    }

    /// `+n → n/100 + 1`, `-n → 100/n + 1`. Always strictly greater than 1.
    pub fn to_decimal(&self, odds: AmericanOdds) -> Result<Decimal, WagerError> {
        self.check(odds)?;
        let v = Decimal::from(odds.value());
        let decimal = if v.is_sign_positive() {
            v / dec!(100) + Decimal::ONE
        } else {
            dec!(100) / v.abs() + Decimal::ONE
        };
        Ok(decimal)
    }

    /// Inverse of [`to_decimal`](Self::to_decimal), rounded to the nearest whole price.
    pub fn from_decimal(&self, decimal: Decimal) -> Result<AmericanOdds, WagerError> {
        if decimal <= Decimal::ONE {
            return Err(WagerError::InvalidOdds(format!(
                "decimal odds must exceed 1.0, got {decimal}"
            )));
        }
        let net = decimal - Decimal::ONE;
        let native = if decimal >= dec!(2) {
            net * dec!(100)
        } else {
            dec!(-100) / net
        };
        let rounded = native.round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero);
        let value = rounded.to_i32().ok_or_else(|| {
            WagerError::InvalidOdds(format!("decimal odds {decimal} overflow American notation"))
        })?;
        let odds = AmericanOdds(value);
        self.check(odds)?;
        Ok(odds)
    }

    /// Signed display string (`+150`, `-110`).
    pub fn format(odds: AmericanOdds) -> String {
        odds.to_string()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
