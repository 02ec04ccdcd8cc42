//! Bet lifecycle state machine.
//!
//! `pending` moves to exactly one terminal status and never leaves it.
//! Cancellation is only allowed before the cancellation window closes;
//! every other transition is unconstrained by time.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

use crate::payout::{PayoutCalculator, RealizedPayout};
use crate::rules::check_leg_results;
use crate::types::{Bet, BetStatus, LedgerEntryType, LegResult, SettlementOutcome, WagerError};

pub const DEFAULT_CANCEL_BUFFER_MINS: i64 = 5;

// ---------------------------------------------------------------------------
// Cancellation window
// ---------------------------------------------------------------------------

/// Cancellation (and placement) closes `buffer` before the first event starts.
#[derive(Debug, Clone, Copy)]
pub struct CancellationWindow {
    buffer: Duration,
}

impl Default for CancellationWindow {
    fn default() -> Self {
        Self::from_minutes(DEFAULT_CANCEL_BUFFER_MINS)
    }
}

impl CancellationWindow {
    pub fn from_minutes(minutes: i64) -> Self {
        Self {
            buffer: Duration::minutes(minutes.max(0)),
        }
    }

    pub fn buffer(&self) -> Duration {
        self.buffer
    }

    pub fn locks_at(&self, commence_time: DateTime<Utc>) -> DateTime<Utc> {
        commence_time - self.buffer
    }

    /// Strictly before the lock instant.
    pub fn is_open(&self, commence_time: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        now < self.locks_at(commence_time)
    }

    pub fn ensure_open(
        &self,
        bet_id: Uuid,
        commence_time: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<(), WagerError> {
        if self.is_open(commence_time, now) {
            Ok(())
        } else {
            Err(WagerError::BetLocked {
                bet_id,
                locked_at: self.locks_at(commence_time),
            })
        }
    }
}

// ---------------------------------------------------------------------------
// Resolution
// ---------------------------------------------------------------------------

/// Money that settlement puts back into the wallet.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Credit {
    pub entry_type: LedgerEntryType,
    pub amount: Decimal,
}

/// The terminal state a pending bet moves to, plus its ledger credit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Resolution {
    pub status: BetStatus,
    pub actual_payout: Decimal,
    /// `None` for a lost bet.
    pub credit: Option<Credit>,
    pub settled_at: DateTime<Utc>,
}

impl Resolution {
    fn paid(status: BetStatus, amount: Decimal, entry_type: LedgerEntryType, at: DateTime<Utc>) -> Self {
        Self {
            status,
            actual_payout: amount,
            credit: Some(Credit { entry_type, amount }),
            settled_at: at,
        }
    }

    fn refund(status: BetStatus, stake: Decimal, at: DateTime<Utc>) -> Self {
        Self::paid(status, stake, LedgerEntryType::RefundCredit, at)
    }
}

/// Decide how a bet settles. Pure: the caller applies the result atomically
/// with a fresh read of the bet, so this runs under the wallet lock.
///
/// `cancel_locks_at` is the lock instant of the bet's earliest event; a
/// `Cancelled` outcome at or after it is rejected.
pub fn resolve(
    bet: &Bet,
    outcome: SettlementOutcome,
    leg_results: Option<&[LegResult]>,
    payout: &PayoutCalculator,
    cancel_locks_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Result<Resolution, WagerError> {
    if bet.status.is_terminal() {
        return Err(WagerError::AlreadySettled {
            bet_id: bet.id,
            status: bet.status,
        });
    }

    if let Some(results) = leg_results {
        check_leg_results(outcome, bet.legs.len(), results)
            .map_err(|v| WagerError::Validation(vec![v]))?;
    }

    let resolution = match outcome {
        SettlementOutcome::Cancelled => {
            if let Some(locked_at) = cancel_locks_at {
                if now >= locked_at {
                    return Err(WagerError::BetLocked {
                        bet_id: bet.id,
                        locked_at,
                    });
                }
            }
            Resolution::refund(BetStatus::Cancelled, bet.stake, now)
        }
        SettlementOutcome::Pushed => Resolution::refund(BetStatus::Pushed, bet.stake, now),
        SettlementOutcome::Lost => Resolution {
            status: BetStatus::Lost,
            actual_payout: Decimal::ZERO,
            credit: None,
            settled_at: now,
        },
        SettlementOutcome::Won => match payout.realized_payout(bet, leg_results)? {
            RealizedPayout::Paid(amount) => {
                Resolution::paid(BetStatus::Won, amount, LedgerEntryType::PayoutCredit, now)
            }
            RealizedPayout::Refund => Resolution::refund(BetStatus::Pushed, bet.stake, now),
        },
    };

    debug!(
        bet_id = %bet.id,
        outcome = %outcome,
        status = %resolution.status,
        payout = %resolution.actual_payout,
        "Bet resolved"
    );

    Ok(resolution)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::odds::AmericanOdds;
    use crate::types::{BetType, Market, Selection};
    use rust_decimal_macros::dec;

    fn make_bet(status: BetStatus) -> Bet {
        let legs = vec![
            Selection {
                event_id: "e1".to_string(),
                market: Market::H2h,
                selected_outcome: "Chiefs".to_string(),
                point: None,
                price: AmericanOdds::new(100),
                sport: "american_football".to_string(),
                stake: None,
            },
            Selection {
                event_id: "e2".to_string(),
                market: Market::H2h,
                selected_outcome: "Bills".to_string(),
                point: None,
                price: AmericanOdds::new(-110),
                sport: "american_football".to_string(),
                stake: None,
            },
        ];
        Bet {
            id: Uuid::new_v4(),
            user_id: "u1".to_string(),
            bet_type: BetType::Parlay,
            legs,
            stake: dec!(50),
            decimal_odds_combined: dec!(3.82),
            potential_payout: dec!(190.91),
            actual_payout: None,
            status,
            teaser_points: None,
            placed_at: Utc::now(),
            settled_at: None,
        }
    }

    fn run(bet: &Bet, outcome: SettlementOutcome) -> Result<Resolution, WagerError> {
        resolve(bet, outcome, None, &PayoutCalculator::default(), None, Utc::now())
    }

    #[test]
    fn test_won_credits_frozen_payout() {
        let r = run(&make_bet(BetStatus::Pending), SettlementOutcome::Won).unwrap();
        assert_eq!(r.status, BetStatus::Won);
        assert_eq!(r.actual_payout, dec!(190.91));
        assert_eq!(
            r.credit,
            Some(Credit {
                entry_type: LedgerEntryType::PayoutCredit,
                amount: dec!(190.91)
            })
        );
    }

    #[test]
    fn test_lost_has_no_credit() {
        let r = run(&make_bet(BetStatus::Pending), SettlementOutcome::Lost).unwrap();
        assert_eq!(r.status, BetStatus::Lost);
        assert_eq!(r.actual_payout, Decimal::ZERO);
        assert!(r.credit.is_none());
    }

    #[test]
    fn test_push_and_cancel_refund_stake() {
        for (outcome, status) in [
            (SettlementOutcome::Pushed, BetStatus::Pushed),
            (SettlementOutcome::Cancelled, BetStatus::Cancelled),
        ] {
            let r = run(&make_bet(BetStatus::Pending), outcome).unwrap();
            assert_eq!(r.status, status);
            assert_eq!(r.credit.unwrap().entry_type, LedgerEntryType::RefundCredit);
            assert_eq!(r.credit.unwrap().amount, dec!(50));
        }
    }

    #[test]
    fn test_terminal_states_are_final() {
        for status in [BetStatus::Won, BetStatus::Lost, BetStatus::Cancelled, BetStatus::Pushed] {
            let err = run(&make_bet(status), SettlementOutcome::Won).unwrap_err();
            assert_eq!(err.kind(), "already_settled");
        }
    }

    #[test]
    fn test_cancel_after_lock_rejected() {
        let now = Utc::now();
        let bet = make_bet(BetStatus::Pending);
        let calc = PayoutCalculator::default();

        let err = resolve(&bet, SettlementOutcome::Cancelled, None, &calc, Some(now), now).unwrap_err();
        assert_eq!(err.kind(), "bet_locked");

        // Pushed is an operator void and ignores the window.
        assert!(resolve(&bet, SettlementOutcome::Pushed, None, &calc, Some(now), now).is_ok());

        let later = now + Duration::minutes(1);
        assert!(resolve(&bet, SettlementOutcome::Cancelled, None, &calc, Some(later), now).is_ok());
    }

    #[test]
    fn test_won_with_pushed_leg_reprices() {
        let bet = make_bet(BetStatus::Pending);
        let results = [LegResult::Pushed, LegResult::Won];
        let r = resolve(
            &bet,
            SettlementOutcome::Won,
            Some(&results),
            &PayoutCalculator::default(),
            None,
            Utc::now(),
        )
        .unwrap();
        assert_eq!(r.actual_payout, dec!(95.45));
    }

    #[test]
    fn test_inconsistent_leg_results_rejected() {
        let bet = make_bet(BetStatus::Pending);
        let results = [LegResult::Won, LegResult::Lost];
        let err = resolve(
            &bet,
            SettlementOutcome::Won,
            Some(&results),
            &PayoutCalculator::default(),
            None,
            Utc::now(),
        )
        .unwrap_err();
        assert_eq!(err.kind(), "validation_error");
    }

    #[test]
    fn test_window_is_strict() {
        let window = CancellationWindow::from_minutes(5);
        let commence = Utc::now() + Duration::minutes(10);
        assert!(window.is_open(commence, commence - Duration::minutes(6)));
        assert!(!window.is_open(commence, commence - Duration::minutes(5)));
        assert!(window
            .ensure_open(Uuid::new_v4(), commence, commence - Duration::minutes(2))
            .is_err());
    }
}
