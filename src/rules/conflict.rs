//! Same-event conflict detection for parlays and same-game parlays.
//!
//! Two legs on one event may be contradictory (both sides of a moneyline,
//! both sides of a total) or redundant (moneyline and spread on one team).
//! Either way the combined price would be meaningless, so the pair is rejected.

use crate::types::{Market, Selection};

use super::RuleViolation;

/// A rejected pair of legs (zero-based indices).
#[derive(Debug, Clone, PartialEq)]
pub struct Conflict {
    pub violation: RuleViolation,
    pub legs: (usize, usize),
}

/// Check every pair of legs sharing an event. Each pair yields at most one conflict.
pub fn same_event_conflicts(legs: &[Selection]) -> Vec<Conflict> {
    let mut conflicts = Vec::new();
    for (i, a) in legs.iter().enumerate() {
        for (j, b) in legs.iter().enumerate().skip(i + 1) {
            if a.event_id != b.event_id {
                continue;
            }
            if let Some(violation) = pair_conflict(a, b) {
                conflicts.push(Conflict {
                    violation,
                    legs: (i, j),
                });
            }
        }
    }
    conflicts
}

fn pair_conflict(a: &Selection, b: &Selection) -> Option<RuleViolation> {
    let event_id = a.event_id.clone();

    if a.market == b.market && a.point == b.point && a.same_outcome(b) {
        return Some(RuleViolation::DuplicateSelection {
            event_id,
            outcome: a.selected_outcome.clone(),
        });
    }

    match (a.market, b.market) {
        (Market::H2h, Market::H2h) => Some(RuleViolation::OpposingMoneylines { event_id }),
        (Market::H2h, Market::Spreads) | (Market::Spreads, Market::H2h) if a.same_outcome(b) => {
            Some(RuleViolation::MoneylineAndSpreadSameTeam {
                event_id,
                team: a.selected_outcome.trim().to_string(),
            })
        }
        (Market::Totals, Market::Totals) if a.point == b.point => {
            let (da, db) = (a.total_direction()?, b.total_direction()?);
            (da.opposite() == db).then(|| RuleViolation::OpposingTotals {
                event_id,
                point: a.point.unwrap_or_default(),
            })
        }
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
