//! Persistence layer: the wallet ledger.
//!
//! A `LedgerStore` owns wallets, bets and the append-only ledger, and performs
//! every money movement as one all-or-nothing unit under an exclusive lock on
//! the user's wallet. Two back-ends are provided:
//!
//! - [`memory::MemoryStore`]: per-user mutex, for tests and embedding.
//! - [`sqlite::SqliteStore`]: `sqlx` SQLite with immediate transactions.
//!
//! Both share the balance and limit rules below, so they cannot drift apart.

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::lifecycle::Resolution;
use crate::limits::{BettingLimits, RecentStakes};
use crate::rules::RuleViolation;
use crate::types::{Bet, LedgerEntry, LedgerEntryType, WagerError, WalletAccount};

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Settlement decision, evaluated against the bet as read under the wallet lock.
pub type Resolver<'a> = dyn Fn(&Bet) -> Result<Resolution, WagerError> + Send + Sync + 'a;

/// A bet after settlement, with the ledger entry it produced (if any).
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedBet {
    pub bet: Bet,
    pub entry: Option<LedgerEntry>,
    pub balance: Decimal,
}

/// Wallet, bet and ledger storage with atomic money movements.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Create a wallet; a positive opening balance is written as a deposit.
    async fn open_account(
        &self,
        user_id: &str,
        opening_balance: Decimal,
        limits: BettingLimits,
    ) -> Result<WalletAccount, WagerError>;

    async fn account(&self, user_id: &str) -> Result<WalletAccount, WagerError>;

    async fn accounts(&self) -> Result<Vec<WalletAccount>, WagerError>;

    async fn set_limits(
        &self,
        user_id: &str,
        limits: BettingLimits,
    ) -> Result<WalletAccount, WagerError>;

    async fn bet(&self, bet_id: Uuid) -> Result<Bet, WagerError>;

    async fn bets_for_user(&self, user_id: &str) -> Result<Vec<Bet>, WagerError>;

    /// Ledger entries in posting order.
    async fn entries_for_user(&self, user_id: &str) -> Result<Vec<LedgerEntry>, WagerError>;

    /// Deposit or withdraw `amount` (positive) under the wallet lock.
    async fn transfer(
        &self,
        user_id: &str,
        entry_type: LedgerEntryType,
        amount: Decimal,
    ) -> Result<LedgerEntry, WagerError>;

    /// Debit the stake and persist the pending bet atomically.
    async fn place(&self, bet: Bet) -> Result<LedgerEntry, WagerError>;

    /// Re-read the bet under the wallet lock, apply `resolver`, and persist the
    /// new status with any credit atomically.
    async fn resolve(&self, bet_id: Uuid, resolver: &Resolver<'_>) -> Result<ResolvedBet, WagerError>;
}

// ---------------------------------------------------------------------------
// Shared ledger rules
// ---------------------------------------------------------------------------

/// Apply a signed movement to the wallet and build its ledger entry.
///
/// The wallet is only mutated when the resulting balance is representable
/// and non-negative.
pub(crate) fn post_entry(
    account: &mut WalletAccount,
    entry_type: LedgerEntryType,
    amount: Decimal,
    reference_bet_id: Option<Uuid>,
    at: DateTime<Utc>,
) -> Result<LedgerEntry, WagerError> {
    let balance_after = account
        .balance
        .checked_add(amount)
        .ok_or_else(|| WagerError::Validation(vec![RuleViolation::InvalidAmount { amount }]))?;
    if balance_after < Decimal::ZERO {
        return Err(WagerError::InsufficientFunds {
            needed: amount.abs(),
            available: account.balance,
        });
    }
    account.balance = balance_after;
    Ok(LedgerEntry {
        id: Uuid::new_v4(),
        user_id: account.user_id.clone(),
        entry_type,
        amount,
        reference_bet_id,
        balance_after,
        timestamp: at,
    })
}

/// Signed ledger amount for a deposit or withdrawal.
pub(crate) fn transfer_amount(entry_type: LedgerEntryType, amount: Decimal) -> Result<Decimal, WagerError> {
    match entry_type {
        LedgerEntryType::Deposit => Ok(amount),
        LedgerEntryType::Withdrawal => Ok(-amount),
        other => Err(WagerError::Storage(format!(
            "{other} entries are written by bet placement and settlement only"
        ))),
    }
}

/// Limits first, then funds. Called with the wallet lock held.
pub(crate) fn authorize_placement(
    account: &WalletAccount,
    recent_stakes: &RecentStakes,
    bet: &Bet,
) -> Result<(), WagerError> {
    if bet.user_id != account.user_id {
        return Err(WagerError::Storage(format!(
            "bet {} belongs to {}, not {}",
            bet.id, bet.user_id, account.user_id
        )));
    }
    account.limits.check(bet.stake, recent_stakes)?;
    if account.balance < bet.stake {
        return Err(WagerError::InsufficientFunds {
            needed: bet.stake,
            available: account.balance,
        });
    }
    Ok(())
}

/// Apply a resolution to a bet in place and post its credit.
pub(crate) fn apply_resolution(
    account: &mut WalletAccount,
    bet: &mut Bet,
    resolution: &Resolution,
) -> Result<Option<LedgerEntry>, WagerError> {
    let entry = match resolution.credit {
        Some(credit) => Some(post_entry(
            account,
            credit.entry_type,
            credit.amount,
            Some(bet.id),
            resolution.settled_at,
        )?),
        None => None,
    };
    bet.status = resolution.status;
    bet.actual_payout = Some(resolution.actual_payout);
    bet.settled_at = Some(resolution.settled_at);
    Ok(entry)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn make_account(balance: Decimal) -> WalletAccount {
        WalletAccount {
            user_id: "u1".to_string(),
            balance,
            limits: BettingLimits::default(),
            opened_at: Utc::now(),
        }
    }

    #[test]
    fn test_post_entry_tracks_running_balance() {
        let mut account = make_account(dec!(100));
        let entry = post_entry(&mut account, LedgerEntryType::StakeDebit, dec!(-40), None, Utc::now()).unwrap();
        assert_eq!(entry.balance_after, dec!(60));
        assert_eq!(account.balance, dec!(60));
    }

    #[test]
    fn test_post_entry_rejects_overdraft_without_mutation() {
        let mut account = make_account(dec!(10));
        let err = post_entry(&mut account, LedgerEntryType::Withdrawal, dec!(-10.01), None, Utc::now()).unwrap_err();
        assert_eq!(err.kind(), "insufficient_funds");
        assert_eq!(account.balance, dec!(10));
    }

    #[test]
    fn test_post_entry_rejects_unrepresentable_balance() {
        let mut account = make_account(Decimal::MAX);
        let err = post_entry(&mut account, LedgerEntryType::Deposit, dec!(1), None, Utc::now()).unwrap_err();
        assert_eq!(err.kind(), "validation_error");
        assert_eq!(account.balance, Decimal::MAX);
    }

    #[test]
    fn test_transfer_amount_signs() {
        assert_eq!(transfer_amount(LedgerEntryType::Deposit, dec!(5)).unwrap(), dec!(5));
        assert_eq!(transfer_amount(LedgerEntryType::Withdrawal, dec!(5)).unwrap(), dec!(-5));
        assert!(transfer_amount(LedgerEntryType::PayoutCredit, dec!(5)).is_err());
    }
}
