//! In-memory ledger store.
//!
//! Each wallet sits behind its own mutex, so operations on one user are
//! serialised while different users never contend. Nothing is awaited while
//! a wallet lock is held.

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use tracing::debug;
use uuid::Uuid;

use super::{
    apply_resolution, authorize_placement, post_entry, transfer_amount, LedgerStore, ResolvedBet,
    Resolver,
};
use crate::limits::{BettingLimits, RecentStakes};
use crate::types::{Bet, LedgerEntry, LedgerEntryType, WagerError, WalletAccount};

#[derive(Debug)]
struct Wallet {
    account: WalletAccount,
    entries: Vec<LedgerEntry>,
    bets: Vec<Bet>,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    wallets: RwLock<HashMap<String, Arc<Mutex<Wallet>>>>,
    bet_owners: RwLock<HashMap<Uuid, String>>,
}

fn poisoned<T>(_: T) -> WagerError {
    WagerError::Storage("in-memory store lock poisoned".to_string())
}

fn lock(wallet: &Mutex<Wallet>) -> Result<MutexGuard<'_, Wallet>, WagerError> {
    wallet.lock().map_err(poisoned)
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn wallet(&self, user_id: &str) -> Result<Arc<Mutex<Wallet>>, WagerError> {
        self.wallets
            .read()
            .map_err(poisoned)?
            .get(user_id)
            .cloned()
            .ok_or_else(|| WagerError::UserNotFound(user_id.to_string()))
    }

    fn owner_of(&self, bet_id: Uuid) -> Result<String, WagerError> {
        self.bet_owners
            .read()
            .map_err(poisoned)?
            .get(&bet_id)
            .cloned()
            .ok_or(WagerError::BetNotFound(bet_id))
    }
}

#[async_trait]
impl LedgerStore for MemoryStore {
    async fn open_account(
        &self,
        user_id: &str,
        opening_balance: Decimal,
        limits: BettingLimits,
    ) -> Result<WalletAccount, WagerError> {
        let mut wallets = self.wallets.write().map_err(poisoned)?;
        if wallets.contains_key(user_id) {
            return Err(WagerError::AccountExists(user_id.to_string()));
        }

        let now = Utc::now();
        let mut account = WalletAccount {
            user_id: user_id.to_string(),
            balance: Decimal::ZERO,
            limits,
            opened_at: now,
        };
        let mut entries = Vec::new();
        if opening_balance > Decimal::ZERO {
            entries.push(post_entry(
                &mut account,
                LedgerEntryType::Deposit,
                opening_balance,
                None,
                now,
            )?);
        }

        wallets.insert(
            user_id.to_string(),
            Arc::new(Mutex::new(Wallet {
                account: account.clone(),
                entries,
                bets: Vec::new(),
            })),
        );
        Ok(account)
    }

    async fn account(&self, user_id: &str) -> Result<WalletAccount, WagerError> {
        let wallet = self.wallet(user_id)?;
        let guard = lock(&wallet)?;
        Ok(guard.account.clone())
    }

    async fn accounts(&self) -> Result<Vec<WalletAccount>, WagerError> {
        let wallets: Vec<Arc<Mutex<Wallet>>> =
            self.wallets.read().map_err(poisoned)?.values().cloned().collect();
        let mut accounts = wallets
            .iter()
            .map(|w| lock(w).map(|g| g.account.clone()))
            .collect::<Result<Vec<_>, _>>()?;
        accounts.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        Ok(accounts)
    }

    async fn set_limits(
        &self,
        user_id: &str,
        limits: BettingLimits,
    ) -> Result<WalletAccount, WagerError> {
        let wallet = self.wallet(user_id)?;
        let mut guard = lock(&wallet)?;
        guard.account.limits = limits;
        Ok(guard.account.clone())
    }

    async fn bet(&self, bet_id: Uuid) -> Result<Bet, WagerError> {
        let owner = self.owner_of(bet_id)?;
        let wallet = self.wallet(&owner)?;
        let guard = lock(&wallet)?;
        guard
            .bets
            .iter()
            .find(|b| b.id == bet_id)
            .cloned()
            .ok_or(WagerError::BetNotFound(bet_id))
    }

    async fn bets_for_user(&self, user_id: &str) -> Result<Vec<Bet>, WagerError> {
        let wallet = self.wallet(user_id)?;
        let guard = lock(&wallet)?;
        Ok(guard.bets.clone())
    }

    async fn entries_for_user(&self, user_id: &str) -> Result<Vec<LedgerEntry>, WagerError> {
        let wallet = self.wallet(user_id)?;
        let guard = lock(&wallet)?;
        Ok(guard.entries.clone())
    }

    async fn transfer(
        &self,
        user_id: &str,
        entry_type: LedgerEntryType,
        amount: Decimal,
    ) -> Result<LedgerEntry, WagerError> {
        let signed = transfer_amount(entry_type, amount)?;
        let wallet = self.wallet(user_id)?;
        let mut guard = lock(&wallet)?;
        let entry = post_entry(&mut guard.account, entry_type, signed, None, Utc::now())?;
        guard.entries.push(entry.clone());
        Ok(entry)
    }

    async fn place(&self, bet: Bet) -> Result<LedgerEntry, WagerError> {
        let wallet = self.wallet(&bet.user_id)?;
        let mut guard = lock(&wallet)?;

        let recent = RecentStakes::from_entries(&guard.entries, bet.placed_at);
        authorize_placement(&guard.account, &recent, &bet)?;

        // Take the index lock before mutating so nothing can fail half-way.
        let mut owners = self.bet_owners.write().map_err(poisoned)?;
        let entry = post_entry(
            &mut guard.account,
            LedgerEntryType::StakeDebit,
            -bet.stake,
            Some(bet.id),
            bet.placed_at,
        )?;
        owners.insert(bet.id, bet.user_id.clone());
        guard.entries.push(entry.clone());
        guard.bets.push(bet);

        debug!(user_id = %entry.user_id, balance = %entry.balance_after, "Stake debited");
        Ok(entry)
    }

    async fn resolve(&self, bet_id: Uuid, resolver: &Resolver<'_>) -> Result<ResolvedBet, WagerError> {
        let owner = self.owner_of(bet_id)?;
        let wallet = self.wallet(&owner)?;
        let mut guard = lock(&wallet)?;
        let wallet = &mut *guard;

        let bet = wallet
            .bets
            .iter_mut()
            .find(|b| b.id == bet_id)
            .ok_or(WagerError::BetNotFound(bet_id))?;
        let resolution = resolver(bet)?;
        let entry = apply_resolution(&mut wallet.account, bet, &resolution)?;
        let bet = bet.clone();
        if let Some(e) = &entry {
            wallet.entries.push(e.clone());
        }

        Ok(ResolvedBet {
            bet,
            entry,
            balance: wallet.account.balance,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
