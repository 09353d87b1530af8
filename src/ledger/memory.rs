//! In-memory ledger
//!
//! Backs the console front-end and the test suites. The conditional debit
//! runs under the DashMap shard lock for the user, so two concurrent debits
//! against one account serialize exactly like the SQL conditional update.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tracing::debug;

use super::{Account, DebitOutcome, LedgerError, LedgerGateway, PayoutDestination};
use crate::config::SeedAccount;
use crate::core_types::{AccountId, UserId};
use crate::money::Amount;

#[derive(Default)]
pub struct InMemoryLedger {
    accounts: DashMap<UserId, Account>,
    destinations: DashMap<AccountId, PayoutDestination>,
    /// Number of debits that were applied
    debit_count: AtomicUsize,
    /// Simulated outage: every call fails with `Unavailable`
    unavailable: AtomicBool,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from the `ledger.accounts` config section
    pub fn from_seed(seed: &[SeedAccount]) -> Self {
        let ledger = Self::new();
        for row in seed {
            ledger.insert_account(row.user_id, row.account_id, row.balance);
            if let Some(handle) = &row.destination {
                ledger.set_destination(row.account_id, handle);
            }
        }
        debug!(accounts = seed.len(), "In-memory ledger seeded");
        ledger
    }

    pub fn insert_account(&self, user_id: UserId, account_id: AccountId, balance: Amount) {
        self.accounts.insert(
            user_id,
            Account {
                account_id,
                balance,
            },
        );
    }

    /// Link (or, with a blank handle, unlink) a payout destination
    pub fn set_destination(&self, account_id: AccountId, handle: &str) {
        match PayoutDestination::new(handle) {
            Some(dest) => {
                self.destinations.insert(account_id, dest);
            }
            None => {
                self.destinations.remove(&account_id);
            }
        }
    }

    /// Overwrite a balance (external top-ups, test setup)
    pub fn set_balance(&self, user_id: UserId, balance: Amount) {
        if let Some(mut account) = self.accounts.get_mut(&user_id) {
            account.balance = balance;
        }
    }

    pub fn balance_of(&self, user_id: UserId) -> Option<Amount> {
        self.accounts.get(&user_id).map(|a| a.balance)
    }

    pub fn debit_count(&self) -> usize {
        self.debit_count.load(Ordering::SeqCst)
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), LedgerError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(LedgerError::Unavailable("in-memory ledger offline".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl LedgerGateway for InMemoryLedger {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn get_account(&self, user_id: UserId) -> Result<Option<Account>, LedgerError> {
        self.check_available()?;
        Ok(self.accounts.get(&user_id).map(|a| a.clone()))
    }

    async fn get_destination(
        &self,
        account_id: AccountId,
    ) -> Result<Option<PayoutDestination>, LedgerError> {
        self.check_available()?;
        Ok(self.destinations.get(&account_id).map(|d| d.clone()))
    }

    async fn debit(&self, user_id: UserId, amount: Amount) -> Result<DebitOutcome, LedgerError> {
        self.check_available()?;

        // get_mut holds the shard write lock: check and write are one step
        let Some(mut account) = self.accounts.get_mut(&user_id) else {
            return Ok(DebitOutcome::InsufficientFunds);
        };
        match account.balance.checked_sub(amount) {
            Some(remaining) => {
                account.balance = remaining;
                self.debit_count.fetch_add(1, Ordering::SeqCst);
                debug!(user_id, amount = %amount, remaining = %remaining, "In-memory debit applied");
                Ok(DebitOutcome::Applied)
            }
            None => Ok(DebitOutcome::InsufficientFunds),
        }
    }
}
