//! Ledger Gateway
//!
//! Authoritative access to user balances and linked payout destinations.
//!
//! # Safety Invariants
//!
//! 1. **Sole Owner**: balance is never cached above this layer across turns
//! 2. **Conditional Debit**: `debit` decrements only if `balance >= amount`,
//!    evaluated atomically with the write (never read-then-write)
//! 3. **Single Mutation**: `debit` is the only write this subsystem performs

pub mod memory;
pub mod postgres;

pub use memory::InMemoryLedger;
pub use postgres::PgLedger;

use async_trait::async_trait;
use std::fmt;
use thiserror::Error;

use crate::core_types::{AccountId, UserId};
use crate::money::Amount;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("Ledger unavailable: {0}")]
    Unavailable(String),
}

impl From<sqlx::Error> for LedgerError {
    fn from(e: sqlx::Error) -> Self {
        LedgerError::Unavailable(e.to_string())
    }
}

/// Ledger row for one registered user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    pub account_id: AccountId,
    pub balance: Amount,
}

/// Linked external payout account handle (e.g. a provider account email)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PayoutDestination(String);

impl PayoutDestination {
    /// Returns `None` for a blank handle (treated as "not set")
    pub fn new(handle: impl Into<String>) -> Option<Self> {
        let handle = handle.into();
        let trimmed = handle.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(Self(trimmed.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PayoutDestination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Result of a conditional debit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebitOutcome {
    /// Balance was decremented by exactly the requested amount
    Applied,
    /// Precondition `balance >= amount` did not hold (or the user vanished)
    InsufficientFunds,
}

/// Ledger Gateway boundary
#[async_trait]
pub trait LedgerGateway: Send + Sync {
    /// Get backend name for logging
    fn name(&self) -> &'static str;

    /// Look up the account of a chat user; `None` means not registered
    async fn get_account(&self, user_id: UserId) -> Result<Option<Account>, LedgerError>;

    /// Linked payout destination; `None` means not set
    async fn get_destination(
        &self,
        account_id: AccountId,
    ) -> Result<Option<PayoutDestination>, LedgerError>;

    /// Conditionally decrement the balance
    ///
    /// # Atomicity
    /// MUST apply only if the current balance is at least `amount`, checked
    /// and written in one step against the datastore.
    async fn debit(&self, user_id: UserId, amount: Amount) -> Result<DebitOutcome, LedgerError>;
}
