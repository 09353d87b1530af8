//! Payout Client
//!
//! Wraps the external payment provider. The provider call is NOT
//! idempotent: callers must invoke `send` at most once per settlement.
//!
//! Outcomes mirror the three-way split used for every external call:
//! - `Settled` - provider confirmed the payout
//! - `Rejected` - provider explicitly refused (no funds moved)
//! - `Unreachable` - timeout, transport failure or unreadable response;
//!   the payout MAY have happened, so it is never retried automatically

pub mod faucetpay;
pub mod simulated;

pub use faucetpay::FaucetPayClient;
pub use simulated::SimulatedPayout;

use async_trait::async_trait;
use thiserror::Error;

use crate::ledger::PayoutDestination;
use crate::money::Amount;

/// Construction-time errors (runtime failures are `PayoutOutcome`s)
#[derive(Debug, Error)]
pub enum PayoutError {
    #[error("Payout client misconfigured: {0}")]
    Misconfigured(String),

    #[error("Failed to build HTTP client: {0}")]
    Http(#[from] reqwest::Error),
}

/// Placeholder shown when the provider omits a transaction id
pub const UNKNOWN_TX_ID: &str = "N/A";

/// Normalized provider response
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayoutOutcome {
    Settled { provider_tx_id: String },
    Rejected { reason: String },
    Unreachable { detail: String },
}

impl PayoutOutcome {
    #[inline]
    pub fn is_settled(&self) -> bool {
        matches!(self, PayoutOutcome::Settled { .. })
    }

    /// Outcome unknown: the provider may have paid despite the failure
    #[inline]
    pub fn is_ambiguous(&self) -> bool {
        matches!(self, PayoutOutcome::Unreachable { .. })
    }
}

/// Payout provider boundary
#[async_trait]
pub trait PayoutClient: Send + Sync {
    /// Get provider name for logging
    fn name(&self) -> &'static str;

    /// Send `amount` to `destination`, bounded by the client's timeout
    async fn send(&self, amount: Amount, destination: &PayoutDestination) -> PayoutOutcome;
}


#[cfg(test)]
pub use mock::MockPayout;
