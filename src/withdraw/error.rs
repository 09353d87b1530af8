//! Withdrawal Error Types

use thiserror::Error;

use super::idempotency::IdempotencyError;
use crate::frontend::FrontendError;
use crate::ledger::LedgerError;
use crate::money::Amount;

/// Withdrawal error types
///
/// None of these are retried. Errors returned from the conversation and the
/// coordinator have already been reported to the user.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WithdrawError {
    // === Eligibility ===
    #[error("User has no ledger account")]
    NotRegistered,

    #[error("No payout destination linked")]
    NoDestination,

    // === Validation ===
    #[error("Invalid amount (minimum {min})")]
    InvalidAmount { min: Amount },

    #[error("Insufficient balance: {balance}")]
    InsufficientFunds { balance: Amount },

    #[error("Tapping user does not own this request")]
    Unauthorized,

    // === Idempotency ===
    #[error("Withdrawal already processed")]
    AlreadyProcessed,

    #[error("User vanished before settlement")]
    UserNotFound,

    // === Provider ===
    #[error("Payout rejected by provider: {0}")]
    ProviderRejected(String),

    /// Outcome unknown: the provider may have paid
    #[error("Payout provider unreachable: {0}")]
    ProviderUnreachable(String),

    // === System ===
    #[error("Ledger unavailable: {0}")]
    LedgerUnavailable(String),

    #[error("Front-end delivery failed: {0}")]
    Frontend(String),
}

impl WithdrawError {
    /// Stable code for logs
    pub fn code(&self) -> &'static str {
        match self {
            WithdrawError::NotRegistered => "NOT_REGISTERED",
            WithdrawError::NoDestination => "NO_DESTINATION",
            WithdrawError::InvalidAmount { .. } => "INVALID_AMOUNT",
            WithdrawError::InsufficientFunds { .. } => "INSUFFICIENT_FUNDS",
            WithdrawError::Unauthorized => "UNAUTHORIZED",
            WithdrawError::AlreadyProcessed => "ALREADY_PROCESSED",
            WithdrawError::UserNotFound => "USER_NOT_FOUND",
            WithdrawError::ProviderRejected(_) => "PROVIDER_REJECTED",
            WithdrawError::ProviderUnreachable(_) => "PROVIDER_UNREACHABLE",
            WithdrawError::LedgerUnavailable(_) => "LEDGER_UNAVAILABLE",
            WithdrawError::Frontend(_) => "FRONTEND",
        }
    }

    /// Chat text shown to the user
    pub fn user_message(&self, currency: &str) -> String {
        match self {
            WithdrawError::NotRegistered => "❌ Please register first with /start.".to_string(),
            WithdrawError::NoDestination => "⚠️ You don’t have a withdrawal wallet set yet.\n\n👉 Please set your wallet email using: `/wallet your@email.com`".to_string(),
            WithdrawError::InvalidAmount { min } => format!(
                "❌ Invalid amount. Minimum is {} {}.",
                min.as_decimal().normalize(),
                currency
            ),
            WithdrawError::InsufficientFunds { balance } => format!(
                "❌ Insufficient balance.\nYour balance: *{} {}*",
                balance, currency
            ),
            WithdrawError::Unauthorized => "Not authorized.".to_string(),
            WithdrawError::AlreadyProcessed => "Already processed.".to_string(),
            WithdrawError::UserNotFound => "User not found.".to_string(),
            WithdrawError::ProviderRejected(reason) => format!("❌ FaucetPay Error: {}", reason),
            WithdrawError::ProviderUnreachable(_) => {
                "❌ Failed to process withdrawal. Please try again later.".to_string()
            }
            WithdrawError::LedgerUnavailable(_) | WithdrawError::Frontend(_) => {
                "❌ Something went wrong. Try again later.".to_string()
            }
        }
    }
}

impl From<LedgerError> for WithdrawError {
    fn from(e: LedgerError) -> Self {
        match e {
            LedgerError::Unavailable(detail) => WithdrawError::LedgerUnavailable(detail),
        }
    }
}

impl From<IdempotencyError> for WithdrawError {
    fn from(e: IdempotencyError) -> Self {
        WithdrawError::LedgerUnavailable(e.to_string())
    }
}

impl From<FrontendError> for WithdrawError {
    fn from(e: FrontendError) -> Self {
        WithdrawError::Frontend(e.to_string())
    }
}
