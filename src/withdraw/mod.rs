//! Withdrawal request / confirmation / settlement
//!
//! # Flow
//!
//! ```text
//! intent → conversation (account + destination) → amount reply
//!        → PROMPT_RENDERED ──cancel──→ CANCELLED
//!              │ confirm
//!              ▼
//!        LOCK_ACQUIRED → REVALIDATED → PAYOUT_INVOKED → SETTLED
//!              ↓                              ↓
//!           REJECTED                    PAYOUT_FAILED
//! ```
//!
//! # Safety Invariants
//!
//! 1. **At-Most-Once Payout**: one atomic mark per idempotency key; only the
//!    marking tap reaches the payout client
//! 2. **Pay-Then-Debit**: the debit runs only after the provider confirmed,
//!    never debit-then-refund
//! 3. **No Retry On Ambiguity**: an unreachable provider is never retried and
//!    the key stays marked
//! 4. **Owner Only**: a tap by anyone but the request owner has no effect

pub mod conversation;
pub mod coordinator;
pub mod error;
pub mod idempotency;
pub mod state;
pub mod token;
pub mod types;

#[cfg(test)]
mod integration_tests;

pub use conversation::{ConversationEnd, WithdrawalConversation, validate_amount};
pub use coordinator::SettlementCoordinator;
pub use error::WithdrawError;
pub use idempotency::{
    IdempotencyError, IdempotencyKey, IdempotencyStore, InMemoryIdempotency, PgIdempotency,
};
pub use state::{SettlementAttempt, SettlementState};
pub use token::{CorrelationToken, TokenError};
pub use types::{Settlement, WithdrawalRequest};
