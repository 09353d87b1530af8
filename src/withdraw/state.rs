//! Settlement FSM State Definitions

use std::fmt;
use tracing::{debug, warn};

use super::idempotency::IdempotencyKey;
use crate::core_types::UserId;
use crate::money::Amount;

/// Settlement FSM States
///
/// Terminal: SETTLED, PAYOUT_FAILED, CANCELLED, REJECTED
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SettlementState {
    /// Confirmation prompt is on screen, nothing reserved
    PromptRendered,

    /// Idempotency key marked; no other tap can proceed for this key
    LockAcquired,

    /// Account, balance and destination re-read from the ledger
    Revalidated,

    /// Provider call in flight
    /// CRITICAL: from here on the key stays marked forever
    PayoutInvoked,

    /// Terminal: provider paid and the ledger was debited
    Settled,

    /// Terminal: provider refused or did not answer, or the debit lost
    PayoutFailed,

    /// Terminal: user cancelled from the prompt
    Cancelled,

    /// Terminal: validation failed before any payout
    Rejected,
}

impl SettlementState {
    /// Check if this is a terminal state (no more transitions possible)
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SettlementState::Settled
                | SettlementState::PayoutFailed
                | SettlementState::Cancelled
                | SettlementState::Rejected
        )
    }

    /// The provider may have moved money
    #[inline]
    pub fn payout_attempted(&self) -> bool {
        matches!(
            self,
            SettlementState::PayoutInvoked | SettlementState::Settled | SettlementState::PayoutFailed
        )
    }

    /// Legal edges of the FSM
    pub fn can_transition_to(&self, next: SettlementState) -> bool {
        use SettlementState::*;
        matches!(
            (self, next),
            (PromptRendered, LockAcquired | Cancelled | Rejected)
                | (LockAcquired, Revalidated | Rejected)
                | (Revalidated, PayoutInvoked)
                | (PayoutInvoked, Settled | PayoutFailed)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SettlementState::PromptRendered => "PROMPT_RENDERED",
            SettlementState::LockAcquired => "LOCK_ACQUIRED",
            SettlementState::Revalidated => "REVALIDATED",
            SettlementState::PayoutInvoked => "PAYOUT_INVOKED",
            SettlementState::Settled => "SETTLED",
            SettlementState::PayoutFailed => "PAYOUT_FAILED",
            SettlementState::Cancelled => "CANCELLED",
            SettlementState::Rejected => "REJECTED",
        }
    }

    /// Inverse of [`as_str`](Self::as_str), used when reading stored attempts
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "PROMPT_RENDERED" => Some(SettlementState::PromptRendered),
            "LOCK_ACQUIRED" => Some(SettlementState::LockAcquired),
            "REVALIDATED" => Some(SettlementState::Revalidated),
            "PAYOUT_INVOKED" => Some(SettlementState::PayoutInvoked),
            "SETTLED" => Some(SettlementState::Settled),
            "PAYOUT_FAILED" => Some(SettlementState::PayoutFailed),
            "CANCELLED" => Some(SettlementState::Cancelled),
            "REJECTED" => Some(SettlementState::Rejected),
            _ => None,
        }
    }
}

impl fmt::Display for SettlementState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One confirmation being driven through the FSM
#[derive(Debug, Clone)]
pub struct SettlementAttempt {
    pub user_id: UserId,
    pub amount: Amount,
    pub key: IdempotencyKey,
    pub state: SettlementState,
    pub provider_tx_id: Option<String>,
}

impl SettlementAttempt {
    pub fn new(user_id: UserId, amount: Amount, key: IdempotencyKey) -> Self {
        Self {
            user_id,
            amount,
            key,
            state: SettlementState::PromptRendered,
            provider_tx_id: None,
        }
    }

    /// Move to `next`; illegal edges are logged and ignored
    pub fn advance(&mut self, next: SettlementState) -> bool {
        if !self.state.can_transition_to(next) {
            warn!(
                key = %self.key,
                from = %self.state,
                to = %next,
                "Illegal settlement transition ignored"
            );
            return false;
        }
        debug!(
            key = %self.key,
            user_id = self.user_id,
            amount = %self.amount,
            "{} -> {}",
            self.state,
            next
        );
        self.state = next;
        true
    }
}
