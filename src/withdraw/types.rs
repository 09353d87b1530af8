//! Withdrawal data types

use chrono::{DateTime, Utc};

use crate::core_types::{ChatId, UserId};
use crate::ledger::PayoutDestination;
use crate::money::Amount;

/// A validated amount on its way to the confirmation prompt
///
/// Transient: lives only between the user's reply and the rendered prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WithdrawalRequest {
    pub user_id: UserId,
    pub chat_id: ChatId,
    pub amount: Amount,
    pub destination: PayoutDestination,
    pub created_at: DateTime<Utc>,
}

impl WithdrawalRequest {
    pub fn new(
        user_id: UserId,
        chat_id: ChatId,
        amount: Amount,
        destination: PayoutDestination,
    ) -> Self {
        Self {
            user_id,
            chat_id,
            amount,
            destination,
            created_at: Utc::now(),
        }
    }
}

/// Terminal result of a handled tap
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Settlement {
    Settled {
        amount: Amount,
        provider_tx_id: String,
    },
    Cancelled,
    /// Tap for an action this coordinator does not own
    Ignored,
}
