//! Withdrawal Conversation
//!
//! Collects the amount for one withdrawal intent and hands a validated
//! request to the coordinator. Nothing here touches the ledger beyond reads.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use super::coordinator::SettlementCoordinator;
use super::error::WithdrawError;
use super::types::WithdrawalRequest;
use crate::config::WithdrawConfig;
use crate::core_types::{ChatId, UserId};
use crate::frontend::{ChatFrontend, MessageRef, ReplyRouter, ReplyWait};
use crate::ledger::LedgerGateway;
use crate::money::Amount;

/// How a conversation ended without an error
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConversationEnd {
    /// Confirmation prompt is on screen
    Prompted(MessageRef),
    /// No reply within the timeout
    TimedOut,
    /// A newer withdrawal intent took over this one
    Superseded,
}

pub struct WithdrawalConversation {
    ledger: Arc<dyn LedgerGateway>,
    frontend: Arc<dyn ChatFrontend>,
    replies: ReplyRouter,
    coordinator: Arc<SettlementCoordinator>,
    reply_timeout: Duration,
}

impl WithdrawalConversation {
    pub fn new(
        ledger: Arc<dyn LedgerGateway>,
        frontend: Arc<dyn ChatFrontend>,
        replies: ReplyRouter,
        coordinator: Arc<SettlementCoordinator>,
        config: &WithdrawConfig,
    ) -> Self {
        Self {
            ledger,
            frontend,
            replies,
            coordinator,
            reply_timeout: Duration::from_millis(config.reply_timeout_ms),
        }
    }

    /// Run one withdrawal intent to its end
    ///
    /// Errors have already been reported in the chat when this returns.
    pub async fn start(
        &self,
        user_id: UserId,
        chat_id: ChatId,
    ) -> Result<ConversationEnd, WithdrawError> {
        match self.run(user_id, chat_id).await {
            Ok(end) => Ok(end),
            Err(e) => {
                info!(user_id, chat_id, code = e.code(), "Withdrawal conversation ended");
                let text = e.user_message(self.coordinator.currency());
                if let Err(send_err) = self.frontend.send_text(chat_id, &text).await {
                    debug!(chat_id, error = %send_err, "Could not report conversation error");
                }
                Err(e)
            }
        }
    }

    async fn run(&self, user_id: UserId, chat_id: ChatId) -> Result<ConversationEnd, WithdrawError> {
        let account = self
            .ledger
            .get_account(user_id)
            .await?
            .ok_or(WithdrawError::NotRegistered)?;
        let destination = self
            .ledger
            .get_destination(account.account_id)
            .await?
            .ok_or(WithdrawError::NoDestination)?;

        // Registered before prompting so a fast reply is not missed
        let pending = self.replies.register(chat_id, user_id, self.reply_timeout);

        let min = self.coordinator.min_amount();
        let prompt = format!(
            "💰 Enter amount to withdraw (min {} {})\n\n🔐 Destination: `{}`",
            min.as_decimal().normalize(),
            self.coordinator.currency(),
            destination
        );
        self.frontend.send_text(chat_id, &prompt).await?;

        let reply = match pending.wait().await {
            ReplyWait::Reply(text) => text,
            ReplyWait::Expired => {
                info!(user_id, chat_id, "Withdrawal amount not received in time");
                self.frontend
                    .send_text(chat_id, "⌛ Withdrawal timed out. Send /withdraw to start again.")
                    .await?;
                return Ok(ConversationEnd::TimedOut);
            }
            ReplyWait::Superseded => {
                debug!(user_id, chat_id, "Withdrawal conversation superseded");
                return Ok(ConversationEnd::Superseded);
            }
        };

        // Advisory: the coordinator re-reads the balance before paying
        let amount = validate_amount(&reply, min, account.balance)?;

        let request = WithdrawalRequest::new(user_id, chat_id, amount, destination);
        let message = self.coordinator.render_prompt(&request).await?;
        Ok(ConversationEnd::Prompted(message))
    }
}

/// Validate a free-text amount against the minimum and a balance snapshot
pub fn validate_amount(text: &str, min: Amount, balance: Amount) -> Result<Amount, WithdrawError> {
    let amount = Amount::parse(text).map_err(|e| {
        debug!(input = %text, error = %e, "Unparseable amount");
        WithdrawError::InvalidAmount { min }
    })?;
    if amount < min {
        return Err(WithdrawError::InvalidAmount { min });
    }
    if amount > balance {
        return Err(WithdrawError::InsufficientFunds { balance });
    }
    Ok(amount)
}
