//! Balance query
//!
//! Read-only: shows the ledger balance, never a cached one.

use std::sync::Arc;
use tracing::{error, info};

use crate::core_types::{ChatId, UserId};
use crate::frontend::{ChatFrontend, FrontendError};
use crate::ledger::{LedgerError, LedgerGateway};
use crate::money::Amount;

pub struct BalanceQuery {
    ledger: Arc<dyn LedgerGateway>,
    frontend: Arc<dyn ChatFrontend>,
    currency: String,
}

impl BalanceQuery {
    pub fn new(
        ledger: Arc<dyn LedgerGateway>,
        frontend: Arc<dyn ChatFrontend>,
        currency: &str,
    ) -> Self {
        Self {
            ledger,
            frontend,
            currency: currency.to_string(),
        }
    }

    /// Reply with the user's balance; `Ok(None)` when not registered
    pub async fn handle(
        &self,
        user_id: UserId,
        chat_id: ChatId,
    ) -> Result<Option<Amount>, FrontendError> {
        match self.lookup(user_id).await {
            Ok(Some(balance)) => {
                info!(user_id, balance = %balance, "Balance query");
                let text = format!(
                    "💰 Your current balance is: *{} {}*",
                    balance, self.currency
                );
                self.frontend.send_text(chat_id, &text).await?;
                Ok(Some(balance))
            }
            Ok(None) => {
                self.frontend
                    .send_text(
                        chat_id,
                        "⚠️ You are not registered yet. Please use /start first.",
                    )
                    .await?;
                Ok(None)
            }
            Err(e) => {
                error!(user_id, error = %e, "Balance lookup failed");
                self.frontend
                    .send_text(chat_id, "❌ Failed to fetch your balance. Try again later.")
                    .await?;
                Ok(None)
            }
        }
    }

    async fn lookup(&self, user_id: UserId) -> Result<Option<Amount>, LedgerError> {
        Ok(self
            .ledger
            .get_account(user_id)
            .await?
            .map(|account| account.balance))
    }
}
