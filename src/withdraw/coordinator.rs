//! Settlement Coordinator
//!
//! Renders the confirmation prompt and drives a confirm tap through the
//! settlement FSM. The only ledger mutation is the debit after the provider
//! confirmed the payout.

use std::sync::Arc;
use tracing::{debug, error, info, warn};
use ulid::Ulid;

use super::error::WithdrawError;
use super::idempotency::{IdempotencyKey, IdempotencyStore};
use super::state::{SettlementAttempt, SettlementState};
use super::token::{CorrelationToken, TokenError};
use super::types::{Settlement, WithdrawalRequest};
use crate::config::{KeyPolicy, WithdrawConfig};
use crate::core_types::UserId;
use crate::frontend::{ChatFrontend, Choice, ChoiceTap, MessageRef};
use crate::ledger::{DebitOutcome, LedgerGateway, PayoutDestination};
use crate::money::Amount;
use crate::notifier::{AuditNotifier, ReconciliationNotice, SettledNotice};
use crate::payout::{PayoutClient, PayoutOutcome};

/// How a failed tap is shown to the user
enum Notice {
    /// Short modal answer to the tap; the prompt is left alone
    Alert(String),
    /// Prompt text replaced with the message
    Edit(String),
}

pub struct SettlementCoordinator {
    ledger: Arc<dyn LedgerGateway>,
    payout: Arc<dyn PayoutClient>,
    frontend: Arc<dyn ChatFrontend>,
    idempotency: Arc<dyn IdempotencyStore>,
    notifier: AuditNotifier,
    key_policy: KeyPolicy,
    min_amount: Amount,
    currency: String,
}

impl SettlementCoordinator {
    pub fn new(
        ledger: Arc<dyn LedgerGateway>,
        payout: Arc<dyn PayoutClient>,
        frontend: Arc<dyn ChatFrontend>,
        idempotency: Arc<dyn IdempotencyStore>,
        notifier: AuditNotifier,
        config: &WithdrawConfig,
        currency: &str,
    ) -> Self {
        info!(
            ledger = ledger.name(),
            payout = payout.name(),
            idempotency = idempotency.name(),
            key_policy = ?config.key_policy,
            "Settlement coordinator ready"
        );
        Self {
            ledger,
            payout,
            frontend,
            idempotency,
            notifier,
            key_policy: config.key_policy,
            min_amount: config.min_amount,
            currency: currency.to_string(),
        }
    }

    pub fn min_amount(&self) -> Amount {
        self.min_amount
    }

    pub fn currency(&self) -> &str {
        &self.currency
    }

    /// Show the confirm / cancel prompt for a validated request
    pub async fn render_prompt(
        &self,
        request: &WithdrawalRequest,
    ) -> Result<MessageRef, WithdrawError> {
        let request_id = match self.key_policy {
            KeyPolicy::RequestId => Some(Ulid::new()),
            KeyPolicy::UserAmount => None,
        };
        let confirm = CorrelationToken::Confirm {
            user_id: request.user_id,
            amount: Some(request.amount),
            request_id,
        };
        let cancel = CorrelationToken::Cancel {
            user_id: request.user_id,
            amount: Some(request.amount),
            request_id,
        };

        let text = format!(
            "✅ Ready to send *{} {}* to `{}`?\n\nPress Confirm to proceed.",
            request.amount, self.currency, request.destination
        );
        let choices = [
            Choice::callback("✅ Confirm", confirm.encode()),
            Choice::callback("❌ Cancel", cancel.encode()),
        ];

        let message = self
            .frontend
            .send_choices(request.chat_id, &text, &choices)
            .await?;

        info!(
            user_id = request.user_id,
            amount = %request.amount,
            message_id = message.message_id,
            state = %SettlementState::PromptRendered,
            "Confirmation prompt rendered"
        );
        Ok(message)
    }

    /// Handle a tap on a confirmation prompt
    ///
    /// Errors have already been shown to the user when this returns.
    pub async fn handle_tap(&self, tap: &ChoiceTap) -> Result<Settlement, WithdrawError> {
        let token = match CorrelationToken::decode(&tap.data) {
            Ok(token) => token,
            Err(TokenError::UnknownAction(action)) => {
                debug!(action = %action, "Tap not addressed to withdrawals");
                return Ok(Settlement::Ignored);
            }
            Err(e) => {
                warn!(user_id = tap.user_id, data = %tap.data, error = %e, "Malformed token");
                return self.reject(tap, WithdrawError::Unauthorized).await;
            }
        };

        // Authorization before anything else, including amount checks
        if token.user_id() != tap.user_id {
            warn!(
                owner = token.user_id(),
                tapper = tap.user_id,
                "Tap by a user who does not own the request"
            );
            return self.reject(tap, WithdrawError::Unauthorized).await;
        }

        let result = match token {
            CorrelationToken::Cancel {
                amount, request_id, ..
            } => self.cancel(tap, amount, request_id).await,
            CorrelationToken::Confirm {
                amount, request_id, ..
            } => self.confirm(tap, amount, request_id).await,
        };
        match result {
            Ok(settlement) => Ok(settlement),
            Err(e) => self.reject(tap, e).await,
        }
    }

    /// Close the prompt without touching the ledger
    ///
    /// Marks the same key a confirm would, so a cancelled prompt can no
    /// longer pay out and a settled one can no longer be cancelled.
    async fn cancel(
        &self,
        tap: &ChoiceTap,
        amount: Option<Amount>,
        request_id: Option<Ulid>,
    ) -> Result<Settlement, WithdrawError> {
        let user_id = tap.user_id;
        match amount {
            Some(amount) => {
                let key = IdempotencyKey::derive(self.key_policy, user_id, amount, request_id);
                let mut attempt = SettlementAttempt::new(user_id, amount, key);
                if !self.idempotency.try_mark(&attempt.key, user_id, amount).await? {
                    info!(key = %attempt.key, user_id, "Cancel after prompt was resolved");
                    return Err(WithdrawError::AlreadyProcessed);
                }
                attempt.advance(SettlementState::Cancelled);
                if let Err(e) = self
                    .idempotency
                    .record(&attempt.key, attempt.state, None)
                    .await
                {
                    warn!(key = %attempt.key, error = %e, "Failed to record cancellation");
                }
            }
            None => debug!(user_id, "Cancel token without amount, nothing to mark"),
        }

        if let Err(e) = self
            .frontend
            .answer_choice(&tap.query_id, "Cancelled.", false)
            .await
        {
            warn!(error = %e, "Failed to answer tap");
        }
        if let Err(e) = self
            .frontend
            .edit_text(tap.message, "❌ Withdrawal cancelled.")
            .await
        {
            warn!(error = %e, "Failed to show cancellation");
        }
        info!(
            user_id,
            state = %SettlementState::Cancelled,
            "Withdrawal cancelled"
        );
        Ok(Settlement::Cancelled)
    }

    async fn confirm(
        &self,
        tap: &ChoiceTap,
        amount: Option<Amount>,
        request_id: Option<Ulid>,
    ) -> Result<Settlement, WithdrawError> {
        let user_id = tap.user_id;
        let amount = amount
            .filter(|a| *a >= self.min_amount)
            .ok_or(WithdrawError::InvalidAmount {
                min: self.min_amount,
            })?;

        let key = IdempotencyKey::derive(self.key_policy, user_id, amount, request_id);
        let mut attempt = SettlementAttempt::new(user_id, amount, key);

        if !self.idempotency.try_mark(&attempt.key, user_id, amount).await? {
            info!(key = %attempt.key, user_id, "Duplicate confirmation rejected");
            return Err(WithdrawError::AlreadyProcessed);
        }
        attempt.advance(SettlementState::LockAcquired);

        if let Err(e) = self.frontend.clear_choices(tap.message).await {
            warn!(key = %attempt.key, error = %e, "Failed to clear prompt buttons");
        }

        let result = self.settle(&mut attempt, tap).await;
        if !attempt.state.is_terminal() {
            attempt.advance(SettlementState::Rejected);
        }

        if let Err(e) = self
            .idempotency
            .record(&attempt.key, attempt.state, attempt.provider_tx_id.as_deref())
            .await
        {
            warn!(key = %attempt.key, state = %attempt.state, error = %e, "Failed to record settlement state");
        }

        match &result {
            Ok(_) => info!(
                key = %attempt.key,
                state = %attempt.state,
                payout_id = attempt.provider_tx_id.as_deref().unwrap_or_default(),
                "Settlement finished"
            ),
            Err(e) => info!(
                key = %attempt.key,
                state = %attempt.state,
                code = e.code(),
                "Settlement finished"
            ),
        }
        result
    }

    /// Revalidate, pay, debit. Caller owns the idempotency mark.
    async fn settle(
        &self,
        attempt: &mut SettlementAttempt,
        tap: &ChoiceTap,
    ) -> Result<Settlement, WithdrawError> {
        let (user_id, amount) = (attempt.user_id, attempt.amount);

        let account = self
            .ledger
            .get_account(user_id)
            .await?
            .ok_or(WithdrawError::UserNotFound)?;
        if account.balance < amount {
            return Err(WithdrawError::InsufficientFunds {
                balance: account.balance,
            });
        }
        let destination = self
            .ledger
            .get_destination(account.account_id)
            .await?
            .ok_or(WithdrawError::NoDestination)?;
        attempt.advance(SettlementState::Revalidated);

        attempt.advance(SettlementState::PayoutInvoked);
        info!(
            key = %attempt.key,
            user_id,
            amount = %amount,
            to = %destination,
            provider = self.payout.name(),
            "Invoking payout"
        );

        let provider_tx_id = match self.payout.send(amount, &destination).await {
            PayoutOutcome::Settled { provider_tx_id } => provider_tx_id,
            PayoutOutcome::Rejected { reason } => {
                attempt.advance(SettlementState::PayoutFailed);
                warn!(key = %attempt.key, reason = %reason, "Payout rejected by provider");
                return Err(WithdrawError::ProviderRejected(reason));
            }
            PayoutOutcome::Unreachable { detail } => {
                // The provider may have paid: no debit, no retry, key stays marked
                attempt.advance(SettlementState::PayoutFailed);
                error!(
                    key = %attempt.key,
                    user_id,
                    amount = %amount,
                    to = %destination,
                    detail = %detail,
                    "Payout outcome unknown, manual check required"
                );
                return Err(WithdrawError::ProviderUnreachable(detail));
            }
        };
        attempt.provider_tx_id = Some(provider_tx_id.clone());

        let debit_failure = match self.ledger.debit(user_id, amount).await {
            Ok(DebitOutcome::Applied) => None,
            Ok(DebitOutcome::InsufficientFunds) => Some(WithdrawError::InsufficientFunds {
                balance: self.current_balance(user_id).await,
            }),
            Err(e) => Some(WithdrawError::from(e)),
        };
        if let Some(err) = debit_failure {
            attempt.advance(SettlementState::PayoutFailed);
            self.notifier.alert_reconciliation(ReconciliationNotice {
                user_id,
                amount,
                destination,
                provider_tx_id,
                reason: err.to_string(),
            });
            return Err(err);
        }
        attempt.advance(SettlementState::Settled);

        self.present_success(tap, amount, &destination, &provider_tx_id)
            .await;
        self.notifier.notify_settled(SettledNotice {
            user_id,
            display_name: tap.display_name.clone(),
            amount,
            destination,
            provider_tx_id: provider_tx_id.clone(),
        });

        Ok(Settlement::Settled {
            amount,
            provider_tx_id,
        })
    }

    /// Best-effort balance for the insufficient-funds message
    async fn current_balance(&self, user_id: UserId) -> Amount {
        match self.ledger.get_account(user_id).await {
            Ok(Some(account)) => account.balance,
            _ => Amount::ZERO,
        }
    }

    async fn present_success(
        &self,
        tap: &ChoiceTap,
        amount: Amount,
        destination: &PayoutDestination,
        provider_tx_id: &str,
    ) {
        if let Err(e) = self
            .frontend
            .answer_choice(&tap.query_id, "Sent ✅", false)
            .await
        {
            warn!(error = %e, "Failed to answer tap");
        }
        let text = format!(
            "✅ Successfully sent *{} {}* to `{}`\n🆔 TxID: `{}`",
            amount, self.currency, destination, provider_tx_id
        );
        if let Err(e) = self.frontend.edit_text(tap.message, &text).await {
            warn!(error = %e, "Failed to show settlement result");
        }
    }

    fn notice_for(&self, err: &WithdrawError) -> Notice {
        match err {
            WithdrawError::InvalidAmount { .. } => Notice::Alert("Invalid amount.".to_string()),
            WithdrawError::Unauthorized
            | WithdrawError::AlreadyProcessed
            | WithdrawError::UserNotFound => Notice::Alert(err.user_message(&self.currency)),
            _ => Notice::Edit(err.user_message(&self.currency)),
        }
    }

    async fn reject(
        &self,
        tap: &ChoiceTap,
        err: WithdrawError,
    ) -> Result<Settlement, WithdrawError> {
        let delivered = match self.notice_for(&err) {
            Notice::Alert(text) => self.frontend.answer_choice(&tap.query_id, &text, true).await,
            Notice::Edit(text) => {
                // Stop the client's spinner, then replace the prompt
                if let Err(e) = self.frontend.answer_choice(&tap.query_id, "", false).await {
                    warn!(error = %e, "Failed to answer tap");
                }
                self.frontend.edit_text(tap.message, &text).await
            }
        };
        if let Err(e) = delivered {
            warn!(user_id = tap.user_id, code = err.code(), error = %e, "Failed to report withdrawal error");
        }
        Err(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AuditConfig;
    use crate::frontend::RecordingFrontend;
    use crate::ledger::InMemoryLedger;
    use crate::payout::MockPayout;
    use crate::withdraw::idempotency::InMemoryIdempotency;

    struct Fixture {
        ledger: Arc<InMemoryLedger>,
        payout: Arc<MockPayout>,
        frontend: Arc<RecordingFrontend>,
        coordinator: SettlementCoordinator,
    }

    fn fixture() -> Fixture {
        let ledger = Arc::new(InMemoryLedger::new());
        ledger.insert_account(42, 1, Amount::parse("10").unwrap());
        ledger.set_destination(1, "alice@example.com");
        let payout = Arc::new(MockPayout::new());
        let frontend = Arc::new(RecordingFrontend::new());
        let notifier = AuditNotifier::new(frontend.clone(), &AuditConfig::default(), "TRX");
        let coordinator = SettlementCoordinator::new(
            ledger.clone(),
            payout.clone(),
            frontend.clone(),
            Arc::new(InMemoryIdempotency::new()),
            notifier,
            &WithdrawConfig::default(),
            "TRX",
        );
        Fixture {
            ledger,
            payout,
            frontend,
            coordinator,
        }
    }

    fn tap(user_id: UserId, message: MessageRef, data: &str) -> ChoiceTap {
        ChoiceTap {
            query_id: "q1".into(),
            user_id,
            display_name: "Alice".into(),
            message,
            data: data.into(),
        }
    }

    #[tokio::test]
    async fn test_prompt_carries_tokens() {
        let f = fixture();
        let request = WithdrawalRequest::new(
            42,
            7,
            Amount::parse("2").unwrap(),
            PayoutDestination::new("alice@example.com").unwrap(),
        );
        let message = f.coordinator.render_prompt(&request).await.unwrap();

        let (prompt, data) = f.frontend.last_prompt().unwrap();
        assert_eq!(prompt, message);
        assert_eq!(
            data,
            vec!["confirm_send:42:2.00000000", "cancel_send:42:2.00000000"]
        );
        assert_eq!(
            f.frontend.texts_in(7),
            vec!["✅ Ready to send *2.00000000 TRX* to `alice@example.com`?\n\nPress Confirm to proceed."]
        );
    }

    #[tokio::test]
    async fn test_unknown_action_ignored() {
        let f = fixture();
        let msg = MessageRef {
            chat_id: 7,
            message_id: 1,
        };
        let result = f.coordinator.handle_tap(&tap(42, msg, "vote:up")).await;
        assert_eq!(result, Ok(Settlement::Ignored));
        assert!(f.frontend.sent().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_token_unauthorized() {
        let f = fixture();
        let msg = MessageRef {
            chat_id: 7,
            message_id: 1,
        };
        let result = f
            .coordinator
            .handle_tap(&tap(42, msg, "confirm_send:abc:1.0"))
            .await;
        assert_eq!(result, Err(WithdrawError::Unauthorized));
        assert_eq!(f.frontend.answers(), vec![("Not authorized.".to_string(), true)]);
        assert_eq!(f.payout.send_count(), 0);
    }

    #[tokio::test]
    async fn test_unauthorized_checked_before_amount() {
        let f = fixture();
        let msg = MessageRef {
            chat_id: 7,
            message_id: 1,
        };
        let result = f
            .coordinator
            .handle_tap(&tap(99, msg, "confirm_send:42:0.00000001"))
            .await;
        assert_eq!(result, Err(WithdrawError::Unauthorized));
    }

    #[tokio::test(start_paused = true)]
    async fn test_debit_unavailable_after_payout_alerts() {
        let f = fixture();
        let msg = MessageRef {
            chat_id: 7,
            message_id: 1,
        };
        // Revalidation succeeds, then the ledger drops before the debit
        let ledger = f.ledger.clone();
        f.payout.set_delay(std::time::Duration::from_millis(50));
        let coordinator = Arc::new(f.coordinator);
        let handle = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move {
                coordinator
                    .handle_tap(&tap(42, msg, "confirm_send:42:1.00000000"))
                    .await
            })
        };
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        ledger.set_unavailable(true);

        let result = handle.await.unwrap();
        assert!(matches!(result, Err(WithdrawError::LedgerUnavailable(_))));
        assert_eq!(f.payout.send_count(), 1);
        assert_eq!(ledger.debit_count(), 0);
    }
}
