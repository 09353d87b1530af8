//! Event dispatch
//!
//! Routes transport events to handlers, one task per event so one user's
//! slow payout never blocks another user's messages.
//!
//! - `/withdraw`, `💸 Withdraw` start a withdrawal conversation
//! - `/balance`, `💰 Balance` query the balance
//! - other text goes to whichever conversation awaits that (chat, user)
//! - taps go to the settlement coordinator
//!
//! Commands are matched before pending replies, so `/balance` sent while a
//! withdrawal waits for its amount is answered as a command.

use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::balance::BalanceQuery;
use crate::config::AppConfig;
use crate::core_types::ChatId;
use crate::frontend::{ChatFrontend, ChoiceTap, IncomingMessage, ReplyRouter};
use crate::ledger::LedgerGateway;
use crate::notifier::AuditNotifier;
use crate::payout::PayoutClient;
use crate::withdraw::{IdempotencyStore, Settlement, SettlementCoordinator, WithdrawalConversation};

const GENERIC_FAILURE: &str = "❌ Something went wrong. Try again later.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatEvent {
    Message(IncomingMessage),
    Tap(ChoiceTap),
}

impl ChatEvent {
    pub fn chat_id(&self) -> ChatId {
        match self {
            ChatEvent::Message(m) => m.chat_id,
            ChatEvent::Tap(t) => t.message.chat_id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Withdraw,
    Balance,
}

impl Command {
    /// Whole-message match only: "please /withdraw" is plain text
    pub fn parse(text: &str) -> Option<Self> {
        match text.trim() {
            "/withdraw" | "💸 Withdraw" => Some(Command::Withdraw),
            "/balance" | "💰 Balance" => Some(Command::Balance),
            _ => None,
        }
    }
}

struct Handlers {
    frontend: Arc<dyn ChatFrontend>,
    replies: ReplyRouter,
    conversation: WithdrawalConversation,
    coordinator: Arc<SettlementCoordinator>,
    balance: BalanceQuery,
}

#[derive(Clone)]
pub struct Dispatcher {
    handlers: Arc<Handlers>,
}

impl Dispatcher {
    /// Wire the withdrawal and balance handlers from their collaborators
    pub fn new(
        ledger: Arc<dyn LedgerGateway>,
        payout: Arc<dyn PayoutClient>,
        frontend: Arc<dyn ChatFrontend>,
        idempotency: Arc<dyn IdempotencyStore>,
        config: &AppConfig,
    ) -> Self {
        let currency = config.payout.currency.as_str();
        let replies = ReplyRouter::new();
        let notifier = AuditNotifier::new(frontend.clone(), &config.audit, currency);
        let coordinator = Arc::new(SettlementCoordinator::new(
            ledger.clone(),
            payout,
            frontend.clone(),
            idempotency,
            notifier,
            &config.withdraw,
            currency,
        ));
        let conversation = WithdrawalConversation::new(
            ledger.clone(),
            frontend.clone(),
            replies.clone(),
            coordinator.clone(),
            &config.withdraw,
        );
        let balance = BalanceQuery::new(ledger, frontend.clone(), currency);

        Self {
            handlers: Arc::new(Handlers {
                frontend,
                replies,
                conversation,
                coordinator,
                balance,
            }),
        }
    }

    pub fn replies(&self) -> &ReplyRouter {
        &self.handlers.replies
    }

    /// Handle `event` on its own task
    ///
    /// A panicking handler is logged and the chat gets a generic failure
    /// message; other events are unaffected.
    pub fn dispatch(&self, event: ChatEvent) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move {
            let chat_id = event.chat_id();
            let worker = this.clone();
            let result = tokio::spawn(async move { worker.handle(event).await }).await;
            if let Err(e) = result {
                error!(chat_id, error = %e, "Event handler failed");
                if let Err(send_err) = this
                    .handlers
                    .frontend
                    .send_text(chat_id, GENERIC_FAILURE)
                    .await
                {
                    warn!(chat_id, error = %send_err, "Could not report handler failure");
                }
            }
        })
    }

    /// Handle `event` on the current task
    pub async fn handle(&self, event: ChatEvent) {
        match event {
            ChatEvent::Message(message) => self.on_message(message).await,
            ChatEvent::Tap(tap) => self.on_tap(tap).await,
        }
    }

    async fn on_message(&self, message: IncomingMessage) {
        let h = &self.handlers;
        match Command::parse(&message.text) {
            Some(Command::Withdraw) => {
                // Outcome already shown in the chat
                let _ = h
                    .conversation
                    .start(message.user_id, message.chat_id)
                    .await;
            }
            Some(Command::Balance) => {
                if let Err(e) = h.balance.handle(message.user_id, message.chat_id).await {
                    warn!(chat_id = message.chat_id, error = %e, "Balance reply not delivered");
                }
            }
            None => {
                if let Some(unrouted) = h.replies.deliver(message) {
                    debug!(
                        chat_id = unrouted.chat_id,
                        user_id = unrouted.user_id,
                        "Message not awaited by any conversation"
                    );
                }
            }
        }
    }

    async fn on_tap(&self, tap: ChoiceTap) {
        match self.handlers.coordinator.handle_tap(&tap).await {
            Ok(Settlement::Ignored) => {
                debug!(data = %tap.data, "Tap ignored");
            }
            Ok(settlement) => {
                debug!(user_id = tap.user_id, ?settlement, "Tap handled");
            }
            Err(e) => {
                debug!(user_id = tap.user_id, code = e.code(), "Tap rejected");
            }
        }
    }
}
