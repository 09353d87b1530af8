//! Audit Notifier
//!
//! Fire-and-forget posts to the operations channel. A failed post is
//! logged and never changes the outcome already reported to the user.

use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::AuditConfig;
use crate::core_types::{ChatId, UserId};
use crate::frontend::{ChatFrontend, Choice};
use crate::ledger::PayoutDestination;
use crate::logging::AUDIT_TARGET;
use crate::money::Amount;

/// A payout that settled and was debited
#[derive(Debug, Clone)]
pub struct SettledNotice {
    pub user_id: UserId,
    pub display_name: String,
    pub amount: Amount,
    pub destination: PayoutDestination,
    pub provider_tx_id: String,
}

/// Provider paid but the local debit did not apply
#[derive(Debug, Clone)]
pub struct ReconciliationNotice {
    pub user_id: UserId,
    pub amount: Amount,
    pub destination: PayoutDestination,
    pub provider_tx_id: String,
    pub reason: String,
}

#[derive(Clone)]
pub struct AuditNotifier {
    frontend: Arc<dyn ChatFrontend>,
    channel_id: Option<ChatId>,
    bot_url: Option<String>,
    currency: String,
}

impl AuditNotifier {
    pub fn new(frontend: Arc<dyn ChatFrontend>, config: &AuditConfig, currency: &str) -> Self {
        if config.channel_id.is_none() {
            info!("Audit channel not configured, audit posts go to the log only");
        }
        Self {
            frontend,
            channel_id: config.channel_id,
            bot_url: config.bot_url.clone().filter(|u| !u.is_empty()),
            currency: currency.to_string(),
        }
    }

    pub fn render_settled(&self, notice: &SettledNotice) -> (String, Vec<Choice>) {
        let text = format!(
            "📤 *Payment Sent!*\n\n👤 User: [{}](tg://user?id={})\n💰 Amount: *{} {}*\n📧 Wallet: `{}`\n🆔 TxID: `{}`",
            notice.display_name,
            notice.user_id,
            notice.amount,
            self.currency,
            notice.destination,
            notice.provider_tx_id
        );
        let choices = self
            .bot_url
            .iter()
            .map(|url| Choice::link("🤖 Open Bot", url.clone()))
            .collect();
        (text, choices)
    }

    /// Post a settled-payout record; returns the task handle if a post was scheduled
    pub fn notify_settled(&self, notice: SettledNotice) -> Option<JoinHandle<()>> {
        info!(
            target: AUDIT_TARGET,
            user_id = notice.user_id,
            amount = %notice.amount,
            to = %notice.destination,
            payout_id = %notice.provider_tx_id,
            "Payment sent"
        );

        let channel_id = self.channel_id?;
        let (text, choices) = self.render_settled(&notice);
        let frontend = self.frontend.clone();
        Some(tokio::spawn(async move {
            let result = if choices.is_empty() {
                frontend.send_text(channel_id, &text).await
            } else {
                frontend.send_choices(channel_id, &text, &choices).await
            };
            if let Err(e) = result {
                warn!(channel_id, user_id = notice.user_id, error = %e, "Audit post failed");
            }
        }))
    }

    /// Flag a payout that needs manual reconciliation
    pub fn alert_reconciliation(&self, notice: ReconciliationNotice) -> Option<JoinHandle<()>> {
        error!(
            target: AUDIT_TARGET,
            user_id = notice.user_id,
            amount = %notice.amount,
            to = %notice.destination,
            payout_id = %notice.provider_tx_id,
            reason = %notice.reason,
            "Payout settled but debit not applied, reconciliation required"
        );

        let channel_id = self.channel_id?;
        let text = format!(
            "🚨 *Reconciliation required*\n\n👤 User: `{}`\n💰 Amount: *{} {}*\n📧 Wallet: `{}`\n🆔 TxID: `{}`\n⚠️ {}",
            notice.user_id,
            notice.amount,
            self.currency,
            notice.destination,
            notice.provider_tx_id,
            notice.reason
        );
        let frontend = self.frontend.clone();
        Some(tokio::spawn(async move {
            if let Err(e) = frontend.send_text(channel_id, &text).await {
                warn!(channel_id, error = %e, "Reconciliation alert failed");
            }
        }))
    }
}
