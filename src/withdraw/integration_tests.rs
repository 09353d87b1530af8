//! Integration Tests for the withdrawal flow
//!
//! Conversation + coordinator wired against the in-memory ledger, the mock
//! payout client and the recording front-end.

use std::sync::Arc;
use std::time::Duration;

use super::conversation::{ConversationEnd, WithdrawalConversation};
use super::coordinator::SettlementCoordinator;
use super::error::WithdrawError;
use super::idempotency::InMemoryIdempotency;
use super::token::CorrelationToken;
use super::types::Settlement;
use crate::config::{AuditConfig, KeyPolicy, WithdrawConfig};
use crate::core_types::{ChatId, UserId};
use crate::frontend::{ChoiceTap, IncomingMessage, MessageRef, RecordingFrontend, ReplyRouter};
use crate::ledger::InMemoryLedger;
use crate::money::Amount;
use crate::notifier::AuditNotifier;
use crate::payout::{MockPayout, PayoutOutcome};

const ALICE: UserId = 42;
const MALLORY: UserId = 99;
const CHAT: ChatId = 7;
const AUDIT_CHANNEL: ChatId = -100;

fn amount(s: &str) -> Amount {
    Amount::parse(s).unwrap()
}

struct TestHarness {
    ledger: Arc<InMemoryLedger>,
    payout: Arc<MockPayout>,
    frontend: Arc<RecordingFrontend>,
    replies: ReplyRouter,
    coordinator: Arc<SettlementCoordinator>,
    conversation: Arc<WithdrawalConversation>,
}

impl TestHarness {
    fn new() -> Self {
        Self::with_policy(KeyPolicy::UserAmount)
    }

    fn with_policy(key_policy: KeyPolicy) -> Self {
        Self::build(key_policy, amount("10"))
    }

    fn with_balance(balance: &str) -> Self {
        Self::build(KeyPolicy::UserAmount, amount(balance))
    }

    fn build(key_policy: KeyPolicy, balance: Amount) -> Self {
        let ledger = Arc::new(InMemoryLedger::new());
        ledger.insert_account(ALICE, 1, balance);
        ledger.set_destination(1, "alice@example.com");

        let payout = Arc::new(MockPayout::new());
        let frontend = Arc::new(RecordingFrontend::new());
        let replies = ReplyRouter::new();
        let config = WithdrawConfig {
            key_policy,
            ..WithdrawConfig::default()
        };
        let notifier = AuditNotifier::new(
            frontend.clone(),
            &AuditConfig {
                channel_id: Some(AUDIT_CHANNEL),
                bot_url: None,
            },
            "TRX",
        );

        let coordinator = Arc::new(SettlementCoordinator::new(
            ledger.clone(),
            payout.clone(),
            frontend.clone(),
            Arc::new(InMemoryIdempotency::new()),
            notifier,
            &config,
            "TRX",
        ));
        let conversation = Arc::new(WithdrawalConversation::new(
            ledger.clone(),
            frontend.clone(),
            replies.clone(),
            coordinator.clone(),
            &config,
        ));

        Self {
            ledger,
            payout,
            frontend,
            replies,
            coordinator,
            conversation,
        }
    }

    /// Run a conversation for `user_id` and answer it with `reply`
    async fn converse(
        &self,
        user_id: UserId,
        reply: &str,
    ) -> Result<ConversationEnd, WithdrawError> {
        let before = self.frontend.sent().len();
        let conversation = self.conversation.clone();
        let handle = tokio::spawn(async move { conversation.start(user_id, CHAT).await });

        // The amount prompt goes out after the subscription is in place
        while self.frontend.sent().len() == before && !handle.is_finished() {
            tokio::task::yield_now().await;
        }
        if !handle.is_finished() {
            let unconsumed = self.replies.deliver(IncomingMessage {
                chat_id: CHAT,
                user_id,
                text: reply.to_string(),
            });
            assert!(unconsumed.is_none(), "reply was not consumed");
        }
        handle.await.unwrap()
    }

    /// Conversation that must end in a prompt; returns the confirm and cancel taps
    async fn prompt(&self, reply: &str) -> (ChoiceTap, ChoiceTap) {
        let end = self.converse(ALICE, reply).await.unwrap();
        let ConversationEnd::Prompted(message) = end else {
            panic!("expected prompt, got {:?}", end);
        };
        let (prompt, data) = self.frontend.last_prompt().unwrap();
        assert_eq!(prompt, message);
        (tap(ALICE, message, &data[0]), tap(ALICE, message, &data[1]))
    }

    async fn wait_for_channel_posts(&self, n: usize) -> Vec<String> {
        for _ in 0..1000 {
            let posts = self.frontend.texts_in(AUDIT_CHANNEL);
            if posts.len() >= n {
                return posts;
            }
            tokio::task::yield_now().await;
        }
        self.frontend.texts_in(AUDIT_CHANNEL)
    }
}

fn tap(user_id: UserId, message: MessageRef, data: &str) -> ChoiceTap {
    ChoiceTap {
        query_id: format!("q-{}", user_id),
        user_id,
        display_name: format!("user{}", user_id),
        message,
        data: data.to_string(),
    }
}

// ========================================================================
// Scenario A: happy path
// ========================================================================

#[tokio::test]
async fn test_withdraw_happy_path() {
    let h = TestHarness::new();
    let (confirm, _) = h.prompt("2.5").await;
    assert_eq!(confirm.data, "confirm_send:42:2.50000000");

    let result = h.coordinator.handle_tap(&confirm).await;
    assert_eq!(
        result,
        Ok(Settlement::Settled {
            amount: amount("2.5"),
            provider_tx_id: "tx-mock-1".into()
        })
    );

    assert_eq!(h.ledger.balance_of(ALICE), Some(amount("7.5")));
    assert_eq!(h.ledger.debit_count(), 1);
    assert_eq!(
        h.payout.sent(),
        vec![(amount("2.5"), "alice@example.com".to_string())]
    );
    assert_eq!(h.frontend.clear_count(), 1);
    assert_eq!(h.frontend.answers(), vec![("Sent ✅".to_string(), false)]);

    let texts = h.frontend.texts_in(CHAT);
    assert_eq!(
        texts.first().map(String::as_str),
        Some("💰 Enter amount to withdraw (min 0.001 TRX)\n\n🔐 Destination: `alice@example.com`")
    );
    assert_eq!(
        texts.last().map(String::as_str),
        Some("✅ Successfully sent *2.50000000 TRX* to `alice@example.com`\n🆔 TxID: `tx-mock-1`")
    );

    let posts = h.wait_for_channel_posts(1).await;
    assert_eq!(posts.len(), 1);
    assert!(posts[0].contains("Payment Sent!"));
    assert!(posts[0].contains("[user42](tg://user?id=42)"));
}

#[tokio::test]
async fn test_withdraw_half_of_balance() {
    let h = TestHarness::with_balance("5");
    let (confirm, _) = h.prompt("2.5").await;

    assert!(matches!(
        h.coordinator.handle_tap(&confirm).await,
        Ok(Settlement::Settled { .. })
    ));
    assert_eq!(h.ledger.balance_of(ALICE).unwrap().to_string(), "2.50000000");
    assert_eq!(
        h.frontend.texts_in(CHAT).last().map(String::as_str),
        Some("✅ Successfully sent *2.50000000 TRX* to `alice@example.com`\n🆔 TxID: `tx-mock-1`")
    );
}

// ========================================================================
// Scenario B: balance below the request
// ========================================================================

#[tokio::test]
async fn test_minimum_request_above_dust_balance() {
    let h = TestHarness::with_balance("0.0005");
    let result = h.converse(ALICE, "0.001").await;

    assert_eq!(
        result,
        Err(WithdrawError::InsufficientFunds {
            balance: amount("0.0005")
        })
    );
    assert!(h.frontend.last_prompt().is_none());
    assert_eq!(h.payout.send_count(), 0);
    assert_eq!(h.ledger.balance_of(ALICE), Some(amount("0.0005")));
}

// ========================================================================
// Scenario C: duplicate confirmations
// ========================================================================

#[tokio::test]
async fn test_double_tap_pays_once() {
    let h = TestHarness::new();
    let (confirm, _) = h.prompt("1").await;

    assert!(h.coordinator.handle_tap(&confirm).await.is_ok());
    assert_eq!(
        h.coordinator.handle_tap(&confirm).await,
        Err(WithdrawError::AlreadyProcessed)
    );

    assert_eq!(h.payout.send_count(), 1);
    assert_eq!(h.ledger.debit_count(), 1);
    assert_eq!(h.ledger.balance_of(ALICE), Some(amount("9")));
    assert_eq!(
        h.frontend.answers().last(),
        Some(&("Already processed.".to_string(), true))
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_taps_single_payout() {
    let h = TestHarness::new();
    h.payout.set_delay(Duration::from_millis(50));
    let (confirm, _) = h.prompt("1").await;

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let coordinator = h.coordinator.clone();
            let confirm = confirm.clone();
            tokio::spawn(async move { coordinator.handle_tap(&confirm).await })
        })
        .collect();

    let mut settled = 0;
    let mut duplicates = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(Settlement::Settled { .. }) => settled += 1,
            Err(WithdrawError::AlreadyProcessed) => duplicates += 1,
            other => panic!("unexpected result {:?}", other),
        }
    }

    assert_eq!(settled, 1);
    assert_eq!(duplicates, 15);
    assert_eq!(h.payout.send_count(), 1);
    assert_eq!(h.ledger.debit_count(), 1);
    assert_eq!(h.ledger.balance_of(ALICE), Some(amount("9")));
}

// ========================================================================
// Scenario D: provider failures
// ========================================================================

#[tokio::test]
async fn test_unreachable_provider_never_debits_or_retries() {
    let h = TestHarness::new();
    h.payout.set_outcome(PayoutOutcome::Unreachable {
        detail: "operation timed out".into(),
    });
    let (confirm, _) = h.prompt("3").await;

    assert_eq!(
        h.coordinator.handle_tap(&confirm).await,
        Err(WithdrawError::ProviderUnreachable(
            "operation timed out".into()
        ))
    );
    assert_eq!(h.ledger.balance_of(ALICE), Some(amount("10")));
    assert_eq!(h.ledger.debit_count(), 0);
    assert_eq!(
        h.frontend.texts_in(CHAT).last().map(String::as_str),
        Some("❌ Failed to process withdrawal. Please try again later.")
    );

    // Same key stays marked: the provider may have paid
    assert_eq!(
        h.coordinator.handle_tap(&confirm).await,
        Err(WithdrawError::AlreadyProcessed)
    );
    assert_eq!(h.payout.send_count(), 1);
}

#[tokio::test]
async fn test_rejected_payout_reports_provider_message() {
    let h = TestHarness::new();
    h.payout.set_outcome(PayoutOutcome::Rejected {
        reason: "Invalid payout address".into(),
    });
    let (confirm, _) = h.prompt("3").await;

    assert_eq!(
        h.coordinator.handle_tap(&confirm).await,
        Err(WithdrawError::ProviderRejected(
            "Invalid payout address".into()
        ))
    );
    assert_eq!(h.ledger.debit_count(), 0);
    assert_eq!(
        h.frontend.texts_in(CHAT).last().map(String::as_str),
        Some("❌ FaucetPay Error: Invalid payout address")
    );
    assert!(h.frontend.texts_in(AUDIT_CHANNEL).is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_debit_race_after_payout_is_downgraded() {
    let h = TestHarness::new();
    h.payout.set_delay(Duration::from_millis(100));
    let (confirm, _) = h.prompt("4").await;

    let coordinator = h.coordinator.clone();
    let handle = tokio::spawn(async move { coordinator.handle_tap(&confirm).await });

    // Balance drained elsewhere while the payout is in flight
    tokio::time::sleep(Duration::from_millis(10)).await;
    h.ledger.set_balance(ALICE, amount("1"));

    let result = handle.await.unwrap();
    assert_eq!(
        result,
        Err(WithdrawError::InsufficientFunds {
            balance: amount("1")
        })
    );
    assert_eq!(h.payout.send_count(), 1);
    assert_eq!(h.ledger.debit_count(), 0);
    assert_eq!(h.ledger.balance_of(ALICE), Some(amount("1")));

    let posts = h.wait_for_channel_posts(1).await;
    assert_eq!(posts.len(), 1);
    assert!(posts[0].contains("Reconciliation required"));
}

// ========================================================================
// Validation
// ========================================================================

#[tokio::test]
async fn test_below_minimum_reply_never_prompts() {
    let h = TestHarness::new();
    for reply in ["0.0005", "abc", "0"] {
        let result = h.converse(ALICE, reply).await;
        let min = amount("0.001");
        assert_eq!(result, Err(WithdrawError::InvalidAmount { min }), "{}", reply);
    }
    assert!(h.frontend.last_prompt().is_none());
    assert_eq!(h.payout.send_count(), 0);
    assert_eq!(
        h.frontend.texts_in(CHAT).last().map(String::as_str),
        Some("❌ Invalid amount. Minimum is 0.001 TRX.")
    );
}

#[tokio::test]
async fn test_reply_above_snapshot_balance() {
    let h = TestHarness::new();
    let result = h.converse(ALICE, "11").await;
    assert_eq!(
        result,
        Err(WithdrawError::InsufficientFunds {
            balance: amount("10")
        })
    );
    assert!(h.frontend.last_prompt().is_none());
}

#[tokio::test]
async fn test_forged_small_amount_rejected_at_confirm() {
    let h = TestHarness::new();
    let (confirm, _) = h.prompt("1").await;
    let forged = tap(ALICE, confirm.message, "confirm_send:42:0.00010000");

    assert_eq!(
        h.coordinator.handle_tap(&forged).await,
        Err(WithdrawError::InvalidAmount {
            min: amount("0.001")
        })
    );
    assert_eq!(
        h.frontend.answers(),
        vec![("Invalid amount.".to_string(), true)]
    );
    assert_eq!(h.payout.send_count(), 0);
    // The prompt keeps its buttons
    assert_eq!(h.frontend.clear_count(), 0);
}

#[tokio::test]
async fn test_confirm_time_insufficient_funds() {
    let h = TestHarness::new();
    let (confirm, _) = h.prompt("5").await;
    h.ledger.set_balance(ALICE, amount("1"));

    assert_eq!(
        h.coordinator.handle_tap(&confirm).await,
        Err(WithdrawError::InsufficientFunds {
            balance: amount("1")
        })
    );
    assert_eq!(h.payout.send_count(), 0);
    assert_eq!(h.ledger.debit_count(), 0);
    assert_eq!(
        h.frontend.texts_in(CHAT).last().map(String::as_str),
        Some("❌ Insufficient balance.\nYour balance: *1.00000000 TRX*")
    );
}

#[tokio::test]
async fn test_destination_unlinked_before_confirm() {
    let h = TestHarness::new();
    let (confirm, _) = h.prompt("1").await;
    h.ledger.set_destination(1, "");

    assert_eq!(
        h.coordinator.handle_tap(&confirm).await,
        Err(WithdrawError::NoDestination)
    );
    assert_eq!(h.payout.send_count(), 0);
}

#[tokio::test]
async fn test_ledger_outage_at_confirm() {
    let h = TestHarness::new();
    let (confirm, _) = h.prompt("1").await;
    h.ledger.set_unavailable(true);

    let result = h.coordinator.handle_tap(&confirm).await;
    assert!(matches!(result, Err(WithdrawError::LedgerUnavailable(_))));
    assert_eq!(h.payout.send_count(), 0);
}

// ========================================================================
// Authorization & cancel
// ========================================================================

#[tokio::test]
async fn test_foreign_tap_has_no_effect() {
    let h = TestHarness::new();
    let (confirm, cancel) = h.prompt("1").await;

    for data in [&confirm.data, &cancel.data] {
        let foreign = tap(MALLORY, confirm.message, data);
        assert_eq!(
            h.coordinator.handle_tap(&foreign).await,
            Err(WithdrawError::Unauthorized)
        );
    }
    assert_eq!(
        h.frontend.answers(),
        vec![
            ("Not authorized.".to_string(), true),
            ("Not authorized.".to_string(), true)
        ]
    );
    assert_eq!(h.payout.send_count(), 0);
    assert_eq!(h.frontend.clear_count(), 0);

    // Nothing was marked: the owner can still confirm
    assert!(h.coordinator.handle_tap(&confirm).await.is_ok());
    assert_eq!(h.payout.send_count(), 1);
}

#[tokio::test]
async fn test_cancel_touches_nothing() {
    let h = TestHarness::new();
    let (_, cancel) = h.prompt("1").await;
    // Cancel must not need the ledger at all
    h.ledger.set_unavailable(true);

    assert_eq!(
        h.coordinator.handle_tap(&cancel).await,
        Ok(Settlement::Cancelled)
    );
    assert_eq!(h.frontend.answers(), vec![("Cancelled.".to_string(), false)]);
    assert_eq!(
        h.frontend.texts_in(CHAT).last().map(String::as_str),
        Some("❌ Withdrawal cancelled.")
    );
    h.ledger.set_unavailable(false);
    assert_eq!(h.ledger.balance_of(ALICE), Some(amount("10")));
    assert_eq!(h.payout.send_count(), 0);
}

#[tokio::test]
async fn test_confirm_after_cancel_never_pays() {
    let h = TestHarness::new();
    let (confirm, cancel) = h.prompt("1").await;

    assert_eq!(
        h.coordinator.handle_tap(&cancel).await,
        Ok(Settlement::Cancelled)
    );
    assert_eq!(
        h.coordinator.handle_tap(&confirm).await,
        Err(WithdrawError::AlreadyProcessed)
    );

    assert_eq!(h.payout.send_count(), 0);
    assert_eq!(h.ledger.debit_count(), 0);
    assert_eq!(h.ledger.balance_of(ALICE), Some(amount("10")));
    assert_eq!(
        h.frontend.texts_in(CHAT).last().map(String::as_str),
        Some("❌ Withdrawal cancelled.")
    );
    assert_eq!(
        h.frontend.answers().last(),
        Some(&("Already processed.".to_string(), true))
    );
}

#[tokio::test]
async fn test_cancel_after_settlement_keeps_receipt() {
    let h = TestHarness::new();
    let (confirm, cancel) = h.prompt("1").await;
    assert!(h.coordinator.handle_tap(&confirm).await.is_ok());

    assert_eq!(
        h.coordinator.handle_tap(&cancel).await,
        Err(WithdrawError::AlreadyProcessed)
    );
    assert_eq!(
        h.frontend.texts_in(CHAT).last().map(String::as_str),
        Some("✅ Successfully sent *1.00000000 TRX* to `alice@example.com`\n🆔 TxID: `tx-mock-1`")
    );
    assert_eq!(
        h.frontend.answers().last(),
        Some(&("Already processed.".to_string(), true))
    );
    assert_eq!(h.payout.send_count(), 1);
    assert_eq!(h.ledger.balance_of(ALICE), Some(amount("9")));
}

#[tokio::test]
async fn test_cancel_under_request_id_policy_is_per_prompt() {
    let h = TestHarness::with_policy(KeyPolicy::RequestId);
    let (first_confirm, first_cancel) = h.prompt("1").await;
    let (second_confirm, _) = h.prompt("1").await;

    assert_eq!(
        h.coordinator.handle_tap(&first_cancel).await,
        Ok(Settlement::Cancelled)
    );
    assert_eq!(
        h.coordinator.handle_tap(&first_confirm).await,
        Err(WithdrawError::AlreadyProcessed)
    );
    // A fresh prompt for the same amount is unaffected
    assert!(h.coordinator.handle_tap(&second_confirm).await.is_ok());
    assert_eq!(h.payout.send_count(), 1);
}

// ========================================================================
// Key policies
// ========================================================================

#[tokio::test]
async fn test_user_amount_policy_rejects_repeat_amount() {
    let h = TestHarness::new();
    let (first, _) = h.prompt("1").await;
    assert!(h.coordinator.handle_tap(&first).await.is_ok());

    let (second, _) = h.prompt("1").await;
    assert_eq!(
        h.coordinator.handle_tap(&second).await,
        Err(WithdrawError::AlreadyProcessed)
    );
    assert_eq!(h.payout.send_count(), 1);
}

#[tokio::test]
async fn test_request_id_policy_allows_repeat_amount() {
    let h = TestHarness::with_policy(KeyPolicy::RequestId);
    let (first, _) = h.prompt("1").await;
    let (second, _) = h.prompt("1").await;
    assert_ne!(first.data, second.data);
    assert!(matches!(
        CorrelationToken::decode(&first.data),
        Ok(CorrelationToken::Confirm {
            request_id: Some(_),
            ..
        })
    ));

    assert!(h.coordinator.handle_tap(&first).await.is_ok());
    assert!(h.coordinator.handle_tap(&second).await.is_ok());
    // Replaying either prompt is still rejected
    assert_eq!(
        h.coordinator.handle_tap(&first).await,
        Err(WithdrawError::AlreadyProcessed)
    );

    assert_eq!(h.payout.send_count(), 2);
    assert_eq!(h.ledger.balance_of(ALICE), Some(amount("8")));
}

// ========================================================================
// Conversation lifecycle
// ========================================================================

#[tokio::test]
async fn test_unregistered_user() {
    let h = TestHarness::new();
    assert_eq!(
        h.conversation.start(MALLORY, CHAT).await,
        Err(WithdrawError::NotRegistered)
    );
    assert_eq!(
        h.frontend.texts_in(CHAT),
        vec!["❌ Please register first with /start."]
    );
    assert_eq!(h.replies.pending(), 0);
}

#[tokio::test]
async fn test_missing_destination() {
    let h = TestHarness::new();
    h.ledger.set_destination(1, "");
    assert_eq!(
        h.conversation.start(ALICE, CHAT).await,
        Err(WithdrawError::NoDestination)
    );
    assert!(h.frontend.texts_in(CHAT)[0].starts_with("⚠️ You don’t have a withdrawal wallet set yet."));
    assert_eq!(h.replies.pending(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_reply_timeout_cleans_up() {
    let h = TestHarness::new();
    for _ in 0..20 {
        assert_eq!(
            h.conversation.start(ALICE, CHAT).await,
            Ok(ConversationEnd::TimedOut)
        );
    }
    assert_eq!(h.replies.pending(), 0);
    assert_eq!(
        h.frontend.texts_in(CHAT).last().map(String::as_str),
        Some("⌛ Withdrawal timed out. Send /withdraw to start again.")
    );

    // A late reply is left for other handlers
    assert!(
        h.replies
            .deliver(IncomingMessage {
                chat_id: CHAT,
                user_id: ALICE,
                text: "1".into(),
            })
            .is_some()
    );
}

#[tokio::test]
async fn test_new_intent_supersedes_pending_one() {
    let h = TestHarness::new();

    let conversation = h.conversation.clone();
    let first = tokio::spawn(async move { conversation.start(ALICE, CHAT).await });
    while h.replies.pending() == 0 {
        tokio::task::yield_now().await;
    }

    let end = h.prompt("2").await;
    assert_eq!(first.await.unwrap(), Ok(ConversationEnd::Superseded));
    assert_eq!(end.0.data, "confirm_send:42:2.00000000");
    assert_eq!(h.replies.pending(), 0);
}

#[tokio::test]
async fn test_other_users_reply_not_consumed() {
    let h = TestHarness::new();
    let conversation = h.conversation.clone();
    let handle = tokio::spawn(async move { conversation.start(ALICE, CHAT).await });
    while h.replies.pending() == 0 {
        tokio::task::yield_now().await;
    }

    let stray = IncomingMessage {
        chat_id: CHAT,
        user_id: MALLORY,
        text: "5".into(),
    };
    assert_eq!(h.replies.deliver(stray.clone()), Some(stray));
    assert_eq!(h.replies.pending(), 1);

    assert!(
        h.replies
            .deliver(IncomingMessage {
                chat_id: CHAT,
                user_id: ALICE,
                text: "5".into(),
            })
            .is_none()
    );
    assert!(matches!(
        handle.await.unwrap(),
        Ok(ConversationEnd::Prompted(_))
    ));
}
