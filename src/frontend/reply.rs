//! Single-shot reply subscriptions
//!
//! A conversation that needs "the next message from user X in chat Y"
//! registers a [`PendingReply`] handle. Handles live in a table keyed by
//! `(chat, user)` with an expiry; the entry is removed when the handle is
//! dropped, when it fires, or when a newer registration for the same key
//! supersedes it. Cleanup is structural: no matching "remove listener" call
//! is needed, so repeated withdrawal attempts cannot accumulate listeners.

use dashmap::DashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::debug;

use super::IncomingMessage;
use crate::core_types::{ChatId, UserId};

type ReplyKey = (ChatId, UserId);

struct Slot {
    generation: u64,
    expires_at: Instant,
    tx: oneshot::Sender<String>,
}

#[derive(Default)]
struct Inner {
    slots: DashMap<ReplyKey, Slot>,
    next_generation: AtomicU64,
}

/// Table of outstanding reply subscriptions
#[derive(Clone, Default)]
pub struct ReplyRouter {
    inner: Arc<Inner>,
}

/// Result of waiting on a [`PendingReply`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyWait {
    Reply(String),
    /// No reply before the expiry
    Expired,
    /// A newer registration for the same (chat, user) took over
    Superseded,
}

impl ReplyRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to the next message from `user_id` in `chat_id`
    ///
    /// An existing subscription for the same key is superseded.
    pub fn register(&self, chat_id: ChatId, user_id: UserId, ttl: Duration) -> PendingReply {
        let key = (chat_id, user_id);
        let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
        let expires_at = Instant::now() + ttl;
        let (tx, rx) = oneshot::channel();

        let previous = self.inner.slots.insert(
            key,
            Slot {
                generation,
                expires_at,
                tx,
            },
        );
        if previous.is_some() {
            // Dropping the old sender wakes its waiter with `Superseded`
            debug!(chat_id, user_id, "Pending reply superseded");
        }

        PendingReply {
            inner: self.inner.clone(),
            key,
            generation,
            expires_at,
            rx: Some(rx),
        }
    }

    /// Hand a message to its subscriber
    ///
    /// Returns the message back when nobody (alive, unexpired) awaits it, so
    /// the caller can route it elsewhere. Messages from other users or chats
    /// never touch an unrelated subscription.
    pub fn deliver(&self, message: IncomingMessage) -> Option<IncomingMessage> {
        let key = (message.chat_id, message.user_id);
        let now = Instant::now();
        // An expired slot stays put so its waiter still reports `Expired`
        let Some((_, slot)) = self
            .inner
            .slots
            .remove_if(&key, |_, slot| slot.expires_at > now)
        else {
            return Some(message);
        };

        match slot.tx.send(message.text) {
            Ok(()) => None,
            // Waiter already gone
            Err(text) => Some(IncomingMessage { text, ..message }),
        }
    }

    /// Number of live subscriptions
    pub fn pending(&self) -> usize {
        self.inner.slots.len()
    }

    /// Drop expired subscriptions whose handles were leaked; returns the count
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.inner.slots.len();
        self.inner.slots.retain(|_, slot| slot.expires_at > now);
        before.saturating_sub(self.inner.slots.len())
    }
}

/// Handle for one outstanding reply; deregisters itself on drop
pub struct PendingReply {
    inner: Arc<Inner>,
    key: ReplyKey,
    generation: u64,
    expires_at: Instant,
    rx: Option<oneshot::Receiver<String>>,
}

impl PendingReply {
    /// Wait for the reply, the expiry, or a superseding registration
    pub async fn wait(mut self) -> ReplyWait {
        let Some(rx) = self.rx.take() else {
            return ReplyWait::Superseded;
        };

        match tokio::time::timeout_at(self.expires_at, rx).await {
            Ok(Ok(text)) => ReplyWait::Reply(text),
            // Sender dropped by the expiry sweep rather than a newer registration
            Ok(Err(_)) if Instant::now() >= self.expires_at => ReplyWait::Expired,
            Ok(Err(_)) => ReplyWait::Superseded,
            Err(_) => ReplyWait::Expired,
        }
    }
}

impl Drop for PendingReply {
    fn drop(&mut self) {
        // Only remove our own registration, never a newer one
        let generation = self.generation;
        self.inner
            .slots
            .remove_if(&self.key, |_, slot| slot.generation == generation);
    }
}
