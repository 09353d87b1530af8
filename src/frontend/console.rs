//! Console transport
//!
//! Renders outbound messages on stdout so the bot can be driven from a
//! terminal. Inbound lines are parsed by [`parse_line`]:
//!
//! ```text
//! msg <user_id> <chat_id> <text...>
//! tap <user_id> <chat_id> <message_id> <data>
//! ```

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use tokio::io::{AsyncWriteExt, Stdout};
use tokio::sync::Mutex;

use super::{ChatFrontend, Choice, ChoiceTap, FrontendError, IncomingMessage, MessageRef};
use crate::core_types::{ChatId, MessageId};

/// How many of the most recent messages stay editable
const EDIT_WINDOW: MessageId = 1024;

pub struct ConsoleFrontend {
    out: Mutex<Stdout>,
    next_message_id: AtomicI64,
    next_query_id: AtomicU64,
    /// Most recent messages we sent, by id; edits to anything else fail
    known: DashMap<MessageId, ChatId>,
    edit_window: MessageId,
}

/// One parsed console line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleInput {
    Message(IncomingMessage),
    Tap(ChoiceTap),
}

impl Default for ConsoleFrontend {
    fn default() -> Self {
        Self::new()
    }
}

impl ConsoleFrontend {
    pub fn new() -> Self {
        Self::with_edit_window(EDIT_WINDOW)
    }

    /// Keep only the last `edit_window` messages editable
    pub fn with_edit_window(edit_window: MessageId) -> Self {
        Self {
            out: Mutex::new(tokio::io::stdout()),
            next_message_id: AtomicI64::new(1),
            next_query_id: AtomicU64::new(1),
            known: DashMap::new(),
            edit_window: edit_window.max(1),
        }
    }

    /// Parse an input line; `None` for blank or unrecognized lines
    pub fn parse_line(&self, line: &str) -> Option<ConsoleInput> {
        let line = line.trim();
        let (verb, rest) = line.split_once(' ')?;
        match verb {
            "msg" => {
                let mut parts = rest.splitn(3, ' ');
                let user_id = parts.next()?.parse().ok()?;
                let chat_id = parts.next()?.parse().ok()?;
                let text = parts.next()?.to_string();
                Some(ConsoleInput::Message(IncomingMessage {
                    chat_id,
                    user_id,
                    text,
                }))
            }
            "tap" => {
                let mut parts = rest.split_whitespace();
                let user_id = parts.next()?.parse().ok()?;
                let chat_id = parts.next()?.parse().ok()?;
                let message_id = parts.next()?.parse().ok()?;
                let data = parts.next()?.to_string();
                let query_id = self.next_query_id.fetch_add(1, Ordering::Relaxed);
                Some(ConsoleInput::Tap(ChoiceTap {
                    query_id: format!("q{}", query_id),
                    user_id,
                    display_name: format!("user{}", user_id),
                    message: MessageRef {
                        chat_id,
                        message_id,
                    },
                    data,
                }))
            }
            _ => None,
        }
    }

    async fn emit(&self, text: String) -> Result<(), FrontendError> {
        let mut out = self.out.lock().await;
        out.write_all(text.as_bytes())
            .await
            .map_err(|e| FrontendError::Delivery(e.to_string()))?;
        out.flush()
            .await
            .map_err(|e| FrontendError::Delivery(e.to_string()))
    }

    fn allocate(&self, chat_id: ChatId) -> MessageRef {
        let message = MessageRef {
            chat_id,
            message_id: self.next_message_id.fetch_add(1, Ordering::Relaxed),
        };
        self.known.insert(message.message_id, chat_id);
        self.known.remove(&(message.message_id - self.edit_window));
        message
    }

    fn require_known(&self, message: MessageRef) -> Result<(), FrontendError> {
        let known = self
            .known
            .get(&message.message_id)
            .is_some_and(|chat| *chat == message.chat_id);
        if known {
            Ok(())
        } else {
            Err(FrontendError::MessageNotFound {
                chat_id: message.chat_id,
                message_id: message.message_id,
            })
        }
    }
}

fn render_choices(choices: &[Choice]) -> String {
    choices
        .iter()
        .map(|c| match c {
            Choice::Callback { label, data } => format!("  [{}] -> {}\n", label, data),
            Choice::Link { label, url } => format!("  [{}] {}\n", label, url),
        })
        .collect()
}

#[async_trait]
impl ChatFrontend for ConsoleFrontend {
    async fn send_text(&self, chat_id: ChatId, text: &str) -> Result<MessageRef, FrontendError> {
        let message = self.allocate(chat_id);
        self.emit(format!(
            "[chat {} #{}] {}\n",
            chat_id, message.message_id, text
        ))
        .await?;
        Ok(message)
    }

    async fn send_choices(
        &self,
        chat_id: ChatId,
        text: &str,
        choices: &[Choice],
    ) -> Result<MessageRef, FrontendError> {
        let message = self.allocate(chat_id);
        self.emit(format!(
            "[chat {} #{}] {}\n{}",
            chat_id,
            message.message_id,
            text,
            render_choices(choices)
        ))
        .await?;
        Ok(message)
    }

    async fn edit_text(&self, message: MessageRef, text: &str) -> Result<(), FrontendError> {
        self.require_known(message)?;
        self.emit(format!(
            "[chat {} #{} edited] {}\n",
            message.chat_id, message.message_id, text
        ))
        .await
    }

    async fn clear_choices(&self, message: MessageRef) -> Result<(), FrontendError> {
        self.require_known(message)?;
        self.emit(format!(
            "[chat {} #{} buttons removed]\n",
            message.chat_id, message.message_id
        ))
        .await
    }

    async fn answer_choice(
        &self,
        query_id: &str,
        text: &str,
        alert: bool,
    ) -> Result<(), FrontendError> {
        let kind = if alert { "alert" } else { "toast" };
        self.emit(format!("[{} {}] {}\n", kind, query_id, text)).await
    }
}
