//! Conversational Front-end Boundary
//!
//! Transport-agnostic capabilities the withdrawal core consumes:
//! send text, send text with interactive choices, edit a sent message,
//! clear its choices, acknowledge a tapped choice, and (via
//! [`ReplyRouter`]) "the next free-text reply from user X in chat Y".

pub mod console;
pub mod reply;

pub use console::{ConsoleFrontend, ConsoleInput};
pub use reply::{PendingReply, ReplyRouter, ReplyWait};

use async_trait::async_trait;
use thiserror::Error;

use crate::core_types::{ChatId, MessageId, UserId};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrontendError {
    #[error("Delivery failed: {0}")]
    Delivery(String),

    #[error("Message not found: chat={chat_id} message={message_id}")]
    MessageNotFound {
        chat_id: ChatId,
        message_id: MessageId,
    },
}

/// Address of a message the bot has sent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageRef {
    pub chat_id: ChatId,
    pub message_id: MessageId,
}

/// One interactive button
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Choice {
    /// Tapping delivers `data` back as a [`ChoiceTap`]
    Callback { label: String, data: String },
    /// Opens a URL; never reaches the bot
    Link { label: String, url: String },
}

impl Choice {
    pub fn callback(label: impl Into<String>, data: impl Into<String>) -> Self {
        Choice::Callback {
            label: label.into(),
            data: data.into(),
        }
    }

    pub fn link(label: impl Into<String>, url: impl Into<String>) -> Self {
        Choice::Link {
            label: label.into(),
            url: url.into(),
        }
    }
}

/// Free-text message from a user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingMessage {
    pub chat_id: ChatId,
    pub user_id: UserId,
    pub text: String,
}

/// A user tapped a [`Choice::Callback`] on one of our messages
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChoiceTap {
    /// Transport handle used to acknowledge the tap
    pub query_id: String,
    pub user_id: UserId,
    /// Shown in audit messages
    pub display_name: String,
    pub message: MessageRef,
    pub data: String,
}

/// Outbound capabilities of the chat transport
#[async_trait]
pub trait ChatFrontend: Send + Sync {
    async fn send_text(&self, chat_id: ChatId, text: &str) -> Result<MessageRef, FrontendError>;

    async fn send_choices(
        &self,
        chat_id: ChatId,
        text: &str,
        choices: &[Choice],
    ) -> Result<MessageRef, FrontendError>;

    /// Replace the text of a sent message; its choices are removed
    async fn edit_text(&self, message: MessageRef, text: &str) -> Result<(), FrontendError>;

    /// Remove a message's choices, keeping its text
    async fn clear_choices(&self, message: MessageRef) -> Result<(), FrontendError>;

    /// Acknowledge a tap; `alert` asks the transport for a modal notice
    async fn answer_choice(
        &self,
        query_id: &str,
        text: &str,
        alert: bool,
    ) -> Result<(), FrontendError>;
}


#[cfg(test)]
pub use mock::RecordingFrontend;
