//! Core types used throughout the system
//!
//! These are fundamental type aliases used by all modules.
//! They provide semantic meaning and enable future type evolution.

/// User ID - the chat platform's identifier for a person.
///
/// # Usage:
/// - Key for ledger lookups (`users.telegram_id`)
/// - Embedded in correlation tokens for the authorization check
/// - Signed: chat platforms hand out ids above `u32::MAX` and store them as BIGINT
pub type UserId = i64;

/// Chat ID - conversation the message belongs to (negative for channels/groups)
pub type ChatId = i64;

/// Account ID - internal ledger primary key (`users.id`)
pub type AccountId = i64;

/// Message ID - unique within one chat
pub type MessageId = i64;
