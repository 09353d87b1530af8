//! Correlation tokens carried by the confirmation prompt
//!
//! ```text
//! confirm_send:{user_id}:{amount:.8}[:{request_id}]
//! cancel_send:{user_id}:{amount:.8}[:{request_id}]
//! ```
//!
//! Tokens hold everything the coordinator needs, so no server-side session
//! is kept between rendering the prompt and the tap. Both buttons of one
//! prompt carry the same amount and request id, so they resolve to the same
//! idempotency key and only the first tap wins.

use std::fmt;
use thiserror::Error;
use ulid::Ulid;

use crate::core_types::UserId;
use crate::money::Amount;

pub const CONFIRM_ACTION: &str = "confirm_send";
pub const CANCEL_ACTION: &str = "cancel_send";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TokenError {
    /// Not one of ours; the tap belongs to some other feature
    #[error("Unknown action: {0}")]
    UnknownAction(String),

    #[error("Malformed token: {0}")]
    Malformed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CorrelationToken {
    Confirm {
        user_id: UserId,
        /// `None` when the amount field does not parse; reported as an invalid amount
        amount: Option<Amount>,
        request_id: Option<Ulid>,
    },
    Cancel {
        user_id: UserId,
        /// `None` for a bare `cancel_send:{user_id}`; nothing to mark then
        amount: Option<Amount>,
        request_id: Option<Ulid>,
    },
}

impl CorrelationToken {
    pub fn user_id(&self) -> UserId {
        match self {
            CorrelationToken::Confirm { user_id, .. }
            | CorrelationToken::Cancel { user_id, .. } => *user_id,
        }
    }

    pub fn encode(&self) -> String {
        self.to_string()
    }

    pub fn decode(data: &str) -> Result<Self, TokenError> {
        let mut parts = data.split(':');
        let action = parts.next().unwrap_or_default();

        let is_confirm = match action {
            CONFIRM_ACTION => true,
            CANCEL_ACTION => false,
            other => return Err(TokenError::UnknownAction(other.to_string())),
        };

        let user_id = parse_user(parts.next())?;
        let amount = parts.next().and_then(|a| Amount::parse(a).ok());
        let request_id = parts
            .next()
            .map(|r| {
                Ulid::from_string(r)
                    .map_err(|e| TokenError::Malformed(format!("request id: {}", e)))
            })
            .transpose()?;
        if parts.next().is_some() {
            return Err(TokenError::Malformed("trailing fields".into()));
        }

        Ok(if is_confirm {
            CorrelationToken::Confirm {
                user_id,
                amount,
                request_id,
            }
        } else {
            CorrelationToken::Cancel {
                user_id,
                amount,
                request_id,
            }
        })
    }
}

fn parse_user(field: Option<&str>) -> Result<UserId, TokenError> {
    let field = field.ok_or_else(|| TokenError::Malformed("missing user id".into()))?;
    field
        .parse()
        .map_err(|_| TokenError::Malformed(format!("bad user id: {}", field)))
}

impl fmt::Display for CorrelationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (action, user_id, amount, request_id) = match self {
            CorrelationToken::Confirm {
                user_id,
                amount,
                request_id,
            } => (CONFIRM_ACTION, user_id, amount, request_id),
            CorrelationToken::Cancel {
                user_id,
                amount,
                request_id,
            } => (CANCEL_ACTION, user_id, amount, request_id),
        };

        write!(f, "{}:{}", action, user_id)?;
        match amount {
            Some(amount) => write!(f, ":{}", amount)?,
            // Keep the request id in its own field
            None if request_id.is_some() => f.write_str(":")?,
            None => {}
        }
        if let Some(request_id) = request_id {
            write!(f, ":{}", request_id)?;
        }
        Ok(())
    }
}
