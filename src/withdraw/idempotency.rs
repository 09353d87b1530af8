//! Confirmation idempotency
//!
//! A key is marked exactly once; whoever marks it owns the settlement and
//! every later tap with the same key gets `AlreadyProcessed`. Keys stay
//! marked after failures: an unreachable provider may still have paid.

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use sqlx::PgPool;
use std::fmt;
use thiserror::Error;
use tracing::{debug, warn};
use ulid::Ulid;

use super::state::SettlementState;
use crate::config::KeyPolicy;
use crate::core_types::UserId;
use crate::money::Amount;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IdempotencyError {
    #[error("Idempotency store unavailable: {0}")]
    Unavailable(String),
}

impl From<sqlx::Error> for IdempotencyError {
    fn from(e: sqlx::Error) -> Self {
        IdempotencyError::Unavailable(e.to_string())
    }
}

/// Key guarding one settlement
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    /// Build the key for a confirmation
    ///
    /// Under `UserAmount` any request id in the token is ignored. Under
    /// `RequestId` a token without one falls back to the `UserAmount` form.
    pub fn derive(
        policy: KeyPolicy,
        user_id: UserId,
        amount: Amount,
        request_id: Option<Ulid>,
    ) -> Self {
        match (policy, request_id) {
            (KeyPolicy::RequestId, Some(request_id)) => {
                Self(format!("{}:{}:{}", user_id, amount, request_id))
            }
            _ => Self(format!("{}:{}", user_id, amount)),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    /// Get backend name for logging
    fn name(&self) -> &'static str;

    /// Atomically mark `key`; `true` if this call marked it
    async fn try_mark(
        &self,
        key: &IdempotencyKey,
        user_id: UserId,
        amount: Amount,
    ) -> Result<bool, IdempotencyError>;

    /// Record the latest state of a marked key (the mark itself is kept)
    async fn record(
        &self,
        key: &IdempotencyKey,
        state: SettlementState,
        provider_tx_id: Option<&str>,
    ) -> Result<(), IdempotencyError>;

    async fn state_of(
        &self,
        key: &IdempotencyKey,
    ) -> Result<Option<SettlementState>, IdempotencyError>;
}

// ============================================================================
// In-memory (process lifetime)
// ============================================================================

#[derive(Default)]
pub struct InMemoryIdempotency {
    marks: DashMap<IdempotencyKey, SettlementState>,
}

impl InMemoryIdempotency {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.marks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.marks.is_empty()
    }
}

#[async_trait]
impl IdempotencyStore for InMemoryIdempotency {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn try_mark(
        &self,
        key: &IdempotencyKey,
        _user_id: UserId,
        _amount: Amount,
    ) -> Result<bool, IdempotencyError> {
        // Shard lock held across check and insert
        match self.marks.entry(key.clone()) {
            Entry::Occupied(existing) => {
                debug!(key = %key, state = %existing.get(), "Key already marked");
                Ok(false)
            }
            Entry::Vacant(slot) => {
                slot.insert(SettlementState::LockAcquired);
                Ok(true)
            }
        }
    }

    async fn record(
        &self,
        key: &IdempotencyKey,
        state: SettlementState,
        _provider_tx_id: Option<&str>,
    ) -> Result<(), IdempotencyError> {
        match self.marks.get_mut(key) {
            Some(mut entry) => {
                *entry = state;
                Ok(())
            }
            None => {
                warn!(key = %key, state = %state, "Recording state for unmarked key");
                Ok(())
            }
        }
    }

    async fn state_of(
        &self,
        key: &IdempotencyKey,
    ) -> Result<Option<SettlementState>, IdempotencyError> {
        Ok(self.marks.get(key).map(|s| *s))
    }
}

// ============================================================================
// PostgreSQL (survives restarts)
// ============================================================================

/// Marks are rows in `withdraw_attempts_tb`; the primary key on `idem_key`
/// makes `INSERT .. ON CONFLICT DO NOTHING` the atomic check-and-mark.
pub struct PgIdempotency {
    pool: PgPool,
}

impl PgIdempotency {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl IdempotencyStore for PgIdempotency {
    fn name(&self) -> &'static str {
        "postgres"
    }

    async fn try_mark(
        &self,
        key: &IdempotencyKey,
        user_id: UserId,
        amount: Amount,
    ) -> Result<bool, IdempotencyError> {
        let result = sqlx::query(
            r#"
            INSERT INTO withdraw_attempts_tb (idem_key, user_id, amount, state, created_at, updated_at)
            VALUES ($1, $2, $3, $4, NOW(), NOW())
            ON CONFLICT (idem_key) DO NOTHING
            "#,
        )
        .bind(key.as_str())
        .bind(user_id)
        .bind(amount.as_decimal())
        .bind(SettlementState::LockAcquired.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn record(
        &self,
        key: &IdempotencyKey,
        state: SettlementState,
        provider_tx_id: Option<&str>,
    ) -> Result<(), IdempotencyError> {
        let result = sqlx::query(
            r#"
            UPDATE withdraw_attempts_tb
            SET state = $1, payout_id = COALESCE($2, payout_id), updated_at = NOW()
            WHERE idem_key = $3
            "#,
        )
        .bind(state.as_str())
        .bind(provider_tx_id)
        .bind(key.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            warn!(key = %key, state = %state, "Recording state for unmarked key");
        }
        Ok(())
    }

    async fn state_of(
        &self,
        key: &IdempotencyKey,
    ) -> Result<Option<SettlementState>, IdempotencyError> {
        let state: Option<String> =
            sqlx::query_scalar("SELECT state FROM withdraw_attempts_tb WHERE idem_key = $1")
                .bind(key.as_str())
                .fetch_optional(&self.pool)
                .await?;

        state
            .map(|name| {
                SettlementState::from_name(&name).ok_or_else(|| {
                    IdempotencyError::Unavailable(format!("unknown stored state: {}", name))
                })
            })
            .transpose()
    }
}
