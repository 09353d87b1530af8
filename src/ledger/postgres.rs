//! PostgreSQL ledger
//!
//! Reads `users` / `wallet` and applies the debit as one conditional
//! `UPDATE ... WHERE wallet_balance >= $1`, so concurrent debits against the
//! same row are serialized by the row lock.

use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::PgPool;
use tracing::{debug, error, warn};

use super::{Account, DebitOutcome, LedgerError, LedgerGateway, PayoutDestination};
use crate::core_types::{AccountId, UserId};
use crate::db::SafeRow;
use crate::money::Amount;

pub struct PgLedger {
    pool: PgPool,
}

impl PgLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LedgerGateway for PgLedger {
    fn name(&self) -> &'static str {
        "postgres"
    }

    async fn get_account(&self, user_id: UserId) -> Result<Option<Account>, LedgerError> {
        let row = sqlx::query(
            r#"
            SELECT id, wallet_balance FROM users
            WHERE telegram_id = $1
            LIMIT 1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            debug!(user_id, "No ledger account for user");
            return Ok(None);
        };

        let account_id: i64 = row
            .try_get_log("id")
            .ok_or_else(|| LedgerError::Unavailable("users.id unreadable".into()))?;
        let raw_balance: Decimal = row
            .try_get_log("wallet_balance")
            .ok_or_else(|| LedgerError::Unavailable("users.wallet_balance unreadable".into()))?;

        let balance = Amount::from_decimal(raw_balance).map_err(|e| {
            error!(user_id, balance = %raw_balance, error = %e, "Corrupt balance in users table");
            LedgerError::Unavailable(format!("corrupt balance: {}", e))
        })?;

        Ok(Some(Account {
            account_id,
            balance,
        }))
    }

    async fn get_destination(
        &self,
        account_id: AccountId,
    ) -> Result<Option<PayoutDestination>, LedgerError> {
        let handle: Option<Option<String>> = sqlx::query_scalar(
            r#"
            SELECT wallet_email FROM wallet
            WHERE user_id = $1
            LIMIT 1
            "#,
        )
        .bind(account_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(handle.flatten().and_then(PayoutDestination::new))
    }

    async fn debit(&self, user_id: UserId, amount: Amount) -> Result<DebitOutcome, LedgerError> {
        let result = sqlx::query(
            r#"
            UPDATE users
            SET wallet_balance = wallet_balance - $1
            WHERE telegram_id = $2 AND wallet_balance >= $1
            "#,
        )
        .bind(amount.as_decimal())
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        match result.rows_affected() {
            1 => Ok(DebitOutcome::Applied),
            0 => {
                warn!(user_id, amount = %amount, "Conditional debit matched no row");
                Ok(DebitOutcome::InsufficientFunds)
            }
            n => {
                // telegram_id is UNIQUE; more than one row means the schema drifted
                error!(user_id, rows = n, "Debit touched multiple rows");
                Err(LedgerError::Unavailable(format!(
                    "debit affected {} rows",
                    n
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::connect_test_db;

    async fn seed(pool: &PgPool, telegram_id: i64, balance: &str, email: Option<&str>) -> i64 {
        sqlx::query("DELETE FROM wallet WHERE user_id IN (SELECT id FROM users WHERE telegram_id = $1)")
            .bind(telegram_id)
            .execute(pool)
            .await
            .unwrap();
        sqlx::query("DELETE FROM users WHERE telegram_id = $1")
            .bind(telegram_id)
            .execute(pool)
            .await
            .unwrap();

        let id: i64 = sqlx::query_scalar(
            "INSERT INTO users (telegram_id, wallet_balance) VALUES ($1, $2) RETURNING id",
        )
        .bind(telegram_id)
        .bind(Amount::parse(balance).unwrap().as_decimal())
        .fetch_one(pool)
        .await
        .unwrap();

        sqlx::query("INSERT INTO wallet (user_id, wallet_email) VALUES ($1, $2)")
            .bind(id)
            .bind(email)
            .execute(pool)
            .await
            .unwrap();
        id
    }

    #[tokio::test]
    #[ignore = "requires PostgreSQL database"]
    async fn test_pg_account_and_destination() {
        let db = connect_test_db().await.expect("database");
        let id = seed(db.pool(), 9_000_001, "5", Some("alice@example.com")).await;
        let ledger = PgLedger::new(db.pool().clone());

        let account = ledger.get_account(9_000_001).await.unwrap().unwrap();
        assert_eq!(account.account_id, id);
        assert_eq!(account.balance, Amount::parse("5").unwrap());

        let dest = ledger.get_destination(id).await.unwrap().unwrap();
        assert_eq!(dest.as_str(), "alice@example.com");
    }

    #[tokio::test]
    #[ignore = "requires PostgreSQL database"]
    async fn test_pg_null_destination_is_not_set() {
        let db = connect_test_db().await.expect("database");
        let id = seed(db.pool(), 9_000_002, "1", None).await;
        let ledger = PgLedger::new(db.pool().clone());

        assert!(ledger.get_destination(id).await.unwrap().is_none());
    }

    #[tokio::test]
    #[ignore = "requires PostgreSQL database"]
    async fn test_pg_conditional_debit() {
        let db = connect_test_db().await.expect("database");
        seed(db.pool(), 9_000_003, "5", Some("bob@example.com")).await;
        let ledger = PgLedger::new(db.pool().clone());

        let outcome = ledger
            .debit(9_000_003, Amount::parse("2.5").unwrap())
            .await
            .unwrap();
        assert_eq!(outcome, DebitOutcome::Applied);

        let outcome = ledger
            .debit(9_000_003, Amount::parse("3").unwrap())
            .await
            .unwrap();
        assert_eq!(outcome, DebitOutcome::InsufficientFunds);

        let account = ledger.get_account(9_000_003).await.unwrap().unwrap();
        assert_eq!(account.balance.to_string(), "2.50000000");
    }
}
