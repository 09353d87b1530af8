use serde::Deserialize;
use std::fs;
use thiserror::Error;

use crate::money::Amount;
use crate::core_types::{AccountId, UserId};

/// Env vars consulted when the YAML leaves a secret empty
pub const PAYOUT_API_KEY_ENV: &str = "FAUCETPAY_API_KEY";
pub const DATABASE_URL_ENV: &str = "DATABASE_URL";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config yaml: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub log_level: String,
    pub log_dir: String,
    pub log_file: String,
    pub use_json: bool,
    pub rotation: String,
    pub ledger: LedgerConfig,
    pub payout: PayoutConfig,
    #[serde(default)]
    pub withdraw: WithdrawConfig,
    #[serde(default)]
    pub audit: AuditConfig,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LedgerBackend {
    Memory,
    Postgres,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LedgerConfig {
    pub backend: LedgerBackend,
    #[serde(default)]
    pub postgres_url: Option<String>,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Seed rows for the memory backend
    #[serde(default)]
    pub accounts: Vec<SeedAccount>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SeedAccount {
    pub user_id: UserId,
    pub account_id: AccountId,
    pub balance: Amount,
    #[serde(default)]
    pub destination: Option<String>,
}

fn default_max_connections() -> u32 {
    10
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PayoutBackend {
    Faucetpay,
    Simulated,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PayoutConfig {
    pub backend: PayoutBackend,
    #[serde(default = "default_api_url")]
    pub api_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default = "default_payout_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_api_url() -> String {
    "https://faucetpay.io/api/v1/send".to_string()
}

fn default_currency() -> String {
    "TRX".to_string()
}

fn default_payout_timeout_ms() -> u64 {
    15_000
}

/// How the confirmation idempotency key is derived
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum KeyPolicy {
    /// `(user, amount)`: repeats of the same amount are rejected
    #[default]
    UserAmount,
    /// `(user, amount, request_id)`: every prompt gets its own key
    RequestId,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum IdempotencyBackend {
    #[default]
    Memory,
    Postgres,
}

#[derive(Debug, Deserialize, Clone)]
pub struct WithdrawConfig {
    #[serde(default = "default_min_amount")]
    pub min_amount: Amount,
    #[serde(default = "default_reply_timeout_ms")]
    pub reply_timeout_ms: u64,
    #[serde(default)]
    pub key_policy: KeyPolicy,
    #[serde(default)]
    pub idempotency_backend: IdempotencyBackend,
}

impl Default for WithdrawConfig {
    fn default() -> Self {
        Self {
            min_amount: default_min_amount(),
            reply_timeout_ms: default_reply_timeout_ms(),
            key_policy: KeyPolicy::default(),
            idempotency_backend: IdempotencyBackend::default(),
        }
    }
}

fn default_min_amount() -> Amount {
    // 0.001
    Amount::from_decimal(rust_decimal::Decimal::new(1, 3)).unwrap_or(Amount::ZERO)
}

fn default_reply_timeout_ms() -> u64 {
    120_000
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AuditConfig {
    /// Operations channel; audit messages are skipped when unset
    #[serde(default)]
    pub channel_id: Option<i64>,
    #[serde(default)]
    pub bot_url: Option<String>,
}

impl AppConfig {
    /// Load `config/{env}.yaml`, fill secrets from env, then validate
    pub fn load(env: &str) -> Result<Self, ConfigError> {
        let config_path = format!("config/{}.yaml", env);
        let content = fs::read_to_string(&config_path).map_err(|source| ConfigError::Read {
            path: config_path.clone(),
            source,
        })?;
        let mut config = Self::from_yaml(&content)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(content)?)
    }

    fn apply_env_overrides(&mut self) {
        if self.payout.api_key.as_deref().is_none_or(str::is_empty) {
            self.payout.api_key = non_empty_var(PAYOUT_API_KEY_ENV);
        }
        if self.ledger.postgres_url.as_deref().is_none_or(str::is_empty) {
            self.ledger.postgres_url = non_empty_var(DATABASE_URL_ENV);
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.payout.backend == PayoutBackend::Faucetpay
            && self.payout.api_key.as_deref().is_none_or(str::is_empty)
        {
            return Err(ConfigError::Invalid(format!(
                "payout.api_key (or {}) is required for the faucetpay backend",
                PAYOUT_API_KEY_ENV
            )));
        }

        let needs_postgres = self.ledger.backend == LedgerBackend::Postgres
            || self.withdraw.idempotency_backend == IdempotencyBackend::Postgres;
        if needs_postgres && self.ledger.postgres_url.as_deref().is_none_or(str::is_empty) {
            return Err(ConfigError::Invalid(format!(
                "ledger.postgres_url (or {}) is required for postgres backends",
                DATABASE_URL_ENV
            )));
        }

        if self.withdraw.min_amount.is_zero() {
            return Err(ConfigError::Invalid(
                "withdraw.min_amount must be positive".to_string(),
            ));
        }

        if self.payout.timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "payout.timeout_ms must be positive".to_string(),
            ));
        }

        Ok(())
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|s| !s.is_empty())
}
