//! wallet_bot - Chat-driven custodial wallet
//!
//! Balance queries and guarded withdrawals to an external payout provider.
//!
//! # Modules
//!
//! - [`core_types`] - Core type aliases (UserId, ChatId, ...)
//! - [`money`] - Fixed-point `Amount`
//! - [`config`] - YAML configuration
//! - [`logging`] - tracing setup
//! - [`db`] - PostgreSQL pool and schema
//! - [`ledger`] - Ledger gateway (balances, destinations, conditional debit)
//! - [`payout`] - Payout provider client
//! - [`frontend`] - Chat transport boundary and reply routing
//! - [`notifier`] - Audit channel posts
//! - [`withdraw`] - Withdrawal conversation and settlement FSM
//! - [`balance`] - Balance query
//! - [`dispatcher`] - Event routing

// Core types - must be first!
pub mod core_types;

pub mod config;
pub mod db;
pub mod logging;
pub mod money;

// Boundaries
pub mod frontend;
pub mod ledger;
pub mod notifier;
pub mod payout;

// Handlers
pub mod balance;
pub mod dispatcher;
pub mod withdraw;

// Convenient re-exports at crate root
pub use config::AppConfig;
pub use core_types::{AccountId, ChatId, MessageId, UserId};
pub use dispatcher::{ChatEvent, Command, Dispatcher};
pub use frontend::{ChatFrontend, Choice, ChoiceTap, IncomingMessage, MessageRef};
pub use ledger::{InMemoryLedger, LedgerGateway, PgLedger};
pub use money::Amount;
pub use payout::{FaucetPayClient, PayoutClient, PayoutOutcome, SimulatedPayout};
pub use withdraw::{Settlement, SettlementCoordinator, WithdrawError, WithdrawalConversation};
