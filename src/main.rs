//! wallet_bot - console entry point
//!
//! ```text
//! ┌─────────┐    ┌────────────┐    ┌──────────────┐    ┌──────────┐
//! │  stdin  │───▶│ Dispatcher │───▶│ Conversation │───▶│  Ledger  │
//! │ (lines) │    │ (task/evt) │    │ Coordinator  │───▶│  Payout  │
//! └─────────┘    └────────────┘    └──────────────┘    └──────────┘
//! ```
//!
//! Usage: `wallet_bot [--env dev]`, then type
//! `msg <user> <chat> <text>` or `tap <user> <chat> <message_id> <data>`.

use anyhow::Context;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use wallet_bot::config::{AppConfig, IdempotencyBackend, LedgerBackend, PayoutBackend};
use wallet_bot::db::Database;
use wallet_bot::dispatcher::{ChatEvent, Dispatcher};
use wallet_bot::frontend::console::{ConsoleFrontend, ConsoleInput};
use wallet_bot::ledger::{InMemoryLedger, LedgerGateway, PgLedger};
use wallet_bot::logging::init_logging;
use wallet_bot::payout::{FaucetPayClient, PayoutClient, SimulatedPayout};
use wallet_bot::withdraw::{IdempotencyStore, InMemoryIdempotency, PgIdempotency};

/// How often leaked reply subscriptions are swept
const REPLY_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Upper bound on waiting for in-flight events after stdin closes
const DRAIN_TIMEOUT: Duration = Duration::from_secs(20);

fn get_env() -> String {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if (args[i] == "--env" || args[i] == "-e") && i + 1 < args.len() {
            return args[i + 1].clone();
        }
    }
    "dev".to_string()
}

async fn connect_database(config: &AppConfig) -> anyhow::Result<Option<Database>> {
    let needs_postgres = config.ledger.backend == LedgerBackend::Postgres
        || config.withdraw.idempotency_backend == IdempotencyBackend::Postgres;
    if !needs_postgres {
        return Ok(None);
    }

    let url = config
        .ledger
        .postgres_url
        .as_deref()
        .context("ledger.postgres_url missing")?;
    let db = Database::connect(url, config.ledger.max_connections)
        .await
        .context("connecting to PostgreSQL")?;
    db.health_check().await.context("PostgreSQL health check")?;
    db.ensure_schema().await.context("applying wallet schema")?;
    Ok(Some(db))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env = get_env();
    let config = AppConfig::load(&env).with_context(|| format!("loading config for {}", env))?;
    let _log_guard = init_logging(&config);

    info!("Starting wallet_bot in {} mode", env);

    let database = connect_database(&config).await?;

    let ledger: Arc<dyn LedgerGateway> = match (&config.ledger.backend, &database) {
        (LedgerBackend::Postgres, Some(db)) => Arc::new(PgLedger::new(db.pool().clone())),
        _ => Arc::new(InMemoryLedger::from_seed(&config.ledger.accounts)),
    };

    let idempotency: Arc<dyn IdempotencyStore> =
        match (&config.withdraw.idempotency_backend, &database) {
            (IdempotencyBackend::Postgres, Some(db)) => {
                Arc::new(PgIdempotency::new(db.pool().clone()))
            }
            _ => Arc::new(InMemoryIdempotency::new()),
        };

    let payout: Arc<dyn PayoutClient> = match config.payout.backend {
        PayoutBackend::Faucetpay => Arc::new(FaucetPayClient::new(&config.payout)?),
        PayoutBackend::Simulated => {
            warn!("Simulated payout backend: no funds will leave the provider");
            Arc::new(SimulatedPayout)
        }
    };

    let console = Arc::new(ConsoleFrontend::new());
    let dispatcher = Dispatcher::new(ledger, payout, console.clone(), idempotency, &config);

    let replies = dispatcher.replies().clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(REPLY_SWEEP_INTERVAL);
        loop {
            ticker.tick().await;
            let purged = replies.purge_expired();
            if purged > 0 {
                debug!(purged, "Expired reply subscriptions purged");
            }
        }
    });

    info!("Ready: msg <user> <chat> <text> | tap <user> <chat> <message_id> <data>");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut in_flight: Vec<JoinHandle<()>> = Vec::new();
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("reading stdin")? else {
                    break;
                };
                let event = match console.parse_line(&line) {
                    Some(ConsoleInput::Message(message)) => ChatEvent::Message(message),
                    Some(ConsoleInput::Tap(tap)) => ChatEvent::Tap(tap),
                    None => {
                        if !line.trim().is_empty() {
                            warn!("Unrecognized input: {}", line);
                        }
                        continue;
                    }
                };
                in_flight.retain(|h| !h.is_finished());
                in_flight.push(dispatcher.dispatch(event));
            }
            _ = &mut shutdown => {
                info!("Shutdown requested");
                return Ok(());
            }
        }
    }

    // stdin closed: let settlements already in progress finish
    in_flight.retain(|h| !h.is_finished());
    if !in_flight.is_empty() {
        info!(pending = in_flight.len(), "Draining in-flight events");
        let drained = tokio::time::timeout(DRAIN_TIMEOUT, async {
            for handle in in_flight {
                let _ = handle.await;
            }
        })
        .await;
        if drained.is_err() {
            warn!("Drain timed out, abandoning remaining events");
        }
    }

    info!("wallet_bot stopped");
    Ok(())
}
