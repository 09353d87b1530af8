//! Simulated payout backend for local runs: always settles, never moves money.

use async_trait::async_trait;
use tracing::info;

use super::{PayoutClient, PayoutOutcome};
use crate::ledger::PayoutDestination;
use crate::money::Amount;

#[derive(Debug, Default)]
pub struct SimulatedPayout;

#[async_trait]
impl PayoutClient for SimulatedPayout {
    fn name(&self) -> &'static str {
        "simulated"
    }

    async fn send(&self, amount: Amount, destination: &PayoutDestination) -> PayoutOutcome {
        let provider_tx_id = format!("sim-{}", ulid::Ulid::new());
        info!(amount = %amount, to = %destination, tx = %provider_tx_id, "Simulated payout");
        PayoutOutcome::Settled { provider_tx_id }
    }
}
