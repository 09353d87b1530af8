//! FaucetPay payout client
//!
//! One form-encoded POST per payout:
//! `api_key`, `amount` (integer base units), `to`, `currency`.
//! The JSON body's `status == 200` is the only success signal.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::fmt;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{PayoutClient, PayoutError, PayoutOutcome, UNKNOWN_TX_ID};
use crate::config::PayoutConfig;
use crate::ledger::PayoutDestination;
use crate::money::Amount;

/// Provider-level success code in the response body
const PROVIDER_SUCCESS: i64 = 200;

pub struct FaucetPayClient {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
    currency: String,
}

/// Response body; every field is optional because error bodies vary
#[derive(Debug, Deserialize)]
struct SendResponse {
    #[serde(default)]
    status: Option<Value>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    payout_id: Option<Value>,
    #[serde(default, rename = "transactionId")]
    transaction_id: Option<Value>,
}

impl FaucetPayClient {
    pub fn new(config: &PayoutConfig) -> Result<Self, PayoutError> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| PayoutError::Misconfigured("missing api_key".into()))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()?;

        info!(
            api_url = %config.api_url,
            currency = %config.currency,
            timeout_ms = config.timeout_ms,
            "FaucetPay client initialized"
        );

        Ok(Self {
            client,
            api_url: config.api_url.clone(),
            api_key,
            currency: config.currency.clone(),
        })
    }
}

impl fmt::Debug for FaucetPayClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FaucetPayClient")
            .field("api_url", &self.api_url)
            .field("api_key", &"<redacted>")
            .field("currency", &self.currency)
            .finish()
    }
}

#[async_trait]
impl PayoutClient for FaucetPayClient {
    fn name(&self) -> &'static str {
        "faucetpay"
    }

    async fn send(&self, amount: Amount, destination: &PayoutDestination) -> PayoutOutcome {
        let base_units = match amount.to_base_units() {
            Ok(v) => v,
            Err(e) => {
                // Nothing was sent: a plain rejection
                return PayoutOutcome::Rejected {
                    reason: format!("amount not representable: {}", e),
                };
            }
        };
        let base_units = base_units.to_string();

        let form = [
            ("api_key", self.api_key.as_str()),
            ("amount", base_units.as_str()),
            ("to", destination.as_str()),
            ("currency", self.currency.as_str()),
        ];

        debug!(amount = %amount, base_units = %base_units, to = %destination, "FaucetPay send");

        let response = match self.client.post(&self.api_url).form(&form).send().await {
            Ok(r) => r,
            Err(e) => {
                warn!(to = %destination, error = %e, timeout = e.is_timeout(), "FaucetPay request failed");
                return PayoutOutcome::Unreachable {
                    detail: e.to_string(),
                };
            }
        };

        let http_status = response.status().as_u16();
        let body = match response.text().await {
            Ok(b) => b,
            Err(e) => {
                warn!(http_status, error = %e, "FaucetPay response body unreadable");
                return PayoutOutcome::Unreachable {
                    detail: e.to_string(),
                };
            }
        };

        let outcome = interpret_response(http_status, &body);
        if !outcome.is_settled() {
            warn!(http_status, body = %body, "FaucetPay payout not settled");
        }
        outcome
    }
}

/// Normalize an HTTP status + body into a `PayoutOutcome`
///
/// - 5xx, or a body that is not the expected JSON: `Unreachable`
/// - JSON with `status == 200`: `Settled`
/// - any other JSON (including 4xx): `Rejected` with the provider message
pub fn interpret_response(http_status: u16, body: &str) -> PayoutOutcome {
    if http_status >= 500 {
        return PayoutOutcome::Unreachable {
            detail: format!("provider returned HTTP {}", http_status),
        };
    }

    let parsed: SendResponse = match serde_json::from_str(body) {
        Ok(p) => p,
        Err(e) => {
            return PayoutOutcome::Unreachable {
                detail: format!("malformed response (HTTP {}): {}", http_status, e),
            };
        }
    };

    if parsed.status.as_ref().and_then(status_code) == Some(PROVIDER_SUCCESS) {
        let provider_tx_id = parsed
            .payout_id
            .as_ref()
            .and_then(id_string)
            .or_else(|| parsed.transaction_id.as_ref().and_then(id_string))
            .unwrap_or_else(|| UNKNOWN_TX_ID.to_string());
        return PayoutOutcome::Settled { provider_tx_id };
    }

    PayoutOutcome::Rejected {
        reason: parsed
            .message
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| "Unknown error".to_string()),
    }
}

/// `status` arrives as a number or a numeric string
fn status_code(v: &Value) -> Option<i64> {
    match v {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn id_string(v: &Value) -> Option<String> {
    match v {
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        _ => None,
    }
}
