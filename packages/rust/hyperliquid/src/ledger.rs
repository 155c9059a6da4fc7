//! `userNonFundingLedgerUpdates` events and the perp-account flows they imply.

use std::collections::HashSet;

use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::debug;

use perpcheck_shared::de::{number_or_string, opt_number_or_string};

/// A signed balance change of the perp account.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Flow {
    pub timestamp_ms: i64,
    pub amount: f64,
}

#[derive(Deserialize)]
struct LedgerEvent {
    time: Option<i64>,
    delta: LedgerDelta,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
enum LedgerDelta {
    Deposit {
        #[serde(deserialize_with = "number_or_string")]
        usdc: f64,
    },
    Withdraw {
        #[serde(deserialize_with = "number_or_string")]
        usdc: f64,
    },
    RewardsClaim {
        #[serde(default, deserialize_with = "opt_number_or_string")]
        amount: Option<f64>,
    },
    Send {
        #[serde(rename = "usdcValue", default, deserialize_with = "opt_number_or_string")]
        usdc_value: Option<f64>,
        #[serde(default, deserialize_with = "opt_number_or_string")]
        amount: Option<f64>,
        #[serde(rename = "sourceDex", default)]
        source_dex: String,
        #[serde(rename = "destinationDex", default)]
        destination_dex: String,
    },
    AccountClassTransfer {
        #[serde(default, deserialize_with = "opt_number_or_string")]
        usdc: Option<f64>,
        #[serde(rename = "toPerp", default)]
        to_perp: bool,
    },
    #[serde(other)]
    Other,
}

impl LedgerDelta {
    /// Signed amount seen from the perp account, if this delta moves perp funds.
    fn perp_amount(&self) -> Option<f64> {
        match self {
            Self::Deposit { usdc } => Some(*usdc),
            Self::Withdraw { usdc } => Some(-usdc),
            Self::RewardsClaim { amount } => Some(amount.unwrap_or(0.0)),
            Self::Send {
                usdc_value,
                amount,
                source_dex,
                destination_dex,
            } => {
                let value = usdc_value.or(*amount).unwrap_or(0.0);
                match (source_dex.as_str(), destination_dex.as_str()) {
                    ("", "spot") => Some(-value),
                    ("spot", "") => Some(value),
                    _ => None,
                }
            }
            Self::AccountClassTransfer { usdc, to_perp } => {
                let value = usdc.unwrap_or(0.0);
                Some(if *to_perp { value } else { -value })
            }
            Self::Other => None,
        }
    }
}

/// Flows of `events`, sorted by time.
///
/// Events without a `time`, with an amount that does not parse, or of a type
/// that does not touch the perp balance are skipped.
pub fn extract_flows(events: &[Value]) -> Vec<Flow> {
    let mut flows: Vec<Flow> = events
        .iter()
        .filter_map(|raw| {
            let event: LedgerEvent = serde_json::from_value(raw.clone()).ok()?;
            let timestamp_ms = event.time?;
            let amount = event.delta.perp_amount()?;
            Some(Flow {
                timestamp_ms,
                amount,
            })
        })
        .collect();

    flows.sort_by_key(|f| f.timestamp_ms);
    debug!(events = events.len(), flows = flows.len(), "ledger flows extracted");
    flows
}

/// Sum of flows with `after < t <= until`, and how many there were.
pub fn net_flow_between(flows: &[Flow], after: i64, until: i64) -> (f64, usize) {
    flows
        .iter()
        .filter(|f| after < f.timestamp_ms && f.timestamp_ms <= until)
        .fold((0.0, 0), |(sum, n), f| (sum + f.amount, n + 1))
}

/// Drop repeated events, keeping first occurrences in order.
///
/// Pages overlap at the cursor boundary, so the same event can arrive twice.
pub fn dedup_events(events: Vec<Value>) -> Vec<Value> {
    let mut seen = HashSet::new();
    events
        .into_iter()
        .filter(|e| seen.insert(canonical_json(e)))
        .collect()
}

/// JSON text with object keys sorted at every level.
fn canonical_json(value: &Value) -> String {
    fn sorted(value: &Value) -> Value {
        match value {
            Value::Object(map) => {
                let mut keys: Vec<&String> = map.keys().collect();
                keys.sort();
                let mut out = Map::new();
                for key in keys {
                    out.insert(key.clone(), sorted(&map[key]));
                }
                Value::Object(out)
            }
            Value::Array(items) => Value::Array(items.iter().map(sorted).collect()),
            other => other.clone(),
        }
    }
    sorted(value).to_string()
}
