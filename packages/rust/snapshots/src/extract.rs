//! Line-delimited JSON snapshot parsing.
//!
//! Each line of a snapshot file is one wallet's clearinghouse state:
//! `{"address", "timestamp", "response": {"perpetual": {"marginSummary": {"accountValue"}}}}`.
//! Files may carry `_metadata` lines, which are skipped.

use std::collections::HashSet;
use std::io::BufRead;

use chrono::{DateTime, NaiveDateTime};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use perpcheck_shared::de::number_or_string;
use perpcheck_shared::{Address, Snapshot};

/// A snapshot attributed to a wallet.
#[derive(Debug, Clone, PartialEq)]
pub struct WalletRecord {
    pub address: Address,
    pub snapshot: Snapshot,
}

#[derive(Deserialize)]
struct SnapshotLine {
    #[serde(rename = "_metadata", default)]
    metadata: Value,
    #[serde(default)]
    address: String,
    #[serde(default)]
    timestamp: Value,
    #[serde(default)]
    response: ResponseBody,
}

#[derive(Default, Deserialize)]
struct ResponseBody {
    #[serde(default)]
    perpetual: PerpetualState,
}

#[derive(Default, Deserialize)]
struct PerpetualState {
    #[serde(rename = "marginSummary", default)]
    margin_summary: MarginSummary,
}

#[derive(Deserialize)]
struct MarginSummary {
    #[serde(rename = "accountValue", default, deserialize_with = "number_or_string")]
    account_value: f64,
}

impl Default for MarginSummary {
    fn default() -> Self {
        Self { account_value: 0.0 }
    }
}

/// Read every line of `reader` and keep the records of wallets in `wallets`.
///
/// Malformed lines are skipped; a missing account value counts as 0 and an
/// unparseable timestamp as epoch 0.
pub fn extract_wallet_records<R: BufRead>(
    reader: R,
    wallets: &HashSet<Address>,
) -> Vec<WalletRecord> {
    let mut records = Vec::new();
    let mut skipped = 0usize;

    for line in reader.lines() {
        let Ok(line) = line else {
            skipped += 1;
            continue;
        };
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        match parse_line(trimmed, wallets) {
            Some(record) => records.push(record),
            None => skipped += 1,
        }
    }

    debug!(kept = records.len(), skipped, "snapshot lines scanned");
    records
}

fn parse_line(line: &str, wallets: &HashSet<Address>) -> Option<WalletRecord> {
    let parsed: SnapshotLine = serde_json::from_str(line).ok()?;
    if is_truthy(&parsed.metadata) {
        return None;
    }

    let address = Address::normalized(&parsed.address);
    if !wallets.contains(&address) {
        return None;
    }

    Some(WalletRecord {
        address,
        snapshot: Snapshot {
            timestamp_ms: timestamp_ms(&parsed.timestamp),
            account_value: parsed.response.perpetual.margin_summary.account_value,
        },
    })
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// Epoch milliseconds from either a number or an ISO-8601 string.
/// Naive date-times are taken as UTC.
pub fn timestamp_ms(raw: &Value) -> i64 {
    match raw {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .unwrap_or(0),
        Value::String(s) => parse_iso_ms(s).unwrap_or(0),
        _ => 0,
    }
}

fn parse_iso_ms(s: &str) -> Option<i64> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.timestamp_millis());
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .map(|naive| naive.and_utc().timestamp_millis())
}

#[cfg(test)]
mod tests {
    use std::io::{BufReader, Cursor};

    use super::*;

    const WATCHED: &str = "0x00000000000000000000000000000000000000aa";
    const OTHER: &str = "0x00000000000000000000000000000000000000bb";

    fn wallets() -> HashSet<Address> {
        [Address::parse(WATCHED).unwrap()].into_iter().collect()
    }

    #[test]
    fn fixture_file_yields_watched_wallets_only() {
        let file = std::fs::File::open("../../../fixtures/snapshots/2026-01-02.jsonl")
            .expect("read snapshot fixture");
        let records = extract_wallet_records(BufReader::new(file), &wallets());

        // metadata, an unwatched wallet and a garbage line are dropped
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.address.as_str() == WATCHED));
        assert_eq!(records[0].snapshot.account_value, 1000.0);
        assert_eq!(records[0].snapshot.timestamp_ms, 1_767_316_620_000);
        assert_eq!(records[1].snapshot.account_value, 998.5);
    }

    #[test]
    fn address_match_is_case_insensitive() {
        let line = format!(
            r#"{{"address":"{}","timestamp":1767316620000,"response":{{"perpetual":{{"marginSummary":{{"accountValue":"12.5"}}}}}}}}"#,
            WATCHED.to_uppercase().replace("0X", "0x")
        );
        let records = extract_wallet_records(Cursor::new(line), &wallets());
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].snapshot.account_value, 12.5);
    }

    #[test]
    fn missing_margin_summary_counts_as_zero() {
        let line = format!(r#"{{"address":"{WATCHED}","timestamp":"2026-01-02T01:17:00Z","response":{{}}}}"#);
        let records = extract_wallet_records(Cursor::new(line), &wallets());
        assert_eq!(records[0].snapshot.account_value, 0.0);
    }

    #[test]
    fn unparseable_account_value_drops_the_line() {
        let line = format!(
            r#"{{"address":"{WATCHED}","timestamp":1,"response":{{"perpetual":{{"marginSummary":{{"accountValue":"n/a"}}}}}}}}"#
        );
        assert!(extract_wallet_records(Cursor::new(line), &wallets()).is_empty());
    }

    #[test]
    fn unwatched_wallet_is_ignored() {
        let line = format!(r#"{{"address":"{OTHER}","timestamp":1}}"#);
        assert!(extract_wallet_records(Cursor::new(line), &wallets()).is_empty());
    }

    #[test]
    fn timestamp_formats() {
        assert_eq!(timestamp_ms(&Value::from(1_767_316_620_000i64)), 1_767_316_620_000);
        assert_eq!(timestamp_ms(&Value::from(1_767_316_620_000.0)), 1_767_316_620_000);
        assert_eq!(
            timestamp_ms(&Value::from("2026-01-02T01:17:00Z")),
            1_767_316_620_000
        );
        assert_eq!(
            timestamp_ms(&Value::from("2026-01-02T01:17:00+00:00")),
            1_767_316_620_000
        );
        assert_eq!(
            timestamp_ms(&Value::from("2026-01-02T01:17:00.000")),
            1_767_316_620_000
        );
        assert_eq!(timestamp_ms(&Value::from("yesterday")), 0);
        assert_eq!(timestamp_ms(&Value::Null), 0);
    }
}
