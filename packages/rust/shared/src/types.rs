//! Core domain types: wallets, snapshots and the comparison report.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use chrono::{DateTime, NaiveDate, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{PerpcheckError, Result};
use crate::window::DateWindow;

/// Current schema version for the run manifest format.
pub const CURRENT_SCHEMA_VERSION: u32 = 1;

static ADDRESS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^0x[0-9a-f]{40}$").expect("address regex"));

// ---------------------------------------------------------------------------
// Address
// ---------------------------------------------------------------------------

/// A wallet address, always lower-cased.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Address(String);

impl Address {
    /// Trim, lower-case and validate a `0x`-prefixed 20-byte hex address.
    pub fn parse(raw: &str) -> Result<Self> {
        let lowered = raw.trim().to_ascii_lowercase();
        if !ADDRESS_RE.is_match(&lowered) {
            return Err(PerpcheckError::validation(format!(
                "'{raw}' is not a 0x-prefixed 20-byte hex address"
            )));
        }
        Ok(Self(lowered))
    }

    /// Lower-case without validation, for keys read back from upstream data.
    pub fn normalized(raw: &str) -> Self {
        Self(raw.trim().to_ascii_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First `n` characters followed by `…`, for table columns.
    pub fn short(&self, n: usize) -> String {
        let head: String = self.0.chars().take(n).collect();
        format!("{head}…")
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// RunId
// ---------------------------------------------------------------------------

/// A UUID v7 wrapper identifying one pipeline run (time-sortable).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub Uuid);

impl RunId {
    /// Generate a new time-sortable run identifier.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Snapshots
// ---------------------------------------------------------------------------

/// One recorded account-value observation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub timestamp_ms: i64,
    pub account_value: f64,
}

/// Observations grouped by wallet, then by UTC date.
#[derive(Debug, Clone, Default)]
pub struct SnapshotIndex {
    inner: BTreeMap<Address, BTreeMap<NaiveDate, Vec<Snapshot>>>,
}

impl SnapshotIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, address: Address, date: NaiveDate, snapshot: Snapshot) {
        self.inner
            .entry(address)
            .or_default()
            .entry(date)
            .or_default()
            .push(snapshot);
    }

    /// All observations of `address` on `date`.
    pub fn day(&self, address: &Address, date: NaiveDate) -> &[Snapshot] {
        self.inner
            .get(address)
            .and_then(|days| days.get(&date))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// The observation with the largest timestamp on `date` (end-of-day proxy).
    pub fn pick_latest(&self, address: &Address, date: NaiveDate) -> Option<Snapshot> {
        self.day(address, date)
            .iter()
            .copied()
            .max_by_key(|s| s.timestamp_ms)
    }

    /// Number of wallets with at least one observation.
    pub fn address_count(&self) -> usize {
        self.inner.values().filter(|days| !days.is_empty()).count()
    }

    /// Total number of observations.
    pub fn len(&self) -> usize {
        self.inner
            .values()
            .flat_map(|days| days.values())
            .map(Vec::len)
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Rebuild the Source A side from a previously written report so the
    /// bucket does not have to be downloaded again.
    pub fn from_report(report: &ComparisonReport) -> Self {
        let mut index = Self::new();
        for block in &report.addresses {
            for day in &block.series {
                if let (Some(value), Some(ts)) = (day.artemis.value, day.artemis.last_timestamp) {
                    index.insert(
                        block.address.clone(),
                        day.date,
                        Snapshot {
                            timestamp_ms: ts,
                            account_value: value,
                        },
                    );
                }
            }
        }
        index
    }
}

// ---------------------------------------------------------------------------
// Comparison report (comparison_output.json)
// ---------------------------------------------------------------------------

/// Root of `comparison_output.json` and `comparison_output_normalized.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComparisonReport {
    pub generated_at: DateTime<Utc>,
    /// Number of compared dates.
    pub days: u32,
    /// Compared dates; absent in files written before the window was recorded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window: Option<DateWindow>,
    pub addresses: Vec<AddressSeries>,
}

/// Daily comparisons for one wallet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddressSeries {
    pub address: Address,
    pub series: Vec<DayComparison>,
}

/// Both sources' values for one wallet on one date.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DayComparison {
    pub date: NaiveDate,
    /// Source A (snapshot bucket) latest value on `date`.
    pub artemis: SourceValue,
    /// Source B (info API) latest value on `source_date`.
    pub hyperliquid: ShiftedValue,
    pub diff: ValueDiff,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hyperliquid_normalized: Option<NormalizedValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diff_normalized: Option<ValueDiff>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceValue {
    pub value: Option<f64>,
    pub last_timestamp: Option<i64>,
}

impl From<Option<Snapshot>> for SourceValue {
    fn from(snapshot: Option<Snapshot>) -> Self {
        Self {
            value: snapshot.map(|s| s.account_value),
            last_timestamp: snapshot.map(|s| s.timestamp_ms),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShiftedValue {
    pub value: Option<f64>,
    pub last_timestamp: Option<i64>,
    /// The Source B date the value was taken from.
    pub source_date: NaiveDate,
}

/// Difference between the two sources for one pair.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ValueDiff {
    pub abs: Option<f64>,
    pub pct: Option<f64>,
    #[serde(rename = "match")]
    pub matched: Option<bool>,
}

impl ValueDiff {
    /// No comparison possible (one side missing).
    pub const MISSING: Self = Self {
        abs: None,
        pct: None,
        matched: None,
    };

    /// Compare two values: `pct = 100 * |a - b| / max(|a|, |b|)`, 0 when both are 0.
    pub fn between(a: f64, b: f64, threshold_pct: f64) -> Self {
        let abs_diff = (a - b).abs();
        let denom = a.abs().max(b.abs());
        let pct = if denom != 0.0 {
            abs_diff / denom * 100.0
        } else {
            0.0
        };
        Self {
            abs: Some(round_to(abs_diff, 6)),
            pct: Some(round_to(pct, 4)),
            matched: Some(pct < threshold_pct),
        }
    }

    /// Compare when both sides are known, otherwise [`ValueDiff::MISSING`].
    pub fn between_opt(a: Option<f64>, b: Option<f64>, threshold_pct: f64) -> Self {
        match (a, b) {
            (Some(a), Some(b)) => Self::between(a, b, threshold_pct),
            _ => Self::MISSING,
        }
    }

    pub fn is_missing(&self) -> bool {
        self.pct.is_none()
    }
}

/// Source B value after adding the net ledger flow in the alignment gap.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedValue {
    pub value: Option<f64>,
    pub last_timestamp: Option<i64>,
    pub source_date: NaiveDate,
    pub flow_adjustment: f64,
    pub events_in_gap: usize,
}

impl NormalizedValue {
    /// The raw Source B value carried over with no adjustment.
    pub fn unadjusted(raw: &ShiftedValue) -> Self {
        Self {
            value: raw.value,
            last_timestamp: raw.last_timestamp,
            source_date: raw.source_date,
            flow_adjustment: 0.0,
            events_in_gap: 0,
        }
    }
}

// ---------------------------------------------------------------------------
// Run manifest (manifest.json)
// ---------------------------------------------------------------------------

/// A file written by the analysis stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactMeta {
    pub filename: String,
    pub sha256: String,
    pub size_bytes: usize,
}

/// Written next to the analysis artifacts to record what produced them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunManifest {
    pub schema_version: u32,
    pub run_id: RunId,
    pub tool_version: String,
    pub created_at: DateTime<Utc>,
    /// `raw` or `normalized`.
    pub view: String,
    /// The comparison file the analysis read.
    pub input: String,
    /// `generated_at` of that comparison file.
    pub input_generated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window: Option<DateWindow>,
    pub artifacts: Vec<ArtifactMeta>,
}

/// Round half away from zero to `places` decimals.
pub fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}
