//! Day-shift alignment of the two sources.
//!
//! Source A snapshots are taken shortly after midnight UTC while Source B's last
//! point of a day is late in the evening, so Source A on date D is paired with
//! Source B on D minus `day_shift`.

use chrono::{DateTime, Days, Utc};
use serde::Serialize;

use perpcheck_shared::{
    Address, AddressSeries, ComparisonReport, DateWindow, DayComparison, ShiftedValue,
    SnapshotIndex, SourceValue, ValueDiff,
};

/// Alignment parameters.
#[derive(Debug, Clone, Copy)]
pub struct AlignOptions {
    pub day_shift: u32,
    pub threshold_pct: f64,
}

impl Default for AlignOptions {
    fn default() -> Self {
        Self {
            day_shift: 1,
            threshold_pct: 0.5,
        }
    }
}

/// Pair every wallet's Source A value on each window date with its shifted
/// Source B value. Wallets keep the order of `addresses`.
pub fn build_comparison(
    addresses: &[Address],
    source_a: &SnapshotIndex,
    source_b: &SnapshotIndex,
    window: &DateWindow,
    options: AlignOptions,
    generated_at: DateTime<Utc>,
) -> ComparisonReport {
    let dates = window.dates();
    let blocks = addresses
        .iter()
        .map(|address| AddressSeries {
            address: address.clone(),
            series: dates
                .iter()
                .map(|&date| {
                    let source_date = date
                        .checked_sub_days(Days::new(u64::from(options.day_shift)))
                        .unwrap_or(date);
                    let a = source_a.pick_latest(address, date);
                    let b = source_b.pick_latest(address, source_date);
                    DayComparison {
                        date,
                        artemis: SourceValue::from(a),
                        hyperliquid: ShiftedValue {
                            value: b.map(|s| s.account_value),
                            last_timestamp: b.map(|s| s.timestamp_ms),
                            source_date,
                        },
                        diff: ValueDiff::between_opt(
                            a.map(|s| s.account_value),
                            b.map(|s| s.account_value),
                            options.threshold_pct,
                        ),
                        hyperliquid_normalized: None,
                        diff_normalized: None,
                    }
                })
                .collect(),
        })
        .collect();

    ComparisonReport {
        generated_at,
        days: window.days,
        window: Some(*window),
        addresses: blocks,
    }
}

/// Match counts of a report's raw diffs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MatchSummary {
    pub ok: usize,
    pub mismatch: usize,
    pub missing: usize,
}

pub fn summarize(report: &ComparisonReport) -> MatchSummary {
    let mut summary = MatchSummary::default();
    for day in report.addresses.iter().flat_map(|a| &a.series) {
        match day.diff.matched {
            Some(true) => summary.ok += 1,
            Some(false) => summary.mismatch += 1,
            None => summary.missing += 1,
        }
    }
    summary
}
