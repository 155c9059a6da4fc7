//! Net-flow adjustment of Source B values.
//!
//! Deposits, withdrawals and transfers between the Source B timestamp and the
//! later Source A timestamp change the balance legitimately. Adding their sum
//! to the Source B value before comparing removes that expected difference.

use serde::Serialize;

use perpcheck_hyperliquid::{Flow, net_flow_between};
use perpcheck_shared::{ComparisonReport, DayComparison, NormalizedValue, ValueDiff, round_to};

/// Adjust one day by the flows in `(hyperliquid_ts, artemis_ts]`.
///
/// Days without both timestamps and a Source B value get the raw values.
pub fn normalize_day(day: &mut DayComparison, flows: &[Flow], threshold_pct: f64) {
    let (Some(hl_ts), Some(art_ts), Some(hl_value)) = (
        day.hyperliquid.last_timestamp,
        day.artemis.last_timestamp,
        day.hyperliquid.value,
    ) else {
        copy_raw(day);
        return;
    };

    let (net_flow, events_in_gap) = net_flow_between(flows, hl_ts, art_ts);
    let normalized = hl_value + net_flow;

    day.hyperliquid_normalized = Some(NormalizedValue {
        value: Some(round_to(normalized, 6)),
        last_timestamp: Some(hl_ts),
        source_date: day.hyperliquid.source_date,
        flow_adjustment: round_to(net_flow, 6),
        events_in_gap,
    });
    day.diff_normalized = Some(ValueDiff::between_opt(
        day.artemis.value,
        Some(normalized),
        threshold_pct,
    ));
}

/// Carry the raw Source B value and diff over unchanged.
pub fn copy_raw(day: &mut DayComparison) {
    day.hyperliquid_normalized = Some(NormalizedValue::unadjusted(&day.hyperliquid));
    day.diff_normalized = Some(day.diff);
}

/// Normalize every day of a wallet; returns how many days now match that did
/// not before.
pub fn normalize_series(series: &mut [DayComparison], flows: &[Flow], threshold_pct: f64) -> usize {
    let mut fixed = 0;
    for day in series.iter_mut() {
        normalize_day(day, flows, threshold_pct);
        let now = day.diff_normalized.and_then(|d| d.matched) == Some(true);
        if now && day.diff.matched != Some(true) {
            fixed += 1;
        }
    }
    fixed
}

/// Earliest and latest timestamp of either source, the span the ledger is
/// queried for. A zero timestamp counts as absent.
pub fn timestamp_span(series: &[DayComparison]) -> Option<(i64, i64)> {
    let stamps = series
        .iter()
        .flat_map(|d| [d.artemis.last_timestamp, d.hyperliquid.last_timestamp])
        .flatten()
        .filter(|&ts| ts != 0);
    stamps.fold(None, |span, ts| match span {
        None => Some((ts, ts)),
        Some((lo, hi)) => Some((lo.min(ts), hi.max(ts))),
    })
}

/// Match counts before and after normalization.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct NormalizationSummary {
    pub ok_before: usize,
    pub ok_after: usize,
    pub mismatch_before: usize,
    pub mismatch_after: usize,
    /// Days with one side missing; not counted before or after.
    pub missing: usize,
}

impl NormalizationSummary {
    pub fn of(report: &ComparisonReport) -> Self {
        let mut summary = Self::default();
        for day in report.addresses.iter().flat_map(|a| &a.series) {
            let Some(before) = day.diff.matched else {
                summary.missing += 1;
                continue;
            };
            if before {
                summary.ok_before += 1;
            } else {
                summary.mismatch_before += 1;
            }
            let after = day.diff_normalized.unwrap_or(day.diff).matched;
            if after == Some(true) {
                summary.ok_after += 1;
            } else {
                summary.mismatch_after += 1;
            }
        }
        summary
    }

    /// Net number of pairs that moved to OK; negative if normalization hurt.
    pub fn improved(&self) -> i64 {
        self.ok_after as i64 - self.ok_before as i64
    }
}

#[cfg(test)]
mod tests {
    use perpcheck_shared::AddressSeries;

    use super::*;

    fn fixture() -> ComparisonReport {
        let raw = std::fs::read_to_string("../../../fixtures/comparison_output.fixture.json")
            .expect("read fixture");
        serde_json::from_str(&raw).unwrap()
    }

    fn flow(ts: i64, amount: f64) -> Flow {
        Flow {
            timestamp_ms: ts,
            amount,
        }
    }

    fn first_day(report: &mut ComparisonReport) -> &mut DayComparison {
        &mut report.addresses[0].series[0]
    }

    #[test]
    fn withdrawal_in_gap_fixes_mismatch() {
        let mut report = fixture();
        // HL 505 at 12-31 22:46, Artemis 500 at 01-01 01:17, 5 withdrawn in between
        let flows = [
            flow(1_767_200_000_000, 100.0), // before the gap
            flow(1_767_225_000_000, -5.0),
            flow(1_767_240_000_000, 50.0), // after the gap
        ];
        let day = first_day(&mut report);
        normalize_day(day, &flows, 0.5);

        let normalized = day.hyperliquid_normalized.as_ref().unwrap();
        assert_eq!(normalized.value, Some(500.0));
        assert_eq!(normalized.flow_adjustment, -5.0);
        assert_eq!(normalized.events_in_gap, 1);
        assert_eq!(normalized.last_timestamp, day.hyperliquid.last_timestamp);

        let diff = day.diff_normalized.unwrap();
        assert_eq!(diff.pct, Some(0.0));
        assert_eq!(diff.matched, Some(true));
        // the raw diff is untouched
        assert_eq!(day.diff.matched, Some(false));
    }

    #[test]
    fn flow_at_artemis_timestamp_counts_but_not_at_hyperliquid_timestamp() {
        let mut report = fixture();
        let day = first_day(&mut report);
        let hl_ts = day.hyperliquid.last_timestamp.unwrap();
        let art_ts = day.artemis.last_timestamp.unwrap();
        normalize_day(day, &[flow(hl_ts, 1.0), flow(art_ts, 2.0)], 0.5);

        let normalized = day.hyperliquid_normalized.as_ref().unwrap();
        assert_eq!(normalized.flow_adjustment, 2.0);
        assert_eq!(normalized.events_in_gap, 1);
    }

    #[test]
    fn missing_side_copies_raw() {
        let mut report = fixture();
        let day = &mut report.addresses[1].series[0];
        normalize_day(day, &[flow(1_767_225_000_000, 10.0)], 0.5);

        let normalized = day.hyperliquid_normalized.as_ref().unwrap();
        assert_eq!(normalized.value, Some(20.0));
        assert_eq!(normalized.flow_adjustment, 0.0);
        assert_eq!(normalized.events_in_gap, 0);
        assert_eq!(day.diff_normalized, Some(day.diff));
    }

    #[test]
    fn series_counts_fixed_days() {
        let mut report = fixture();
        let series = &mut report.addresses[0].series;
        let fixed = normalize_series(series, &[flow(1_767_225_000_000, -5.0)], 0.5);
        assert_eq!(fixed, 1);
        // the already-matching day stays matched without adjustment
        assert_eq!(series[1].diff_normalized.unwrap().matched, Some(true));
    }

    #[test]
    fn span_covers_both_sources() {
        let report = fixture();
        assert_eq!(
            timestamp_span(&report.addresses[0].series),
            Some((1_767_221_160_000, 1_767_316_620_000))
        );

        let empty = AddressSeries {
            address: report.addresses[0].address.clone(),
            series: Vec::new(),
        };
        assert_eq!(timestamp_span(&empty.series), None);
    }

    #[test]
    fn span_skips_zero_timestamps() {
        let mut report = fixture();
        let series = &mut report.addresses[0].series;
        series[0].hyperliquid.last_timestamp = Some(0);
        assert_eq!(
            timestamp_span(series),
            Some((1_767_230_220_000, 1_767_316_620_000))
        );

        for day in series.iter_mut() {
            day.artemis.last_timestamp = Some(0);
            day.hyperliquid.last_timestamp = Some(0);
        }
        assert_eq!(timestamp_span(series), None);
    }

    #[test]
    fn summary_before_and_after() {
        let mut report = fixture();
        normalize_series(&mut report.addresses[0].series, &[flow(1_767_225_000_000, -5.0)], 0.5);
        for day in report.addresses[1].series.iter_mut() {
            copy_raw(day);
        }

        let summary = NormalizationSummary::of(&report);
        assert_eq!(
            summary,
            NormalizationSummary {
                ok_before: 1,
                ok_after: 2,
                mismatch_before: 2,
                mismatch_after: 1,
                missing: 1,
            }
        );
        assert_eq!(summary.improved(), 1);
    }
}
