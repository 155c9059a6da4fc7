//! Bucketing and ranking of a comparison report.

use perpcheck_shared::analysis::{AddressMismatches, Analysis, BUCKETS, ComparedPoint, View, bucket_of};
use perpcheck_shared::{Address, ComparisonReport, DayComparison};

/// Collect the compared points of `report` under `view` and bucket them.
pub fn analyse(report: &ComparisonReport, view: View) -> Analysis {
    let mut points = Vec::new();
    let mut bucket_counts = [0usize; BUCKETS.len()];
    let mut missing = 0usize;
    let mut mismatches = Vec::new();

    for block in &report.addresses {
        let mut mismatch_pcts = Vec::new();
        for day in &block.series {
            let Some(point) = compared_point(&block.address, day, view) else {
                missing += 1;
                continue;
            };
            if let Some(i) = bucket_of(point.pct) {
                bucket_counts[i] += 1;
            }
            if !point.matched {
                mismatch_pcts.push(point.pct);
            }
            points.push(point);
        }

        if !mismatch_pcts.is_empty() {
            mismatches.push(AddressMismatches {
                address: block.address.clone(),
                mismatch_days: mismatch_pcts.len(),
                avg_pct: mismatch_pcts.iter().sum::<f64>() / mismatch_pcts.len() as f64,
            });
        }
    }

    Analysis {
        view,
        generated_at: report.generated_at,
        points,
        bucket_counts,
        missing,
        mismatches,
    }
}

fn compared_point(
    address: &Address,
    day: &DayComparison,
    view: View,
) -> Option<ComparedPoint> {
    let (diff, hyperliquid, flow_adjustment, events_in_gap) = match (view, &day.hyperliquid_normalized) {
        (View::Normalized, Some(normalized)) => (
            day.diff_normalized.unwrap_or(day.diff),
            normalized.value,
            normalized.flow_adjustment,
            normalized.events_in_gap,
        ),
        _ => (day.diff, day.hyperliquid.value, 0.0, 0),
    };

    let pct = diff.pct?;
    Some(ComparedPoint {
        address: address.clone(),
        date: day.date,
        artemis: day.artemis.value?,
        hyperliquid: hyperliquid?,
        hyperliquid_raw: day.hyperliquid.value?,
        flow_adjustment,
        events_in_gap,
        artemis_timestamp: day.artemis.last_timestamp,
        hyperliquid_timestamp: day.hyperliquid.last_timestamp,
        pct,
        abs: diff.abs,
        matched: diff.matched == Some(true),
        pct_before: day.diff.pct,
        matched_before: day.diff.matched,
    })
}

#[cfg(test)]
mod tests {
    use perpcheck_hyperliquid::Flow;

    use super::*;
    use crate::normalize::normalize_series;

    fn fixture() -> ComparisonReport {
        let raw = std::fs::read_to_string("../../../fixtures/comparison_output.fixture.json")
            .expect("read fixture");
        serde_json::from_str(&raw).unwrap()
    }

    #[test]
    fn raw_view_buckets_and_ranks() {
        let analysis = analyse(&fixture(), View::Raw);

        assert_eq!(analysis.total_compared(), 3);
        assert_eq!(analysis.missing, 1);
        // 0.1 -> OK, 0.9901 -> 0.5-1, 99.9998 -> 50-100
        assert_eq!(analysis.bucket_counts[0], 1);
        assert_eq!(analysis.bucket_counts[1], 1);
        assert_eq!(analysis.bucket_counts[6], 1);
        assert_eq!(analysis.bucket_counts.iter().sum::<usize>(), 3);

        let worst = analysis.worst_points(20);
        assert_eq!(worst.len(), 3);
        assert_eq!(worst[0].pct, 99.9998);
        assert_eq!(worst[0].artemis, 0.09);
        assert_eq!(worst[0].hyperliquid, 39299.37);
        assert_eq!(worst[2].pct, 0.1);

        let addresses = analysis.worst_addresses(20);
        assert_eq!(addresses.len(), 2);
        assert!(addresses.iter().all(|a| a.mismatch_days == 1));
        // equal counts keep report order
        assert!(addresses[0].address.as_str().ends_with("aa"));
        assert_eq!(addresses[0].avg_pct, 0.9901);

        assert!(analysis.improvement().is_none());
    }

    #[test]
    fn normalized_view_falls_back_to_raw_fields() {
        // nothing normalized yet: identical to the raw view
        let analysis = analyse(&fixture(), View::Normalized);
        assert_eq!(analysis.total_compared(), 3);
        assert_eq!(analysis.improvement().map(|i| i.fixed), Some(0));
    }

    #[test]
    fn normalized_view_reports_fixed_pairs() {
        let mut report = fixture();
        let flows = [Flow {
            timestamp_ms: 1_767_225_000_000,
            amount: -5.0,
        }];
        for block in report.addresses.iter_mut() {
            normalize_series(&mut block.series, &flows, 0.5);
        }

        let analysis = analyse(&report, View::Normalized);
        let improvement = analysis.improvement().unwrap();
        assert_eq!(improvement.fixed, 1);
        assert_eq!(improvement.worsened, 0);
        assert_eq!(analysis.bucket_counts[0], 2);

        let fixed = analysis
            .points
            .iter()
            .find(|p| p.matched && p.matched_before == Some(false))
            .unwrap();
        assert_eq!(fixed.hyperliquid, 500.0);
        assert_eq!(fixed.hyperliquid_raw, 505.0);
        assert_eq!(fixed.flow_adjustment, -5.0);
        assert_eq!(fixed.pct_before, Some(0.9901));

        // only the large mismatch is left
        assert_eq!(analysis.worst_addresses(30).len(), 1);
    }

    #[test]
    fn worst_addresses_orders_by_count() {
        let mut report = fixture();
        // make the second wallet mismatch on both days
        report.addresses[1].series[0].artemis.value = Some(1.0);
        report.addresses[1].series[0].artemis.last_timestamp = Some(1);
        report.addresses[1].series[0].diff =
            perpcheck_shared::ValueDiff::between(1.0, 20.0, 0.5);

        let analysis = analyse(&report, View::Raw);
        let ranked = analysis.worst_addresses(1);
        assert_eq!(ranked.len(), 1);
        assert!(ranked[0].address.as_str().ends_with("bb"));
        assert_eq!(ranked[0].mismatch_days, 2);
    }
}
