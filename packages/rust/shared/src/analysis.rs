//! Analysis results shared by the analysis stage and the report renderers.

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

use crate::types::Address;

/// A half-open range of percentage differences, `[lo, hi)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bucket {
    pub label: &'static str,
    pub lo: f64,
    pub hi: f64,
    /// Fill colour used by the charts.
    pub color: &'static str,
}

impl Bucket {
    pub fn contains(&self, pct: f64) -> bool {
        self.lo <= pct && pct < self.hi
    }
}

pub const BUCKETS: [Bucket; 10] = [
    Bucket { label: "OK (< 0.5%)", lo: 0.0, hi: 0.5, color: "#2ecc71" },
    Bucket { label: "0.5% – 1%", lo: 0.5, hi: 1.0, color: "#f1c40f" },
    Bucket { label: "1% – 5%", lo: 1.0, hi: 5.0, color: "#e67e22" },
    Bucket { label: "5% – 10%", lo: 5.0, hi: 10.0, color: "#e74c3c" },
    Bucket { label: "10% – 25%", lo: 10.0, hi: 25.0, color: "#c0392b" },
    Bucket { label: "25% – 50%", lo: 25.0, hi: 50.0, color: "#8e44ad" },
    Bucket { label: "50% – 100%", lo: 50.0, hi: 100.0, color: "#6c3483" },
    Bucket { label: "100% – 250%", lo: 100.0, hi: 250.0, color: "#1a5276" },
    Bucket { label: "250% – 500%", lo: 250.0, hi: 500.0, color: "#0b5345" },
    Bucket { label: "> 500%", lo: 500.0, hi: f64::INFINITY, color: "#17202a" },
];

/// Index into [`BUCKETS`] of the bucket holding `pct`.
pub fn bucket_of(pct: f64) -> Option<usize> {
    BUCKETS.iter().position(|b| b.contains(pct))
}

/// Which Source B figures an analysis reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum View {
    /// `hyperliquid` and `diff`.
    Raw,
    /// `hyperliquid_normalized` and `diff_normalized`, falling back to the raw
    /// fields on days that carry no normalized values.
    Normalized,
}

impl View {
    /// Suffix for artifact file names and titles.
    pub fn suffix(self) -> &'static str {
        match self {
            Self::Raw => "",
            Self::Normalized => "_normalized",
        }
    }
}

/// One wallet-day where both sources have a value.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComparedPoint {
    pub address: Address,
    pub date: NaiveDate,
    pub artemis: f64,
    /// Source B value under the analysed view.
    pub hyperliquid: f64,
    pub hyperliquid_raw: f64,
    pub flow_adjustment: f64,
    pub events_in_gap: usize,
    pub artemis_timestamp: Option<i64>,
    pub hyperliquid_timestamp: Option<i64>,
    pub pct: f64,
    pub abs: Option<f64>,
    pub matched: bool,
    /// Raw-view percentage, equal to `pct` in the raw view.
    pub pct_before: Option<f64>,
    pub matched_before: Option<bool>,
}

/// A wallet's mismatching days.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AddressMismatches {
    pub address: Address,
    pub mismatch_days: usize,
    pub avg_pct: f64,
}

/// Effect of normalization on match status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Improvement {
    /// Matching now, not matching before.
    pub fixed: usize,
    /// Not matching now, matching before.
    pub worsened: usize,
}

/// Bucketed and ranked view of a comparison report.
#[derive(Debug, Clone)]
pub struct Analysis {
    pub view: View,
    pub generated_at: DateTime<Utc>,
    /// Compared wallet-days in report order.
    pub points: Vec<ComparedPoint>,
    /// Counts per entry of [`BUCKETS`].
    pub bucket_counts: [usize; BUCKETS.len()],
    /// Wallet-days with at least one side missing.
    pub missing: usize,
    /// Mismatching wallets in order of first appearance.
    pub mismatches: Vec<AddressMismatches>,
}

impl Analysis {
    pub fn total_compared(&self) -> usize {
        self.points.len()
    }

    /// Share of compared pairs in bucket `i`, in percent.
    pub fn bucket_share(&self, i: usize) -> f64 {
        let total = self.total_compared();
        if total == 0 {
            return 0.0;
        }
        self.bucket_counts.get(i).copied().unwrap_or(0) as f64 / total as f64 * 100.0
    }

    /// The `n` largest differences, largest first.
    pub fn worst_points(&self, n: usize) -> Vec<&ComparedPoint> {
        let mut points: Vec<&ComparedPoint> = self.points.iter().collect();
        points.sort_by(|a, b| b.pct.total_cmp(&a.pct));
        points.truncate(n);
        points
    }

    /// The `n` wallets with the most mismatching days. Ties keep report order.
    pub fn worst_addresses(&self, n: usize) -> Vec<&AddressMismatches> {
        let mut ranked: Vec<&AddressMismatches> = self.mismatches.iter().collect();
        ranked.sort_by(|a, b| b.mismatch_days.cmp(&a.mismatch_days));
        ranked.truncate(n);
        ranked
    }

    /// Fixed and worsened counts; `None` for the raw view.
    pub fn improvement(&self) -> Option<Improvement> {
        if self.view == View::Raw {
            return None;
        }
        let mut improvement = Improvement::default();
        for p in &self.points {
            match (p.matched, p.matched_before) {
                (true, Some(false) | None) => improvement.fixed += 1,
                (false, Some(true)) => improvement.worsened += 1,
                _ => {}
            }
        }
        Some(improvement)
    }
}
