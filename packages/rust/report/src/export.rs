//! CSV export of compared points.

use serde::Serialize;

use perpcheck_shared::analysis::ComparedPoint;
use perpcheck_shared::{PerpcheckError, Result};

#[derive(Serialize)]
struct PointRow<'a> {
    address: &'a str,
    date: String,
    artemis: f64,
    hyperliquid: f64,
    hyperliquid_raw: f64,
    flow_adjustment: f64,
    events_in_gap: usize,
    artemis_timestamp: Option<i64>,
    hyperliquid_timestamp: Option<i64>,
    pct: f64,
    abs: Option<f64>,
    matched: bool,
    pct_before: Option<f64>,
    matched_before: Option<bool>,
}

impl<'a> From<&'a ComparedPoint> for PointRow<'a> {
    fn from(p: &'a ComparedPoint) -> Self {
        Self {
            address: p.address.as_str(),
            date: p.date.to_string(),
            artemis: p.artemis,
            hyperliquid: p.hyperliquid,
            hyperliquid_raw: p.hyperliquid_raw,
            flow_adjustment: p.flow_adjustment,
            events_in_gap: p.events_in_gap,
            artemis_timestamp: p.artemis_timestamp,
            hyperliquid_timestamp: p.hyperliquid_timestamp,
            pct: p.pct,
            abs: p.abs,
            matched: p.matched,
            pct_before: p.pct_before,
            matched_before: p.matched_before,
        }
    }
}

/// Points as CSV with a header row; missing values are empty cells.
pub fn points_csv(points: &[ComparedPoint]) -> Result<Vec<u8>> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    for point in points {
        writer
            .serialize(PointRow::from(point))
            .map_err(|e| PerpcheckError::parse(format!("CSV encoding failed: {e}")))?;
    }
    writer
        .into_inner()
        .map_err(|e| PerpcheckError::parse(format!("CSV encoding failed: {e}")))
}
