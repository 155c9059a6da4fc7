//! `portfolio` response parsing.
//!
//! The endpoint answers with `[window_key, {accountValueHistory, pnlHistory, vlm}]`
//! pairs, e.g. `["perpMonth", {"accountValueHistory": [[1767221160000, "505.0"], ...]}]`.

use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::Value;

use perpcheck_shared::de::number_or_string;
use perpcheck_shared::window::utc_date_of_ms;
use perpcheck_shared::{DateWindow, PerpcheckError, Result, Snapshot};

#[derive(Deserialize)]
struct PortfolioWindow {
    #[serde(rename = "accountValueHistory", default)]
    account_value_history: Vec<HistoryPoint>,
}

#[derive(Deserialize)]
struct HistoryPoint(
    #[serde(deserialize_with = "number_or_string")] f64,
    #[serde(deserialize_with = "number_or_string")] f64,
);

/// Account value history of window `window_key`.
///
/// `Ok(None)` when the response has no such window; an error when the
/// response is not a list of `[key, data]` pairs.
pub fn parse_portfolio(payload: &Value, window_key: &str) -> Result<Option<Vec<Snapshot>>> {
    let entries = payload
        .as_array()
        .ok_or_else(|| PerpcheckError::parse("portfolio response is not a list"))?;

    for entry in entries {
        let Some(pair) = entry.as_array() else {
            continue;
        };
        let [key, data] = pair.as_slice() else {
            continue;
        };
        if key.as_str() != Some(window_key) {
            continue;
        }

        let window: PortfolioWindow = serde_json::from_value(data.clone()).map_err(|e| {
            PerpcheckError::parse(format!("portfolio window '{window_key}': {e}"))
        })?;
        let points = window
            .account_value_history
            .into_iter()
            .map(|HistoryPoint(ts, value)| Snapshot {
                timestamp_ms: ts as i64,
                account_value: value,
            })
            .collect();
        return Ok(Some(points));
    }

    Ok(None)
}

/// Points whose UTC date lies in the window extended back by `day_shift` days,
/// keyed by that date.
pub fn points_in_window(
    points: &[Snapshot],
    window: &DateWindow,
    day_shift: u32,
) -> Vec<(NaiveDate, Snapshot)> {
    points
        .iter()
        .filter_map(|p| utc_date_of_ms(p.timestamp_ms).map(|date| (date, *p)))
        .filter(|(date, _)| window.contains_with_lookback(*date, day_shift))
        .collect()
}
