//! Fetching both sources into [`SnapshotIndex`]es.

use std::collections::HashSet;
use std::path::Path;

use tracing::{info, instrument, warn};

use perpcheck_hyperliquid::{InfoClient, points_in_window};
use perpcheck_shared::{Address, DateWindow, SnapshotIndex};
use perpcheck_snapshots::{SnapshotStore, fetch_day};

use crate::pipeline::ProgressReporter;

/// Scan every snapshot file of every window date for the watched wallets.
///
/// Records are keyed by the date of the folder they were found in.
#[instrument(skip_all, fields(wallets = addresses.len(), days = window.days))]
pub async fn fetch_snapshots<S: SnapshotStore>(
    store: &S,
    prefix: &str,
    addresses: &[Address],
    window: &DateWindow,
    scratch_dir: &Path,
    progress: &dyn ProgressReporter,
) -> SnapshotIndex {
    let wallets: HashSet<Address> = addresses.iter().cloned().collect();
    let dates = window.dates();
    let mut index = SnapshotIndex::new();
    let mut failed_files = 0usize;

    for (i, date) in dates.iter().enumerate() {
        let day = fetch_day(store, prefix, *date, &wallets, scratch_dir).await;
        failed_files += day.failed_files.len();
        for record in day.records {
            index.insert(record.address, *date, record.snapshot);
        }
        progress.day_scanned(*date, i + 1, dates.len());
    }

    info!(
        records = index.len(),
        wallets_seen = index.address_count(),
        failed_files,
        "source A fetched"
    );
    index
}

/// Wallets' account value history from the info endpoint, limited to the
/// window plus the `day_shift` look-back days and keyed by UTC date.
///
/// A wallet whose request fails is logged and left out.
#[instrument(skip_all, fields(wallets = addresses.len(), days = window.days))]
pub async fn fetch_account_history(
    client: &InfoClient,
    addresses: &[Address],
    window: &DateWindow,
    day_shift: u32,
    progress: &dyn ProgressReporter,
) -> SnapshotIndex {
    let mut index = SnapshotIndex::new();
    let mut failed = 0usize;

    for (i, address) in addresses.iter().enumerate() {
        match client.portfolio(address).await {
            Ok(points) => {
                for (date, snapshot) in points_in_window(&points, window, day_shift) {
                    index.insert(address.clone(), date, snapshot);
                }
            }
            Err(e) => {
                warn!(%address, error = %e, "portfolio request failed, skipping wallet");
                failed += 1;
            }
        }
        progress.wallet_done(address, i + 1, addresses.len());
    }

    info!(
        records = index.len(),
        wallets_seen = index.address_count(),
        failed,
        "source B fetched"
    );
    index
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use perpcheck_shared::{HyperliquidConfig, RetryPolicy};
    use perpcheck_snapshots::LocalMirror;
    use serde_json::{Value, json};
    use wiremock::matchers::{body_partial_json, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::pipeline::SilentProgress;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn wallet(last: &str) -> Address {
        Address::parse(&format!("0x{last:0>40}")).unwrap()
    }

    #[tokio::test]
    async fn snapshots_are_keyed_by_folder_date() {
        let mirror = LocalMirror::new("../../../fixtures/mirror");
        let window = DateWindow::ending_at(d(2026, 1, 2), 2).unwrap();

        let index = fetch_snapshots(
            &mirror,
            "raw/perp_and_spot_balances/",
            &[wallet("aa")],
            &window,
            &std::env::temp_dir(),
            &SilentProgress,
        )
        .await;

        assert_eq!(index.day(&wallet("aa"), d(2026, 1, 1)).len(), 1);
        assert_eq!(index.day(&wallet("aa"), d(2026, 1, 2)).len(), 3);
        // the second file holds the latest observation of the day
        let latest = index.pick_latest(&wallet("aa"), d(2026, 1, 2)).unwrap();
        assert_eq!(latest.account_value, 1001.0);
        assert_eq!(latest.timestamp_ms, 1_767_316_800_000);
    }

    #[tokio::test]
    async fn failing_wallet_is_skipped() {
        let server = MockServer::start().await;
        let portfolio: Value = serde_json::from_str(
            &std::fs::read_to_string("../../../fixtures/hyperliquid/portfolio.json").unwrap(),
        )
        .unwrap();
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"user": wallet("aa").as_str()})))
            .respond_with(ResponseTemplate::new(200).set_body_json(portfolio))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"user": wallet("bb").as_str()})))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let config = HyperliquidConfig {
            api_url: server.uri(),
            ..Default::default()
        };
        let client = InfoClient::new(&config).unwrap().with_retry(RetryPolicy {
            max_attempts: 2,
            base_delay: std::time::Duration::from_millis(1),
        });
        let window = DateWindow::ending_at(d(2026, 1, 2), 2).unwrap();

        let index = fetch_account_history(
            &client,
            &[wallet("aa"), wallet("bb")],
            &window,
            1,
            &SilentProgress,
        )
        .await;

        assert_eq!(index.address_count(), 1);
        assert_eq!(index.len(), 3);
        let latest = index.pick_latest(&wallet("aa"), d(2026, 1, 1)).unwrap();
        assert_eq!(latest.account_value, 999.0);
    }
}
