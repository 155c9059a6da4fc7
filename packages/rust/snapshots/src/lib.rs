//! Source A: daily account-value snapshots from object storage.
//!
//! Snapshot files live under `{prefix}YYYY/MM/DD/*.jsonl`. For each day in the
//! comparison window every file is listed, downloaded (or read from a local
//! mirror) and scanned for the watched wallets.

mod extract;
mod store;

use std::collections::HashSet;
use std::io::BufReader;
use std::path::Path;

use chrono::{Datelike, NaiveDate};
use tracing::{debug, info, instrument, warn};

use perpcheck_shared::{Address, PerpcheckError, Result};

pub use extract::{WalletRecord, extract_wallet_records, timestamp_ms};
pub use store::{LocalMirror, LocalObject, ObjectEntry, S3Bucket, SnapshotStore};

/// Key prefix of one day's snapshot files.
pub fn day_prefix(prefix: &str, date: NaiveDate) -> String {
    format!(
        "{prefix}{:04}/{:02}/{:02}/",
        date.year(),
        date.month(),
        date.day()
    )
}

/// Sorted `.jsonl` objects for `date`.
///
/// A failed listing is logged and treated as a day without files.
pub async fn list_day<S: SnapshotStore>(store: &S, prefix: &str, date: NaiveDate) -> Vec<ObjectEntry> {
    let day = day_prefix(prefix, date);
    match store.list_keys(&day).await {
        Ok(entries) => {
            let mut files: Vec<ObjectEntry> = entries
                .into_iter()
                .filter(|e| e.key.ends_with(".jsonl"))
                .collect();
            files.sort_by(|a, b| a.key.cmp(&b.key));
            files
        }
        Err(e) => {
            warn!(%date, error = %e, "listing failed, treating day as empty");
            Vec::new()
        }
    }
}

/// Outcome of scanning one day.
#[derive(Debug, Default)]
pub struct DayFetch {
    /// Files listed for the day.
    pub files: usize,
    /// Files that could not be read.
    pub failed_files: Vec<(String, String)>,
    /// Records of watched wallets, across all files of the day.
    pub records: Vec<WalletRecord>,
}

/// Read every snapshot file of `date` and keep the watched wallets' records.
///
/// All files are scanned so the latest observation per wallet can be picked
/// later; a file that fails to download or open is logged and skipped.
#[instrument(skip_all, fields(%date))]
pub async fn fetch_day<S: SnapshotStore>(
    store: &S,
    prefix: &str,
    date: NaiveDate,
    wallets: &HashSet<Address>,
    scratch_dir: &Path,
) -> DayFetch {
    let files = list_day(store, prefix, date).await;
    let mut outcome = DayFetch {
        files: files.len(),
        ..DayFetch::default()
    };

    if files.is_empty() {
        info!("no snapshot files");
        return outcome;
    }

    for entry in &files {
        match scan_object(store, &entry.key, wallets, scratch_dir).await {
            Ok(records) => {
                debug!(
                    key = %entry.key,
                    size_mb = entry.size_bytes as f64 / (1024.0 * 1024.0),
                    records = records.len(),
                    "snapshot file scanned"
                );
                outcome.records.extend(records);
            }
            Err(e) => {
                warn!(key = %entry.key, error = %e, "snapshot file skipped");
                outcome.failed_files.push((entry.key.clone(), e.to_string()));
            }
        }
    }

    info!(
        files = outcome.files,
        failed = outcome.failed_files.len(),
        records = outcome.records.len(),
        "day scanned"
    );
    outcome
}

async fn scan_object<S: SnapshotStore>(
    store: &S,
    key: &str,
    wallets: &HashSet<Address>,
    scratch_dir: &Path,
) -> Result<Vec<WalletRecord>> {
    let object = store.materialize(key, scratch_dir).await?;
    let file = std::fs::File::open(&object.path).map_err(|e| PerpcheckError::io(&object.path, e))?;
    Ok(extract_wallet_records(BufReader::new(file), wallets))
}
