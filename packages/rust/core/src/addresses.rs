//! Wallet list loading.

use std::collections::HashSet;
use std::path::Path;

use serde::Deserialize;
use tracing::{debug, warn};

use perpcheck_shared::{Address, PerpcheckError, Result};

#[derive(Deserialize)]
struct AddressRow {
    #[serde(default)]
    address: String,
}

/// Wallets from the `address` column of a CSV file, in file order.
///
/// Values are trimmed and lower-cased; blank cells are skipped, and malformed
/// or repeated addresses are logged and skipped.
pub fn load_addresses(path: &Path) -> Result<Vec<Address>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|e| PerpcheckError::serialization(path, e))?;

    let headers = reader
        .headers()
        .map_err(|e| PerpcheckError::serialization(path, e))?;
    if !headers.iter().any(|h| h == "address") {
        return Err(PerpcheckError::validation(format!(
            "{} has no 'address' column",
            path.display()
        )));
    }

    let mut addresses = Vec::new();
    let mut seen = HashSet::new();
    for (i, row) in reader.deserialize::<AddressRow>().enumerate() {
        let row = row.map_err(|e| PerpcheckError::serialization(path, e))?;
        if row.address.is_empty() {
            continue;
        }
        // +2: one-based, after the header row
        let line = i + 2;
        match Address::parse(&row.address) {
            Ok(address) if seen.insert(address.clone()) => addresses.push(address),
            Ok(address) => debug!(line, %address, "duplicate address skipped"),
            Err(e) => warn!(line, error = %e, "invalid address skipped"),
        }
    }

    if addresses.is_empty() {
        return Err(PerpcheckError::validation(format!(
            "{} lists no addresses",
            path.display()
        )));
    }
    Ok(addresses)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_csv(content: &str) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(format!("perpcheck-addresses-{}.csv", uuid::Uuid::now_v7()));
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn fixture_is_cleaned() {
        let addresses = load_addresses(Path::new("../../../fixtures/outlier_address.csv")).unwrap();
        let raw: Vec<&str> = addresses.iter().map(Address::as_str).collect();
        assert_eq!(
            raw,
            [
                "0x00000000000000000000000000000000000000aa",
                "0x00000000000000000000000000000000000000bb",
            ]
        );
    }

    #[test]
    fn missing_column_is_an_error() {
        let path = temp_csv("wallet\n0x00000000000000000000000000000000000000aa\n");
        let err = load_addresses(&path).unwrap_err();
        assert!(err.to_string().contains("no 'address' column"));
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn empty_list_is_an_error() {
        let path = temp_csv("address\n\n");
        assert!(load_addresses(&path).is_err());
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(load_addresses(Path::new("/nonexistent/outlier_address.csv")).is_err());
    }
}
