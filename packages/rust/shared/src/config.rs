//! Application configuration for perpcheck.
//!
//! User config lives at `~/.perpcheck/perpcheck.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{PerpcheckError, Result};
use crate::window::DateWindow;

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "perpcheck.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".perpcheck";

// ---------------------------------------------------------------------------
// Config structs (matching perpcheck.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Comparison window.
    #[serde(default)]
    pub window: WindowConfig,

    /// Source A: snapshot bucket.
    #[serde(default)]
    pub snapshots: SnapshotsConfig,

    /// Source B: Hyperliquid info endpoint.
    #[serde(default)]
    pub hyperliquid: HyperliquidConfig,

    /// Diff settings.
    #[serde(default)]
    pub compare: CompareConfig,

    /// Input and output locations.
    #[serde(default)]
    pub output: OutputConfig,
}

/// `[window]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowConfig {
    /// Number of calendar days compared, ending at `end_date`.
    #[serde(default = "default_days")]
    pub days: u32,

    /// Last day of the window (`YYYY-MM-DD`). Defaults to today (UTC).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<NaiveDate>,

    /// Source A's day D is paired with Source B's day D minus this many days.
    #[serde(default = "default_day_shift")]
    pub day_shift: u32,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            days: default_days(),
            end_date: None,
            day_shift: default_day_shift(),
        }
    }
}

fn default_days() -> u32 {
    32
}
fn default_day_shift() -> u32 {
    1
}

/// `[snapshots]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotsConfig {
    /// Bucket holding the line-delimited JSON snapshot files.
    #[serde(default = "default_bucket")]
    pub bucket: String,

    /// Key prefix; files live under `{prefix}YYYY/MM/DD/`.
    #[serde(default = "default_prefix")]
    pub prefix: String,

    /// Region of the bucket. Falls back to the AWS environment/profile,
    /// then `us-east-1`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,

    /// S3-compatible endpoint to use instead of AWS (path-style addressing).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    /// Read snapshot files from a local mirror instead of the bucket.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_dir: Option<String>,

    /// Send `x-amz-request-payer: requester` with every bucket request.
    /// Credentials come from the standard AWS chain (env, profile, IMDS).
    #[serde(default = "default_true")]
    pub request_payer: bool,

    /// Connect timeout for bucket requests.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Read timeout for bucket requests (snapshot files are large).
    #[serde(default = "default_read_timeout")]
    pub read_timeout_secs: u64,

    /// Attempts per bucket request, including the first one.
    #[serde(default = "default_attempts")]
    pub max_attempts: u32,
}

impl Default for SnapshotsConfig {
    fn default() -> Self {
        Self {
            bucket: default_bucket(),
            prefix: default_prefix(),
            region: None,
            endpoint: None,
            local_dir: None,
            request_payer: true,
            connect_timeout_secs: default_connect_timeout(),
            read_timeout_secs: default_read_timeout(),
            max_attempts: default_attempts(),
        }
    }
}

fn default_bucket() -> String {
    "artemis-hyperliquid-data".into()
}
fn default_prefix() -> String {
    "raw/perp_and_spot_balances/".into()
}
fn default_true() -> bool {
    true
}
fn default_connect_timeout() -> u64 {
    30
}
fn default_read_timeout() -> u64 {
    300
}
fn default_attempts() -> u32 {
    3
}

/// `[hyperliquid]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HyperliquidConfig {
    /// The `info` endpoint.
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// Request timeout.
    #[serde(default = "default_api_timeout")]
    pub timeout_secs: u64,

    /// Portfolio window whose account value history is compared.
    #[serde(default = "default_portfolio_window")]
    pub portfolio_window: String,

    /// Page size of `userNonFundingLedgerUpdates`; a shorter page ends pagination.
    #[serde(default = "default_ledger_page_size")]
    pub ledger_page_size: usize,

    /// Attempts per API request, including the first one.
    #[serde(default = "default_attempts")]
    pub max_attempts: u32,
}

impl Default for HyperliquidConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            timeout_secs: default_api_timeout(),
            portfolio_window: default_portfolio_window(),
            ledger_page_size: default_ledger_page_size(),
            max_attempts: default_attempts(),
        }
    }
}

fn default_api_url() -> String {
    "https://api.hyperliquid.xyz/info".into()
}
fn default_api_timeout() -> u64 {
    30
}
fn default_portfolio_window() -> String {
    "perpMonth".into()
}
fn default_ledger_page_size() -> usize {
    2000
}

/// `[compare]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompareConfig {
    /// A pair matches when its percentage difference is strictly below this.
    #[serde(default = "default_threshold")]
    pub match_threshold_pct: f64,
}

impl Default for CompareConfig {
    fn default() -> Self {
        Self {
            match_threshold_pct: default_threshold(),
        }
    }
}

fn default_threshold() -> f64 {
    0.5
}

/// `[output]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Directory for JSON outputs, tables, charts and the run manifest.
    #[serde(default = "default_output_dir")]
    pub dir: String,

    /// CSV file with an `address` column.
    #[serde(default = "default_addresses_csv")]
    pub addresses_csv: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: default_output_dir(),
            addresses_csv: default_addresses_csv(),
        }
    }
}

fn default_output_dir() -> String {
    ".".into()
}
fn default_addresses_csv() -> String {
    "outlier_address.csv".into()
}

// ---------------------------------------------------------------------------
// Run config (runtime, merged from config + CLI flags)
// ---------------------------------------------------------------------------

/// Runtime configuration for a pipeline run, merged from config file + CLI flags.
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Dates being compared.
    pub window: DateWindow,
    /// Day shift between Source A and Source B.
    pub day_shift: u32,
    /// Match threshold in percent.
    pub match_threshold_pct: f64,
    /// Snapshot bucket settings.
    pub snapshots: SnapshotsConfig,
    /// Info endpoint settings.
    pub hyperliquid: HyperliquidConfig,
    /// Output directory.
    pub output_dir: PathBuf,
    /// Address list.
    pub addresses_csv: PathBuf,
    /// Re-download snapshots even if a previous comparison output exists.
    pub refresh_snapshots: bool,
}

impl RunConfig {
    /// Build a run config from the file config, anchored on `today` when no
    /// explicit end date is configured.
    pub fn from_app(config: &AppConfig, today: NaiveDate) -> Result<Self> {
        let end = config.window.end_date.unwrap_or(today);
        let window = DateWindow::ending_at(end, config.window.days)?;
        Ok(Self {
            window,
            day_shift: config.window.day_shift,
            match_threshold_pct: config.compare.match_threshold_pct,
            snapshots: config.snapshots.clone(),
            hyperliquid: config.hyperliquid.clone(),
            output_dir: PathBuf::from(&config.output.dir),
            addresses_csv: PathBuf::from(&config.output.addresses_csv),
            refresh_snapshots: false,
        })
    }

    /// Path of the raw comparison output.
    pub fn comparison_path(&self) -> PathBuf {
        self.output_dir.join("comparison_output.json")
    }

    /// Path of the flow-normalized comparison output.
    pub fn normalized_path(&self) -> PathBuf {
        self.output_dir.join("comparison_output_normalized.json")
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.perpcheck/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| PerpcheckError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.perpcheck/perpcheck.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| PerpcheckError::io(path, e))?;

    let config: AppConfig = toml::from_str(&content).map_err(|e| {
        PerpcheckError::config(format!("failed to parse {}: {e}", path.display()))
    })?;
    config.validate()?;
    Ok(config)
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| PerpcheckError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| PerpcheckError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| PerpcheckError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

impl AppConfig {
    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.window.days == 0 {
            return Err(PerpcheckError::config("window.days must be at least 1"));
        }
        if !(self.compare.match_threshold_pct > 0.0) {
            return Err(PerpcheckError::config(
                "compare.match_threshold_pct must be positive",
            ));
        }
        if self.hyperliquid.ledger_page_size == 0 {
            return Err(PerpcheckError::config(
                "hyperliquid.ledger_page_size must be at least 1",
            ));
        }
        let urls = [
            ("hyperliquid.api_url", Some(&self.hyperliquid.api_url)),
            ("snapshots.endpoint", self.snapshots.endpoint.as_ref()),
        ];
        for (key, value) in urls {
            let Some(value) = value else {
                continue;
            };
            Url::parse(value)
                .map_err(|e| PerpcheckError::config(format!("{key} '{value}' is not a URL: {e}")))?;
        }
        Ok(())
    }
}
