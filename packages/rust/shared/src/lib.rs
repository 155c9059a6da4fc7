//! Shared types, error model, and configuration for perpcheck.
//!
//! This crate is the foundation depended on by all other perpcheck crates.
//! It provides:
//! - [`PerpcheckError`]: the unified error type
//! - [`with_retries`]: bounded retries for transient HTTP failures
//! - Domain types ([`Address`], [`Snapshot`], [`SnapshotIndex`], [`ComparisonReport`])
//! - The comparison date window ([`DateWindow`])
//! - Analysis results consumed by the report renderers ([`analysis::Analysis`])
//! - Configuration ([`AppConfig`], [`RunConfig`], config loading)

pub mod analysis;
pub mod config;
pub mod de;
pub mod error;
pub mod retry;
pub mod types;
pub mod window;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, CompareConfig, HyperliquidConfig, OutputConfig, RunConfig, SnapshotsConfig,
    WindowConfig, config_dir, config_file_path, init_config, load_config, load_config_from,
};
pub use error::{PerpcheckError, Result};
pub use retry::{RetryPolicy, with_retries};
pub use types::{
    AddressSeries, Address, ArtifactMeta, ComparisonReport, CURRENT_SCHEMA_VERSION,
    DayComparison, NormalizedValue, RunId, RunManifest, ShiftedValue, Snapshot, SnapshotIndex,
    SourceValue, ValueDiff, round_to,
};
pub use window::DateWindow;
