//! Core pipeline orchestration and domain logic for perpcheck.
//!
//! This crate ties together the snapshot bucket, the Hyperliquid info API and
//! the report renderers into the three stages `extract`, `normalize` and
//! `analyze` (see [`pipeline`]).

pub mod addresses;
pub mod analysis;
pub mod compare;
pub mod normalize;
pub mod pipeline;
pub mod sources;

pub use addresses::load_addresses;
pub use analysis::analyse;
pub use compare::{AlignOptions, MatchSummary, build_comparison, summarize};
pub use normalize::{NormalizationSummary, copy_raw, normalize_day, normalize_series, timestamp_span};
pub use pipeline::{
    AnalyzeOutcome, ExtractOutcome, NormalizeOutcome, ProgressReporter, RunOutcome,
    SilentProgress, SnapshotSource, analyze, extract, normalize, read_report, run,
};
pub use sources::{fetch_account_history, fetch_snapshots};
