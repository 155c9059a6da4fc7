//! Rendering and writing of analysis results.
//!
//! Text tables for the terminal and `analysis*.txt`, an SVG figure, a CSV of
//! every compared pair, and atomic artifact writes recorded in a run manifest.

mod artifacts;
mod charts;
mod export;
mod tables;

pub use artifacts::{Artifact, sha256_hex, write_artifacts, write_atomic, write_json, write_manifest};
pub use charts::{CHART_ADDRESSES, HISTOGRAM_BINS, render_charts_svg};
pub use export::points_csv;
pub use tables::{
    TABLE_ROWS, group_amount, group_count, render_distribution, render_improvement,
    render_text_report, render_worst_addresses, render_worst_points,
};
