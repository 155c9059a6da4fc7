//! The pipeline stages: extract → normalize → analyze.
//!
//! Each stage reads and writes plain files in the output directory so any
//! stage can be re-run on its own.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use chrono::{NaiveDate, Utc};
use tracing::{info, instrument, warn};

use perpcheck_hyperliquid::{InfoClient, extract_flows};
use perpcheck_report::{
    Artifact, points_csv, render_charts_svg, render_text_report, write_artifacts, write_json,
    write_manifest,
};
use perpcheck_shared::analysis::{Analysis, View};
use perpcheck_shared::{
    Address, ArtifactMeta, ComparisonReport, CURRENT_SCHEMA_VERSION, PerpcheckError, Result,
    RunConfig, RunId, RunManifest, SnapshotIndex,
};
use perpcheck_snapshots::{LocalMirror, S3Bucket};

use crate::addresses::load_addresses;
use crate::analysis::analyse;
use crate::compare::{AlignOptions, MatchSummary, build_comparison, summarize};
use crate::normalize::{NormalizationSummary, copy_raw, normalize_series, timestamp_span};
use crate::sources::{fetch_account_history, fetch_snapshots};

/// Progress reporting callback trait.
///
/// Implemented by the CLI (spinner) or used as a no-op in tests.
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a new phase.
    fn phase(&self, name: &str);
    /// Called after one day of snapshot files is scanned.
    fn day_scanned(&self, date: NaiveDate, current: usize, total: usize);
    /// Called after one wallet's API requests finish.
    fn wallet_done(&self, address: &Address, current: usize, total: usize);
    /// Called when a stage completes.
    fn done(&self, stage: &str, elapsed: Duration);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn day_scanned(&self, _date: NaiveDate, _current: usize, _total: usize) {}
    fn wallet_done(&self, _address: &Address, _current: usize, _total: usize) {}
    fn done(&self, _stage: &str, _elapsed: Duration) {}
}

/// Where the Source A values of an extract run came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnapshotSource {
    /// A previous `comparison_output.json`.
    Cache(PathBuf),
    /// A local copy of the bucket.
    Mirror(PathBuf),
    /// The bucket itself.
    Bucket(String),
}

impl std::fmt::Display for SnapshotSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cache(path) => write!(f, "cached {}", path.display()),
            Self::Mirror(path) => write!(f, "mirror {}", path.display()),
            Self::Bucket(bucket) => write!(f, "bucket {bucket}"),
        }
    }
}

/// Result of the extract stage.
#[derive(Debug)]
pub struct ExtractOutcome {
    pub output: PathBuf,
    pub wallets: usize,
    pub snapshot_source: SnapshotSource,
    pub source_a_records: usize,
    pub source_b_records: usize,
    pub summary: MatchSummary,
    pub elapsed: Duration,
}

/// Result of the normalize stage.
#[derive(Debug)]
pub struct NormalizeOutcome {
    pub output: PathBuf,
    pub wallets: usize,
    /// Wallets without any timestamp, copied unchanged.
    pub wallets_without_timestamps: usize,
    /// Wallets whose ledger request failed, copied unchanged.
    pub wallets_failed: usize,
    pub fixed_days: usize,
    pub summary: NormalizationSummary,
    pub elapsed: Duration,
}

/// Result of one analyze run.
#[derive(Debug)]
pub struct AnalyzeOutcome {
    pub input: PathBuf,
    pub analysis: Analysis,
    /// The rendered tables, also written as an artifact.
    pub text: String,
    pub artifacts: Vec<ArtifactMeta>,
    pub manifest: PathBuf,
    pub elapsed: Duration,
}

/// Fetch both sources for every listed wallet and write the raw comparison.
///
/// Source A is rebuilt from an existing comparison output unless
/// `refresh_snapshots` is set, read from `snapshots.local_dir` when configured,
/// and downloaded from the bucket otherwise.
#[instrument(skip_all, fields(start = %config.window.start, end = %config.window.end))]
pub async fn extract(config: &RunConfig, progress: &dyn ProgressReporter) -> Result<ExtractOutcome> {
    let started = Instant::now();

    progress.phase("Loading addresses");
    let addresses = load_addresses(&config.addresses_csv)?;
    info!(wallets = addresses.len(), path = %config.addresses_csv.display(), "addresses loaded");

    ensure_dir(&config.output_dir)?;
    let (source_a, snapshot_source) = load_source_a(config, &addresses, progress).await?;

    progress.phase("Fetching Hyperliquid portfolios");
    let client = InfoClient::new(&config.hyperliquid)?;
    let source_b = fetch_account_history(
        &client,
        &addresses,
        &config.window,
        config.day_shift,
        progress,
    )
    .await;

    progress.phase("Building comparison");
    let report = build_comparison(
        &addresses,
        &source_a,
        &source_b,
        &config.window,
        AlignOptions {
            day_shift: config.day_shift,
            threshold_pct: config.match_threshold_pct,
        },
        Utc::now(),
    );
    let output = config.comparison_path();
    write_json(&output, &report)?;

    let summary = summarize(&report);
    info!(
        ok = summary.ok,
        mismatch = summary.mismatch,
        missing = summary.missing,
        output = %output.display(),
        "comparison written"
    );

    let elapsed = started.elapsed();
    progress.done("extract", elapsed);
    Ok(ExtractOutcome {
        output,
        wallets: addresses.len(),
        snapshot_source,
        source_a_records: source_a.len(),
        source_b_records: source_b.len(),
        summary,
        elapsed,
    })
}

async fn load_source_a(
    config: &RunConfig,
    addresses: &[Address],
    progress: &dyn ProgressReporter,
) -> Result<(SnapshotIndex, SnapshotSource)> {
    let cache = config.comparison_path();
    if !config.refresh_snapshots && cache.exists() {
        progress.phase("Loading cached Artemis snapshots");
        match read_report(&cache) {
            Ok(previous) => {
                if previous.window.is_some_and(|w| w != config.window) {
                    warn!(
                        path = %cache.display(),
                        "cached comparison covers a different window; dates outside it will be missing"
                    );
                }
                let index = SnapshotIndex::from_report(&previous);
                if index.is_empty() {
                    warn!(path = %cache.display(), "cached comparison has no Artemis values, fetching snapshots");
                } else {
                    info!(wallets = index.address_count(), "source A loaded from cache");
                    return Ok((index, SnapshotSource::Cache(cache)));
                }
            }
            Err(e) => warn!(error = %e, "cached comparison unreadable, fetching snapshots"),
        }
    }

    progress.phase("Scanning Artemis snapshots");
    let scratch = std::env::temp_dir();
    let prefix = &config.snapshots.prefix;
    match &config.snapshots.local_dir {
        Some(dir) => {
            let mirror = LocalMirror::new(dir);
            let index =
                fetch_snapshots(&mirror, prefix, addresses, &config.window, &scratch, progress).await;
            Ok((index, SnapshotSource::Mirror(PathBuf::from(dir))))
        }
        None => {
            let bucket = S3Bucket::connect(&config.snapshots).await;
            let index =
                fetch_snapshots(&bucket, prefix, addresses, &config.window, &scratch, progress).await;
            Ok((index, SnapshotSource::Bucket(config.snapshots.bucket.clone())))
        }
    }
}

/// Adjust every Source B value by the ledger flows in its alignment gap and
/// write the normalized comparison.
///
/// A wallet without timestamps or whose ledger request fails keeps its raw
/// values.
#[instrument(skip_all, fields(input = %config.comparison_path().display()))]
pub async fn normalize(
    config: &RunConfig,
    progress: &dyn ProgressReporter,
) -> Result<NormalizeOutcome> {
    let started = Instant::now();

    progress.phase("Loading comparison");
    let input = config.comparison_path();
    let mut report = read_report(&input)?;
    let client = InfoClient::new(&config.hyperliquid)?;

    progress.phase("Fetching ledger updates");
    let total = report.addresses.len();
    let mut without_timestamps = 0usize;
    let mut failed = 0usize;
    let mut fixed_days = 0usize;

    for (i, block) in report.addresses.iter_mut().enumerate() {
        let Some((start_ms, end_ms)) = timestamp_span(&block.series) else {
            info!(address = %block.address, "no timestamps, copying raw values");
            block.series.iter_mut().for_each(copy_raw);
            without_timestamps += 1;
            progress.wallet_done(&block.address, i + 1, total);
            continue;
        };

        match client.all_ledger_events(&block.address, start_ms, end_ms).await {
            Ok(events) => {
                let flows = extract_flows(&events);
                let fixed = normalize_series(&mut block.series, &flows, config.match_threshold_pct);
                info!(
                    address = %block.address,
                    events = events.len(),
                    flows = flows.len(),
                    fixed,
                    "wallet normalized"
                );
                fixed_days += fixed;
            }
            Err(e) => {
                warn!(address = %block.address, error = %e, "ledger request failed, copying raw values");
                block.series.iter_mut().for_each(copy_raw);
                failed += 1;
            }
        }
        progress.wallet_done(&block.address, i + 1, total);
    }

    report.generated_at = Utc::now();
    let output = config.normalized_path();
    write_json(&output, &report)?;

    let summary = NormalizationSummary::of(&report);
    info!(
        ok_before = summary.ok_before,
        ok_after = summary.ok_after,
        improved = summary.improved(),
        missing = summary.missing,
        output = %output.display(),
        "normalized comparison written"
    );

    let elapsed = started.elapsed();
    progress.done("normalize", elapsed);
    Ok(NormalizeOutcome {
        output,
        wallets: total,
        wallets_without_timestamps: without_timestamps,
        wallets_failed: failed,
        fixed_days,
        summary,
        elapsed,
    })
}

/// Bucket and rank the raw or normalized comparison and write tables, charts,
/// the points CSV and a manifest into the output directory.
#[instrument(skip_all, fields(view = ?view))]
pub fn analyze(
    config: &RunConfig,
    view: View,
    progress: &dyn ProgressReporter,
) -> Result<AnalyzeOutcome> {
    let started = Instant::now();

    progress.phase("Analysing comparison");
    let input = match view {
        View::Raw => config.comparison_path(),
        View::Normalized => config.normalized_path(),
    };
    let report = read_report(&input)?;
    let analysis = analyse(&report, view);
    info!(
        compared = analysis.total_compared(),
        missing = analysis.missing,
        mismatching_wallets = analysis.mismatches.len(),
        "analysis complete"
    );

    progress.phase("Writing report");
    let suffix = view.suffix();
    let text = render_text_report(&analysis);
    let csv = points_csv(&analysis.points)?;
    let artifacts = vec![
        Artifact::new(format!("analysis{suffix}.txt"), text.clone()),
        Artifact::new(
            format!("analysis_charts{suffix}.svg"),
            render_charts_svg(&analysis),
        ),
        Artifact::new(format!("analysis_points{suffix}.csv"), csv),
    ];
    let metas = write_artifacts(&config.output_dir, &artifacts)?;

    let manifest = RunManifest {
        schema_version: CURRENT_SCHEMA_VERSION,
        run_id: RunId::new(),
        tool_version: env!("CARGO_PKG_VERSION").to_string(),
        created_at: Utc::now(),
        view: match view {
            View::Raw => "raw".to_string(),
            View::Normalized => "normalized".to_string(),
        },
        input: input
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default(),
        input_generated_at: report.generated_at,
        window: report.window,
        artifacts: metas.clone(),
    };
    let manifest_path = write_manifest(
        &config.output_dir,
        &format!("manifest{suffix}.json"),
        &manifest,
    )?;

    let elapsed = started.elapsed();
    progress.done("analyze", elapsed);
    Ok(AnalyzeOutcome {
        input,
        analysis,
        text,
        artifacts: metas,
        manifest: manifest_path,
        elapsed,
    })
}

/// Results of a full run.
#[derive(Debug)]
pub struct RunOutcome {
    pub extract: ExtractOutcome,
    pub normalize: NormalizeOutcome,
    pub raw: AnalyzeOutcome,
    pub normalized: AnalyzeOutcome,
}

/// Every stage in order, analysing both views.
pub async fn run(config: &RunConfig, progress: &dyn ProgressReporter) -> Result<RunOutcome> {
    let extract = extract(config, progress).await?;
    let normalize = normalize(config, progress).await?;
    let raw = analyze(config, View::Raw, progress)?;
    let normalized = analyze(config, View::Normalized, progress)?;
    Ok(RunOutcome {
        extract,
        normalize,
        raw,
        normalized,
    })
}

/// Read a comparison file written by an earlier stage.
pub fn read_report(path: &Path) -> Result<ComparisonReport> {
    let content = std::fs::read_to_string(path).map_err(|e| PerpcheckError::io(path, e))?;
    serde_json::from_str(&content).map_err(|e| PerpcheckError::serialization(path, e))
}

fn ensure_dir(dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir).map_err(|e| PerpcheckError::io(dir, e))
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use perpcheck_shared::{AppConfig, DateWindow};
    use serde_json::{Value, json};
    use wiremock::matchers::{body_partial_json, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn temp_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("perpcheck-pipeline-test-{}", uuid::Uuid::now_v7()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn fixture_json(name: &str) -> Value {
        let raw = std::fs::read_to_string(format!("../../../fixtures/{name}")).unwrap();
        serde_json::from_str(&raw).unwrap()
    }

    fn config(out_dir: &Path, api_url: String) -> RunConfig {
        let end = NaiveDate::from_ymd_opt(2026, 1, 2).unwrap();
        let mut config = RunConfig::from_app(&AppConfig::default(), end).unwrap();
        config.window = DateWindow::ending_at(end, 2).unwrap();
        config.output_dir = out_dir.to_path_buf();
        config.addresses_csv = PathBuf::from("../../../fixtures/outlier_address.csv");
        config.snapshots.local_dir = Some("../../../fixtures/mirror".into());
        config.hyperliquid.api_url = api_url;
        config.hyperliquid.max_attempts = 1;
        config
    }

    /// Portfolio fixture for wallet aa and an empty portfolio for bb. aa's
    /// ledger holds one 5 USDC withdrawal between the day-1 snapshots; bb's
    /// ledger endpoint fails.
    async fn mock_api() -> MockServer {
        let server = MockServer::start().await;
        let aa = "0x00000000000000000000000000000000000000aa";
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"type": "portfolio", "user": aa})))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(fixture_json("hyperliquid/portfolio.json")),
            )
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"type": "portfolio"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"type": "userNonFundingLedgerUpdates", "user": aa})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"time": 1_767_225_000_000i64, "hash": "0x1", "delta": {"type": "withdraw", "usdc": "5.0"}}
            ])))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"type": "userNonFundingLedgerUpdates"})))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        server
    }

    #[tokio::test]
    async fn full_run_writes_every_file() {
        let server = mock_api().await;
        let out = temp_dir();
        let config = config(&out, server.uri());

        let outcome = run(&config, &SilentProgress).await.unwrap();

        // extract: mirror values for aa, portfolio values shifted by one day
        assert_eq!(outcome.extract.wallets, 2);
        assert!(matches!(outcome.extract.snapshot_source, SnapshotSource::Mirror(_)));
        let report = read_report(&config.comparison_path()).unwrap();
        let day1 = &report.addresses[0].series[0];
        assert_eq!(day1.artemis.value, Some(500.0));
        assert_eq!(day1.hyperliquid.value, Some(505.0));
        assert_eq!(day1.diff.matched, Some(false));
        let day2 = &report.addresses[0].series[1];
        assert_eq!(day2.artemis.value, Some(1001.0));
        assert_eq!(day2.hyperliquid.value, Some(999.0));
        assert_eq!(
            outcome.extract.summary,
            MatchSummary {
                ok: 1,
                mismatch: 1,
                missing: 2
            }
        );

        // normalize: the withdrawal fixes day 1; bb's ledger request fails
        assert_eq!(outcome.normalize.fixed_days, 1);
        assert_eq!(outcome.normalize.wallets_without_timestamps, 0);
        assert_eq!(outcome.normalize.wallets_failed, 1);
        assert_eq!(outcome.normalize.summary.improved(), 1);

        // analyze: both views with their own file names
        for name in [
            "analysis.txt",
            "analysis_charts.svg",
            "analysis_points.csv",
            "manifest.json",
            "analysis_normalized.txt",
            "analysis_charts_normalized.svg",
            "analysis_points_normalized.csv",
            "manifest_normalized.json",
            "comparison_output_normalized.json",
        ] {
            assert!(out.join(name).exists(), "{name} missing");
        }
        assert_eq!(outcome.raw.analysis.total_compared(), 2);
        assert_eq!(outcome.normalized.analysis.improvement().map(|i| i.fixed), Some(1));
        assert!(outcome.normalized.text.contains("Pairs fixed by normalization  : 1"));

        let manifest: RunManifest = serde_json::from_str(
            &std::fs::read_to_string(out.join("manifest_normalized.json")).unwrap(),
        )
        .unwrap();
        assert_eq!(manifest.view, "normalized");
        assert_eq!(manifest.input, "comparison_output_normalized.json");
        assert_eq!(manifest.artifacts.len(), 3);

        let _ = std::fs::remove_dir_all(&out);
    }

    #[tokio::test]
    async fn extract_reuses_cached_snapshots() {
        let server = mock_api().await;
        let out = temp_dir();
        std::fs::copy(
            "../../../fixtures/comparison_output.fixture.json",
            out.join("comparison_output.json"),
        )
        .unwrap();
        let mut config = config(&out, server.uri());
        // the mirror would give 1001.0 for 2026-01-02; the cache has 1000.0
        config.snapshots.local_dir = Some("/nonexistent".into());

        let outcome = extract(&config, &SilentProgress).await.unwrap();
        assert!(matches!(outcome.snapshot_source, SnapshotSource::Cache(_)));

        let report = read_report(&config.comparison_path()).unwrap();
        assert_eq!(report.addresses[0].series[1].artemis.value, Some(1000.0));
        assert_eq!(report.addresses[1].series[1].artemis.value, Some(0.09));
        assert_eq!(report.window, Some(config.window));

        let _ = std::fs::remove_dir_all(&out);
    }

    #[tokio::test]
    async fn cache_without_artemis_values_is_refetched() {
        let server = mock_api().await;
        let out = temp_dir();
        let mut cached = fixture_json("comparison_output.fixture.json");
        for block in cached["addresses"].as_array_mut().unwrap() {
            for day in block["series"].as_array_mut().unwrap() {
                day["artemis"] = json!({ "value": null, "last_timestamp": null });
            }
        }
        std::fs::write(
            out.join("comparison_output.json"),
            serde_json::to_vec(&cached).unwrap(),
        )
        .unwrap();
        let config = config(&out, server.uri());

        let outcome = extract(&config, &SilentProgress).await.unwrap();
        assert!(matches!(outcome.snapshot_source, SnapshotSource::Mirror(_)));
        assert!(outcome.source_a_records > 0);
        let report = read_report(&config.comparison_path()).unwrap();
        assert_eq!(report.addresses[0].series[1].artemis.value, Some(1001.0));

        let _ = std::fs::remove_dir_all(&out);
    }

    #[tokio::test]
    async fn refresh_ignores_cache() {
        let server = mock_api().await;
        let out = temp_dir();
        std::fs::copy(
            "../../../fixtures/comparison_output.fixture.json",
            out.join("comparison_output.json"),
        )
        .unwrap();
        let mut config = config(&out, server.uri());
        config.refresh_snapshots = true;

        let outcome = extract(&config, &SilentProgress).await.unwrap();
        assert!(matches!(outcome.snapshot_source, SnapshotSource::Mirror(_)));
        let report = read_report(&config.comparison_path()).unwrap();
        assert_eq!(report.addresses[0].series[1].artemis.value, Some(1001.0));

        let _ = std::fs::remove_dir_all(&out);
    }

    #[tokio::test]
    async fn ledger_failure_keeps_raw_values() {
        let server = mock_api().await;
        let out = temp_dir();
        std::fs::copy(
            "../../../fixtures/comparison_output.fixture.json",
            out.join("comparison_output.json"),
        )
        .unwrap();
        let config = config(&out, server.uri());

        // bb has timestamps in the fixture, and its ledger request fails
        let outcome = normalize(&config, &SilentProgress).await.unwrap();
        assert_eq!(outcome.wallets_failed, 1);

        let report = read_report(&config.normalized_path()).unwrap();
        let bb = &report.addresses[1].series[1];
        assert_eq!(bb.diff_normalized, Some(bb.diff));
        assert_eq!(bb.hyperliquid_normalized.as_ref().map(|n| n.events_in_gap), Some(0));
        assert!(report.generated_at > chrono::DateTime::parse_from_rfc3339("2026-01-03T09:00:00Z").unwrap());

        let _ = std::fs::remove_dir_all(&out);
    }

    #[test]
    fn analyze_without_input_fails() {
        let out = temp_dir();
        let config = config(&out, "http://127.0.0.1:9".into());
        let err = analyze(&config, View::Normalized, &SilentProgress).unwrap_err();
        assert!(matches!(err, PerpcheckError::Io { .. }));
        let _ = std::fs::remove_dir_all(&out);
    }
}
