//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{NaiveDate, Utc};
use clap::{Args, Parser, Subcommand};
use color_eyre::eyre::Result;
use indicatif::{ProgressBar, ProgressStyle};
use perpcheck_core::pipeline::{
    self, AnalyzeOutcome, ExtractOutcome, NormalizeOutcome, ProgressReporter,
};
use perpcheck_shared::analysis::View;
use perpcheck_shared::{Address, AppConfig, RunConfig, init_config, load_config, load_config_from};
use tracing::info;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// perpcheck: find wallets whose perp account value differs between sources.
#[derive(Parser)]
#[command(
    name = "perpcheck",
    version,
    about = "Compare wallet perp account values between Artemis snapshots and the Hyperliquid API.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Config file (defaults to ~/.perpcheck/perpcheck.toml).
    #[arg(long, global = true, env = "PERPCHECK_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Fetch both sources and write comparison_output.json.
    Extract {
        #[command(flatten)]
        run: RunArgs,
    },

    /// Adjust Source B by ledger flows and write comparison_output_normalized.json.
    Normalize {
        #[command(flatten)]
        run: RunArgs,
    },

    /// Print distribution tables and write charts, CSV and a manifest.
    Analyze {
        /// Analyse the normalized comparison instead of the raw one.
        #[arg(long)]
        normalized: bool,

        #[command(flatten)]
        run: RunArgs,
    },

    /// Extract, normalize, and analyse both views.
    Run {
        #[command(flatten)]
        run: RunArgs,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Flags overriding the config file for one run.
#[derive(Args, Debug, Default)]
pub(crate) struct RunArgs {
    /// Number of compared days.
    #[arg(long)]
    pub days: Option<u32>,

    /// Last compared day (YYYY-MM-DD), defaults to today (UTC).
    #[arg(long)]
    pub end_date: Option<NaiveDate>,

    /// Output directory.
    #[arg(short, long)]
    pub out_dir: Option<PathBuf>,

    /// Address CSV with an `address` column.
    #[arg(long)]
    pub addresses: Option<PathBuf>,

    /// Read snapshot files from this local mirror instead of the bucket.
    #[arg(long)]
    pub snapshot_dir: Option<PathBuf>,

    /// Download snapshots even if comparison_output.json already exists.
    #[arg(long)]
    pub refresh_snapshots: bool,
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "perpcheck=info",
        1 => "perpcheck=debug",
        _ => "perpcheck=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config.as_deref();
    match cli.command {
        Command::Extract { run } => cmd_extract(&resolve(config_path, &run)?).await,
        Command::Normalize { run } => cmd_normalize(&resolve(config_path, &run)?).await,
        Command::Analyze { normalized, run } => {
            let view = if normalized {
                View::Normalized
            } else {
                View::Raw
            };
            cmd_analyze(&resolve(config_path, &run)?, view)
        }
        Command::Run { run } => cmd_run(&resolve(config_path, &run)?).await,
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init(),
            ConfigAction::Show => cmd_config_show(config_path),
        },
    }
}

fn load_app_config(path: Option<&Path>) -> Result<AppConfig> {
    Ok(match path {
        Some(path) => load_config_from(path)?,
        None => load_config()?,
    })
}

/// Config file values, overridden by flags.
fn resolve(config_path: Option<&Path>, args: &RunArgs) -> Result<RunConfig> {
    let app = load_app_config(config_path)?;
    Ok(apply_overrides(app, args, Utc::now().date_naive())?)
}

fn apply_overrides(
    mut app: AppConfig,
    args: &RunArgs,
    today: NaiveDate,
) -> perpcheck_shared::Result<RunConfig> {
    if let Some(days) = args.days {
        app.window.days = days;
    }
    if let Some(end) = args.end_date {
        app.window.end_date = Some(end);
    }
    if let Some(dir) = &args.out_dir {
        app.output.dir = dir.to_string_lossy().into_owned();
    }
    if let Some(csv) = &args.addresses {
        app.output.addresses_csv = csv.to_string_lossy().into_owned();
    }
    if let Some(dir) = &args.snapshot_dir {
        app.snapshots.local_dir = Some(dir.to_string_lossy().into_owned());
    }
    app.validate()?;

    let mut config = RunConfig::from_app(&app, today)?;
    config.refresh_snapshots = args.refresh_snapshots;
    Ok(config)
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_extract(config: &RunConfig) -> Result<()> {
    info!(
        start = %config.window.start,
        end = %config.window.end,
        out = %config.output_dir.display(),
        "extracting"
    );
    let reporter = CliProgress::new();
    let outcome = pipeline::extract(config, &reporter).await?;
    drop(reporter);
    print_extract(&outcome);
    Ok(())
}

async fn cmd_normalize(config: &RunConfig) -> Result<()> {
    let reporter = CliProgress::new();
    let outcome = pipeline::normalize(config, &reporter).await?;
    drop(reporter);
    print_normalize(&outcome);
    Ok(())
}

fn cmd_analyze(config: &RunConfig, view: View) -> Result<()> {
    let reporter = CliProgress::new();
    let outcome = pipeline::analyze(config, view, &reporter)?;
    drop(reporter);
    print_analyze(&outcome);
    Ok(())
}

async fn cmd_run(config: &RunConfig) -> Result<()> {
    let reporter = CliProgress::new();
    let outcome = pipeline::run(config, &reporter).await?;
    drop(reporter);

    print_extract(&outcome.extract);
    print_normalize(&outcome.normalize);
    print_analyze(&outcome.raw);
    print_analyze(&outcome.normalized);
    Ok(())
}

fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

fn cmd_config_show(path: Option<&Path>) -> Result<()> {
    let config = load_app_config(path)?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

// ---------------------------------------------------------------------------
// Summaries
// ---------------------------------------------------------------------------

fn print_extract(outcome: &ExtractOutcome) {
    let summary = outcome.summary;
    println!();
    println!("  Comparison written!");
    println!("  Wallets:   {}", outcome.wallets);
    println!(
        "  Artemis:   {} records ({})",
        outcome.source_a_records, outcome.snapshot_source
    );
    println!("  HL:        {} records", outcome.source_b_records);
    println!("  OK:        {}", summary.ok);
    println!("  Mismatch:  {}", summary.mismatch);
    println!("  Missing:   {}", summary.missing);
    println!("  Path:      {}", outcome.output.display());
    println!("  Time:      {:.1}s", outcome.elapsed.as_secs_f64());
    println!();
}

fn print_normalize(outcome: &NormalizeOutcome) {
    let summary = outcome.summary;
    println!();
    println!("  Normalized comparison written!");
    println!("  Wallets:   {}", outcome.wallets);
    if outcome.wallets_without_timestamps > 0 {
        println!("  No data:   {}", outcome.wallets_without_timestamps);
    }
    if outcome.wallets_failed > 0 {
        println!("  Failed:    {}", outcome.wallets_failed);
    }
    println!("  OK:        {} -> {}", summary.ok_before, summary.ok_after);
    println!(
        "  Mismatch:  {} -> {}",
        summary.mismatch_before, summary.mismatch_after
    );
    println!("  Improved:  {:+}", summary.improved());
    println!("  Path:      {}", outcome.output.display());
    println!("  Time:      {:.1}s", outcome.elapsed.as_secs_f64());
    println!();
}

fn print_analyze(outcome: &AnalyzeOutcome) {
    println!();
    println!("{}", outcome.text);
    for artifact in &outcome.artifacts {
        println!("  Wrote {} ({} bytes)", artifact.filename, artifact.size_bytes);
    }
    println!("  Manifest: {}", outcome.manifest.display());
    println!();
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);
        spinner.set_style(style);
        spinner.enable_steady_tick(Duration::from_millis(80));
        Self { spinner }
    }
}

impl Drop for CliProgress {
    fn drop(&mut self) {
        self.spinner.finish_and_clear();
    }
}

impl ProgressReporter for CliProgress {
    fn phase(&self, name: &str) {
        self.spinner.set_message(name.to_string());
    }

    fn day_scanned(&self, date: NaiveDate, current: usize, total: usize) {
        self.spinner
            .set_message(format!("Scanning snapshots [{current}/{total}] {date}"));
    }

    fn wallet_done(&self, address: &Address, current: usize, total: usize) {
        self.spinner
            .set_message(format!("Wallets [{current}/{total}] {}", address.short(10)));
    }

    fn done(&self, stage: &str, elapsed: Duration) {
        self.spinner
            .println(format!("  {stage} finished in {:.1}s", elapsed.as_secs_f64()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, 1).unwrap()
    }

    #[test]
    fn flags_override_file_values() {
        let cli = Cli::try_parse_from([
            "perpcheck",
            "analyze",
            "--normalized",
            "--days",
            "7",
            "--end-date",
            "2026-02-10",
            "--out-dir",
            "/tmp/out",
            "--snapshot-dir",
            "/data/mirror",
            "--refresh-snapshots",
        ])
        .unwrap();
        let Command::Analyze { normalized, run } = cli.command else {
            panic!("expected analyze");
        };
        assert!(normalized);

        let config = apply_overrides(AppConfig::default(), &run, today()).unwrap();
        assert_eq!(config.window.days, 7);
        assert_eq!(config.window.end, NaiveDate::from_ymd_opt(2026, 2, 10).unwrap());
        assert_eq!(config.output_dir, PathBuf::from("/tmp/out"));
        assert_eq!(config.snapshots.local_dir.as_deref(), Some("/data/mirror"));
        assert!(config.refresh_snapshots);
    }

    #[test]
    fn file_values_survive_without_flags() {
        let mut app = AppConfig::default();
        app.window.days = 5;
        app.output.addresses_csv = "wallets.csv".into();

        let config = apply_overrides(app, &RunArgs::default(), today()).unwrap();
        assert_eq!(config.window.days, 5);
        assert_eq!(config.window.end, today());
        assert_eq!(config.addresses_csv, PathBuf::from("wallets.csv"));
        assert!(!config.refresh_snapshots);
    }

    #[test]
    fn zero_days_is_rejected() {
        let args = RunArgs {
            days: Some(0),
            ..Default::default()
        };
        assert!(apply_overrides(AppConfig::default(), &args, today()).is_err());
    }

    #[test]
    fn global_flags_parse_after_subcommand() {
        let cli = Cli::try_parse_from(["perpcheck", "run", "-vv", "--log-format", "json"]).unwrap();
        assert_eq!(cli.verbose, 2);
        assert!(matches!(cli.log_format, LogFormat::Json));
        assert!(matches!(cli.command, Command::Run { .. }));
    }
}
