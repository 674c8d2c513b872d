//! ChartHarvest CLI: harvest, parse and region lookup commands.
//!
//! Commands:
//! - `harvest`: run a configured harvest against captured snapshots into one CSV
//! - `parse`: decode a single snapshot file and print its records as CSV
//! - `regions`: list registry regions whose chart exists on a date

use std::io;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chartharvest_core::sink::to_row;
use chartharvest_core::{
    parse, ChartKind, Credentials, CsvSink, RegionRegistry, ReplaySession, SharedSink,
};
use chartharvest_runner::{
    run_harvest, CancelToken, HarvestPlan, RunConfig, RunSummary, SliceOutcome,
};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

const USERNAME_VAR: &str = "CHART_USERNAME";
const PASSWORD_VAR: &str = "CHART_PASSWORD";

#[derive(Parser)]
#[command(
    name = "chartharvest",
    about = "ChartHarvest: concurrent daily chart harvester"
)]
struct Cli {
    /// Log filter used when RUST_LOG is unset (e.g. info, debug, chartharvest_core=trace).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Harvest the configured dates from captured snapshots into a CSV file.
    Harvest {
        /// Path to a TOML run config.
        #[arg(long)]
        config: PathBuf,

        /// Directory of captured snapshots (`{view}/{date}.txt`).
        #[arg(long)]
        snapshots: PathBuf,

        /// Destination CSV file. Overwritten by the run.
        #[arg(long)]
        out: PathBuf,

        /// Region registry JSON, required with `all_regions = true`.
        #[arg(long)]
        registry: Option<PathBuf>,
    },
    /// Decode one snapshot file and print its records as CSV.
    Parse {
        /// Chart kind: song or artist.
        #[arg(long)]
        kind: ChartKind,

        /// Chart date (YYYY-MM-DD).
        #[arg(long)]
        date: NaiveDate,

        /// Region abbreviation recorded on each row.
        #[arg(long, default_value = "global")]
        region: String,

        /// Snapshot text file.
        file: PathBuf,
    },
    /// List registry regions whose chart exists on a date.
    Regions {
        /// Region registry JSON.
        #[arg(long)]
        registry: PathBuf,

        /// Date (YYYY-MM-DD).
        #[arg(long)]
        date: NaiveDate,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level)?;

    match cli.command {
        Commands::Harvest {
            config,
            snapshots,
            out,
            registry,
        } => run_harvest_cmd(&config, snapshots, out, registry.as_deref()),
        Commands::Parse {
            kind,
            date,
            region,
            file,
        } => run_parse(kind, date, &region, &file),
        Commands::Regions { registry, date } => run_regions(&registry, date),
    }
}

fn init_tracing(default_level: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .with_context(|| format!("invalid log filter '{default_level}'"))?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
    Ok(())
}

/// Credentials come from the environment only. Replay sessions ignore them,
/// so missing variables are not an error here.
fn credentials_from_env() -> Credentials {
    let username = std::env::var(USERNAME_VAR).unwrap_or_default();
    let password = std::env::var(PASSWORD_VAR).unwrap_or_default();
    if username.is_empty() {
        debug!("{USERNAME_VAR} not set; using empty credentials");
    }
    Credentials::new(username, password)
}

fn run_harvest_cmd(
    config_path: &Path,
    snapshots: PathBuf,
    out: PathBuf,
    registry_path: Option<&Path>,
) -> Result<()> {
    let config = RunConfig::from_file(config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;

    let registry = match registry_path {
        Some(path) => Some(
            RegionRegistry::from_file(path)
                .with_context(|| format!("loading region registry {}", path.display()))?,
        ),
        None if config.run.all_regions => {
            bail!("all_regions = true needs --registry <region.json>")
        }
        None => None,
    };
    if !snapshots.is_dir() {
        bail!("snapshot directory {} does not exist", snapshots.display());
    }

    let plan = HarvestPlan::from_config(&config, credentials_from_env(), registry)?;
    let sink = SharedSink::new(CsvSink::new(&out, plan.kind));
    let cancel = CancelToken::new();

    let summary = run_harvest(
        &plan,
        |_| Ok(ReplaySession::new(&snapshots)),
        &sink,
        &cancel,
    )?;

    print_summary(&summary);
    info!(out = %out.display(), "harvest written");

    if !summary.all_succeeded() {
        std::process::exit(1);
    }
    Ok(())
}

fn print_summary(summary: &RunSummary) {
    println!("Records written: {}", summary.records_written());
    for slice in &summary.slices {
        let status = match &slice.outcome {
            SliceOutcome::Completed if slice.failures.is_empty() => "completed".to_string(),
            SliceOutcome::Completed => format!("completed with {} failed", slice.failures.len()),
            SliceOutcome::Skipped { state } => format!("skipped (session {state:?})"),
            SliceOutcome::Cancelled { remaining } => format!("cancelled, {remaining} dates left"),
            SliceOutcome::Aborted { reason, remaining } => {
                format!("aborted ({reason}), {remaining} dates left")
            }
        };
        println!(
            "  worker {:>2}: {:>4} dates, {:>6} records, {status}",
            slice.worker, slice.dates, slice.records_written
        );
    }
    for failure in summary.failed_dates() {
        eprintln!(
            "Failed {} [{}]: {}",
            failure.date, failure.region, failure.reason
        );
    }
}

fn run_parse(kind: ChartKind, date: NaiveDate, region: &str, file: &Path) -> Result<()> {
    let blob = std::fs::read_to_string(file)
        .with_context(|| format!("reading snapshot {}", file.display()))?;

    let mut records = parse(&blob, kind, date, region);
    let mut writer = csv::Writer::from_writer(io::stdout().lock());
    writer.write_record(kind.columns())?;
    for record in records.by_ref() {
        writer.write_record(to_row(&record, kind))?;
    }
    writer.flush()?;

    if !records.marker_found() {
        warn!(file = %file.display(), "no ranked entries found");
    }
    Ok(())
}

fn run_regions(registry_path: &Path, date: NaiveDate) -> Result<()> {
    let registry = RegionRegistry::from_file(registry_path)
        .with_context(|| format!("loading region registry {}", registry_path.display()))?;

    let valid = registry.valid_regions(date);
    if valid.is_empty() {
        println!("No regions available on {date}");
        return Ok(());
    }
    for region in valid {
        println!(
            "{:<24} {:<8} since {}",
            region.name, region.abbreviation, region.earliest_available
        );
    }
    Ok(())
}
