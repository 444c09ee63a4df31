//! etl-runner: headless runner for the incremental warehouse ETL.
//!
//! Usage:
//!   etl-runner run --config etl.json [--validate] [--json]
//!   etl-runner validate --config etl.json [--json]
//!   etl-runner status --config etl.json

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use etl_core::{
    config::PipelineConfig,
    pipeline::{Pipeline, RunSummary},
    quality::{standard_checks, QualityReport},
    store::{RunRecord, RunStatus, SqliteWarehouse, Warehouse},
    types::new_run_id,
    watermark::{FileWatermarkStore, Watermark, WatermarkStore},
};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Parser, Debug)]
#[command(name = "etl-runner")]
#[command(author, version, about = "Incremental warehouse ETL runner")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one incremental load
    Run {
        /// Pipeline config file (JSON)
        #[arg(short, long, env = "ETL_CONFIG", default_value = "etl.json")]
        config: PathBuf,

        /// Run the quality gate over the warehouse after a successful load
        #[arg(long)]
        validate: bool,

        /// Print the run summary as JSON
        #[arg(long)]
        json: bool,
    },

    /// Run the quality gate over what the warehouse holds now
    Validate {
        #[arg(short, long, env = "ETL_CONFIG", default_value = "etl.json")]
        config: PathBuf,

        #[arg(long)]
        json: bool,
    },

    /// Show the committed watermark and recent runs
    Status {
        #[arg(short, long, env = "ETL_CONFIG", default_value = "etl.json")]
        config: PathBuf,

        /// Number of runs to list
        #[arg(short = 'n', long, default_value_t = 10)]
        limit: usize,
    },
}

#[derive(serde::Serialize)]
struct RunOutput<'a> {
    run_id: &'a str,
    watermark_before: Option<Watermark>,
    watermark_after: Option<Watermark>,
    rows_loaded: &'a BTreeMap<String, usize>,
    quality: Option<&'a QualityReport>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Run {
            config,
            validate,
            json,
        } => {
            let config = load_config(&config)?;
            run(config, validate, json)
        }
        Command::Validate { config, json } => {
            let config = load_config(&config)?;
            validate_warehouse(&config, json)
        }
        Command::Status { config, limit } => {
            let config = load_config(&config)?;
            status(&config, limit)
        }
    }
}

fn load_config(path: &Path) -> Result<PipelineConfig> {
    let config = PipelineConfig::load(path)?;
    init_logging(config.log_file.as_deref())?;
    log::debug!("Loaded config from {}", path.display());
    Ok(config)
}

/// `RUST_LOG` overrides the default `info` level. With a log file
/// configured, output goes there (appending) instead of stderr.
fn init_logging(log_file: Option<&Path>) -> Result<()> {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    builder.format(|buf, record| {
        writeln!(
            buf,
            "{} - {} - {}",
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S,%3f"),
            record.level(),
            record.args()
        )
    });
    if let Some(path) = log_file {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("Cannot open log file {}", path.display()))?;
        builder.target(env_logger::Target::Pipe(Box::new(file)));
    }
    builder.init();
    Ok(())
}

fn open_warehouse(config: &PipelineConfig) -> Result<SqliteWarehouse> {
    let warehouse = SqliteWarehouse::open(&config.database.path)
        .with_context(|| format!("Cannot open warehouse {}", config.database.path))?;
    warehouse.migrate()?;
    Ok(warehouse)
}

fn now() -> chrono::NaiveDateTime {
    chrono::Utc::now().naive_utc()
}

fn run(config: PipelineConfig, validate: bool, json: bool) -> Result<()> {
    let warehouse = open_warehouse(&config)?;
    let watermark_store = FileWatermarkStore::new(&config.state_file);
    let run_id = new_run_id();
    let started_at = now();

    let mut pipeline = Pipeline::new(run_id.clone(), config, warehouse, watermark_store);
    let result = pipeline.run();

    let record = match &result {
        Ok(summary) => RunRecord {
            run_id: run_id.clone(),
            started_at,
            finished_at: Some(now()),
            status: RunStatus::Succeeded,
            watermark_before: summary.watermark_before.map(|w| w.to_string()),
            watermark_after: summary.watermark_after.map(|w| w.to_string()),
            rows_loaded: summary.rows_loaded.clone(),
            error: None,
        },
        Err(e) => {
            let before = pipeline.watermark_store().read().ok().flatten();
            RunRecord {
                run_id: run_id.clone(),
                started_at,
                finished_at: Some(now()),
                status: RunStatus::Failed,
                watermark_before: before.map(|w| w.to_string()),
                watermark_after: before.map(|w| w.to_string()),
                rows_loaded: BTreeMap::new(),
                error: Some(e.to_string()),
            }
        }
    };
    // History is best effort: a failed insert must not mask the run outcome.
    if let Err(e) = pipeline.warehouse().record_run(&record) {
        log::warn!("Could not record run {run_id}: {e}");
    }

    let summary = result.with_context(|| format!("ETL run {run_id} failed"))?;

    let report = if validate {
        let report = pipeline.validate()?;
        pipeline
            .warehouse_mut()
            .record_quality_report(&run_id, &report)?;
        Some(report)
    } else {
        None
    };

    print_run(&summary, report.as_ref(), json)
}

fn print_run(summary: &RunSummary, report: Option<&QualityReport>, json: bool) -> Result<()> {
    if json {
        let out = RunOutput {
            run_id: &summary.run_id,
            watermark_before: summary.watermark_before,
            watermark_after: summary.watermark_after,
            rows_loaded: &summary.rows_loaded,
            quality: report,
        };
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!("ETL run {}", summary.run_id);
    println!("  watermark before: {}", show(summary.watermark_before));
    println!("  watermark after:  {}", show(summary.watermark_after));
    for (table, rows) in &summary.rows_loaded {
        println!("  {table:<18} {rows:>8} rows");
    }
    if let Some(report) = report {
        print_report(report);
    }
    Ok(())
}

fn validate_warehouse(config: &PipelineConfig, json: bool) -> Result<()> {
    let mut warehouse = open_warehouse(config)?;
    let tables = warehouse
        .read_all()
        .context("Cannot read warehouse tables; has a run completed yet?")?;
    let report = standard_checks(&tables, &config.quality);
    report.log();

    let run_id = new_run_id();
    warehouse.record_quality_report(&run_id, &report)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }
    Ok(())
}

fn print_report(report: &QualityReport) {
    println!(
        "Quality gate: {} checks, {} violations",
        report.results.len(),
        report.violation_count()
    );
    for result in report.violations() {
        println!("  VIOLATION {result}");
    }
}

fn status(config: &PipelineConfig, limit: usize) -> Result<()> {
    let watermark = FileWatermarkStore::new(&config.state_file).read()?;
    println!("Watermark: {}", show(watermark));

    let warehouse = open_warehouse(config)?;
    let runs = warehouse.recent_runs(limit)?;
    if runs.is_empty() {
        println!("No runs recorded.");
        return Ok(());
    }
    println!("Recent runs:");
    for run in runs {
        let rows: usize = run.rows_loaded.values().sum();
        println!(
            "  {}  {}  {:<9}  {:>8} rows  {}",
            run.started_at.format("%Y-%m-%d %H:%M:%S"),
            run.run_id,
            run.status.name(),
            rows,
            run.error.as_deref().unwrap_or("")
        );
    }
    Ok(())
}

fn show(wm: Option<Watermark>) -> String {
    wm.map_or_else(|| "none".to_string(), |w| w.to_string())
}
