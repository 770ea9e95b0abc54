use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

mod config;
mod corrector;
mod db;
mod error;
mod log;
mod models;
mod monitor;
mod report;
mod scorer;
mod series;

use config::{Binning, MonitorConfig};
use corrector::SpectrumCorrector;
use db::PgDriftLog;
use log::{CsvDriftLog, DriftLog, MemoryDriftLog};
use monitor::RollingDriftMonitor;
use series::Series;

#[derive(Parser)]
#[command(name = "flaretrace")]
#[command(about = "Light-curve drift monitoring and spectrum contamination correction", long_about = None)]
struct Cli {
    /// Log at debug level unless RUST_LOG is set
    #[arg(long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct ConfigArgs {
    /// JSON monitor configuration; flags below override it
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    window_size: Option<usize>,
    #[arg(long)]
    step_size: Option<usize>,
    /// Feature to monitor (repeatable, order is kept)
    #[arg(long = "feature")]
    features: Vec<String>,
    #[arg(long)]
    threshold: Option<f64>,
    #[arg(long)]
    bin_count: Option<usize>,
    #[arg(long, value_enum)]
    binning: Option<Binning>,
}

impl ConfigArgs {
    fn resolve(&self) -> anyhow::Result<MonitorConfig> {
        let mut config = load_config(self.config.as_deref())?;
        if let Some(value) = self.window_size {
            config.window_size = value;
        }
        if let Some(value) = self.step_size {
            config.step_size = value;
        }
        if !self.features.is_empty() {
            config.features = self.features.clone();
        }
        if let Some(value) = self.threshold {
            config.threshold = value;
        }
        if let Some(value) = self.bin_count {
            config.bin_count = value;
        }
        if let Some(value) = self.binning {
            config.binning = value;
        }
        config.validate()?;
        Ok(config)
    }
}

#[derive(Args)]
struct CorrectionArgs {
    /// JSON configuration supplying `correction_factor`
    #[arg(long)]
    config: Option<PathBuf>,
    /// Flux multiplier for contaminated bins, in (0, 1]; overrides the config
    #[arg(long)]
    correction_factor: Option<f64>,
}

impl CorrectionArgs {
    fn resolve(&self) -> anyhow::Result<MonitorConfig> {
        let mut config = load_config(self.config.as_deref())?;
        if let Some(value) = self.correction_factor {
            config.correction_factor = value;
        }
        config.validate()?;
        Ok(config)
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<MonitorConfig> {
    match path {
        Some(path) => MonitorConfig::from_json_path(path)
            .with_context(|| format!("failed to load config {}", path.display())),
        None => Ok(MonitorConfig::default()),
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Walk a series against its reference window and log drift
    Monitor {
        #[arg(long)]
        series: PathBuf,
        #[arg(long, default_value = "logs/drift_log.csv")]
        log: PathBuf,
        /// Append to an existing log instead of starting a fresh one
        #[arg(long)]
        append: bool,
        /// Keep the log in memory and print drifted windows instead of persisting
        #[arg(long, conflicts_with_all = ["append", "database"])]
        dry_run: bool,
        /// Write to Postgres instead of the CSV log
        #[arg(long)]
        database: bool,
        /// Existing Postgres session to append to
        #[arg(long, requires = "database")]
        session: Option<Uuid>,
        /// Also monitor the derived time_diff feature
        #[arg(long)]
        time_diff: bool,
        #[command(flatten)]
        settings: ConfigArgs,
    },
    /// Compare two explicit samples once
    Check {
        #[arg(long)]
        reference: PathBuf,
        #[arg(long)]
        comparison: PathBuf,
        #[command(flatten)]
        settings: ConfigArgs,
    },
    /// List logged windows overlapping a time range
    Query {
        #[arg(long, default_value = "logs/drift_log.csv")]
        log: PathBuf,
        /// Query this Postgres session instead of the CSV log
        #[arg(long)]
        session: Option<Uuid>,
        #[arg(long)]
        start: String,
        #[arg(long)]
        end: String,
    },
    /// Flag and correct spectrum bins that coincide with drift
    Correct {
        #[arg(long, default_value = "logs/drift_log.csv")]
        log: PathBuf,
        #[arg(long)]
        spectrum: PathBuf,
        #[arg(long, default_value = "corrected_spectrum.csv")]
        out: PathBuf,
        /// Read drift records from this Postgres session instead of the CSV log
        #[arg(long)]
        session: Option<Uuid>,
        #[command(flatten)]
        settings: CorrectionArgs,
        /// Also write a markdown drift report
        #[arg(long = "report")]
        report_out: Option<PathBuf>,
    },
    /// Generate a markdown drift report
    Report {
        #[arg(long, default_value = "logs/drift_log.csv")]
        log: PathBuf,
        /// Report on this Postgres session instead of the CSV log
        #[arg(long)]
        session: Option<Uuid>,
        #[arg(long, default_value = "drift_report.md")]
        out: PathBuf,
    },
    /// Copy a CSV drift log into a new Postgres session
    Import {
        #[arg(long)]
        csv: PathBuf,
        #[arg(long)]
        label: Option<String>,
    },
    /// Write a Postgres session out as a CSV drift log
    Export {
        #[arg(long)]
        session: Uuid,
        #[arg(long)]
        out: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::InitDb => {
            let pool = connect().await?;
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Monitor {
            series,
            log,
            append,
            dry_run,
            database,
            session,
            time_diff,
            settings,
        } => {
            let config = settings.resolve()?;
            let series = load_series(&series, time_diff)?;
            let monitor = RollingDriftMonitor::new(config)?;

            if dry_run {
                let mut store = MemoryDriftLog::default();
                let summary = monitor.run(&series, &mut store)?;
                for record in store.records().iter().filter(|r| r.is_drifted) {
                    print_record(record);
                }
                println!(
                    "Evaluated {} windows, {} of {} records drifted (not persisted).",
                    summary.windows, summary.drifted, summary.records
                );
            } else if database {
                let pool = connect().await?;
                let store = match session {
                    Some(id) => PgDriftLog::open(pool, id),
                    None => PgDriftLog::create(pool, None).await?,
                };
                let mut windows = 0usize;
                let mut drifted = 0usize;
                for batch in monitor.windows(&series)? {
                    let batch = batch?;
                    store.append(&batch).await?;
                    windows += 1;
                    drifted += batch.iter().filter(|r| r.is_drifted).count();
                }
                println!(
                    "Evaluated {windows} windows, {drifted} drifted records in session {}.",
                    store.session_id()
                );
            } else {
                let mut store = if append {
                    CsvDriftLog::open(&log)
                } else {
                    CsvDriftLog::create(&log)
                        .with_context(|| format!("failed to create {}", log.display()))?
                };
                let summary = monitor
                    .run(&series, &mut store)
                    .with_context(|| format!("drift walk aborted writing {}", log.display()))?;
                if summary.windows == 0 {
                    println!(
                        "Series has {} samples; need more than {} for one comparison window.",
                        series.len(),
                        2 * monitor.config().window_size
                    );
                } else {
                    println!(
                        "Evaluated {} windows, {} of {} records drifted. Log: {}.",
                        summary.windows,
                        summary.drifted,
                        summary.records,
                        store.path().display()
                    );
                }
            }
        }
        Commands::Check {
            reference,
            comparison,
            settings,
        } => {
            let monitor = RollingDriftMonitor::new(settings.resolve()?)?;
            let reference = load_series(&reference, false)?;
            let comparison = load_series(&comparison, false)?;
            for record in monitor.check(&reference, &comparison)? {
                print_record(&record);
            }
        }
        Commands::Query {
            log,
            session,
            start,
            end,
        } => {
            let start = series::parse_timestamp(&start)?;
            let end = series::parse_timestamp(&end)?;
            let records = match session {
                Some(id) => {
                    let pool = connect().await?;
                    PgDriftLog::open(pool, id)
                        .query_overlapping(start, end)
                        .await?
                }
                None => CsvDriftLog::open(&log).query_overlapping(start, end)?,
            };
            if records.is_empty() {
                println!("No logged windows overlap this range.");
                return Ok(());
            }
            for record in &records {
                print_record(record);
            }
        }
        Commands::Correct {
            log,
            spectrum,
            out,
            session,
            settings,
            report_out,
        } => {
            let config = settings.resolve()?;
            let (source, records) = load_records(&log, session).await?;

            let spectrum = corrector::read_spectrum_csv(&spectrum)
                .with_context(|| format!("failed to read spectrum {}", spectrum.display()))?;
            let spectrum_corrector = SpectrumCorrector::new(config.correction_factor)?;
            let (corrected, summary) = spectrum_corrector.correct_records(&records, &spectrum);
            corrector::write_corrected_csv(&out, &corrected)?;
            println!(
                "Corrected {} of {} bins. Output: {}.",
                summary.contaminated,
                summary.bins,
                out.display()
            );
            if let Some(path) = report_out {
                let text = report::build_report(&source, &records, Some(&summary));
                std::fs::write(&path, text)?;
                println!("Report written to {}.", path.display());
            }
        }
        Commands::Report { log, session, out } => {
            let (source, records) = load_records(&log, session).await?;
            let text = report::build_report(&source, &records, None);
            std::fs::write(&out, text)?;
            println!("Report written to {}.", out.display());
        }
        Commands::Import { csv, label } => {
            let records = CsvDriftLog::open(&csv).load()?;
            let pool = connect().await?;
            let store = PgDriftLog::create(pool, label.as_deref()).await?;
            store.append(&records).await?;
            println!(
                "Imported {} records from {} into session {}.",
                records.len(),
                csv.display(),
                store.session_id()
            );
        }
        Commands::Export { session, out } => {
            let pool = connect().await?;
            let records = PgDriftLog::open(pool, session).load().await?;
            let mut store = CsvDriftLog::create(&out)?;
            store.append(&records)?;
            println!("Exported {} records to {}.", records.len(), out.display());
        }
    }

    Ok(())
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

async fn connect() -> anyhow::Result<PgPool> {
    let database_url = std::env::var("DATABASE_URL")
        .context("DATABASE_URL must be set for database-backed drift logs")?;
    PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .context("failed to connect to Postgres")
}

/// Drift records from a Postgres session when given, else the CSV log.
async fn load_records(
    log: &Path,
    session: Option<Uuid>,
) -> anyhow::Result<(String, Vec<models::DriftRecord>)> {
    match session {
        Some(id) => {
            let pool = connect().await?;
            let records = PgDriftLog::open(pool, id).load().await?;
            Ok((format!("session {id}"), records))
        }
        None => {
            let records = CsvDriftLog::open(log)
                .load()
                .with_context(|| format!("no drift log at {}", log.display()))?;
            Ok((log.display().to_string(), records))
        }
    }
}

fn load_series(path: &Path, time_diff: bool) -> anyhow::Result<Series> {
    let series = Series::from_csv_path(path)
        .with_context(|| format!("failed to read series {}", path.display()))?;
    if series.is_empty() {
        anyhow::bail!("series {} has no samples", path.display());
    }
    tracing::info!(
        samples = series.len(),
        features = ?series.feature_names().collect::<Vec<_>>(),
        "series loaded"
    );
    Ok(if time_diff {
        series.with_time_diff()
    } else {
        series
    })
}

fn print_record(record: &models::DriftRecord) {
    println!(
        "- {} [{} .. {}] score {:.4} (threshold {:.3}){}",
        record.feature,
        record.window_start,
        record.window_end,
        record.score,
        record.threshold,
        if record.is_drifted { " DRIFT" } else { "" }
    );
}
