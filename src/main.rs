//! netsleuth: flow-volume anomaly triage with passive-DNS enrichment.
//!
//! Reads a CSV flow export, scores every record against its group's mean and
//! standard deviation, and reports the strongest outliers whose destinations
//! resolve to a hostname.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │   Ingest    │────>│  Analyzer   │────>│  Resolver   │────>│   Export    │
//! │   (csv)     │     │  (z-score)  │     │(passive DNS)│     │             │
//! └─────────────┘     └─────────────┘     └─────────────┘     └─────────────┘
//!      Sync               Sync               Async               Sync
//! ```
//!
//! - **analyze**: full pipeline, requires identity-provider credentials
//! - **score**: statistics and ranking only, no network access

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::{debug, info, Level};
use tracing_subscriber::FmtSubscriber;

use netsleuth::auth::{ClientCredentials, ClientCredentialsProvider};
use netsleuth::config::Config;
use netsleuth::export::{export_report, OutputFormat};
use netsleuth::ingest::read_flow_records;
use netsleuth::passive_dns::{GraphPassiveDns, PassiveDnsSource};
use netsleuth::pipeline::{Pipeline, RunReport};
use netsleuth::resolver::SuppressionMatch;

/// netsleuth: flow anomaly triage with passive-DNS enrichment.
#[derive(Parser, Debug)]
#[command(name = "netsleuth")]
#[command(author = "Security Team")]
#[command(version = "0.1.0")]
#[command(about = "Rank flow-volume outliers and resolve their destinations via passive DNS")]
#[command(long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Score flows, resolve outlier destinations, and report the top findings.
    Analyze {
        #[command(flatten)]
        run: RunArgs,

        /// Hostname marker for known infrastructure (empty disables suppression).
        #[arg(long)]
        suppress: Option<String>,

        /// How the suppression marker is matched: substring, suffix.
        #[arg(long)]
        suppress_match: Option<SuppressionMatch>,

        /// Maximum passive-DNS lookups in flight.
        #[arg(long)]
        max_concurrent: Option<usize>,
    },

    /// Score and rank flows without DNS enrichment (offline mode).
    Score {
        #[command(flatten)]
        run: RunArgs,
    },

    /// Print a default configuration file.
    InitConfig,
}

/// Arguments shared by the scoring subcommands.
#[derive(Args, Debug)]
struct RunArgs {
    /// Path to the CSV flow export.
    #[arg(short, long)]
    input: PathBuf,

    /// Path to a TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Z-score threshold; records need |z| strictly above it.
    #[arg(short, long)]
    threshold: Option<f64>,

    /// Number of findings to report.
    #[arg(short = 'k', long)]
    top_k: Option<usize>,

    /// Output format: text, json, jsonl, csv.
    #[arg(short, long)]
    output: Option<OutputFormat>,

    /// Write the report to a file instead of stdout.
    #[arg(short = 'w', long)]
    output_file: Option<PathBuf>,

    /// Enable verbose logging (writes to stderr).
    #[arg(short, long)]
    verbose: bool,
}

impl RunArgs {
    /// Loads the config file and environment, then applies CLI overrides.
    fn resolve_config(&self) -> Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::load(path)?,
            None => Config::default(),
        };
        config.apply_env();

        if let Some(threshold) = self.threshold {
            config.detection.zscore_threshold = threshold;
        }
        if let Some(top_k) = self.top_k {
            config.detection.top_k = top_k;
        }
        if let Some(format) = self.output {
            config.output.format = format;
        }
        if let Some(file) = &self.output_file {
            config.output.file = Some(file.display().to_string());
        }

        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Analyze {
            run,
            suppress,
            suppress_match,
            max_concurrent,
        } => {
            init_logging(run.verbose)?;

            let mut config = run.resolve_config()?;
            if let Some(pattern) = suppress {
                config.enrichment.suppression_substring = pattern;
            }
            if let Some(mode) = suppress_match {
                config.enrichment.suppression_match = mode;
            }
            if let Some(max) = max_concurrent {
                config.enrichment.max_concurrent_lookups = max;
            }
            config.validate()?;
            config.validate_enrichment()?;

            run_analysis(&run.input, &config).await
        }

        Commands::Score { run } => {
            init_logging(run.verbose)?;

            let config = run.resolve_config()?;
            config.validate()?;

            run_scoring(&run.input, &config)
        }

        Commands::InitConfig => {
            println!("{}", Config::generate_default());
            Ok(())
        }
    }
}

fn init_logging(verbose: bool) -> Result<()> {
    let log_level = if verbose { Level::DEBUG } else { Level::INFO };

    // Reports go to stdout, so logs stay on stderr
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")
}

async fn run_analysis(input: &Path, config: &Config) -> Result<()> {
    info!("Starting netsleuth analysis...");

    let records = read_flow_records(input, &config.input, &config.key_spec())
        .context("Failed to ingest flow records")?;

    let credentials = ClientCredentials::from_config(&config.auth)?;
    let provider = ClientCredentialsProvider::new(
        credentials,
        &config.auth,
        config.enrichment.request_timeout(),
    );
    let source: Arc<dyn PassiveDnsSource> = Arc::new(GraphPassiveDns::new(
        &config.enrichment.api_base_url,
        config.enrichment.request_timeout(),
    ));

    let report = Pipeline::from_config(config)
        .run_with_provider(records, config, &provider, source)
        .await
        .context("Analysis aborted")?;

    emit(&report, config)
}

fn run_scoring(input: &Path, config: &Config) -> Result<()> {
    info!("Starting netsleuth scoring (no enrichment)...");

    let records = read_flow_records(input, &config.input, &config.key_spec())
        .context("Failed to ingest flow records")?;
    let report = Pipeline::from_config(config).score_only(records);

    emit(&report, config)
}

fn emit(report: &RunReport, config: &Config) -> Result<()> {
    let rendered = export_report(report, config.output.format)?;

    match &config.output.file {
        Some(path) => {
            std::fs::write(path, format!("{}\n", rendered))
                .with_context(|| format!("Failed to write report to {}", path))?;
            info!("Report written to {}", path);
        }
        None => println!("{}", rendered),
    }

    debug!("Emitted {} findings", report.findings.len());
    Ok(())
}
