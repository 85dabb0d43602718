//! CLI command definitions for drivebench.
//!
//! Two commands: `run` executes the evaluation queue until every job is
//! satisfied or exhausted; `inspect` reports the current verdict of each
//! job without running anything.

use std::path::PathBuf;

use clap::Parser;
use tracing::{info, warn};

use crate::config::EvalConfig;
use crate::inspector::ResultInspector;
use crate::scheduler::{build_job_queue, RunDriver};

/// Driving-benchmark evaluation orchestrator.
#[derive(Parser)]
#[command(name = "drivebench")]
#[command(about = "Schedule, supervise and retry driving-benchmark route evaluations")]
#[command(version)]
#[command(
    long_about = "drivebench drives one external evaluator process per (route, seed) pair of a \
driving-simulation benchmark, retrying crashed or incomplete runs under a bounded budget.\n\n\
Example usage:\n  drivebench run --config eval.yaml\n  drivebench inspect --config eval.yaml"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Run the evaluation queue to completion.
    Run(RunArgs),

    /// Report each job's completion verdict without running anything.
    Inspect(InspectArgs),
}

/// Arguments for `drivebench run`.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Evaluation config file (YAML). Defaults apply for missing fields.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Override the per-job retry budget.
    #[arg(long)]
    pub tries: Option<u32>,

    /// Override the port pool size (max concurrent jobs).
    #[arg(long)]
    pub pool: Option<usize>,

    /// Override the output root directory.
    #[arg(short = 'o', long)]
    pub out: Option<PathBuf>,

    /// Override the seeds to evaluate (comma-separated).
    #[arg(long, value_delimiter = ',')]
    pub seeds: Option<Vec<u32>>,
}

/// Arguments for `drivebench inspect`.
#[derive(Parser, Debug)]
pub struct InspectArgs {
    /// Evaluation config file (YAML).
    #[arg(short, long)]
    pub config: Option<PathBuf>,
}

/// Parses CLI arguments.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Entry point used by `main` after logging is initialized.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Run(args) => cmd_run(args).await,
        Commands::Inspect(args) => cmd_inspect(args).await,
    }
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<EvalConfig> {
    match path {
        Some(path) => Ok(EvalConfig::load(path)?),
        None => Ok(EvalConfig::default()),
    }
}

async fn cmd_run(args: RunArgs) -> anyhow::Result<()> {
    let mut config = load_config(args.config.as_ref())?;
    if let Some(tries) = args.tries {
        config = config.with_tries(tries);
    }
    if let Some(pool) = args.pool {
        config = config.with_port_pool_size(pool);
    }
    if let Some(out) = args.out {
        config = config.with_out_root(out);
    }
    if let Some(seeds) = args.seeds {
        config = config.with_seeds(seeds);
    }
    config.validate()?;

    let queue = build_job_queue(&config)?;
    let driver = RunDriver::new(config, queue)?;

    // Operator interrupt propagates to every in-flight child.
    let shutdown = driver.shutdown_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, aborting run");
            let _ = shutdown.send(());
        }
    });

    let summary = driver.run().await?;

    info!(
        satisfied = summary.satisfied,
        total = summary.total,
        attempts = summary.attempts,
        success_rate = format!("{:.1}%", summary.success_rate()),
        "All jobs settled"
    );
    for key in &summary.exhausted {
        warn!(job = %key, "Abandoned after exhausting the retry budget");
    }

    Ok(())
}

async fn cmd_inspect(args: InspectArgs) -> anyhow::Result<()> {
    let config = load_config(args.config.as_ref())?;
    config.validate()?;

    let queue = build_job_queue(&config)?;
    let inspector = ResultInspector::new(config.failure_statuses.clone());

    let mut satisfied = 0usize;
    for job in queue.jobs() {
        let verdict = inspector.inspect(&job.spec.result_file);
        if verdict == crate::inspector::Verdict::Satisfied {
            satisfied += 1;
        }
        println!("{:<12} {}", job.spec.key().to_string(), verdict);
    }
    println!("{satisfied}/{} satisfied", queue.len());

    Ok(())
}
