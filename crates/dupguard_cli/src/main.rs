//! Command-line adapter over `dupguard_core`.
//!
//! # Responsibility
//! - Translate command-line input into `CreationRequest`s and print outcomes.
//! - Make no creation decisions of its own.

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use dupguard_core::{
    default_log_level, init_logging, init_stderr_logging, BatchCreationService, BatchOutcome,
    BatchSummary, CreationConfig, CreationRequest, LockStrategy, RejectReason, SqliteStore,
};
use log::info;
use std::path::PathBuf;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Instant;

#[derive(Parser)]
#[command(name = "dupguard", version, about = "Duplicate-safe concurrent resource creation")]
struct Cli {
    #[command(flatten)]
    options: GlobalOptions,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args)]
struct GlobalOptions {
    /// SQLite database file (created and migrated if missing).
    #[arg(long, default_value = "dupguard.sqlite3")]
    db: PathBuf,

    /// JSON file with `CreationConfig` fields; flags below override it.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Locking strategy: store-lock or process-mutex.
    #[arg(long)]
    strategy: Option<String>,

    /// Maximum number of concurrently running creations per batch.
    #[arg(long)]
    concurrency: Option<usize>,

    /// Upper bound on any lock wait, in milliseconds.
    #[arg(long)]
    lock_wait_ms: Option<u64>,

    /// Absolute directory for rolling log files; logs go to stderr if omitted.
    #[arg(long)]
    log_dir: Option<String>,

    #[arg(long)]
    log_level: Option<String>,
}

#[derive(Subcommand)]
enum Command {
    /// Creates one batch with the given names.
    Run {
        /// Resource names, in request order.
        #[arg(required = true)]
        names: Vec<String>,

        /// Content stored with every created resource.
        #[arg(long, default_value = "")]
        content: String,
    },
    /// Runs the distinct / repeated / racing creation scenario.
    Scenario {
        /// Number of distinct names in the first two batches.
        #[arg(long, default_value_t = 10)]
        items: usize,

        /// Number of concurrent single creations sharing one name.
        #[arg(long, default_value_t = 5)]
        racers: usize,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_log(&cli.options)?;

    let config = load_config(&cli.options)?;
    let store = SqliteStore::open(&cli.options.db, config.lock_wait_timeout())
        .with_context(|| format!("failed to open store at {}", cli.options.db.display()))?;
    info!(
        "event=cli_start module=cli status=ok strategy={} max_concurrency={}",
        config.strategy.label(),
        config.max_concurrency
    );
    let service = BatchCreationService::from_config(Arc::new(store), &config);

    match cli.command {
        Command::Run { names, content } => {
            let requests: Vec<CreationRequest> = names
                .into_iter()
                .map(|name| CreationRequest::new(name, content.clone()))
                .collect();
            run_batch(&service, "run", &requests);
        }
        Command::Scenario { items, racers } => run_scenario(service, items, racers)?,
    }

    Ok(())
}

fn init_log(options: &GlobalOptions) -> Result<()> {
    let level = options.log_level.as_deref().unwrap_or_else(|| default_log_level());
    match options.log_dir.as_deref() {
        Some(dir) => init_logging(level, dir)?,
        None => init_stderr_logging(level)?,
    }
    Ok(())
}

fn load_config(options: &GlobalOptions) -> Result<CreationConfig> {
    let mut config = match &options.config {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read config {}", path.display()))?;
            CreationConfig::from_json_str(&raw)?
        }
        None => CreationConfig::default(),
    };

    if let Some(strategy) = options.strategy.as_deref() {
        config.strategy = LockStrategy::parse(strategy)?;
    }
    if let Some(concurrency) = options.concurrency {
        config.max_concurrency = concurrency;
    }
    if let Some(lock_wait_ms) = options.lock_wait_ms {
        config.lock_wait_timeout_ms = lock_wait_ms;
    }

    config.validate()?;
    Ok(config)
}

fn run_batch(service: &BatchCreationService, label: &str, requests: &[CreationRequest]) {
    let started_at = Instant::now();
    let (outcomes, summary) = service.create_batch_with_summary(requests);

    println!("== {label}: {} request(s)", requests.len());
    for (index, outcome) in outcomes.iter().enumerate() {
        println!("{index:>4}  {}", describe(outcome));
    }
    print_summary(&summary, started_at);
}

fn run_scenario(service: BatchCreationService, items: usize, racers: usize) -> Result<()> {
    let requests: Vec<CreationRequest> = (0..items)
        .map(|i| CreationRequest::new(format!("item-{i}"), format!("item {i} description")))
        .collect();

    run_batch(&service, "distinct names", &requests);
    run_batch(&service, "same names again", &requests);

    let service = Arc::new(service);
    let barrier = Arc::new(Barrier::new(racers.max(1)));
    let started_at = Instant::now();
    let handles: Vec<_> = (0..racers)
        .map(|_| {
            let service = Arc::clone(&service);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                let outcome = service
                    .creator()
                    .create(&CreationRequest::new("race", "racing creation"));
                match outcome {
                    Ok(outcome) => BatchOutcome::from(outcome),
                    Err(err) => BatchOutcome::Rejected {
                        name: "race".to_string(),
                        reason: RejectReason::Infrastructure(err.to_string()),
                    },
                }
            })
        })
        .collect();

    let mut outcomes = Vec::with_capacity(racers);
    for handle in handles {
        match handle.join() {
            Ok(outcome) => outcomes.push(outcome),
            Err(_) => bail!("racing creator thread panicked"),
        }
    }

    println!("== {racers} concurrent single creations of `race`");
    for (index, outcome) in outcomes.iter().enumerate() {
        println!("{index:>4}  {}", describe(outcome));
    }
    print_summary(&BatchSummary::from_outcomes(&outcomes), started_at);

    let stored = service.creator().count_resources()?;
    println!("stored resources: {stored}");
    Ok(())
}

fn describe(outcome: &BatchOutcome) -> String {
    match outcome {
        BatchOutcome::Created { id } => format!("created   {id}"),
        BatchOutcome::Rejected { name, reason } => format!("rejected  {name}: {reason}"),
    }
}

fn print_summary(summary: &BatchSummary, started_at: Instant) {
    println!(
        "created={} duplicates={} failed={} elapsed_ms={}",
        summary.created,
        summary.duplicates,
        summary.failed,
        started_at.elapsed().as_millis()
    );
}
