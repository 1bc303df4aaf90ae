//! strand-bench: drive every part of the engine against synthetic load.
//!
//! Runs, in order:
//! - a work-stealing apply over `--items` integers
//! - `--jobs` scheduler jobs with priorities cycling through 0..10
//! - a tombstone-terminated queue drain with `--workers` consumers
//!
//! and prints the collected stats as JSON.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use clap::Parser;
use serde_json::json;
use tracing::{info, warn};

use strand_compute::{ApplyOptions, Job, JobScheduler, Launcher};
use strand_core::telemetry::init_tracing;
use strand_core::{CancellationToken, EngineConfig, TaskError};
use strand_queue::BlockingQueue;

// ── CLI ─────────────────────────────────────────────────────────────

/// Exercise the strand launcher, scheduler and queue pipeline.
#[derive(Parser, Debug)]
#[command(name = "strand-bench", version, about)]
struct Cli {
    /// Optional TOML engine config. `STRAND_*` env vars are used otherwise.
    #[arg(long, env = "STRAND_CONFIG")]
    config: Option<String>,

    /// Items handed to the work splitter.
    #[arg(long, default_value_t = 1_000_000)]
    items: usize,

    /// Jobs submitted to the priority scheduler.
    #[arg(long, default_value_t = 32)]
    jobs: usize,

    /// Tasks per scheduler job.
    #[arg(long, default_value_t = 8)]
    tasks_per_job: usize,

    /// Consumers for the queue drain.
    #[arg(long, default_value_t = 4)]
    workers: usize,
}

fn load_config(cli: &Cli) -> EngineConfig {
    let Some(path) = &cli.config else {
        return EngineConfig::from_env();
    };
    let parsed = std::fs::read_to_string(path)
        .map_err(|e| e.to_string())
        .and_then(|source| EngineConfig::from_toml_str(&source).map_err(|e| e.to_string()));
    match parsed {
        Ok(config) => {
            info!(path = %path, "loaded engine config");
            config
        }
        Err(error) => {
            warn!(%error, path = %path, "failed to load config, using environment");
            EngineConfig::from_env()
        }
    }
}

fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = load_config(&cli);
    config.log_summary();

    let launcher = Launcher::new(config.clone())?;
    let scheduler = JobScheduler::new(config)?;
    let token = CancellationToken::new();

    // Splitter
    let items: Vec<u64> = (0..cli.items as u64).collect();
    let sum = AtomicU64::new(0);
    let started = Instant::now();
    let (applied, apply_stats) = launcher.apply_concurrently_stats(
        &items,
        &token,
        &ApplyOptions::default(),
        &|i: &u64, _: &CancellationToken| -> Result<bool, TaskError> {
            sum.fetch_add(*i, Ordering::Relaxed);
            Ok(true)
        },
    );
    let completed = applied?;
    info!(
        completed,
        sum = sum.load(Ordering::Relaxed),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "apply finished"
    );

    // Scheduler
    let started = Instant::now();
    let mut jobs = Vec::with_capacity(cli.jobs);
    for j in 0..cli.jobs {
        let mut job: Job<u64> = Job::with_token((j % 10) as i32, &token);
        for t in 0..cli.tasks_per_job {
            let seed = (j * cli.tasks_per_job + t) as u64;
            job.add_task(move |token| {
                let mut acc = seed;
                for round in 0..10_000u64 {
                    if round % 1_000 == 0 {
                        token.check_canceled()?;
                    }
                    acc = acc.wrapping_mul(6364136223846793005).wrapping_add(round);
                }
                Ok(acc)
            })?;
        }
        scheduler.schedule(&job)?;
        jobs.push(job);
    }
    let mut task_results = 0usize;
    for job in &jobs {
        job.wait()?;
        task_results += job.results()?.len();
    }
    info!(
        jobs = jobs.len(),
        task_results,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "scheduler drained"
    );

    // Queue
    let source: BlockingQueue<u64> = (0..cli.items.min(10_000) as u64).collect();
    let drained = AtomicU64::new(0);
    let mut failed = Vec::new();
    let queue_completed = launcher.process_queue(
        &source,
        &mut failed,
        cli.workers,
        &token,
        &|_: &u64, _: &CancellationToken| -> Result<bool, TaskError> {
            drained.fetch_add(1, Ordering::Relaxed);
            Ok(true)
        },
    )?;

    let report = json!({
        "apply": { "completed": completed, "stats": apply_stats },
        "scheduler": scheduler.metrics(),
        "queue": {
            "completed": queue_completed,
            "processed": drained.load(Ordering::Relaxed),
            "failed": failed.len(),
        },
    });
    println!("{}", serde_json::to_string_pretty(&report)?);

    scheduler.shutdown();
    Ok(())
}
