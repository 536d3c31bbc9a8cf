// src/lib.rs

pub mod blueprint;
pub mod cli;
pub mod clock;
pub mod config;
pub mod engine;
pub mod errors;
pub mod expr;
pub mod logging;
pub mod model;
pub mod pipeline;
pub mod replay;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, anyhow};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info, warn};

use crate::blueprint::parse_duration;
use crate::cli::CliArgs;
use crate::clock::LogicalClock;
use crate::config::{PipelineFile, load_and_validate};
use crate::engine::{LogAlertHandler, RunningTask, TaskRegistry};
use crate::model::{Batch, Timestamp};
use crate::pipeline::compile;
use crate::replay::{Replay, ReplayMode};

/// High-level entry point used by `main.rs`.
///
/// Loads and compiles the pipeline, starts it as a task, feeds it from a
/// replay file or from stdin, then prints the requested outputs as JSON.
pub async fn run(args: CliArgs) -> Result<()> {
    let pipeline_path = PathBuf::from(&args.pipeline);
    let file = load_and_validate(&pipeline_path)?;

    if args.dry_run {
        print_dry_run(&file)?;
        return Ok(());
    }

    let clock = LogicalClock::epoch();
    let registry = TaskRegistry::new(
        clock.clone(),
        file.config.clone(),
        Arc::new(LogAlertHandler),
    );
    let task = registry.start_task(file.blueprint.clone())?;

    match args.replay.as_deref() {
        Some(path) => {
            run_replay(&clock, &task, Path::new(path), args.until.as_deref()).await?;
        }
        None => run_live(&clock, &registry, &task).await?,
    }

    let task = registry.stop_task(task.name()).await?;
    for (stage, stats) in task.stats() {
        debug!(%stage, ?stats, "stage counters");
    }

    print_outputs(&task, &file, args.output.as_deref())?;

    match task.err() {
        Some(err) => Err(anyhow!("task '{}' failed: {err}", task.name())),
        None => Ok(()),
    }
}

async fn run_replay(
    clock: &LogicalClock,
    task: &RunningTask,
    path: &Path,
    until: Option<&str>,
) -> Result<()> {
    let batches = replay::read_file(path).await?;
    info!(path = %path.display(), batches = batches.len(), "replaying");

    let rx = match until {
        Some(text) => {
            let end = Timestamp::EPOCH + parse_duration(text)?;
            clock.set(end);
            let kept: Vec<Batch> = batches
                .into_iter()
                .filter(|b| b.last_time().is_none_or(|t| t <= end))
                .collect();
            Replay::new(clock.clone(), ReplayMode::Paced).replay_batches(kept, task)
        }
        None => Replay::new(clock.clone(), ReplayMode::Driven).replay_batches(batches, task),
    };

    rx.await
        .map_err(|_| anyhow!("replay driver exited without reporting"))??;
    Ok(())
}

/// Route JSON-lines batches from stdin until EOF or Ctrl-C, with the clock
/// following wall-clock time.
async fn run_live(clock: &LogicalClock, registry: &TaskRegistry, task: &RunningTask) -> Result<()> {
    let ticker = replay::spawn_live(clock.clone(), task.source(), Duration::from_secs(1));
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => match line? {
                Some(line) if line.trim().is_empty() => {}
                Some(line) => match replay::parse_line(&line) {
                    Ok(batch) => registry.route_input(task.name(), batch).await?,
                    Err(err) => warn!(error = %err, "skipping malformed input line"),
                },
                None => {
                    info!("stdin closed; draining task");
                    break;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Ctrl-C received; draining task");
                break;
            }
        }
    }

    task.source().close().await;
    ticker.abort();
    Ok(())
}

fn print_outputs(task: &RunningTask, file: &PipelineFile, only: Option<&str>) -> Result<()> {
    match only {
        Some(name) => println!("{}", task.output(name)?.to_json()?),
        None => {
            for name in file.blueprint.output_names() {
                match task.output(&name) {
                    Ok(doc) => println!("{}", doc.to_json()?),
                    Err(err) => warn!(output = %name, error = %err, "output has no result"),
                }
            }
        }
    }
    Ok(())
}

/// Print nodes, edges and the compiled stage order.
fn print_dry_run(file: &PipelineFile) -> Result<()> {
    let blueprint = &file.blueprint;
    println!("batchflow dry-run");
    println!("  config.queue_capacity = {}", file.config.queue_capacity);
    println!("  config.join_horizon = {}", file.config.join_horizon);
    if let Some(h) = file.config.window_horizon {
        println!("  config.window_horizon = {h}");
    }
    println!("  config.alert_history = {}", file.config.alert_history);
    println!();

    println!("nodes ({}):", blueprint.nodes().len());
    for node in blueprint.nodes() {
        println!("  - {} [{}]", node.id, node.kind);
    }
    println!("edges:");
    for (from, to) in blueprint.edges() {
        println!("  {from} -> {to}");
    }
    println!();

    let plan = compile(blueprint, &file.config)?;
    print!("{}", plan.describe());

    debug!("dry-run complete (nothing started)");
    Ok(())
}
