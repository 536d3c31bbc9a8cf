// src/cli.rs

//! CLI argument parsing using `clap`.

use clap::{Parser, ValueEnum};

/// Command-line arguments for `batchflow`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "batchflow",
    version,
    about = "Run a windowed batch pipeline over replayed or live time-series data.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the pipeline file (TOML).
    #[arg(long, value_name = "PATH", default_value = "pipeline.toml")]
    pub pipeline: String,

    /// Replay batches from a JSON-lines file instead of reading stdin.
    #[arg(long, value_name = "PATH")]
    pub replay: Option<String>,

    /// Stop the replay at this logical time after the epoch (e.g. `30s`).
    ///
    /// Batches ending later are not delivered. Without it the replay runs
    /// through the whole file.
    #[arg(long, value_name = "DURATION", requires = "replay")]
    pub until: Option<String>,

    /// Print only this output. Default: every output the pipeline declares.
    #[arg(long, value_name = "NAME")]
    pub output: Option<String>,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `BATCHFLOW_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Parse + compile, print the stage graph, but don't run anything.
    #[arg(long)]
    pub dry_run: bool,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
