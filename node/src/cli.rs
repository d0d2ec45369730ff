//! # CLI Interface
//!
//! Defines the command-line argument structure for `stv-node` using
//! `clap` derive. Supports three subcommands: `run`, `init`, and
//! `version`.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// STV pool scenario runner.
///
/// Replays a JSON scenario of deposits, withdrawals, finalizations,
/// minting and forced rebalances against an in-memory pool and backing
/// vault. Every pool record is written to stdout as one JSON line; logs go
/// to stderr.
#[derive(Parser, Debug)]
#[command(
    name = "stv-node",
    about = "STV pool scenario runner",
    version,
    propagate_version = true
)]
pub struct StvNodeCli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level subcommands for the runner binary.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a scenario file.
    Run(RunArgs),
    /// Write an example scenario to get started from.
    Init(InitArgs),
    /// Print version information and exit.
    Version,
}

/// Arguments for the `run` subcommand.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Path to the scenario file (JSON).
    #[arg(long, short = 's', env = "STV_SCENARIO")]
    pub scenario: PathBuf,

    /// Log output format: `pretty` or `json`.
    #[arg(long, env = "STV_LOG_FORMAT", default_value = "pretty")]
    pub log_format: String,

    /// Default log filter when `RUST_LOG` is not set.
    #[arg(long, default_value = "stv_node=info,stv_protocol=info")]
    pub log_level: String,

    /// Abort on the first step that fails instead of logging it and moving
    /// on.
    #[arg(long)]
    pub strict: bool,
}

/// Arguments for the `init` subcommand.
#[derive(Parser, Debug)]
pub struct InitArgs {
    /// Where to write the scenario.
    #[arg(long, short = 'o', default_value = "scenario.json")]
    pub output: PathBuf,

    /// Write a scenario for the plain pool, without minting steps.
    #[arg(long)]
    pub plain: bool,

    /// Overwrite an existing file.
    #[arg(long)]
    pub force: bool,
}
