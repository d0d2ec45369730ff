// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # STV Pool Scenario Runner
//!
//! Entry point for the `stv-node` binary. Parses CLI arguments, initializes
//! logging and replays a scenario file against an in-memory pool.
//!
//! The binary supports three subcommands:
//!
//! - `run`: execute a scenario, streaming pool records to stdout
//! - `init`: write an example scenario
//! - `version`: print build version information

mod cli;
mod logging;
mod scenario;

use std::io::{BufWriter, Write};

use anyhow::{bail, Context, Result};
use chrono::{Duration, DurationRound, Utc};
use clap::Parser;

use cli::{Commands, StvNodeCli};
use logging::LogFormat;
use scenario::{Runner, Scenario};

fn main() -> Result<()> {
    let cli = StvNodeCli::parse();

    match cli.command {
        Commands::Run(args) => run_scenario(args),
        Commands::Init(args) => init_scenario(args),
        Commands::Version => {
            print_version();
            Ok(())
        }
    }
}

/// Loads the scenario, runs it and writes every record as a JSON line.
fn run_scenario(args: cli::RunArgs) -> Result<()> {
    logging::init_logging(&args.log_level, LogFormat::from_str_lossy(&args.log_format));

    let scenario = load_scenario(&args.scenario)?;
    tracing::info!(
        path = %args.scenario.display(),
        steps = scenario.steps.len(),
        minting = scenario.config.minting.is_some(),
        strict = args.strict,
        "starting scenario"
    );

    let stdout = std::io::stdout();
    let mut out = BufWriter::new(stdout.lock());
    let mut runner = Runner::new(&scenario)?;
    let summary = runner.run(&scenario.steps, args.strict, |event| {
        serde_json::to_writer(&mut out, event).context("failed to encode record")?;
        writeln!(out).context("failed to write record")?;
        Ok(())
    })?;
    out.flush().context("failed to flush stdout")?;

    tracing::info!(
        summary = %serde_json::to_string(&summary)?,
        "final state"
    );
    Ok(())
}

fn load_scenario(path: &std::path::Path) -> Result<Scenario> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read scenario: {}", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse scenario: {}", path.display()))
}

/// Writes the example scenario, starting at the current hour.
fn init_scenario(args: cli::InitArgs) -> Result<()> {
    logging::init_logging("stv_node=info", LogFormat::Pretty);

    if args.output.exists() && !args.force {
        bail!(
            "{} already exists (use --force to overwrite)",
            args.output.display()
        );
    }

    let start = Utc::now()
        .duration_trunc(Duration::hours(1))
        .context("failed to truncate start time")?;
    let scenario = scenario::example(start, !args.plain);
    let json = serde_json::to_string_pretty(&scenario)?;
    std::fs::write(&args.output, json + "\n")
        .with_context(|| format!("failed to write scenario to {}", args.output.display()))?;

    tracing::info!(
        path = %args.output.display(),
        steps = scenario.steps.len(),
        "scenario written"
    );
    println!("Scenario written to {}", args.output.display());
    println!("Run it with: stv-node run --scenario {}", args.output.display());
    Ok(())
}

/// Prints version information to stdout.
fn print_version() {
    println!("stv-node     {}", env!("CARGO_PKG_VERSION"));
    println!("rustc        {}", rustc_version());
}

/// Returns the Rust compiler version used to build this binary.
fn rustc_version() -> &'static str {
    option_env!("RUSTC_VERSION").unwrap_or("unknown")
}
