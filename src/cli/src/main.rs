//! Batchflow CLI - run document batches through a bounded-concurrency job runner.
//!
//! Provides the `run` command and configuration inspection.

mod commands;
mod manifest;
mod output;
mod simulate;

use anyhow::Result;
use batchflow_core::config::Settings;
use batchflow_core::telemetry::init_logging;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use commands::{config, run};
use output::OutputFormat;

/// Batchflow - bounded-concurrency batch job runner
#[derive(Parser)]
#[command(
    name = "batchflow",
    version,
    about = "Batchflow - bounded-concurrency batch job runner",
    long_about = "Runs batches of documents with bounded concurrency, retries with backoff, \
                  pause/resume and cancellation, reporting progress as it goes.",
    propagate_version = true
)]
pub struct Cli {
    /// Output format
    #[arg(short, long, global = true, default_value = "table")]
    output: OutputFormat,

    /// Configuration file (TOML, YAML or JSON)
    #[arg(long, global = true, env = "BATCHFLOW_CONFIG")]
    config: Option<PathBuf>,

    /// Log level or filter directive, overriding the configuration
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Process a document manifest
    Run(run::RunArgs),

    /// Configuration inspection
    #[command(subcommand)]
    Config(config::ConfigCommands),
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    if cli.no_color {
        colored::control::set_override(false);
    }

    if let Err(e) = dispatch(cli).await {
        output::print_error(&format!("{:#}", e));
        std::process::exit(1);
    }

    Ok(())
}

async fn dispatch(cli: Cli) -> Result<()> {
    let mut settings = Settings::load_from(cli.config.as_deref())?;
    if let Some(level) = cli.log_level {
        settings.logging.level = level;
    }
    init_logging(&settings.logging)?;

    match cli.command {
        Commands::Run(args) => run::execute(args, &settings, cli.output).await,
        Commands::Config(cmd) => config::execute(cmd, &settings, cli.output).await,
    }
}
