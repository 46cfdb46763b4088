//! Configuration commands.
//!
//! Settings come from the `--config` file (if any) with `BATCHFLOW__*`
//! environment overrides on top.

use anyhow::Result;
use batchflow_core::config::Settings;
use clap::Subcommand;

use crate::output::{self, OutputFormat};

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Show the effective configuration
    Show,

    /// Check the configuration without running anything
    Validate,
}

pub async fn execute(cmd: ConfigCommands, settings: &Settings, format: OutputFormat) -> Result<()> {
    match cmd {
        ConfigCommands::Show => match format {
            OutputFormat::Table => {
                let runner = &settings.runner;
                output::print_header("Runner");
                output::print_detail("name", &runner.name);
                output::print_detail("max_concurrency", &runner.max_concurrency.to_string());
                output::print_detail("retry_limit", &runner.retry_limit.to_string());
                output::print_detail(
                    "per_job_timeout",
                    &runner
                        .per_job_timeout
                        .map(|t| humantime_serde::re::humantime::format_duration(t).to_string())
                        .unwrap_or_else(|| "none".to_string()),
                );
                output::print_detail("backoff", &serde_json::to_string(&runner.backoff)?);
                output::print_detail("ordering", &serde_json::to_string(&runner.ordering)?);
                output::print_detail(
                    "throughput_window",
                    &humantime_serde::re::humantime::format_duration(runner.throughput_window)
                        .to_string(),
                );
                output::print_detail("event_buffer_size", &runner.event_buffer_size.to_string());

                output::print_header("Logging");
                output::print_detail("level", &settings.logging.level);
                output::print_detail("format", &format!("{:?}", settings.logging.format).to_lowercase());
            }
            _ => output::print_item(settings, format)?,
        },

        ConfigCommands::Validate => {
            settings.validate()?;
            match format {
                OutputFormat::Table => output::print_success("Configuration is valid"),
                _ => output::print_item(&serde_json::json!({ "valid": true }), format)?,
            }
        }
    }

    Ok(())
}
