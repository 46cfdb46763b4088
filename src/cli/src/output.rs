//! Output formatting utilities for the Batchflow CLI.
//!
//! Supports table, JSON, and YAML output formats.

use anyhow::Result;
use batchflow_core::jobs::ProgressSnapshot;
use clap::ValueEnum;
use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use tabled::{
    settings::{object::Columns, Alignment, Modify, Style},
    Table, Tabled,
};

/// Output format selection.
#[derive(Debug, Clone, Copy, ValueEnum, Default)]
pub enum OutputFormat {
    /// Render as a formatted table
    #[default]
    Table,
    /// Render as JSON
    Json,
    /// Render as YAML
    Yaml,
}

/// Print a success message to stdout.
pub fn print_success(msg: &str) {
    println!("{} {}", "[OK]".green().bold(), msg);
}

/// Print an error message to stderr.
pub fn print_error(msg: &str) {
    eprintln!("{} {}", "[ERROR]".red().bold(), msg);
}

/// Print a warning message to stderr.
pub fn print_warning(msg: &str) {
    eprintln!("{} {}", "[WARN]".yellow().bold(), msg);
}

/// Print a list of items in the requested format.
///
/// For table output, items must implement `Tabled`. For JSON/YAML, items must
/// implement `Serialize`.
pub fn print_list<T: Tabled + Serialize>(items: &[T], format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Table => {
            if items.is_empty() {
                println!("{}", "No results found.".dimmed());
                return Ok(());
            }
            let table = Table::new(items)
                .with(Style::rounded())
                .with(Modify::new(Columns::first()).with(Alignment::left()))
                .to_string();
            println!("{}", table);
        }
        OutputFormat::Json | OutputFormat::Yaml => print_item(&items, format)?,
    }
    Ok(())
}

/// Print a single item in the requested format.
pub fn print_item<T: Serialize + ?Sized>(item: &T, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Table | OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(item)?);
        }
        OutputFormat::Yaml => {
            print!("{}", serde_yaml::to_string(item)?);
        }
    }
    Ok(())
}

/// Print key-value details to the terminal (non-JSON/YAML output).
pub fn print_detail(key: &str, value: &str) {
    println!("  {}: {}", key.cyan(), value);
}

/// Print a section header.
pub fn print_header(title: &str) {
    println!();
    println!("{}", title.bold().underline());
    println!();
}

/// One-line run summary.
pub fn summary_line(progress: &ProgressSnapshot) -> String {
    format!(
        "{} succeeded, {} failed, {} cancelled of {} (peak concurrency {})",
        progress.succeeded.to_string().green(),
        progress.failed.to_string().red(),
        progress.cancelled.to_string().yellow(),
        progress.total,
        progress.peak_running,
    )
}

/// Progress bar for a run of `total` jobs, hidden unless writing table output.
pub fn create_progress_bar(total: u64, visible: bool) -> Result<ProgressBar> {
    if !visible {
        return Ok(ProgressBar::hidden());
    }
    let pb = ProgressBar::new(total);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")?
            .progress_chars("#>-"),
    );
    Ok(pb)
}

/// Progress bar message for a snapshot.
pub fn progress_message(progress: &ProgressSnapshot) -> String {
    let mut message = format!(
        "{} running, {} retrying, {:.1} jobs/s",
        progress.running, progress.retrying, progress.throughput_per_sec
    );
    if progress.paused {
        message.push_str(" (paused)");
    }
    message
}

/// Format a duration in milliseconds for table cells.
pub fn format_millis(millis: Option<i64>) -> String {
    match millis {
        None => "-".to_string(),
        Some(ms) if ms < 1_000 => format!("{}ms", ms),
        Some(ms) => format!("{:.2}s", ms as f64 / 1_000.0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_millis() {
        assert_eq!(format_millis(None), "-");
        assert_eq!(format_millis(Some(250)), "250ms");
        assert_eq!(format_millis(Some(1_500)), "1.50s");
    }

    #[test]
    fn test_progress_message_marks_paused() {
        let mut progress = ProgressSnapshot {
            total: 4,
            running: 2,
            retrying: 1,
            ..Default::default()
        };
        assert_eq!(progress_message(&progress), "2 running, 1 retrying, 0.0 jobs/s");

        progress.paused = true;
        assert!(progress_message(&progress).ends_with("(paused)"));
    }

    #[test]
    fn test_hidden_progress_bar() {
        let pb = create_progress_bar(10, false).unwrap();
        assert!(pb.is_hidden());
    }
}
