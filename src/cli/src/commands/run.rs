//! `batchflow run`: process a document manifest.

use anyhow::{bail, Context, Result};
use batchflow_core::config::Settings;
use batchflow_core::jobs::{
    JobRunner, JobSnapshot, JobState, ProgressSnapshot, RunHandle, RunReport,
};
use clap::Args;
use indicatif::ProgressBar;
use serde::Serialize;
use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;
use tabled::Tabled;

use crate::manifest::{Document, Manifest, Ordering};
use crate::output::{self, OutputFormat};
use crate::simulate::process_document;

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Manifest file (JSON, YAML or TOML)
    pub manifest: PathBuf,

    /// Maximum number of documents processed at once
    #[arg(short = 'c', long)]
    pub concurrency: Option<usize>,

    /// Retries allowed after the first attempt
    #[arg(short = 'r', long)]
    pub retry_limit: Option<u32>,

    /// Per-attempt timeout, e.g. "2s" or "500ms"
    #[arg(short = 't', long, value_parser = parse_duration)]
    pub timeout: Option<Duration>,

    /// Admission order
    #[arg(long, value_enum)]
    pub ordering: Option<Ordering>,

    /// Pause once this many documents have finished
    #[arg(long)]
    pub pause_after: Option<usize>,

    /// How long to stay paused
    #[arg(long, value_parser = parse_duration, default_value = "1s")]
    pub pause_for: Duration,
}

fn parse_duration(value: &str) -> Result<Duration, String> {
    humantime_serde::re::humantime::parse_duration(value).map_err(|e| e.to_string())
}

/// Table row for a finished document.
#[derive(Debug, Tabled, Serialize)]
struct DocumentRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Kind")]
    kind: String,
    #[tabled(rename = "State")]
    state: String,
    #[tabled(rename = "Attempts")]
    attempts: u32,
    #[tabled(rename = "Duration")]
    duration: String,
    #[tabled(rename = "Error")]
    error: String,
}

impl DocumentRow {
    fn new(job: &JobSnapshot, document: Option<&Document>) -> Self {
        Self {
            id: job.id.to_string(),
            name: document.map(|d| d.display_name().to_string()).unwrap_or_default(),
            kind: document.map(Document::kind).unwrap_or_default(),
            state: job.state.to_string(),
            attempts: job.attempt,
            duration: output::format_millis(job.duration().map(|d| d.num_milliseconds())),
            error: job
                .last_error
                .as_ref()
                .map(|e| e.message.clone())
                .unwrap_or_default(),
        }
    }
}

#[derive(Debug, Serialize)]
struct RunOutput {
    manifest: Option<String>,
    summary: ProgressSnapshot,
    documents: Vec<DocumentRow>,
}

pub async fn execute(args: RunArgs, settings: &Settings, format: OutputFormat) -> Result<()> {
    let manifest = Manifest::from_path(&args.manifest)
        .with_context(|| format!("Failed to load manifest {}", args.manifest.display()))?;

    let mut runner_settings = settings.runner.clone();
    if let Some(concurrency) = args.concurrency {
        runner_settings.max_concurrency = concurrency;
    }
    if let Some(retry_limit) = args.retry_limit {
        runner_settings.retry_limit = retry_limit;
    }
    if args.timeout.is_some() {
        runner_settings.per_job_timeout = args.timeout;
    }
    // Size keys unless grouping by kind; under FIFO they are ignored.
    let keys = args.ordering.unwrap_or(Ordering::SmallestFirst);
    if let Some(ordering) = args.ordering {
        runner_settings.ordering = ordering.policy();
    }
    if let Some(name) = &manifest.name {
        runner_settings.name = name.clone();
    }
    let config = runner_settings.to_runner_config()?;

    let mut runner = JobRunner::new(config)?;
    runner.submit(manifest.documents.iter().map(|d| d.descriptor(keys)))?;
    let handle = runner.start(process_document)?;

    tracing::info!(
        runner = handle.name(),
        documents = manifest.documents.len(),
        "Run started"
    );

    let pb = output::create_progress_bar(
        manifest.documents.len() as u64,
        matches!(format, OutputFormat::Table),
    )?;
    watch_progress(&handle, &pb, &args, tokio::signal::ctrl_c()).await?;
    pb.finish_and_clear();

    let report = runner.shutdown().await?;
    render_report(&manifest, &report, format)?;

    if report.progress.failed > 0 {
        bail!("{} document(s) failed", report.progress.failed);
    }
    Ok(())
}

/// Drive the progress bar until the run is idle, pausing once if asked.
/// `interrupt` resolving (Ctrl-C in the binary) cancels everything still
/// outstanding, including while paused.
async fn watch_progress<F>(
    handle: &RunHandle,
    pb: &ProgressBar,
    args: &RunArgs,
    interrupt: F,
) -> Result<()>
where
    F: Future<Output = std::io::Result<()>>,
{
    let mut progress = handle.subscribe_progress();
    let mut paused_once = false;
    let mut interrupted = false;
    tokio::pin!(interrupt);

    loop {
        let snapshot = progress.borrow_and_update().clone();
        pb.set_position(snapshot.completed() as u64);
        pb.set_message(output::progress_message(&snapshot));

        if snapshot.finished || (snapshot.is_idle() && snapshot.completed() == snapshot.total) {
            return Ok(());
        }

        if let Some(threshold) = args.pause_after {
            if !paused_once && !interrupted && snapshot.completed() >= threshold {
                paused_once = true;
                handle.pause()?;
                pb.println(format!(
                    "Paused after {} documents, resuming in {}",
                    snapshot.completed(),
                    humantime_serde::re::humantime::format_duration(args.pause_for)
                ));
                tokio::select! {
                    _ = tokio::time::sleep(args.pause_for) => {}
                    signal = &mut interrupt => {
                        signal.context("Failed to listen for Ctrl-C")?;
                        interrupted = true;
                        pb.println("Interrupted, cancelling outstanding documents");
                        handle.cancel_all()?;
                    }
                }
                handle.resume()?;
                continue;
            }
        }

        tokio::select! {
            changed = progress.changed() => {
                if changed.is_err() {
                    return Ok(());
                }
            }
            signal = &mut interrupt, if !interrupted => {
                signal.context("Failed to listen for Ctrl-C")?;
                interrupted = true;
                pb.println("Interrupted, cancelling outstanding documents");
                handle.cancel_all()?;
            }
        }
    }
}

fn render_report(manifest: &Manifest, report: &RunReport, format: OutputFormat) -> Result<()> {
    let rows: Vec<DocumentRow> = report
        .jobs
        .iter()
        .map(|job| DocumentRow::new(job, manifest.document(job.id.as_str())))
        .collect();

    match format {
        OutputFormat::Table => {
            output::print_header(manifest.name.as_deref().unwrap_or("Batch results"));
            output::print_list(&rows, format)?;
            println!();
            println!("{}", output::summary_line(&report.progress));
            for job in report.in_state(JobState::Failed) {
                output::print_warning(&format!(
                    "{}: {}",
                    job.id,
                    job.last_error.as_ref().map(|e| e.to_string()).unwrap_or_default()
                ));
            }
        }
        OutputFormat::Json | OutputFormat::Yaml => {
            let out = RunOutput {
                manifest: manifest.name.clone(),
                summary: report.progress.clone(),
                documents: rows,
            };
            output::print_item(&out, format)?;
        }
    }
    Ok(())
}
