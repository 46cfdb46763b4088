//! Runner metrics through the `metrics` facade.
//!
//! Nothing here installs a recorder; the embedding application chooses one.
//! Without a recorder every call is a no-op.
//!
//! # Example
//!
//! ```rust,no_run
//! use batchflow_core::telemetry::metrics::{register_metric_descriptions, RunnerMetrics};
//!
//! register_metric_descriptions();
//! let metrics = RunnerMetrics::new("nightly-ingest");
//! metrics.jobs_submitted(12);
//! ```

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use std::sync::{Arc, Once};
use std::time::Duration;

use crate::jobs::JobErrorKind;

static DESCRIBE: Once = Once::new();

/// Register all metric descriptions. Safe to call more than once.
pub fn register_metric_descriptions() {
    DESCRIBE.call_once(|| {
        // Job metrics
        describe_counter!("batchflow_jobs_submitted_total", "Total number of jobs submitted");
        describe_counter!("batchflow_job_attempts_total", "Total number of attempts started");
        describe_counter!(
            "batchflow_jobs_succeeded_total",
            "Total number of jobs that succeeded"
        );
        describe_counter!(
            "batchflow_jobs_failed_total",
            "Total number of jobs that failed permanently"
        );
        describe_counter!("batchflow_jobs_retried_total", "Total number of retries scheduled");
        describe_counter!("batchflow_jobs_cancelled_total", "Total number of jobs cancelled");
        describe_histogram!(
            "batchflow_job_attempt_duration_seconds",
            "Attempt execution duration in seconds"
        );

        // Runner metrics
        describe_gauge!("batchflow_jobs_running", "Number of currently running jobs");

        // Error metrics
        describe_counter!("batchflow_errors_total", "Total number of errors by code");
    });
}

/// Metric recorder for one runner, labelled with its name.
#[derive(Debug, Clone)]
pub struct RunnerMetrics {
    runner: Arc<str>,
}

impl RunnerMetrics {
    pub fn new(runner: &str) -> Self {
        register_metric_descriptions();
        Self {
            runner: Arc::from(runner),
        }
    }

    fn label(&self) -> String {
        self.runner.to_string()
    }

    pub fn jobs_submitted(&self, count: usize) {
        counter!("batchflow_jobs_submitted_total", "runner" => self.label()).increment(count as u64);
    }

    pub fn job_started(&self) {
        counter!("batchflow_job_attempts_total", "runner" => self.label()).increment(1);
    }

    pub fn job_succeeded(&self) {
        counter!("batchflow_jobs_succeeded_total", "runner" => self.label()).increment(1);
    }

    pub fn job_failed(&self, kind: JobErrorKind) {
        counter!(
            "batchflow_jobs_failed_total",
            "runner" => self.label(),
            "kind" => kind.to_string(),
        )
        .increment(1);
    }

    pub fn job_retried(&self) {
        counter!("batchflow_jobs_retried_total", "runner" => self.label()).increment(1);
    }

    pub fn job_cancelled(&self) {
        counter!("batchflow_jobs_cancelled_total", "runner" => self.label()).increment(1);
    }

    /// Set the running-jobs gauge.
    pub fn running(&self, count: usize) {
        gauge!("batchflow_jobs_running", "runner" => self.label()).set(count as f64);
    }

    pub fn attempt_duration(&self, elapsed: Duration) {
        histogram!("batchflow_job_attempt_duration_seconds", "runner" => self.label())
            .record(elapsed.as_secs_f64());
    }
}
