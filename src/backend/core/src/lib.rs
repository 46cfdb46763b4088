#![allow(clippy::result_large_err)]
//! # Batchflow Core
//!
//! Bounded-concurrency batch job runner.
//!
//! ## Architecture
//!
//! - **Jobs**: Job model, stable priority queue, retry backoff and the coordinating runner loop
//! - **Progress**: Watch-based progress snapshots and a broadcast event stream
//! - **Config**: Layered file/environment settings for the runner and logging
//! - **Telemetry**: Structured logging and `metrics` facade instrumentation
//! - **Error**: Machine-readable error codes for API misuse and invalid configuration

pub mod config;
pub mod error;
pub mod jobs;
pub mod telemetry;

pub use error::{BatchflowError, ErrorCode, ErrorDetails, ErrorSeverity, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::{RunnerSettings, Settings};
    pub use crate::error::{BatchflowError, ErrorCode, Result};
    pub use crate::jobs::{
        BackoffPolicy, Executor, JobContext, JobDescriptor, JobError, JobErrorKind, JobId,
        JobResult, JobRunner, JobSnapshot, JobState, OrderingPolicy, PriorityKey,
        ProgressSnapshot, RunHandle, RunReport, RunnerConfig, RunnerEvent,
    };
}
