//! Batch job execution.
//!
//! This module provides the runner and everything it is built from:
//!
//! - **Job Definitions**: Ids, descriptors, lifecycle states and per-attempt errors
//! - **Policies**: Retry backoff and pending-queue ordering
//! - **Queue**: Stable priority queue of jobs awaiting admission
//! - **Runner**: Bounded-concurrency execution with retry, pause/resume and cancellation
//! - **Observation**: Progress snapshots and lifecycle events
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────────┐
//! │                              JobRunner                                    │
//! ├──────────────────────────────────────────────────────────────────────────┤
//! │  submit() ──▶ ┌──────────────┐  admit   ┌──────────────┐                  │
//! │               │ PendingQueue │ ───────▶ │   Running    │──▶ Executor      │
//! │               │ (key, seq)   │          │ (≤ max conc.)│    (tokio task)  │
//! │               └──────▲───────┘          └──────┬───────┘                  │
//! │                      │ backoff elapsed         │ completion               │
//! │               ┌──────┴───────┐   retryable     │                          │
//! │               │ Retry timers │ ◀───────────────┤                          │
//! │               └──────────────┘                 ▼                          │
//! │                                 Succeeded / Failed / Cancelled            │
//! │                                                                           │
//! │  RunHandle: pause · resume · cancel · cancel_all · progress · events      │
//! └──────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use batchflow_core::jobs::{
//!     JobContext, JobDescriptor, JobError, JobRunner, OrderingPolicy, RunnerConfig,
//! };
//!
//! let config = RunnerConfig::default()
//!     .with_max_concurrency(2)
//!     .with_retry_limit(2)
//!     .with_ordering(OrderingPolicy::Ascending);
//!
//! let mut runner = JobRunner::new(config)?;
//! runner.submit(files.into_iter().map(|f| JobDescriptor::new(f.path).with_priority(f.size)))?;
//!
//! let handle = runner.start(|ctx: JobContext, path: Arc<String>| async move {
//!     extract_text(&path).await.map_err(|e| JobError::retryable(e.to_string()))
//! })?;
//!
//! handle.wait_idle().await;
//! let report = runner.shutdown().await?;
//! ```

pub mod events;
pub mod executor;
pub mod job;
pub mod policy;
pub mod progress;
pub mod queue;
pub mod runner;

pub use events::RunnerEvent;
pub use executor::Executor;
pub(crate) use job::Job;
pub use job::{
    JobContext, JobDescriptor, JobError, JobErrorKind, JobId, JobResult, JobSnapshot, JobState,
    PriorityKey,
};
pub use policy::{BackoffFn, BackoffPolicy, KeyComparator, OrderingPolicy};
pub use progress::ProgressSnapshot;
pub use queue::PendingQueue;
pub use runner::{JobRunner, RunHandle, RunReport, RunnerConfig, MAX_RETRY_LIMIT};
