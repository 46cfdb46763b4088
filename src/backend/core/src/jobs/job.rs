//! Job definitions.
//!
//! This module provides the core data model of the runner:
//!
//! - **JobId / JobDescriptor**: What a caller submits
//! - **JobState**: The lifecycle state machine
//! - **JobError**: Per-job failure reasons (executor error, timeout, cancellation, panic)
//! - **JobContext**: Passed to the executor for each attempt
//! - **JobSnapshot**: Read-only view of a job handed back to callers

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

// ═══════════════════════════════════════════════════════════════════════════════
// Job Identification
// ═══════════════════════════════════════════════════════════════════════════════

/// Opaque unique identifier for a job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    /// Generate a new random job ID.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for JobId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for JobId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<Uuid> for JobId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid.to_string())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Job State
// ═══════════════════════════════════════════════════════════════════════════════

/// Lifecycle state of a job.
///
/// ```text
/// Pending ──▶ Running ──▶ Succeeded
///    │           │
///    │           ├──▶ Pending (retry after backoff)
///    │           ├──▶ Failed
///    ▼           ▼
/// Cancelled ◀────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Waiting for admission (possibly until a retry delay elapses)
    Pending,
    /// An attempt is executing
    Running,
    /// Completed successfully
    Succeeded,
    /// Failed after exhausting retries, or with a non-retryable error
    Failed,
    /// Cancelled before or during execution
    Cancelled,
}

impl JobState {
    /// Check if the job is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }

    /// Check whether moving to `next` is a legal transition.
    pub fn can_transition_to(&self, next: JobState) -> bool {
        use JobState::*;
        matches!(
            (self, next),
            (Pending, Running)
                | (Pending, Cancelled)
                | (Running, Succeeded)
                | (Running, Failed)
                | (Running, Pending)
                | (Running, Cancelled)
        )
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Priority Key
// ═══════════════════════════════════════════════════════════════════════════════

/// Comparable value used to order pending jobs.
///
/// Keys of different kinds compare `Unset < Int < Text`.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PriorityKey {
    #[default]
    Unset,
    Int(i64),
    Text(String),
}

impl From<i64> for PriorityKey {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for PriorityKey {
    fn from(value: i32) -> Self {
        Self::Int(value as i64)
    }
}

impl From<u64> for PriorityKey {
    fn from(value: u64) -> Self {
        Self::Int(i64::try_from(value).unwrap_or(i64::MAX))
    }
}

impl From<&str> for PriorityKey {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for PriorityKey {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Job Descriptor
// ═══════════════════════════════════════════════════════════════════════════════

/// What a caller submits: a payload plus its ordering key.
#[derive(Debug, Clone)]
pub struct JobDescriptor<P> {
    /// Caller-chosen id; one is generated when absent
    pub id: Option<JobId>,
    /// Opaque data handed to the executor
    pub payload: P,
    /// Ordering key for the pending queue
    pub priority: PriorityKey,
}

impl<P> JobDescriptor<P> {
    pub fn new(payload: P) -> Self {
        Self {
            id: None,
            payload,
            priority: PriorityKey::Unset,
        }
    }

    pub fn with_id(mut self, id: impl Into<JobId>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_priority(mut self, priority: impl Into<PriorityKey>) -> Self {
        self.priority = priority.into();
        self
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Job Error
// ═══════════════════════════════════════════════════════════════════════════════

/// Why an attempt did not succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobErrorKind {
    /// The executor reported a failure
    Executor,
    /// The attempt exceeded the per-job timeout
    Timeout,
    /// The job was cancelled
    Cancelled,
    /// The executor panicked
    Panicked,
}

impl fmt::Display for JobErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Executor => write!(f, "executor"),
            Self::Timeout => write!(f, "timeout"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Panicked => write!(f, "panicked"),
        }
    }
}

/// Error type for job execution failures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobError {
    pub kind: JobErrorKind,
    pub message: String,
    /// Whether the retry path may be taken
    pub retryable: bool,
    /// Optional executor-defined error code
    pub code: Option<String>,
}

impl JobError {
    /// A transient executor failure that may be retried.
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            kind: JobErrorKind::Executor,
            message: message.into(),
            retryable: true,
            code: None,
        }
    }

    /// A permanent executor failure; the job fails without further attempts.
    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            kind: JobErrorKind::Executor,
            message: message.into(),
            retryable: false,
            code: None,
        }
    }

    pub fn timeout(after: Duration) -> Self {
        Self {
            kind: JobErrorKind::Timeout,
            message: format!("attempt timed out after {}ms", after.as_millis()),
            retryable: true,
            code: None,
        }
    }

    /// Returned by executors that observed the cancellation signal.
    pub fn cancelled(reason: impl Into<String>) -> Self {
        Self {
            kind: JobErrorKind::Cancelled,
            message: reason.into(),
            retryable: false,
            code: None,
        }
    }

    pub fn panicked(message: impl Into<String>) -> Self {
        Self {
            kind: JobErrorKind::Panicked,
            message: message.into(),
            retryable: true,
            code: None,
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn is_cancellation(&self) -> bool {
        self.kind == JobErrorKind::Cancelled
    }

    pub fn can_retry(&self) -> bool {
        self.retryable && !self.is_cancellation()
    }
}

impl fmt::Display for JobError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)?;
        if let Some(code) = &self.code {
            write!(f, " (code: {})", code)?;
        }
        Ok(())
    }
}

impl std::error::Error for JobError {}

/// Result type for a single executor attempt.
pub type JobResult = std::result::Result<(), JobError>;

// ═══════════════════════════════════════════════════════════════════════════════
// Job Context
// ═══════════════════════════════════════════════════════════════════════════════

/// Context passed to the executor for one attempt.
#[derive(Debug, Clone)]
pub struct JobContext {
    job_id: JobId,
    attempt: u32,
    runner: Arc<str>,
    cancellation: CancellationToken,
}

impl JobContext {
    pub(crate) fn new(job_id: JobId, attempt: u32, runner: Arc<str>, cancellation: CancellationToken) -> Self {
        Self {
            job_id,
            attempt,
            runner,
            cancellation,
        }
    }

    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    /// The current attempt number (1-indexed).
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Check if cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Resolves once cancellation has been requested.
    pub async fn cancelled(&self) {
        self.cancellation.cancelled().await
    }

    /// Run `future` unless cancellation is requested first.
    pub async fn cancellable<F, T>(&self, future: F) -> std::result::Result<T, JobError>
    where
        F: std::future::Future<Output = T>,
    {
        tokio::select! {
            biased;
            _ = self.cancellation.cancelled() => Err(JobError::cancelled("cancellation observed by executor")),
            result = future => Ok(result),
        }
    }

    /// Log a message associated with this attempt.
    pub fn log_info(&self, message: &str) {
        tracing::info!(
            runner = %self.runner,
            job_id = %self.job_id,
            attempt = self.attempt,
            message
        );
    }

    /// Log a warning associated with this attempt.
    pub fn log_warn(&self, message: &str) {
        tracing::warn!(
            runner = %self.runner,
            job_id = %self.job_id,
            attempt = self.attempt,
            message
        );
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Job Record
// ═══════════════════════════════════════════════════════════════════════════════

/// A submitted job: the immutable descriptor plus mutable execution state.
///
/// Only the coordinating loop mutates a `Job`.
#[derive(Debug)]
pub(crate) struct Job<P> {
    pub(crate) id: JobId,
    pub(crate) payload: Arc<P>,
    pub(crate) priority: PriorityKey,
    /// Submission order, the stable tie-break for equal priority keys
    pub(crate) sequence: u64,
    pub(crate) state: JobState,
    pub(crate) attempt: u32,
    pub(crate) last_error: Option<JobError>,
    pub(crate) submitted_at: DateTime<Utc>,
    pub(crate) started_at: Option<DateTime<Utc>>,
    pub(crate) finished_at: Option<DateTime<Utc>>,
    /// Set while a retry is waiting out its backoff delay
    pub(crate) retry_at: Option<DateTime<Utc>>,
}

impl<P> Job<P> {
    pub(crate) fn new(id: JobId, payload: P, priority: PriorityKey, sequence: u64) -> Self {
        Self {
            id,
            payload: Arc::new(payload),
            priority,
            sequence,
            state: JobState::Pending,
            attempt: 0,
            last_error: None,
            submitted_at: Utc::now(),
            started_at: None,
            finished_at: None,
            retry_at: None,
        }
    }

    fn transition(&mut self, next: JobState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "illegal job transition {} -> {} for {}",
            self.state,
            next,
            self.id
        );
        self.state = next;
    }

    /// Admit into `Running`, counting one more attempt.
    pub(crate) fn mark_running(&mut self) {
        self.transition(JobState::Running);
        self.attempt += 1;
        self.retry_at = None;
        self.started_at = Some(Utc::now());
    }

    pub(crate) fn mark_succeeded(&mut self) {
        self.transition(JobState::Succeeded);
        self.last_error = None;
        self.finished_at = Some(Utc::now());
    }

    /// Back to `Pending`, admissible again once `delay` has elapsed.
    pub(crate) fn mark_retrying(&mut self, error: JobError, delay: Duration) {
        self.transition(JobState::Pending);
        self.last_error = Some(error);
        let delay = chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::MAX);
        self.retry_at = Utc::now().checked_add_signed(delay);
    }

    pub(crate) fn mark_failed(&mut self, error: JobError) {
        self.transition(JobState::Failed);
        self.last_error = Some(error);
        self.finished_at = Some(Utc::now());
    }

    pub(crate) fn mark_cancelled(&mut self, reason: Option<JobError>) {
        self.transition(JobState::Cancelled);
        if reason.is_some() {
            self.last_error = reason;
        }
        self.retry_at = None;
        self.finished_at = Some(Utc::now());
    }

    pub(crate) fn snapshot(&self) -> JobSnapshot {
        JobSnapshot {
            id: self.id.clone(),
            priority: self.priority.clone(),
            state: self.state,
            attempt: self.attempt,
            last_error: self.last_error.clone(),
            submitted_at: self.submitted_at,
            started_at: self.started_at,
            finished_at: self.finished_at,
            retry_at: self.retry_at,
        }
    }
}

/// Read-only view of a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub id: JobId,
    pub priority: PriorityKey,
    pub state: JobState,
    pub attempt: u32,
    pub last_error: Option<JobError>,
    pub submitted_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub retry_at: Option<DateTime<Utc>>,
}

impl JobSnapshot {
    /// Time between the last admission and the terminal transition.
    pub fn duration(&self) -> Option<chrono::Duration> {
        match (self.started_at, self.finished_at) {
            (Some(start), Some(end)) => Some(end - start),
            _ => None,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
