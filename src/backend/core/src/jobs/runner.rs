//! Bounded-concurrency job runner.
//!
//! A [`JobRunner`] collects submitted jobs and, once started, hands them to a
//! single coordinating loop. The loop is the only writer of job state: it
//! admits pending jobs up to `max_concurrency`, spawns one tokio task per
//! attempt, and reacts to attempt completions, retry deadlines and control
//! commands arriving on channels. Callers steer and observe the run through
//! a cloneable [`RunHandle`].

use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_stream::wrappers::WatchStream;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use super::progress::ThroughputWindow;
use super::{
    BackoffPolicy, Executor, Job, JobContext, JobDescriptor, JobError, JobId, JobResult,
    JobSnapshot, JobState, OrderingPolicy, PendingQueue, ProgressSnapshot, RunnerEvent,
};
use crate::error::{BatchflowError, Result};
use crate::telemetry::metrics::RunnerMetrics;

/// Upper bound on `retry_limit`.
pub const MAX_RETRY_LIMIT: u32 = 1_000;

// ═══════════════════════════════════════════════════════════════════════════════
// Configuration
// ═══════════════════════════════════════════════════════════════════════════════

/// Configuration for a job runner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Runner name (for logging/metrics)
    pub name: String,
    /// Maximum number of jobs running at once
    pub max_concurrency: usize,
    /// Retries allowed after the first attempt
    pub retry_limit: u32,
    /// Abandon an attempt after this long
    #[serde(default, with = "humantime_serde")]
    pub per_job_timeout: Option<Duration>,
    pub backoff: BackoffPolicy,
    pub ordering: OrderingPolicy,
    /// Window over which throughput is measured
    #[serde(with = "humantime_serde")]
    pub throughput_window: Duration,
    /// Capacity of the event broadcast channel
    pub event_buffer_size: usize,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            name: "batchflow".to_string(),
            max_concurrency: 4,
            retry_limit: 3,
            per_job_timeout: None,
            backoff: BackoffPolicy::default(),
            ordering: OrderingPolicy::Fifo,
            throughput_window: Duration::from_secs(10),
            event_buffer_size: 1024,
        }
    }
}

impl RunnerConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency;
        self
    }

    pub fn with_retry_limit(mut self, retry_limit: u32) -> Self {
        self.retry_limit = retry_limit;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.per_job_timeout = Some(timeout);
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_ordering(mut self, ordering: OrderingPolicy) -> Self {
        self.ordering = ordering;
        self
    }

    /// Check every field, returning the first problem found.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(BatchflowError::invalid_config("runner name must not be empty"));
        }
        if self.max_concurrency == 0 {
            return Err(BatchflowError::invalid_config("max_concurrency must be at least 1")
                .with_context("max_concurrency", self.max_concurrency));
        }
        if self.retry_limit > MAX_RETRY_LIMIT {
            return Err(BatchflowError::invalid_config(format!(
                "retry_limit must be at most {}",
                MAX_RETRY_LIMIT
            ))
            .with_context("retry_limit", self.retry_limit));
        }
        if self.per_job_timeout == Some(Duration::ZERO) {
            return Err(BatchflowError::invalid_config("per_job_timeout must be greater than zero"));
        }
        if self.throughput_window.is_zero() {
            return Err(BatchflowError::invalid_config("throughput_window must be greater than zero"));
        }
        if self.event_buffer_size == 0 {
            return Err(BatchflowError::invalid_config("event_buffer_size must be at least 1"));
        }
        self.backoff.validate()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Run Report
// ═══════════════════════════════════════════════════════════════════════════════

/// Final state of a run, returned by [`JobRunner::shutdown`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub progress: ProgressSnapshot,
    /// Every job, in submission order
    pub jobs: Vec<JobSnapshot>,
}

impl RunReport {
    pub fn job(&self, id: &str) -> Option<&JobSnapshot> {
        self.jobs.iter().find(|job| job.id.as_str() == id)
    }

    pub fn in_state(&self, state: JobState) -> impl Iterator<Item = &JobSnapshot> {
        self.jobs.iter().filter(move |job| job.state == state)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Channel Messages
// ═══════════════════════════════════════════════════════════════════════════════

enum Command {
    Pause,
    Resume,
    Cancel(JobId),
    CancelAll,
    Job(JobId, oneshot::Sender<Option<JobSnapshot>>),
    Jobs(oneshot::Sender<Vec<JobSnapshot>>),
    Shutdown,
}

struct Completion {
    job_id: JobId,
    attempt: u32,
    outcome: JobResult,
    elapsed: Duration,
}

// ═══════════════════════════════════════════════════════════════════════════════
// Run Handle
// ═══════════════════════════════════════════════════════════════════════════════

/// Handle for steering and observing a started runner.
///
/// Control methods enqueue a command for the coordinating loop and return
/// immediately; they fail only once the loop has exited.
#[derive(Clone, Debug)]
pub struct RunHandle {
    name: Arc<str>,
    commands: mpsc::UnboundedSender<Command>,
    progress: watch::Receiver<ProgressSnapshot>,
    events: broadcast::Sender<RunnerEvent>,
    submitted: Arc<AtomicUsize>,
}

impl RunHandle {
    fn send(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| BatchflowError::runner_stopped())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stop admitting jobs. Running attempts continue.
    pub fn pause(&self) -> Result<()> {
        self.send(Command::Pause)
    }

    /// Re-admit pending jobs up to the concurrency bound.
    pub fn resume(&self) -> Result<()> {
        self.send(Command::Resume)
    }

    /// Cancel one job: immediately if pending, via its cancellation token if running.
    pub fn cancel(&self, job_id: impl Into<JobId>) -> Result<()> {
        self.send(Command::Cancel(job_id.into()))
    }

    /// Cancel every job that has not reached a terminal state.
    pub fn cancel_all(&self) -> Result<()> {
        self.send(Command::CancelAll)
    }

    /// Latest published progress.
    pub fn progress(&self) -> ProgressSnapshot {
        self.progress.borrow().clone()
    }

    pub fn subscribe_progress(&self) -> watch::Receiver<ProgressSnapshot> {
        self.progress.clone()
    }

    /// Progress updates as a stream, starting with the current value.
    pub fn progress_stream(&self) -> WatchStream<ProgressSnapshot> {
        WatchStream::new(self.progress.clone())
    }

    /// Subscribe to lifecycle events from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<RunnerEvent> {
        self.events.subscribe()
    }

    /// Query the current state of one job.
    ///
    /// Fails with `JobNotFound` for an id the runner has never seen.
    pub async fn job(&self, job_id: impl Into<JobId>) -> Result<JobSnapshot> {
        let job_id = job_id.into();
        let (reply, response) = oneshot::channel();
        self.send(Command::Job(job_id.clone(), reply))?;
        response
            .await
            .map_err(|_| BatchflowError::runner_stopped())?
            .ok_or_else(|| BatchflowError::job_not_found(job_id.as_str()))
    }

    /// Query every job, in submission order.
    pub async fn jobs(&self) -> Result<Vec<JobSnapshot>> {
        let (reply, response) = oneshot::channel();
        self.send(Command::Jobs(reply))?;
        response.await.map_err(|_| BatchflowError::runner_stopped())
    }

    /// Wait until every job submitted so far is terminal (or the loop exits).
    pub async fn wait_idle(&self) -> ProgressSnapshot {
        let expected = self.submitted.load(Ordering::Acquire);
        let mut progress = self.progress.clone();
        let result = progress
            .wait_for(|p| p.finished || (p.is_idle() && p.total >= expected))
            .await
            .map(|p| p.clone());
        match result {
            Ok(snapshot) => snapshot,
            Err(_) => self.progress.borrow().clone(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Job Runner
// ═══════════════════════════════════════════════════════════════════════════════

struct RunnerLink<P> {
    submissions: mpsc::UnboundedSender<Vec<Job<P>>>,
    handle: RunHandle,
    task: Option<JoinHandle<RunReport>>,
}

/// Accepts jobs and runs them under a concurrency bound.
///
/// ```rust,ignore
/// let mut runner = JobRunner::new(RunnerConfig::default().with_max_concurrency(2))?;
/// runner.submit(documents.into_iter().map(JobDescriptor::new))?;
/// let handle = runner.start(|ctx: JobContext, doc: Arc<Document>| async move { process(ctx, doc).await })?;
/// handle.wait_idle().await;
/// let report = runner.shutdown().await?;
/// ```
pub struct JobRunner<P> {
    config: RunnerConfig,
    metrics: RunnerMetrics,
    staged: Vec<Job<P>>,
    known_ids: HashSet<JobId>,
    next_sequence: u64,
    closed: bool,
    link: Option<RunnerLink<P>>,
    final_report: Option<RunReport>,
}

impl<P> JobRunner<P>
where
    P: Send + Sync + 'static,
{
    /// Create a runner, rejecting invalid configuration.
    pub fn new(config: RunnerConfig) -> Result<Self> {
        config.validate()?;

        tracing::info!(
            runner = %config.name,
            max_concurrency = config.max_concurrency,
            retry_limit = config.retry_limit,
            per_job_timeout_ms = config.per_job_timeout.map(|t| t.as_millis() as u64),
            "Job runner created"
        );

        Ok(Self {
            metrics: RunnerMetrics::new(&config.name),
            config,
            staged: Vec::new(),
            known_ids: HashSet::new(),
            next_sequence: 0,
            closed: false,
            link: None,
            final_report: None,
        })
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    pub fn is_started(&self) -> bool {
        self.link.is_some()
    }

    pub fn is_shutdown(&self) -> bool {
        self.closed
    }

    /// The control handle, once started.
    pub fn handle(&self) -> Option<RunHandle> {
        self.link.as_ref().map(|link| link.handle.clone())
    }

    /// Enqueue jobs in `Pending` state.
    ///
    /// Before `start` the jobs are held until the loop begins; afterwards
    /// they are forwarded to it. A batch containing a duplicate id is
    /// rejected as a whole.
    pub fn submit<I>(&mut self, jobs: I) -> Result<Vec<JobId>>
    where
        I: IntoIterator<Item = JobDescriptor<P>>,
    {
        if self.closed {
            return Err(BatchflowError::runner_shutdown(&self.config.name));
        }

        let mut batch = Vec::new();
        let mut batch_ids = HashSet::new();
        for descriptor in jobs {
            let id = match descriptor.id {
                Some(id) => id,
                None => loop {
                    let id = JobId::generate();
                    if !self.known_ids.contains(&id) && !batch_ids.contains(&id) {
                        break id;
                    }
                },
            };
            if self.known_ids.contains(&id) || !batch_ids.insert(id.clone()) {
                return Err(BatchflowError::duplicate_job(id.as_str()));
            }
            let sequence = self.next_sequence + batch.len() as u64;
            batch.push(Job::new(id, descriptor.payload, descriptor.priority, sequence));
        }

        let ids: Vec<JobId> = batch.iter().map(|job| job.id.clone()).collect();
        let count = batch.len();

        match &self.link {
            Some(link) => {
                link.handle.submitted.fetch_add(count, Ordering::AcqRel);
                if link.submissions.send(batch).is_err() {
                    link.handle.submitted.fetch_sub(count, Ordering::AcqRel);
                    return Err(BatchflowError::runner_stopped());
                }
            }
            None => self.staged.extend(batch),
        }

        self.next_sequence += count as u64;
        self.known_ids.extend(ids.iter().cloned());
        self.metrics.jobs_submitted(count);

        tracing::debug!(runner = %self.config.name, count, "Jobs submitted");

        Ok(ids)
    }

    /// Start the coordinating loop with the given executor.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start<E>(&mut self, executor: E) -> Result<RunHandle>
    where
        E: Executor<P>,
    {
        if self.closed {
            return Err(BatchflowError::runner_shutdown(&self.config.name));
        }
        if self.link.is_some() {
            return Err(BatchflowError::already_started(&self.config.name));
        }
        let runtime = tokio::runtime::Handle::try_current().map_err(|e| {
            BatchflowError::internal("JobRunner::start called outside of a tokio runtime")
                .with_source(e)
        })?;

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (submission_tx, submission_rx) = mpsc::unbounded_channel();
        let (completion_tx, completion_rx) = mpsc::unbounded_channel();
        let (event_tx, _) = broadcast::channel(self.config.event_buffer_size);

        let name: Arc<str> = Arc::from(self.config.name.as_str());
        let staged = std::mem::take(&mut self.staged);
        let submitted = Arc::new(AtomicUsize::new(staged.len()));

        let mut coordinator = Coordinator {
            name: name.clone(),
            config: self.config.clone(),
            executor: Arc::new(executor),
            jobs: HashMap::new(),
            order: Vec::new(),
            pending: PendingQueue::new(self.config.ordering.clone()),
            retries: BTreeMap::new(),
            retry_deadlines: HashMap::new(),
            running: HashMap::new(),
            cancel_requested: HashSet::new(),
            paused: false,
            shutdown_requested: false,
            succeeded: 0,
            failed: 0,
            cancelled: 0,
            peak_running: 0,
            throughput: ThroughputWindow::new(self.config.throughput_window),
            throughput_rate: 0.0,
            was_idle: true,
            completions: completion_tx,
            progress: watch::channel(ProgressSnapshot::default()).0,
            events: event_tx.clone(),
            metrics: self.metrics.clone(),
        };
        coordinator.enqueue(staged);
        let (progress_tx, progress_rx) = watch::channel(coordinator.snapshot());
        coordinator.progress = progress_tx;

        let span = tracing::info_span!("job_runner", runner = %name);
        let task = runtime.spawn(
            coordinator
                .run(command_rx, submission_rx, completion_rx)
                .instrument(span),
        );

        let handle = RunHandle {
            name,
            commands: command_tx,
            progress: progress_rx,
            events: event_tx,
            submitted,
        };

        self.link = Some(RunnerLink {
            submissions: submission_tx,
            handle: handle.clone(),
            task: Some(task),
        });

        Ok(handle)
    }

    /// Stop accepting submissions, drain every outstanding job, and return
    /// the final report.
    ///
    /// Draining includes retries. A paused runner is resumed. Call
    /// `cancel_all` first to abandon outstanding work instead.
    pub async fn shutdown(&mut self) -> Result<RunReport> {
        self.closed = true;

        if let Some(report) = &self.final_report {
            return Ok(report.clone());
        }

        let report = match self.link.as_mut() {
            Some(link) => {
                // The loop may already have exited if every handle was dropped.
                let _ = link.handle.commands.send(Command::Shutdown);
                let task = link.task.take().ok_or_else(BatchflowError::runner_stopped)?;
                task.await.map_err(|e| {
                    BatchflowError::internal(format!("runner loop terminated abnormally: {}", e))
                })?
            }
            None => {
                let jobs: Vec<JobSnapshot> = self.staged.iter().map(Job::snapshot).collect();
                RunReport {
                    progress: ProgressSnapshot {
                        total: jobs.len(),
                        pending: jobs.len(),
                        finished: true,
                        ..Default::default()
                    },
                    jobs,
                }
            }
        };

        tracing::info!(
            runner = %self.config.name,
            succeeded = report.progress.succeeded,
            failed = report.progress.failed,
            cancelled = report.progress.cancelled,
            "Job runner shut down"
        );

        self.final_report = Some(report.clone());
        Ok(report)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Coordinating Loop
// ═══════════════════════════════════════════════════════════════════════════════

struct Coordinator<P, E> {
    name: Arc<str>,
    config: RunnerConfig,
    executor: Arc<E>,
    jobs: HashMap<JobId, Job<P>>,
    order: Vec<JobId>,
    pending: PendingQueue,
    /// Jobs waiting out a backoff delay, keyed by `(deadline, sequence)`
    retries: BTreeMap<(Instant, u64), JobId>,
    retry_deadlines: HashMap<JobId, Instant>,
    running: HashMap<JobId, CancellationToken>,
    cancel_requested: HashSet<JobId>,
    paused: bool,
    shutdown_requested: bool,
    succeeded: usize,
    failed: usize,
    cancelled: usize,
    peak_running: usize,
    throughput: ThroughputWindow,
    throughput_rate: f64,
    was_idle: bool,
    completions: mpsc::UnboundedSender<Completion>,
    progress: watch::Sender<ProgressSnapshot>,
    events: broadcast::Sender<RunnerEvent>,
    metrics: RunnerMetrics,
}

impl<P, E> Coordinator<P, E>
where
    P: Send + Sync + 'static,
    E: Executor<P>,
{
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut submissions: mpsc::UnboundedReceiver<Vec<Job<P>>>,
        mut completions: mpsc::UnboundedReceiver<Completion>,
    ) -> RunReport {
        let mut commands_open = true;
        let mut submissions_open = true;

        tracing::info!(
            max_concurrency = self.config.max_concurrency,
            jobs = self.jobs.len(),
            "Job runner started"
        );

        loop {
            self.admit();
            self.publish();

            let detached = !commands_open && !submissions_open;
            if self.is_idle() && (self.shutdown_requested || detached) {
                break;
            }

            let next_retry = self.retries.keys().next().map(|(deadline, _)| *deadline);

            tokio::select! {
                biased;

                command = commands.recv(), if commands_open => match command {
                    Some(command) => {
                        // A command must see every batch submitted before it was sent.
                        self.drain_submissions(&mut submissions, &mut submissions_open);
                        self.on_command(command);
                    }
                    None => {
                        commands_open = false;
                        if self.paused {
                            tracing::warn!("All handles dropped while paused; resuming to drain");
                            self.paused = false;
                        }
                    }
                },

                batch = submissions.recv(), if submissions_open => match batch {
                    Some(jobs) => self.enqueue(jobs),
                    None => submissions_open = false,
                },

                Some(done) = completions.recv() => self.on_completion(done),

                _ = tokio::time::sleep_until(next_retry.unwrap_or_else(Instant::now)), if next_retry.is_some() => {
                    self.release_due_retries();
                }
            }
        }

        let mut progress = self.snapshot();
        progress.finished = true;
        self.progress.send_replace(progress.clone());

        tracing::info!(
            succeeded = progress.succeeded,
            failed = progress.failed,
            cancelled = progress.cancelled,
            "Job runner loop finished"
        );

        RunReport {
            progress,
            jobs: self.order.iter().filter_map(|id| self.jobs.get(id)).map(Job::snapshot).collect(),
        }
    }

    fn is_idle(&self) -> bool {
        self.pending.is_empty() && self.retries.is_empty() && self.running.is_empty()
    }

    fn emit(&self, event: RunnerEvent) {
        // No subscribers is not an error.
        let _ = self.events.send(event);
    }

    fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            total: self.jobs.len(),
            pending: self.pending.len() + self.retries.len(),
            retrying: self.retries.len(),
            running: self.running.len(),
            succeeded: self.succeeded,
            failed: self.failed,
            cancelled: self.cancelled,
            peak_running: self.peak_running,
            paused: self.paused,
            throughput_per_sec: self.throughput_rate,
            finished: false,
        }
    }

    fn publish(&mut self) {
        let snapshot = self.snapshot();
        let idle = snapshot.is_idle();
        if idle && !self.was_idle && snapshot.total > 0 {
            self.emit(RunnerEvent::Idle);
            tracing::debug!(completed = snapshot.completed(), "Runner idle");
        }
        self.was_idle = idle;

        self.progress.send_if_modified(|current| {
            if *current != snapshot {
                *current = snapshot;
                true
            } else {
                false
            }
        });
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Admission
    // ─────────────────────────────────────────────────────────────────────────

    fn enqueue(&mut self, jobs: Vec<Job<P>>) {
        for job in jobs {
            let id = job.id.clone();
            self.pending.push(id.clone(), job.priority.clone(), job.sequence);
            self.order.push(id.clone());
            self.jobs.insert(id.clone(), job);
            self.emit(RunnerEvent::JobSubmitted { job_id: id });
        }
    }

    fn drain_submissions(
        &mut self,
        submissions: &mut mpsc::UnboundedReceiver<Vec<Job<P>>>,
        open: &mut bool,
    ) {
        while *open {
            match submissions.try_recv() {
                Ok(jobs) => self.enqueue(jobs),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => *open = false,
            }
        }
    }

    fn admit(&mut self) {
        while !self.paused && self.running.len() < self.config.max_concurrency {
            let Some(job_id) = self.pending.pop() else {
                break;
            };
            self.launch(job_id);
        }
    }

    fn launch(&mut self, job_id: JobId) {
        let Some(job) = self.jobs.get_mut(&job_id) else {
            tracing::error!(job_id = %job_id, "Queued job missing from job table");
            return;
        };
        job.mark_running();
        let attempt = job.attempt;
        let payload = Arc::clone(&job.payload);

        let token = CancellationToken::new();
        self.running.insert(job_id.clone(), token.clone());
        self.peak_running = self.peak_running.max(self.running.len());
        self.metrics.running(self.running.len());
        self.metrics.job_started();

        tracing::debug!(job_id = %job_id, attempt, "Job admitted");
        self.emit(RunnerEvent::JobStarted {
            job_id: job_id.clone(),
            attempt,
        });

        let ctx = JobContext::new(job_id.clone(), attempt, self.name.clone(), token);
        let executor = Arc::clone(&self.executor);
        let timeout = self.config.per_job_timeout;
        let completions = self.completions.clone();
        let span = tracing::info_span!("job_attempt", job_id = %job_id, attempt);

        tokio::spawn(
            async move {
                let started = Instant::now();
                let outcome = run_attempt(executor.as_ref(), ctx, payload, timeout).await;
                // The loop owns the receiver for as long as it can act on this.
                let _ = completions.send(Completion {
                    job_id,
                    attempt,
                    outcome,
                    elapsed: started.elapsed(),
                });
            }
            .instrument(span),
        );
    }

    fn release_due_retries(&mut self) {
        let now = Instant::now();
        while let Some((&(deadline, sequence), _)) = self.retries.first_key_value() {
            if deadline > now {
                break;
            }
            let Some(job_id) = self.retries.remove(&(deadline, sequence)) else {
                break;
            };
            self.retry_deadlines.remove(&job_id);
            if let Some(job) = self.jobs.get_mut(&job_id) {
                job.retry_at = None;
                self.pending.push(job_id, job.priority.clone(), job.sequence);
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Completion
    // ─────────────────────────────────────────────────────────────────────────

    fn on_completion(&mut self, done: Completion) {
        if self.running.remove(&done.job_id).is_none() {
            tracing::warn!(job_id = %done.job_id, attempt = done.attempt, "Completion for a job that is not running");
            return;
        }
        self.metrics.running(self.running.len());
        self.metrics.attempt_duration(done.elapsed);

        let job_id = done.job_id;
        let cancel_requested = self.cancel_requested.remove(&job_id);

        match done.outcome {
            outcome if cancel_requested => {
                let reason = outcome
                    .err()
                    .unwrap_or_else(|| JobError::cancelled("cancelled while running"));
                self.finish_cancelled(&job_id, Some(reason));
            }
            Ok(()) => self.finish_succeeded(&job_id, done.elapsed),
            Err(error) if error.is_cancellation() => self.finish_cancelled(&job_id, Some(error)),
            Err(error) => {
                let retry_allowed = error.can_retry() && done.attempt <= self.config.retry_limit;
                if retry_allowed {
                    self.schedule_retry(&job_id, error);
                } else {
                    self.finish_failed(&job_id, error);
                }
            }
        }
    }

    fn record_terminal(&mut self) {
        let now = Instant::now();
        self.throughput.record(now);
        self.throughput_rate = self.throughput.rate(now);
    }

    fn finish_succeeded(&mut self, job_id: &JobId, elapsed: Duration) {
        let Some(job) = self.jobs.get_mut(job_id) else {
            return;
        };
        job.mark_succeeded();
        let attempt = job.attempt;
        self.succeeded += 1;
        self.record_terminal();
        self.metrics.job_succeeded();

        tracing::debug!(job_id = %job_id, attempt, elapsed_ms = elapsed.as_millis() as u64, "Job succeeded");
        self.emit(RunnerEvent::JobSucceeded {
            job_id: job_id.clone(),
            attempt,
            duration_ms: elapsed.as_millis() as u64,
        });
    }

    fn finish_failed(&mut self, job_id: &JobId, error: JobError) {
        let Some(job) = self.jobs.get_mut(job_id) else {
            return;
        };
        job.mark_failed(error.clone());
        let attempt = job.attempt;
        self.failed += 1;
        self.record_terminal();
        self.metrics.job_failed(error.kind);

        tracing::warn!(job_id = %job_id, attempt, error = %error, "Job failed");
        self.emit(RunnerEvent::JobFailed {
            job_id: job_id.clone(),
            attempt,
            error,
        });
    }

    fn finish_cancelled(&mut self, job_id: &JobId, reason: Option<JobError>) {
        let Some(job) = self.jobs.get_mut(job_id) else {
            return;
        };
        job.mark_cancelled(reason);
        let attempt = job.attempt;
        self.cancelled += 1;
        self.record_terminal();
        self.metrics.job_cancelled();

        tracing::info!(job_id = %job_id, attempt, "Job cancelled");
        self.emit(RunnerEvent::JobCancelled {
            job_id: job_id.clone(),
            attempt,
        });
    }

    fn schedule_retry(&mut self, job_id: &JobId, error: JobError) {
        let Some(job) = self.jobs.get_mut(job_id) else {
            return;
        };
        let attempt = job.attempt;
        let delay = self.config.backoff.delay_for_attempt(attempt);
        job.mark_retrying(error.clone(), delay);

        if delay.is_zero() {
            job.retry_at = None;
            self.pending.push(job_id.clone(), job.priority.clone(), job.sequence);
        } else {
            let deadline = Instant::now() + delay;
            self.retries.insert((deadline, job.sequence), job_id.clone());
            self.retry_deadlines.insert(job_id.clone(), deadline);
        }
        self.metrics.job_retried();

        tracing::warn!(
            job_id = %job_id,
            attempt,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "Job attempt failed, retry scheduled"
        );
        self.emit(RunnerEvent::JobRetryScheduled {
            job_id: job_id.clone(),
            attempt,
            delay_ms: delay.as_millis() as u64,
            error,
        });
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Commands
    // ─────────────────────────────────────────────────────────────────────────

    fn on_command(&mut self, command: Command) {
        match command {
            Command::Pause => {
                if !self.paused {
                    self.paused = true;
                    tracing::info!(running = self.running.len(), "Runner paused");
                    self.emit(RunnerEvent::Paused);
                }
            }
            Command::Resume => self.resume(),
            Command::Cancel(job_id) => self.cancel(&job_id),
            Command::CancelAll => {
                let outstanding: Vec<JobId> = self
                    .order
                    .iter()
                    .filter(|id| self.jobs.get(*id).is_some_and(|job| !job.state.is_terminal()))
                    .cloned()
                    .collect();
                tracing::info!(jobs = outstanding.len(), "Cancelling all outstanding jobs");
                for job_id in outstanding {
                    self.cancel(&job_id);
                }
            }
            Command::Job(job_id, reply) => {
                let _ = reply.send(self.jobs.get(&job_id).map(Job::snapshot));
            }
            Command::Jobs(reply) => {
                let jobs = self
                    .order
                    .iter()
                    .filter_map(|id| self.jobs.get(id))
                    .map(Job::snapshot)
                    .collect();
                let _ = reply.send(jobs);
            }
            Command::Shutdown => {
                self.shutdown_requested = true;
                self.resume();
                tracing::info!(outstanding = self.jobs.len() - self.succeeded - self.failed - self.cancelled, "Shutdown requested, draining");
            }
        }
    }

    fn resume(&mut self) {
        if self.paused {
            self.paused = false;
            tracing::info!(pending = self.pending.len(), "Runner resumed");
            self.emit(RunnerEvent::Resumed);
        }
    }

    fn cancel(&mut self, job_id: &JobId) {
        let Some((state, sequence)) = self.jobs.get(job_id).map(|job| (job.state, job.sequence)) else {
            tracing::warn!(job_id = %job_id, "Cancel requested for unknown job");
            return;
        };

        match state {
            JobState::Pending => {
                if !self.pending.remove(job_id) {
                    if let Some(deadline) = self.retry_deadlines.remove(job_id) {
                        self.retries.remove(&(deadline, sequence));
                    }
                }
                self.finish_cancelled(job_id, None);
            }
            JobState::Running => {
                if let Some(token) = self.running.get(job_id) {
                    if self.cancel_requested.insert(job_id.clone()) {
                        token.cancel();
                        tracing::debug!(job_id = %job_id, "Cancellation signalled to running job");
                        self.emit(RunnerEvent::CancelRequested {
                            job_id: job_id.clone(),
                        });
                    }
                }
            }
            _ => {
                tracing::debug!(job_id = %job_id, state = %state, "Cancel ignored for terminal job");
            }
        }
    }
}

/// Run one attempt, converting panics and timeouts into job errors.
async fn run_attempt<P, E>(
    executor: &E,
    ctx: JobContext,
    payload: Arc<P>,
    timeout: Option<Duration>,
) -> JobResult
where
    P: Send + Sync + 'static,
    E: Executor<P>,
{
    let attempt = AssertUnwindSafe(executor.execute(ctx, payload)).catch_unwind();
    let caught = match timeout {
        Some(limit) => match tokio::time::timeout(limit, attempt).await {
            Ok(caught) => caught,
            Err(_) => return Err(JobError::timeout(limit)),
        },
        None => attempt.await,
    };

    caught.unwrap_or_else(|panic| {
        let message = panic
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| panic.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "executor panicked".to_string());
        Err(JobError::panicked(message))
    })
}
