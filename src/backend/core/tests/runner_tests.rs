//! Integration tests for the job runner.
//!
//! Tests cover:
//! - Concurrency bound and batching
//! - Retry limits, backoff timing and re-insertion order
//! - Pause/resume idempotence
//! - Stable priority ordering
//! - Cancellation of pending, retrying and running jobs
//! - Timeouts, panics and fatal errors
//! - Submission after start, shutdown and handle queries
//!
//! All timing tests run on tokio's paused clock, so elapsed times are exact.

use batchflow_core::error::ErrorCode;
use batchflow_core::jobs::{
    BackoffPolicy, Executor, JobContext, JobDescriptor, JobError, JobErrorKind, JobRunner,
    JobState, OrderingPolicy, RunnerConfig, RunnerEvent,
};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tokio_test::assert_ok;

// ============================================================================
// Fixtures
// ============================================================================

/// Simulated unit of work.
#[derive(Debug, Clone, Default)]
struct Work {
    millis: u64,
    /// Fail this many attempts before succeeding
    failures: u32,
    fatal: bool,
    panics: bool,
    /// Wait for cancellation instead of finishing
    cooperative: bool,
}

impl Work {
    fn taking(millis: u64) -> Self {
        Self {
            millis,
            ..Default::default()
        }
    }

    fn failing(failures: u32) -> Self {
        Self {
            failures,
            ..Default::default()
        }
    }
}

/// Records admission order and the number of simultaneously running attempts.
#[derive(Debug, Default)]
struct Tracker {
    started: Mutex<Vec<String>>,
    current: AtomicUsize,
    peak: AtomicUsize,
    attempts: AtomicU32,
}

impl Tracker {
    fn started(&self) -> Vec<String> {
        self.started.lock().unwrap().clone()
    }
}

fn executor(tracker: Arc<Tracker>) -> impl Executor<Work> {
    move |ctx: JobContext, work: Arc<Work>| {
        let tracker = tracker.clone();
        async move {
            tracker.started.lock().unwrap().push(ctx.job_id().to_string());
            tracker.attempts.fetch_add(1, Ordering::SeqCst);
            let now = tracker.current.fetch_add(1, Ordering::SeqCst) + 1;
            tracker.peak.fetch_max(now, Ordering::SeqCst);

            let outcome = async {
                if work.cooperative {
                    ctx.cancelled().await;
                    return Err(JobError::cancelled("stopped on request"));
                }
                tokio::time::sleep(Duration::from_millis(work.millis)).await;
                if work.panics {
                    panic!("corrupt input in {}", ctx.job_id());
                }
                if ctx.attempt() <= work.failures {
                    return Err(if work.fatal {
                        JobError::fatal("unsupported format")
                    } else {
                        JobError::retryable(format!("transient failure #{}", ctx.attempt()))
                    });
                }
                Ok(())
            }
            .await;

            tracker.current.fetch_sub(1, Ordering::SeqCst);
            outcome
        }
    }
}

fn config(max_concurrency: usize) -> RunnerConfig {
    RunnerConfig::default()
        .with_name("test")
        .with_max_concurrency(max_concurrency)
        .with_backoff(BackoffPolicy::None)
}

fn jobs(ids: &[&str], work: Work) -> Vec<JobDescriptor<Work>> {
    ids.iter()
        .map(|id| JobDescriptor::new(work.clone()).with_id(*id))
        .collect()
}

fn drain_events(rx: &mut broadcast::Receiver<RunnerEvent>) -> Vec<RunnerEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

// ============================================================================
// Concurrency
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_concurrency_bound_never_exceeded() {
    let tracker = Arc::new(Tracker::default());
    let mut runner = JobRunner::new(config(3)).unwrap();
    runner
        .submit((0..20).map(|i| JobDescriptor::new(Work::taking(10 + (i % 4) * 5))))
        .unwrap();

    let handle = runner.start(executor(tracker.clone())).unwrap();
    let mut progress = handle.subscribe_progress();
    let mut max_observed = 0;
    loop {
        let snapshot = progress.borrow_and_update().clone();
        max_observed = max_observed.max(snapshot.running);
        if snapshot.is_idle() && snapshot.total == 20 {
            break;
        }
        progress.changed().await.unwrap();
    }

    let report = runner.shutdown().await.unwrap();
    assert!(max_observed <= 3);
    assert_eq!(tracker.peak.load(Ordering::SeqCst), 3);
    assert_eq!(report.progress.peak_running, 3);
    assert_eq!(report.progress.succeeded, 20);
}

#[tokio::test(start_paused = true)]
async fn test_batches_of_two() {
    let tracker = Arc::new(Tracker::default());
    let mut runner = JobRunner::new(config(2)).unwrap();
    runner
        .submit(jobs(&["a", "b", "c", "d", "e"], Work::taking(50)))
        .unwrap();

    let started = Instant::now();
    let handle = runner.start(executor(tracker)).unwrap();
    let progress = handle.wait_idle().await;
    let elapsed = started.elapsed();

    assert_eq!(progress.succeeded, 5);
    assert!(elapsed >= Duration::from_millis(150), "elapsed {:?}", elapsed);
    assert!(elapsed < Duration::from_millis(200), "elapsed {:?}", elapsed);
}

// ============================================================================
// Retry
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_always_failing_job_attempts_retry_limit_plus_one() {
    let tracker = Arc::new(Tracker::default());
    let mut runner = JobRunner::new(config(1).with_retry_limit(2)).unwrap();
    runner.submit(jobs(&["doomed"], Work::failing(u32::MAX))).unwrap();

    runner.start(executor(tracker.clone())).unwrap();
    let report = runner.shutdown().await.unwrap();

    let job = report.job("doomed").unwrap();
    assert_eq!(job.state, JobState::Failed);
    assert_eq!(job.attempt, 3);
    assert_eq!(tracker.attempts.load(Ordering::SeqCst), 3);
    assert_eq!(
        job.last_error.as_ref().map(|e| e.message.as_str()),
        Some("transient failure #3")
    );
}

#[tokio::test(start_paused = true)]
async fn test_retry_with_backoff_then_success() {
    let tracker = Arc::new(Tracker::default());
    let config = config(1)
        .with_retry_limit(2)
        .with_backoff(BackoffPolicy::custom(|attempt| {
            Duration::from_millis(attempt as u64 * 100)
        }));
    let mut runner = JobRunner::new(config).unwrap();
    runner.submit(jobs(&["x"], Work::failing(2))).unwrap();

    let started = Instant::now();
    let handle = runner.start(executor(tracker)).unwrap();
    handle.wait_idle().await;
    let elapsed = started.elapsed();

    let job = handle.job("x").await.unwrap();
    assert_eq!(job.state, JobState::Succeeded);
    assert_eq!(job.attempt, 3);
    assert!(elapsed >= Duration::from_millis(300), "elapsed {:?}", elapsed);
}

#[tokio::test(start_paused = true)]
async fn test_fatal_error_skips_retries() {
    let tracker = Arc::new(Tracker::default());
    let mut runner = JobRunner::new(config(1).with_retry_limit(5)).unwrap();
    let work = Work {
        failures: 1,
        fatal: true,
        ..Default::default()
    };
    runner.submit(jobs(&["scan.tiff"], work)).unwrap();

    runner.start(executor(tracker.clone())).unwrap();
    let report = runner.shutdown().await.unwrap();

    let job = report.job("scan.tiff").unwrap();
    assert_eq!(job.state, JobState::Failed);
    assert_eq!(job.attempt, 1);
    assert_eq!(tracker.attempts.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_retry_returns_to_original_position() {
    let tracker = Arc::new(Tracker::default());
    let mut runner = JobRunner::new(config(1).with_retry_limit(1)).unwrap();
    runner.submit(jobs(&["a"], Work::failing(1))).unwrap();
    runner.submit(jobs(&["b", "c"], Work::taking(10))).unwrap();

    runner.start(executor(tracker.clone())).unwrap();
    runner.shutdown().await.unwrap();

    assert_eq!(tracker.started(), ["a", "a", "b", "c"]);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_is_retried_then_fails() {
    let tracker = Arc::new(Tracker::default());
    let config = config(1)
        .with_retry_limit(1)
        .with_timeout(Duration::from_millis(100));
    let mut runner = JobRunner::new(config).unwrap();
    runner.submit(jobs(&["slow"], Work::taking(10_000))).unwrap();
    runner.submit(jobs(&["fast"], Work::taking(10))).unwrap();

    let started = Instant::now();
    runner.start(executor(tracker)).unwrap();
    let report = runner.shutdown().await.unwrap();

    let slow = report.job("slow").unwrap();
    assert_eq!(slow.state, JobState::Failed);
    assert_eq!(slow.attempt, 2);
    assert_eq!(slow.last_error.as_ref().map(|e| e.kind), Some(JobErrorKind::Timeout));
    assert_eq!(report.job("fast").unwrap().state, JobState::Succeeded);
    assert!(started.elapsed() < Duration::from_secs(1));
}

#[tokio::test(start_paused = true)]
async fn test_panic_is_isolated() {
    let tracker = Arc::new(Tracker::default());
    let mut runner = JobRunner::new(config(2).with_retry_limit(1)).unwrap();
    let bad = Work {
        millis: 5,
        panics: true,
        ..Default::default()
    };
    runner.submit(jobs(&["bad"], bad)).unwrap();
    runner.submit(jobs(&["good-1", "good-2"], Work::taking(20))).unwrap();

    runner.start(executor(tracker)).unwrap();
    let report = runner.shutdown().await.unwrap();

    let bad = report.job("bad").unwrap();
    assert_eq!(bad.state, JobState::Failed);
    assert_eq!(bad.attempt, 2);
    let error = bad.last_error.as_ref().unwrap();
    assert_eq!(error.kind, JobErrorKind::Panicked);
    assert_eq!(error.message, "corrupt input in bad");
    assert_eq!(report.progress.succeeded, 2);
}

// ============================================================================
// Pause / Resume
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_pause_and_resume_are_idempotent() {
    let tracker = Arc::new(Tracker::default());
    let mut runner = JobRunner::new(config(1)).unwrap();
    runner.submit(jobs(&["1", "2", "3"], Work::taking(100))).unwrap();

    let handle = runner.start(executor(tracker)).unwrap();
    let mut events = handle.subscribe();
    assert_ok!(handle.pause());
    assert_ok!(handle.pause());

    tokio::time::sleep(Duration::from_millis(500)).await;
    let progress = handle.progress();
    assert!(progress.paused);
    assert_eq!(progress.succeeded, 1);
    assert_eq!(progress.pending, 2);
    assert_eq!(progress.running, 0);

    assert_ok!(handle.resume());
    assert_ok!(handle.resume());
    let progress = handle.wait_idle().await;
    assert!(!progress.paused);
    assert_eq!(progress.succeeded, 3);

    let events = drain_events(&mut events);
    let paused = events.iter().filter(|e| **e == RunnerEvent::Paused).count();
    let resumed = events.iter().filter(|e| **e == RunnerEvent::Resumed).count();
    assert_eq!(paused, 1);
    assert_eq!(resumed, 1);
}

#[tokio::test(start_paused = true)]
async fn test_pause_lets_running_jobs_finish() {
    let tracker = Arc::new(Tracker::default());
    let mut runner = JobRunner::new(config(2)).unwrap();
    runner.submit(jobs(&["a", "b", "c"], Work::taking(100))).unwrap();

    let handle = runner.start(executor(tracker.clone())).unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    handle.pause().unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert_eq!(handle.progress().succeeded, 2);
    assert_eq!(tracker.started(), ["a", "b"]);
}

// ============================================================================
// Ordering
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_equal_priorities_keep_submission_order() {
    let tracker = Arc::new(Tracker::default());
    let mut runner = JobRunner::new(config(1).with_ordering(OrderingPolicy::Ascending)).unwrap();
    runner
        .submit(vec![
            JobDescriptor::new(Work::taking(10)).with_id("A").with_priority(1),
            JobDescriptor::new(Work::taking(10)).with_id("B").with_priority(1),
            JobDescriptor::new(Work::taking(10)).with_id("C").with_priority(2),
        ])
        .unwrap();

    runner.start(executor(tracker.clone())).unwrap();
    runner.shutdown().await.unwrap();

    assert_eq!(tracker.started(), ["A", "B", "C"]);
}

#[tokio::test(start_paused = true)]
async fn test_group_by_kind_with_custom_comparator() {
    let tracker = Arc::new(Tracker::default());
    let by_kind = OrderingPolicy::custom(|a, b| a.cmp(b));
    let mut runner = JobRunner::new(config(1).with_ordering(by_kind)).unwrap();
    runner
        .submit(vec![
            JobDescriptor::new(Work::taking(1)).with_id("report.pdf").with_priority("pdf"),
            JobDescriptor::new(Work::taking(1)).with_id("notes.docx").with_priority("docx"),
            JobDescriptor::new(Work::taking(1)).with_id("summary.pdf").with_priority("pdf"),
            JobDescriptor::new(Work::taking(1)).with_id("data.csv").with_priority("csv"),
        ])
        .unwrap();

    runner.start(executor(tracker.clone())).unwrap();
    runner.shutdown().await.unwrap();

    assert_eq!(
        tracker.started(),
        ["data.csv", "notes.docx", "report.pdf", "summary.pdf"]
    );
}

// ============================================================================
// Cancellation
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_cancel_pending_job() {
    let tracker = Arc::new(Tracker::default());
    let mut runner = JobRunner::new(config(1)).unwrap();
    runner.submit(jobs(&["1", "2", "3"], Work::taking(50))).unwrap();

    let handle = runner.start(executor(tracker.clone())).unwrap();
    handle.cancel("2").unwrap();
    handle.wait_idle().await;
    let report = runner.shutdown().await.unwrap();

    assert_eq!(report.job("1").unwrap().state, JobState::Succeeded);
    assert_eq!(report.job("2").unwrap().state, JobState::Cancelled);
    assert_eq!(report.job("2").unwrap().attempt, 0);
    assert_eq!(report.job("3").unwrap().state, JobState::Succeeded);
    assert_eq!(tracker.started(), ["1", "3"]);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_running_job_cooperatively() {
    let tracker = Arc::new(Tracker::default());
    let mut runner = JobRunner::new(config(1)).unwrap();
    let work = Work {
        cooperative: true,
        ..Default::default()
    };
    runner.submit(jobs(&["watcher"], work)).unwrap();
    runner.submit(jobs(&["next"], Work::taking(10))).unwrap();

    let handle = runner.start(executor(tracker)).unwrap();
    let mut events = handle.subscribe();
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(handle.progress().running, 1);

    handle.cancel("watcher").unwrap();
    handle.wait_idle().await;

    let job = handle.job("watcher").await.unwrap();
    assert_eq!(job.state, JobState::Cancelled);
    assert_eq!(job.attempt, 1);
    assert_eq!(handle.job("next").await.unwrap().state, JobState::Succeeded);

    let events = drain_events(&mut events);
    assert!(events.contains(&RunnerEvent::CancelRequested {
        job_id: "watcher".into()
    }));
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_running_job_ignoring_signal_still_ends_cancelled() {
    let tracker = Arc::new(Tracker::default());
    let mut runner = JobRunner::new(config(1)).unwrap();
    runner.submit(jobs(&["stubborn"], Work::taking(100))).unwrap();

    let started = Instant::now();
    let handle = runner.start(executor(tracker)).unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    handle.cancel("stubborn").unwrap();
    let progress = handle.wait_idle().await;

    assert_eq!(progress.cancelled, 1);
    assert_eq!(progress.succeeded, 0);
    // The slot is held until the executor returns.
    assert!(started.elapsed() >= Duration::from_millis(100));
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_running_job_released_by_timeout() {
    let tracker = Arc::new(Tracker::default());
    let config = config(1).with_timeout(Duration::from_millis(100));
    let mut runner = JobRunner::new(config).unwrap();
    runner.submit(jobs(&["stuck"], Work::taking(10_000))).unwrap();

    let started = Instant::now();
    let handle = runner.start(executor(tracker.clone())).unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    handle.cancel("stuck").unwrap();
    let progress = handle.wait_idle().await;
    let elapsed = started.elapsed();

    assert_eq!(progress.cancelled, 1);
    assert_eq!(progress.retrying, 0);
    let job = handle.job("stuck").await.unwrap();
    assert_eq!(job.state, JobState::Cancelled);
    assert_eq!(job.attempt, 1);
    assert_eq!(tracker.attempts.load(Ordering::SeqCst), 1);
    assert!(elapsed >= Duration::from_millis(100), "elapsed {:?}", elapsed);
    assert!(elapsed < Duration::from_millis(200), "elapsed {:?}", elapsed);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_job_waiting_for_retry() {
    let tracker = Arc::new(Tracker::default());
    let config = config(1)
        .with_retry_limit(3)
        .with_backoff(BackoffPolicy::fixed(Duration::from_secs(60)));
    let mut runner = JobRunner::new(config).unwrap();
    runner.submit(jobs(&["flaky"], Work::failing(1))).unwrap();

    let started = Instant::now();
    let handle = runner.start(executor(tracker.clone())).unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    let progress = handle.progress();
    assert_eq!(progress.retrying, 1);
    assert_eq!(progress.pending, 1);

    handle.cancel("flaky").unwrap();
    let report = runner.shutdown().await.unwrap();

    assert_eq!(report.job("flaky").unwrap().state, JobState::Cancelled);
    assert_eq!(tracker.attempts.load(Ordering::SeqCst), 1);
    assert!(started.elapsed() < Duration::from_secs(60));
}

#[tokio::test(start_paused = true)]
async fn test_cancel_all() {
    let tracker = Arc::new(Tracker::default());
    let mut runner = JobRunner::new(config(1)).unwrap();
    let work = Work {
        cooperative: true,
        ..Default::default()
    };
    runner.submit(jobs(&["a", "b", "c", "d"], work)).unwrap();

    let handle = runner.start(executor(tracker.clone())).unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    handle.cancel_all().unwrap();
    let report = runner.shutdown().await.unwrap();

    assert_eq!(report.progress.cancelled, 4);
    assert_eq!(report.in_state(JobState::Cancelled).count(), 4);
    assert_eq!(tracker.started(), ["a"]);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_unknown_or_finished_job_is_ignored() {
    let tracker = Arc::new(Tracker::default());
    let mut runner = JobRunner::new(config(1)).unwrap();
    runner.submit(jobs(&["done"], Work::taking(1))).unwrap();

    let handle = runner.start(executor(tracker)).unwrap();
    handle.wait_idle().await;
    handle.cancel("done").unwrap();
    handle.cancel("never-submitted").unwrap();

    let job = handle.job("done").await.unwrap();
    assert_eq!(job.state, JobState::Succeeded);
    let err = handle.job("never-submitted").await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::JobNotFound);
}

// ============================================================================
// Lifecycle
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_submit_after_start() {
    let tracker = Arc::new(Tracker::default());
    let mut runner = JobRunner::new(config(2)).unwrap();
    runner.submit(jobs(&["first"], Work::taking(20))).unwrap();

    let handle = runner.start(executor(tracker)).unwrap();
    runner.submit(jobs(&["second", "third"], Work::taking(20))).unwrap();
    let progress = handle.wait_idle().await;

    assert_eq!(progress.total, 3);
    assert_eq!(progress.succeeded, 3);

    let err = runner.submit(jobs(&["second"], Work::taking(1))).unwrap_err();
    assert_eq!(err.code(), ErrorCode::DuplicateJob);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_right_after_late_submit_runs_the_batch() {
    let tracker = Arc::new(Tracker::default());
    let mut runner = JobRunner::new(config(2)).unwrap();
    let handle = runner.start(executor(tracker.clone())).unwrap();
    handle.wait_idle().await;

    runner.submit(jobs(&["x", "y"], Work::taking(10))).unwrap();
    let report = runner.shutdown().await.unwrap();

    assert_eq!(report.progress.total, 2);
    assert_eq!(report.jobs.len(), 2);
    assert_eq!(report.progress.succeeded, 2);
    assert_eq!(tracker.attempts.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_right_after_late_submit() {
    let tracker = Arc::new(Tracker::default());
    let mut runner = JobRunner::new(config(2)).unwrap();
    let handle = runner.start(executor(tracker.clone())).unwrap();
    handle.wait_idle().await;

    runner.submit(jobs(&["late"], Work::taking(10))).unwrap();
    handle.cancel("late").unwrap();
    handle.wait_idle().await;

    let job = handle.job("late").await.unwrap();
    assert_eq!(job.state, JobState::Cancelled);
    assert_eq!(job.attempt, 0);
    assert_eq!(tracker.attempts.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_all_right_after_late_submit() {
    let tracker = Arc::new(Tracker::default());
    let mut runner = JobRunner::new(config(2)).unwrap();
    let handle = runner.start(executor(tracker.clone())).unwrap();
    handle.wait_idle().await;

    runner.submit(jobs(&["a", "b"], Work::taking(10))).unwrap();
    handle.cancel_all().unwrap();
    let progress = handle.wait_idle().await;

    assert_eq!(progress.cancelled, 2);
    assert_eq!(progress.succeeded, 0);
    assert!(tracker.started().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_start_twice_fails() {
    let tracker = Arc::new(Tracker::default());
    let mut runner = JobRunner::new(config(1)).unwrap();
    runner.start(executor(tracker.clone())).unwrap();

    let err = runner.start(executor(tracker)).unwrap_err();
    assert_eq!(err.code(), ErrorCode::RunnerAlreadyStarted);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_drains_pending_retries() {
    let tracker = Arc::new(Tracker::default());
    let config = config(1)
        .with_retry_limit(2)
        .with_backoff(BackoffPolicy::fixed(Duration::from_secs(1)));
    let mut runner = JobRunner::new(config).unwrap();
    runner.submit(jobs(&["retry-me"], Work::failing(1))).unwrap();

    let started = Instant::now();
    let handle = runner.start(executor(tracker.clone())).unwrap();
    let report = runner.shutdown().await.unwrap();

    assert!(report.progress.finished);
    assert_eq!(report.job("retry-me").unwrap().state, JobState::Succeeded);
    assert_eq!(report.job("retry-me").unwrap().attempt, 2);
    assert!(started.elapsed() >= Duration::from_secs(1));

    let err = runner.submit(jobs(&["late"], Work::default())).unwrap_err();
    assert_eq!(err.code(), ErrorCode::RunnerShutdown);
    assert!(err.is_config_error());

    let err = handle.pause().unwrap_err();
    assert_eq!(err.code(), ErrorCode::RunnerStopped);
    assert!(handle.progress().finished);

    let err = runner.start(executor(tracker)).unwrap_err();
    assert_eq!(err.code(), ErrorCode::RunnerShutdown);

    // A second shutdown returns the same report.
    let again = runner.shutdown().await.unwrap();
    assert_eq!(again.progress, report.progress);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_resumes_paused_runner() {
    let tracker = Arc::new(Tracker::default());
    let mut runner = JobRunner::new(config(1)).unwrap();
    runner.submit(jobs(&["a", "b"], Work::taking(10))).unwrap();

    let handle = runner.start(executor(tracker)).unwrap();
    handle.pause().unwrap();
    let report = runner.shutdown().await.unwrap();

    assert_eq!(report.progress.succeeded, 2);
    assert!(!report.progress.paused);
}

#[tokio::test(start_paused = true)]
async fn test_progress_and_events() {
    let tracker = Arc::new(Tracker::default());
    let mut runner = JobRunner::new(config(2).with_retry_limit(1)).unwrap();
    runner.submit(jobs(&["ok-1", "ok-2"], Work::taking(10))).unwrap();
    runner.submit(jobs(&["flaky"], Work::failing(1))).unwrap();
    runner.submit(jobs(&["broken"], Work::failing(5))).unwrap();

    let handle = runner.start(executor(tracker)).unwrap();
    let mut events = handle.subscribe();
    handle.wait_idle().await;
    let listed: Vec<String> = handle
        .jobs()
        .await
        .unwrap()
        .into_iter()
        .map(|j| j.id.to_string())
        .collect();
    assert_eq!(listed, ["ok-1", "ok-2", "flaky", "broken"]);
    let report = runner.shutdown().await.unwrap();

    let progress = &report.progress;
    assert_eq!(progress.total, 4);
    assert_eq!(progress.succeeded, 3);
    assert_eq!(progress.failed, 1);
    assert_eq!(progress.completed(), 4);
    assert_eq!(progress.ratio(), 1.0);
    assert_eq!(progress.success_rate(), Some(0.75));
    assert!(progress.throughput_per_sec > 0.0);

    let events = drain_events(&mut events);
    let retries = events
        .iter()
        .filter(|e| matches!(e, RunnerEvent::JobRetryScheduled { .. }))
        .count();
    assert_eq!(retries, 2);
    assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 4);
    assert_eq!(events.iter().filter(|e| **e == RunnerEvent::Idle).count(), 1);

    let ids: Vec<String> = report.jobs.iter().map(|j| j.id.to_string()).collect();
    assert_eq!(ids, ["ok-1", "ok-2", "flaky", "broken"]);
}
