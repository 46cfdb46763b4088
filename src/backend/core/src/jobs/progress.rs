//! Aggregate progress reporting.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;

/// Point-in-time view of a run, published after every state change.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub total: usize,
    /// Includes jobs waiting out a retry delay
    pub pending: usize,
    /// Subset of `pending` waiting out a retry delay
    pub retrying: usize,
    pub running: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub cancelled: usize,
    /// Highest number of simultaneously running jobs observed
    pub peak_running: usize,
    pub paused: bool,
    /// Terminal transitions per second over the throughput window
    pub throughput_per_sec: f64,
    /// Set once the coordinating loop has exited
    pub finished: bool,
}

impl ProgressSnapshot {
    /// Jobs in a terminal state.
    pub fn completed(&self) -> usize {
        self.succeeded + self.failed + self.cancelled
    }

    /// `completed / total`, or 0 when nothing was submitted.
    pub fn ratio(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.completed() as f64 / self.total as f64
        }
    }

    /// No job is pending or running.
    pub fn is_idle(&self) -> bool {
        self.pending == 0 && self.running == 0
    }

    /// Share of finished jobs that succeeded. Cancelled jobs do not count.
    pub fn success_rate(&self) -> Option<f64> {
        let decided = self.succeeded + self.failed;
        if decided == 0 {
            None
        } else {
            Some(self.succeeded as f64 / decided as f64)
        }
    }
}

/// Sliding window of terminal transitions.
#[derive(Debug)]
pub(crate) struct ThroughputWindow {
    window: Duration,
    completions: VecDeque<Instant>,
}

impl ThroughputWindow {
    pub(crate) fn new(window: Duration) -> Self {
        Self {
            window,
            completions: VecDeque::new(),
        }
    }

    pub(crate) fn record(&mut self, at: Instant) {
        self.completions.push_back(at);
        self.prune(at);
    }

    /// Completions per second inside the window ending at `now`.
    pub(crate) fn rate(&mut self, now: Instant) -> f64 {
        self.prune(now);
        self.completions.len() as f64 / self.window.as_secs_f64()
    }

    fn prune(&mut self, now: Instant) {
        while let Some(&oldest) = self.completions.front() {
            if now.duration_since(oldest) > self.window {
                self.completions.pop_front();
            } else {
                break;
            }
        }
    }
}
