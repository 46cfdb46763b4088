//! Events emitted by the coordinating loop.

use serde::{Deserialize, Serialize};

use super::{JobError, JobId};

/// Lifecycle events, broadcast to every subscriber of a run.
///
/// Subscribers that fall behind lose the oldest events; the progress
/// snapshot stays authoritative.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RunnerEvent {
    JobSubmitted {
        job_id: JobId,
    },
    JobStarted {
        job_id: JobId,
        attempt: u32,
    },
    JobSucceeded {
        job_id: JobId,
        attempt: u32,
        duration_ms: u64,
    },
    JobRetryScheduled {
        job_id: JobId,
        attempt: u32,
        delay_ms: u64,
        error: JobError,
    },
    JobFailed {
        job_id: JobId,
        attempt: u32,
        error: JobError,
    },
    JobCancelled {
        job_id: JobId,
        attempt: u32,
    },
    /// Cancellation was signalled to a running attempt
    CancelRequested {
        job_id: JobId,
    },
    Paused,
    Resumed,
    /// Nothing pending or running
    Idle,
}

impl RunnerEvent {
    pub fn job_id(&self) -> Option<&JobId> {
        match self {
            Self::JobSubmitted { job_id }
            | Self::JobStarted { job_id, .. }
            | Self::JobSucceeded { job_id, .. }
            | Self::JobRetryScheduled { job_id, .. }
            | Self::JobFailed { job_id, .. }
            | Self::JobCancelled { job_id, .. }
            | Self::CancelRequested { job_id } => Some(job_id),
            Self::Paused | Self::Resumed | Self::Idle => None,
        }
    }

    /// Whether the event records a job reaching a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::JobSucceeded { .. } | Self::JobFailed { .. } | Self::JobCancelled { .. }
        )
    }
}
