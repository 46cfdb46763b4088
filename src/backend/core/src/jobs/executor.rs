//! The executor contract.

use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;

use super::{JobContext, JobResult};

/// Performs the actual work for a job.
///
/// The runner never interprets the payload. Each attempt gets a fresh
/// [`JobContext`] whose cancellation token is triggered by `cancel` /
/// `cancel_all`; honouring it is up to the executor.
///
/// Any async closure of the right shape is an executor:
///
/// ```rust,ignore
/// let handle = runner.start(|ctx: JobContext, doc: Arc<Document>| async move {
///     analyse(&doc).await.map_err(|e| JobError::retryable(e.to_string()))
/// })?;
/// ```
#[async_trait]
pub trait Executor<P>: Send + Sync + 'static
where
    P: Send + Sync + 'static,
{
    /// Execute one attempt.
    ///
    /// # Errors
    ///
    /// Return `JobError::retryable()` for transient failures that should be
    /// retried, `JobError::fatal()` for permanent ones, and
    /// `JobError::cancelled()` after observing cancellation.
    async fn execute(&self, ctx: JobContext, payload: Arc<P>) -> JobResult;
}

#[async_trait]
impl<P, F, Fut> Executor<P> for F
where
    P: Send + Sync + 'static,
    F: Fn(JobContext, Arc<P>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = JobResult> + Send + 'static,
{
    async fn execute(&self, ctx: JobContext, payload: Arc<P>) -> JobResult {
        (self)(ctx, payload).await
    }
}
