//! Simulated document processing.
//!
//! Each attempt "extracts" a document by sleeping for its `work_ms`, then
//! fails for the first `failures` attempts. Hanging documents only finish
//! when cancelled or timed out.

use batchflow_core::jobs::{JobContext, JobError, JobResult};
use std::sync::Arc;

use crate::manifest::Document;

/// Executor for [`Document`] jobs.
pub async fn process_document(ctx: JobContext, document: Arc<Document>) -> JobResult {
    if document.hang {
        ctx.log_warn("document stalled");
        ctx.cancelled().await;
        return Err(JobError::cancelled("stalled document cancelled"));
    }

    ctx.cancellable(tokio::time::sleep(document.work())).await?;

    if ctx.attempt() <= document.failures {
        let kind = document.kind();
        let error = if document.fatal {
            JobError::fatal(format!("unsupported {} layout in {}", kind, document.display_name()))
                .with_code("UNSUPPORTED_LAYOUT")
        } else {
            JobError::retryable(format!(
                "{} extraction failed on attempt {}",
                kind,
                ctx.attempt()
            ))
            .with_code("EXTRACTION_FAILED")
        };
        return Err(error);
    }

    ctx.log_info("document processed");
    Ok(())
}
