//! Executor collaborator contract
//!
//! The coordinator never talks to a remote service itself. It hands each
//! snapshotted submission to a [`SubmissionExecutor`] and expects exactly one
//! [`SubmissionOutcome`] back. Executors must resolve every failure into
//! [`SubmissionOutcome::Failure`]; nothing escapes as a fault.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::batch::{Submission, SubmissionError, SubmissionOutcome};

/// Capability that attempts one submission
#[async_trait]
pub trait SubmissionExecutor: Send + Sync {
    /// Attempt `submission`. May take arbitrarily long; the call is dropped
    /// if the batch is cancelled.
    async fn execute(&self, submission: Submission) -> SubmissionOutcome;
}

#[async_trait]
impl<F, Fut> SubmissionExecutor for F
where
    F: Fn(Submission) -> Fut + Send + Sync,
    Fut: Future<Output = SubmissionOutcome> + Send + 'static,
{
    async fn execute(&self, submission: Submission) -> SubmissionOutcome {
        (self)(submission).await
    }
}

/// Executor that accepts every submission immediately
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptingExecutor;

#[async_trait]
impl SubmissionExecutor for AcceptingExecutor {
    async fn execute(&self, submission: Submission) -> SubmissionOutcome {
        SubmissionOutcome::success(submission.id())
    }
}

/// Run the executor, bounding it by `timeout` when one is configured
pub(crate) async fn execute_with_timeout(
    executor: &dyn SubmissionExecutor,
    submission: Submission,
    timeout: Option<Duration>,
) -> SubmissionOutcome {
    let id = submission.id();
    let Some(limit) = timeout else {
        return executor.execute(submission).await;
    };

    match tokio::time::timeout(limit, executor.execute(submission)).await {
        Ok(outcome) => {
            debug!(submission_id = %id, "Submission resolved within timeout");
            outcome
        }
        Err(_) => {
            warn!(
                submission_id = %id,
                timeout_ms = limit.as_millis() as u64,
                "Submission timed out"
            );
            SubmissionOutcome::failure(id, SubmissionError::TimedOut(limit))
        }
    }
}
