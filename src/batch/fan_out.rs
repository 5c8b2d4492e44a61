//! Concurrent fan-out of one batch
//!
//! Launches one task per snapshotted submission with no concurrency limit.
//! Each task writes its outcome into the relay the moment the executor
//! resolves, so the relay sees completion order rather than submission order.
//! The driver joins every task and, only if nothing was cancelled and every
//! outcome was delivered, writes the terminal [`RelayEvent::Finished`] marker.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, instrument, Instrument};

use crate::batch::executor::execute_with_timeout;
use crate::batch::relay::{RelayEvent, RelaySender};
use crate::batch::{BatchId, Submission, SubmissionExecutor};

/// Handle on a running fan-out
#[derive(Debug)]
pub struct FanOutHandle {
    batch_id: BatchId,
    cancel_tx: watch::Sender<bool>,
    driver: JoinHandle<()>,
}

impl FanOutHandle {
    /// Batch this fan-out executes
    pub fn batch_id(&self) -> BatchId {
        self.batch_id
    }

    /// Signal every execution of the batch to stop and tear down the driver.
    ///
    /// Idempotent. Executions still running are abandoned; no outcome or
    /// marker is written after this returns unless it was already buffered.
    pub fn cancel(&self) {
        self.cancel_tx.send_replace(true);
        self.driver.abort();
    }

    /// Whether [`FanOutHandle::cancel`] was called
    pub fn is_cancelled(&self) -> bool {
        *self.cancel_tx.borrow()
    }

    /// Whether the driver task has exited
    pub fn is_finished(&self) -> bool {
        self.driver.is_finished()
    }
}

/// Spawn the fan-out for `snapshot`, writing outcomes into `relay`.
#[instrument(skip_all, fields(batch_id = %batch_id, total = snapshot.len()))]
pub fn spawn_fan_out(
    batch_id: BatchId,
    snapshot: Vec<Submission>,
    executor: Arc<dyn SubmissionExecutor>,
    timeout: Option<Duration>,
    relay: RelaySender,
) -> FanOutHandle {
    let (cancel_tx, cancel_rx) = watch::channel(false);
    let driver = tokio::spawn(
        drive(snapshot, executor, timeout, relay, cancel_rx).instrument(tracing::Span::current()),
    );

    FanOutHandle {
        batch_id,
        cancel_tx,
        driver,
    }
}

async fn drive(
    snapshot: Vec<Submission>,
    executor: Arc<dyn SubmissionExecutor>,
    timeout: Option<Duration>,
    relay: RelaySender,
    cancel_rx: watch::Receiver<bool>,
) {
    let total = snapshot.len();
    info!(total, "Starting batch fan-out");

    let mut tasks = JoinSet::new();
    for submission in snapshot {
        let executor = Arc::clone(&executor);
        let relay = relay.clone();
        let mut cancelled = cancel_rx.clone();

        tasks.spawn(
            async move {
                let id = submission.id();
                debug!(submission_id = %id, "Submission starting");

                // A dropped handle counts as cancellation too.
                let outcome = tokio::select! {
                    biased;
                    _ = cancelled.changed() => {
                        debug!(submission_id = %id, "Submission abandoned");
                        return false;
                    }
                    outcome = execute_with_timeout(executor.as_ref(), submission, timeout) => {
                        outcome
                    }
                };

                let delivered = relay.send(RelayEvent::Received(outcome)).await;
                if !delivered {
                    debug!(submission_id = %id, "Relay closed, outcome dropped");
                }
                delivered
            }
            .in_current_span(),
        );
    }

    let mut delivered = 0usize;
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(true) => delivered += 1,
            Ok(false) => {}
            Err(e) if e.is_cancelled() => {}
            Err(e) => error!(error = %e, "Submission task panicked"),
        }
    }

    let cancelled = *cancel_rx.borrow();
    if cancelled || delivered != total {
        debug!(delivered, total, cancelled, "Batch incomplete, terminal marker withheld");
        return;
    }

    if relay.send(RelayEvent::Finished).await {
        info!(total, "Batch fan-out finished");
    }
}
