//! Queue demo
//!
//! Enqueues a handful of submissions against a simulated executor that takes
//! a varying amount of time and rejects every third submission, then prints
//! the coordinator's events. Submissions enqueued while the first batch
//! runs are retained and picked up by the next tick. Pass a JSON config file
//! as the first argument to override the defaults; set `RUST_LOG` to adjust
//! logging.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use submission_queue::batch::{Submission, SubmissionError, SubmissionOutcome};
use submission_queue::coordinator::{
    BatchCoordinator, CoordinatorConfig, CoordinatorEvent, RequeuePolicy,
};
use submission_queue::metrics::export_metrics;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("submission_queue=debug")),
        )
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read config {}", path))?;
            serde_json::from_str(&raw).with_context(|| format!("invalid config {}", path))?
        }
        None => CoordinatorConfig::default()
            .with_tick_interval(Duration::from_secs(1))
            .with_requeue_policy(RequeuePolicy::RetainFailed),
    };

    let counter = Arc::new(AtomicU64::new(0));
    let executor = move |submission: Submission| {
        let n = counter.fetch_add(1, Ordering::SeqCst);
        async move {
            tokio::time::sleep(Duration::from_millis(100 * (n % 4 + 1))).await;
            if n % 3 == 2 {
                SubmissionOutcome::failure(
                    submission.id(),
                    SubmissionError::Rejected("simulated rejection".to_string()),
                )
            } else {
                SubmissionOutcome::success(submission.id())
            }
        }
    };

    let (handle, task) =
        BatchCoordinator::with_interval_trigger(config, Arc::new(executor))?.spawn();
    let mut events = handle.subscribe();

    println!("Submission queue demo");
    println!("=====================");

    handle.start()?;
    for _ in 0..5 {
        handle.enqueue(Submission::new())?;
    }

    let mut finished = 0;
    while finished < 2 {
        let Ok(event) = tokio::time::timeout(Duration::from_secs(10), events.recv()).await else {
            println!("no further batches");
            break;
        };
        match event? {
            CoordinatorEvent::BatchStarted { total, .. } => {
                println!("batch started with {} submissions", total)
            }
            CoordinatorEvent::Progress { completed, total, outcome, .. } => {
                let status = if outcome.is_success() { "ok" } else { "failed" };
                println!("  [{}/{}] {} -> {}", completed, total, outcome.id(), status)
            }
            CoordinatorEvent::BatchFinished { outcomes, .. } => {
                finished += 1;
                println!("batch finished, {} outcomes", outcomes.len());
            }
            CoordinatorEvent::BatchCancelled { .. } => break,
        }
    }

    handle.cancel()?;
    let state = handle.state().await?;
    println!("queue after cancel: {} submissions", state.queue.len());

    handle.shutdown()?;
    task.await?;

    println!("\n{}", export_metrics()?);
    Ok(())
}
