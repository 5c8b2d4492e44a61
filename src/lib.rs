//! # Submission Queue
//!
//! A queued batch-submission coordinator. Callers enqueue submissions; a
//! periodic trigger (or the enqueue itself) starts a batch whenever no batch
//! is running; the batch fans out one concurrent execution per queued
//! submission and streams outcomes back, in completion order, to a single
//! event loop that owns all coordinator state.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use submission_queue::batch::{AcceptingExecutor, Submission};
//! use submission_queue::coordinator::{BatchCoordinator, CoordinatorConfig, CoordinatorEvent};
//!
//! # async fn example() -> submission_queue::Result<()> {
//! let config = CoordinatorConfig::default();
//! let coordinator = BatchCoordinator::with_interval_trigger(config, Arc::new(AcceptingExecutor))?;
//! let (handle, _task) = coordinator.spawn();
//!
//! let mut events = handle.subscribe();
//! handle.start()?;
//! handle.enqueue(Submission::new())?;
//!
//! while let Ok(event) = events.recv().await {
//!     if let CoordinatorEvent::BatchFinished { outcomes, .. } = event {
//!         println!("{} outcomes", outcomes.len());
//!         break;
//!     }
//! }
//! handle.cancel()?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`batch`]: submissions, outcomes, the executor contract, fan-out and relay
//! - [`coordinator`]: the state machine, its configuration and events
//! - [`trigger`]: periodic trigger sources
//! - [`metrics`]: Prometheus metrics
//! - [`testing`]: deterministic doubles for the executor and trigger

#![warn(rustdoc::missing_crate_level_docs)]

use thiserror::Error;

/// Result type for coordinator operations
pub type Result<T> = std::result::Result<T, QueueError>;

/// Main error type.
///
/// Per-submission failures are never errors; they travel as
/// [`batch::SubmissionOutcome::Failure`].
#[derive(Error, Debug)]
pub enum QueueError {
    /// The coordinator event loop is no longer running
    #[error("Coordinator is closed")]
    Closed,

    /// Configuration rejected at construction
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Metrics registration or encoding error
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// Generic error for unexpected conditions
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Submissions, outcomes, fan-out and relay
pub mod batch;

/// Batch coordinator state machine
pub mod coordinator;

/// Trigger sources
pub mod trigger;

/// Prometheus metrics
pub mod metrics;

/// Test doubles for executor and trigger
pub mod testing;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(QueueError::Closed.to_string(), "Coordinator is closed");
        assert_eq!(
            QueueError::InvalidConfig("bad".to_string()).to_string(),
            "Invalid configuration: bad"
        );
    }
}
