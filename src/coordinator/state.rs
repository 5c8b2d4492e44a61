use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::batch::{BatchId, Submission, SubmissionId, SubmissionOutcome};

/// Coarse state of the coordinator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    /// No batch in flight
    Idle,
    /// A batch is executing
    Submitting,
}

/// The batch currently executing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InFlightBatch {
    /// Identity of this batch attempt
    pub id: BatchId,
    /// Submissions captured at batch start; never changes afterwards
    pub snapshot: Vec<Submission>,
    /// Outcomes received so far, in completion order
    pub results: Vec<SubmissionOutcome>,
    /// When the batch was fanned out
    pub started_at: DateTime<Utc>,
}

impl InFlightBatch {
    pub(crate) fn new(snapshot: Vec<Submission>) -> Self {
        Self {
            id: BatchId::new(),
            snapshot,
            results: Vec::new(),
            started_at: Utc::now(),
        }
    }

    /// Number of submissions in the snapshot
    pub fn total(&self) -> usize {
        self.snapshot.len()
    }

    /// Number of outcomes received so far
    pub fn completed(&self) -> usize {
        self.results.len()
    }

    /// Whether `id` is part of the snapshot
    pub fn contains(&self, id: SubmissionId) -> bool {
        self.snapshot.iter().any(|s| s.id() == id)
    }

    /// Whether an outcome for `id` was already recorded
    pub fn has_result_for(&self, id: SubmissionId) -> bool {
        self.results.iter().any(|r| r.id() == id)
    }

    /// Ids of snapshot items whose outcome was a failure
    pub fn failed_ids(&self) -> HashSet<SubmissionId> {
        self.results
            .iter()
            .filter(|r| !r.is_success())
            .map(SubmissionOutcome::id)
            .collect()
    }
}

/// Everything the coordinator owns
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CoordinatorState {
    /// Live queue in insertion order
    pub queue: Vec<Submission>,
    /// Batch currently executing, if any
    pub in_flight: Option<InFlightBatch>,
}

impl CoordinatorState {
    /// Idle state holding `queue`
    pub fn with_queue(queue: Vec<Submission>) -> Self {
        Self {
            queue,
            in_flight: None,
        }
    }

    /// `Submitting` exactly when a batch is in flight
    pub fn phase(&self) -> Phase {
        match self.in_flight {
            Some(_) => Phase::Submitting,
            None => Phase::Idle,
        }
    }
}
