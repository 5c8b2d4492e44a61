use serde::{Deserialize, Serialize};

use crate::batch::{BatchId, SubmissionOutcome};

/// Notification published to observers.
///
/// Events only describe what the coordinator did; receiving or dropping one
/// has no effect on coordinator state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CoordinatorEvent {
    /// A batch snapshot was taken and fan-out began
    BatchStarted { batch_id: BatchId, total: usize },

    /// One outcome of the running batch arrived
    Progress {
        batch_id: BatchId,
        completed: usize,
        total: usize,
        outcome: SubmissionOutcome,
    },

    /// The batch ran to completion; carries every outcome in arrival order
    BatchFinished {
        batch_id: BatchId,
        outcomes: Vec<SubmissionOutcome>,
    },

    /// The batch was cancelled before finishing
    BatchCancelled {
        batch_id: BatchId,
        completed: usize,
        total: usize,
    },
}

impl CoordinatorEvent {
    pub fn batch_id(&self) -> BatchId {
        match self {
            Self::BatchStarted { batch_id, .. }
            | Self::Progress { batch_id, .. }
            | Self::BatchFinished { batch_id, .. }
            | Self::BatchCancelled { batch_id, .. } => *batch_id,
        }
    }
}
