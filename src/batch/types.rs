use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Unique identity of a submission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubmissionId(Uuid);

impl SubmissionId {
    /// Mint a fresh random identifier
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Underlying UUID
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for SubmissionId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for SubmissionId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl fmt::Display for SubmissionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Identity of one batch attempt, minted when the batch starts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BatchId(Uuid);

impl BatchId {
    pub(crate) fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A queued unit of work
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Submission {
    id: SubmissionId,
}

impl Submission {
    /// Create a submission with a freshly minted id
    pub fn new() -> Self {
        Self {
            id: SubmissionId::new(),
        }
    }

    /// Create a submission for an existing id
    pub fn with_id(id: impl Into<SubmissionId>) -> Self {
        Self { id: id.into() }
    }

    /// Identity of this submission
    pub fn id(&self) -> SubmissionId {
        self.id
    }
}

impl Default for Submission {
    fn default() -> Self {
        Self::new()
    }
}

/// Why a single submission failed.
///
/// Failures are data carried in [`SubmissionOutcome::Failure`], never
/// propagated as crate errors.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubmissionError {
    #[error("submission rejected: {0}")]
    Rejected(String),

    #[error("transport failure: {0}")]
    Transport(String),

    #[error("submission timed out after {0:?}")]
    TimedOut(Duration),
}

/// Outcome of attempting one submission within a batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubmissionOutcome {
    /// The executor accepted the submission
    Success { id: SubmissionId },
    /// The executor could not deliver the submission
    Failure {
        id: SubmissionId,
        cause: SubmissionError,
    },
}

impl SubmissionOutcome {
    /// Outcome of a submission the remote side accepted
    pub fn success(id: SubmissionId) -> Self {
        Self::Success { id }
    }

    /// Outcome of a submission that failed with `cause`
    pub fn failure(id: SubmissionId, cause: SubmissionError) -> Self {
        Self::Failure { id, cause }
    }

    /// Identity of the submission this outcome answers
    pub fn id(&self) -> SubmissionId {
        match self {
            Self::Success { id } | Self::Failure { id, .. } => *id,
        }
    }

    /// Whether the submission was accepted
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub(crate) fn status_label(&self) -> &'static str {
        match self {
            Self::Success { .. } => "success",
            Self::Failure {
                cause: SubmissionError::TimedOut(_),
                ..
            } => "timed_out",
            Self::Failure { .. } => "failure",
        }
    }
}
