use serde::{Deserialize, Serialize};
use std::fmt;

use super::errors::{StateMachineError, StateMachineResult};

/// Job lifecycle status
///
/// A job cycles QUEUED -> PROCESSING once per stage and ends in exactly one
/// terminal state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    /// Waiting for the job message of its current stage
    #[default]
    Queued,
    /// Current stage's tasks have been created and are running
    Processing,
    /// All stages finished and the aggregated result is recorded
    Completed,
    /// A task failed permanently or the workflow rejected the job
    Failed,
}

impl JobStatus {
    /// Check if this is a terminal state (no further transitions allowed)
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Whether `next` is a legal successor of this status
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (Self::Queued, Self::Processing)
                | (Self::Processing, Self::Queued)
                | (Self::Processing, Self::Completed)
                | (Self::Processing, Self::Failed)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "QUEUED",
            Self::Processing => "PROCESSING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobStatus {
    type Err = StateMachineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "QUEUED" => Ok(Self::Queued),
            "PROCESSING" => Ok(Self::Processing),
            "COMPLETED" => Ok(Self::Completed),
            "FAILED" => Ok(Self::Failed),
            _ => Err(StateMachineError::UnknownStatus {
                entity: "job",
                value: s.to_string(),
            }),
        }
    }
}

/// Task lifecycle status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    /// Persisted and enqueued (or re-enqueued for a retry)
    #[default]
    Queued,
    /// A coordinator invocation is executing the handler
    Processing,
    /// Result recorded
    Completed,
    /// Failed permanently or ran out of retries
    Failed,
}

impl TaskStatus {
    /// Check if this is a terminal state (no further transitions allowed)
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Whether `next` is a legal successor of this status.
    ///
    /// PROCESSING -> PROCESSING is allowed: a message redelivered after a
    /// crashed invocation must be able to run the handler again.
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        matches!(
            (self, next),
            (Self::Queued, Self::Processing)
                | (Self::Processing, Self::Processing)
                | (Self::Processing, Self::Completed)
                | (Self::Processing, Self::Failed)
                | (Self::Processing, Self::Queued)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "QUEUED",
            Self::Processing => "PROCESSING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = StateMachineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "QUEUED" => Ok(Self::Queued),
            "PROCESSING" => Ok(Self::Processing),
            "COMPLETED" => Ok(Self::Completed),
            "FAILED" => Ok(Self::Failed),
            _ => Err(StateMachineError::UnknownStatus {
                entity: "task",
                value: s.to_string(),
            }),
        }
    }
}

/// Reject a job transition outside the allowed order
pub fn ensure_job_transition(from: JobStatus, to: JobStatus) -> StateMachineResult<()> {
    if from.can_transition_to(to) {
        Ok(())
    } else {
        Err(StateMachineError::InvalidTransition {
            entity: "job",
            from: from.to_string(),
            to: to.to_string(),
        })
    }
}

/// Reject a task transition outside the allowed order
pub fn ensure_task_transition(from: TaskStatus, to: TaskStatus) -> StateMachineResult<()> {
    if from.can_transition_to(to) {
        Ok(())
    } else {
        Err(StateMachineError::InvalidTransition {
            entity: "task",
            from: from.to_string(),
            to: to.to_string(),
        })
    }
}
