//! # Orchestration Outcomes
//!
//! What each coordinator entry point did with a message. Returned to the
//! queue consumer (which only cares about `Ok` vs `Err`) and to tests.

use std::time::Duration;

use uuid::Uuid;

use crate::state_machine::JobStatus;

/// What happened once the last task of a stage finished
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageTransition {
    /// Job re-queued and the job message for `next_stage` sent
    Advanced { next_stage: i32 },
    /// Final stage aggregated and the job completed
    JobCompleted,
    /// Aggregation failed and the job was marked FAILED
    JobFailed { reason: String },
    /// The job was no longer PROCESSING this stage (a sibling failed it)
    NotAdvanced { job_status: JobStatus },
}

/// Result of handling a job message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    /// Stage started and its task messages sent
    TasksEnqueued {
        job_id: Uuid,
        stage: i32,
        task_count: usize,
    },
    /// Stage produced no tasks and was completed on the spot
    EmptyStage {
        job_id: Uuid,
        stage: i32,
        transition: StageTransition,
    },
    /// The workflow could not build the stage's task list
    JobFailed {
        job_id: Uuid,
        stage: i32,
        reason: String,
    },
}

/// Result of handling a task message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    /// Task was already COMPLETED or FAILED; nothing was executed or changed
    AlreadyTerminal { task_id: Uuid },
    /// Owning job is terminal; the task was not executed
    JobNotActive { task_id: Uuid, job_status: JobStatus },
    /// Result recorded; sibling tasks are still outstanding
    Completed { task_id: Uuid, remaining_tasks: i64 },
    /// Result recorded and this was the last task of its stage
    StageCompleted {
        task_id: Uuid,
        stage: i32,
        transition: StageTransition,
    },
    /// Retryable failure; the task was re-enqueued with a delivery delay
    RetryScheduled {
        task_id: Uuid,
        retry_count: i32,
        delay: Duration,
    },
    /// Retryable failure already handled by a concurrent delivery
    RetrySuperseded { task_id: Uuid },
    /// Permanent failure; `job_failed` is false when failing the job did not succeed
    Failed {
        task_id: Uuid,
        reason: String,
        job_failed: bool,
    },
}
