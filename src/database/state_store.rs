//! # State Store
//!
//! The single source of truth for jobs, stage progress and tasks. Every
//! coordination decision is one of these conditional operations; callers never
//! read a row, decide, and write it back.

use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use super::errors::StoreResult;
use crate::models::{Job, NewJob, NewTask, StageClaim, Task, TaskCompletion};

#[async_trait]
pub trait StateStore: Send + Sync + 'static {
    /// Insert a QUEUED job at stage 1
    async fn create_job(&self, new_job: NewJob) -> StoreResult<Job>;

    async fn get_job(&self, job_id: Uuid) -> StoreResult<Option<Job>>;

    /// QUEUED -> PROCESSING, only when the job's current stage is `stage`
    ///
    /// Any other observed state is returned as `InvalidTransition`.
    async fn start_job_stage(&self, job_id: Uuid, stage: i32) -> StoreResult<Job>;

    /// PROCESSING -> QUEUED with the cursor moved to `completed_stage + 1`
    async fn advance_job_stage(&self, job_id: Uuid, completed_stage: i32) -> StoreResult<Job>;

    /// PROCESSING -> COMPLETED, recording the aggregated result
    async fn complete_job(&self, job_id: Uuid, result: serde_json::Value) -> StoreResult<Job>;

    /// PROCESSING -> FAILED, recording the diagnosis
    async fn fail_job(&self, job_id: Uuid, error_message: &str) -> StoreResult<Job>;

    /// Create the progress counter of a stage with `task_count` outstanding
    /// tasks. Must run before any of the stage's tasks exist. Idempotent.
    async fn open_stage(&self, job_id: Uuid, stage: i32, task_count: i64) -> StoreResult<()>;

    /// Insert QUEUED tasks; one call is one transaction
    ///
    /// Tasks whose id already exists are skipped, so a batch can be written
    /// again after an ambiguous failure.
    async fn create_tasks(&self, tasks: &[NewTask]) -> StoreResult<()>;

    async fn get_task(&self, task_id: Uuid) -> StoreResult<Option<Task>>;

    /// Tasks of a job ordered by stage then sequence, optionally one stage only
    async fn list_tasks(&self, job_id: Uuid, stage: Option<i32>) -> StoreResult<Vec<Task>>;

    /// Move a task to PROCESSING. Returns false when it is already terminal.
    async fn mark_task_processing(&self, task_id: Uuid) -> StoreResult<bool>;

    /// Record the result, mark the task COMPLETED and decrement its stage
    /// counter as one atomic operation
    ///
    /// Concurrent completions of sibling tasks are serialized on the counter,
    /// so exactly one caller per stage sees `remaining_tasks == 0` with
    /// `newly_completed`. Completing a terminal task changes nothing.
    async fn complete_task(
        &self,
        task_id: Uuid,
        result: serde_json::Value,
    ) -> StoreResult<TaskCompletion>;

    /// PROCESSING -> QUEUED with `retry_count` incremented, only if the
    /// stored count still equals `expected_retry_count`
    ///
    /// Returns the new count, or `None` when another delivery got there first.
    async fn schedule_task_retry(
        &self,
        task_id: Uuid,
        expected_retry_count: i32,
        error_message: &str,
    ) -> StoreResult<Option<i32>>;

    /// Mark a non-terminal task FAILED. Returns false when it was already terminal.
    async fn fail_task(&self, task_id: Uuid, error_message: &str) -> StoreResult<bool>;

    /// Results of the COMPLETED tasks of a stage, ordered by sequence
    async fn stage_results(&self, job_id: Uuid, stage: i32) -> StoreResult<Vec<serde_json::Value>>;

    /// Take the finalization lease of a stage whose tasks have all completed
    ///
    /// A lease older than `lease` is treated as abandoned and can be taken over.
    async fn claim_stage_finalization(
        &self,
        job_id: Uuid,
        stage: i32,
        lease: Duration,
    ) -> StoreResult<StageClaim>;

    /// Give up an unfinished finalization lease
    async fn release_stage_finalization(&self, job_id: Uuid, stage: i32) -> StoreResult<()>;

    /// Record that the job has moved past the stage
    async fn mark_stage_finalized(&self, job_id: Uuid, stage: i32) -> StoreResult<()>;
}
