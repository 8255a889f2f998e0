//! # Task Model
//!
//! The unit of independently schedulable, retryable work within one stage of
//! one job. Maps to the `jobflow_tasks` table.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::state_machine::TaskStatus;

/// A task row as seen by the coordinator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub task_id: Uuid,
    pub parent_job_id: Uuid,
    pub stage: i32,
    /// 0-based position within the stage; orders fan-in results
    pub sequence: i32,
    pub task_type: String,
    pub status: TaskStatus,
    pub parameters: serde_json::Value,
    pub result: Option<serde_json::Value>,
    pub error_message: Option<String>,
    pub retry_count: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    pub fn from_new(new_task: NewTask, now: DateTime<Utc>) -> Self {
        Self {
            task_id: new_task.task_id,
            parent_job_id: new_task.parent_job_id,
            stage: new_task.stage,
            sequence: new_task.sequence,
            task_type: new_task.task_type,
            status: TaskStatus::Queued,
            parameters: new_task.parameters,
            result: None,
            error_message: None,
            retry_count: 0,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }
}

/// New task for creation, built when its stage starts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTask {
    pub task_id: Uuid,
    pub parent_job_id: Uuid,
    pub stage: i32,
    pub sequence: i32,
    pub task_type: String,
    pub parameters: serde_json::Value,
}

impl NewTask {
    pub fn new(
        parent_job_id: Uuid,
        stage: i32,
        sequence: i32,
        task_type: impl Into<String>,
        parameters: serde_json::Value,
    ) -> Self {
        Self {
            task_id: Uuid::new_v4(),
            parent_job_id,
            stage,
            sequence,
            task_type: task_type.into(),
            parameters,
        }
    }
}

/// Result of the atomic "record result and count what is left" operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskCompletion {
    /// False when the task was already terminal (redelivery); nothing changed
    pub newly_completed: bool,
    /// Tasks of the stage still outstanding after this completion
    pub remaining_tasks: i64,
    /// Owning job's status observed inside the same operation
    pub job_status: crate::state_machine::JobStatus,
}

impl TaskCompletion {
    /// True for exactly one caller per stage: the one that completed the last task
    pub fn completed_stage(&self) -> bool {
        self.newly_completed && self.remaining_tasks == 0
    }
}
