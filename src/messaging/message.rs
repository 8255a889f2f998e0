//! # Message Structures for Coordinator Queues
//!
//! Two immutable message kinds drive the coordinator: a job message asks it to
//! start one stage of a job, a task message asks it to run one task. Both may
//! be delivered more than once.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{NewTask, Task};

/// Request to start `stage` of a job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobMessage {
    pub job_id: Uuid,
    pub job_type: String,
    pub stage: i32,
    /// Ties together all stage messages of one submission in logs
    pub correlation_id: Uuid,
}

impl JobMessage {
    pub fn new(job_id: Uuid, job_type: impl Into<String>, stage: i32) -> Self {
        Self {
            job_id,
            job_type: job_type.into(),
            stage,
            correlation_id: Uuid::new_v4(),
        }
    }

    /// Message for `stage` of the same job, keeping the correlation id
    pub fn for_stage(job_id: Uuid, job_type: &str, stage: i32, correlation_id: Uuid) -> Self {
        Self {
            job_id,
            job_type: job_type.to_string(),
            stage,
            correlation_id,
        }
    }
}

/// Request to execute one task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskMessage {
    pub task_id: Uuid,
    pub job_id: Uuid,
    pub job_type: String,
    pub stage: i32,
    pub task_type: String,
    pub parameters: serde_json::Value,
    pub retry_count: i32,
}

impl TaskMessage {
    /// First delivery of a freshly created task
    pub fn for_new_task(task: &NewTask, job_type: &str) -> Self {
        Self {
            task_id: task.task_id,
            job_id: task.parent_job_id,
            job_type: job_type.to_string(),
            stage: task.stage,
            task_type: task.task_type.clone(),
            parameters: task.parameters.clone(),
            retry_count: 0,
        }
    }

    /// Re-delivery of an existing task after a retryable failure
    pub fn for_retry(task: &Task, job_type: &str, retry_count: i32) -> Self {
        Self {
            task_id: task.task_id,
            job_id: task.parent_job_id,
            job_type: job_type.to_string(),
            stage: task.stage,
            task_type: task.task_type.clone(),
            parameters: task.parameters.clone(),
            retry_count,
        }
    }
}

/// Envelope carried on the queues
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OrchestrationMessage {
    Job(JobMessage),
    Task(TaskMessage),
}

impl OrchestrationMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Job(_) => "job",
            Self::Task(_) => "task",
        }
    }

    pub fn job_id(&self) -> Uuid {
        match self {
            Self::Job(message) => message.job_id,
            Self::Task(message) => message.job_id,
        }
    }

    /// Convert to JSON for queue storage
    pub fn to_json(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::to_value(self)
    }

    /// Create from JSON read off a queue
    pub fn from_json(json: serde_json::Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(json)
    }
}

impl From<JobMessage> for OrchestrationMessage {
    fn from(message: JobMessage) -> Self {
        Self::Job(message)
    }
}

impl From<TaskMessage> for OrchestrationMessage {
    fn from(message: TaskMessage) -> Self {
        Self::Task(message)
    }
}
