//! # Job Model
//!
//! A job is one submitted, multi-stage unit of work tracked to a terminal state.
//!
//! ## Database Schema
//!
//! Maps to the `jobflow_jobs` table:
//! - `job_id`: Primary key (UUID)
//! - `job_type`: Registry key of the workflow descriptor
//! - `status`: `QUEUED | PROCESSING | COMPLETED | FAILED`
//! - `current_stage` / `total_stages`: 1-based stage cursor
//! - `parameters` / `result`: opaque JSONB payloads
//!
//! Rows are created on submission, mutated only by the coordinator and never
//! deleted by it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::state_machine::JobStatus;

/// A job row as seen by the coordinator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub job_id: Uuid,
    pub job_type: String,
    pub status: JobStatus,
    /// 1-based index of the stage currently queued or running
    pub current_stage: i32,
    pub total_stages: i32,
    pub parameters: serde_json::Value,
    /// Aggregated result, set on completion
    pub result: Option<serde_json::Value>,
    /// Failure diagnosis, set when the job fails
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Build the initial QUEUED row for a submission
    pub fn from_new(new_job: NewJob, now: DateTime<Utc>) -> Self {
        Self {
            job_id: new_job.job_id,
            job_type: new_job.job_type,
            status: JobStatus::Queued,
            current_stage: 1,
            total_stages: new_job.total_stages,
            parameters: new_job.parameters,
            result: None,
            error_message: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    /// Whether `stage` is the last stage of this job
    pub fn is_final_stage(&self, stage: i32) -> bool {
        stage >= self.total_stages
    }
}

/// New job for creation (without generated timestamps)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewJob {
    pub job_id: Uuid,
    pub job_type: String,
    pub total_stages: i32,
    pub parameters: serde_json::Value,
}

impl NewJob {
    pub fn new(job_type: impl Into<String>, total_stages: i32, parameters: serde_json::Value) -> Self {
        Self {
            job_id: Uuid::new_v4(),
            job_type: job_type.into(),
            total_stages,
            parameters,
        }
    }
}
