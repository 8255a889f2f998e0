//! # State Store Error Types

use thiserror::Error;
use uuid::Uuid;

use crate::models::Job;
use crate::state_machine::{ensure_job_transition, JobStatus, StateMachineError};

/// Errors raised by [`StateStore`](super::StateStore) implementations
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: Uuid },

    #[error("Invalid {entity} transition for {id}: {from} -> {to}")]
    InvalidTransition {
        entity: &'static str,
        id: Uuid,
        from: String,
        to: String,
    },

    #[error("Stage {stage} of job {job_id} has no progress record")]
    StageNotOpen { job_id: Uuid, stage: i32 },

    #[error("Corrupt {entity} row: {reason}")]
    CorruptRow { entity: &'static str, reason: String },
}

impl StoreError {
    pub fn job_not_found(id: Uuid) -> Self {
        Self::NotFound { entity: "job", id }
    }

    pub fn task_not_found(id: Uuid) -> Self {
        Self::NotFound { entity: "task", id }
    }

    /// Attach an identifier to a state machine rejection
    pub fn from_state_machine(id: Uuid, err: StateMachineError) -> Self {
        match err {
            StateMachineError::InvalidTransition { entity, from, to } => Self::InvalidTransition {
                entity,
                id,
                from,
                to,
            },
            StateMachineError::UnknownStatus { entity, value } => Self::CorruptRow {
                entity,
                reason: format!("unknown status '{value}'"),
            },
        }
    }

    /// Explain why `job` cannot move to `to` at `stage`: either the status
    /// change itself is illegal or the job sits at another stage
    pub fn rejected_job_transition(job: &Job, to: JobStatus, stage: i32) -> Self {
        match ensure_job_transition(job.status, to) {
            Err(err) => Self::from_state_machine(job.job_id, err),
            Ok(()) => Self::InvalidTransition {
                entity: "job",
                id: job.job_id,
                from: format!("{} (stage {})", job.status, job.current_stage),
                to: format!("{to} (stage {stage})"),
            },
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;
