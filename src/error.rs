//! # Error Types
//!
//! Three tiers, matching how failures are treated at runtime:
//!
//! - **Contract violations** ([`CoordinatorError::is_contract_violation`]): invalid
//!   state transitions, malformed messages, missing registry entries. They always
//!   propagate so platform redelivery and alerting see them.
//! - **Business-logic errors** ([`TaskError`]): raised by task handlers and
//!   workflows, classified retryable/permanent by the retry policy.
//! - **Configuration errors**: fatal at startup.

use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use crate::config::ConfigurationError;
use crate::database::StoreError;
use crate::messaging::MessagingError;

/// Error raised by a task handler or a workflow descriptor
#[derive(Error, Debug)]
pub enum TaskError {
    #[error("Transient failure: {message}")]
    Transient { message: String },

    #[error("Timed out after {timeout:?}: {message}")]
    Timeout { message: String, timeout: Duration },

    #[error("Connection failure: {message}")]
    Connection { message: String },

    #[error("Transport failure: {message}")]
    Transport { message: String },

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("Resource not found: {message}")]
    NotFound { message: String },

    #[error("Contract violation: {message}")]
    ContractViolation { message: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl TaskError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient {
            message: message.into(),
        }
    }

    pub fn timeout(message: impl Into<String>, timeout: Duration) -> Self {
        Self::Timeout {
            message: message.into(),
            timeout,
        }
    }

    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    pub fn contract_violation(message: impl Into<String>) -> Self {
        Self::ContractViolation {
            message: message.into(),
        }
    }
}

/// Map I/O failures onto the task error taxonomy
impl From<std::io::Error> for TaskError {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind;

        match err.kind() {
            ErrorKind::TimedOut => Self::Timeout {
                message: err.to_string(),
                timeout: Duration::ZERO,
            },
            ErrorKind::ConnectionRefused
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::NotConnected
            | ErrorKind::BrokenPipe
            | ErrorKind::AddrNotAvailable => Self::connection(err.to_string()),
            ErrorKind::NotFound => Self::not_found(err.to_string()),
            ErrorKind::InvalidInput | ErrorKind::InvalidData => {
                Self::invalid_input(err.to_string())
            }
            ErrorKind::Interrupted | ErrorKind::WouldBlock | ErrorKind::UnexpectedEof => {
                Self::transient(err.to_string())
            }
            _ => Self::Other(anyhow::Error::new(err)),
        }
    }
}

/// Coordinator-level error
#[derive(Error, Debug)]
pub enum CoordinatorError {
    #[error("Invalid {entity} transition for {id}: {from} -> {to}")]
    InvalidTransition {
        entity: &'static str,
        id: Uuid,
        from: String,
        to: String,
    },

    #[error("Malformed message: {reason}")]
    MalformedMessage { reason: String },

    #[error("No workflow registered for job type '{job_type}'")]
    UnknownJobType { job_type: String },

    #[error("No handler registered for task type '{task_type}'")]
    UnknownTaskType { task_type: String },

    #[error("Job not found: {job_id}")]
    JobNotFound { job_id: Uuid },

    #[error("Task not found: {task_id}")]
    TaskNotFound { task_id: Uuid },

    #[error("Workflow '{job_type}' defines no stage {stage}")]
    StageNotDefined { job_type: String, stage: i32 },

    #[error("Invalid task list for stage {stage} of '{job_type}': {reason}")]
    InvalidTaskList {
        job_type: String,
        stage: i32,
        reason: String,
    },

    #[error("Stage {stage} of job {job_id} is being finalized by another delivery")]
    StageFinalizing { job_id: Uuid, stage: i32 },

    #[error("State store error: {0}")]
    Store(StoreError),

    #[error("Messaging error: {0}")]
    Messaging(#[from] MessagingError),

    #[error("Validation failed for job type '{job_type}': {source}")]
    Validation {
        job_type: String,
        #[source]
        source: TaskError,
    },

    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),
}

impl CoordinatorError {
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedMessage {
            reason: reason.into(),
        }
    }

    /// Contract violations are bugs, not business failures: they must never be
    /// caught and converted into job/task state.
    pub fn is_contract_violation(&self) -> bool {
        matches!(
            self,
            Self::InvalidTransition { .. }
                | Self::MalformedMessage { .. }
                | Self::UnknownJobType { .. }
                | Self::UnknownTaskType { .. }
                | Self::JobNotFound { .. }
                | Self::TaskNotFound { .. }
                | Self::StageNotDefined { .. }
                | Self::InvalidTaskList { .. }
        )
    }
}

impl From<StoreError> for CoordinatorError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::InvalidTransition {
                entity,
                id,
                from,
                to,
            } => Self::InvalidTransition {
                entity,
                id,
                from,
                to,
            },
            StoreError::NotFound { entity: "job", id } => Self::JobNotFound { job_id: id },
            StoreError::NotFound { entity: "task", id } => Self::TaskNotFound { task_id: id },
            other => Self::Store(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, CoordinatorError>;
