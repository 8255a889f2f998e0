//! # Orchestration Engine
//!
//! Drives jobs through their stages. Components share one
//! [`OrchestrationContext`] and keep no state of their own.
//!
//! ## Core Components
//!
//! - **Coordinator**: façade with the job-message and task-message entry points
//! - **StageInitializer**: starts a stage and builds its task list
//! - **TaskEnqueuer**: persists tasks and sends task messages, batched for large stages
//! - **ResultProcessor**: executes a task and records success, retry or failure
//! - **JobFinalizer**: advances a job past a completed stage or finishes it
//! - **RetryPolicy**: classifies task errors and computes backoff
//! - **JobSubmitter**: validates and enqueues new jobs
//! - **QueueConsumer**: polls both queues and acks handled messages

pub mod consumer;
pub mod context;
pub mod coordinator;
pub mod fan_in;
pub mod job_finalizer;
pub mod job_submitter;
pub mod result_processor;
pub mod retry_policy;
pub mod stage_initializer;
pub mod task_enqueuer;
pub mod types;

pub use consumer::{PollSummary, QueueConsumer};
pub use context::OrchestrationContext;
pub use coordinator::{Coordinator, MessageOutcome};
pub use job_finalizer::JobFinalizer;
pub use job_submitter::JobSubmitter;
pub use result_processor::ResultProcessor;
pub use retry_policy::{ErrorCategory, ErrorClass, RetryDecision, RetryPolicy};
pub use stage_initializer::StageInitializer;
pub use task_enqueuer::TaskEnqueuer;
pub use types::{JobOutcome, StageTransition, TaskOutcome};
