//! # Coordinator
//!
//! Stateless façade over the orchestration components. It has exactly two
//! message entry points, one per queue, plus job submission:
//!
//! - [`Coordinator::handle_job_message`]: start a stage ([`StageInitializer`])
//! - [`Coordinator::handle_task_message`]: run a task and record its outcome
//!   ([`ResultProcessor`])
//! - [`Coordinator::submit`]: create a job and enqueue its first stage
//!
//! All job and task state lives in the [`StateStore`]; any number of
//! coordinators may consume the same queues.

use std::sync::Arc;

use serde_json::Value;
use tracing::info;

use super::context::OrchestrationContext;
use super::job_finalizer::JobFinalizer;
use super::job_submitter::JobSubmitter;
use super::result_processor::ResultProcessor;
use super::stage_initializer::StageInitializer;
use super::task_enqueuer::TaskEnqueuer;
use super::types::{JobOutcome, TaskOutcome};
use crate::config::{ConfigurationError, JobflowConfig};
use crate::database::StateStore;
use crate::error::Result;
use crate::messaging::{JobMessage, OrchestrationMessage, QueueGateway, TaskMessage};
use crate::models::Job;
use crate::registry::{JobRegistry, TaskHandlerRegistry};

/// What handling one queue message produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageOutcome {
    Job(JobOutcome),
    Task(TaskOutcome),
}

#[derive(Debug, Clone)]
pub struct Coordinator {
    context: Arc<OrchestrationContext>,
    stage_initializer: StageInitializer,
    result_processor: ResultProcessor,
    submitter: JobSubmitter,
}

impl Coordinator {
    /// Wire the coordinator, rejecting configurations it cannot run with
    ///
    /// Fails when the config is invalid or a registered workflow names a task
    /// type with no handler.
    pub fn new(
        store: Arc<dyn StateStore>,
        gateway: Arc<dyn QueueGateway>,
        jobs: Arc<JobRegistry>,
        handlers: Arc<TaskHandlerRegistry>,
        config: &JobflowConfig,
    ) -> std::result::Result<Self, ConfigurationError> {
        config.validate()?;
        jobs.verify_handlers(&handlers)?;

        let context = Arc::new(OrchestrationContext::new(
            store, gateway, jobs, handlers, config,
        ));
        let finalizer = JobFinalizer::new(Arc::clone(&context));
        let enqueuer = TaskEnqueuer::new(Arc::clone(&context));

        Ok(Self {
            stage_initializer: StageInitializer::new(
                Arc::clone(&context),
                enqueuer,
                finalizer.clone(),
            ),
            result_processor: ResultProcessor::new(Arc::clone(&context), finalizer),
            submitter: JobSubmitter::new(Arc::clone(&context)),
            context,
        })
    }

    pub fn context(&self) -> &Arc<OrchestrationContext> {
        &self.context
    }

    /// Create the job and task queues if they are missing
    pub async fn ensure_queues(&self) -> Result<()> {
        let queues = &self.context.queues;
        for queue in [&queues.job_queue, &queues.task_queue] {
            self.context.gateway.ensure_queue(queue).await?;
        }
        info!(
            job_queue = %queues.job_queue,
            task_queue = %queues.task_queue,
            provider = self.context.gateway.provider_name(),
            "✅ Coordinator queues ready"
        );
        Ok(())
    }

    pub async fn submit(&self, job_type: &str, parameters: Value) -> Result<Job> {
        self.submitter.submit(job_type, parameters).await
    }

    pub async fn handle_job_message(&self, message: &JobMessage) -> Result<JobOutcome> {
        self.stage_initializer.start_stage(message).await
    }

    pub async fn handle_task_message(&self, message: &TaskMessage) -> Result<TaskOutcome> {
        self.result_processor.process_task(message).await
    }

    /// Dispatch a decoded queue message to the matching entry point
    pub async fn handle_message(&self, message: &OrchestrationMessage) -> Result<MessageOutcome> {
        match message {
            OrchestrationMessage::Job(job) => {
                self.handle_job_message(job).await.map(MessageOutcome::Job)
            }
            OrchestrationMessage::Task(task) => self
                .handle_task_message(task)
                .await
                .map(MessageOutcome::Task),
        }
    }
}
