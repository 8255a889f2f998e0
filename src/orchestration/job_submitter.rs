//! # Job Submitter
//!
//! Entry point for new jobs: validates parameters against the registered
//! workflow, persists the job in QUEUED and sends the stage 1 job message.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{instrument, warn};

use super::context::OrchestrationContext;
use crate::error::{CoordinatorError, Result};
use crate::logging::log_job_operation;
use crate::messaging::JobMessage;
use crate::models::{Job, NewJob};

#[derive(Debug, Clone)]
pub struct JobSubmitter {
    context: Arc<OrchestrationContext>,
}

impl JobSubmitter {
    pub fn new(context: Arc<OrchestrationContext>) -> Self {
        Self { context }
    }

    /// Submit a job; nothing is persisted when validation fails
    #[instrument(skip(self, parameters))]
    pub async fn submit(&self, job_type: &str, parameters: Value) -> Result<Job> {
        let workflow =
            self.context
                .jobs
                .get(job_type)
                .ok_or_else(|| CoordinatorError::UnknownJobType {
                    job_type: job_type.to_string(),
                })?;

        let parameters = match workflow.validate(parameters) {
            Ok(parameters) => parameters,
            Err(source) => {
                warn!(job_type, error = %source, "Job parameters rejected");
                return Err(CoordinatorError::Validation {
                    job_type: job_type.to_string(),
                    source,
                });
            }
        };

        let new_job = NewJob::new(job_type, workflow.total_stages(), parameters);
        let job = self.context.store.create_job(new_job).await?;

        let message = JobMessage::new(job.job_id, job.job_type.clone(), 1);
        self.context
            .gateway
            .send(&self.context.queues.job_queue, &message.into(), Duration::ZERO)
            .await?;

        log_job_operation(
            "submit",
            job.job_id,
            &job.job_type,
            Some(1),
            "QUEUED",
            None,
        );
        Ok(job)
    }
}
