//! # Stage Initializer
//!
//! Handles a job message: moves the job to PROCESSING for the named stage,
//! builds the stage's task list and hands it to the [`TaskEnqueuer`].
//!
//! The QUEUED -> PROCESSING transition is the idempotency gate for job
//! messages. A redelivered message whose job already left QUEUED for that
//! stage fails with `InvalidTransition` and must not be swallowed.
//!
//! Once the gate is passed, a redelivery can no longer restart the stage, so
//! infrastructure failures past it are retried in place. If they persist the
//! job is failed rather than left PROCESSING with no tasks to drive it.

use std::sync::Arc;

use serde_json::Value;
use tracing::{error, info, instrument};
use uuid::Uuid;

use super::context::OrchestrationContext;
use super::fan_in;
use super::job_finalizer::JobFinalizer;
use super::task_enqueuer::TaskEnqueuer;
use super::types::{JobOutcome, StageTransition};
use crate::error::{CoordinatorError, Result};
use crate::logging::log_job_operation;
use crate::messaging::JobMessage;
use crate::models::{Job, NewTask, Parallelism, StageDescriptor};
use crate::state_machine::JobStatus;
use crate::registry::WorkflowDescriptor;

#[derive(Debug, Clone)]
pub struct StageInitializer {
    context: Arc<OrchestrationContext>,
    enqueuer: TaskEnqueuer,
    finalizer: JobFinalizer,
}

impl StageInitializer {
    pub fn new(
        context: Arc<OrchestrationContext>,
        enqueuer: TaskEnqueuer,
        finalizer: JobFinalizer,
    ) -> Self {
        Self {
            context,
            enqueuer,
            finalizer,
        }
    }

    #[instrument(skip(self, message), fields(job_id = %message.job_id, stage = message.stage, correlation_id = %message.correlation_id))]
    pub async fn start_stage(&self, message: &JobMessage) -> Result<JobOutcome> {
        let store = &self.context.store;
        let job = store
            .get_job(message.job_id)
            .await?
            .ok_or(CoordinatorError::JobNotFound {
                job_id: message.job_id,
            })?;

        if job.job_type != message.job_type {
            return Err(CoordinatorError::malformed(format!(
                "job message for {} names job type '{}' but the job is '{}'",
                job.job_id, message.job_type, job.job_type
            )));
        }

        let workflow = self
            .context
            .jobs
            .get(&job.job_type)
            .ok_or_else(|| CoordinatorError::UnknownJobType {
                job_type: job.job_type.clone(),
            })?;
        let descriptor = workflow
            .stage(message.stage)
            .filter(|_| message.stage <= job.total_stages)
            .cloned()
            .ok_or_else(|| CoordinatorError::StageNotDefined {
                job_type: job.job_type.clone(),
                stage: message.stage,
            })?;

        let job = store.start_job_stage(job.job_id, message.stage).await?;
        log_job_operation(
            "start_stage",
            job.job_id,
            &job.job_type,
            Some(message.stage),
            "PROCESSING",
            None,
        );

        match self
            .run_started_stage(&job, workflow.as_ref(), &descriptor, message)
            .await
        {
            Err(err) if !err.is_contract_violation() => {
                self.abandon_stage(&job, message.stage, err).await
            }
            outcome => outcome,
        }
    }

    async fn run_started_stage(
        &self,
        job: &Job,
        workflow: &dyn WorkflowDescriptor,
        descriptor: &StageDescriptor,
        message: &JobMessage,
    ) -> Result<JobOutcome> {
        let store = &self.context.store;
        let task_parameters = match self
            .stage_task_parameters(job, workflow, descriptor)
            .await?
        {
            Ok(parameters) => parameters,
            Err(reason) => {
                error!(job_id = %job.job_id, stage = message.stage, reason = %reason, "❌ Workflow could not build stage tasks");
                store.fail_job(job.job_id, &reason).await?;
                log_job_operation(
                    "fail",
                    job.job_id,
                    &job.job_type,
                    Some(message.stage),
                    "FAILED",
                    Some(&reason),
                );
                return Ok(JobOutcome::JobFailed {
                    job_id: job.job_id,
                    stage: message.stage,
                    reason,
                });
            }
        };

        let tasks = task_parameters
            .into_iter()
            .enumerate()
            .map(|(index, parameters)| -> Result<NewTask> {
                let sequence = task_sequence(&job.job_type, descriptor.stage_number, index)?;
                Ok(NewTask::new(
                    job.job_id,
                    descriptor.stage_number,
                    sequence,
                    descriptor.task_type.clone(),
                    parameters,
                ))
            })
            .collect::<Result<Vec<NewTask>>>()?;

        if tasks.is_empty() {
            info!(job_id = %job.job_id, stage = message.stage, "Stage produced no tasks; completing it directly");
            let transition = self
                .finish_empty_stage(job.job_id, message.stage, message.correlation_id)
                .await?;
            return Ok(JobOutcome::EmptyStage {
                job_id: job.job_id,
                stage: message.stage,
                transition,
            });
        }

        let task_count = self
            .enqueuer
            .enqueue_stage(job, message.stage, tasks)
            .await?;
        Ok(JobOutcome::TasksEnqueued {
            job_id: job.job_id,
            stage: message.stage,
            task_count,
        })
    }

    async fn finish_empty_stage(
        &self,
        job_id: Uuid,
        stage: i32,
        correlation_id: Uuid,
    ) -> Result<StageTransition> {
        let store = &self.context.store;
        let finalizer = &self.finalizer;
        let transition = self
            .context
            .enqueue_retry
            .retry_in_place("finish empty stage", || async move {
                store.open_stage(job_id, stage, 0).await?;
                finalizer
                    .finalize_stage(job_id, stage, Some(correlation_id))
                    .await
            })
            .await?;

        Ok(transition.unwrap_or(StageTransition::NotAdvanced {
            job_status: JobStatus::Processing,
        }))
    }

    /// Fail a job whose started stage could not be set up
    ///
    /// When failing the job errors too, both errors are logged and the
    /// original one is returned.
    async fn abandon_stage(
        &self,
        job: &Job,
        stage: i32,
        err: CoordinatorError,
    ) -> Result<JobOutcome> {
        let reason = format!("stage {stage} could not be started: {err}");
        match self.context.store.fail_job(job.job_id, &reason).await {
            Ok(_) => {
                error!(job_id = %job.job_id, stage, error = %err, "❌ Stage setup kept failing; job failed");
                log_job_operation(
                    "fail",
                    job.job_id,
                    &job.job_type,
                    Some(stage),
                    "FAILED",
                    Some(&reason),
                );
                Ok(JobOutcome::JobFailed {
                    job_id: job.job_id,
                    stage,
                    reason,
                })
            }
            Err(cleanup_error) => {
                error!(
                    job_id = %job.job_id,
                    stage,
                    original_error = %err,
                    cleanup_error = %cleanup_error,
                    "❌ Failed to mark job FAILED after stage setup failure"
                );
                Err(err)
            }
        }
    }

    /// Task parameters for the stage
    ///
    /// The outer error is a coordinator failure; the inner `Err` is a
    /// workflow (business) failure that fails the job.
    async fn stage_task_parameters(
        &self,
        job: &Job,
        workflow: &dyn WorkflowDescriptor,
        descriptor: &StageDescriptor,
    ) -> Result<std::result::Result<Vec<Value>, String>> {
        let stage = descriptor.stage_number;
        let prior_results = if stage > 1 {
            let store = &self.context.store;
            let job_id = job.job_id;
            self.context
                .enqueue_retry
                .retry_in_place("load previous stage results", || async move {
                    Ok::<_, CoordinatorError>(store.stage_results(job_id, stage - 1).await?)
                })
                .await?
        } else {
            Vec::new()
        };

        match descriptor.parallelism {
            Parallelism::FanIn => Ok(Ok(vec![fan_in::aggregation_parameters(
                job,
                stage,
                prior_results,
            )])),
            Parallelism::Single | Parallelism::FanOut => {
                let parameters = match workflow.tasks_for_stage(stage, &job.parameters, &prior_results)
                {
                    Ok(parameters) => parameters,
                    Err(err) => {
                        return Ok(Err(format!(
                            "workflow failed to build tasks for stage {stage}: {err}"
                        )))
                    }
                };

                if descriptor.parallelism == Parallelism::Single && parameters.len() != 1 {
                    return Err(CoordinatorError::InvalidTaskList {
                        job_type: job.job_type.clone(),
                        stage,
                        reason: format!("SINGLE stage produced {} tasks", parameters.len()),
                    });
                }
                Ok(Ok(parameters))
            }
        }
    }
}

/// Zero-based sequence of a stage's task
fn task_sequence(job_type: &str, stage: i32, index: usize) -> Result<i32> {
    i32::try_from(index).map_err(|_| CoordinatorError::InvalidTaskList {
        job_type: job_type.to_string(),
        stage,
        reason: format!("stage produced more than {} tasks", i32::MAX),
    })
}
