//! # Result Processor
//!
//! Handles a task message: executes the registered handler and records the
//! outcome.
//!
//! ## Success
//!
//! One atomic store call records the result, completes the task and counts
//! what is left of the stage. Only the caller that observes zero remaining
//! goes on to the [`JobFinalizer`]; siblings return immediately.
//!
//! A redelivered message for a completed task never runs the handler again,
//! but it does hand the stage to the finalizer. If an earlier finalization
//! attempt failed part way, that is what finishes the stage; otherwise the
//! finalizer finds the stage already finalized and nothing happens.
//!
//! ## Failure
//!
//! The [`RetryPolicy`](super::retry_policy::RetryPolicy) decides between a
//! delayed re-enqueue and permanent failure. Permanent failure marks the task
//! FAILED and then makes a best-effort attempt to fail the job; if that
//! attempt errors, both errors are logged together and the handler carries on.

use std::sync::Arc;

use tracing::{debug, error, info, instrument, warn};

use super::context::OrchestrationContext;
use super::job_finalizer::JobFinalizer;
use super::retry_policy::RetryDecision;
use super::types::TaskOutcome;
use crate::error::{CoordinatorError, Result, TaskError};
use crate::logging::log_task_operation;
use crate::messaging::TaskMessage;
use crate::models::Task;
use crate::state_machine::TaskStatus;

#[derive(Debug, Clone)]
pub struct ResultProcessor {
    context: Arc<OrchestrationContext>,
    finalizer: JobFinalizer,
}

impl ResultProcessor {
    pub fn new(context: Arc<OrchestrationContext>, finalizer: JobFinalizer) -> Self {
        Self { context, finalizer }
    }

    #[instrument(skip(self, message), fields(task_id = %message.task_id, job_id = %message.job_id, stage = message.stage, retry_count = message.retry_count))]
    pub async fn process_task(&self, message: &TaskMessage) -> Result<TaskOutcome> {
        let store = &self.context.store;
        let task = store
            .get_task(message.task_id)
            .await?
            .ok_or(CoordinatorError::TaskNotFound {
                task_id: message.task_id,
            })?;

        if task.parent_job_id != message.job_id
            || task.stage != message.stage
            || task.task_type != message.task_type
        {
            return Err(CoordinatorError::malformed(format!(
                "task message for {} does not match the stored task (job {}, stage {}, type '{}')",
                task.task_id, task.parent_job_id, task.stage, task.task_type
            )));
        }

        if task.status.is_terminal() {
            return self.redelivered_terminal(&task).await;
        }

        let handler = self
            .context
            .handlers
            .get(&task.task_type)
            .ok_or_else(|| CoordinatorError::UnknownTaskType {
                task_type: task.task_type.clone(),
            })?;

        let job = store
            .get_job(task.parent_job_id)
            .await?
            .ok_or(CoordinatorError::JobNotFound {
                job_id: task.parent_job_id,
            })?;
        if job.job_type != message.job_type {
            return Err(CoordinatorError::malformed(format!(
                "task message for {} names job type '{}' but the job is '{}'",
                task.task_id, message.job_type, job.job_type
            )));
        }
        if job.status.is_terminal() {
            info!(task_id = %task.task_id, job_status = %job.status, "Job already finished; task not executed");
            return Ok(TaskOutcome::JobNotActive {
                task_id: task.task_id,
                job_status: job.status,
            });
        }

        if !store.mark_task_processing(task.task_id).await? {
            return Ok(TaskOutcome::AlreadyTerminal {
                task_id: task.task_id,
            });
        }

        match handler.execute(task.parameters.clone()).await {
            Ok(result) => self.record_success(&task, result).await,
            Err(err) => self.record_failure(&task, &job.job_type, err).await,
        }
    }

    async fn record_success(&self, task: &Task, result: serde_json::Value) -> Result<TaskOutcome> {
        let completion = self
            .context
            .store
            .complete_task(task.task_id, result)
            .await?;

        if !completion.newly_completed {
            debug!(task_id = %task.task_id, "Task completed by a concurrent delivery");
            return Ok(TaskOutcome::AlreadyTerminal {
                task_id: task.task_id,
            });
        }

        log_task_operation(
            "complete",
            task.task_id,
            task.parent_job_id,
            &task.task_type,
            "COMPLETED",
            task.retry_count,
            None,
        );

        if !completion.completed_stage() {
            return Ok(TaskOutcome::Completed {
                task_id: task.task_id,
                remaining_tasks: completion.remaining_tasks,
            });
        }

        info!(task_id = %task.task_id, job_id = %task.parent_job_id, stage = task.stage, "🏁 Last task of stage completed");
        match self
            .finalizer
            .finalize_stage(task.parent_job_id, task.stage, None)
            .await?
        {
            Some(transition) => Ok(TaskOutcome::StageCompleted {
                task_id: task.task_id,
                stage: task.stage,
                transition,
            }),
            None => Ok(TaskOutcome::Completed {
                task_id: task.task_id,
                remaining_tasks: 0,
            }),
        }
    }

    async fn redelivered_terminal(&self, task: &Task) -> Result<TaskOutcome> {
        if task.status == TaskStatus::Completed {
            if let Some(transition) = self
                .finalizer
                .finalize_stage(task.parent_job_id, task.stage, None)
                .await?
            {
                warn!(
                    task_id = %task.task_id,
                    job_id = %task.parent_job_id,
                    stage = task.stage,
                    "🏁 Redelivery finished an interrupted stage finalization"
                );
                return Ok(TaskOutcome::StageCompleted {
                    task_id: task.task_id,
                    stage: task.stage,
                    transition,
                });
            }
        }

        debug!(task_id = %task.task_id, status = %task.status, "Task already terminal; redelivery ignored");
        Ok(TaskOutcome::AlreadyTerminal {
            task_id: task.task_id,
        })
    }

    async fn record_failure(
        &self,
        task: &Task,
        job_type: &str,
        err: TaskError,
    ) -> Result<TaskOutcome> {
        let store = &self.context.store;
        let category = self.context.retry_policy.classify(&err);

        match self.context.retry_policy.decide(&err, task.retry_count) {
            RetryDecision::RetryAfter(delay) => {
                let error_message = format!("{category}: {err}");
                let Some(retry_count) = store
                    .schedule_task_retry(task.task_id, task.retry_count, &error_message)
                    .await?
                else {
                    warn!(task_id = %task.task_id, "Retry already scheduled by a concurrent delivery");
                    return Ok(TaskOutcome::RetrySuperseded {
                        task_id: task.task_id,
                    });
                };

                let message = TaskMessage::for_retry(task, job_type, retry_count);
                self.context
                    .gateway
                    .send(&self.context.queues.task_queue, &message.into(), delay)
                    .await?;

                warn!(
                    task_id = %task.task_id,
                    retry_count,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    error = %err,
                    "🔄 Task failed; retry scheduled"
                );
                Ok(TaskOutcome::RetryScheduled {
                    task_id: task.task_id,
                    retry_count,
                    delay,
                })
            }
            RetryDecision::FailPermanently { reason } => {
                if !store.fail_task(task.task_id, &reason).await? {
                    return Ok(TaskOutcome::AlreadyTerminal {
                        task_id: task.task_id,
                    });
                }
                log_task_operation(
                    "fail",
                    task.task_id,
                    task.parent_job_id,
                    &task.task_type,
                    "FAILED",
                    task.retry_count,
                    Some(&reason),
                );

                let job_error = format!(
                    "task {} ({}) in stage {} failed: {reason}",
                    task.task_id, task.task_type, task.stage
                );
                let job_failed = match store.fail_job(task.parent_job_id, &job_error).await {
                    Ok(_) => true,
                    Err(cleanup_error) => {
                        error!(
                            task_id = %task.task_id,
                            job_id = %task.parent_job_id,
                            original_error = %reason,
                            cleanup_error = %cleanup_error,
                            "❌ Failed to mark job FAILED after permanent task failure"
                        );
                        false
                    }
                };

                Ok(TaskOutcome::Failed {
                    task_id: task.task_id,
                    reason,
                    job_failed,
                })
            }
        }
    }
}
