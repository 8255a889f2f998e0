//! # Job Finalizer
//!
//! Moves a job past a stage whose tasks have all completed: either aggregates
//! the final stage and completes the job, or re-queues the job and sends the
//! job message for the next stage.
//!
//! Finalization runs under a lease on the stage's progress row and acts on the
//! stored job state, so a caller can run it again after any partial failure.
//! A job that was already advanced but whose next job message was never
//! confirmed gets that message again. The stage is marked finalized only once
//! every step has succeeded.

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use super::context::OrchestrationContext;
use super::types::StageTransition;
use crate::error::{CoordinatorError, Result};
use crate::logging::log_job_operation;
use crate::messaging::JobMessage;
use crate::models::{Job, StageClaim};
use crate::state_machine::JobStatus;

#[derive(Debug, Clone)]
pub struct JobFinalizer {
    context: Arc<OrchestrationContext>,
}

impl JobFinalizer {
    pub fn new(context: Arc<OrchestrationContext>) -> Self {
        Self { context }
    }

    /// Finalize `stage` if all of its tasks completed and nobody finalized it yet
    ///
    /// Returns `None` when tasks are still outstanding or the stage was already
    /// finalized. Fails with `StageFinalizing` while another caller holds an
    /// unexpired lease. `correlation_id` is carried onto the next job message
    /// when known.
    #[instrument(skip(self), fields(job_id = %job_id, stage))]
    pub async fn finalize_stage(
        &self,
        job_id: Uuid,
        stage: i32,
        correlation_id: Option<Uuid>,
    ) -> Result<Option<StageTransition>> {
        let store = &self.context.store;
        let lease = self.context.queues.visibility_timeout();

        match store.claim_stage_finalization(job_id, stage, lease).await? {
            StageClaim::Claimed => {}
            StageClaim::Held => return Err(CoordinatorError::StageFinalizing { job_id, stage }),
            StageClaim::Finalized | StageClaim::Outstanding => return Ok(None),
        }

        let finalized = match self.move_past_stage(job_id, stage, correlation_id).await {
            Ok(transition) => store
                .mark_stage_finalized(job_id, stage)
                .await
                .map(|()| transition)
                .map_err(CoordinatorError::from),
            Err(err) => Err(err),
        };

        match finalized {
            Ok(transition) => Ok(Some(transition)),
            Err(err) => {
                if let Err(release_error) = store.release_stage_finalization(job_id, stage).await {
                    error!(
                        job_id = %job_id,
                        stage,
                        original_error = %err,
                        cleanup_error = %release_error,
                        "❌ Failed to release stage finalization lease"
                    );
                }
                Err(err)
            }
        }
    }

    async fn move_past_stage(
        &self,
        job_id: Uuid,
        stage: i32,
        correlation_id: Option<Uuid>,
    ) -> Result<StageTransition> {
        let store = &self.context.store;
        let job = store
            .get_job(job_id)
            .await?
            .ok_or(CoordinatorError::JobNotFound { job_id })?;

        match job.status {
            JobStatus::Processing if job.current_stage == stage => {}
            JobStatus::Queued if job.current_stage == stage + 1 => {
                info!(job_id = %job_id, stage, "Job already advanced; sending next stage message again");
                self.send_stage_message(&job, stage + 1, correlation_id)
                    .await?;
                return Ok(StageTransition::Advanced {
                    next_stage: stage + 1,
                });
            }
            _ => {
                warn!(
                    job_id = %job_id,
                    stage,
                    job_status = %job.status,
                    current_stage = job.current_stage,
                    "⚠️ Stage completed but job is no longer processing it; not advancing"
                );
                return Ok(StageTransition::NotAdvanced {
                    job_status: job.status,
                });
            }
        }

        let workflow = self
            .context
            .jobs
            .get(&job.job_type)
            .ok_or_else(|| CoordinatorError::UnknownJobType {
                job_type: job.job_type.clone(),
            })?;

        if job.is_final_stage(stage) {
            let results = store.stage_results(job_id, stage).await?;
            return match workflow.aggregate(results) {
                Ok(result) => {
                    store.complete_job(job_id, result).await?;
                    log_job_operation("complete", job_id, &job.job_type, Some(stage), "COMPLETED", None);
                    Ok(StageTransition::JobCompleted)
                }
                Err(err) => {
                    let reason = format!("aggregation of stage {stage} failed: {err}");
                    error!(job_id = %job_id, stage, error = %err, "❌ Job aggregation failed");
                    store.fail_job(job_id, &reason).await?;
                    log_job_operation("fail", job_id, &job.job_type, Some(stage), "FAILED", Some(&reason));
                    Ok(StageTransition::JobFailed { reason })
                }
            };
        }

        let next_stage = stage + 1;
        let job = store.advance_job_stage(job_id, stage).await?;
        self.send_stage_message(&job, next_stage, correlation_id)
            .await?;

        info!(job_id = %job_id, completed_stage = stage, next_stage, "➡️ Job advanced to next stage");
        Ok(StageTransition::Advanced { next_stage })
    }

    async fn send_stage_message(
        &self,
        job: &Job,
        stage: i32,
        correlation_id: Option<Uuid>,
    ) -> Result<()> {
        let message = match correlation_id {
            Some(correlation_id) => {
                JobMessage::for_stage(job.job_id, &job.job_type, stage, correlation_id)
            }
            None => JobMessage::new(job.job_id, job.job_type.clone(), stage),
        };
        self.context
            .gateway
            .send(&self.context.queues.job_queue, &message.into(), Duration::ZERO)
            .await?;
        Ok(())
    }
}
