//! # Task Enqueuer
//!
//! Persists a stage's tasks and sends their task messages.
//!
//! The stage counter is opened first, so no completion can observe a stage
//! with fewer outstanding tasks than it really has. Large stages go out in
//! aligned batches: each chunk of N task rows is written in one store call and
//! its N messages in one batch send, giving every batch a single retry unit.
//! Small stages are written and sent one task at a time.
//!
//! A unit that fails is written and sent again in place, with backoff. Task
//! inserts skip ids that already exist, so repeating a unit whose write had
//! already landed is safe.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, instrument};

use super::context::OrchestrationContext;
use crate::error::{CoordinatorError, Result};
use crate::messaging::{OrchestrationMessage, TaskMessage};
use crate::models::{Job, NewTask};

#[derive(Debug, Clone)]
pub struct TaskEnqueuer {
    context: Arc<OrchestrationContext>,
}

impl TaskEnqueuer {
    pub fn new(context: Arc<OrchestrationContext>) -> Self {
        Self { context }
    }

    /// Persist and enqueue all tasks of `stage`, returning how many were sent
    #[instrument(skip(self, job, tasks), fields(job_id = %job.job_id, stage, task_count = tasks.len()))]
    pub async fn enqueue_stage(&self, job: &Job, stage: i32, tasks: Vec<NewTask>) -> Result<usize> {
        let task_count = tasks.len();
        let outstanding = i64::try_from(task_count).unwrap_or(i64::MAX);
        let store = &self.context.store;
        self.context
            .enqueue_retry
            .retry_in_place("open stage", || async move {
                store.open_stage(job.job_id, stage, outstanding).await?;
                Ok::<_, CoordinatorError>(())
            })
            .await?;

        if task_count > self.context.orchestration.batch_threshold {
            self.enqueue_batched(job, &tasks).await?;
        } else {
            self.enqueue_individually(job, &tasks).await?;
        }

        info!(
            job_id = %job.job_id,
            stage,
            task_count,
            "📤 Stage tasks enqueued"
        );
        Ok(task_count)
    }

    async fn enqueue_batched(&self, job: &Job, tasks: &[NewTask]) -> Result<()> {
        let batch_size = self.context.batch_size();
        let queue = self.context.queues.task_queue.as_str();
        let store = &self.context.store;
        let gateway = &self.context.gateway;

        for (index, chunk) in tasks.chunks(batch_size).enumerate() {
            let messages: Vec<OrchestrationMessage> = chunk
                .iter()
                .map(|task| TaskMessage::for_new_task(task, &job.job_type).into())
                .collect();
            let messages = messages.as_slice();

            self.context
                .enqueue_retry
                .retry_in_place("enqueue task batch", || async move {
                    store.create_tasks(chunk).await?;
                    gateway.send_batch(queue, messages).await?;
                    Ok::<_, CoordinatorError>(())
                })
                .await?;

            debug!(
                job_id = %job.job_id,
                batch = index,
                batch_len = chunk.len(),
                "Task batch persisted and sent"
            );
        }
        Ok(())
    }

    async fn enqueue_individually(&self, job: &Job, tasks: &[NewTask]) -> Result<()> {
        let queue = self.context.queues.task_queue.as_str();
        let store = &self.context.store;
        let gateway = &self.context.gateway;

        for task in tasks {
            let message: OrchestrationMessage = TaskMessage::for_new_task(task, &job.job_type).into();
            let message = &message;

            self.context
                .enqueue_retry
                .retry_in_place("enqueue task", || async move {
                    store.create_tasks(std::slice::from_ref(task)).await?;
                    gateway.send(queue, message, Duration::ZERO).await?;
                    Ok::<_, CoordinatorError>(())
                })
                .await?;
        }
        Ok(())
    }
}
