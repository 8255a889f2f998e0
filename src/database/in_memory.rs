//! # In-Memory State Store
//!
//! [`StateStore`] backed by process memory. Each operation runs inside one
//! critical section of a single mutex, which gives the same atomicity the
//! PostgreSQL store gets from its transactions. Used by tests and by embedded
//! single-process deployments.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use uuid::Uuid;

use super::errors::{StoreError, StoreResult};
use super::state_store::StateStore;
use crate::models::{Job, NewJob, NewTask, StageClaim, Task, TaskCompletion};
use crate::state_machine::{ensure_job_transition, JobStatus, TaskStatus};

#[derive(Debug, Clone)]
struct StageProgress {
    remaining_tasks: i64,
    finalize_claimed_at: Option<DateTime<Utc>>,
    finalized_at: Option<DateTime<Utc>>,
}

impl StageProgress {
    fn lease_held(&self, now: DateTime<Utc>, lease: Duration) -> bool {
        self.finalize_claimed_at.is_some_and(|claimed_at| {
            now.signed_duration_since(claimed_at)
                .to_std()
                .map_or(true, |elapsed| elapsed < lease)
        })
    }
}

#[derive(Debug, Default)]
struct Inner {
    jobs: HashMap<Uuid, Job>,
    tasks: HashMap<Uuid, Task>,
    stages: HashMap<(Uuid, i32), StageProgress>,
}

impl Inner {
    fn job_mut(&mut self, job_id: Uuid) -> StoreResult<&mut Job> {
        self.jobs
            .get_mut(&job_id)
            .ok_or_else(|| StoreError::job_not_found(job_id))
    }

    fn task_mut(&mut self, task_id: Uuid) -> StoreResult<&mut Task> {
        self.tasks
            .get_mut(&task_id)
            .ok_or_else(|| StoreError::task_not_found(task_id))
    }

    fn stage_mut(&mut self, job_id: Uuid, stage: i32) -> StoreResult<&mut StageProgress> {
        self.stages
            .get_mut(&(job_id, stage))
            .ok_or(StoreError::StageNotOpen { job_id, stage })
    }
}

/// Move a job to `to`, rejecting anything the job state machine forbids
fn transition_job(job: &mut Job, to: JobStatus, now: DateTime<Utc>) -> StoreResult<()> {
    ensure_job_transition(job.status, to).map_err(|e| StoreError::from_state_machine(job.job_id, e))?;
    job.status = to;
    job.updated_at = now;
    Ok(())
}

#[derive(Debug, Default)]
pub struct InMemoryStateStore {
    inner: Mutex<Inner>,
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Outstanding tasks of a stage, if the stage has been opened
    pub fn remaining_tasks(&self, job_id: Uuid, stage: i32) -> Option<i64> {
        let inner = self.inner.lock();
        inner
            .stages
            .get(&(job_id, stage))
            .map(|progress| progress.remaining_tasks)
    }
}

#[async_trait]
impl StateStore for InMemoryStateStore {
    async fn create_job(&self, new_job: NewJob) -> StoreResult<Job> {
        let job = Job::from_new(new_job, Utc::now());
        let mut inner = self.inner.lock();
        inner.jobs.insert(job.job_id, job.clone());
        Ok(job)
    }

    async fn get_job(&self, job_id: Uuid) -> StoreResult<Option<Job>> {
        Ok(self.inner.lock().jobs.get(&job_id).cloned())
    }

    async fn start_job_stage(&self, job_id: Uuid, stage: i32) -> StoreResult<Job> {
        let now = Utc::now();
        let mut inner = self.inner.lock();
        let job = inner.job_mut(job_id)?;

        if job.status == JobStatus::Queued && job.current_stage != stage {
            return Err(StoreError::rejected_job_transition(
                job,
                JobStatus::Processing,
                stage,
            ));
        }
        transition_job(job, JobStatus::Processing, now)?;
        Ok(job.clone())
    }

    async fn advance_job_stage(&self, job_id: Uuid, completed_stage: i32) -> StoreResult<Job> {
        let now = Utc::now();
        let mut inner = self.inner.lock();
        let job = inner.job_mut(job_id)?;

        if job.status == JobStatus::Processing
            && (job.current_stage != completed_stage || completed_stage >= job.total_stages)
        {
            return Err(StoreError::rejected_job_transition(
                job,
                JobStatus::Queued,
                completed_stage + 1,
            ));
        }
        transition_job(job, JobStatus::Queued, now)?;
        job.current_stage = completed_stage + 1;
        Ok(job.clone())
    }

    async fn complete_job(&self, job_id: Uuid, result: serde_json::Value) -> StoreResult<Job> {
        let now = Utc::now();
        let mut inner = self.inner.lock();
        let job = inner.job_mut(job_id)?;

        transition_job(job, JobStatus::Completed, now)?;
        job.result = Some(result);
        job.completed_at = Some(now);
        Ok(job.clone())
    }

    async fn fail_job(&self, job_id: Uuid, error_message: &str) -> StoreResult<Job> {
        let now = Utc::now();
        let mut inner = self.inner.lock();
        let job = inner.job_mut(job_id)?;

        transition_job(job, JobStatus::Failed, now)?;
        job.error_message = Some(error_message.to_string());
        job.completed_at = Some(now);
        Ok(job.clone())
    }

    async fn open_stage(&self, job_id: Uuid, stage: i32, task_count: i64) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        inner.job_mut(job_id)?;
        inner
            .stages
            .entry((job_id, stage))
            .or_insert(StageProgress {
                remaining_tasks: task_count,
                finalize_claimed_at: None,
                finalized_at: None,
            });
        Ok(())
    }

    async fn create_tasks(&self, tasks: &[NewTask]) -> StoreResult<()> {
        let now = Utc::now();
        let mut inner = self.inner.lock();
        for new_task in tasks {
            if !inner.jobs.contains_key(&new_task.parent_job_id) {
                return Err(StoreError::job_not_found(new_task.parent_job_id));
            }
        }
        for new_task in tasks {
            inner
                .tasks
                .entry(new_task.task_id)
                .or_insert_with(|| Task::from_new(new_task.clone(), now));
        }
        Ok(())
    }

    async fn get_task(&self, task_id: Uuid) -> StoreResult<Option<Task>> {
        Ok(self.inner.lock().tasks.get(&task_id).cloned())
    }

    async fn list_tasks(&self, job_id: Uuid, stage: Option<i32>) -> StoreResult<Vec<Task>> {
        let inner = self.inner.lock();
        let mut tasks: Vec<Task> = inner
            .tasks
            .values()
            .filter(|task| task.parent_job_id == job_id)
            .filter(|task| stage.map_or(true, |s| task.stage == s))
            .cloned()
            .collect();
        tasks.sort_by_key(|task| (task.stage, task.sequence));
        Ok(tasks)
    }

    async fn mark_task_processing(&self, task_id: Uuid) -> StoreResult<bool> {
        let now = Utc::now();
        let mut inner = self.inner.lock();
        let task = inner.task_mut(task_id)?;

        if task.status.is_terminal() {
            return Ok(false);
        }
        task.status = TaskStatus::Processing;
        task.updated_at = now;
        Ok(true)
    }

    async fn complete_task(
        &self,
        task_id: Uuid,
        result: serde_json::Value,
    ) -> StoreResult<TaskCompletion> {
        let now = Utc::now();
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        let task = inner
            .tasks
            .get_mut(&task_id)
            .ok_or_else(|| StoreError::task_not_found(task_id))?;
        let key = (task.parent_job_id, task.stage);
        let progress = inner.stages.get_mut(&key);

        let newly_completed = !task.status.is_terminal();
        let remaining_tasks = match progress {
            Some(progress) if newly_completed => {
                progress.remaining_tasks -= 1;
                progress.remaining_tasks
            }
            Some(progress) => progress.remaining_tasks,
            None if newly_completed => {
                return Err(StoreError::StageNotOpen {
                    job_id: key.0,
                    stage: key.1,
                })
            }
            None => 0,
        };

        if newly_completed {
            task.status = TaskStatus::Completed;
            task.result = Some(result);
            task.error_message = None;
            task.completed_at = Some(now);
            task.updated_at = now;
        }

        let job_status = inner.job_mut(key.0)?.status;
        Ok(TaskCompletion {
            newly_completed,
            remaining_tasks,
            job_status,
        })
    }

    async fn schedule_task_retry(
        &self,
        task_id: Uuid,
        expected_retry_count: i32,
        error_message: &str,
    ) -> StoreResult<Option<i32>> {
        let now = Utc::now();
        let mut inner = self.inner.lock();
        let task = inner.task_mut(task_id)?;

        if task.status != TaskStatus::Processing || task.retry_count != expected_retry_count {
            return Ok(None);
        }
        task.status = TaskStatus::Queued;
        task.retry_count += 1;
        task.error_message = Some(error_message.to_string());
        task.updated_at = now;
        Ok(Some(task.retry_count))
    }

    async fn fail_task(&self, task_id: Uuid, error_message: &str) -> StoreResult<bool> {
        let now = Utc::now();
        let mut inner = self.inner.lock();
        let task = inner.task_mut(task_id)?;

        if task.status.is_terminal() {
            return Ok(false);
        }
        task.status = TaskStatus::Failed;
        task.error_message = Some(error_message.to_string());
        task.completed_at = Some(now);
        task.updated_at = now;
        Ok(true)
    }

    async fn stage_results(&self, job_id: Uuid, stage: i32) -> StoreResult<Vec<serde_json::Value>> {
        let inner = self.inner.lock();
        let mut completed: Vec<&Task> = inner
            .tasks
            .values()
            .filter(|task| {
                task.parent_job_id == job_id
                    && task.stage == stage
                    && task.status == TaskStatus::Completed
            })
            .collect();
        completed.sort_by_key(|task| task.sequence);
        Ok(completed
            .into_iter()
            .filter_map(|task| task.result.clone())
            .collect())
    }

    async fn claim_stage_finalization(
        &self,
        job_id: Uuid,
        stage: i32,
        lease: Duration,
    ) -> StoreResult<StageClaim> {
        let now = Utc::now();
        let mut inner = self.inner.lock();
        let progress = inner.stage_mut(job_id, stage)?;

        if progress.finalized_at.is_some() {
            return Ok(StageClaim::Finalized);
        }
        if progress.remaining_tasks > 0 {
            return Ok(StageClaim::Outstanding);
        }
        if progress.lease_held(now, lease) {
            return Ok(StageClaim::Held);
        }
        progress.finalize_claimed_at = Some(now);
        Ok(StageClaim::Claimed)
    }

    async fn release_stage_finalization(&self, job_id: Uuid, stage: i32) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        let progress = inner.stage_mut(job_id, stage)?;
        if progress.finalized_at.is_none() {
            progress.finalize_claimed_at = None;
        }
        Ok(())
    }

    async fn mark_stage_finalized(&self, job_id: Uuid, stage: i32) -> StoreResult<()> {
        let now = Utc::now();
        let mut inner = self.inner.lock();
        let progress = inner.stage_mut(job_id, stage)?;
        progress.finalized_at.get_or_insert(now);
        Ok(())
    }
}
