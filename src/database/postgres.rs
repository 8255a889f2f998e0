//! # PostgreSQL State Store
//!
//! [`StateStore`] over sqlx. Every status change is a conditional
//! `UPDATE ... WHERE status = ... RETURNING *`; when nothing matches, the row
//! is re-read only to explain the rejection.
//!
//! Task completion is the one multi-statement operation: the task update and
//! the stage counter decrement share a transaction, and the counter row lock
//! serializes sibling completions. The same row lock guards the stage's
//! finalization lease.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use tracing::{debug, instrument};
use uuid::Uuid;

use super::errors::{StoreError, StoreResult};
use super::state_store::StateStore;
use crate::models::{Job, NewJob, NewTask, StageClaim, Task, TaskCompletion};
use crate::state_machine::{JobStatus, TaskStatus};

#[derive(Debug, FromRow)]
struct JobRow {
    job_id: Uuid,
    job_type: String,
    status: String,
    current_stage: i32,
    total_stages: i32,
    parameters: serde_json::Value,
    result: Option<serde_json::Value>,
    error_message: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
}

impl TryFrom<JobRow> for Job {
    type Error = StoreError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let status = row
            .status
            .parse::<JobStatus>()
            .map_err(|e| StoreError::from_state_machine(row.job_id, e))?;

        Ok(Job {
            job_id: row.job_id,
            job_type: row.job_type,
            status,
            current_stage: row.current_stage,
            total_stages: row.total_stages,
            parameters: row.parameters,
            result: row.result,
            error_message: row.error_message,
            created_at: row.created_at,
            updated_at: row.updated_at,
            completed_at: row.completed_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct TaskRow {
    task_id: Uuid,
    parent_job_id: Uuid,
    stage: i32,
    sequence: i32,
    task_type: String,
    status: String,
    parameters: serde_json::Value,
    result: Option<serde_json::Value>,
    error_message: Option<String>,
    retry_count: i32,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
}

impl TryFrom<TaskRow> for Task {
    type Error = StoreError;

    fn try_from(row: TaskRow) -> Result<Self, Self::Error> {
        let status = row
            .status
            .parse::<TaskStatus>()
            .map_err(|e| StoreError::from_state_machine(row.task_id, e))?;

        Ok(Task {
            task_id: row.task_id,
            parent_job_id: row.parent_job_id,
            stage: row.stage,
            sequence: row.sequence,
            task_type: row.task_type,
            status,
            parameters: row.parameters,
            result: row.result,
            error_message: row.error_message,
            retry_count: row.retry_count,
            created_at: row.created_at,
            updated_at: row.updated_at,
            completed_at: row.completed_at,
        })
    }
}

/// Snapshot read when a completion turns out to be a redelivery
#[derive(Debug, FromRow)]
struct CompletionSnapshot {
    job_id: Uuid,
    remaining_tasks: Option<i64>,
    job_status: String,
}

#[derive(Debug, FromRow)]
struct StageLeaseRow {
    remaining_tasks: i64,
    finalized: bool,
    lease_held: bool,
}

#[derive(Debug, Clone)]
pub struct PgStateStore {
    pool: PgPool,
}

impl PgStateStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Build the error for a conditional job update that matched nothing
    ///
    /// Updates that are not bound to a stage pass `None` and are reported
    /// against the job's own stage.
    async fn job_update_rejected(
        &self,
        job_id: Uuid,
        to: JobStatus,
        stage: Option<i32>,
    ) -> StoreError {
        match self.get_job(job_id).await {
            Ok(Some(job)) => {
                let stage = stage.unwrap_or(job.current_stage);
                StoreError::rejected_job_transition(&job, to, stage)
            }
            Ok(None) => StoreError::job_not_found(job_id),
            Err(err) => err,
        }
    }

    async fn task_exists(&self, task_id: Uuid) -> StoreResult<bool> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM jobflow_tasks WHERE task_id = $1)")
                .bind(task_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(exists)
    }

    async fn insert_task(tx: &mut Transaction<'_, Postgres>, task: &NewTask) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO jobflow_tasks
                (task_id, parent_job_id, stage, sequence, task_type, status, parameters)
            VALUES ($1, $2, $3, $4, $5, 'QUEUED', $6)
            ON CONFLICT (task_id) DO NOTHING
            "#,
        )
        .bind(task.task_id)
        .bind(task.parent_job_id)
        .bind(task.stage)
        .bind(task.sequence)
        .bind(&task.task_type)
        .bind(&task.parameters)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }
}

fn parse_job_status(job_id: Uuid, status: &str) -> StoreResult<JobStatus> {
    status
        .parse::<JobStatus>()
        .map_err(|e| StoreError::from_state_machine(job_id, e))
}

#[async_trait]
impl StateStore for PgStateStore {
    #[instrument(skip(self, new_job), fields(job_id = %new_job.job_id, job_type = %new_job.job_type))]
    async fn create_job(&self, new_job: NewJob) -> StoreResult<Job> {
        let row = sqlx::query_as::<_, JobRow>(
            r#"
            INSERT INTO jobflow_jobs (job_id, job_type, status, current_stage, total_stages, parameters)
            VALUES ($1, $2, 'QUEUED', 1, $3, $4)
            RETURNING *
            "#,
        )
        .bind(new_job.job_id)
        .bind(&new_job.job_type)
        .bind(new_job.total_stages)
        .bind(&new_job.parameters)
        .fetch_one(&self.pool)
        .await?;

        row.try_into()
    }

    async fn get_job(&self, job_id: Uuid) -> StoreResult<Option<Job>> {
        let row = sqlx::query_as::<_, JobRow>("SELECT * FROM jobflow_jobs WHERE job_id = $1")
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(Job::try_from).transpose()
    }

    async fn start_job_stage(&self, job_id: Uuid, stage: i32) -> StoreResult<Job> {
        let row = sqlx::query_as::<_, JobRow>(
            r#"
            UPDATE jobflow_jobs
            SET status = 'PROCESSING', updated_at = NOW()
            WHERE job_id = $1 AND status = 'QUEUED' AND current_stage = $2
            RETURNING *
            "#,
        )
        .bind(job_id)
        .bind(stage)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => row.try_into(),
            None => Err(self
                .job_update_rejected(job_id, JobStatus::Processing, Some(stage))
                .await),
        }
    }

    async fn advance_job_stage(&self, job_id: Uuid, completed_stage: i32) -> StoreResult<Job> {
        let row = sqlx::query_as::<_, JobRow>(
            r#"
            UPDATE jobflow_jobs
            SET status = 'QUEUED', current_stage = current_stage + 1, updated_at = NOW()
            WHERE job_id = $1
              AND status = 'PROCESSING'
              AND current_stage = $2
              AND current_stage < total_stages
            RETURNING *
            "#,
        )
        .bind(job_id)
        .bind(completed_stage)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => row.try_into(),
            None => Err(self
                .job_update_rejected(job_id, JobStatus::Queued, Some(completed_stage + 1))
                .await),
        }
    }

    async fn complete_job(&self, job_id: Uuid, result: serde_json::Value) -> StoreResult<Job> {
        let row = sqlx::query_as::<_, JobRow>(
            r#"
            UPDATE jobflow_jobs
            SET status = 'COMPLETED', result = $2, completed_at = NOW(), updated_at = NOW()
            WHERE job_id = $1 AND status = 'PROCESSING'
            RETURNING *
            "#,
        )
        .bind(job_id)
        .bind(&result)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => row.try_into(),
            None => Err(self
                .job_update_rejected(job_id, JobStatus::Completed, None)
                .await),
        }
    }

    async fn fail_job(&self, job_id: Uuid, error_message: &str) -> StoreResult<Job> {
        let row = sqlx::query_as::<_, JobRow>(
            r#"
            UPDATE jobflow_jobs
            SET status = 'FAILED', error_message = $2, completed_at = NOW(), updated_at = NOW()
            WHERE job_id = $1 AND status = 'PROCESSING'
            RETURNING *
            "#,
        )
        .bind(job_id)
        .bind(error_message)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => row.try_into(),
            None => Err(self.job_update_rejected(job_id, JobStatus::Failed, None).await),
        }
    }

    async fn open_stage(&self, job_id: Uuid, stage: i32, task_count: i64) -> StoreResult<()> {
        let completed_at = (task_count == 0).then(Utc::now);

        sqlx::query(
            r#"
            INSERT INTO jobflow_job_stages (job_id, stage, task_count, remaining_tasks, completed_at)
            VALUES ($1, $2, $3, $3, $4)
            ON CONFLICT (job_id, stage) DO NOTHING
            "#,
        )
        .bind(job_id)
        .bind(stage)
        .bind(task_count)
        .bind(completed_at)
        .execute(&self.pool)
        .await?;

        debug!(job_id = %job_id, stage, task_count, "Stage progress opened");
        Ok(())
    }

    async fn create_tasks(&self, tasks: &[NewTask]) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        for task in tasks {
            Self::insert_task(&mut tx, task).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn get_task(&self, task_id: Uuid) -> StoreResult<Option<Task>> {
        let row = sqlx::query_as::<_, TaskRow>("SELECT * FROM jobflow_tasks WHERE task_id = $1")
            .bind(task_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(Task::try_from).transpose()
    }

    async fn list_tasks(&self, job_id: Uuid, stage: Option<i32>) -> StoreResult<Vec<Task>> {
        let rows = sqlx::query_as::<_, TaskRow>(
            r#"
            SELECT * FROM jobflow_tasks
            WHERE parent_job_id = $1 AND ($2::INTEGER IS NULL OR stage = $2)
            ORDER BY stage, sequence
            "#,
        )
        .bind(job_id)
        .bind(stage)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Task::try_from).collect()
    }

    async fn mark_task_processing(&self, task_id: Uuid) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE jobflow_tasks
            SET status = 'PROCESSING', updated_at = NOW()
            WHERE task_id = $1 AND status IN ('QUEUED', 'PROCESSING')
            "#,
        )
        .bind(task_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            return Ok(true);
        }
        if self.task_exists(task_id).await? {
            Ok(false)
        } else {
            Err(StoreError::task_not_found(task_id))
        }
    }

    #[instrument(skip(self, result), fields(task_id = %task_id))]
    async fn complete_task(
        &self,
        task_id: Uuid,
        result: serde_json::Value,
    ) -> StoreResult<TaskCompletion> {
        let mut tx = self.pool.begin().await?;

        let updated: Option<(Uuid, i32)> = sqlx::query_as(
            r#"
            UPDATE jobflow_tasks
            SET status = 'COMPLETED', result = $2, error_message = NULL,
                completed_at = NOW(), updated_at = NOW()
            WHERE task_id = $1 AND status IN ('QUEUED', 'PROCESSING')
            RETURNING parent_job_id, stage
            "#,
        )
        .bind(task_id)
        .bind(&result)
        .fetch_optional(&mut *tx)
        .await?;

        let Some((job_id, stage)) = updated else {
            // Already terminal: report the current counter without touching it
            let snapshot = sqlx::query_as::<_, CompletionSnapshot>(
                r#"
                SELECT t.parent_job_id AS job_id, s.remaining_tasks, j.status AS job_status
                FROM jobflow_tasks t
                JOIN jobflow_jobs j ON j.job_id = t.parent_job_id
                LEFT JOIN jobflow_job_stages s
                    ON s.job_id = t.parent_job_id AND s.stage = t.stage
                WHERE t.task_id = $1
                "#,
            )
            .bind(task_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| StoreError::task_not_found(task_id))?;
            tx.commit().await?;

            return Ok(TaskCompletion {
                newly_completed: false,
                remaining_tasks: snapshot.remaining_tasks.unwrap_or(0),
                job_status: parse_job_status(snapshot.job_id, &snapshot.job_status)?,
            });
        };

        let remaining_tasks: i64 = sqlx::query_scalar(
            r#"
            UPDATE jobflow_job_stages
            SET remaining_tasks = remaining_tasks - 1,
                completed_at = CASE WHEN remaining_tasks - 1 = 0 THEN NOW() ELSE completed_at END
            WHERE job_id = $1 AND stage = $2
            RETURNING remaining_tasks
            "#,
        )
        .bind(job_id)
        .bind(stage)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(StoreError::StageNotOpen { job_id, stage })?;

        let job_status: String =
            sqlx::query_scalar("SELECT status FROM jobflow_jobs WHERE job_id = $1")
                .bind(job_id)
                .fetch_one(&mut *tx)
                .await?;

        tx.commit().await?;

        debug!(job_id = %job_id, stage, remaining_tasks, "Task completion recorded");
        Ok(TaskCompletion {
            newly_completed: true,
            remaining_tasks,
            job_status: parse_job_status(job_id, &job_status)?,
        })
    }

    async fn schedule_task_retry(
        &self,
        task_id: Uuid,
        expected_retry_count: i32,
        error_message: &str,
    ) -> StoreResult<Option<i32>> {
        let retry_count: Option<i32> = sqlx::query_scalar(
            r#"
            UPDATE jobflow_tasks
            SET status = 'QUEUED', retry_count = retry_count + 1,
                error_message = $3, updated_at = NOW()
            WHERE task_id = $1 AND status = 'PROCESSING' AND retry_count = $2
            RETURNING retry_count
            "#,
        )
        .bind(task_id)
        .bind(expected_retry_count)
        .bind(error_message)
        .fetch_optional(&self.pool)
        .await?;

        if retry_count.is_none() && !self.task_exists(task_id).await? {
            return Err(StoreError::task_not_found(task_id));
        }
        Ok(retry_count)
    }

    async fn fail_task(&self, task_id: Uuid, error_message: &str) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE jobflow_tasks
            SET status = 'FAILED', error_message = $2, completed_at = NOW(), updated_at = NOW()
            WHERE task_id = $1 AND status IN ('QUEUED', 'PROCESSING')
            "#,
        )
        .bind(task_id)
        .bind(error_message)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            return Ok(true);
        }
        if self.task_exists(task_id).await? {
            Ok(false)
        } else {
            Err(StoreError::task_not_found(task_id))
        }
    }

    async fn stage_results(&self, job_id: Uuid, stage: i32) -> StoreResult<Vec<serde_json::Value>> {
        let results: Vec<Option<serde_json::Value>> = sqlx::query_scalar(
            r#"
            SELECT result FROM jobflow_tasks
            WHERE parent_job_id = $1 AND stage = $2 AND status = 'COMPLETED'
            ORDER BY sequence
            "#,
        )
        .bind(job_id)
        .bind(stage)
        .fetch_all(&self.pool)
        .await?;

        Ok(results.into_iter().flatten().collect())
    }

    #[instrument(skip(self), fields(job_id = %job_id, stage))]
    async fn claim_stage_finalization(
        &self,
        job_id: Uuid,
        stage: i32,
        lease: Duration,
    ) -> StoreResult<StageClaim> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query_as::<_, StageLeaseRow>(
            r#"
            SELECT remaining_tasks,
                   finalized_at IS NOT NULL AS finalized,
                   COALESCE(
                       finalize_claimed_at > NOW() - make_interval(secs => $3::DOUBLE PRECISION),
                       FALSE
                   ) AS lease_held
            FROM jobflow_job_stages
            WHERE job_id = $1 AND stage = $2
            FOR UPDATE
            "#,
        )
        .bind(job_id)
        .bind(stage)
        .bind(lease.as_secs_f64())
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(StoreError::StageNotOpen { job_id, stage })?;

        let claim = if row.finalized {
            StageClaim::Finalized
        } else if row.remaining_tasks > 0 {
            StageClaim::Outstanding
        } else if row.lease_held {
            StageClaim::Held
        } else {
            sqlx::query(
                "UPDATE jobflow_job_stages SET finalize_claimed_at = NOW() WHERE job_id = $1 AND stage = $2",
            )
            .bind(job_id)
            .bind(stage)
            .execute(&mut *tx)
            .await?;
            StageClaim::Claimed
        };
        tx.commit().await?;

        debug!(job_id = %job_id, stage, ?claim, "Stage finalization claim");
        Ok(claim)
    }

    async fn release_stage_finalization(&self, job_id: Uuid, stage: i32) -> StoreResult<()> {
        sqlx::query(
            r#"
            UPDATE jobflow_job_stages
            SET finalize_claimed_at = NULL
            WHERE job_id = $1 AND stage = $2 AND finalized_at IS NULL
            "#,
        )
        .bind(job_id)
        .bind(stage)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_stage_finalized(&self, job_id: Uuid, stage: i32) -> StoreResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE jobflow_job_stages
            SET finalized_at = COALESCE(finalized_at, NOW())
            WHERE job_id = $1 AND stage = $2
            "#,
        )
        .bind(job_id)
        .bind(stage)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::StageNotOpen { job_id, stage });
        }
        Ok(())
    }
}
