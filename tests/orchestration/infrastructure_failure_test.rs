//! Store and queue outages injected between coordinator steps.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::common::{echo_handler, job_messages, task_messages, test_config, StaticWorkflow};
use jobflow_core::config::JobflowConfig;
use jobflow_core::database::{InMemoryStateStore, StateStore, StoreError, StoreResult};
use jobflow_core::messaging::{
    InMemoryQueueGateway, JobMessage, MessageId, MessagingError, MessagingResult,
    OrchestrationMessage, QueueGateway, ReceivedMessage, TaskMessage,
};
use jobflow_core::models::{
    Job, NewJob, NewTask, StageClaim, StageDescriptor, Task, TaskCompletion,
};
use jobflow_core::orchestration::{Coordinator, JobOutcome, StageTransition, TaskOutcome};
use jobflow_core::registry::{JobRegistry, TaskHandlerRegistry};
use jobflow_core::{CoordinatorError, JobStatus, TaskStatus};

/// Gateway whose next sends to a queue can be made to fail
struct FlakyGateway {
    inner: InMemoryQueueGateway,
    pending_failures: Mutex<HashMap<String, usize>>,
    failed_sends: Mutex<usize>,
}

impl FlakyGateway {
    fn new() -> Self {
        Self {
            inner: InMemoryQueueGateway::new(),
            pending_failures: Mutex::new(HashMap::new()),
            failed_sends: Mutex::new(0),
        }
    }

    fn fail_next_sends(&self, queue_name: &str, count: usize) {
        self.pending_failures
            .lock()
            .insert(queue_name.to_string(), count);
    }

    fn failed_sends(&self) -> usize {
        *self.failed_sends.lock()
    }

    fn injected_failure(&self, queue_name: &str, operation: &str) -> MessagingResult<()> {
        let mut pending = self.pending_failures.lock();
        match pending.get_mut(queue_name) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                *self.failed_sends.lock() += 1;
                Err(MessagingError::queue_operation(
                    queue_name,
                    operation,
                    "injected outage",
                ))
            }
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl QueueGateway for FlakyGateway {
    async fn ensure_queue(&self, queue_name: &str) -> MessagingResult<()> {
        self.inner.ensure_queue(queue_name).await
    }

    async fn send(
        &self,
        queue_name: &str,
        message: &OrchestrationMessage,
        delay: Duration,
    ) -> MessagingResult<MessageId> {
        self.injected_failure(queue_name, "send")?;
        self.inner.send(queue_name, message, delay).await
    }

    async fn send_batch(
        &self,
        queue_name: &str,
        messages: &[OrchestrationMessage],
    ) -> MessagingResult<Vec<MessageId>> {
        self.injected_failure(queue_name, "send_batch")?;
        self.inner.send_batch(queue_name, messages).await
    }

    async fn receive(
        &self,
        queue_name: &str,
        max_messages: usize,
        visibility_timeout: Duration,
    ) -> MessagingResult<Vec<ReceivedMessage>> {
        self.inner
            .receive(queue_name, max_messages, visibility_timeout)
            .await
    }

    async fn ack(&self, queue_name: &str, message_id: MessageId) -> MessagingResult<()> {
        self.inner.ack(queue_name, message_id).await
    }

    fn max_batch_size(&self) -> usize {
        self.inner.max_batch_size()
    }

    fn provider_name(&self) -> &'static str {
        "flaky"
    }
}

/// In-memory store whose next calls of a named operation can be made to fail
struct FlakyStore {
    inner: InMemoryStateStore,
    pending_failures: Mutex<HashMap<&'static str, usize>>,
}

impl FlakyStore {
    fn new() -> Self {
        Self {
            inner: InMemoryStateStore::new(),
            pending_failures: Mutex::new(HashMap::new()),
        }
    }

    fn fail_next(&self, operation: &'static str, count: usize) {
        self.pending_failures.lock().insert(operation, count);
    }

    fn injected_failure(&self, operation: &'static str) -> StoreResult<()> {
        let mut pending = self.pending_failures.lock();
        match pending.get_mut(operation) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                Err(StoreError::Database(sqlx::Error::PoolTimedOut))
            }
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl StateStore for FlakyStore {
    async fn create_job(&self, new_job: NewJob) -> StoreResult<Job> {
        self.injected_failure("create_job")?;
        self.inner.create_job(new_job).await
    }
    async fn get_job(&self, job_id: Uuid) -> StoreResult<Option<Job>> {
        self.inner.get_job(job_id).await
    }
    async fn start_job_stage(&self, job_id: Uuid, stage: i32) -> StoreResult<Job> {
        self.injected_failure("start_job_stage")?;
        self.inner.start_job_stage(job_id, stage).await
    }
    async fn advance_job_stage(&self, job_id: Uuid, completed_stage: i32) -> StoreResult<Job> {
        self.injected_failure("advance_job_stage")?;
        self.inner.advance_job_stage(job_id, completed_stage).await
    }
    async fn complete_job(&self, job_id: Uuid, result: Value) -> StoreResult<Job> {
        self.injected_failure("complete_job")?;
        self.inner.complete_job(job_id, result).await
    }
    async fn fail_job(&self, job_id: Uuid, error_message: &str) -> StoreResult<Job> {
        self.injected_failure("fail_job")?;
        self.inner.fail_job(job_id, error_message).await
    }
    async fn open_stage(&self, job_id: Uuid, stage: i32, task_count: i64) -> StoreResult<()> {
        self.injected_failure("open_stage")?;
        self.inner.open_stage(job_id, stage, task_count).await
    }
    async fn create_tasks(&self, tasks: &[NewTask]) -> StoreResult<()> {
        self.injected_failure("create_tasks")?;
        self.inner.create_tasks(tasks).await
    }
    async fn get_task(&self, task_id: Uuid) -> StoreResult<Option<Task>> {
        self.inner.get_task(task_id).await
    }
    async fn list_tasks(&self, job_id: Uuid, stage: Option<i32>) -> StoreResult<Vec<Task>> {
        self.inner.list_tasks(job_id, stage).await
    }
    async fn mark_task_processing(&self, task_id: Uuid) -> StoreResult<bool> {
        self.inner.mark_task_processing(task_id).await
    }
    async fn complete_task(&self, task_id: Uuid, result: Value) -> StoreResult<TaskCompletion> {
        self.injected_failure("complete_task")?;
        self.inner.complete_task(task_id, result).await
    }
    async fn schedule_task_retry(
        &self,
        task_id: Uuid,
        expected_retry_count: i32,
        error_message: &str,
    ) -> StoreResult<Option<i32>> {
        self.inner
            .schedule_task_retry(task_id, expected_retry_count, error_message)
            .await
    }
    async fn fail_task(&self, task_id: Uuid, error_message: &str) -> StoreResult<bool> {
        self.inner.fail_task(task_id, error_message).await
    }
    async fn stage_results(&self, job_id: Uuid, stage: i32) -> StoreResult<Vec<Value>> {
        self.injected_failure("stage_results")?;
        self.inner.stage_results(job_id, stage).await
    }
    async fn claim_stage_finalization(
        &self,
        job_id: Uuid,
        stage: i32,
        lease: Duration,
    ) -> StoreResult<StageClaim> {
        self.inner.claim_stage_finalization(job_id, stage, lease).await
    }
    async fn release_stage_finalization(&self, job_id: Uuid, stage: i32) -> StoreResult<()> {
        self.inner.release_stage_finalization(job_id, stage).await
    }
    async fn mark_stage_finalized(&self, job_id: Uuid, stage: i32) -> StoreResult<()> {
        self.injected_failure("mark_stage_finalized")?;
        self.inner.mark_stage_finalized(job_id, stage).await
    }
}

struct Fixture {
    coordinator: Coordinator,
    store: Arc<FlakyStore>,
    gateway: Arc<FlakyGateway>,
    config: JobflowConfig,
}

impl Fixture {
    async fn new(workflow: StaticWorkflow, config: JobflowConfig) -> Self {
        let store = Arc::new(FlakyStore::new());
        let gateway = Arc::new(FlakyGateway::new());
        let coordinator = Coordinator::new(
            Arc::clone(&store) as Arc<dyn StateStore>,
            Arc::clone(&gateway) as Arc<dyn QueueGateway>,
            Arc::new(JobRegistry::builder().register(Arc::new(workflow)).unwrap().build()),
            Arc::new(
                TaskHandlerRegistry::builder()
                    .register("step", echo_handler())
                    .unwrap()
                    .build(),
            ),
            &config,
        )
        .unwrap();
        coordinator.ensure_queues().await.unwrap();

        Self {
            coordinator,
            store,
            gateway,
            config,
        }
    }

    async fn job(&self, job_id: Uuid) -> Job {
        self.store.get_job(job_id).await.unwrap().unwrap()
    }

    async fn job_messages(&self) -> Vec<JobMessage> {
        job_messages(
            &self
                .gateway
                .inner
                .drain(&self.config.queues.job_queue)
                .await
                .unwrap(),
        )
    }

    async fn task_messages(&self) -> Vec<TaskMessage> {
        task_messages(
            &self
                .gateway
                .inner
                .drain(&self.config.queues.task_queue)
                .await
                .unwrap(),
        )
    }

    /// Submit a job and start its first stage, returning the stage's task messages
    async fn start(&self, job_type: &str) -> (Uuid, Vec<TaskMessage>) {
        let job = self.coordinator.submit(job_type, json!({})).await.unwrap();
        let job_msg = self.job_messages().await.remove(0);
        let outcome = self.coordinator.handle_job_message(&job_msg).await.unwrap();
        assert!(
            matches!(outcome, JobOutcome::TasksEnqueued { .. }),
            "unexpected outcome: {outcome:?}"
        );
        (job.job_id, self.task_messages().await)
    }

    async fn run_until_idle(&self) {
        for _ in 0..100 {
            let jobs = self.job_messages().await;
            let tasks = self.task_messages().await;
            if jobs.is_empty() && tasks.is_empty() {
                return;
            }
            for message in jobs {
                self.coordinator.handle_job_message(&message).await.unwrap();
            }
            for message in tasks {
                self.coordinator.handle_task_message(&message).await.unwrap();
            }
        }
        panic!("queues never went idle");
    }
}

fn two_stage_workflow() -> StaticWorkflow {
    StaticWorkflow::new(
        "pipeline",
        vec![
            StageDescriptor::single(1, "step"),
            StageDescriptor::single(2, "step"),
        ],
    )
    .with_tasks(1, vec![json!({"part": "extract"})])
    .with_tasks(2, vec![json!({"part": "load"})])
}

fn single_stage_workflow(tasks: Vec<Value>) -> StaticWorkflow {
    StaticWorkflow::new("report", vec![StageDescriptor::fan_out(1, "step")]).with_tasks(1, tasks)
}

#[tokio::test]
async fn test_failed_next_stage_send_is_resumed_by_redelivery() {
    let fixture = Fixture::new(two_stage_workflow(), test_config()).await;
    let (job_id, tasks) = fixture.start("pipeline").await;
    let task_msg = &tasks[0];

    fixture
        .gateway
        .fail_next_sends(&fixture.config.queues.job_queue, 1);
    let result = fixture.coordinator.handle_task_message(task_msg).await;
    assert!(
        matches!(result, Err(CoordinatorError::Messaging(_))),
        "unexpected result: {result:?}"
    );

    // The stage advanced and the task completed, but no job message went out.
    let job = fixture.job(job_id).await;
    assert_eq!(job.status, JobStatus::Queued);
    assert_eq!(job.current_stage, 2);
    let task = fixture.store.get_task(task_msg.task_id).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Completed);
    assert!(fixture.job_messages().await.is_empty());

    let outcome = fixture.coordinator.handle_task_message(task_msg).await.unwrap();
    assert!(matches!(
        outcome,
        TaskOutcome::StageCompleted {
            stage: 1,
            transition: StageTransition::Advanced { next_stage: 2 },
            ..
        }
    ));
    let resent = fixture.job_messages().await;
    assert_eq!(resent.len(), 1);
    assert_eq!(resent[0].stage, 2);

    let outcome = fixture.coordinator.handle_task_message(task_msg).await.unwrap();
    assert!(matches!(outcome, TaskOutcome::AlreadyTerminal { .. }));
    assert!(fixture.job_messages().await.is_empty());

    fixture.coordinator.handle_job_message(&resent[0]).await.unwrap();
    fixture.run_until_idle().await;
    let job = fixture.job(job_id).await;
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.result, Some(json!({"echo": {"part": "load"}})));
}

#[tokio::test]
async fn test_failed_stage_advance_is_resumed_by_redelivery() {
    let fixture = Fixture::new(two_stage_workflow(), test_config()).await;
    let (job_id, tasks) = fixture.start("pipeline").await;

    fixture.store.fail_next("advance_job_stage", 1);
    let result = fixture.coordinator.handle_task_message(&tasks[0]).await;
    assert!(matches!(result, Err(CoordinatorError::Store(_))));

    let job = fixture.job(job_id).await;
    assert_eq!(job.status, JobStatus::Processing);
    assert_eq!(job.current_stage, 1);
    assert_eq!(fixture.store.inner.remaining_tasks(job_id, 1), Some(0));

    let outcome = fixture.coordinator.handle_task_message(&tasks[0]).await.unwrap();
    assert!(matches!(
        outcome,
        TaskOutcome::StageCompleted {
            transition: StageTransition::Advanced { next_stage: 2 },
            ..
        }
    ));
    let job = fixture.job(job_id).await;
    assert_eq!(job.status, JobStatus::Queued);
    assert_eq!(job.current_stage, 2);

    fixture.run_until_idle().await;
    assert_eq!(fixture.job(job_id).await.status, JobStatus::Completed);
}

#[tokio::test]
async fn test_failed_job_completion_is_resumed_by_redelivery() {
    let fixture = Fixture::new(single_stage_workflow(vec![json!(1), json!(2)]), test_config()).await;
    let (job_id, tasks) = fixture.start("report").await;

    let outcome = fixture.coordinator.handle_task_message(&tasks[0]).await.unwrap();
    assert!(matches!(outcome, TaskOutcome::Completed { remaining_tasks: 1, .. }));

    fixture.store.fail_next("complete_job", 1);
    assert!(fixture.coordinator.handle_task_message(&tasks[1]).await.is_err());
    assert_eq!(fixture.job(job_id).await.status, JobStatus::Processing);

    // Either completed task can resume the stage.
    let outcome = fixture.coordinator.handle_task_message(&tasks[0]).await.unwrap();
    assert!(matches!(
        outcome,
        TaskOutcome::StageCompleted {
            transition: StageTransition::JobCompleted,
            ..
        }
    ));
    let job = fixture.job(job_id).await;
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(
        job.result,
        Some(json!([{"echo": 1}, {"echo": 2}]))
    );

    let outcome = fixture.coordinator.handle_task_message(&tasks[1]).await.unwrap();
    assert!(matches!(outcome, TaskOutcome::AlreadyTerminal { .. }));
}

#[tokio::test]
async fn test_unmarked_finalization_resends_without_advancing_twice() {
    let fixture = Fixture::new(two_stage_workflow(), test_config()).await;
    let (job_id, tasks) = fixture.start("pipeline").await;

    fixture.store.fail_next("mark_stage_finalized", 1);
    assert!(fixture.coordinator.handle_task_message(&tasks[0]).await.is_err());
    let first = fixture.job_messages().await;
    assert_eq!(first.len(), 1);

    let outcome = fixture.coordinator.handle_task_message(&tasks[0]).await.unwrap();
    assert!(matches!(
        outcome,
        TaskOutcome::StageCompleted {
            transition: StageTransition::Advanced { next_stage: 2 },
            ..
        }
    ));
    let second = fixture.job_messages().await;
    assert_eq!(second.len(), 1);
    assert_eq!(second[0].stage, 2);

    // Only one of the two job messages may start the stage.
    fixture.coordinator.handle_job_message(&first[0]).await.unwrap();
    let duplicate = fixture.coordinator.handle_job_message(&second[0]).await;
    assert!(matches!(
        duplicate,
        Err(CoordinatorError::InvalidTransition { .. })
    ));
    fixture.run_until_idle().await;
    assert_eq!(fixture.job(job_id).await.status, JobStatus::Completed);
}

#[tokio::test]
async fn test_held_finalization_lease_defers_redelivery() {
    let fixture = Fixture::new(two_stage_workflow(), test_config()).await;
    let (job_id, tasks) = fixture.start("pipeline").await;

    fixture.store.fail_next("advance_job_stage", 1);
    assert!(fixture.coordinator.handle_task_message(&tasks[0]).await.is_err());

    let claim = fixture
        .store
        .claim_stage_finalization(job_id, 1, Duration::from_secs(60))
        .await
        .unwrap();
    assert_eq!(claim, StageClaim::Claimed);

    let result = fixture.coordinator.handle_task_message(&tasks[0]).await;
    assert!(matches!(
        result,
        Err(CoordinatorError::StageFinalizing { stage: 1, .. })
    ));
    assert_eq!(fixture.job(job_id).await.status, JobStatus::Processing);

    fixture
        .store
        .release_stage_finalization(job_id, 1)
        .await
        .unwrap();
    let outcome = fixture.coordinator.handle_task_message(&tasks[0]).await.unwrap();
    assert!(matches!(outcome, TaskOutcome::StageCompleted { .. }));
}

#[tokio::test]
async fn test_transient_task_send_is_retried_in_place() {
    let fixture = Fixture::new(single_stage_workflow(vec![json!(1), json!(2)]), test_config()).await;
    let job = fixture.coordinator.submit("report", json!({})).await.unwrap();
    let job_msg = fixture.job_messages().await.remove(0);

    fixture
        .gateway
        .fail_next_sends(&fixture.config.queues.task_queue, 2);
    let outcome = fixture.coordinator.handle_job_message(&job_msg).await.unwrap();
    assert!(matches!(
        outcome,
        JobOutcome::TasksEnqueued { task_count: 2, .. }
    ));
    assert_eq!(fixture.gateway.failed_sends(), 2);

    let tasks = fixture.store.list_tasks(job.job_id, Some(1)).await.unwrap();
    assert_eq!(tasks.len(), 2);
    assert_eq!(fixture.task_messages().await.len(), 2);
    assert_eq!(fixture.store.inner.remaining_tasks(job.job_id, 1), Some(2));
}

#[tokio::test]
async fn test_batched_send_failure_is_retried_in_place() {
    let mut config = test_config();
    config.orchestration.batch_threshold = 2;
    config.queues.max_batch_size = 2;
    let tasks: Vec<Value> = (0..5).map(|n| json!(n)).collect();
    let fixture = Fixture::new(single_stage_workflow(tasks), config).await;
    let job = fixture.coordinator.submit("report", json!({})).await.unwrap();
    let job_msg = fixture.job_messages().await.remove(0);

    fixture
        .gateway
        .fail_next_sends(&fixture.config.queues.task_queue, 1);
    let outcome = fixture.coordinator.handle_job_message(&job_msg).await.unwrap();
    assert!(matches!(
        outcome,
        JobOutcome::TasksEnqueued { task_count: 5, .. }
    ));

    let sequences: Vec<i32> = fixture
        .store
        .list_tasks(job.job_id, Some(1))
        .await
        .unwrap()
        .iter()
        .map(|task| task.sequence)
        .collect();
    assert_eq!(sequences, vec![0, 1, 2, 3, 4]);
    assert_eq!(fixture.task_messages().await.len(), 5);
}

#[tokio::test]
async fn test_persistent_task_send_failure_fails_job() {
    let fixture = Fixture::new(single_stage_workflow(vec![json!(1)]), test_config()).await;
    let job = fixture.coordinator.submit("report", json!({})).await.unwrap();
    let job_msg = fixture.job_messages().await.remove(0);

    fixture
        .gateway
        .fail_next_sends(&fixture.config.queues.task_queue, 100);
    let outcome = fixture.coordinator.handle_job_message(&job_msg).await.unwrap();
    match outcome {
        JobOutcome::JobFailed { stage, reason, .. } => {
            assert_eq!(stage, 1);
            assert!(reason.contains("could not be started"));
            assert!(reason.contains("injected outage"));
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert_eq!(
        fixture.gateway.failed_sends(),
        fixture.config.orchestration.enqueue_attempts as usize
    );

    let job = fixture.job(job.job_id).await;
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.error_message.unwrap().contains("injected outage"));
}

#[tokio::test]
async fn test_unrecordable_stage_failure_returns_original_error() {
    let fixture = Fixture::new(single_stage_workflow(vec![json!(1)]), test_config()).await;
    let job = fixture.coordinator.submit("report", json!({})).await.unwrap();
    let job_msg = fixture.job_messages().await.remove(0);

    fixture
        .gateway
        .fail_next_sends(&fixture.config.queues.task_queue, 100);
    fixture.store.fail_next("fail_job", 1);
    let result = fixture.coordinator.handle_job_message(&job_msg).await;
    assert!(
        matches!(result, Err(CoordinatorError::Messaging(_))),
        "unexpected result: {result:?}"
    );
    assert_eq!(fixture.job(job.job_id).await.status, JobStatus::Processing);
}

#[tokio::test]
async fn test_empty_stage_finish_is_retried_in_place() {
    let fixture = Fixture::new(single_stage_workflow(Vec::new()), test_config()).await;
    let job = fixture.coordinator.submit("report", json!({})).await.unwrap();
    let job_msg = fixture.job_messages().await.remove(0);

    fixture.store.fail_next("open_stage", 1);
    fixture.store.fail_next("stage_results", 1);
    let outcome = fixture.coordinator.handle_job_message(&job_msg).await.unwrap();
    assert!(matches!(
        outcome,
        JobOutcome::EmptyStage {
            transition: StageTransition::JobCompleted,
            ..
        }
    ));
    let job = fixture.job(job.job_id).await;
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.result, Some(json!([])));
}

#[tokio::test]
async fn test_fan_in_results_load_is_retried_in_place() {
    let workflow = StaticWorkflow::new(
        "merge",
        vec![
            StageDescriptor::fan_out(1, "step"),
            StageDescriptor::fan_in(2, "step"),
        ],
    )
    .with_tasks(1, vec![json!("a"), json!("b")])
    .with_tasks(2, vec![json!("merge")]);
    let fixture = Fixture::new(workflow, test_config()).await;
    let (job_id, tasks) = fixture.start("merge").await;
    for task in &tasks {
        fixture.coordinator.handle_task_message(task).await.unwrap();
    }

    let job_msg = fixture.job_messages().await.remove(0);
    assert_eq!(job_msg.stage, 2);
    fixture.store.fail_next("stage_results", 2);
    let outcome = fixture.coordinator.handle_job_message(&job_msg).await.unwrap();
    assert!(matches!(
        outcome,
        JobOutcome::TasksEnqueued { stage: 2, .. }
    ));

    fixture.run_until_idle().await;
    assert_eq!(fixture.job(job_id).await.status, JobStatus::Completed);
}
