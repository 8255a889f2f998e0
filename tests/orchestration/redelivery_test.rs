use std::sync::Arc;

use serde_json::json;
use uuid::Uuid;

use crate::common::{job_messages, task_messages, ScriptedHandler, StaticWorkflow, TestHarness};
use jobflow_core::database::StateStore;
use jobflow_core::messaging::JobMessage;
use jobflow_core::models::StageDescriptor;
use jobflow_core::orchestration::{StageTransition, TaskOutcome};
use jobflow_core::{CoordinatorError, JobStatus, TaskError};

fn two_task_workflow() -> StaticWorkflow {
    StaticWorkflow::new(
        "pair",
        vec![
            StageDescriptor::fan_out(1, "work"),
            StageDescriptor::single(2, "finish"),
        ],
    )
    .with_tasks(1, vec![json!({"i": 0}), json!({"i": 1})])
    .with_tasks(2, vec![json!({})])
}

#[tokio::test]
async fn test_redelivered_completed_task_is_noop() {
    let handler = ScriptedHandler::new(Vec::new());
    let workflow = StaticWorkflow::new("once", vec![StageDescriptor::single(1, "work")])
        .with_tasks(1, vec![json!({"payload": 1})]);
    let harness =
        TestHarness::new(vec![Arc::new(workflow)], vec![("work", handler.clone())]).await;

    let job = harness.submit("once", json!({})).await;
    let job_msg = job_messages(&harness.drain_jobs().await).remove(0);
    harness.coordinator.handle_job_message(&job_msg).await.unwrap();

    let task_msg = task_messages(&harness.drain_tasks().await).remove(0);
    let first = harness.coordinator.handle_task_message(&task_msg).await.unwrap();
    assert!(matches!(
        first,
        TaskOutcome::StageCompleted {
            transition: StageTransition::JobCompleted,
            ..
        }
    ));

    let second = harness.coordinator.handle_task_message(&task_msg).await.unwrap();
    assert_eq!(
        second,
        TaskOutcome::AlreadyTerminal {
            task_id: task_msg.task_id
        }
    );
    assert_eq!(handler.calls(), 1);
    assert!(harness.drain_jobs().await.is_empty());
    assert_eq!(harness.job(&job).await.status, JobStatus::Completed);
}

#[tokio::test]
async fn test_redelivered_sibling_does_not_advance_twice() {
    let harness = TestHarness::new(
        vec![Arc::new(two_task_workflow())],
        vec![
            ("work", ScriptedHandler::new(Vec::new())),
            ("finish", ScriptedHandler::new(Vec::new())),
        ],
    )
    .await;

    let job = harness.submit("pair", json!({})).await;
    let job_msg = job_messages(&harness.drain_jobs().await).remove(0);
    harness.coordinator.handle_job_message(&job_msg).await.unwrap();

    let tasks = task_messages(&harness.drain_tasks().await);
    harness.coordinator.handle_task_message(&tasks[0]).await.unwrap();
    harness.coordinator.handle_task_message(&tasks[1]).await.unwrap();
    // Late redelivery of either sibling must not send another stage 2 message
    harness.coordinator.handle_task_message(&tasks[0]).await.unwrap();
    harness.coordinator.handle_task_message(&tasks[1]).await.unwrap();

    let next = job_messages(&harness.drain_jobs().await);
    assert_eq!(next.len(), 1);
    assert_eq!(next[0].stage, 2);
    assert_eq!(harness.store.remaining_tasks(job.job_id, 1), Some(0));
}

#[tokio::test]
async fn test_redelivered_job_message_is_contract_violation() {
    let harness = TestHarness::new(
        vec![Arc::new(two_task_workflow())],
        vec![
            ("work", ScriptedHandler::new(Vec::new())),
            ("finish", ScriptedHandler::new(Vec::new())),
        ],
    )
    .await;

    let job = harness.submit("pair", json!({})).await;
    let job_msg = job_messages(&harness.drain_jobs().await).remove(0);
    harness.coordinator.handle_job_message(&job_msg).await.unwrap();

    let err = harness
        .coordinator
        .handle_job_message(&job_msg)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        CoordinatorError::InvalidTransition { entity: "job", ref from, ref to, .. }
            if from == "PROCESSING" && to == "PROCESSING"
    ));
    assert!(err.is_contract_violation());

    // No tasks were recreated
    let tasks = harness.store.list_tasks(job.job_id, Some(1)).await.unwrap();
    assert_eq!(tasks.len(), 2);
    assert_eq!(task_messages(&harness.drain_tasks().await).len(), 2);
}

#[tokio::test]
async fn test_stale_job_message_for_earlier_stage_is_rejected() {
    let harness = TestHarness::new(
        vec![Arc::new(two_task_workflow())],
        vec![
            ("work", ScriptedHandler::new(Vec::new())),
            ("finish", ScriptedHandler::new(Vec::new())),
        ],
    )
    .await;

    harness.submit("pair", json!({})).await;
    let stage_one = job_messages(&harness.drain_jobs().await).remove(0);
    harness.coordinator.handle_job_message(&stage_one).await.unwrap();
    for message in task_messages(&harness.drain_tasks().await) {
        harness.coordinator.handle_task_message(&message).await.unwrap();
    }

    // Job is QUEUED for stage 2 now; a stage 1 message is out of date
    let err = harness
        .coordinator
        .handle_job_message(&stage_one)
        .await
        .unwrap_err();
    assert!(matches!(err, CoordinatorError::InvalidTransition { .. }));
    assert!(err.to_string().contains("stage 2"));
}

#[tokio::test]
async fn test_job_message_with_wrong_job_type_is_malformed() {
    let harness = TestHarness::new(
        vec![Arc::new(two_task_workflow())],
        vec![
            ("work", ScriptedHandler::new(Vec::new())),
            ("finish", ScriptedHandler::new(Vec::new())),
        ],
    )
    .await;

    let job = harness.submit("pair", json!({})).await;
    let err = harness
        .coordinator
        .handle_job_message(&JobMessage::new(job.job_id, "other", 1))
        .await
        .unwrap_err();
    assert!(matches!(err, CoordinatorError::MalformedMessage { .. }));
    assert_eq!(harness.job(&job).await.status, JobStatus::Queued);
}

#[tokio::test]
async fn test_job_message_for_missing_job() {
    let harness = TestHarness::new(Vec::new(), Vec::new()).await;
    let job_id = Uuid::new_v4();
    let err = harness
        .coordinator
        .handle_job_message(&JobMessage::new(job_id, "pair", 1))
        .await
        .unwrap_err();
    assert!(matches!(err, CoordinatorError::JobNotFound { job_id: id } if id == job_id));
}

#[tokio::test]
async fn test_sibling_of_failed_task_is_not_executed() {
    let work = ScriptedHandler::new(vec![Err(TaskError::invalid_input("corrupt chunk"))]);
    let harness = TestHarness::new(
        vec![Arc::new(two_task_workflow())],
        vec![
            ("work", work.clone()),
            ("finish", ScriptedHandler::new(Vec::new())),
        ],
    )
    .await;

    let job = harness.submit("pair", json!({})).await;
    let job_msg = job_messages(&harness.drain_jobs().await).remove(0);
    harness.coordinator.handle_job_message(&job_msg).await.unwrap();

    let tasks = task_messages(&harness.drain_tasks().await);
    let first = harness.coordinator.handle_task_message(&tasks[0]).await.unwrap();
    assert!(matches!(first, TaskOutcome::Failed { job_failed: true, .. }));

    let second = harness.coordinator.handle_task_message(&tasks[1]).await.unwrap();
    assert_eq!(
        second,
        TaskOutcome::JobNotActive {
            task_id: tasks[1].task_id,
            job_status: JobStatus::Failed
        }
    );
    assert_eq!(work.calls(), 1);
    assert_eq!(harness.job(&job).await.status, JobStatus::Failed);
}
