use std::sync::Arc;

use serde_json::{json, Value};

use crate::common::{job_messages, task_messages, StaticWorkflow, TestHarness};
use jobflow_core::models::StageDescriptor;
use jobflow_core::orchestration::{StageTransition, TaskOutcome};
use jobflow_core::registry::{FnTaskHandler, TaskHandler};
use jobflow_core::{CoordinatorError, JobStatus};

fn yielding_handler() -> Arc<dyn TaskHandler> {
    Arc::new(FnTaskHandler::new(|parameters: Value| async move {
        tokio::task::yield_now().await;
        Ok(parameters)
    }))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_concurrent_sibling_completions_advance_stage_once() {
    const TASKS: usize = 40;

    let workflow = StaticWorkflow::new(
        "burst",
        vec![
            StageDescriptor::fan_out(1, "tick"),
            StageDescriptor::single(2, "tock"),
        ],
    )
    .with_tasks(1, (0..TASKS).map(|n| json!({"n": n})).collect())
    .with_tasks(2, vec![json!({})]);
    let harness = TestHarness::new(
        vec![Arc::new(workflow)],
        vec![("tick", yielding_handler()), ("tock", yielding_handler())],
    )
    .await;

    for _ in 0..5 {
        let job = harness.submit("burst", json!({})).await;
        let job_msg = job_messages(&harness.drain_jobs().await).remove(0);
        harness.coordinator.handle_job_message(&job_msg).await.unwrap();

        let handles: Vec<_> = task_messages(&harness.drain_tasks().await)
            .into_iter()
            .map(|message| {
                let coordinator = harness.coordinator.clone();
                tokio::spawn(async move { coordinator.handle_task_message(&message).await })
            })
            .collect();
        assert_eq!(handles.len(), TASKS);

        let mut advanced = 0;
        for handle in handles {
            match handle.await.unwrap().unwrap() {
                TaskOutcome::StageCompleted { transition, .. } => {
                    assert_eq!(transition, StageTransition::Advanced { next_stage: 2 });
                    advanced += 1;
                }
                TaskOutcome::Completed { .. } => {}
                other => panic!("unexpected outcome: {other:?}"),
            }
        }
        assert_eq!(advanced, 1);

        let next = job_messages(&harness.drain_jobs().await);
        assert_eq!(next.len(), 1);
        assert_eq!(next[0].job_id, job.job_id);
        assert_eq!(next[0].stage, 2);

        let job = harness.job(&job).await;
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.current_stage, 2);
        assert_eq!(harness.store.remaining_tasks(job.job_id, 1), Some(0));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_duplicate_deliveries_complete_once() {
    let workflow = StaticWorkflow::new("dup", vec![StageDescriptor::single(1, "tick")])
        .with_tasks(1, vec![json!({"n": 1})]);
    let harness =
        TestHarness::new(vec![Arc::new(workflow)], vec![("tick", yielding_handler())]).await;

    let job = harness.submit("dup", json!({})).await;
    let job_msg = job_messages(&harness.drain_jobs().await).remove(0);
    harness.coordinator.handle_job_message(&job_msg).await.unwrap();
    let message = task_messages(&harness.drain_tasks().await).remove(0);

    let handles: Vec<_> = (0..6)
        .map(|_| {
            let coordinator = harness.coordinator.clone();
            let message = message.clone();
            tokio::spawn(async move { coordinator.handle_task_message(&message).await })
        })
        .collect();

    let mut completions = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(TaskOutcome::StageCompleted {
                transition: StageTransition::JobCompleted,
                ..
            }) => completions += 1,
            Ok(TaskOutcome::AlreadyTerminal { .. })
            | Ok(TaskOutcome::JobNotActive { .. })
            | Ok(TaskOutcome::Completed {
                remaining_tasks: 0,
                ..
            }) => {}
            // A duplicate that arrives mid-finalization stays un-acked.
            Err(CoordinatorError::StageFinalizing { .. }) => {}
            other => panic!("unexpected outcome: {other:?}"),
        }
    }
    assert_eq!(completions, 1);
    assert_eq!(harness.job(&job).await.status, JobStatus::Completed);
}
