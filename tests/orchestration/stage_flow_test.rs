use std::sync::Arc;

use serde_json::{json, Value};

use crate::common::{echo_handler, job_messages, task_messages, StaticWorkflow, TestHarness};
use jobflow_core::database::StateStore;
use jobflow_core::models::StageDescriptor;
use jobflow_core::orchestration::{JobOutcome, StageTransition, TaskOutcome};
use jobflow_core::registry::{FnTaskHandler, TaskHandler, WorkflowDescriptor};
use jobflow_core::{CoordinatorError, JobStatus, TaskStatus};

fn fixed_result_handler(result: Value) -> Arc<dyn TaskHandler> {
    Arc::new(FnTaskHandler::new(move |_parameters: Value| {
        let result = result.clone();
        async move { Ok(result) }
    }))
}

fn identity_handler() -> Arc<dyn TaskHandler> {
    Arc::new(FnTaskHandler::new(|parameters: Value| async move {
        Ok(parameters)
    }))
}

#[tokio::test]
async fn test_single_stage_job_completes_with_handler_result() {
    let workflow = StaticWorkflow::new("ping", vec![StageDescriptor::single(1, "respond")])
        .with_tasks(1, vec![json!({})]);
    let harness = TestHarness::new(
        vec![Arc::new(workflow)],
        vec![("respond", fixed_result_handler(json!({"ok": true})))],
    )
    .await;

    let job = harness.submit("ping", json!({"target": "a"})).await;
    assert_eq!(job.status, JobStatus::Queued);
    assert_eq!(job.current_stage, 1);
    assert_eq!(job.total_stages, 1);

    harness.run_until_idle().await.unwrap();

    let job = harness.job(&job).await;
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.result, Some(json!({"ok": true})));
    assert!(job.completed_at.is_some());
}

#[tokio::test]
async fn test_fan_out_stage_advances_exactly_once() {
    let tasks: Vec<Value> = (0..5).map(|n| json!({"chunk": n})).collect();
    let workflow = StaticWorkflow::new(
        "split_merge",
        vec![
            StageDescriptor::fan_out(1, "split"),
            StageDescriptor::single(2, "merge"),
        ],
    )
    .with_tasks(1, tasks)
    .with_tasks(2, vec![json!({"merge": true})]);
    let harness = TestHarness::new(
        vec![Arc::new(workflow)],
        vec![("split", echo_handler()), ("merge", echo_handler())],
    )
    .await;

    let job = harness.submit("split_merge", json!({})).await;

    let stage_one = job_messages(&harness.drain_jobs().await);
    assert_eq!(stage_one.len(), 1);
    assert_eq!(stage_one[0].stage, 1);

    let outcome = harness
        .coordinator
        .handle_job_message(&stage_one[0])
        .await
        .unwrap();
    assert_eq!(
        outcome,
        JobOutcome::TasksEnqueued {
            job_id: job.job_id,
            stage: 1,
            task_count: 5
        }
    );
    assert_eq!(harness.job(&job).await.status, JobStatus::Processing);

    let task_msgs = task_messages(&harness.drain_tasks().await);
    assert_eq!(task_msgs.len(), 5);

    let mut stage_completions = 0;
    for message in &task_msgs {
        match harness.coordinator.handle_task_message(message).await.unwrap() {
            TaskOutcome::Completed { .. } => {}
            TaskOutcome::StageCompleted {
                stage, transition, ..
            } => {
                assert_eq!(stage, 1);
                assert_eq!(transition, StageTransition::Advanced { next_stage: 2 });
                stage_completions += 1;
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }
    assert_eq!(stage_completions, 1);

    // Job passes through QUEUED before the stage 2 message makes it PROCESSING
    let queued = harness.job(&job).await;
    assert_eq!(queued.status, JobStatus::Queued);
    assert_eq!(queued.current_stage, 2);

    let stage_two = job_messages(&harness.drain_jobs().await);
    assert_eq!(stage_two.len(), 1);
    assert_eq!(stage_two[0].stage, 2);

    harness
        .coordinator
        .handle_job_message(&stage_two[0])
        .await
        .unwrap();
    assert_eq!(harness.job(&job).await.status, JobStatus::Processing);

    harness.run_until_idle().await.unwrap();
    let job = harness.job(&job).await;
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.result, Some(json!({"echo": {"merge": true}})));
}

#[tokio::test]
async fn test_fan_in_receives_exactly_previous_stage_results() {
    let workflow = StaticWorkflow::new(
        "gather",
        vec![
            StageDescriptor::fan_out(1, "measure"),
            StageDescriptor::fan_in(2, "combine"),
        ],
    )
    .with_tasks(1, vec![json!({"n": 1}), json!({"n": 2}), json!({"n": 3})]);
    let harness = TestHarness::new(
        vec![Arc::new(workflow)],
        vec![("measure", echo_handler()), ("combine", identity_handler())],
    )
    .await;

    let job = harness.submit("gather", json!({"label": "sizes"})).await;
    harness.run_until_idle().await.unwrap();

    let job = harness.job(&job).await;
    assert_eq!(job.status, JobStatus::Completed);

    let result = job.result.unwrap();
    assert_eq!(
        result["results"],
        json!([{"echo": {"n": 1}}, {"echo": {"n": 2}}, {"echo": {"n": 3}}])
    );
    assert_eq!(result["job_parameters"], json!({"label": "sizes"}));
    assert_eq!(result["aggregation"]["stage"], 2);
    assert_eq!(result["aggregation"]["source_stage"], 1);
    assert_eq!(result["aggregation"]["result_count"], 3);
    assert_eq!(result["aggregation"]["pattern"], "fan_in");

    let fan_in_tasks = harness.store.list_tasks(job.job_id, Some(2)).await.unwrap();
    assert_eq!(fan_in_tasks.len(), 1);
    assert_eq!(fan_in_tasks[0].task_type, "combine");
}

#[tokio::test]
async fn test_final_fan_out_results_aggregate_in_sequence_order() {
    let workflow = StaticWorkflow::new("scan", vec![StageDescriptor::fan_out(1, "inspect")])
        .with_tasks(1, vec![json!("a"), json!("b"), json!("c")]);
    let harness =
        TestHarness::new(vec![Arc::new(workflow)], vec![("inspect", echo_handler())]).await;

    let job = harness.submit("scan", json!({})).await;
    harness.run_until_idle().await.unwrap();

    let job = harness.job(&job).await;
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(
        job.result,
        Some(json!([{"echo": "a"}, {"echo": "b"}, {"echo": "c"}]))
    );
}

#[tokio::test]
async fn test_stage_without_tasks_advances_directly() {
    let workflow = StaticWorkflow::new(
        "sparse",
        vec![
            StageDescriptor::fan_out(1, "inspect"),
            StageDescriptor::single(2, "report"),
        ],
    )
    .with_tasks(1, Vec::new())
    .with_tasks(2, vec![json!({"report": "empty"})]);
    let harness = TestHarness::new(
        vec![Arc::new(workflow)],
        vec![("inspect", echo_handler()), ("report", echo_handler())],
    )
    .await;

    let job = harness.submit("sparse", json!({})).await;
    let stage_one = job_messages(&harness.drain_jobs().await);

    let outcome = harness
        .coordinator
        .handle_job_message(&stage_one[0])
        .await
        .unwrap();
    assert_eq!(
        outcome,
        JobOutcome::EmptyStage {
            job_id: job.job_id,
            stage: 1,
            transition: StageTransition::Advanced { next_stage: 2 }
        }
    );

    let stage_two = job_messages(&harness.drain_jobs().await);
    assert_eq!(stage_two.len(), 1);
    assert_eq!(stage_two[0].correlation_id, stage_one[0].correlation_id);

    harness
        .coordinator
        .handle_job_message(&stage_two[0])
        .await
        .unwrap();
    harness.run_until_idle().await.unwrap();
    assert_eq!(harness.job(&job).await.status, JobStatus::Completed);
}

#[tokio::test]
async fn test_workflow_error_fails_job() {
    // No task list for stage 1: the workflow errors while building it
    let workflow = StaticWorkflow::new("broken", vec![StageDescriptor::fan_out(1, "inspect")]);
    let harness =
        TestHarness::new(vec![Arc::new(workflow)], vec![("inspect", echo_handler())]).await;

    let job = harness.submit("broken", json!({})).await;
    let outcomes = harness.run_until_idle().await.unwrap();

    assert!(matches!(
        outcomes.as_slice(),
        [jobflow_core::orchestration::MessageOutcome::Job(JobOutcome::JobFailed { stage: 1, .. })]
    ));
    let job = harness.job(&job).await;
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.error_message.unwrap().contains("stage 1"));
    assert!(harness.store.list_tasks(job.job_id, None).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_single_stage_with_several_tasks_is_contract_violation() {
    let workflow = StaticWorkflow::new("greedy", vec![StageDescriptor::single(1, "inspect")])
        .with_tasks(1, vec![json!(1), json!(2)]);
    let harness =
        TestHarness::new(vec![Arc::new(workflow)], vec![("inspect", echo_handler())]).await;

    harness.submit("greedy", json!({})).await;
    let err = harness.run_until_idle().await.unwrap_err();

    assert!(matches!(err, CoordinatorError::InvalidTaskList { stage: 1, .. }));
    assert!(err.is_contract_violation());
}

#[tokio::test]
async fn test_rejected_parameters_create_nothing() {
    let workflow = StaticWorkflow::new("strict", vec![StageDescriptor::single(1, "inspect")])
        .rejecting_parameters();
    let harness =
        TestHarness::new(vec![Arc::new(workflow)], vec![("inspect", echo_handler())]).await;

    let err = harness
        .coordinator
        .submit("strict", json!({"bad": true}))
        .await
        .unwrap_err();

    assert!(matches!(err, CoordinatorError::Validation { ref job_type, .. } if job_type == "strict"));
    assert!(!err.is_contract_violation());
    assert_eq!(
        harness
            .gateway
            .queue_length(&harness.config.queues.job_queue)
            .await,
        0
    );
}

#[tokio::test]
async fn test_unknown_job_type_is_rejected() {
    let harness = TestHarness::new(Vec::new(), Vec::new()).await;
    let err = harness
        .coordinator
        .submit("nope", json!({}))
        .await
        .unwrap_err();
    assert!(matches!(err, CoordinatorError::UnknownJobType { .. }));
}

#[tokio::test]
async fn test_custom_aggregation_builds_job_result() {
    struct Summing(StaticWorkflow);

    impl WorkflowDescriptor for Summing {
        fn job_type(&self) -> &str {
            self.0.job_type()
        }
        fn stages(&self) -> &[StageDescriptor] {
            self.0.stages()
        }
        fn validate(&self, parameters: Value) -> Result<Value, jobflow_core::TaskError> {
            self.0.validate(parameters)
        }
        fn tasks_for_stage(
            &self,
            stage: i32,
            parameters: &Value,
            prior_results: &[Value],
        ) -> Result<Vec<Value>, jobflow_core::TaskError> {
            self.0.tasks_for_stage(stage, parameters, prior_results)
        }
        fn aggregate(&self, results: Vec<Value>) -> Result<Value, jobflow_core::TaskError> {
            let total: i64 = results.iter().filter_map(Value::as_i64).sum();
            Ok(json!({"total": total}))
        }
    }

    let inner = StaticWorkflow::new("sum", vec![StageDescriptor::fan_out(1, "count")])
        .with_tasks(1, vec![json!(2), json!(3), json!(5)]);
    let harness = TestHarness::new(
        vec![Arc::new(Summing(inner))],
        vec![("count", identity_handler())],
    )
    .await;

    let job = harness.submit("sum", json!({})).await;
    harness.run_until_idle().await.unwrap();

    let job = harness.job(&job).await;
    assert_eq!(job.result, Some(json!({"total": 10})));

    let tasks = harness.store.list_tasks(job.job_id, Some(1)).await.unwrap();
    assert!(tasks.iter().all(|task| task.status == TaskStatus::Completed));
    let sequences: Vec<i32> = tasks.iter().map(|task| task.sequence).collect();
    assert_eq!(sequences, vec![0, 1, 2]);
}
