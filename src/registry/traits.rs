//! # Workflow and Handler Contracts
//!
//! The two seams through which business logic plugs into the coordinator.
//! Both are looked up by name and treated as black boxes.

use std::future::Future;
use std::marker::PhantomData;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::TaskError;
use crate::models::StageDescriptor;

/// Definition of one job type: its stages and how their tasks are built
pub trait WorkflowDescriptor: Send + Sync + 'static {
    /// Registry key
    fn job_type(&self) -> &str;

    /// Stages in order, numbered contiguously from 1
    fn stages(&self) -> &[StageDescriptor];

    /// Check submitted parameters, possibly normalizing them
    fn validate(&self, parameters: Value) -> Result<Value, TaskError>;

    /// Parameters of each task of a SINGLE or FAN_OUT stage
    ///
    /// `prior_results` holds the results of the previous stage (empty for
    /// stage 1). Never called for FAN_IN stages.
    fn tasks_for_stage(
        &self,
        stage: i32,
        parameters: &Value,
        prior_results: &[Value],
    ) -> Result<Vec<Value>, TaskError>;

    /// Combine the final stage's results into the job result
    ///
    /// By default a single result is used as-is and several become an array.
    fn aggregate(&self, mut results: Vec<Value>) -> Result<Value, TaskError> {
        if results.len() == 1 {
            Ok(results.remove(0))
        } else {
            Ok(Value::Array(results))
        }
    }

    fn stage(&self, stage_number: i32) -> Option<&StageDescriptor> {
        self.stages()
            .iter()
            .find(|stage| stage.stage_number == stage_number)
    }

    fn total_stages(&self) -> i32 {
        i32::try_from(self.stages().len()).unwrap_or(i32::MAX)
    }
}

/// Executable logic for one task type
#[async_trait]
pub trait TaskHandler: Send + Sync + 'static {
    async fn execute(&self, parameters: Value) -> Result<Value, TaskError>;
}

/// [`TaskHandler`] backed by an async closure
pub struct FnTaskHandler<F, Fut> {
    func: F,
    _future: PhantomData<fn() -> Fut>,
}

impl<F, Fut> FnTaskHandler<F, Fut>
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, TaskError>> + Send + 'static,
{
    pub fn new(func: F) -> Self {
        Self {
            func,
            _future: PhantomData,
        }
    }
}

#[async_trait]
impl<F, Fut> TaskHandler for FnTaskHandler<F, Fut>
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, TaskError>> + Send + 'static,
{
    async fn execute(&self, parameters: Value) -> Result<Value, TaskError> {
        (self.func)(parameters).await
    }
}
