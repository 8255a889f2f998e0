//! # Job Registry
//!
//! Read-only map from job type to workflow descriptor, built once at startup
//! through explicit registration and shared behind an `Arc`.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::info;

use super::task_handler_registry::TaskHandlerRegistry;
use super::traits::WorkflowDescriptor;
use crate::config::{ConfigResult, ConfigurationError};
use crate::models::Parallelism;

#[derive(Default)]
pub struct JobRegistryBuilder {
    workflows: HashMap<String, Arc<dyn WorkflowDescriptor>>,
}

impl JobRegistryBuilder {
    /// Register a workflow, rejecting duplicates and malformed stage lists
    pub fn register(mut self, workflow: Arc<dyn WorkflowDescriptor>) -> ConfigResult<Self> {
        let job_type = workflow.job_type().to_string();
        if job_type.is_empty() {
            return Err(ConfigurationError::invalid_registration(
                job_type,
                "job type must not be empty",
            ));
        }
        if self.workflows.contains_key(&job_type) {
            return Err(ConfigurationError::invalid_registration(
                job_type,
                "job type registered twice",
            ));
        }
        validate_stages(workflow.as_ref())?;

        self.workflows.insert(job_type, workflow);
        Ok(self)
    }

    pub fn build(self) -> JobRegistry {
        info!(workflows = self.workflows.len(), "📚 Job registry built");
        JobRegistry {
            workflows: self.workflows,
        }
    }
}

fn validate_stages(workflow: &dyn WorkflowDescriptor) -> ConfigResult<()> {
    let job_type = workflow.job_type();
    let stages = workflow.stages();

    if stages.is_empty() {
        return Err(ConfigurationError::invalid_registration(
            job_type,
            "workflow defines no stages",
        ));
    }

    for (index, stage) in stages.iter().enumerate() {
        let expected = i32::try_from(index + 1).unwrap_or(i32::MAX);
        if stage.stage_number != expected {
            return Err(ConfigurationError::invalid_registration(
                job_type,
                format!(
                    "stage numbers must be contiguous from 1: found {} at position {}",
                    stage.stage_number, expected
                ),
            ));
        }
        if stage.task_type.is_empty() {
            return Err(ConfigurationError::invalid_registration(
                job_type,
                format!("stage {} has no task type", stage.stage_number),
            ));
        }
        if stage.parallelism == Parallelism::FanIn && stage.stage_number == 1 {
            return Err(ConfigurationError::invalid_registration(
                job_type,
                "a FAN_IN stage needs a preceding stage",
            ));
        }
    }
    Ok(())
}

/// Immutable job type -> workflow map
#[derive(Clone)]
pub struct JobRegistry {
    workflows: HashMap<String, Arc<dyn WorkflowDescriptor>>,
}

impl std::fmt::Debug for JobRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobRegistry")
            .field("job_types", &self.job_types())
            .finish()
    }
}

impl JobRegistry {
    pub fn builder() -> JobRegistryBuilder {
        JobRegistryBuilder::default()
    }

    pub fn get(&self, job_type: &str) -> Option<Arc<dyn WorkflowDescriptor>> {
        self.workflows.get(job_type).cloned()
    }

    pub fn contains(&self, job_type: &str) -> bool {
        self.workflows.contains_key(job_type)
    }

    /// Registered job types, sorted
    pub fn job_types(&self) -> Vec<&str> {
        let mut job_types: Vec<&str> = self.workflows.keys().map(String::as_str).collect();
        job_types.sort_unstable();
        job_types
    }

    pub fn len(&self) -> usize {
        self.workflows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workflows.is_empty()
    }

    /// Check that every stage's task type has a handler
    pub fn verify_handlers(&self, handlers: &TaskHandlerRegistry) -> ConfigResult<()> {
        for job_type in self.job_types() {
            let Some(workflow) = self.workflows.get(job_type) else {
                continue;
            };
            for stage in workflow.stages() {
                if !handlers.contains(&stage.task_type) {
                    return Err(ConfigurationError::invalid_registration(
                        job_type,
                        format!(
                            "stage {} uses task type '{}' with no registered handler",
                            stage.stage_number, stage.task_type
                        ),
                    ));
                }
            }
        }
        Ok(())
    }
}
