//! # Orchestration Context
//!
//! The collaborators every coordinator component shares. Holds no job or
//! task state; everything mutable lives in the state store.

use std::sync::Arc;

use crate::config::{JobflowConfig, OrchestrationConfig, QueuesConfig};
use crate::database::StateStore;
use crate::messaging::QueueGateway;
use crate::registry::{JobRegistry, TaskHandlerRegistry};

use super::retry_policy::RetryPolicy;

#[derive(Clone)]
pub struct OrchestrationContext {
    pub store: Arc<dyn StateStore>,
    pub gateway: Arc<dyn QueueGateway>,
    pub jobs: Arc<JobRegistry>,
    pub handlers: Arc<TaskHandlerRegistry>,
    pub retry_policy: RetryPolicy,
    /// In-place retry of infrastructure steps while starting a stage
    pub enqueue_retry: RetryPolicy,
    pub queues: QueuesConfig,
    pub orchestration: OrchestrationConfig,
}

impl std::fmt::Debug for OrchestrationContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrchestrationContext")
            .field("gateway", &self.gateway.provider_name())
            .field("jobs", &self.jobs)
            .field("handlers", &self.handlers)
            .field("retry_policy", &self.retry_policy)
            .field("enqueue_retry", &self.enqueue_retry)
            .field("queues", &self.queues)
            .field("orchestration", &self.orchestration)
            .finish()
    }
}

impl OrchestrationContext {
    pub fn new(
        store: Arc<dyn StateStore>,
        gateway: Arc<dyn QueueGateway>,
        jobs: Arc<JobRegistry>,
        handlers: Arc<TaskHandlerRegistry>,
        config: &JobflowConfig,
    ) -> Self {
        Self {
            store,
            gateway,
            jobs,
            handlers,
            retry_policy: RetryPolicy::from_config(&config.retry),
            enqueue_retry: RetryPolicy::for_enqueue(&config.orchestration),
            queues: config.queues.clone(),
            orchestration: config.orchestration.clone(),
        }
    }

    /// Largest aligned batch: the configured size, capped by the transport
    pub fn batch_size(&self) -> usize {
        self.queues
            .max_batch_size
            .min(self.gateway.max_batch_size())
            .max(1)
    }
}
