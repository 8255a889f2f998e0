//! # Task Handler Registry
//!
//! Read-only map from task type to executable handler.
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use jobflow_core::registry::{FnTaskHandler, TaskHandler, TaskHandlerRegistry};
//! use serde_json::{json, Value};
//!
//! # tokio_test::block_on(async {
//! let registry = TaskHandlerRegistry::builder()
//!     .register(
//!         "double",
//!         Arc::new(FnTaskHandler::new(|params: Value| async move {
//!             Ok(json!(params.as_i64().unwrap_or(0) * 2))
//!         })),
//!     )
//!     .unwrap()
//!     .build();
//!
//! let handler = registry.get("double").unwrap();
//! assert_eq!(handler.execute(json!(21)).await.unwrap(), json!(42));
//! # });
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use tracing::info;

use super::traits::TaskHandler;
use crate::config::{ConfigResult, ConfigurationError};

#[derive(Default)]
pub struct TaskHandlerRegistryBuilder {
    handlers: HashMap<String, Arc<dyn TaskHandler>>,
}

impl TaskHandlerRegistryBuilder {
    pub fn register(
        mut self,
        task_type: impl Into<String>,
        handler: Arc<dyn TaskHandler>,
    ) -> ConfigResult<Self> {
        let task_type = task_type.into();
        if task_type.is_empty() {
            return Err(ConfigurationError::invalid_registration(
                task_type,
                "task type must not be empty",
            ));
        }
        if self.handlers.contains_key(&task_type) {
            return Err(ConfigurationError::invalid_registration(
                task_type,
                "task type registered twice",
            ));
        }

        self.handlers.insert(task_type, handler);
        Ok(self)
    }

    pub fn build(self) -> TaskHandlerRegistry {
        info!(handlers = self.handlers.len(), "📚 Task handler registry built");
        TaskHandlerRegistry {
            handlers: self.handlers,
        }
    }
}

/// Immutable task type -> handler map
#[derive(Clone)]
pub struct TaskHandlerRegistry {
    handlers: HashMap<String, Arc<dyn TaskHandler>>,
}

impl std::fmt::Debug for TaskHandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut task_types: Vec<&String> = self.handlers.keys().collect();
        task_types.sort_unstable();
        f.debug_struct("TaskHandlerRegistry")
            .field("task_types", &task_types)
            .finish()
    }
}

impl TaskHandlerRegistry {
    pub fn builder() -> TaskHandlerRegistryBuilder {
        TaskHandlerRegistryBuilder::default()
    }

    pub fn get(&self, task_type: &str) -> Option<Arc<dyn TaskHandler>> {
        self.handlers.get(task_type).cloned()
    }

    pub fn contains(&self, task_type: &str) -> bool {
        self.handlers.contains_key(task_type)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
