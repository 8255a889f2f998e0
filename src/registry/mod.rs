//! # Registries
//!
//! Two flat, read-only maps populated once at startup by explicit
//! registration: job type -> [`WorkflowDescriptor`] and task type ->
//! [`TaskHandler`]. The coordinator never contains job-specific logic; it
//! only dispatches through these.

pub mod job_registry;
pub mod task_handler_registry;
pub mod traits;

pub use job_registry::{JobRegistry, JobRegistryBuilder};
pub use task_handler_registry::{TaskHandlerRegistry, TaskHandlerRegistryBuilder};
pub use traits::{FnTaskHandler, TaskHandler, WorkflowDescriptor};
