pub mod job;
pub mod stage;
pub mod task;

// Re-export core models for easy access
pub use job::{Job, NewJob};
pub use stage::{Parallelism, StageClaim, StageDescriptor};
pub use task::{NewTask, Task, TaskCompletion};
