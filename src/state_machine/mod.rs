// Job and task status machines.
//
// Every status change made by the state store is checked against these
// tables first; an illegal change is an error, never a silent no-op.

pub mod errors;
pub mod states;

pub use errors::{StateMachineError, StateMachineResult};
pub use states::{ensure_job_transition, ensure_task_transition, JobStatus, TaskStatus};
