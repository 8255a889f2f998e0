//! # System Constants
//!
//! Defaults and hard limits shared by configuration, the queue gateways and
//! the coordinator.

/// Queue carrying job (stage start) messages
pub const DEFAULT_JOB_QUEUE: &str = "jobflow_jobs";

/// Queue carrying task messages
pub const DEFAULT_TASK_QUEUE: &str = "jobflow_tasks";

/// Largest batch the queue transport accepts in one send
pub const MAX_TRANSPORT_BATCH_SIZE: usize = 100;

/// Task count above which a stage is persisted and enqueued in batches
pub const DEFAULT_BATCH_THRESHOLD: usize = 50;

pub const DEFAULT_VISIBILITY_TIMEOUT_SECONDS: u64 = 300;
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;
pub const DEFAULT_RECEIVE_BATCH_SIZE: usize = 10;

/// Retry defaults
pub mod retry {
    pub const BASE_DELAY_MS: u64 = 5_000;
    pub const MAX_DELAY_MS: u64 = 300_000;
    /// Total executions of a task, first attempt included
    pub const MAX_ATTEMPTS: u32 = 3;
}

/// In-place retry of infrastructure steps after a stage has started
pub mod enqueue_retry {
    /// Total tries of one enqueue unit, first included
    pub const ATTEMPTS: u32 = 3;
    pub const BASE_DELAY_MS: u64 = 100;
    pub const MAX_DELAY_MS: u64 = 2_000;
}

/// Pattern name recorded in fan-in aggregation metadata
pub const FAN_IN_PATTERN: &str = "fan_in";

/// Environment variable selecting the runtime environment
pub const ENVIRONMENT_VAR: &str = "JOBFLOW_ENV";

/// Prefix for configuration overrides (`JOBFLOW__RETRY__MAX_ATTEMPTS=5`)
pub const CONFIG_ENV_PREFIX: &str = "JOBFLOW";
