//! # Jobflow Configuration
//!
//! Typed configuration for the coordinator, loaded in layers by
//! [`ConfigLoader`]: compiled defaults, an optional TOML file, then
//! `JOBFLOW__SECTION__KEY` environment variables.
//!
//! ```toml
//! [queues]
//! job_queue = "jobflow_jobs"
//! task_queue = "jobflow_tasks"
//! max_batch_size = 100
//!
//! [retry]
//! base_delay_ms = 5000
//! max_delay_ms = 300000
//! max_attempts = 3
//! ```
//!
//! Validation failures are [`ConfigurationError`]s and stop startup.

pub mod error;
pub mod loader;

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::constants;

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigLoader;

/// Root configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobflowConfig {
    pub database: DatabaseConfig,
    pub queues: QueuesConfig,
    pub retry: RetryConfig,
    pub orchestration: OrchestrationConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub acquire_timeout_seconds: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "postgresql://localhost/jobflow".to_string(),
            max_connections: 10,
            acquire_timeout_seconds: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueuesConfig {
    pub job_queue: String,
    pub task_queue: String,
    /// Transport maximum for one batch send
    pub max_batch_size: usize,
    pub visibility_timeout_seconds: u64,
    pub poll_interval_ms: u64,
    /// Messages read per poll of each queue
    pub receive_batch_size: usize,
}

impl Default for QueuesConfig {
    fn default() -> Self {
        Self {
            job_queue: constants::DEFAULT_JOB_QUEUE.to_string(),
            task_queue: constants::DEFAULT_TASK_QUEUE.to_string(),
            max_batch_size: constants::MAX_TRANSPORT_BATCH_SIZE,
            visibility_timeout_seconds: constants::DEFAULT_VISIBILITY_TIMEOUT_SECONDS,
            poll_interval_ms: constants::DEFAULT_POLL_INTERVAL_MS,
            receive_batch_size: constants::DEFAULT_RECEIVE_BATCH_SIZE,
        }
    }
}

impl QueuesConfig {
    pub fn visibility_timeout(&self) -> Duration {
        Duration::from_secs(self.visibility_timeout_seconds)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Total executions allowed per task, first attempt included
    pub max_attempts: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: constants::retry::BASE_DELAY_MS,
            max_delay_ms: constants::retry::MAX_DELAY_MS,
            max_attempts: constants::retry::MAX_ATTEMPTS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestrationConfig {
    /// Stages with more tasks than this are persisted and enqueued in batches
    pub batch_threshold: usize,
    /// Tries per enqueue unit (one task, or one aligned batch) before the
    /// stage is abandoned and its job failed
    pub enqueue_attempts: u32,
    pub enqueue_retry_base_delay_ms: u64,
    pub enqueue_retry_max_delay_ms: u64,
}

impl Default for OrchestrationConfig {
    fn default() -> Self {
        Self {
            batch_threshold: constants::DEFAULT_BATCH_THRESHOLD,
            enqueue_attempts: constants::enqueue_retry::ATTEMPTS,
            enqueue_retry_base_delay_ms: constants::enqueue_retry::BASE_DELAY_MS,
            enqueue_retry_max_delay_ms: constants::enqueue_retry::MAX_DELAY_MS,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub format: LogFormat,
    /// Overrides the environment-derived level (`debug`, `info`, ...)
    pub level: Option<String>,
}

impl JobflowConfig {
    /// Reject values the coordinator cannot run with
    pub fn validate(&self) -> ConfigResult<()> {
        if self.database.url.trim().is_empty() {
            return Err(ConfigurationError::invalid_value(
                "database.url",
                "",
                "must not be empty",
            ));
        }
        if self.database.max_connections == 0 {
            return Err(ConfigurationError::invalid_value(
                "database.max_connections",
                0,
                "must be at least 1",
            ));
        }

        let queues = &self.queues;
        if queues.job_queue.trim().is_empty() || queues.task_queue.trim().is_empty() {
            return Err(ConfigurationError::invalid_value(
                "queues",
                format!("{}/{}", queues.job_queue, queues.task_queue),
                "queue names must not be empty",
            ));
        }
        if queues.job_queue == queues.task_queue {
            return Err(ConfigurationError::invalid_value(
                "queues.task_queue",
                &queues.task_queue,
                "job and task queues must differ",
            ));
        }
        if queues.max_batch_size == 0 || queues.max_batch_size > constants::MAX_TRANSPORT_BATCH_SIZE
        {
            return Err(ConfigurationError::invalid_value(
                "queues.max_batch_size",
                queues.max_batch_size,
                format!("must be between 1 and {}", constants::MAX_TRANSPORT_BATCH_SIZE),
            ));
        }
        if queues.receive_batch_size == 0 {
            return Err(ConfigurationError::invalid_value(
                "queues.receive_batch_size",
                0,
                "must be at least 1",
            ));
        }
        if queues.visibility_timeout_seconds == 0 {
            return Err(ConfigurationError::invalid_value(
                "queues.visibility_timeout_seconds",
                0,
                "must be at least 1",
            ));
        }

        let retry = &self.retry;
        if retry.max_attempts == 0 {
            return Err(ConfigurationError::invalid_value(
                "retry.max_attempts",
                0,
                "must be at least 1",
            ));
        }
        if retry.base_delay_ms == 0 {
            return Err(ConfigurationError::invalid_value(
                "retry.base_delay_ms",
                0,
                "must be greater than zero",
            ));
        }
        if retry.max_delay_ms < retry.base_delay_ms {
            return Err(ConfigurationError::invalid_value(
                "retry.max_delay_ms",
                retry.max_delay_ms,
                format!("must not be below base_delay_ms ({})", retry.base_delay_ms),
            ));
        }

        let orchestration = &self.orchestration;
        if orchestration.batch_threshold == 0 {
            return Err(ConfigurationError::invalid_value(
                "orchestration.batch_threshold",
                0,
                "must be at least 1",
            ));
        }
        if orchestration.enqueue_attempts == 0 {
            return Err(ConfigurationError::invalid_value(
                "orchestration.enqueue_attempts",
                0,
                "must be at least 1",
            ));
        }
        if orchestration.enqueue_retry_max_delay_ms < orchestration.enqueue_retry_base_delay_ms {
            return Err(ConfigurationError::invalid_value(
                "orchestration.enqueue_retry_max_delay_ms",
                orchestration.enqueue_retry_max_delay_ms,
                format!(
                    "must not be below enqueue_retry_base_delay_ms ({})",
                    orchestration.enqueue_retry_base_delay_ms
                ),
            ));
        }

        Ok(())
    }
}
