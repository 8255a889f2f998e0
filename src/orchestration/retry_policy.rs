//! # Retry Policy
//!
//! Pure mapping from a task failure to "retry after D" or "fail permanently".
//!
//! ## Classification
//!
//! | [`TaskError`] variant            | [`ErrorCategory`]   | Class     |
//! |----------------------------------|---------------------|-----------|
//! | `Transient`                      | `Transient`         | Retryable |
//! | `Timeout`                        | `Timeout`           | Retryable |
//! | `Connection`                     | `Connection`        | Retryable |
//! | `Transport`                      | `Transport`         | Retryable |
//! | `InvalidInput`                   | `InvalidInput`      | Permanent |
//! | `NotFound`                       | `ResourceNotFound`  | Permanent |
//! | `ContractViolation`              | `ContractViolation` | Permanent |
//! | `Other` (not an I/O error)       | `Unknown`           | Retryable |
//!
//! `Other` errors wrapping a `std::io::Error` are classified by the I/O kind.
//!
//! ## Backoff
//!
//! `delay = min(base_delay * 2^retry_count, max_delay)`, and a retry is only
//! granted while `retry_count + 1 < max_attempts` (`max_attempts` counts every
//! execution, the first included).
//!
//! The same schedule drives [`RetryPolicy::retry_in_place`], which repeats a
//! coordinator step after an infrastructure error instead of going through
//! the queue.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::config::{OrchestrationConfig, RetryConfig};
use crate::error::{Result, TaskError};

/// Why a task failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Transient,
    Timeout,
    Connection,
    Transport,
    InvalidInput,
    ResourceNotFound,
    ContractViolation,
    /// Unrecognized error; treated conservatively as retryable
    Unknown,
}

impl ErrorCategory {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Transient | Self::Timeout | Self::Connection | Self::Transport | Self::Unknown => {
                ErrorClass::Retryable
            }
            Self::InvalidInput | Self::ResourceNotFound | Self::ContractViolation => {
                ErrorClass::Permanent
            }
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Transient => "transient",
            Self::Timeout => "timeout",
            Self::Connection => "connection",
            Self::Transport => "transport",
            Self::InvalidInput => "invalid_input",
            Self::ResourceNotFound => "resource_not_found",
            Self::ContractViolation => "contract_violation",
            Self::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorClass {
    Retryable,
    Permanent,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Re-enqueue the task, delivered after the delay
    RetryAfter(Duration),
    FailPermanently { reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    base_delay: Duration,
    max_delay: Duration,
    max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl RetryPolicy {
    pub fn new(base_delay: Duration, max_delay: Duration, max_attempts: u32) -> Self {
        Self {
            base_delay,
            max_delay,
            max_attempts,
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(
            Duration::from_millis(config.base_delay_ms),
            Duration::from_millis(config.max_delay_ms),
            config.max_attempts,
        )
    }

    /// Schedule for retrying enqueue steps in place
    pub fn for_enqueue(config: &OrchestrationConfig) -> Self {
        Self::new(
            Duration::from_millis(config.enqueue_retry_base_delay_ms),
            Duration::from_millis(config.enqueue_retry_max_delay_ms),
            config.enqueue_attempts,
        )
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn classify(&self, error: &TaskError) -> ErrorCategory {
        match error {
            TaskError::Transient { .. } => ErrorCategory::Transient,
            TaskError::Timeout { .. } => ErrorCategory::Timeout,
            TaskError::Connection { .. } => ErrorCategory::Connection,
            TaskError::Transport { .. } => ErrorCategory::Transport,
            TaskError::InvalidInput { .. } => ErrorCategory::InvalidInput,
            TaskError::NotFound { .. } => ErrorCategory::ResourceNotFound,
            TaskError::ContractViolation { .. } => ErrorCategory::ContractViolation,
            TaskError::Other(err) => match err.downcast_ref::<std::io::Error>() {
                Some(io_err) => classify_io(io_err),
                None => ErrorCategory::Unknown,
            },
        }
    }

    /// `min(base_delay * 2^retry_count, max_delay)`
    pub fn backoff_delay(&self, retry_count: u32) -> Duration {
        let factor = 1_u32.checked_shl(retry_count).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Decide what to do with a task that failed after `retry_count` retries
    pub fn decide(&self, error: &TaskError, retry_count: i32) -> RetryDecision {
        let category = self.classify(error);
        if category.class() == ErrorClass::Permanent {
            return RetryDecision::FailPermanently {
                reason: format!("permanent {category} error: {error}"),
            };
        }

        let retries = u32::try_from(retry_count.max(0)).unwrap_or(u32::MAX);
        if retries.saturating_add(1) >= self.max_attempts {
            return RetryDecision::FailPermanently {
                reason: format!(
                    "retries exhausted after {} attempts: {error}",
                    retries.saturating_add(1)
                ),
            };
        }

        RetryDecision::RetryAfter(self.backoff_delay(retries))
    }

    /// Run `step` until it succeeds or `max_attempts` tries have failed,
    /// sleeping the backoff delay in between
    ///
    /// Contract violations are returned at once; retrying cannot fix them.
    pub async fn retry_in_place<T, F, Fut>(&self, operation: &str, mut step: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut retries: u32 = 0;
        loop {
            match step().await {
                Ok(value) => return Ok(value),
                Err(err)
                    if err.is_contract_violation()
                        || retries.saturating_add(1) >= self.max_attempts =>
                {
                    return Err(err)
                }
                Err(err) => {
                    let delay = self.backoff_delay(retries);
                    retries += 1;
                    warn!(
                        operation,
                        attempt = retries,
                        max_attempts = self.max_attempts,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %err,
                        "🔄 Coordinator step failed; retrying in place"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

fn classify_io(err: &std::io::Error) -> ErrorCategory {
    match TaskError::from(std::io::Error::from(err.kind())) {
        TaskError::Transient { .. } => ErrorCategory::Transient,
        TaskError::Timeout { .. } => ErrorCategory::Timeout,
        TaskError::Connection { .. } => ErrorCategory::Connection,
        TaskError::NotFound { .. } => ErrorCategory::ResourceNotFound,
        TaskError::InvalidInput { .. } => ErrorCategory::InvalidInput,
        _ => ErrorCategory::Unknown,
    }
}
