//! # Structured Logging Module
//!
//! Environment-aware structured logging for the coordinator. Console output is
//! human-readable by default or JSON lines when `logging.format = "json"`.

use std::sync::OnceLock;

use chrono::Utc;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use uuid::Uuid;

use crate::config::{LogFormat, LoggingConfig};
use crate::constants::ENVIRONMENT_VAR;

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize structured logging once per process
///
/// `RUST_LOG` wins over everything; otherwise `config.level`, otherwise a
/// level derived from `JOBFLOW_ENV`.
pub fn init_structured_logging(config: &LoggingConfig) {
    LOGGER_INITIALIZED.get_or_init(|| {
        let environment = get_environment();
        let log_level = config
            .level
            .clone()
            .unwrap_or_else(|| get_log_level(&environment));

        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log_level));

        let (pretty_layer, json_layer) = match config.format {
            LogFormat::Pretty => (
                Some(
                    fmt::layer()
                        .with_target(true)
                        .with_thread_ids(true)
                        .with_level(true)
                        .with_ansi(true),
                ),
                None,
            ),
            LogFormat::Json => (
                None,
                Some(
                    fmt::layer()
                        .with_target(true)
                        .with_thread_ids(true)
                        .with_level(true)
                        .with_ansi(false)
                        .json(),
                ),
            ),
        };

        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(pretty_layer)
            .with(json_layer);

        // Use try_init to avoid panic if a global subscriber is already set
        if subscriber.try_init().is_err() {
            tracing::debug!("Global tracing subscriber already initialized - continuing with existing subscriber");
        }

        tracing::info!(
            pid = std::process::id(),
            environment = %environment,
            level = %log_level,
            "🔧 STRUCTURED LOGGING: Initialized"
        );
    });
}

/// Get current environment from environment variables
fn get_environment() -> String {
    environment_from(|key| std::env::var(key).ok())
}

/// Resolve the environment name through `lookup`, falling back to `development`
fn environment_from(lookup: impl Fn(&str) -> Option<String>) -> String {
    lookup(ENVIRONMENT_VAR)
        .or_else(|| lookup("APP_ENV"))
        .unwrap_or_else(|| "development".to_string())
}

/// Get log level based on environment
fn get_log_level(environment: &str) -> String {
    match environment {
        "test" => "debug".to_string(),
        "development" => "debug".to_string(),
        "production" => "info".to_string(),
        _ => "debug".to_string(),
    }
}

/// Log structured data for job operations
pub fn log_job_operation(
    operation: &str,
    job_id: Uuid,
    job_type: &str,
    stage: Option<i32>,
    status: &str,
    details: Option<&str>,
) {
    tracing::info!(
        operation = %operation,
        job_id = %job_id,
        job_type = %job_type,
        stage = stage,
        status = %status,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "📋 JOB_OPERATION"
    );
}

/// Log structured data for task operations
pub fn log_task_operation(
    operation: &str,
    task_id: Uuid,
    job_id: Uuid,
    task_type: &str,
    status: &str,
    retry_count: i32,
    details: Option<&str>,
) {
    tracing::info!(
        operation = %operation,
        task_id = %task_id,
        job_id = %job_id,
        task_type = %task_type,
        status = %status,
        retry_count = retry_count,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "🔧 TASK_OPERATION"
    );
}
