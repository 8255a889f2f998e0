#![allow(clippy::doc_markdown)] // Allow technical terms like PostgreSQL, SQLx in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Jobflow Core
//!
//! Stateless coordinator for multi-stage jobs on an at-least-once queue.
//!
//! ## Overview
//!
//! A job is a fixed sequence of stages. Each stage runs one task
//! (`SINGLE`), many independent tasks (`FAN_OUT`), or one task aggregating
//! the previous stage's results (`FAN_IN`). The coordinator owns no state:
//! jobs and tasks live in a [`database::StateStore`], work moves through a
//! [`messaging::QueueGateway`], and any number of coordinator processes may
//! consume the same queues.
//!
//! Completion of a stage is detected atomically in the store, so exactly one
//! of a stage's concurrently finishing tasks advances the job.
//!
//! ## Module Organization
//!
//! - [`config`] - Layered configuration (defaults, TOML, `JOBFLOW__*` env)
//! - [`database`] - State store trait, PostgreSQL and in-memory stores
//! - [`messaging`] - Queue gateway trait, pgmq and in-memory transports
//! - [`models`] - Jobs, tasks and stage descriptors
//! - [`state_machine`] - Job and task status transitions
//! - [`registry`] - Workflow and task handler registries
//! - [`orchestration`] - Coordinator, retry policy and queue consumer
//! - [`error`] - Coordinator and task error types
//! - [`logging`] - Structured logging setup
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use jobflow_core::config::ConfigLoader;
//! use jobflow_core::database::{self, PgStateStore};
//! use jobflow_core::messaging::PgmqQueueGateway;
//! use jobflow_core::orchestration::{Coordinator, QueueConsumer};
//! use jobflow_core::registry::{JobRegistry, TaskHandlerRegistry};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ConfigLoader::load()?;
//! jobflow_core::logging::init_structured_logging(&config.logging);
//!
//! let pool = database::connect(&config.database).await?;
//! database::run_migrations(&pool).await?;
//!
//! // Register workflows and handlers here
//! let jobs = Arc::new(JobRegistry::builder().build());
//! let handlers = Arc::new(TaskHandlerRegistry::builder().build());
//!
//! let coordinator = Coordinator::new(
//!     Arc::new(PgStateStore::new(pool.clone())),
//!     Arc::new(PgmqQueueGateway::new(pool, config.queues.max_batch_size)),
//!     jobs,
//!     handlers,
//!     &config,
//! )?;
//! coordinator.ensure_queues().await?;
//!
//! let (_shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
//! QueueConsumer::new(coordinator).run(shutdown_rx).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Testing
//!
//! ```bash
//! cargo test                          # Unit and in-memory integration tests
//! cargo test --features test-services # Also PostgreSQL-backed tests (DATABASE_URL)
//! ```

pub mod config;
pub mod constants;
pub mod database;
pub mod error;
pub mod logging;
pub mod messaging;
pub mod models;
pub mod orchestration;
pub mod registry;
pub mod state_machine;

pub use config::{ConfigLoader, ConfigurationError, JobflowConfig};
pub use error::{CoordinatorError, Result, TaskError};
pub use models::{Job, NewJob, NewTask, Parallelism, StageDescriptor, Task};
pub use orchestration::{Coordinator, JobOutcome, QueueConsumer, StageTransition, TaskOutcome};
pub use registry::{FnTaskHandler, JobRegistry, TaskHandler, TaskHandlerRegistry, WorkflowDescriptor};
pub use state_machine::{JobStatus, TaskStatus};
