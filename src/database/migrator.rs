//! # Database Migration Support
//!
//! The schema (`jobflow_jobs`, `jobflow_job_stages`, `jobflow_tasks`) is
//! embedded at compile time from the crate's `migrations/` directory.
//!
//! ```rust,ignore
//! #[sqlx::test(migrator = "jobflow_core::database::MIGRATOR")]
//! async fn test_something(pool: PgPool) { /* ... */ }
//! ```

use sqlx::PgPool;
use tracing::info;

pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

/// Apply any pending migrations
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    info!("Running jobflow migrations");
    MIGRATOR.run(pool).await?;
    info!("Jobflow migrations complete");
    Ok(())
}
