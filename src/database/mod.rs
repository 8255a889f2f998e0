//! # Database Operations
//!
//! The state store: the single source of truth for job, stage and task state.
//!
//! ## Key Components
//!
//! - [`state_store`] - The [`StateStore`] trait every coordination decision goes through
//! - [`postgres`] - PostgreSQL implementation over a shared sqlx pool
//! - [`in_memory`] - Mutex-backed implementation for tests and embedded use
//! - [`migrator`] - Embedded schema migrations
//! - [`connection`] - Pool construction from configuration

pub mod connection;
pub mod errors;
pub mod in_memory;
pub mod migrator;
pub mod postgres;
pub mod state_store;

pub use connection::{connect, health_check};
pub use errors::{StoreError, StoreResult};
pub use in_memory::InMemoryStateStore;
pub use migrator::{run_migrations, MIGRATOR};
pub use postgres::PgStateStore;
pub use state_store::StateStore;
