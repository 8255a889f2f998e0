//! # Messaging Module
//!
//! Queue gateway abstraction over a durable, at-least-once message queue, the
//! two coordinator message kinds, and the PGMQ and in-memory transports.

pub mod errors;
pub mod gateway;
pub mod in_memory;
pub mod message;
pub mod pgmq;

pub use errors::{MessagingError, MessagingResult};
pub use gateway::{MessageId, QueueGateway, ReceivedMessage};
pub use in_memory::{InMemoryQueueGateway, QueuedDelivery};
pub use message::{JobMessage, OrchestrationMessage, TaskMessage};
pub use pgmq::PgmqQueueGateway;
