//! # Queue Gateway
//!
//! Provider-agnostic view of the durable, at-least-once message queue the
//! coordinator consumes. Only send, bounded batch send, receive and ack are
//! needed; visibility timeouts give redelivery for anything left un-acked.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::errors::MessagingResult;
use super::message::OrchestrationMessage;

/// Provider-assigned message identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MessageId(pub i64);

impl From<i64> for MessageId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A message read off a queue, still owned by the reader until acked or its
/// visibility timeout expires
#[derive(Debug, Clone, PartialEq)]
pub struct ReceivedMessage {
    pub message_id: MessageId,
    /// How many times the message has been read, this read included
    pub read_count: i32,
    pub payload: serde_json::Value,
}

impl ReceivedMessage {
    pub fn decode(&self) -> MessagingResult<OrchestrationMessage> {
        Ok(OrchestrationMessage::from_json(self.payload.clone())?)
    }
}

/// Core queue operations used by the coordinator
#[async_trait]
pub trait QueueGateway: Send + Sync + 'static {
    /// Create a queue if it doesn't exist (idempotent)
    async fn ensure_queue(&self, queue_name: &str) -> MessagingResult<()>;

    /// Send one message, invisible to readers until `delay` has elapsed
    async fn send(
        &self,
        queue_name: &str,
        message: &OrchestrationMessage,
        delay: Duration,
    ) -> MessagingResult<MessageId>;

    /// Send a batch of at most [`QueueGateway::max_batch_size`] messages
    async fn send_batch(
        &self,
        queue_name: &str,
        messages: &[OrchestrationMessage],
    ) -> MessagingResult<Vec<MessageId>>;

    /// Receive up to `max_messages`, hiding them from other readers for
    /// `visibility_timeout`
    async fn receive(
        &self,
        queue_name: &str,
        max_messages: usize,
        visibility_timeout: Duration,
    ) -> MessagingResult<Vec<ReceivedMessage>>;

    /// Acknowledge successful processing (delete the message)
    async fn ack(&self, queue_name: &str, message_id: MessageId) -> MessagingResult<()>;

    /// Largest batch the transport accepts in one send
    fn max_batch_size(&self) -> usize;

    /// Provider name for logging
    fn provider_name(&self) -> &'static str;
}
