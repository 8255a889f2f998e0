//! # In-Memory Queue Gateway
//!
//! Thread-safe in-memory queue implementation for testing and embedded use.
//!
//! ## Features
//!
//! - **Delayed Delivery**: Messages sent with a delay stay invisible until it elapses
//! - **Visibility Timeout**: Received messages are hidden until acked or the timeout expires
//! - **Bounded Batches**: `send_batch` enforces the same limit as the real transport

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::debug;

use super::errors::{MessagingError, MessagingResult};
use super::gateway::{MessageId, QueueGateway, ReceivedMessage};
use super::message::OrchestrationMessage;
use crate::constants::MAX_TRANSPORT_BATCH_SIZE;

/// In-memory message with visibility tracking
#[derive(Debug, Clone)]
struct InMemoryQueuedMessage {
    id: i64,
    payload: serde_json::Value,
    /// Delivery delay requested by the sender
    delay: Duration,
    /// When the message becomes visible to readers
    visible_at: DateTime<Utc>,
    read_count: i32,
}

/// A message removed from a queue by [`InMemoryQueueGateway::drain`]
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedDelivery {
    pub message: OrchestrationMessage,
    pub delay: Duration,
}

/// In-memory queue gateway
#[derive(Debug)]
pub struct InMemoryQueueGateway {
    /// Queue storage (queue_name -> FIFO of messages)
    queues: RwLock<HashMap<String, VecDeque<InMemoryQueuedMessage>>>,
    next_id: AtomicI64,
    max_batch_size: usize,
}

impl Default for InMemoryQueueGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryQueueGateway {
    pub fn new() -> Self {
        Self::with_max_batch_size(MAX_TRANSPORT_BATCH_SIZE)
    }

    pub fn with_max_batch_size(max_batch_size: usize) -> Self {
        Self {
            queues: RwLock::new(HashMap::new()),
            next_id: AtomicI64::new(1),
            max_batch_size,
        }
    }

    /// Create with pre-initialized queues
    pub fn with_queues(queue_names: &[&str]) -> Self {
        let mut queues = HashMap::new();
        for name in queue_names {
            queues.insert((*name).to_string(), VecDeque::new());
        }
        Self {
            queues: RwLock::new(queues),
            next_id: AtomicI64::new(1),
            max_batch_size: MAX_TRANSPORT_BATCH_SIZE,
        }
    }

    /// Number of messages in a queue, visible or not
    pub async fn queue_length(&self, queue_name: &str) -> usize {
        let queues = self.queues.read().await;
        queues.get(queue_name).map(VecDeque::len).unwrap_or(0)
    }

    /// Remove and return every message in a queue regardless of visibility,
    /// together with the delay it was sent with
    pub async fn drain(&self, queue_name: &str) -> MessagingResult<Vec<QueuedDelivery>> {
        let mut queues = self.queues.write().await;
        let queue = queues
            .get_mut(queue_name)
            .ok_or_else(|| MessagingError::queue_not_found(queue_name))?;

        queue
            .drain(..)
            .map(|entry| {
                Ok(QueuedDelivery {
                    message: OrchestrationMessage::from_json(entry.payload)?,
                    delay: entry.delay,
                })
            })
            .collect()
    }

    fn next_message(&self, payload: serde_json::Value, delay: Duration) -> InMemoryQueuedMessage {
        let delay_chrono = chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::zero());
        InMemoryQueuedMessage {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            payload,
            delay,
            visible_at: Utc::now() + delay_chrono,
            read_count: 0,
        }
    }
}

#[async_trait]
impl QueueGateway for InMemoryQueueGateway {
    async fn ensure_queue(&self, queue_name: &str) -> MessagingResult<()> {
        let mut queues = self.queues.write().await;
        queues.entry(queue_name.to_string()).or_default();
        Ok(())
    }

    async fn send(
        &self,
        queue_name: &str,
        message: &OrchestrationMessage,
        delay: Duration,
    ) -> MessagingResult<MessageId> {
        let payload = message.to_json()?;

        let mut queues = self.queues.write().await;
        let queue = queues
            .get_mut(queue_name)
            .ok_or_else(|| MessagingError::queue_not_found(queue_name))?;

        let entry = self.next_message(payload, delay);
        let id = entry.id;
        queue.push_back(entry);

        debug!(queue = queue_name, message_id = id, kind = message.kind(), "Message enqueued");
        Ok(MessageId(id))
    }

    async fn send_batch(
        &self,
        queue_name: &str,
        messages: &[OrchestrationMessage],
    ) -> MessagingResult<Vec<MessageId>> {
        if messages.len() > self.max_batch_size {
            return Err(MessagingError::batch_too_large(
                messages.len(),
                self.max_batch_size,
            ));
        }

        // Serialize all messages first (outside the lock)
        let payloads: Vec<serde_json::Value> = messages
            .iter()
            .map(OrchestrationMessage::to_json)
            .collect::<Result<_, _>>()?;

        let mut queues = self.queues.write().await;
        let queue = queues
            .get_mut(queue_name)
            .ok_or_else(|| MessagingError::queue_not_found(queue_name))?;

        let mut ids = Vec::with_capacity(payloads.len());
        for payload in payloads {
            let entry = self.next_message(payload, Duration::ZERO);
            ids.push(MessageId(entry.id));
            queue.push_back(entry);
        }

        debug!(queue = queue_name, count = ids.len(), "Message batch enqueued");
        Ok(ids)
    }

    async fn receive(
        &self,
        queue_name: &str,
        max_messages: usize,
        visibility_timeout: Duration,
    ) -> MessagingResult<Vec<ReceivedMessage>> {
        let now = Utc::now();
        let hidden_until = now
            + chrono::Duration::from_std(visibility_timeout).unwrap_or(chrono::Duration::zero());

        let mut queues = self.queues.write().await;
        let queue = queues
            .get_mut(queue_name)
            .ok_or_else(|| MessagingError::queue_not_found(queue_name))?;

        let mut received = Vec::new();
        for entry in queue.iter_mut() {
            if received.len() >= max_messages {
                break;
            }
            if entry.visible_at > now {
                continue;
            }
            entry.visible_at = hidden_until;
            entry.read_count += 1;
            received.push(ReceivedMessage {
                message_id: MessageId(entry.id),
                read_count: entry.read_count,
                payload: entry.payload.clone(),
            });
        }

        Ok(received)
    }

    async fn ack(&self, queue_name: &str, message_id: MessageId) -> MessagingResult<()> {
        let mut queues = self.queues.write().await;
        let queue = queues
            .get_mut(queue_name)
            .ok_or_else(|| MessagingError::queue_not_found(queue_name))?;

        let position = queue
            .iter()
            .position(|entry| entry.id == message_id.0)
            .ok_or_else(|| MessagingError::MessageNotFound {
                queue_name: queue_name.to_string(),
                message_id: message_id.0,
            })?;
        queue.remove(position);
        Ok(())
    }

    fn max_batch_size(&self) -> usize {
        self.max_batch_size
    }

    fn provider_name(&self) -> &'static str {
        "in_memory"
    }
}
