//! # PGMQ Queue Gateway
//!
//! PostgreSQL Message Queue implementation of [`QueueGateway`].
//!
//! Calls the `pgmq` extension's SQL functions directly over the shared
//! connection pool, so job/task state and queues can live in one database.

use std::time::Duration;

use async_trait::async_trait;
use sqlx::{PgPool, Row};
use tracing::{debug, info};

use super::errors::{MessagingError, MessagingResult};
use super::gateway::{MessageId, QueueGateway, ReceivedMessage};
use super::message::OrchestrationMessage;

/// PGMQ-based queue gateway
#[derive(Debug, Clone)]
pub struct PgmqQueueGateway {
    pool: PgPool,
    max_batch_size: usize,
}

impl PgmqQueueGateway {
    /// Create a gateway using an existing connection pool
    pub fn new(pool: PgPool, max_batch_size: usize) -> Self {
        Self {
            pool,
            max_batch_size,
        }
    }

    /// Get a reference to the underlying connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// pgmq delays and visibility timeouts are whole seconds; round up so a
/// requested delay is never shortened
fn whole_seconds(duration: Duration) -> i32 {
    let mut seconds = duration.as_secs();
    if duration.subsec_nanos() > 0 {
        seconds += 1;
    }
    i32::try_from(seconds).unwrap_or(i32::MAX)
}

#[async_trait]
impl QueueGateway for PgmqQueueGateway {
    async fn ensure_queue(&self, queue_name: &str) -> MessagingResult<()> {
        debug!("📋 Creating queue: {}", queue_name);

        sqlx::query("SELECT pgmq.create($1)")
            .bind(queue_name)
            .execute(&self.pool)
            .await
            .map_err(|e| MessagingError::queue_operation(queue_name, "create", e.to_string()))?;

        info!("✅ Queue ready: {}", queue_name);
        Ok(())
    }

    async fn send(
        &self,
        queue_name: &str,
        message: &OrchestrationMessage,
        delay: Duration,
    ) -> MessagingResult<MessageId> {
        let payload = message.to_json()?;

        let row = sqlx::query("SELECT * FROM pgmq.send($1, $2, $3)")
            .bind(queue_name)
            .bind(payload)
            .bind(whole_seconds(delay))
            .fetch_one(&self.pool)
            .await
            .map_err(|e| MessagingError::queue_operation(queue_name, "send", e.to_string()))?;

        let message_id: i64 = row.try_get(0)?;
        debug!(
            queue = queue_name,
            message_id,
            kind = message.kind(),
            delay_seconds = whole_seconds(delay),
            "📤 Message sent"
        );
        Ok(MessageId(message_id))
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
        if messages.is_empty() {
            return Ok(Vec::new());
        }

        let payloads: Vec<serde_json::Value> = messages
            .iter()
            .map(OrchestrationMessage::to_json)
            .collect::<Result<_, _>>()?;

        let rows = sqlx::query("SELECT * FROM pgmq.send_batch($1, $2, $3)")
            .bind(queue_name)
            .bind(payloads)
            .bind(0_i32)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| {
                MessagingError::queue_operation(queue_name, "send_batch", e.to_string())
            })?;

        let ids = rows
            .iter()
            .map(|row| row.try_get::<i64, _>(0).map(MessageId))
            .collect::<Result<Vec<_>, _>>()?;

        debug!(queue = queue_name, count = ids.len(), "📤 Message batch sent");
        Ok(ids)
    }

    async fn receive(
        &self,
        queue_name: &str,
        max_messages: usize,
        visibility_timeout: Duration,
    ) -> MessagingResult<Vec<ReceivedMessage>> {
        let quantity = i32::try_from(max_messages).unwrap_or(i32::MAX);

        let rows = sqlx::query("SELECT msg_id, read_ct, message FROM pgmq.read($1, $2, $3)")
            .bind(queue_name)
            .bind(whole_seconds(visibility_timeout))
            .bind(quantity)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| MessagingError::queue_operation(queue_name, "read", e.to_string()))?;

        let mut received = Vec::with_capacity(rows.len());
        for row in rows {
            received.push(ReceivedMessage {
                message_id: MessageId(row.try_get("msg_id")?),
                read_count: row.try_get("read_ct")?,
                payload: row.try_get("message")?,
            });
        }

        debug!(queue = queue_name, count = received.len(), "📨 Messages received");
        Ok(received)
    }

    async fn ack(&self, queue_name: &str, message_id: MessageId) -> MessagingResult<()> {
        let row = sqlx::query("SELECT pgmq.delete($1, $2) AS deleted")
            .bind(queue_name)
            .bind(message_id.0)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| MessagingError::queue_operation(queue_name, "delete", e.to_string()))?;

        let deleted: bool = row.try_get("deleted")?;
        if !deleted {
            return Err(MessagingError::MessageNotFound {
                queue_name: queue_name.to_string(),
                message_id: message_id.0,
            });
        }
        Ok(())
    }

    fn max_batch_size(&self) -> usize {
        self.max_batch_size
    }

    fn provider_name(&self) -> &'static str {
        "pgmq"
    }
}
