//! # Queue Consumer
//!
//! Polls the job and task queues and feeds each message to the
//! [`Coordinator`]. A message is acked only when handling returned `Ok`;
//! anything else stays on the queue and is redelivered once its visibility
//! timeout expires.

use std::time::Duration;

use futures::future::join_all;
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};

use super::coordinator::Coordinator;
use crate::error::{CoordinatorError, Result};
use crate::messaging::ReceivedMessage;

/// Wait after a poll that failed outright
const ERROR_BACKOFF: Duration = Duration::from_millis(1000);

/// Counts for one poll of both queues
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollSummary {
    pub received: usize,
    pub acked: usize,
    pub failed: usize,
}

impl PollSummary {
    fn merge(&mut self, other: PollSummary) {
        self.received += other.received;
        self.acked += other.acked;
        self.failed += other.failed;
    }
}

#[derive(Debug, Clone)]
pub struct QueueConsumer {
    coordinator: Coordinator,
}

impl QueueConsumer {
    pub fn new(coordinator: Coordinator) -> Self {
        Self { coordinator }
    }

    /// Receive and process one batch from each queue
    ///
    /// Job messages are handled before task messages.
    #[instrument(skip(self))]
    pub async fn poll_once(&self) -> Result<PollSummary> {
        let queues = self.coordinator.context().queues.clone();
        let mut summary = PollSummary::default();
        for queue in [&queues.job_queue, &queues.task_queue] {
            summary.merge(self.poll_queue(queue).await?);
        }
        Ok(summary)
    }

    async fn poll_queue(&self, queue: &str) -> Result<PollSummary> {
        let context = self.coordinator.context();
        let messages = context
            .gateway
            .receive(
                queue,
                context.queues.receive_batch_size,
                context.queues.visibility_timeout(),
            )
            .await?;
        if messages.is_empty() {
            return Ok(PollSummary::default());
        }

        debug!(queue, count = messages.len(), "Received messages");
        let results = join_all(
            messages
                .iter()
                .map(|message| self.process_message(queue, message)),
        )
        .await;

        let mut summary = PollSummary {
            received: messages.len(),
            ..PollSummary::default()
        };
        for (message, handled) in messages.iter().zip(results) {
            if !handled {
                summary.failed += 1;
                continue;
            }
            match context.gateway.ack(queue, message.message_id).await {
                Ok(()) => summary.acked += 1,
                Err(err) => {
                    warn!(queue, message_id = %message.message_id, error = %err, "Failed to ack message; it will be redelivered");
                    summary.failed += 1;
                }
            }
        }
        Ok(summary)
    }

    /// True when the message may be acked
    async fn process_message(&self, queue: &str, received: &ReceivedMessage) -> bool {
        let message = match received.decode() {
            Ok(message) => message,
            Err(err) => {
                error!(
                    queue,
                    message_id = %received.message_id,
                    read_count = received.read_count,
                    error = %err,
                    "❌ Undecodable message left on queue"
                );
                return false;
            }
        };

        match self.coordinator.handle_message(&message).await {
            Ok(outcome) => {
                debug!(queue, message_id = %received.message_id, kind = message.kind(), ?outcome, "Message handled");
                true
            }
            Err(err) => {
                log_handling_error(queue, received, message.job_id(), &err);
                false
            }
        }
    }

    /// Poll until `shutdown` flips to true or its sender is dropped
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let poll_interval = self.coordinator.context().queues.poll_interval();
        info!(poll_interval_ms = u64::try_from(poll_interval.as_millis()).unwrap_or(u64::MAX), "🚀 Queue consumer started");

        while !*shutdown.borrow() {
            let wait = match self.poll_once().await {
                Ok(summary) if summary.received > 0 => {
                    debug!(?summary, "Poll complete");
                    Duration::ZERO
                }
                Ok(_) => poll_interval,
                Err(err) => {
                    error!(error = %err, "Queue poll failed");
                    ERROR_BACKOFF
                }
            };

            tokio::select! {
                _ = tokio::time::sleep(wait) => {},
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        debug!("Shutdown sender dropped");
                        break;
                    }
                }
            }
        }

        info!("Queue consumer stopped");
        Ok(())
    }
}

fn log_handling_error(
    queue: &str,
    received: &ReceivedMessage,
    job_id: uuid::Uuid,
    err: &CoordinatorError,
) {
    if err.is_contract_violation() {
        error!(
            queue,
            message_id = %received.message_id,
            read_count = received.read_count,
            job_id = %job_id,
            error = %err,
            "❌ Contract violation while handling message; left for redelivery"
        );
    } else {
        warn!(
            queue,
            message_id = %received.message_id,
            read_count = received.read_count,
            job_id = %job_id,
            error = %err,
            "Message handling failed; left for redelivery"
        );
    }
}
