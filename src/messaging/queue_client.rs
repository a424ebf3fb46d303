//! # Broker Abstraction
//!
//! The queue client trait behind which the broker lives. The dispatch
//! pipeline, worker pool, requeue pump, and RPC client all speak this trait,
//! so the whole protocol runs unchanged against pgmq in production and the
//! in-memory broker in tests.
//!
//! Delivery semantics expected of implementations: at-least-once with a
//! per-read visibility timeout (an unacknowledged message becomes deliverable
//! again once its timeout lapses), and per-message delayed visibility for
//! `send_with_delay`.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{info, warn};

use super::envelope::DeadLetterEntry;
use super::errors::MessagingResult;

/// A message as read from a queue, pending acknowledgement
#[derive(Debug, Clone)]
pub struct QueueMessage {
    /// Broker-assigned message id, used for delete
    pub msg_id: i64,
    /// How many times this message has been delivered
    pub read_count: i32,
    /// Raw JSON payload
    pub payload: Value,
}

/// Broker operations required by the RPC core
#[async_trait]
pub trait QueueClient: Send + Sync {
    /// Create a queue if it does not exist
    async fn create_queue(&self, queue_name: &str) -> MessagingResult<()>;

    /// Publish a message, immediately visible
    async fn send(&self, queue_name: &str, payload: &Value) -> MessagingResult<i64>;

    /// Publish a message that stays invisible for `delay`
    async fn send_with_delay(
        &self,
        queue_name: &str,
        payload: &Value,
        delay: Duration,
    ) -> MessagingResult<i64>;

    /// Read up to `limit` visible messages, hiding each for `visibility_timeout`
    async fn read(
        &self,
        queue_name: &str,
        visibility_timeout: Duration,
        limit: usize,
    ) -> MessagingResult<Vec<QueueMessage>>;

    /// Acknowledge a message by removing it from the queue
    async fn delete(&self, queue_name: &str, msg_id: i64) -> MessagingResult<()>;

    /// Delete all messages, returning how many were removed
    async fn purge(&self, queue_name: &str) -> MessagingResult<u64>;

    /// Drop the queue entirely
    async fn drop_queue(&self, queue_name: &str) -> MessagingResult<()>;

    /// Number of messages currently on the queue (visible or delayed)
    async fn queue_depth(&self, queue_name: &str) -> MessagingResult<u64>;
}

/// The logical channel names of the RPC topology
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct QueueNames {
    /// Request channel consumed by the worker pool
    pub requests: String,
    /// Retry holding channel; expiry returns messages to `requests`
    pub retry: String,
    /// Dead letter channel for permanently failed messages
    pub dlq: String,
    /// Prefix for per-client ephemeral reply queues
    pub reply_prefix: String,
}

impl Default for QueueNames {
    fn default() -> Self {
        Self {
            requests: "api_requests".to_string(),
            retry: "api_requests_retry".to_string(),
            dlq: "api_requests_dlq".to_string(),
            reply_prefix: "api_replies".to_string(),
        }
    }
}

/// Declare the request, retry, and DLQ channels.
///
/// Reply queues are not declared here; each client session creates its own.
pub async fn initialize_topology<Q: QueueClient + ?Sized>(
    client: &Q,
    names: &QueueNames,
) -> MessagingResult<()> {
    client.create_queue(&names.requests).await?;
    client.create_queue(&names.retry).await?;
    client.create_queue(&names.dlq).await?;

    info!(
        requests = %names.requests,
        retry = %names.retry,
        dlq = %names.dlq,
        "queue topology initialized"
    );
    Ok(())
}

/// Inspection window while dead letters are being decoded
const INSPECT_VISIBILITY: Duration = Duration::from_secs(5);

/// Peek at up to `limit` dead letters without consuming them.
///
/// Entries stay on the DLQ (they become visible again after a short window);
/// removal is an explicit operator action via `delete`/`purge`.
pub async fn read_dead_letters<Q: QueueClient + ?Sized>(
    client: &Q,
    names: &QueueNames,
    limit: usize,
) -> MessagingResult<Vec<DeadLetterEntry>> {
    let messages = client.read(&names.dlq, INSPECT_VISIBILITY, limit).await?;

    let mut entries = Vec::with_capacity(messages.len());
    for message in messages {
        match DeadLetterEntry::decode(&message.payload) {
            Ok(entry) => entries.push(entry),
            Err(e) => {
                warn!(msg_id = message.msg_id, error = %e, "undecodable dead letter skipped");
            }
        }
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_queue_names() {
        let names = QueueNames::default();
        assert_eq!(names.requests, "api_requests");
        assert_eq!(names.retry, "api_requests_retry");
        assert_eq!(names.dlq, "api_requests_dlq");
        assert_eq!(names.reply_prefix, "api_replies");
    }
}
