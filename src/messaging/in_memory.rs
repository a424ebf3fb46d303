//! # In-Memory Broker
//!
//! An in-process `QueueClient` with the same delivery semantics the pipeline
//! expects from pgmq: at-least-once delivery, per-read visibility timeouts,
//! and delayed visibility for retry holding. Exists so the whole RPC protocol
//! can be exercised in tests without a database.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use tracing::debug;

use super::errors::{MessagingError, MessagingResult};
use super::queue_client::{QueueClient, QueueMessage};

#[derive(Debug)]
struct StoredMessage {
    msg_id: i64,
    read_count: i32,
    visible_at: Instant,
    payload: Value,
}

#[derive(Debug, Default)]
struct QueueState {
    entries: Vec<StoredMessage>,
}

/// In-memory substitute broker
#[derive(Debug, Default)]
pub struct InMemoryQueueClient {
    queues: DashMap<String, QueueState>,
    next_msg_id: AtomicI64,
}

impl InMemoryQueueClient {
    pub fn new() -> Self {
        Self::default()
    }

    fn enqueue(&self, queue_name: &str, payload: &Value, delay: Duration) -> MessagingResult<i64> {
        let mut queue = self
            .queues
            .get_mut(queue_name)
            .ok_or_else(|| MessagingError::queue_not_found(queue_name))?;

        let msg_id = self.next_msg_id.fetch_add(1, Ordering::SeqCst) + 1;
        queue.entries.push(StoredMessage {
            msg_id,
            read_count: 0,
            visible_at: Instant::now() + delay,
            payload: payload.clone(),
        });
        Ok(msg_id)
    }
}

#[async_trait]
impl QueueClient for InMemoryQueueClient {
    async fn create_queue(&self, queue_name: &str) -> MessagingResult<()> {
        self.queues
            .entry(queue_name.to_string())
            .or_insert_with(QueueState::default);
        debug!(queue = queue_name, "in-memory queue created");
        Ok(())
    }

    async fn send(&self, queue_name: &str, payload: &Value) -> MessagingResult<i64> {
        self.enqueue(queue_name, payload, Duration::ZERO)
    }

    async fn send_with_delay(
        &self,
        queue_name: &str,
        payload: &Value,
        delay: Duration,
    ) -> MessagingResult<i64> {
        self.enqueue(queue_name, payload, delay)
    }

    async fn read(
        &self,
        queue_name: &str,
        visibility_timeout: Duration,
        limit: usize,
    ) -> MessagingResult<Vec<QueueMessage>> {
        let mut queue = self
            .queues
            .get_mut(queue_name)
            .ok_or_else(|| MessagingError::queue_not_found(queue_name))?;

        let now = Instant::now();
        let mut delivered = Vec::new();
        for entry in queue.entries.iter_mut() {
            if delivered.len() >= limit {
                break;
            }
            if entry.visible_at <= now {
                entry.read_count += 1;
                entry.visible_at = now + visibility_timeout;
                delivered.push(QueueMessage {
                    msg_id: entry.msg_id,
                    read_count: entry.read_count,
                    payload: entry.payload.clone(),
                });
            }
        }
        Ok(delivered)
    }

    async fn delete(&self, queue_name: &str, msg_id: i64) -> MessagingResult<()> {
        let mut queue = self
            .queues
            .get_mut(queue_name)
            .ok_or_else(|| MessagingError::queue_not_found(queue_name))?;
        queue.entries.retain(|entry| entry.msg_id != msg_id);
        Ok(())
    }

    async fn purge(&self, queue_name: &str) -> MessagingResult<u64> {
        let mut queue = self
            .queues
            .get_mut(queue_name)
            .ok_or_else(|| MessagingError::queue_not_found(queue_name))?;
        let count = queue.entries.len() as u64;
        queue.entries.clear();
        Ok(count)
    }

    async fn drop_queue(&self, queue_name: &str) -> MessagingResult<()> {
        self.queues
            .remove(queue_name)
            .ok_or_else(|| MessagingError::queue_not_found(queue_name))?;
        Ok(())
    }

    async fn queue_depth(&self, queue_name: &str) -> MessagingResult<u64> {
        let queue = self
            .queues
            .get(queue_name)
            .ok_or_else(|| MessagingError::queue_not_found(queue_name))?;
        Ok(queue.entries.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_send_read_delete_cycle() {
        let broker = InMemoryQueueClient::new();
        broker.create_queue("q").await.unwrap();

        let msg_id = broker.send("q", &json!({"n": 1})).await.unwrap();
        let messages = broker.read("q", Duration::from_secs(30), 10).await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].msg_id, msg_id);
        assert_eq!(messages[0].read_count, 1);

        // Hidden while the visibility timeout is active
        let again = broker.read("q", Duration::from_secs(30), 10).await.unwrap();
        assert!(again.is_empty());

        broker.delete("q", msg_id).await.unwrap();
        assert_eq!(broker.queue_depth("q").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_visibility_timeout_redelivers() {
        let broker = InMemoryQueueClient::new();
        broker.create_queue("q").await.unwrap();
        broker.send("q", &json!({"n": 1})).await.unwrap();

        let first = broker.read("q", Duration::from_millis(20), 10).await.unwrap();
        assert_eq!(first.len(), 1);

        tokio::time::sleep(Duration::from_millis(40)).await;

        // Unacknowledged message is delivered again with a bumped read count
        let second = broker.read("q", Duration::from_secs(30), 10).await.unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].read_count, 2);
    }

    #[tokio::test]
    async fn test_delayed_send_stays_invisible() {
        let broker = InMemoryQueueClient::new();
        broker.create_queue("q").await.unwrap();
        broker
            .send_with_delay("q", &json!({"n": 1}), Duration::from_millis(30))
            .await
            .unwrap();

        let early = broker.read("q", Duration::from_secs(30), 10).await.unwrap();
        assert!(early.is_empty());
        assert_eq!(broker.queue_depth("q").await.unwrap(), 1);

        tokio::time::sleep(Duration::from_millis(50)).await;
        let later = broker.read("q", Duration::from_secs(30), 10).await.unwrap();
        assert_eq!(later.len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_queue_is_an_error() {
        let broker = InMemoryQueueClient::new();
        let err = broker.send("nope", &json!({})).await.unwrap_err();
        assert!(matches!(err, MessagingError::QueueNotFound { .. }));
    }

    #[tokio::test]
    async fn test_read_respects_limit() {
        let broker = InMemoryQueueClient::new();
        broker.create_queue("q").await.unwrap();
        for n in 0..5 {
            broker.send("q", &json!({"n": n})).await.unwrap();
        }

        let batch = broker.read("q", Duration::from_secs(30), 3).await.unwrap();
        assert_eq!(batch.len(), 3);
        let rest = broker.read("q", Duration::from_secs(30), 10).await.unwrap();
        assert_eq!(rest.len(), 2);
    }
}
