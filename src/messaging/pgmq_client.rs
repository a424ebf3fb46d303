//! # PostgreSQL Message Queue Backend (pgmq-rs)
//!
//! Durable `QueueClient` implementation over the pgmq extension. Retry-delay
//! holding maps onto pgmq's per-message delayed visibility (`send_delay`), and
//! acknowledgement maps onto `delete`.

use std::time::Duration;

use async_trait::async_trait;
use pgmq::PGMQueue;
use serde_json::Value;
use sqlx::postgres::PgPoolOptions;
use tracing::{debug, info};

use super::errors::{MessagingError, MessagingResult};
use super::queue_client::{QueueClient, QueueMessage};

/// pgmq queue names are table suffixes; keep them injection-proof.
fn validate_queue_name(queue_name: &str) -> MessagingResult<()> {
    if queue_name.is_empty() {
        return Err(MessagingError::invalid_queue_name(queue_name, "empty name"));
    }
    if !queue_name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        return Err(MessagingError::invalid_queue_name(
            queue_name,
            "only ascii alphanumerics and underscores are allowed",
        ));
    }
    Ok(())
}

/// pgmq-backed broker client
#[derive(Debug, Clone)]
pub struct PgmqQueueClient {
    pgmq: PGMQueue,
    pool: sqlx::PgPool,
}

impl PgmqQueueClient {
    /// Connect to pgmq using a database URL.
    ///
    /// A separate small pool is kept for queue statistics queries that pgmq-rs
    /// does not expose.
    pub async fn connect(database_url: &str) -> MessagingResult<Self> {
        let pgmq = PGMQueue::new(database_url.to_string())
            .await
            .map_err(MessagingError::from)?;

        let pool = PgPoolOptions::new()
            .max_connections(2)
            .connect(database_url)
            .await?;

        info!("connected to pgmq backend");
        Ok(Self { pgmq, pool })
    }

    /// Reference to the statistics connection pool
    pub fn pool(&self) -> &sqlx::PgPool {
        &self.pool
    }
}

#[async_trait]
impl QueueClient for PgmqQueueClient {
    async fn create_queue(&self, queue_name: &str) -> MessagingResult<()> {
        validate_queue_name(queue_name)?;
        self.pgmq.create(queue_name).await.map_err(|e| {
            MessagingError::queue_operation(queue_name, "create", e.to_string())
        })?;
        debug!(queue = queue_name, "queue created");
        Ok(())
    }

    async fn send(&self, queue_name: &str, payload: &Value) -> MessagingResult<i64> {
        let msg_id = self.pgmq.send(queue_name, payload).await.map_err(|e| {
            MessagingError::queue_operation(queue_name, "send", e.to_string())
        })?;
        debug!(queue = queue_name, msg_id, "message sent");
        Ok(msg_id)
    }

    async fn send_with_delay(
        &self,
        queue_name: &str,
        payload: &Value,
        delay: Duration,
    ) -> MessagingResult<i64> {
        if delay.is_zero() {
            return self.send(queue_name, payload).await;
        }

        // pgmq delay granularity is whole seconds
        let delay_secs = delay.as_secs().max(1);
        let msg_id = self
            .pgmq
            .send_delay(queue_name, payload, delay_secs)
            .await
            .map_err(|e| {
                MessagingError::queue_operation(queue_name, "send_delay", e.to_string())
            })?;
        debug!(queue = queue_name, msg_id, delay_secs, "delayed message sent");
        Ok(msg_id)
    }

    async fn read(
        &self,
        queue_name: &str,
        visibility_timeout: Duration,
        limit: usize,
    ) -> MessagingResult<Vec<QueueMessage>> {
        let vt_secs = (visibility_timeout.as_secs().max(1)) as i32;
        let messages = self
            .pgmq
            .read_batch::<Value>(queue_name, Some(vt_secs), limit as i32)
            .await
            .map_err(|e| MessagingError::queue_operation(queue_name, "read", e.to_string()))?
            .unwrap_or_default();

        Ok(messages
            .into_iter()
            .map(|m| QueueMessage {
                msg_id: m.msg_id,
                read_count: m.read_ct,
                payload: m.message,
            })
            .collect())
    }

    async fn delete(&self, queue_name: &str, msg_id: i64) -> MessagingResult<()> {
        self.pgmq.delete(queue_name, msg_id).await.map_err(|e| {
            MessagingError::queue_operation(queue_name, "delete", e.to_string())
        })?;
        Ok(())
    }

    async fn purge(&self, queue_name: &str) -> MessagingResult<u64> {
        let purged = self.pgmq.purge(queue_name).await.map_err(|e| {
            MessagingError::queue_operation(queue_name, "purge", e.to_string())
        })?;
        Ok(purged)
    }

    async fn drop_queue(&self, queue_name: &str) -> MessagingResult<()> {
        self.pgmq.destroy(queue_name).await.map_err(|e| {
            MessagingError::queue_operation(queue_name, "destroy", e.to_string())
        })?;
        Ok(())
    }

    async fn queue_depth(&self, queue_name: &str) -> MessagingResult<u64> {
        validate_queue_name(queue_name)?;
        let count: i64 = sqlx::query_scalar(&format!(
            "SELECT count(*) FROM pgmq.q_{queue_name}"
        ))
        .fetch_one(&self.pool)
        .await?;
        Ok(count as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_queue_name_validation() {
        assert!(validate_queue_name("api_requests").is_ok());
        assert!(validate_queue_name("api_replies_0af3").is_ok());
        assert!(validate_queue_name("").is_err());
        assert!(validate_queue_name("api.requests").is_err());
        assert!(validate_queue_name("api; drop table").is_err());
    }

    #[tokio::test]
    async fn test_pgmq_round_trip() {
        // Requires a PostgreSQL database with the pgmq extension
        let Ok(database_url) = std::env::var("TEST_DATABASE_URL") else {
            println!("Skipping pgmq test - no TEST_DATABASE_URL provided");
            return;
        };

        let client = PgmqQueueClient::connect(&database_url)
            .await
            .expect("Failed to connect to pgmq");

        let queue = "mqrpc_core_pgmq_round_trip";
        client.create_queue(queue).await.expect("create");

        let msg_id = client
            .send(queue, &json!({"probe": true}))
            .await
            .expect("send");
        assert!(msg_id > 0);

        let messages = client
            .read(queue, Duration::from_secs(10), 5)
            .await
            .expect("read");
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].payload["probe"], true);

        client.delete(queue, messages[0].msg_id).await.expect("delete");
        client.drop_queue(queue).await.expect("destroy");
    }
}
