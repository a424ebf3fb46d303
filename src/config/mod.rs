//! # Configuration
//!
//! Runtime configuration with environment overrides. Every field has a
//! default, so `RpcCoreConfig::default()` is a fully usable in-process setup
//! and `load()` only layers `MQRPC__*` environment variables on top.
//!
//! Override naming follows the struct path with `__` separators, e.g.
//! `MQRPC__RETRY__MAX_ATTEMPTS=5` or `MQRPC__WORKER__CONCURRENCY=8`.

use config::{Config, Environment};
use serde::{Deserialize, Serialize};

use crate::messaging::errors::{MessagingError, MessagingResult};
use crate::messaging::queue_client::QueueNames;
use crate::retry::RetryPolicy;

/// Top-level configuration for clients, workers, and the broker connection
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcCoreConfig {
    pub broker: BrokerConfig,
    pub queues: QueueNames,
    pub retry: RetryPolicy,
    pub worker: WorkerConfig,
    pub client: ClientConfig,
}

/// Broker connection settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Postgres URL for the pgmq backend; unset means in-memory only
    pub database_url: Option<String>,
}

/// Worker pool tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Number of concurrent consumer loops
    pub concurrency: usize,
    /// Messages read per poll
    pub batch_size: usize,
    /// Idle sleep between polls of an empty request queue
    pub poll_interval_ms: u64,
    /// Broker visibility window granted per read; an unacknowledged message
    /// is redelivered after this elapses
    pub visibility_timeout_ms: u64,
    /// How often the requeue pump sweeps the retry holding queue
    pub requeue_poll_interval_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 2,
            batch_size: 10,
            poll_interval_ms: 250,
            visibility_timeout_ms: 30_000,
            requeue_poll_interval_ms: 250,
        }
    }
}

/// RPC client tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// How long a call waits for its response before giving up
    pub rpc_timeout_ms: u64,
    /// Reply pump sleep when the reply queue is empty
    pub reply_poll_interval_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            rpc_timeout_ms: 30_000,
            reply_poll_interval_ms: 50,
        }
    }
}

impl RpcCoreConfig {
    /// Load defaults with `MQRPC__*` environment overrides applied
    pub fn load() -> MessagingResult<Self> {
        let source = Environment::with_prefix("MQRPC")
            .prefix_separator("__")
            .separator("__")
            .try_parsing(true);

        let config = Config::builder()
            .add_source(source)
            .build()
            .map_err(|e| MessagingError::configuration("environment", e.to_string()))?;

        config
            .try_deserialize()
            .map_err(|e| MessagingError::configuration("deserialize", e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_values() {
        let config = RpcCoreConfig::default();
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.base_delay_ms, 5_000);
        assert_eq!(config.client.rpc_timeout_ms, 30_000);
        assert_eq!(config.worker.concurrency, 2);
        assert_eq!(config.queues.requests, "api_requests");
        assert_eq!(config.queues.retry, "api_requests_retry");
        assert_eq!(config.queues.dlq, "api_requests_dlq");
        assert!(config.broker.database_url.is_none());
    }

    #[test]
    fn test_config_survives_serde_round_trip() {
        let config = RpcCoreConfig::default();
        let json = serde_json::to_string(&config).expect("serialize");
        let back: RpcCoreConfig = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back.worker.batch_size, config.worker.batch_size);
        assert_eq!(back.client.reply_poll_interval_ms, config.client.reply_poll_interval_ms);
    }
}
