#![allow(clippy::doc_markdown)] // Allow technical terms like PostgreSQL, SQLx in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # mqrpc-core
//!
//! Request/response RPC over an async message broker with exactly-once
//! effects under at-least-once delivery.
//!
//! ## Architecture
//!
//! - **messaging**: wire envelopes, the `QueueClient` broker abstraction, and
//!   its pgmq and in-memory backends
//! - **idempotency**: the conditional-insert store that collapses duplicate
//!   deliveries of one request id into a single executed effect
//! - **retry**: failure classification and the bounded backoff policy that
//!   routes transient failures through the retry holding queue to the DLQ
//! - **registry**: versioned action handlers behind the `ActionHandler` trait
//! - **auth**: token verification at the dispatch boundary
//! - **worker**: the dispatch pipeline, the polling worker pool, and the
//!   scheduled requeue pump
//! - **client**: the correlating RPC client with per-session reply queues
//!
//! ## Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//! use mqrpc_core::auth::{Identity, StaticTokenVerifier};
//! use mqrpc_core::client::RpcClient;
//! use mqrpc_core::config::RpcCoreConfig;
//! use mqrpc_core::messaging::{initialize_topology, InMemoryQueueClient, QueueClient};
//! use mqrpc_core::registry::HandlerRegistry;
//! use mqrpc_core::idempotency::InMemoryIdempotencyStore;
//! use mqrpc_core::worker::{DispatchPipeline, WorkerPool};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = RpcCoreConfig::default();
//! let queue: Arc<dyn QueueClient> = Arc::new(InMemoryQueueClient::new());
//! initialize_topology(queue.as_ref(), &config.queues).await?;
//!
//! let registry = HandlerRegistry::builder()
//!     .register_fn("v1", "health_check", |_identity, _data| {
//!         Ok(serde_json::json!({"status": "healthy"}))
//!     })?
//!     .build();
//!
//! let pipeline = Arc::new(DispatchPipeline::new(
//!     Arc::clone(&queue),
//!     Arc::new(InMemoryIdempotencyStore::new()),
//!     Arc::new(StaticTokenVerifier::new().allow("token", Identity::new("user-1"))),
//!     Arc::new(registry),
//!     config.retry.clone(),
//!     config.queues.clone(),
//! ));
//! let pool = WorkerPool::new(pipeline, Arc::clone(&queue), config.worker.clone());
//! pool.start();
//!
//! let client = RpcClient::connect(queue, config.queues.clone(), config.client.clone()).await?;
//! let response = client
//!     .call("v1", "health_check", serde_json::Value::Null, "token")
//!     .await?;
//! assert!(response.is_ok());
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod client;
pub mod config;
pub mod idempotency;
pub mod logging;
pub mod messaging;
pub mod registry;
pub mod retry;
pub mod worker;

pub use auth::{AuthError, AuthVerifier, Identity, StaticTokenVerifier};
pub use client::RpcClient;
pub use config::RpcCoreConfig;
pub use idempotency::{IdempotencyStore, InMemoryIdempotencyStore, PgIdempotencyStore};
pub use messaging::{
    initialize_topology, InMemoryQueueClient, MessagingError, MessagingResult, PgmqQueueClient,
    QueueClient, QueueNames, RequestEnvelope, ResponseEnvelope,
};
pub use registry::{ActionHandler, HandlerError, HandlerRegistry, HandlerResult};
pub use retry::{FailureClass, RetryDecision, RetryPolicy};
pub use worker::{DispatchOutcome, DispatchPipeline, RequeuePump, WorkerPool};
