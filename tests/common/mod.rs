//! Shared harness for protocol integration tests: an in-memory broker with
//! the full topology, a counting handler set, and a pipeline wired the way
//! production wires it.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use serde_json::json;

use mqrpc_core::auth::{Identity, StaticTokenVerifier};
use mqrpc_core::idempotency::InMemoryIdempotencyStore;
use mqrpc_core::messaging::{
    initialize_topology, InMemoryQueueClient, QueueClient, QueueNames, QueuedRequest,
    RequestEnvelope,
};
use mqrpc_core::registry::{HandlerError, HandlerRegistry};
use mqrpc_core::retry::{BackoffStrategy, RetryPolicy};
use mqrpc_core::worker::DispatchPipeline;

pub const GOOD_TOKEN: &str = "integration-token";

/// Everything a protocol test needs, wired together
pub struct TestHarness {
    pub queue: Arc<dyn QueueClient>,
    pub store: Arc<InMemoryIdempotencyStore>,
    pub pipeline: Arc<DispatchPipeline>,
    pub queues: QueueNames,
    /// How many times the `create_task` handler actually executed
    pub effect_count: Arc<AtomicU32>,
    /// How many times the `flaky` handler has been invoked
    pub flaky_attempts: Arc<AtomicU32>,
}

impl TestHarness {
    /// Build a harness with fast retry delays suitable for tests
    pub async fn new() -> Self {
        Self::with_policy(RetryPolicy {
            max_attempts: 3,
            base_delay_ms: 5,
            max_delay_ms: 50,
            backoff: BackoffStrategy::Fixed,
        })
        .await
    }

    pub async fn with_policy(policy: RetryPolicy) -> Self {
        let queue: Arc<dyn QueueClient> = Arc::new(InMemoryQueueClient::new());
        let queues = QueueNames::default();
        initialize_topology(queue.as_ref(), &queues)
            .await
            .expect("topology");

        let store = Arc::new(InMemoryIdempotencyStore::new());
        let effect_count = Arc::new(AtomicU32::new(0));
        let flaky_attempts = Arc::new(AtomicU32::new(0));

        let effects = Arc::clone(&effect_count);
        let flaky = Arc::clone(&flaky_attempts);
        let registry = HandlerRegistry::builder()
            .register_fn("v1", "create_task", move |identity, data| {
                let n = effects.fetch_add(1, Ordering::SeqCst) + 1;
                match data.get("title").and_then(|t| t.as_str()) {
                    Some(title) if !title.is_empty() => Ok(json!({
                        "task_id": n,
                        "title": title,
                        "owner": identity.subject,
                    })),
                    _ => Err(HandlerError::terminal("title is required")),
                }
            })
            .unwrap()
            .register_fn("v1", "flaky", move |_identity, _data| {
                flaky.fetch_add(1, Ordering::SeqCst);
                Err(HandlerError::transient("downstream unavailable"))
            })
            .unwrap()
            .register_fn("v1", "health_check", |_identity, _data| {
                Ok(json!({"status": "healthy"}))
            })
            .unwrap()
            .build();

        let auth = StaticTokenVerifier::new().allow(
            GOOD_TOKEN,
            Identity::new("user-1").with_display_name("Integration User"),
        );

        let pipeline = Arc::new(DispatchPipeline::new(
            Arc::clone(&queue),
            store.clone() as Arc<dyn mqrpc_core::idempotency::IdempotencyStore>,
            Arc::new(auth),
            Arc::new(registry),
            policy,
            queues.clone(),
        ));

        Self {
            queue,
            store,
            pipeline,
            queues,
            effect_count,
            flaky_attempts,
        }
    }

    /// Publish a queued request bound for the test reply queue
    pub async fn publish(&self, request: RequestEnvelope, reply_to: &str) -> i64 {
        let queued = QueuedRequest::new(request, reply_to);
        self.queue
            .send(&self.queues.requests, &queued.encode().expect("encode"))
            .await
            .expect("publish")
    }

    /// Create a reply queue for a test and return its name
    pub async fn reply_queue(&self, name: &str) -> String {
        let queue_name = format!("{}_{}", self.queues.reply_prefix, name);
        self.queue.create_queue(&queue_name).await.expect("reply queue");
        queue_name
    }

    /// Dispatch every visible request-queue message once, returning outcomes
    pub async fn dispatch_visible(&self) -> Vec<mqrpc_core::worker::DispatchOutcome> {
        let messages = self
            .queue
            .read(
                &self.queues.requests,
                std::time::Duration::from_secs(30),
                32,
            )
            .await
            .expect("read");

        let mut outcomes = Vec::new();
        for message in messages {
            outcomes.push(self.pipeline.dispatch(&message).await.expect("dispatch"));
        }
        outcomes
    }

    /// Pop every message currently visible on a reply queue
    pub async fn drain_replies(&self, reply_queue: &str) -> Vec<serde_json::Value> {
        let messages = self
            .queue
            .read(reply_queue, std::time::Duration::from_secs(30), 32)
            .await
            .expect("read replies");
        let mut payloads = Vec::new();
        for message in messages {
            self.queue
                .delete(reply_queue, message.msg_id)
                .await
                .expect("delete reply");
            payloads.push(message.payload);
        }
        payloads
    }
}

/// A well-formed create_task request with the shared good token
#[allow(dead_code)] // not every test binary uses every helper
pub fn create_task_request(id: &str, title: &str) -> RequestEnvelope {
    RequestEnvelope::new(id, "v1", "create_task", json!({"title": title}), GOOD_TOKEN)
}
