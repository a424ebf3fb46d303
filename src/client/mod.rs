//! # RPC Client
//!
//! Publishes requests and suspends on a correlation waiter until the matching
//! response lands on this session's exclusive reply queue, or the call times
//! out. A timeout cancels only the local wait: the request may still execute
//! server-side, and a late response for an expired waiter is discarded, not
//! an error.
//!
//! Retrying a timed-out call with the SAME id (`call_with_id`) is safe: the
//! idempotency store guarantees the effect happens once and the stored
//! response is replayed. Retrying with a fresh id may duplicate effects.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::ClientConfig;
use crate::messaging::{
    MessagingError, MessagingResult, QueueClient, QueueNames, QueuedRequest, RequestEnvelope,
    ResponseEnvelope,
};

/// Reply-queue read batch per pump pass
const REPLY_BATCH_SIZE: usize = 16;

/// Visibility window while a reply is being routed to its waiter
const REPLY_VISIBILITY: Duration = Duration::from_secs(30);

type WaiterMap = DashMap<String, oneshot::Sender<ResponseEnvelope>>;

/// One client session with an exclusive, ephemeral reply destination
pub struct RpcClient {
    queue: Arc<dyn QueueClient>,
    queues: QueueNames,
    config: ClientConfig,
    reply_queue: String,
    waiters: Arc<WaiterMap>,
    shutdown_tx: watch::Sender<bool>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl RpcClient {
    /// Create the session: declares the reply queue and starts the reply
    /// pump that resolves waiters by correlation id.
    pub async fn connect(
        queue: Arc<dyn QueueClient>,
        queues: QueueNames,
        config: ClientConfig,
    ) -> MessagingResult<Self> {
        let reply_queue = format!("{}_{}", queues.reply_prefix, Uuid::new_v4().simple());
        queue.create_queue(&reply_queue).await?;

        let waiters: Arc<WaiterMap> = Arc::new(DashMap::new());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let pump = tokio::spawn(reply_pump(
            Arc::clone(&queue),
            reply_queue.clone(),
            Arc::clone(&waiters),
            Duration::from_millis(config.reply_poll_interval_ms),
            shutdown_rx,
        ));

        info!(reply_queue = %reply_queue, "rpc client session opened");
        Ok(Self {
            queue,
            queues,
            config,
            reply_queue,
            waiters,
            shutdown_tx,
            pump: Mutex::new(Some(pump)),
        })
    }

    /// This session's reply destination name
    pub fn reply_queue(&self) -> &str {
        &self.reply_queue
    }

    /// Publish a request with a fresh unique id and wait for its response.
    pub async fn call(
        &self,
        version: &str,
        action: &str,
        data: Value,
        auth: &str,
    ) -> MessagingResult<ResponseEnvelope> {
        self.call_with_id(Uuid::new_v4().to_string(), version, action, data, auth)
            .await
    }

    /// Publish a request under a caller-chosen id.
    ///
    /// Reusing the id of a timed-out call is the idempotent-safe retry path.
    pub async fn call_with_id(
        &self,
        request_id: String,
        version: &str,
        action: &str,
        data: Value,
        auth: &str,
    ) -> MessagingResult<ResponseEnvelope> {
        let (tx, rx) = oneshot::channel();
        self.waiters.insert(request_id.clone(), tx);

        let queued = QueuedRequest::new(
            RequestEnvelope::new(&request_id, version, action, data, auth),
            &self.reply_queue,
        );
        let payload = queued.encode()?;

        if let Err(publish_err) = self.queue.send(&self.queues.requests, &payload).await {
            self.waiters.remove(&request_id);
            return Err(publish_err);
        }
        debug!(request_id = %request_id, action, "request published");

        let timeout_ms = self.config.rpc_timeout_ms;
        match timeout(Duration::from_millis(timeout_ms), rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(MessagingError::internal(
                "reply pump dropped the waiter (client shutting down)",
            )),
            Err(_) => {
                // Cancel only the local wait; the server may still execute.
                self.waiters.remove(&request_id);
                warn!(request_id = %request_id, timeout_ms, "rpc call timed out");
                Err(MessagingError::RpcTimeout {
                    correlation_id: request_id,
                    timeout_ms,
                })
            }
        }
    }

    /// Stop the reply pump and drop the reply queue
    pub async fn close(&self) {
        let _ = self.shutdown_tx.send(true);
        let pump = self.pump.lock().take();
        if let Some(pump) = pump {
            let _ = pump.await;
        }
        if let Err(e) = self.queue.drop_queue(&self.reply_queue).await {
            debug!(reply_queue = %self.reply_queue, error = %e, "reply queue already gone");
        }
        info!(reply_queue = %self.reply_queue, "rpc client session closed");
    }
}

/// Reads the reply queue and resolves waiters by `correlation_id` equality.
/// Responses without a live waiter (late arrivals after a timeout) are
/// discarded.
async fn reply_pump(
    queue: Arc<dyn QueueClient>,
    reply_queue: String,
    waiters: Arc<WaiterMap>,
    poll_interval: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        let messages = match queue.read(&reply_queue, REPLY_VISIBILITY, REPLY_BATCH_SIZE).await {
            Ok(messages) => messages,
            Err(e) => {
                if *shutdown_rx.borrow() {
                    break;
                }
                error!(reply_queue = %reply_queue, error = %e, "failed to read reply queue");
                tokio::select! {
                    _ = sleep(poll_interval) => {}
                    _ = shutdown_rx.changed() => {}
                }
                continue;
            }
        };

        if messages.is_empty() {
            tokio::select! {
                _ = sleep(poll_interval) => {}
                _ = shutdown_rx.changed() => {}
            }
            continue;
        }

        for message in messages {
            match ResponseEnvelope::decode(&message.payload) {
                Ok(response) => match waiters.remove(&response.correlation_id) {
                    Some((_, tx)) => {
                        // Waiter may have timed out between remove and send;
                        // a failed send is just another orphan.
                        let _ = tx.send(response);
                    }
                    None => {
                        debug!(
                            correlation_id = %response.correlation_id,
                            "orphaned response discarded"
                        );
                    }
                },
                Err(e) => {
                    warn!(
                        msg_id = message.msg_id,
                        error = %e,
                        "undecodable reply dropped"
                    );
                }
            }
            if let Err(e) = queue.delete(&reply_queue, message.msg_id).await {
                warn!(msg_id = message.msg_id, error = %e, "failed to delete reply");
            }
        }
    }
}
