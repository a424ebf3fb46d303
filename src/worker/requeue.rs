//! # Scheduled Requeue Pump
//!
//! Returns expired retry-holding messages to the head of the request queue.
//! The hold delay itself is enforced by the broker (delayed visibility on the
//! retry queue); the pump only moves messages that have become visible again,
//! so workers never sleep in-process while a message "waits".

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info};

use crate::messaging::{MessagingResult, QueueClient, QueueNames};

/// Batch size for each drain pass
const DRAIN_BATCH_SIZE: usize = 32;

/// Visibility applied while a message is being moved back
const MOVE_VISIBILITY: Duration = Duration::from_secs(30);

/// Timer-backed requeue service between the retry queue and the request queue
pub struct RequeuePump {
    queue: Arc<dyn QueueClient>,
    queues: QueueNames,
    poll_interval: Duration,
    shutdown_tx: watch::Sender<bool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl RequeuePump {
    pub fn new(queue: Arc<dyn QueueClient>, queues: QueueNames, poll_interval: Duration) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            queue,
            queues,
            poll_interval,
            shutdown_tx,
            handle: Mutex::new(None),
        }
    }

    /// Move every currently-visible retry message back to the request queue.
    ///
    /// Send-then-delete ordering: a crash between the two duplicates the
    /// message rather than losing it, and the idempotency store absorbs the
    /// duplicate.
    pub async fn drain_once(&self) -> MessagingResult<usize> {
        let messages = self
            .queue
            .read(&self.queues.retry, MOVE_VISIBILITY, DRAIN_BATCH_SIZE)
            .await?;

        let mut moved = 0;
        for message in messages {
            self.queue
                .send(&self.queues.requests, &message.payload)
                .await?;
            self.queue.delete(&self.queues.retry, message.msg_id).await?;
            moved += 1;
        }

        if moved > 0 {
            debug!(moved, "retry messages returned to request queue");
        }
        Ok(moved)
    }

    /// Spawn the background drain loop
    pub fn start(self: &Arc<Self>) {
        let pump = Arc::clone(self);
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let poll_interval = self.poll_interval;

        let handle = tokio::spawn(async move {
            info!(retry = %pump.queues.retry, "requeue pump started");
            loop {
                if *shutdown_rx.borrow() {
                    break;
                }
                match pump.drain_once().await {
                    Ok(0) | Err(_) if *shutdown_rx.borrow() => break,
                    Ok(0) => {
                        tokio::select! {
                            _ = sleep(poll_interval) => {}
                            _ = shutdown_rx.changed() => {}
                        }
                    }
                    Ok(_) => {}
                    Err(e) => {
                        error!(error = %e, "requeue pump drain failed");
                        tokio::select! {
                            _ = sleep(poll_interval) => {}
                            _ = shutdown_rx.changed() => {}
                        }
                    }
                }
            }
            info!("requeue pump stopped");
        });

        *self.handle.lock() = Some(handle);
    }

    /// Signal shutdown and wait for the drain loop to finish
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}
