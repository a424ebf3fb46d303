//! # Worker Pool
//!
//! Concurrent consumers over the shared request queue. Each consumer polls a
//! batch, dispatches every message through the pipeline, and sleeps only when
//! the queue is empty. The broker's visibility timeout keeps a message with
//! at most one consumer at a time while it is in flight.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, instrument};

use crate::config::WorkerConfig;
use crate::messaging::{MessagingResult, QueueClient};

use super::pipeline::DispatchPipeline;

/// Pool of polling consumers sharing one pipeline
pub struct WorkerPool {
    pipeline: Arc<DispatchPipeline>,
    queue: Arc<dyn QueueClient>,
    config: WorkerConfig,
    shutdown_tx: watch::Sender<bool>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    pub fn new(
        pipeline: Arc<DispatchPipeline>,
        queue: Arc<dyn QueueClient>,
        config: WorkerConfig,
    ) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            pipeline,
            queue,
            config,
            shutdown_tx,
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Spawn the configured number of consumer loops
    pub fn start(&self) {
        let mut handles = self.handles.lock();
        for worker_index in 0..self.config.concurrency {
            let pipeline = Arc::clone(&self.pipeline);
            let queue = Arc::clone(&self.queue);
            let config = self.config.clone();
            let shutdown_rx = self.shutdown_tx.subscribe();

            handles.push(tokio::spawn(async move {
                consumer_loop(worker_index, pipeline, queue, config, shutdown_rx).await;
            }));
        }
        info!(
            concurrency = self.config.concurrency,
            "worker pool started"
        );
    }

    /// Signal shutdown and wait for all consumers to drain
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.handles.lock());
        join_all(handles).await;
        info!("worker pool stopped");
    }
}

#[instrument(skip(pipeline, queue, config, shutdown_rx))]
async fn consumer_loop(
    worker_index: usize,
    pipeline: Arc<DispatchPipeline>,
    queue: Arc<dyn QueueClient>,
    config: WorkerConfig,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let poll_interval = Duration::from_millis(config.poll_interval_ms);
    debug!(worker_index, "consumer loop started");

    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        match poll_once(&pipeline, &queue, &config).await {
            Ok(0) => {
                // Nothing visible; idle until the next poll or shutdown
                tokio::select! {
                    _ = sleep(poll_interval) => {}
                    _ = shutdown_rx.changed() => {}
                }
            }
            Ok(_) => {
                // Processed work; poll again immediately for throughput
            }
            Err(e) => {
                error!(worker_index, error = %e, "error polling request queue");
                tokio::select! {
                    _ = sleep(poll_interval) => {}
                    _ = shutdown_rx.changed() => {}
                }
            }
        }
    }

    debug!(worker_index, "consumer loop stopped");
}

/// Read one batch and dispatch each message, returning how many were seen.
///
/// A dispatch error leaves that message unacknowledged; the broker redelivers
/// it after its visibility timeout, and the idempotency store makes the
/// re-entry safe.
async fn poll_once(
    pipeline: &DispatchPipeline,
    queue: &Arc<dyn QueueClient>,
    config: &WorkerConfig,
) -> MessagingResult<usize> {
    let messages = queue
        .read(
            &pipeline.queues().requests,
            Duration::from_millis(config.visibility_timeout_ms),
            config.batch_size,
        )
        .await?;

    if messages.is_empty() {
        return Ok(0);
    }

    let seen = messages.len();
    for message in messages {
        match pipeline.dispatch(&message).await {
            Ok(outcome) => {
                debug!(msg_id = message.msg_id, ?outcome, "message dispatched");
            }
            Err(e) => {
                error!(
                    msg_id = message.msg_id,
                    error = %e,
                    "dispatch failed, message left for redelivery"
                );
            }
        }
    }
    Ok(seen)
}
