//! # Dispatch Pipeline
//!
//! Per-message state machine: decode -> authenticate -> idempotency check ->
//! execute -> respond -> acknowledge, with failure exits to the retry holding
//! queue or the DLQ.
//!
//! Acknowledgement discipline: the original message is deleted from the
//! request queue only after its outcome has been durably recorded or
//! re-enqueued. If any step fails before that point the message stays
//! unacknowledged and the broker redelivers it once its visibility timeout
//! lapses; the idempotency store makes that redelivery safe.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, instrument, warn};

use crate::auth::AuthVerifier;
use crate::idempotency::{IdempotencyRecord, IdempotencyStore, InsertOutcome};
use crate::messaging::{
    DeadLetterEntry, MessagingError, MessagingResult, QueueClient, QueueMessage, QueueNames,
    QueuedRequest, ResponseEnvelope,
};
use crate::registry::{HandlerError, HandlerRegistry};
use crate::retry::{FailureClass, RetryDecision, RetryPolicy};

/// How a single delivery concluded
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    /// Executed (or terminally failed) and responded; outcome recorded
    Completed { request_id: String },
    /// Idempotency hit: stored response republished without execution
    Replayed { request_id: String },
    /// Credential rejection answered to the caller; never retried
    Rejected { request_id: String, reason: String },
    /// Transient failure routed to the retry holding queue
    Retried {
        request_id: String,
        attempt_count: u32,
        delay: Duration,
    },
    /// Permanently failed; preserved on the DLQ
    DeadLettered { reason: String },
}

/// Worker-side message processor
pub struct DispatchPipeline {
    queue: Arc<dyn QueueClient>,
    store: Arc<dyn IdempotencyStore>,
    auth: Arc<dyn AuthVerifier>,
    registry: Arc<HandlerRegistry>,
    policy: RetryPolicy,
    queues: QueueNames,
}

impl DispatchPipeline {
    pub fn new(
        queue: Arc<dyn QueueClient>,
        store: Arc<dyn IdempotencyStore>,
        auth: Arc<dyn AuthVerifier>,
        registry: Arc<HandlerRegistry>,
        policy: RetryPolicy,
        queues: QueueNames,
    ) -> Self {
        Self {
            queue,
            store,
            auth,
            registry,
            policy,
            queues,
        }
    }

    pub fn queues(&self) -> &QueueNames {
        &self.queues
    }

    /// Process one delivery from the request queue.
    ///
    /// Errors bubbling out of here leave the message unacknowledged; the
    /// broker will redeliver it. One message's failure never affects another.
    #[instrument(skip(self, message), fields(msg_id = message.msg_id))]
    pub async fn dispatch(&self, message: &QueueMessage) -> MessagingResult<DispatchOutcome> {
        // 1. Decode. Malformed payloads cannot self-heal: straight to the DLQ.
        let queued = match QueuedRequest::decode(&message.payload) {
            Ok(queued) => queued,
            Err(MessagingError::MalformedEnvelope { message: reason }) => {
                return self.dead_letter_raw(message, &reason).await;
            }
            Err(other) => return Err(other),
        };

        let request_id = queued.request.id.clone();

        // 2. Authenticate. Deterministic given the token, so never retried.
        let identity = match self.auth.verify(&queued.request.auth).await {
            Ok(identity) => identity,
            Err(auth_err) => {
                let reason = format!("authentication failed: {auth_err}");
                warn!(request_id = %request_id, %reason, "request rejected");
                let response = ResponseEnvelope::error(&request_id, &reason);
                self.publish_response(&queued.reply_to, &response).await?;
                self.ack(message.msg_id).await?;
                return Ok(DispatchOutcome::Rejected { request_id, reason });
            }
        };

        // 3. Idempotency check: a known id replays its stored response.
        match self.store.get(&request_id).await {
            Ok(Some(record)) => {
                debug!(
                    request_id = %request_id,
                    action = %queued.request.action,
                    "duplicate delivery, replaying stored response"
                );
                self.publish_response(&queued.reply_to, &record.response)
                    .await?;
                self.ack(message.msg_id).await?;
                return Ok(DispatchOutcome::Replayed { request_id });
            }
            Ok(None) => {}
            Err(store_err) => {
                // Store outage is transient infrastructure trouble
                return self
                    .handle_transient(queued, message.msg_id, &store_err.to_string())
                    .await;
            }
        }

        // 4. Execute business logic. Unknown actions are a business rejection,
        //    not a protocol failure.
        let outcome = match self
            .registry
            .resolve(&queued.request.version, &queued.request.action)
        {
            Some(handler) => handler.handle(&identity, &queued.request.data).await,
            None => Err(HandlerError::terminal(format!(
                "unknown action: {}.{}",
                queued.request.version, queued.request.action
            ))),
        };

        match outcome {
            Ok(data) => {
                let response = ResponseEnvelope::ok(&request_id, data);
                info!(
                    request_id = %request_id,
                    action = %queued.request.action,
                    "request executed"
                );
                self.complete(queued, message.msg_id, response).await
            }
            Err(handler_err) if handler_err.retryable => {
                self.handle_transient(queued, message.msg_id, &handler_err.message)
                    .await
            }
            Err(handler_err) => {
                let response = ResponseEnvelope::error(&request_id, &handler_err.message);
                warn!(
                    request_id = %request_id,
                    action = %queued.request.action,
                    error = %handler_err.message,
                    "request failed terminally"
                );
                self.complete(queued, message.msg_id, response).await
            }
        }
    }

    /// 5.-6. Record the final response, publish it, acknowledge.
    ///
    /// The conditional insert resolves concurrent first deliveries: the loser
    /// adopts the winner's stored response so both callers see identical
    /// content.
    async fn complete(
        &self,
        queued: QueuedRequest,
        msg_id: i64,
        response: ResponseEnvelope,
    ) -> MessagingResult<DispatchOutcome> {
        let request_id = queued.request.id.clone();
        let record = IdempotencyRecord::new(&request_id, response.clone());

        let stored_response = match self.store.insert_if_absent(record).await {
            Ok(InsertOutcome::Inserted) => response,
            Ok(InsertOutcome::AlreadyCompleted(winner)) => {
                debug!(
                    request_id = %request_id,
                    "lost idempotency race, publishing winner's response"
                );
                winner.response
            }
            Err(store_err) => {
                // Outcome not durably recorded; do not acknowledge.
                return self
                    .handle_transient(queued, msg_id, &store_err.to_string())
                    .await;
            }
        };

        self.publish_response(&queued.reply_to, &stored_response)
            .await?;
        self.ack(msg_id).await?;
        Ok(DispatchOutcome::Completed { request_id })
    }

    /// Transient failure: bump the attempt count once and consult the policy.
    async fn handle_transient(
        &self,
        mut queued: QueuedRequest,
        msg_id: i64,
        reason: &str,
    ) -> MessagingResult<DispatchOutcome> {
        let request_id = queued.request.id.clone();
        queued.delivery.record_failure(reason);
        let attempt_count = queued.delivery.attempt_count;

        match self.policy.decide(attempt_count, FailureClass::Transient) {
            RetryDecision::Requeue { delay } => {
                let payload = queued.encode()?;
                self.queue
                    .send_with_delay(&self.queues.retry, &payload, delay)
                    .await?;
                self.ack(msg_id).await?;
                warn!(
                    request_id = %request_id,
                    attempt_count,
                    delay_ms = delay.as_millis() as u64,
                    %reason,
                    "transient failure, scheduled for retry"
                );
                Ok(DispatchOutcome::Retried {
                    request_id,
                    attempt_count,
                    delay,
                })
            }
            RetryDecision::DeadLetter => {
                let reason = format!("retry attempts exhausted: {reason}");

                // Record a terminal error so a later duplicate publish of this
                // id replays instead of re-executing. Best effort: the message
                // must reach the DLQ even if the store is down.
                let record = IdempotencyRecord::new(
                    &request_id,
                    ResponseEnvelope::error(&request_id, &reason),
                );
                if let Err(store_err) = self.store.insert_if_absent(record).await {
                    warn!(
                        request_id = %request_id,
                        error = %store_err,
                        "failed to record exhaustion, dead-lettering anyway"
                    );
                }

                self.dead_letter(&queued, msg_id, &reason).await?;
                error!(
                    request_id = %request_id,
                    attempt_count,
                    %reason,
                    "message dead-lettered"
                );
                Ok(DispatchOutcome::DeadLettered { reason })
            }
        }
    }

    /// Preserve a decoded request verbatim on the DLQ and acknowledge it.
    async fn dead_letter(
        &self,
        queued: &QueuedRequest,
        msg_id: i64,
        reason: &str,
    ) -> MessagingResult<()> {
        let entry = DeadLetterEntry::from_queued(queued, reason)?;
        self.queue.send(&self.queues.dlq, &entry.encode()?).await?;
        self.ack(msg_id).await
    }

    /// Dead-letter an undecodable payload.
    async fn dead_letter_raw(
        &self,
        message: &QueueMessage,
        reason: &str,
    ) -> MessagingResult<DispatchOutcome> {
        error!(msg_id = message.msg_id, %reason, "malformed envelope dead-lettered");
        let entry = DeadLetterEntry::from_raw(&message.payload, reason);
        self.queue.send(&self.queues.dlq, &entry.encode()?).await?;
        self.ack(message.msg_id).await?;
        Ok(DispatchOutcome::DeadLettered {
            reason: reason.to_string(),
        })
    }

    /// Publish a response to the caller's reply destination.
    ///
    /// A vanished reply queue means the client session is gone; the response
    /// is undeliverable and dropped, which is fine, the stored record still
    /// answers any future duplicate.
    async fn publish_response(
        &self,
        reply_to: &str,
        response: &ResponseEnvelope,
    ) -> MessagingResult<()> {
        let payload = response.encode()?;
        match self.queue.send(reply_to, &payload).await {
            Ok(_) => Ok(()),
            Err(MessagingError::QueueNotFound { queue_name }) => {
                debug!(
                    reply_to = %queue_name,
                    correlation_id = %response.correlation_id,
                    "reply destination gone, response dropped"
                );
                Ok(())
            }
            Err(other) => Err(other),
        }
    }

    async fn ack(&self, msg_id: i64) -> MessagingResult<()> {
        self.queue.delete(&self.queues.requests, msg_id).await
    }
}
