//! # Message Envelopes and Wire Codec
//!
//! Defines the request/response envelopes exchanged over the queues, the
//! per-delivery attempt metadata, and the dead letter record format.
//!
//! Decoding is total over semantically invalid payloads: an unknown `action`
//! or nonsense `data` decodes fine and is rejected later by the business
//! layer. Only structural problems (missing `id`, a `status` outside the two
//! allowed literals) are protocol failures.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::errors::{MessagingError, MessagingResult};

/// Request envelope as published by clients.
///
/// `id` is client-generated and doubles as the broker correlation token and
/// the idempotency key. Re-delivery of the same `id` is expected and must be
/// idempotent, never an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestEnvelope {
    /// Opaque unique request id, unique per logical request
    pub id: String,
    /// Protocol/API version tag (e.g. "v1")
    pub version: String,
    /// Operation name, opaque to the transport layer
    pub action: String,
    /// Payload owned by the business handler
    #[serde(default)]
    pub data: Value,
    /// Opaque credential token
    #[serde(default)]
    pub auth: String,
}

impl RequestEnvelope {
    /// Create a new request envelope
    pub fn new(
        id: impl Into<String>,
        version: impl Into<String>,
        action: impl Into<String>,
        data: Value,
        auth: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            version: version.into(),
            action: action.into(),
            data,
            auth: auth.into(),
        }
    }

    /// Structural validation applied during decode
    fn validate(&self) -> MessagingResult<()> {
        if self.id.trim().is_empty() {
            return Err(MessagingError::malformed_envelope("required field `id` is missing or empty"));
        }
        if self.version.trim().is_empty() {
            return Err(MessagingError::malformed_envelope("required field `version` is missing or empty"));
        }
        if self.action.trim().is_empty() {
            return Err(MessagingError::malformed_envelope("required field `action` is missing or empty"));
        }
        Ok(())
    }
}

/// Response status, exactly the two wire literals
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    Ok,
    Error,
}

/// Response envelope published to the caller's reply destination.
///
/// Exactly one of `data`/`error` is populated; the constructors are the only
/// way the pipeline builds these, so the invariant holds on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    /// Equal to the originating request's `id`
    pub correlation_id: String,
    pub status: ResponseStatus,
    pub data: Option<Value>,
    pub error: Option<String>,
}

impl ResponseEnvelope {
    /// Create a successful response
    pub fn ok(correlation_id: impl Into<String>, data: Value) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            status: ResponseStatus::Ok,
            data: Some(data),
            error: None,
        }
    }

    /// Create an error response
    pub fn error(correlation_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            status: ResponseStatus::Error,
            data: None,
            error: Some(message.into()),
        }
    }

    /// Whether this response carries a success payload
    pub fn is_ok(&self) -> bool {
        self.status == ResponseStatus::Ok
    }

    /// Encode to a wire JSON value
    pub fn encode(&self) -> MessagingResult<Value> {
        serde_json::to_value(self).map_err(|e| MessagingError::message_serialization(e.to_string()))
    }

    /// Decode from a wire JSON value
    pub fn decode(value: &Value) -> MessagingResult<Self> {
        let response: ResponseEnvelope = serde_json::from_value(value.clone())
            .map_err(|e| MessagingError::malformed_envelope(e.to_string()))?;
        if response.correlation_id.trim().is_empty() {
            return Err(MessagingError::malformed_envelope(
                "required field `correlation_id` is missing or empty",
            ));
        }
        Ok(response)
    }
}

/// Per-delivery attempt metadata, carried inside the queued message body.
///
/// `attempt_count` is incremented exactly once per delivery that reaches the
/// retry decision point; deliveries that end in success, replay, or a
/// non-retryable exit never touch it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryMetadata {
    pub attempt_count: u32,
    pub first_seen_at: DateTime<Utc>,
    pub last_failure: Option<String>,
}

impl Default for DeliveryMetadata {
    fn default() -> Self {
        Self {
            attempt_count: 0,
            first_seen_at: Utc::now(),
            last_failure: None,
        }
    }
}

impl DeliveryMetadata {
    /// Record a transient failure ahead of the retry decision
    pub fn record_failure(&mut self, reason: impl Into<String>) {
        self.attempt_count += 1;
        self.last_failure = Some(reason.into());
    }
}

/// What actually travels on the request and retry queues: the client's
/// envelope plus the reply destination and delivery bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedRequest {
    pub request: RequestEnvelope,
    /// Reply destination named by the caller, unique per client session
    pub reply_to: String,
    #[serde(default)]
    pub delivery: DeliveryMetadata,
}

impl QueuedRequest {
    /// Wrap a fresh request for publication
    pub fn new(request: RequestEnvelope, reply_to: impl Into<String>) -> Self {
        Self {
            request,
            reply_to: reply_to.into(),
            delivery: DeliveryMetadata::default(),
        }
    }

    /// Encode to a wire JSON value
    pub fn encode(&self) -> MessagingResult<Value> {
        serde_json::to_value(self).map_err(|e| MessagingError::message_serialization(e.to_string()))
    }

    /// Decode and structurally validate a queued request.
    ///
    /// Fails with `MalformedEnvelope` when required fields are missing or have
    /// the wrong shape. Never fails on unknown actions or odd payloads.
    pub fn decode(value: &Value) -> MessagingResult<Self> {
        let queued: QueuedRequest = serde_json::from_value(value.clone())
            .map_err(|e| MessagingError::malformed_envelope(e.to_string()))?;
        queued.request.validate()?;
        if queued.reply_to.trim().is_empty() {
            return Err(MessagingError::malformed_envelope(
                "required field `reply_to` is missing or empty",
            ));
        }
        Ok(queued)
    }
}

/// Verbatim record preserved on the dead letter queue for offline inspection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetterEntry {
    pub failed_at: DateTime<Utc>,
    pub reason: String,
    /// Original payload exactly as delivered
    pub request: Value,
    pub reply_to: Option<String>,
    pub delivery: Option<DeliveryMetadata>,
}

impl DeadLetterEntry {
    /// Build a dead letter entry for a decoded request
    pub fn from_queued(queued: &QueuedRequest, reason: impl Into<String>) -> MessagingResult<Self> {
        Ok(Self {
            failed_at: Utc::now(),
            reason: reason.into(),
            request: serde_json::to_value(&queued.request)
                .map_err(|e| MessagingError::message_serialization(e.to_string()))?,
            reply_to: Some(queued.reply_to.clone()),
            delivery: Some(queued.delivery.clone()),
        })
    }

    /// Build a dead letter entry for an undecodable payload
    pub fn from_raw(payload: &Value, reason: impl Into<String>) -> Self {
        Self {
            failed_at: Utc::now(),
            reason: reason.into(),
            request: payload.clone(),
            reply_to: None,
            delivery: None,
        }
    }

    pub fn encode(&self) -> MessagingResult<Value> {
        serde_json::to_value(self).map_err(|e| MessagingError::message_serialization(e.to_string()))
    }

    pub fn decode(value: &Value) -> MessagingResult<Self> {
        serde_json::from_value(value.clone())
            .map_err(|e| MessagingError::malformed_envelope(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_queued() -> QueuedRequest {
        QueuedRequest::new(
            RequestEnvelope::new("r1", "v1", "create_task", json!({"title": "x"}), "token"),
            "api_replies_abc",
        )
    }

    #[test]
    fn test_queued_request_round_trip() {
        let queued = sample_queued();
        let wire = queued.encode().expect("encode");
        let decoded = QueuedRequest::decode(&wire).expect("decode");
        assert_eq!(queued, decoded);
        assert_eq!(decoded.delivery.attempt_count, 0);
    }

    #[test]
    fn test_decode_rejects_missing_id() {
        let wire = json!({
            "request": {"version": "v1", "action": "create_task", "data": {}, "auth": ""},
            "reply_to": "api_replies_abc"
        });
        let err = QueuedRequest::decode(&wire).unwrap_err();
        assert!(matches!(err, MessagingError::MalformedEnvelope { .. }));

        let wire = json!({
            "request": {"id": "  ", "version": "v1", "action": "a", "data": {}, "auth": ""},
            "reply_to": "api_replies_abc"
        });
        let err = QueuedRequest::decode(&wire).unwrap_err();
        assert!(matches!(err, MessagingError::MalformedEnvelope { .. }));
    }

    #[test]
    fn test_decode_rejects_missing_reply_to() {
        let wire = json!({
            "request": {"id": "r1", "version": "v1", "action": "a", "data": {}, "auth": ""}
        });
        let err = QueuedRequest::decode(&wire).unwrap_err();
        assert!(matches!(err, MessagingError::MalformedEnvelope { .. }));
    }

    #[test]
    fn test_decode_is_total_over_unknown_actions() {
        // An unknown action with bizarre data is structurally fine; rejecting
        // it is the business layer's job, not the codec's.
        let wire = json!({
            "request": {"id": "r1", "version": "v9", "action": "abracadabra", "data": [1, 2, 3], "auth": ""},
            "reply_to": "api_replies_abc"
        });
        let decoded = QueuedRequest::decode(&wire).expect("must decode");
        assert_eq!(decoded.request.action, "abracadabra");
    }

    #[test]
    fn test_request_data_defaults_to_null() {
        let wire = json!({
            "request": {"id": "r1", "version": "v1", "action": "health_check"},
            "reply_to": "api_replies_abc"
        });
        let decoded = QueuedRequest::decode(&wire).expect("must decode");
        assert!(decoded.request.data.is_null());
        assert!(decoded.request.auth.is_empty());
    }

    #[test]
    fn test_response_constructors_keep_invariant() {
        let ok = ResponseEnvelope::ok("r1", json!({"task_id": 7}));
        assert!(ok.is_ok());
        assert!(ok.data.is_some());
        assert!(ok.error.is_none());

        let err = ResponseEnvelope::error("r1", "title required");
        assert!(!err.is_ok());
        assert!(err.data.is_none());
        assert_eq!(err.error.as_deref(), Some("title required"));
    }

    #[test]
    fn test_response_decode_rejects_bad_status_literal() {
        let wire = json!({
            "correlation_id": "r1",
            "status": "pending",
            "data": null,
            "error": null
        });
        let err = ResponseEnvelope::decode(&wire).unwrap_err();
        assert!(matches!(err, MessagingError::MalformedEnvelope { .. }));
    }

    #[test]
    fn test_response_round_trip() {
        let response = ResponseEnvelope::ok("r1", json!({"task_id": 42}));
        let wire = response.encode().expect("encode");
        assert_eq!(wire["status"], "ok");
        let decoded = ResponseEnvelope::decode(&wire).expect("decode");
        assert_eq!(response, decoded);
    }

    #[test]
    fn test_delivery_metadata_failure_tracking() {
        let mut delivery = DeliveryMetadata::default();
        delivery.record_failure("inventory service unavailable");
        delivery.record_failure("timeout");
        assert_eq!(delivery.attempt_count, 2);
        assert_eq!(delivery.last_failure.as_deref(), Some("timeout"));
    }

    #[test]
    fn test_dead_letter_preserves_raw_payload() {
        let garbage = json!({"totally": "not an envelope"});
        let entry = DeadLetterEntry::from_raw(&garbage, "malformed envelope");
        assert_eq!(entry.request, garbage);
        assert!(entry.delivery.is_none());

        let wire = entry.encode().expect("encode");
        let decoded = DeadLetterEntry::decode(&wire).expect("decode");
        assert_eq!(decoded.reason, "malformed envelope");
    }
}
