//! # Messaging Error Types
//!
//! Structured error handling for the queue/RPC transport layer using thiserror
//! instead of `Box<dyn Error>` patterns.

use thiserror::Error;

/// Errors raised by the broker transport and the envelope codec.
///
/// `MalformedEnvelope` is the protocol-level failure class: it is never
/// retried and routes a message straight to the dead letter queue. Everything
/// else here describes broker or storage plumbing faults.
#[derive(Error, Debug)]
pub enum MessagingError {
    #[error("malformed envelope: {message}")]
    MalformedEnvelope { message: String },

    #[error("broker connection error: {message}")]
    BrokerConnection { message: String },

    #[error("queue operation failed: {queue_name}: {operation}: {message}")]
    QueueOperation {
        queue_name: String,
        operation: String,
        message: String,
    },

    #[error("queue not found: {queue_name}")]
    QueueNotFound { queue_name: String },

    #[error("invalid queue name: {queue_name}: {reason}")]
    InvalidQueueName { queue_name: String, reason: String },

    #[error("message serialization error: {message}")]
    MessageSerialization { message: String },

    #[error("configuration error: {component}: {message}")]
    Configuration { component: String, message: String },

    #[error("rpc call {correlation_id} timed out after {timeout_ms}ms")]
    RpcTimeout {
        correlation_id: String,
        timeout_ms: u64,
    },

    #[error("internal messaging error: {message}")]
    Internal { message: String },
}

impl MessagingError {
    /// Create a malformed envelope error
    pub fn malformed_envelope(message: impl Into<String>) -> Self {
        Self::MalformedEnvelope {
            message: message.into(),
        }
    }

    /// Create a broker connection error
    pub fn broker_connection(message: impl Into<String>) -> Self {
        Self::BrokerConnection {
            message: message.into(),
        }
    }

    /// Create a queue operation error
    pub fn queue_operation(
        queue_name: impl Into<String>,
        operation: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::QueueOperation {
            queue_name: queue_name.into(),
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Create a queue not found error
    pub fn queue_not_found(queue_name: impl Into<String>) -> Self {
        Self::QueueNotFound {
            queue_name: queue_name.into(),
        }
    }

    /// Create an invalid queue name error
    pub fn invalid_queue_name(queue_name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidQueueName {
            queue_name: queue_name.into(),
            reason: reason.into(),
        }
    }

    /// Create a message serialization error
    pub fn message_serialization(message: impl Into<String>) -> Self {
        Self::MessageSerialization {
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn configuration(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Configuration {
            component: component.into(),
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}

/// Conversion from serde_json::Error to MessagingError
impl From<serde_json::Error> for MessagingError {
    fn from(err: serde_json::Error) -> Self {
        if err.is_syntax() || err.is_data() {
            MessagingError::malformed_envelope(err.to_string())
        } else {
            MessagingError::message_serialization(err.to_string())
        }
    }
}

/// Conversion from sqlx::Error to MessagingError
impl From<sqlx::Error> for MessagingError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
                MessagingError::broker_connection(err.to_string())
            }
            sqlx::Error::Configuration(config_err) => {
                MessagingError::configuration("database", config_err.to_string())
            }
            _ => MessagingError::broker_connection(err.to_string()),
        }
    }
}

/// Conversion from pgmq::errors::PgmqError to MessagingError
impl From<pgmq::errors::PgmqError> for MessagingError {
    fn from(err: pgmq::errors::PgmqError) -> Self {
        MessagingError::queue_operation("unknown", "pgmq", err.to_string())
    }
}

/// Result type alias for messaging operations
pub type MessagingResult<T> = Result<T, MessagingError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constructor_helpers() {
        let err = MessagingError::queue_operation("api_requests", "send", "connection reset");
        assert!(matches!(err, MessagingError::QueueOperation { .. }));

        let err = MessagingError::malformed_envelope("id missing");
        assert!(matches!(err, MessagingError::MalformedEnvelope { .. }));
    }

    #[test]
    fn test_error_display() {
        let err = MessagingError::queue_operation("api_requests", "read", "timed out");
        let display = format!("{err}");
        assert!(display.contains("api_requests"));
        assert!(display.contains("read"));
        assert!(display.contains("timed out"));

        let err = MessagingError::RpcTimeout {
            correlation_id: "r1".to_string(),
            timeout_ms: 30000,
        };
        assert!(format!("{err}").contains("30000ms"));
    }

    #[test]
    fn test_serde_error_maps_to_malformed() {
        let json_err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let err: MessagingError = json_err.into();
        assert!(matches!(err, MessagingError::MalformedEnvelope { .. }));
    }
}
