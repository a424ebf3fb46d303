//! # Idempotency Store
//!
//! Write-once record of request ids already processed, keyed by the request
//! `id`, storing the final response. This is the sole mechanism that turns
//! at-least-once delivery into exactly-once effect: every delivery of an id
//! reads the store first, and the record-result step is a conditional insert
//! so racing workers converge on one stored response.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::messaging::ResponseEnvelope;

pub use memory::InMemoryIdempotencyStore;
pub use postgres::PgIdempotencyStore;

/// Errors from the idempotency backing store.
///
/// The dispatch pipeline treats these as transient infrastructure failures:
/// the delivery is retried rather than acknowledged with an unrecorded
/// outcome.
#[derive(Error, Debug)]
pub enum IdempotencyError {
    #[error("idempotency store error: {operation}: {message}")]
    Storage { operation: String, message: String },

    #[error("idempotency record serialization error: {message}")]
    Serialization { message: String },
}

impl IdempotencyError {
    pub fn storage(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Storage {
            operation: operation.into(),
            message: message.into(),
        }
    }

    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }
}

impl From<sqlx::Error> for IdempotencyError {
    fn from(err: sqlx::Error) -> Self {
        IdempotencyError::storage("query", err.to_string())
    }
}

impl From<serde_json::Error> for IdempotencyError {
    fn from(err: serde_json::Error) -> Self {
        IdempotencyError::serialization(err.to_string())
    }
}

pub type IdempotencyResult<T> = Result<T, IdempotencyError>;

/// Completed-request record; never mutated after creation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    pub request_id: String,
    pub response: ResponseEnvelope,
    pub completed_at: DateTime<Utc>,
}

impl IdempotencyRecord {
    pub fn new(request_id: impl Into<String>, response: ResponseEnvelope) -> Self {
        Self {
            request_id: request_id.into(),
            response,
            completed_at: Utc::now(),
        }
    }
}

/// Result of the conditional insert
#[derive(Debug, Clone, PartialEq)]
pub enum InsertOutcome {
    /// This worker's record was stored
    Inserted,
    /// Another worker won the race; its record is returned so the loser can
    /// republish the winner's response
    AlreadyCompleted(IdempotencyRecord),
}

/// Durable write-once map of request id to final response
#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    /// Look up a previously completed request
    async fn get(&self, request_id: &str) -> IdempotencyResult<Option<IdempotencyRecord>>;

    /// Atomically insert the record unless one already exists for the id.
    ///
    /// On conflict the existing record is returned, never overwritten.
    async fn insert_if_absent(&self, record: IdempotencyRecord) -> IdempotencyResult<InsertOutcome>;
}
