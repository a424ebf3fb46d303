//! # Messaging Module
//!
//! Wire envelopes, the broker abstraction, and its backends. The pgmq client
//! is the durable production backend; the in-memory client carries the same
//! delivery semantics for in-process testing.

pub mod envelope;
pub mod errors;
pub mod in_memory;
pub mod pgmq_client;
pub mod queue_client;

pub use envelope::{
    DeadLetterEntry, DeliveryMetadata, QueuedRequest, RequestEnvelope, ResponseEnvelope,
    ResponseStatus,
};
pub use errors::{MessagingError, MessagingResult};
pub use in_memory::InMemoryQueueClient;
pub use pgmq_client::PgmqQueueClient;
pub use queue_client::{
    initialize_topology, read_dead_letters, QueueClient, QueueMessage, QueueNames,
};
