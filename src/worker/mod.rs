//! # Worker-Side Delivery
//!
//! The dispatch pipeline (per-message state machine), the polling worker
//! pool, and the scheduled requeue pump that services the retry holding
//! queue.

pub mod pipeline;
pub mod pool;
pub mod requeue;

pub use pipeline::{DispatchOutcome, DispatchPipeline};
pub use pool::WorkerPool;
pub use requeue::RequeuePump;
