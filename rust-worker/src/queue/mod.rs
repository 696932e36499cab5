//! Queue module for RabbitMQ operations.
//!
//! This module provides:
//! - Message types for the two-queue architecture
//! - Async publisher for enqueueing messages
//!
//! ## Architecture
//!
//! ```text
//! Web Server → inbound_submissions queue → Processor → bulk_delivery queue → Worker
//! ```

pub mod publisher;
pub mod types;

pub use publisher::Publisher;
pub use types::{BulkRequest, SubmissionPayload, DELIVERY_QUEUE, SUBMISSION_QUEUE};
