//! Postroom - High-performance bulk email delivery system.
//!
//! This library provides shared modules for the three Postroom binaries:
//! - `postroom-web`: Thin web server for receiving job submissions
//! - `postroom-processor`: Processor for scanning rows into recipients
//! - `postroom-worker`: Delivery worker draining bulk jobs through a transport
//!
//! ## Architecture
//!
//! ```text
//! Submissions → Web Server → inbound_submissions → Processor → bulk_delivery → Worker
//! ```

pub mod config;
pub mod job;
pub mod queue;
pub mod report;
pub mod send;
pub mod source;
pub mod template;
pub mod util;
pub mod web;

// Re-export commonly used types
pub use config::Config;
pub use job::{JobStore, OutgoingMessage, SubmitOptions, TaskOutcome};
pub use queue::{
    BulkRequest, Publisher, SubmissionPayload, DELIVERY_QUEUE, SUBMISSION_QUEUE,
};
pub use report::JobSummary;
pub use send::{MailgunTransport, RetryPolicy, SendExecutor, Transport, TransportError};
pub use source::{scan_submission, Recipient, ScanError};
pub use template::Template;
pub use web::AppState;
