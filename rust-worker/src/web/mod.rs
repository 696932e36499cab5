//! Web server module for receiving job submissions.
//!
//! This module provides a thin, fast web server that:
//! - Receives signed bulk job submissions
//! - Verifies the submission signature
//! - Immediately enqueues raw payloads to RabbitMQ
//! - Returns 200 OK in microseconds
//!
//! All scanning and delivery happens in the background binaries.

pub mod handlers;
pub mod signature;

pub use handlers::{
    health, submit_job, AppState, HealthResponse, SubmissionForm, SubmissionResponse,
};
pub use signature::{is_signature_verification_enabled, verify_submission_signature};
