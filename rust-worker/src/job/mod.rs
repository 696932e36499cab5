//! Bulk job queue: tasks, the job store, and claim/resolve semantics.
//!
//! ## Lifecycle
//!
//! ```text
//! submit → next_pending (claim) → resolve (sent | failed) → summarize → finish
//! ```
//!
//! A job owns its tasks exclusively; drain loops only ever hold cloned
//! [`task::ClaimedTask`] copies of the delivery data.

pub mod store;
pub mod task;

pub use store::{BulkJob, JobStore, SubmitError, SubmitOptions};
pub use task::{ClaimedTask, OutgoingMessage, SendTask, TaskOutcome, TaskStatus};
