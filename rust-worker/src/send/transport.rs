//! The delivery capability every concrete transport implements.
//!
//! The drain loop only ever sees this one-method contract, so the
//! Mailgun-style HTTP submitter, a desktop mail client bridge, or a
//! test double are interchangeable.

use async_trait::async_trait;
use thiserror::Error;

use crate::job::OutgoingMessage;

/// Why a delivery attempt failed.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The attempt exceeded the configured per-attempt timeout.
    #[error("send attempt timed out after {0} ms")]
    Timeout(u64),

    /// The transport rejected the message outright (bad address,
    /// unreadable attachment, permanent endpoint refusal). Not retried.
    #[error("rejected: {0}")]
    Rejected(String),

    /// A transient fault (connectivity, 5xx, rate limit). Retried.
    #[error("transport unavailable: {0}")]
    Unavailable(String),
}

impl TransportError {
    /// Whether another attempt could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, TransportError::Rejected(_))
    }
}

/// A delivery mechanism. Implementations must be safe to share across
/// concurrently drained jobs.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Attempt to deliver one message. Exactly one delivery attempt per
    /// call; the retry policy lives in the executor, not here.
    async fn deliver(&self, message: &OutgoingMessage) -> Result<(), TransportError>;
}
