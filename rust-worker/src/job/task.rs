//! Send task types: one unit of work per recipient.

use serde::{Deserialize, Serialize};

use crate::source::Recipient;

/// Task status. Transitions are monotonic: once a task leaves
/// `Pending` it never returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Sent,
    Failed,
}

/// A fully addressed, fully rendered message ready for a transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutgoingMessage {
    /// Primary destination address
    pub to: String,
    /// Carbon-copy addresses
    #[serde(default)]
    pub cc: Vec<String>,
    /// Rendered subject line
    pub subject: String,
    /// Rendered body text
    pub body: String,
    /// Attachment file paths (shared attachments first, then matched)
    #[serde(default)]
    pub attachments: Vec<String>,
    /// High-importance flag
    #[serde(default)]
    pub urgent: bool,
}

/// One unit of work pairing a recipient with its rendered message.
#[derive(Debug, Clone)]
pub struct SendTask {
    /// Position of the task within its job; doubles as the task id
    pub id: usize,
    /// The recipient this task delivers to
    pub recipient: Recipient,
    /// The message to deliver
    pub message: OutgoingMessage,
    /// Current status
    pub status: TaskStatus,
    /// Whether a drain loop currently owns this task
    pub claimed: bool,
    /// Delivery attempts made so far
    pub attempt_count: u32,
    /// Failure reason, populated only when status is Failed
    pub error_reason: Option<String>,
}

impl SendTask {
    pub fn new(id: usize, recipient: Recipient, message: OutgoingMessage) -> Self {
        Self {
            id,
            recipient,
            message,
            status: TaskStatus::Pending,
            claimed: false,
            attempt_count: 0,
            error_reason: None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.status != TaskStatus::Pending
    }
}

/// Final result of executing one task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Sent,
    Failed(String),
}

/// A task handed to a drain loop. Owns copies of the delivery data so
/// the store lock is never held across a send.
#[derive(Debug, Clone)]
pub struct ClaimedTask {
    pub job_id: uuid::Uuid,
    pub task_id: usize,
    pub recipient_email: String,
    pub message: OutgoingMessage,
}
