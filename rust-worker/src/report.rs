//! Job summaries: per-task outcomes folded into one reportable value.
//!
//! A summary can be produced at any point in a job's life, not just at
//! the end, and is always well-formed even for a job where every send
//! failed. The enclosing application decides how to display it.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::job::store::BulkJob;
use crate::job::task::TaskStatus;

/// Aggregated view of one bulk job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSummary {
    pub job_id: Uuid,
    /// Name of the template the job was built from
    pub template: String,
    /// Tasks created for the job
    pub total: usize,
    pub sent: usize,
    pub failed: usize,
    /// Unresolved tasks (includes claimed tasks still in flight)
    pub pending: usize,
    /// Tasks abandoned by cancellation before they were claimed
    pub cancelled: usize,
    /// Rows dropped at scan time for lacking a usable address
    pub skipped: usize,
    /// One entry per failed task, in task order
    pub failures: Vec<TaskFailure>,
}

/// A failed delivery and its human-readable reason.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskFailure {
    pub recipient: String,
    pub reason: String,
}

impl JobSummary {
    /// True once every task is accounted for: nothing pending.
    pub fn is_complete(&self) -> bool {
        self.sent + self.failed + self.cancelled == self.total
    }
}

/// Fold a job's current task states into a summary.
///
/// Deterministic for a given job state. Unclaimed pending tasks of a
/// cancelled job count as cancelled; claimed ones stay pending until
/// their in-flight send resolves.
pub fn summarize(job: &BulkJob) -> JobSummary {
    let mut summary = JobSummary {
        job_id: job.id,
        template: job.template.name.clone(),
        total: job.tasks.len(),
        sent: 0,
        failed: 0,
        pending: 0,
        cancelled: 0,
        skipped: job.skipped,
        failures: Vec::new(),
    };

    for task in &job.tasks {
        match task.status {
            TaskStatus::Sent => summary.sent += 1,
            TaskStatus::Failed => {
                summary.failed += 1;
                summary.failures.push(TaskFailure {
                    recipient: task.recipient.email.clone(),
                    reason: task
                        .error_reason
                        .clone()
                        .unwrap_or_else(|| "unknown".to_string()),
                });
            }
            TaskStatus::Pending => {
                if job.cancelled && !task.claimed {
                    summary.cancelled += 1;
                } else {
                    summary.pending += 1;
                }
            }
        }
    }

    summary
}
