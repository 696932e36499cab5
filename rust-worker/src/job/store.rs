//! In-memory bulk job store with FIFO task claims.
//!
//! The store is the only shared mutable state in the delivery flow. It
//! is owned by the application layer and handed to whoever drains jobs;
//! there is no global registry. All claim and resolve operations happen
//! under one mutex so a task can never be claimed twice, regardless of
//! how many drain loops run concurrently.

use std::collections::HashMap;
use std::sync::Mutex;

use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::job::task::{ClaimedTask, OutgoingMessage, SendTask, TaskOutcome, TaskStatus};
use crate::queue::BulkRequest;
use crate::report::{self, JobSummary};
use crate::source::Recipient;
use crate::template::{render, Template};

/// Errors that reject a submission before any task is created.
#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("template has an empty subject and an empty body")]
    EmptyTemplate,
}

/// Job-level options carried alongside the recipient list.
#[derive(Debug, Clone, Default)]
pub struct SubmitOptions {
    /// High-importance flag applied to every message
    pub urgent: bool,
    /// Attachments added to every message
    pub shared_attachments: Vec<String>,
    /// Rows dropped at scan time, carried through for reporting
    pub skipped: usize,
}

/// One bulk job: an ordered task list plus job-level state.
#[derive(Debug)]
pub struct BulkJob {
    pub(crate) id: Uuid,
    pub(crate) template: Template,
    pub(crate) tasks: Vec<SendTask>,
    pub(crate) skipped: usize,
    pub(crate) cancelled: bool,
}

/// Thread-safe registry of live bulk jobs.
#[derive(Debug, Default)]
pub struct JobStore {
    jobs: Mutex<HashMap<Uuid, BulkJob>>,
}

impl JobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a job from a recipient list and a template.
    ///
    /// Renders the template once per recipient and creates tasks in the
    /// supplied order. The recipient list may be empty; the resulting
    /// job is simply complete from birth.
    pub fn submit(
        &self,
        recipients: Vec<Recipient>,
        template: Template,
        options: SubmitOptions,
    ) -> Result<Uuid, SubmitError> {
        if template.is_empty() {
            return Err(SubmitError::EmptyTemplate);
        }

        let job_id = Uuid::new_v4();
        let tasks = recipients
            .into_iter()
            .enumerate()
            .map(|(index, recipient)| {
                let rendered = render(&template, &recipient.variables);
                let mut attachments = options.shared_attachments.clone();
                attachments.extend(recipient.attachments.iter().cloned());
                let message = OutgoingMessage {
                    to: recipient.email.clone(),
                    cc: recipient.cc.clone(),
                    subject: rendered.subject,
                    body: rendered.body,
                    attachments,
                    urgent: options.urgent,
                };
                SendTask::new(index, recipient, message)
            })
            .collect::<Vec<_>>();

        info!(
            job_id = %job_id,
            template = %template.name,
            tasks = tasks.len(),
            skipped = options.skipped,
            "job_submitted"
        );

        let job = BulkJob {
            id: job_id,
            template,
            tasks,
            skipped: options.skipped,
            cancelled: false,
        };

        self.jobs.lock().expect("job store lock poisoned").insert(job_id, job);
        Ok(job_id)
    }

    /// Create a job straight from a normalized bulk request.
    pub fn submit_request(&self, request: BulkRequest) -> Result<Uuid, SubmitError> {
        self.submit(
            request.recipients,
            request.template,
            SubmitOptions {
                urgent: request.urgent,
                shared_attachments: request.shared_attachments,
                skipped: request.skipped,
            },
        )
    }

    /// Claim the next pending task of a job, FIFO.
    ///
    /// Returns `None` when the job is unknown, cancelled, or has no
    /// unclaimed task left. A returned task is owned by the caller and
    /// must be resolved exactly once.
    pub fn next_pending(&self, job_id: Uuid) -> Option<ClaimedTask> {
        let mut jobs = self.jobs.lock().expect("job store lock poisoned");
        let job = jobs.get_mut(&job_id)?;
        if job.cancelled {
            return None;
        }

        let task = job
            .tasks
            .iter_mut()
            .find(|task| task.status == TaskStatus::Pending && !task.claimed)?;
        task.claimed = true;

        Some(ClaimedTask {
            job_id,
            task_id: task.id,
            recipient_email: task.recipient.email.clone(),
            message: task.message.clone(),
        })
    }

    /// Record one delivery attempt against a task.
    pub fn note_attempt(&self, job_id: Uuid, task_id: usize) -> u32 {
        let mut jobs = self.jobs.lock().expect("job store lock poisoned");
        let Some(task) = jobs.get_mut(&job_id).and_then(|j| j.tasks.get_mut(task_id)) else {
            return 0;
        };
        task.attempt_count += 1;
        task.attempt_count
    }

    /// Resolve a claimed task. Transitions are monotonic: resolving an
    /// already-resolved task is ignored with a warning.
    pub fn resolve(&self, job_id: Uuid, task_id: usize, outcome: TaskOutcome) {
        let mut jobs = self.jobs.lock().expect("job store lock poisoned");
        let Some(task) = jobs.get_mut(&job_id).and_then(|j| j.tasks.get_mut(task_id)) else {
            warn!(job_id = %job_id, task_id = task_id, "resolve_unknown_task");
            return;
        };

        if task.is_resolved() {
            warn!(
                job_id = %job_id,
                task_id = task_id,
                status = ?task.status,
                "task_already_resolved"
            );
            return;
        }

        task.claimed = true;
        match outcome {
            TaskOutcome::Sent => {
                task.status = TaskStatus::Sent;
                task.error_reason = None;
            }
            TaskOutcome::Failed(reason) => {
                task.status = TaskStatus::Failed;
                task.error_reason = Some(reason);
            }
        }
    }

    /// Cancel a job: no further claims are handed out; tasks already
    /// claimed finish normally.
    pub fn cancel(&self, job_id: Uuid) -> bool {
        let mut jobs = self.jobs.lock().expect("job store lock poisoned");
        match jobs.get_mut(&job_id) {
            Some(job) if !job.cancelled => {
                job.cancelled = true;
                info!(job_id = %job_id, "job_cancelled");
                true
            }
            _ => false,
        }
    }

    /// Cancel every live job. Returns how many were newly cancelled.
    pub fn cancel_all(&self) -> usize {
        let mut jobs = self.jobs.lock().expect("job store lock poisoned");
        let mut count = 0;
        for job in jobs.values_mut() {
            if !job.cancelled {
                job.cancelled = true;
                count += 1;
            }
        }
        count
    }

    /// Summarize a job's current state. Callable at any time.
    pub fn summarize(&self, job_id: Uuid) -> Option<JobSummary> {
        let jobs = self.jobs.lock().expect("job store lock poisoned");
        jobs.get(&job_id).map(report::summarize)
    }

    /// Remove a finished job and return its final summary.
    pub fn finish(&self, job_id: Uuid) -> Option<JobSummary> {
        let mut jobs = self.jobs.lock().expect("job store lock poisoned");
        jobs.remove(&job_id).map(|job| report::summarize(&job))
    }

    /// Number of live jobs in the store.
    pub fn len(&self) -> usize {
        self.jobs.lock().expect("job store lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
