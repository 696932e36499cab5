//! Send executor: drains a job's tasks through a transport.
//!
//! The drain is a single-threaded cooperative loop per job: claim the
//! next task, attempt delivery with bounded retries, resolve, repeat.
//! The dominant cost is the transport round-trip, so multiple jobs are
//! parallelized by spawning one drain per job, never by racing on one
//! job's tasks (the store's claim mutex keeps that safe anyway).

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::time::{sleep, timeout};
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::job::{ClaimedTask, JobStore, TaskOutcome};
use crate::report::JobSummary;
use crate::send::transport::{Transport, TransportError};

/// Retry and timeout policy for delivery attempts.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Attempts per task, first try included
    pub max_attempts: u32,
    /// Base delay for the exponential backoff
    pub base_delay: Duration,
    /// Cap for a single backoff delay, before jitter
    pub max_delay: Duration,
    /// Budget for one delivery attempt
    pub attempt_timeout: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_attempts: config.max_send_attempts.max(1),
            base_delay: Duration::from_millis(config.retry_base_delay_ms),
            max_delay: Duration::from_millis(config.retry_max_delay_ms),
            attempt_timeout: Duration::from_millis(config.send_timeout_ms),
        }
    }

    /// Delay before the attempt after `failed_attempt` (1-based):
    /// exponential, capped, with up to 50% random jitter on top.
    fn backoff_delay(&self, failed_attempt: u32) -> Duration {
        let exponential = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(failed_attempt.saturating_sub(1)));
        let capped = exponential.min(self.max_delay);

        // ThreadRng is not Send, keep it out of await scope.
        let jitter_ms = {
            let mut rng = rand::thread_rng();
            rng.gen_range(0..=(capped.as_millis() as u64) / 2)
        };

        capped + Duration::from_millis(jitter_ms)
    }
}

/// Drains bulk jobs through an injected transport.
pub struct SendExecutor {
    transport: Arc<dyn Transport>,
    policy: RetryPolicy,
}

impl SendExecutor {
    pub fn new(transport: Arc<dyn Transport>, policy: RetryPolicy) -> Self {
        Self { transport, policy }
    }

    /// Drain a job to completion or cancellation, archive it, and
    /// return the final summary.
    ///
    /// Task-level failures never abort the drain; each is recorded and
    /// the loop moves on. Returns `None` only for an unknown job id.
    pub async fn drain(&self, store: &JobStore, job_id: Uuid) -> Option<JobSummary> {
        info!(job_id = %job_id, "job_drain_start");

        while let Some(claim) = store.next_pending(job_id) {
            let outcome = self.send_with_retry(store, &claim).await;
            match &outcome {
                TaskOutcome::Sent => {
                    info!(
                        job_id = %job_id,
                        task_id = claim.task_id,
                        to = %claim.recipient_email,
                        "send_task_sent"
                    );
                }
                TaskOutcome::Failed(reason) => {
                    warn!(
                        job_id = %job_id,
                        task_id = claim.task_id,
                        to = %claim.recipient_email,
                        reason = %reason,
                        "send_task_failed"
                    );
                }
            }
            store.resolve(job_id, claim.task_id, outcome);
        }

        let summary = store.finish(job_id);
        if let Some(s) = &summary {
            info!(
                job_id = %job_id,
                total = s.total,
                sent = s.sent,
                failed = s.failed,
                cancelled = s.cancelled,
                skipped = s.skipped,
                "job_drain_complete"
            );
        }
        summary
    }

    /// Attempt one task, retrying transient failures up to the policy
    /// maximum. Exactly one delivery attempt per iteration.
    async fn send_with_retry(&self, store: &JobStore, claim: &ClaimedTask) -> TaskOutcome {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let recorded = store.note_attempt(claim.job_id, claim.task_id);

            info!(
                job_id = %claim.job_id,
                task_id = claim.task_id,
                to = %claim.recipient_email,
                attempt = recorded,
                "send_attempt_start"
            );

            let result = timeout(
                self.policy.attempt_timeout,
                self.transport.deliver(&claim.message),
            )
            .await;

            let error = match result {
                Ok(Ok(())) => return TaskOutcome::Sent,
                Ok(Err(e)) => e,
                Err(_) => {
                    TransportError::Timeout(self.policy.attempt_timeout.as_millis() as u64)
                }
            };

            warn!(
                job_id = %claim.job_id,
                task_id = claim.task_id,
                attempt = recorded,
                retryable = error.is_retryable(),
                error = %error,
                "send_attempt_failed"
            );

            if attempt >= self.policy.max_attempts || !error.is_retryable() {
                return TaskOutcome::Failed(error.to_string());
            }

            sleep(self.policy.backoff_delay(attempt)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{BTreeMap, VecDeque};
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use crate::job::{OutgoingMessage, SubmitOptions};
    use crate::source::Recipient;
    use crate::template::Template;

    /// Transport that replays a scripted sequence of outcomes.
    struct ScriptedTransport {
        script: tokio::sync::Mutex<VecDeque<Result<(), TransportError>>>,
        calls: AtomicUsize,
    }

    impl ScriptedTransport {
        fn new(script: Vec<Result<(), TransportError>>) -> Self {
            Self {
                script: tokio::sync::Mutex::new(script.into()),
                calls: AtomicUsize::new(0),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn deliver(&self, _message: &OutgoingMessage) -> Result<(), TransportError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.script.lock().await.pop_front().unwrap_or(Ok(()))
        }
    }

    /// Transport that never answers within any sane timeout.
    struct StuckTransport;

    #[async_trait]
    impl Transport for StuckTransport {
        async fn deliver(&self, _message: &OutgoingMessage) -> Result<(), TransportError> {
            sleep(Duration::from_secs(3600)).await;
            Ok(())
        }
    }

    fn recipient(email: &str) -> Recipient {
        Recipient {
            email: email.to_string(),
            cc: Vec::new(),
            display_name: email.to_string(),
            variables: BTreeMap::new(),
            attachments: Vec::new(),
        }
    }

    fn submit_two(store: &JobStore) -> Uuid {
        store
            .submit(
                vec![recipient("a@x.com"), recipient("b@x.com")],
                Template::new("t", "Subject", "Body"),
                SubmitOptions::default(),
            )
            .unwrap()
    }

    fn test_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(50),
            attempt_timeout: Duration::from_millis(200),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_sends_everything() {
        let store = JobStore::new();
        let job_id = submit_two(&store);
        let transport = Arc::new(ScriptedTransport::new(vec![Ok(()), Ok(())]));
        let executor = SendExecutor::new(transport.clone(), test_policy());

        let summary = executor.drain(&store, job_id).await.unwrap();

        assert_eq!(summary.sent, 2);
        assert_eq!(summary.failed, 0);
        assert!(summary.is_complete());
        assert_eq!(transport.calls(), 2);
        // The job is archived once drained.
        assert!(store.summarize(job_id).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failure_is_retried_then_succeeds() {
        let store = JobStore::new();
        let job_id = store
            .submit(
                vec![recipient("a@x.com")],
                Template::new("t", "Subject", "Body"),
                SubmitOptions::default(),
            )
            .unwrap();
        let transport = Arc::new(ScriptedTransport::new(vec![
            Err(TransportError::Unavailable("502".to_string())),
            Ok(()),
        ]));
        let executor = SendExecutor::new(transport.clone(), test_policy());

        let summary = executor.drain(&store, job_id).await.unwrap();

        assert_eq!(summary.sent, 1);
        assert_eq!(transport.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_rejection_is_not_retried() {
        let store = JobStore::new();
        let job_id = store
            .submit(
                vec![recipient("a@x.com")],
                Template::new("t", "Subject", "Body"),
                SubmitOptions::default(),
            )
            .unwrap();
        let transport = Arc::new(ScriptedTransport::new(vec![Err(TransportError::Rejected(
            "no such mailbox".to_string(),
        ))]));
        let executor = SendExecutor::new(transport.clone(), test_policy());

        let summary = executor.drain(&store, job_id).await.unwrap();

        assert_eq!(summary.failed, 1);
        assert_eq!(transport.calls(), 1);
        assert!(summary.failures[0].reason.contains("no such mailbox"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_stop_at_the_configured_maximum() {
        let store = JobStore::new();
        let job_id = submit_two(&store);
        let transport = Arc::new(ScriptedTransport::new(vec![
            Err(TransportError::Unavailable("down".to_string()));
            6
        ]));
        let executor = SendExecutor::new(transport.clone(), test_policy());

        let summary = executor.drain(&store, job_id).await.unwrap();

        assert_eq!(summary.sent, 0);
        assert_eq!(summary.failed, 2);
        assert_eq!(summary.failures.len(), 2);
        // Three attempts per task, never more.
        assert_eq!(transport.calls(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_transport_times_out_and_fails() {
        let store = JobStore::new();
        let job_id = submit_two(&store);
        let executor = SendExecutor::new(Arc::new(StuckTransport), test_policy());

        let summary = executor.drain(&store, job_id).await.unwrap();

        assert_eq!(summary.sent, 0);
        assert_eq!(summary.failed, 2);
        assert!(summary
            .failures
            .iter()
            .all(|f| f.reason.contains("timed out")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_job_claims_nothing() {
        let store = JobStore::new();
        let job_id = submit_two(&store);
        store.cancel(job_id);
        let transport = Arc::new(ScriptedTransport::new(Vec::new()));
        let executor = SendExecutor::new(transport.clone(), test_policy());

        let summary = executor.drain(&store, job_id).await.unwrap();

        assert_eq!(summary.sent, 0);
        assert_eq!(summary.cancelled, 2);
        assert_eq!(transport.calls(), 0);
        assert!(summary.is_complete());
    }

    #[test]
    fn test_backoff_delay_is_capped() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(400),
            attempt_timeout: Duration::from_secs(1),
        };

        for attempt in 1..=8 {
            let delay = policy.backoff_delay(attempt);
            // Cap plus at most 50% jitter.
            assert!(delay <= Duration::from_millis(600));
        }
        assert!(policy.backoff_delay(1) >= Duration::from_millis(100));
    }
}
