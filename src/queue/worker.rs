//! In-process job queue and worker pool
//!
//! At-least-once execution with id coalescing: while a keyed job is known to
//! the queue (pending, running, waiting for a retry, or kept after finishing)
//! a second enqueue with the same id is dropped. Retryable failures are
//! re-queued with exponential backoff up to `max_attempts`.

use async_trait::async_trait;
use rand::Rng;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify, watch};
use tokio::task::JoinHandle;

use super::job::{EnqueueOptions, EnqueueOutcome, HandlerOutcome, Job, JobContext};
use crate::error::{AppError, Result};
use crate::metrics::{JOBS_TOTAL, QUEUE_DEPTH};

/// Enqueue side of the queue, as seen by the engine.
#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn enqueue(&self, job: Job, options: EnqueueOptions) -> Result<EnqueueOutcome>;
}

/// Consumer side: one call per job execution.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: &Job, ctx: &JobContext) -> HandlerOutcome;
}

/// Retry policy applied to `HandlerOutcome::Retry`.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_backoff: Duration::from_secs(5),
            max_backoff: Duration::from_secs(3600),
        }
    }
}

impl RetryPolicy {
    /// Delay before attempt `attempt + 1`, doubling per attempt with jitter.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let pow = attempt.saturating_sub(1).min(20);
        let delay = self.base_backoff.saturating_mul(1u32 << pow);
        let delay = delay.min(self.max_backoff);
        let jitter_ms = rand::thread_rng().gen_range(0..1000);
        delay + Duration::from_millis(jitter_ms)
    }
}

/// A job as stored by the queue.
#[derive(Debug, Clone)]
pub struct QueuedJob {
    pub job_id: String,
    pub job: Job,
    pub options: EnqueueOptions,
    pub attempt: u32,
}

/// Terminal record of a job that exhausted its retries.
#[derive(Debug, Clone)]
pub struct FailedJob {
    pub job_id: String,
    pub job_type: &'static str,
    pub attempts: u32,
    pub error: String,
    /// Coalescing key held until the record is evicted
    key: Option<String>,
}

#[derive(Default)]
struct QueueState {
    pending: VecDeque<QueuedJob>,
    keys: HashSet<String>,
    failed: VecDeque<FailedJob>,
    closed: bool,
}

/// In-memory [`JobQueue`] with a Notify-driven worker pool.
pub struct MemoryJobQueue {
    state: Mutex<QueueState>,
    notify: Notify,
    policy: RetryPolicy,
    keep_failed: usize,
}

impl MemoryJobQueue {
    pub fn new(policy: RetryPolicy, keep_failed: usize) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
            policy,
            keep_failed,
        }
    }

    /// Snapshot of the waiting jobs in queue order.
    pub async fn pending_jobs(&self) -> Vec<QueuedJob> {
        self.state.lock().await.pending.iter().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.pending.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Jobs that ran out of attempts, most recent last.
    pub async fn failed_jobs(&self) -> Vec<FailedJob> {
        self.state.lock().await.failed.iter().cloned().collect()
    }

    /// Refuse new work and wake idle workers so they can exit.
    pub async fn close(&self) {
        self.state.lock().await.closed = true;
        self.notify.notify_waiters();
    }

    async fn pop(&self) -> Option<QueuedJob> {
        let mut state = self.state.lock().await;
        let next = state.pending.pop_front();
        QUEUE_DEPTH.set(state.pending.len() as i64);
        next
    }

    async fn push(&self, queued: QueuedJob) {
        let mut state = self.state.lock().await;
        state.pending.push_back(queued);
        QUEUE_DEPTH.set(state.pending.len() as i64);
        drop(state);
        self.notify.notify_one();
    }

    async fn release_key(&self, queued: &QueuedJob) {
        if let Some(key) = &queued.options.id {
            self.state.lock().await.keys.remove(key);
        }
    }

    /// Run the next pending job with `handler`.
    ///
    /// Returns `None` when nothing is pending.
    pub async fn process_next(self: &Arc<Self>, handler: &dyn JobHandler) -> Option<&'static str> {
        let queued = self.pop().await?;
        let job_type = queued.job.job_type();
        let ctx = JobContext::new(queued.job_id.clone(), queued.attempt);

        let outcome = handler.handle(&queued.job, &ctx).await;
        JOBS_TOTAL
            .with_label_values(&[job_type, outcome.as_str()])
            .inc();

        match outcome {
            HandlerOutcome::Applied | HandlerOutcome::Skipped(_) => {
                if queued.options.remove_on_complete {
                    self.release_key(&queued).await;
                }
            }
            HandlerOutcome::Retry(error) if queued.attempt < self.policy.max_attempts => {
                let delay = self.policy.backoff(queued.attempt);
                tracing::debug!(
                    job_id = %queued.job_id,
                    job_type,
                    attempt = queued.attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "Job failed, retrying"
                );
                let queue = Arc::clone(self);
                let mut retry = queued;
                retry.attempt += 1;
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    queue.push(retry).await;
                });
            }
            HandlerOutcome::Retry(error) => {
                tracing::warn!(
                    job_id = %queued.job_id,
                    job_type,
                    attempts = queued.attempt,
                    error = %error,
                    "Job failed permanently"
                );
                self.record_failure(&queued, &error).await;
                if queued.options.remove_on_fail {
                    self.release_key(&queued).await;
                }
            }
        }

        Some(job_type)
    }

    async fn record_failure(&self, queued: &QueuedJob, error: &AppError) {
        let mut state = self.state.lock().await;
        state.failed.push_back(FailedJob {
            job_id: queued.job_id.clone(),
            job_type: queued.job.job_type(),
            attempts: queued.attempt,
            error: error.to_string(),
            key: queued
                .options
                .id
                .clone()
                .filter(|_| !queued.options.remove_on_fail),
        });
        while state.failed.len() > self.keep_failed {
            if let Some(key) = state.failed.pop_front().and_then(|evicted| evicted.key) {
                state.keys.remove(&key);
            }
        }
    }

    /// Start `count` workers that run until `shutdown` flips to true or the
    /// queue is closed and drained.
    pub fn start_workers(
        self: &Arc<Self>,
        handler: Arc<dyn JobHandler>,
        count: usize,
        shutdown: watch::Receiver<bool>,
    ) -> Vec<JoinHandle<()>> {
        (0..count)
            .map(|worker| {
                let queue = Arc::clone(self);
                let handler = Arc::clone(&handler);
                let mut shutdown = shutdown.clone();
                tokio::spawn(async move {
                    tracing::debug!(worker, "Job worker started");
                    let tick = Duration::from_secs(2);
                    loop {
                        if *shutdown.borrow() {
                            break;
                        }
                        if queue.process_next(handler.as_ref()).await.is_some() {
                            continue;
                        }
                        if queue.state.lock().await.closed {
                            break;
                        }
                        tokio::select! {
                            _ = queue.notify.notified() => {}
                            _ = tokio::time::sleep(tick) => {}
                            changed = shutdown.changed() => {
                                if changed.is_err() {
                                    break;
                                }
                            }
                        }
                    }
                    tracing::debug!(worker, "Job worker stopped");
                })
            })
            .collect()
    }
}

#[async_trait]
impl JobQueue for MemoryJobQueue {
    async fn enqueue(&self, job: Job, options: EnqueueOptions) -> Result<EnqueueOutcome> {
        let mut state = self.state.lock().await;
        if state.closed {
            return Err(AppError::Queue("queue is closed".to_string()));
        }

        let job_id = match &options.id {
            Some(key) => {
                if !state.keys.insert(key.clone()) {
                    tracing::trace!(key = %key, job_type = job.job_type(), "Job coalesced");
                    return Ok(EnqueueOutcome::Coalesced);
                }
                format!("key:{}", key)
            }
            None => crate::data::new_id(),
        };

        state.pending.push_back(QueuedJob {
            job_id,
            job,
            options,
            attempt: 1,
        });
        QUEUE_DEPTH.set(state.pending.len() as i64);
        drop(state);

        self.notify.notify_one();
        Ok(EnqueueOutcome::Queued)
    }
}
