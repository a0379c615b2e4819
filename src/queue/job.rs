//! Job domain types for work items in the queue.

use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

use crate::error::AppError;

/// A unit of work handed to the worker pool by value.
#[derive(Debug, Clone)]
pub enum Job {
    /// Activity received at an inbox
    Inbound(InboundActivityJob),
    /// Re-fetch a cached remote actor
    RefreshActor(ActorRefreshJob),
    /// Compute targets for a local post and enqueue deliveries
    SendPost(SendPostJob),
    /// POST one serialized payload to one inbox
    Deliver(OutboundDeliveryJob),
}

impl Job {
    /// Label used for logs and metrics.
    pub fn job_type(&self) -> &'static str {
        match self {
            Job::Inbound(_) => "inbound_activity",
            Job::RefreshActor(_) => "refresh_actor",
            Job::SendPost(_) => "send_post",
            Job::Deliver(_) => "deliver",
        }
    }
}

#[derive(Debug, Clone)]
pub struct InboundActivityJob {
    /// Activity envelope as received
    pub activity: Value,
    /// Local actor on whose behalf the request was verified
    pub petition_by: String,
}

#[derive(Debug, Clone)]
pub struct ActorRefreshJob {
    pub actor_url: String,
    /// Local actor whose key signs the fetch
    pub asking_actor_id: String,
}

#[derive(Debug, Clone)]
pub struct SendPostJob {
    pub post_id: String,
}

#[derive(Debug, Clone)]
pub struct OutboundDeliveryJob {
    pub inbox: String,
    /// Serialized, already signed payload shared by every target
    pub body: Arc<str>,
    /// Local actor whose key signs the HTTP request
    pub signer_id: String,
    /// Shared progress of the fan-out this delivery belongs to
    pub batch: Option<Arc<DeliveryBatch>>,
}

/// Advisory progress of one fan-out.
#[derive(Debug)]
pub struct DeliveryBatch {
    pub post_id: String,
    pub total: usize,
    delivered: AtomicUsize,
}

impl DeliveryBatch {
    pub fn new(post_id: impl Into<String>, total: usize) -> Self {
        Self {
            post_id: post_id.into(),
            total,
            delivered: AtomicUsize::new(0),
        }
    }

    /// Count one successful target and return the delivered fraction.
    pub fn record_delivered(&self) -> f32 {
        let delivered = self.delivered.fetch_add(1, Ordering::Relaxed) + 1;
        self.fraction_of(delivered)
    }

    pub fn progress(&self) -> f32 {
        self.fraction_of(self.delivered.load(Ordering::Relaxed))
    }

    fn fraction_of(&self, delivered: usize) -> f32 {
        if self.total == 0 {
            return 1.0;
        }
        delivered.min(self.total) as f32 / self.total as f32
    }
}

// =============================================================================
// Enqueue options
// =============================================================================

/// Per-job queue behaviour chosen by the caller.
#[derive(Debug, Clone, Default)]
pub struct EnqueueOptions {
    /// Coalescing key: a second enqueue with the same id is dropped while
    /// the first one is still known to the queue
    pub id: Option<String>,
    /// Forget the key once the job completes
    pub remove_on_complete: bool,
    /// Forget the key once the job fails for good
    pub remove_on_fail: bool,
}

impl EnqueueOptions {
    /// Coalesce on `id` and release the key whatever the result.
    pub fn keyed(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            remove_on_complete: true,
            remove_on_fail: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Queued,
    /// A job with the same id was already queued or running
    Coalesced,
}

// =============================================================================
// Handler results
// =============================================================================

/// Why a job finished without mutating anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Acting actor resolved to the deleted-actor sentinel
    ActorUnreachable,
    ActorBanned,
    HostBlocked,
    /// The local recipient blocked the actor or its host
    BlockedByRecipient,
    /// Activity or object type the engine does not handle
    Unsupported,
    /// Required field missing or of the wrong shape
    Malformed,
    /// Remote document could not be fetched
    FetchFailed,
    /// Referenced record does not exist
    TargetMissing,
    /// Acting actor does not own the referenced record
    NotOwner,
    /// Refused to break thread integrity
    IntegrityViolation,
    /// Nothing left to do, e.g. a fan-out without targets
    NothingToDo,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::ActorUnreachable => "actor_unreachable",
            SkipReason::ActorBanned => "actor_banned",
            SkipReason::HostBlocked => "host_blocked",
            SkipReason::BlockedByRecipient => "blocked_by_recipient",
            SkipReason::Unsupported => "unsupported",
            SkipReason::Malformed => "malformed",
            SkipReason::FetchFailed => "fetch_failed",
            SkipReason::TargetMissing => "target_missing",
            SkipReason::NotOwner => "not_owner",
            SkipReason::IntegrityViolation => "integrity_violation",
            SkipReason::NothingToDo => "nothing_to_do",
        }
    }
}

/// Per-branch result of a job handler.
#[derive(Debug)]
pub enum HandlerOutcome {
    Applied,
    Skipped(SkipReason),
    /// Transient failure; the queue applies its retry policy
    Retry(AppError),
}

impl HandlerOutcome {
    /// Classify an error from a branch: infrastructure failures are retried,
    /// anything else ends the job.
    pub fn from_error(error: AppError) -> Self {
        if error.is_retryable() {
            HandlerOutcome::Retry(error)
        } else {
            tracing::debug!(error = %error, "Job abandoned");
            HandlerOutcome::Skipped(SkipReason::FetchFailed)
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HandlerOutcome::Applied => "applied",
            HandlerOutcome::Skipped(_) => "skipped",
            HandlerOutcome::Retry(_) => "retry",
        }
    }
}

impl From<crate::error::Result<HandlerOutcome>> for HandlerOutcome {
    fn from(result: crate::error::Result<HandlerOutcome>) -> Self {
        result.unwrap_or_else(HandlerOutcome::from_error)
    }
}

// =============================================================================
// Job context
// =============================================================================

/// Handed to the handler alongside the job.
#[derive(Debug, Clone)]
pub struct JobContext {
    pub job_id: String,
    /// 1 on the first run
    pub attempt: u32,
    progress: Arc<AtomicU32>,
}

impl JobContext {
    pub fn new(job_id: impl Into<String>, attempt: u32) -> Self {
        Self {
            job_id: job_id.into(),
            attempt,
            progress: Arc::new(AtomicU32::new(0f32.to_bits())),
        }
    }

    /// Report progress as a fraction in `[0, 1]`.
    pub fn update(&self, fraction: f32) {
        let clamped = fraction.clamp(0.0, 1.0);
        self.progress.store(clamped.to_bits(), Ordering::Relaxed);
        tracing::trace!(job_id = %self.job_id, progress = clamped, "Job progress");
    }

    pub fn progress(&self) -> f32 {
        f32::from_bits(self.progress.load(Ordering::Relaxed))
    }
}
