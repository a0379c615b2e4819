//! Asynchronous execution substrate
//!
//! Inbound activities, actor refreshes, fan-outs and per-inbox deliveries
//! all run as jobs on one worker pool.

mod job;
mod worker;

pub use job::{
    ActorRefreshJob, DeliveryBatch, EnqueueOptions, EnqueueOutcome, HandlerOutcome,
    InboundActivityJob, Job, JobContext, OutboundDeliveryJob, SendPostJob, SkipReason,
};
pub use worker::{FailedJob, JobHandler, JobQueue, MemoryJobQueue, QueuedJob, RetryPolicy};
