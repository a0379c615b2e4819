//! Job routing
//!
//! Binds the federation components to the queue's consumer side.

use async_trait::async_trait;
use std::sync::Arc;

use super::Federation;
use crate::queue::{HandlerOutcome, Job, JobContext, JobHandler};

/// [`JobHandler`] that runs every federation job variant.
pub struct FederationWorker {
    federation: Arc<Federation>,
}

impl FederationWorker {
    pub fn new(federation: Arc<Federation>) -> Self {
        Self { federation }
    }
}

#[async_trait]
impl JobHandler for FederationWorker {
    async fn handle(&self, job: &Job, ctx: &JobContext) -> HandlerOutcome {
        match job {
            Job::Inbound(inbound) => self.federation.inbox.dispatch(inbound).await,
            Job::RefreshActor(refresh) => self.federation.resolver.refresh_actor(refresh).await.into(),
            Job::SendPost(send) => self.federation.fanout.run(send, ctx).await.into(),
            Job::Deliver(deliver) => self.federation.delivery.deliver_one(deliver, ctx).await,
        }
    }
}
