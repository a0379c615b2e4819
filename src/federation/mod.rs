//! ActivityPub federation module
//!
//! Handles:
//! - Inbound activity dispatch (inbox)
//! - Remote actor resolution and background refresh
//! - Thread resolution for remote posts
//! - Post fan-out and per-inbox delivery (outbox)
//! - HTTP Signatures and RsaSignature2017 payload signatures

mod activity;
mod context;
pub mod delivery;
mod emoji;
mod fanout;
mod hosts;
mod inbox;
mod resolver;
mod signature;
mod thread;
pub mod transport;
mod worker;

use std::sync::Arc;

pub use activity::{
    AcceptedObject, Activity, ActivityKind, CreatedObject, DeleteTarget, EmojiTag, PUBLIC_COLLECTION,
    ParseError, PostKind, UndoTarget, UpdatedObject, self_deleted_actor,
};
pub use context::{FederationContext, ensure_local_actor, ensure_system_actors};
pub use delivery::{ActivityDelivery, builder};
pub use fanout::{DeliveryTargets, FanOut};
pub use hosts::HostRegistry;
pub use inbox::InboxDispatcher;
pub use resolver::{ActorResolver, ResolveOptions};
pub use signature::{
    LdSignature, PayloadSigner, RsaSignature2017, extract_signature_key_id, generate_digest,
    generate_keypair, key_id_matches_actor, parse_signature_header, sign_request, verify_signature,
};
pub use thread::{RemoteThreadResolver, ThreadResolver};
pub use transport::{HttpTransport, SigningIdentity, Transport};
pub use worker::FederationWorker;

use crate::data::{CacheStore, Store};
use crate::queue::JobQueue;
use crate::service::{ActorRemoval, FollowService};

/// Every federation component, wired to one store, cache, queue and
/// transport.
pub struct Federation {
    pub ctx: Arc<FederationContext>,
    pub hosts: HostRegistry,
    pub resolver: ActorResolver,
    pub threads: Arc<dyn ThreadResolver>,
    pub delivery: ActivityDelivery,
    pub fanout: FanOut,
    pub follows: FollowService,
    pub removal: ActorRemoval,
    pub inbox: InboxDispatcher,
}

impl Federation {
    pub fn new(
        ctx: Arc<FederationContext>,
        store: Arc<dyn Store>,
        cache: Arc<dyn CacheStore>,
        queue: Arc<dyn JobQueue>,
        transport: Arc<dyn Transport>,
        signer: Arc<dyn PayloadSigner>,
    ) -> Self {
        let hosts = HostRegistry::new(store.clone(), cache.clone(), ctx.cache_ttl);
        let resolver = ActorResolver::new(
            ctx.clone(),
            store.clone(),
            cache.clone(),
            hosts.clone(),
            transport.clone(),
            queue.clone(),
        );
        let threads: Arc<dyn ThreadResolver> = Arc::new(RemoteThreadResolver::new(
            ctx.clone(),
            store.clone(),
            resolver.clone(),
            transport.clone(),
        ));
        let delivery = ActivityDelivery::new(ctx.clone(), store.clone(), queue.clone(), transport);
        let fanout = FanOut::new(ctx.clone(), store.clone(), queue, signer);
        let follows = FollowService::new(ctx.clone(), store.clone(), cache.clone(), delivery.clone());
        let removal = ActorRemoval::new(ctx.clone(), store.clone(), cache.clone());
        let inbox = InboxDispatcher::new(
            ctx.clone(),
            store,
            cache,
            hosts.clone(),
            resolver.clone(),
            threads.clone(),
            delivery.clone(),
            follows.clone(),
            removal.clone(),
        );

        Self {
            ctx,
            hosts,
            resolver,
            threads,
            delivery,
            fanout,
            follows,
            removal,
            inbox,
        }
    }
}
