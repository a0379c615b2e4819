//! Outbound fan-out
//!
//! `deliver` only queues a `SendPost` job. The job computes the target set,
//! serializes and signs the payload once, and queues one `Deliver` job per
//! inbox so an unreachable target never holds up the others.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use super::context::FederationContext;
use super::delivery::builder::{PostDocument, post_to_jsonld};
use super::signature::PayloadSigner;
use crate::data::{Actor, FederatedHost, Post, Store, Visibility};
use crate::error::{AppError, Result};
use crate::metrics::FANOUT_TARGETS;
use crate::queue::{
    DeliveryBatch, EnqueueOptions, EnqueueOutcome, HandlerOutcome, Job, JobContext, JobQueue,
    OutboundDeliveryJob, SendPostJob, SkipReason,
};

/// Inboxes a post goes to. Each host with a shared inbox appears once;
/// hosts without one are expanded to their actors' inboxes.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DeliveryTargets {
    inboxes: Vec<String>,
    seen: HashSet<String>,
    covered_hosts: HashSet<String>,
}

impl DeliveryTargets {
    fn add_shared(&mut self, host: &FederatedHost) {
        if let Some(inbox) = &host.public_inbox {
            if self.covered_hosts.insert(host.id.clone()) {
                self.push(inbox);
            }
        }
    }

    fn add_actor(&mut self, host: &FederatedHost, actor: &Actor) {
        if host.public_inbox.is_some() {
            self.add_shared(host);
            return;
        }
        if let Some(inbox) = actor.remote().and_then(|origin| origin.inbox.as_deref()) {
            self.push(inbox);
        }
    }

    /// Mentions go to the actor's own inbox unless the host's shared inbox
    /// is already a target.
    fn add_mention(&mut self, host: &FederatedHost, actor: &Actor) {
        if self.covered_hosts.contains(&host.id) {
            return;
        }
        if let Some(inbox) = actor.remote().and_then(|origin| origin.inbox.as_deref()) {
            self.push(inbox);
        }
    }

    fn push(&mut self, inbox: &str) {
        if self.seen.insert(inbox.to_string()) {
            self.inboxes.push(inbox.to_string());
        }
    }

    pub fn inboxes(&self) -> &[String] {
        &self.inboxes
    }

    pub fn len(&self) -> usize {
        self.inboxes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inboxes.is_empty()
    }
}

#[derive(Clone)]
pub struct FanOut {
    ctx: Arc<FederationContext>,
    store: Arc<dyn Store>,
    queue: Arc<dyn JobQueue>,
    signer: Arc<dyn PayloadSigner>,
}

impl FanOut {
    pub fn new(
        ctx: Arc<FederationContext>,
        store: Arc<dyn Store>,
        queue: Arc<dyn JobQueue>,
        signer: Arc<dyn PayloadSigner>,
    ) -> Self {
        Self {
            ctx,
            store,
            queue,
            signer,
        }
    }

    /// Queue the fan-out of a local post. Repeated calls for the same post
    /// collapse while the first job is pending.
    pub async fn deliver(&self, post: &Post) -> Result<EnqueueOutcome> {
        self.queue
            .enqueue(
                Job::SendPost(SendPostJob {
                    post_id: post.id.clone(),
                }),
                EnqueueOptions::keyed(post.id.clone()),
            )
            .await
    }

    /// Audience of `post` by visibility, plus remote mentions.
    pub async fn compute_targets(&self, post: &Post) -> Result<DeliveryTargets> {
        let mut targets = DeliveryTargets::default();
        let hosts: HashMap<String, FederatedHost> = self
            .store
            .list_hosts()
            .await?
            .into_iter()
            .filter(|host| !host.blocked)
            .map(|host| (host.id.clone(), host))
            .collect();

        match post.visibility {
            Visibility::Direct => return Ok(targets),
            Visibility::FollowersOnly => {
                let follower_ids: Vec<String> = self
                    .store
                    .list_followers(&post.user_id)
                    .await?
                    .into_iter()
                    .filter(|follow| follow.accepted)
                    .map(|follow| follow.follower_id)
                    .collect();
                for follower in self.store.get_actors(&follower_ids).await? {
                    self.add_remote_actor(&mut targets, &hosts, &follower);
                }
            }
            Visibility::Public => {
                let mut ids: Vec<&String> = hosts.keys().collect();
                ids.sort();
                for id in ids {
                    let host = &hosts[id];
                    if host.public_inbox.is_some() {
                        targets.add_shared(host);
                        continue;
                    }
                    for actor in self.store.list_remote_actors_on_host(&host.id).await? {
                        if !actor.banned {
                            targets.add_actor(host, &actor);
                        }
                    }
                }
            }
        }

        for mentioned in self.store.get_actors(&post.mentioned_user_ids).await? {
            if mentioned.banned {
                continue;
            }
            if let Some(host) = mentioned.host_id().and_then(|id| hosts.get(id)) {
                targets.add_mention(host, &mentioned);
            }
        }

        Ok(targets)
    }

    fn add_remote_actor(
        &self,
        targets: &mut DeliveryTargets,
        hosts: &HashMap<String, FederatedHost>,
        actor: &Actor,
    ) {
        if actor.banned {
            return;
        }
        if let Some(host) = actor.host_id().and_then(|id| hosts.get(id)) {
            targets.add_actor(host, actor);
        }
    }

    /// Handle a `SendPost` job.
    pub async fn run(&self, job: &SendPostJob, ctx: &JobContext) -> Result<HandlerOutcome> {
        let Some(post) = self.store.get_post(&job.post_id).await? else {
            return Ok(HandlerOutcome::Skipped(SkipReason::TargetMissing));
        };
        let Some(author) = self.store.get_actor(&post.user_id).await? else {
            return Ok(HandlerOutcome::Skipped(SkipReason::TargetMissing));
        };
        let Some(private_key_pem) = author.private_key_pem() else {
            tracing::warn!(post_id = %post.id, "Refusing to fan out a remote actor's post");
            return Ok(HandlerOutcome::Skipped(SkipReason::NotOwner));
        };

        let targets = self.compute_targets(&post).await?;
        FANOUT_TARGETS.set(targets.len() as i64);
        if targets.is_empty() {
            ctx.update(1.0);
            return Ok(HandlerOutcome::Skipped(SkipReason::NothingToDo));
        }

        let mut payload = self.build_payload(&post, &author).await?;
        let signature = self
            .signer
            .sign(
                &payload,
                private_key_pem,
                &self.ctx.actor_url(&author),
                &self.ctx.domain,
                post.created_at,
            )
            .await?;
        payload["signature"] =
            serde_json::to_value(&signature).map_err(|e| AppError::Internal(e.into()))?;
        let body: Arc<str> = serde_json::to_string(&payload)
            .map_err(|e| AppError::Internal(e.into()))?
            .into();

        let batch = Arc::new(DeliveryBatch::new(post.id.clone(), targets.len()));
        for inbox in targets.inboxes() {
            let delivery = Job::Deliver(OutboundDeliveryJob {
                inbox: inbox.clone(),
                body: Arc::clone(&body),
                signer_id: author.id.clone(),
                batch: Some(Arc::clone(&batch)),
            });
            if let Err(error) = self.queue.enqueue(delivery, EnqueueOptions::default()).await {
                tracing::warn!(inbox = %inbox, post_id = %post.id, error = %error, "Failed to queue delivery");
            }
        }

        tracing::info!(post_id = %post.id, targets = targets.len(), "Fan-out queued");
        Ok(HandlerOutcome::Applied)
    }

    async fn build_payload(&self, post: &Post, author: &Actor) -> Result<serde_json::Value> {
        let parent_url = match &post.parent_id {
            Some(parent_id) => self.store.get_post(parent_id).await?.map(|parent| {
                parent
                    .remote_post_id
                    .clone()
                    .unwrap_or_else(|| self.ctx.local_post_url(&parent.id))
            }),
            None => None,
        };
        let mentions = self.store.get_actors(&post.mentioned_user_ids).await?;
        let mut media = Vec::with_capacity(post.media_ids.len());
        for id in &post.media_ids {
            if let Some(item) = self.store.get_media(id).await? {
                media.push(item);
            }
        }

        Ok(post_to_jsonld(
            &self.ctx,
            &PostDocument {
                post,
                author,
                parent_url,
                mentions: &mentions,
                media: &media,
            },
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{Follow, MemoryStore, new_id};
    use crate::federation::signature::{LdSignature, MockPayloadSigner};
    use crate::queue::{MemoryJobQueue, RetryPolicy};
    use crate::testing::{local_actor, remote_actor, remote_host, test_context};
    use chrono::Utc;

    struct Fixture {
        fanout: FanOut,
        store: Arc<MemoryStore>,
        queue: Arc<MemoryJobQueue>,
        bob: Actor,
    }

    async fn fixture(signer: MockPayloadSigner) -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let queue = Arc::new(MemoryJobQueue::new(RetryPolicy::default(), 10));
        let fanout = FanOut::new(
            Arc::new(test_context()),
            store.clone(),
            queue.clone(),
            Arc::new(signer),
        );
        let bob = store.insert_actor(local_actor("bob")).await.unwrap();
        Fixture {
            fanout,
            store,
            queue,
            bob,
        }
    }

    async fn follow(store: &MemoryStore, follower: &Actor, followed: &Actor, accepted: bool) {
        store
            .insert_follow(Follow {
                id: new_id(),
                follower_id: follower.id.clone(),
                followed_id: followed.id.clone(),
                accepted,
                remote_follow_id: None,
                created_at: Utc::now(),
            })
            .await
            .unwrap();
    }

    fn fake_signature() -> LdSignature {
        LdSignature {
            kind: "RsaSignature2017".to_string(),
            creator: "https://local.example/fediverse/blog/bob".to_string(),
            domain: "local.example".to_string(),
            created: "2024-01-01T00:00:00.000Z".to_string(),
            signature_value: "c2ln".to_string(),
        }
    }

    #[tokio::test]
    async fn test_direct_posts_have_no_targets() {
        let f = fixture(MockPayloadSigner::new()).await;
        let host = f
            .store
            .insert_host(remote_host("remote.example", Some("https://remote.example/inbox")))
            .await
            .unwrap();
        let alice = f
            .store
            .insert_actor(remote_actor("https://remote.example/users/alice", &host))
            .await
            .unwrap();

        let mut post = Post::new(f.bob.id.clone(), "secret");
        post.visibility = Visibility::Direct;
        post.mentioned_user_ids.push(alice.id.clone());

        assert!(f.fanout.compute_targets(&post).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_public_targets_each_open_host_once() {
        let f = fixture(MockPayloadSigner::new()).await;
        let shared = f
            .store
            .insert_host(remote_host("shared.example", Some("https://shared.example/inbox")))
            .await
            .unwrap();
        let personal = f.store.insert_host(remote_host("personal.example", None)).await.unwrap();
        let mut blocked = f
            .store
            .insert_host(remote_host("blocked.example", Some("https://blocked.example/inbox")))
            .await
            .unwrap();
        blocked.blocked = true;
        f.store.update_host(&blocked).await.unwrap();

        let on_shared = f
            .store
            .insert_actor(remote_actor("https://shared.example/users/a", &shared))
            .await
            .unwrap();
        f.store
            .insert_actor(remote_actor("https://personal.example/users/b", &personal))
            .await
            .unwrap();
        let mut banned = remote_actor("https://personal.example/users/c", &personal);
        banned.banned = true;
        f.store.insert_actor(banned).await.unwrap();

        let mut post = Post::new(f.bob.id.clone(), "hello");
        post.mentioned_user_ids.push(on_shared.id.clone());

        let targets = f.fanout.compute_targets(&post).await.unwrap();
        let mut inboxes = targets.inboxes().to_vec();
        inboxes.sort();
        assert_eq!(
            inboxes,
            vec![
                "https://personal.example/users/b/inbox".to_string(),
                "https://shared.example/inbox".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_followers_only_uses_accepted_followers() {
        let f = fixture(MockPayloadSigner::new()).await;
        let shared = f
            .store
            .insert_host(remote_host("shared.example", Some("https://shared.example/inbox")))
            .await
            .unwrap();
        let personal = f.store.insert_host(remote_host("personal.example", None)).await.unwrap();
        f.store.insert_host(remote_host("stranger.example", Some("https://stranger.example/inbox"))).await.unwrap();

        let a = f.store.insert_actor(remote_actor("https://shared.example/users/a", &shared)).await.unwrap();
        let b = f.store.insert_actor(remote_actor("https://shared.example/users/b", &shared)).await.unwrap();
        let c = f.store.insert_actor(remote_actor("https://personal.example/users/c", &personal)).await.unwrap();
        let d = f.store.insert_actor(remote_actor("https://personal.example/users/d", &personal)).await.unwrap();
        follow(&f.store, &a, &f.bob, true).await;
        follow(&f.store, &b, &f.bob, true).await;
        follow(&f.store, &c, &f.bob, true).await;
        follow(&f.store, &d, &f.bob, false).await;

        let mut post = Post::new(f.bob.id.clone(), "friends only");
        post.visibility = Visibility::FollowersOnly;

        let targets = f.fanout.compute_targets(&post).await.unwrap();
        let mut inboxes = targets.inboxes().to_vec();
        inboxes.sort();
        assert_eq!(
            inboxes,
            vec![
                "https://personal.example/users/c/inbox".to_string(),
                "https://shared.example/inbox".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_mentions_use_personal_inbox_when_host_is_not_covered() {
        let f = fixture(MockPayloadSigner::new()).await;
        let shared = f
            .store
            .insert_host(remote_host("shared.example", Some("https://shared.example/inbox")))
            .await
            .unwrap();
        let personal = f.store.insert_host(remote_host("personal.example", None)).await.unwrap();

        let follower = f
            .store
            .insert_actor(remote_actor("https://personal.example/users/f", &personal))
            .await
            .unwrap();
        let mentioned = f
            .store
            .insert_actor(remote_actor("https://shared.example/users/m", &shared))
            .await
            .unwrap();
        follow(&f.store, &follower, &f.bob, true).await;

        let mut post = Post::new(f.bob.id.clone(), "hi @m");
        post.visibility = Visibility::FollowersOnly;
        post.mentioned_user_ids.push(mentioned.id.clone());

        let targets = f.fanout.compute_targets(&post).await.unwrap();
        assert_eq!(
            targets.inboxes(),
            [
                "https://personal.example/users/f/inbox".to_string(),
                "https://shared.example/users/m/inbox".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_mention_on_covered_host_is_not_duplicated() {
        let f = fixture(MockPayloadSigner::new()).await;
        let shared = f
            .store
            .insert_host(remote_host("shared.example", Some("https://shared.example/inbox")))
            .await
            .unwrap();
        let follower = f
            .store
            .insert_actor(remote_actor("https://shared.example/users/f", &shared))
            .await
            .unwrap();
        let mentioned = f
            .store
            .insert_actor(remote_actor("https://shared.example/users/m", &shared))
            .await
            .unwrap();
        follow(&f.store, &follower, &f.bob, true).await;

        let mut post = Post::new(f.bob.id.clone(), "hi @m");
        post.visibility = Visibility::FollowersOnly;
        post.mentioned_user_ids.push(mentioned.id.clone());

        let targets = f.fanout.compute_targets(&post).await.unwrap();
        assert_eq!(targets.inboxes(), ["https://shared.example/inbox".to_string()]);
    }

    #[tokio::test]
    async fn test_run_signs_once_and_queues_one_delivery_per_target() {
        let mut signer = MockPayloadSigner::new();
        signer
            .expect_sign()
            .times(1)
            .returning(|_, _, _, _, _| Ok(fake_signature()));
        let f = fixture(signer).await;
        for name in ["a.example", "b.example", "c.example"] {
            f.store
                .insert_host(remote_host(name, Some(format!("https://{}/inbox", name).as_str())))
                .await
                .unwrap();
        }
        let post = f.store.insert_post(Post::new(f.bob.id.clone(), "hello")).await.unwrap();

        let ctx = JobContext::new("send", 1);
        let outcome = f
            .fanout
            .run(&SendPostJob { post_id: post.id.clone() }, &ctx)
            .await
            .unwrap();
        assert!(matches!(outcome, HandlerOutcome::Applied));

        let pending = f.queue.pending_jobs().await;
        assert_eq!(pending.len(), 3);
        let bodies: Vec<Arc<str>> = pending
            .iter()
            .map(|queued| match &queued.job {
                Job::Deliver(delivery) => delivery.body.clone(),
                other => panic!("unexpected job {:?}", other.job_type()),
            })
            .collect();
        assert!(bodies.iter().all(|body| Arc::ptr_eq(body, &bodies[0])));

        let payload: serde_json::Value = serde_json::from_str(&bodies[0]).unwrap();
        assert_eq!(payload["type"], "Create");
        assert_eq!(payload["signature"]["type"], "RsaSignature2017");
    }

    #[tokio::test]
    async fn test_run_without_targets_skips_signing() {
        let mut signer = MockPayloadSigner::new();
        signer.expect_sign().never();
        let f = fixture(signer).await;
        let post = f.store.insert_post(Post::new(f.bob.id.clone(), "alone")).await.unwrap();

        let outcome = f
            .fanout
            .run(&SendPostJob { post_id: post.id }, &JobContext::new("send", 1))
            .await
            .unwrap();

        assert!(matches!(outcome, HandlerOutcome::Skipped(SkipReason::NothingToDo)));
        assert!(f.queue.is_empty().await);
    }

    #[tokio::test]
    async fn test_deliver_is_keyed_by_post_id() {
        let f = fixture(MockPayloadSigner::new()).await;
        let post = Post::new(f.bob.id.clone(), "hello");

        assert_eq!(f.fanout.deliver(&post).await.unwrap(), EnqueueOutcome::Queued);
        assert_eq!(f.fanout.deliver(&post).await.unwrap(), EnqueueOutcome::Coalesced);
    }
}
