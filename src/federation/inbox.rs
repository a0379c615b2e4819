//! Inbound activity dispatcher
//!
//! Consumes one `InboundActivityJob` at a time. The acting actor and its
//! host are resolved and checked first; then the parsed activity is matched
//! on its variant. Every branch reports a [`HandlerOutcome`]: only local
//! infrastructure failures are retried, everything else completes the job.

use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;

use super::activity::{
    AcceptedObject, Activity, ActivityKind, CreatedObject, DeleteTarget, EmojiTag, UndoTarget,
    UpdatedObject, self_deleted_actor, str_field,
};
use super::context::FederationContext;
use super::delivery::ActivityDelivery;
use super::emoji::get_or_create_emoji;
use super::hosts::HostRegistry;
use super::resolver::{ActorResolver, ResolveOptions};
use super::thread::{ThreadResolver, import_attachments, timestamp};
use crate::data::{
    Actor, CacheStore, EmojiReaction, Follow, Like, Post, Store, Visibility, follows_full_key,
    follows_pending_key, new_id,
};
use crate::error::Result;
use crate::metrics::{ACTIVITIES_RECEIVED, ACTIVITIES_SKIPPED};
use crate::queue::{HandlerOutcome, InboundActivityJob, SkipReason};
use crate::service::{ActorRemoval, FollowService};

use HandlerOutcome::{Applied, Skipped};

#[derive(Clone)]
pub struct InboxDispatcher {
    ctx: Arc<FederationContext>,
    store: Arc<dyn Store>,
    cache: Arc<dyn CacheStore>,
    hosts: HostRegistry,
    actors: ActorResolver,
    threads: Arc<dyn ThreadResolver>,
    delivery: ActivityDelivery,
    follows: FollowService,
    removal: ActorRemoval,
}

/// Acting actor and the local actor the activity was delivered to.
struct Parties<'a> {
    activity: &'a Activity,
    remote: &'a Actor,
    recipient: &'a Actor,
}

impl InboxDispatcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        ctx: Arc<FederationContext>,
        store: Arc<dyn Store>,
        cache: Arc<dyn CacheStore>,
        hosts: HostRegistry,
        actors: ActorResolver,
        threads: Arc<dyn ThreadResolver>,
        delivery: ActivityDelivery,
        follows: FollowService,
        removal: ActorRemoval,
    ) -> Self {
        Self {
            ctx,
            store,
            cache,
            hosts,
            actors,
            threads,
            delivery,
            follows,
            removal,
        }
    }

    /// Process one inbound activity. Never fails; the outcome tells the
    /// queue whether to retry.
    pub async fn dispatch(&self, job: &InboundActivityJob) -> HandlerOutcome {
        let outcome: HandlerOutcome = self.try_dispatch(job).await.into();
        if let Skipped(reason) = &outcome {
            ACTIVITIES_SKIPPED.with_label_values(&[reason.as_str()]).inc();
        }
        outcome
    }

    async fn try_dispatch(&self, job: &InboundActivityJob) -> Result<HandlerOutcome> {
        let recipient = self
            .store
            .get_actor(&job.petition_by)
            .await?
            .unwrap_or_else(|| self.ctx.admin.clone());

        // The actor document is already gone, so it cannot be resolved.
        if let Some(actor_url) = self_deleted_actor(&job.activity) {
            ACTIVITIES_RECEIVED.with_label_values(&["Delete"]).inc();
            self.removal.remove_by_remote_id(&actor_url).await?;
            return Ok(Applied);
        }

        let activity = match Activity::from_value(job.activity.clone()) {
            Ok(activity) => activity,
            Err(error) => {
                tracing::debug!(error = %error, "Malformed activity");
                return Ok(Skipped(SkipReason::Malformed));
            }
        };
        ACTIVITIES_RECEIVED
            .with_label_values(&[activity.type_name()])
            .inc();

        let remote = self.actors.resolve(&activity.actor, &recipient).await?;
        if self.ctx.is_unreachable(&remote) {
            let reason = self.unreachable_reason(&activity.actor).await?;
            tracing::debug!(actor = %activity.actor, reason = reason.as_str(), "Acting actor rejected");
            return Ok(Skipped(reason));
        }

        let host = match remote.host_id() {
            Some(host_id) => self.store.get_host(host_id).await?,
            None => None,
        };

        let blocks_actor = self
            .store
            .is_actor_blocked_by(&recipient.id, &remote.id)
            .await?;
        let blocks_host = match &host {
            Some(host) => self.store.is_host_blocked_by(&recipient.id, &host.id).await?,
            None => false,
        };
        if blocks_actor || blocks_host {
            return Ok(Skipped(SkipReason::BlockedByRecipient));
        }

        let parties = Parties {
            activity: &activity,
            remote: &remote,
            recipient: &recipient,
        };
        tracing::debug!(
            activity_type = activity.type_name(),
            actor = %activity.actor,
            "Dispatching activity"
        );

        match &activity.kind {
            ActivityKind::Follow { object } => self.on_follow(&parties, object).await,
            ActivityKind::Accept { object } => self.on_accept(&parties, object).await,
            ActivityKind::Undo(target) => self.on_undo(&parties, target).await,
            ActivityKind::Like { object } => self.on_like(&parties, object).await,
            ActivityKind::Create(created) => self.on_create(&parties, created).await,
            ActivityKind::Announce { object } => self.on_announce(&parties, object.as_deref()).await,
            ActivityKind::Update(updated) => self.on_update(&parties, updated).await,
            ActivityKind::Delete(target) => self.on_delete(&parties, target).await,
            ActivityKind::EmojiReact {
                object,
                content,
                emoji,
            } => {
                self.on_emoji_react(&parties, object, content, emoji.as_ref())
                    .await
            }
            ActivityKind::Add { object } => self.on_add(&parties, object).await,
            ActivityKind::Move { target } => self.on_move(&parties, target).await,
            ActivityKind::Other { kind } => {
                tracing::info!(activity_type = %kind, actor = %activity.actor, "Activity type not implemented");
                Ok(Skipped(SkipReason::Unsupported))
            }
        }
    }

    /// Why the acting actor resolved to the sentinel.
    async fn unreachable_reason(&self, actor_url: &str) -> Result<SkipReason> {
        if let Ok(host_name) = HostRegistry::host_of_url(actor_url) {
            if self.hosts.is_blocked(&host_name).await? {
                return Ok(SkipReason::HostBlocked);
            }
        }
        let banned = self
            .store
            .find_actor_by_remote_id(actor_url)
            .await?
            .is_some_and(|actor| actor.banned);
        Ok(if banned {
            SkipReason::ActorBanned
        } else {
            SkipReason::ActorUnreachable
        })
    }

    /// Send the `Accept` acknowledgment. Failing to queue it does not undo
    /// the state change already applied.
    async fn acknowledge(&self, parties: &Parties<'_>, signer: &Actor) {
        if let Err(error) = self
            .delivery
            .send_accept(parties.activity, parties.remote, signer)
            .await
        {
            tracing::warn!(
                activity_type = parties.activity.type_name(),
                actor = %parties.activity.actor,
                error = %error,
                "Failed to queue acknowledgment"
            );
        }
    }

    // =========================================================================
    // Follow / Accept
    // =========================================================================

    async fn on_follow(&self, parties: &Parties<'_>, object: &str) -> Result<HandlerOutcome> {
        let target = self.actors.resolve(object, parties.recipient).await?;
        if self.ctx.is_unreachable(&target) {
            return Ok(Skipped(SkipReason::TargetMissing));
        }

        let existing = match &parties.activity.id {
            Some(id) => self.store.find_follow_by_remote_id(id).await?,
            None => None,
        };
        let existing = match existing {
            Some(follow) => Some(follow),
            None => self.store.find_follow(&parties.remote.id, &target.id).await?,
        };

        if existing.is_none() {
            let follow = self
                .store
                .insert_follow(Follow {
                    id: new_id(),
                    follower_id: parties.remote.id.clone(),
                    followed_id: target.id.clone(),
                    accepted: target.accepts_follows_automatically(),
                    remote_follow_id: parties.activity.id.clone(),
                    created_at: Utc::now(),
                })
                .await?;
            tracing::info!(
                follower = %parties.remote.handle,
                followed = %target.handle,
                accepted = follow.accepted,
                "Follow received"
            );
        }

        let signer = if target.is_remote() { parties.recipient } else { &target };
        self.acknowledge(parties, signer).await;
        Ok(Applied)
    }

    async fn on_accept(&self, parties: &Parties<'_>, object: &AcceptedObject) -> Result<HandlerOutcome> {
        let AcceptedObject::Follow { id } = object else {
            tracing::info!(actor = %parties.activity.actor, "Accept of non-follow ignored");
            return Ok(Skipped(SkipReason::Unsupported));
        };
        if !self.ctx.is_local_url(id) {
            return Ok(Skipped(SkipReason::TargetMissing));
        }
        let Some((follower_id, followed_id)) = self.ctx.decode_follow_url(id) else {
            return Ok(Skipped(SkipReason::Malformed));
        };
        let Some(mut follow) = self.store.find_follow(follower_id, followed_id).await? else {
            return Ok(Skipped(SkipReason::TargetMissing));
        };
        if follow.followed_id != parties.remote.id {
            return Ok(Skipped(SkipReason::NotOwner));
        }

        if !follow.accepted {
            follow.accepted = true;
            self.store.update_follow(&follow).await?;
        }
        self.cache.del(&follows_full_key(&follow.follower_id)).await;
        self.cache.del(&follows_pending_key(&follow.follower_id)).await;
        Ok(Applied)
    }

    // =========================================================================
    // Undo
    // =========================================================================

    async fn on_undo(&self, parties: &Parties<'_>, target: &UndoTarget) -> Result<HandlerOutcome> {
        match target {
            UndoTarget::Follow { id } => {
                let Some(follow) = self.store.find_follow_by_remote_id(id).await? else {
                    self.acknowledge(parties, parties.recipient).await;
                    return Ok(Skipped(SkipReason::TargetMissing));
                };
                if follow.follower_id != parties.remote.id {
                    return Ok(Skipped(SkipReason::NotOwner));
                }
                self.store.delete_follow(&follow.id).await?;
                self.acknowledge(parties, parties.recipient).await;
                Ok(Applied)
            }
            UndoTarget::Like { id } => {
                let Some(like) = self.store.find_like_by_remote_id(id).await? else {
                    return Ok(Skipped(SkipReason::TargetMissing));
                };
                if like.user_id != parties.remote.id {
                    return Ok(Skipped(SkipReason::NotOwner));
                }
                self.store.delete_like(&like.id).await?;
                Ok(Applied)
            }
            UndoTarget::Announce { id } => {
                let Some(boost) = self.store.find_post_by_remote_id(id).await? else {
                    self.acknowledge(parties, parties.recipient).await;
                    return Ok(Skipped(SkipReason::TargetMissing));
                };
                if boost.user_id != parties.remote.id {
                    return Ok(Skipped(SkipReason::NotOwner));
                }
                if self.store.count_children(&boost.id).await? > 0 {
                    tracing::warn!(
                        post_id = %boost.id,
                        remote_post_id = %id,
                        "Refusing to undo a boost that has replies"
                    );
                    return Ok(Skipped(SkipReason::IntegrityViolation));
                }
                self.store.delete_post(&boost.id).await?;
                self.acknowledge(parties, parties.recipient).await;
                Ok(Applied)
            }
            UndoTarget::Other { kind } => {
                tracing::info!(object_type = %kind, actor = %parties.activity.actor, "Undo not implemented");
                Ok(Skipped(SkipReason::Unsupported))
            }
        }
    }

    // =========================================================================
    // Like / EmojiReact
    // =========================================================================

    async fn on_like(&self, parties: &Parties<'_>, object: &str) -> Result<HandlerOutcome> {
        let Some(post_id) = self.ctx.local_post_id(object) else {
            return Ok(Skipped(SkipReason::TargetMissing));
        };
        let Some(post) = self.store.get_post(post_id).await? else {
            return Ok(Skipped(SkipReason::TargetMissing));
        };

        if let Some(id) = &parties.activity.id {
            if self.store.find_like_by_remote_id(id).await?.is_some() {
                return Ok(Applied);
            }
        }
        if self.store.find_like(&parties.remote.id, &post.id).await?.is_none() {
            self.store
                .insert_like(Like {
                    id: new_id(),
                    user_id: parties.remote.id.clone(),
                    post_id: post.id.clone(),
                    remote_id: parties.activity.id.clone(),
                    created_at: Utc::now(),
                })
                .await?;
        }
        self.acknowledge(parties, parties.recipient).await;
        Ok(Applied)
    }

    async fn on_emoji_react(
        &self,
        parties: &Parties<'_>,
        object: &str,
        content: &str,
        emoji: Option<&EmojiTag>,
    ) -> Result<HandlerOutcome> {
        if let Some(id) = &parties.activity.id {
            if self.store.find_reaction_by_remote_id(id).await?.is_some() {
                return Ok(Applied);
            }
        }

        let emoji = match emoji {
            Some(tag) => Some(get_or_create_emoji(self.store.as_ref(), tag).await?),
            None => None,
        };
        let Some(post) = self
            .threads
            .resolve_post(parties.recipient, object, None)
            .await?
        else {
            self.acknowledge(parties, parties.recipient).await;
            return Ok(Skipped(SkipReason::TargetMissing));
        };

        self.store
            .insert_reaction(EmojiReaction {
                id: new_id(),
                user_id: parties.remote.id.clone(),
                post_id: post.id,
                emoji_id: emoji.map(|emoji| emoji.id),
                content: content.to_string(),
                remote_id: parties.activity.id.clone(),
                created_at: Utc::now(),
            })
            .await?;
        self.acknowledge(parties, parties.recipient).await;
        Ok(Applied)
    }

    // =========================================================================
    // Create / Announce
    // =========================================================================

    async fn on_create(&self, parties: &Parties<'_>, created: &CreatedObject) -> Result<HandlerOutcome> {
        match created {
            CreatedObject::Post { id, object, .. } => {
                let post = self
                    .threads
                    .resolve_post(parties.recipient, id, Some(object))
                    .await?;
                if post.is_none() {
                    tracing::debug!(object = %id, "Created object could not be stored");
                    return Ok(Skipped(SkipReason::FetchFailed));
                }
                self.acknowledge(parties, parties.recipient).await;
                Ok(Applied)
            }
            CreatedObject::Other { kind } => {
                tracing::info!(object_type = %kind, actor = %parties.activity.actor, "Post type not implemented");
                Ok(Skipped(SkipReason::Unsupported))
            }
        }
    }

    async fn on_announce(&self, parties: &Parties<'_>, object: Option<&str>) -> Result<HandlerOutcome> {
        let (Some(url), Some(activity_id)) = (object, parties.activity.id.as_deref()) else {
            tracing::debug!(actor = %parties.activity.actor, "Announce without object or id");
            return Ok(Skipped(SkipReason::Malformed));
        };
        if self.store.find_post_by_remote_id(activity_id).await?.is_some() {
            return Ok(Applied);
        }

        let Some(boosted) = self
            .threads
            .resolve_post(parties.recipient, url, None)
            .await?
        else {
            tracing::trace!(object = %url, "Could not get remote post to be boosted");
            return Ok(Skipped(SkipReason::FetchFailed));
        };

        let mut boost = Post::new(parties.remote.id.clone(), "");
        boost.parent_id = Some(boosted.id);
        boost.remote_post_id = Some(activity_id.to_string());
        boost.visibility = Visibility::from_addressing(&parties.activity.to, &parties.activity.cc);
        self.store.insert_post(boost).await?;

        self.acknowledge(parties, parties.recipient).await;
        Ok(Applied)
    }

    // =========================================================================
    // Update
    // =========================================================================

    async fn on_update(&self, parties: &Parties<'_>, updated: &UpdatedObject) -> Result<HandlerOutcome> {
        match updated {
            UpdatedObject::Question { id, object } => {
                if let Some(post) = self
                    .threads
                    .resolve_post(parties.recipient, id, Some(object))
                    .await?
                {
                    self.threads.merge_poll(object, &post).await?;
                }
                self.update_note(parties, id, object).await
            }
            UpdatedObject::Note { id, object } => self.update_note(parties, id, object).await,
            UpdatedObject::Person { id } => {
                if *id != parties.activity.actor {
                    return Ok(Skipped(SkipReason::NotOwner));
                }
                let options = ResolveOptions {
                    depth: 0,
                    force_refresh: true,
                };
                self.actors.resolve_with(id, parties.recipient, options).await?;
                self.acknowledge(parties, parties.recipient).await;
                Ok(Applied)
            }
            UpdatedObject::Other { kind } => {
                tracing::info!(object_type = %kind, actor = %parties.activity.actor, "Update not implemented");
                Ok(Skipped(SkipReason::Unsupported))
            }
        }
    }

    async fn update_note(
        &self,
        parties: &Parties<'_>,
        id: &str,
        object: &serde_json::Value,
    ) -> Result<HandlerOutcome> {
        let Some(mut post) = self.store.find_post_by_remote_id(id).await? else {
            let created = self
                .threads
                .resolve_post(parties.recipient, id, Some(object))
                .await?;
            if created.is_none() {
                return Ok(Skipped(SkipReason::FetchFailed));
            }
            self.acknowledge(parties, parties.recipient).await;
            return Ok(Applied);
        };
        if post.user_id != parties.remote.id {
            return Ok(Skipped(SkipReason::NotOwner));
        }

        let media_ids = import_attachments(self.store.as_ref(), object, &parties.remote.id).await?;
        if !media_ids.is_empty() {
            post.media_ids = media_ids;
        }
        if let Some(content) = str_field(object, "content") {
            post.content = ammonia::clean(&content);
        }
        if let Some(summary) = str_field(object, "summary") {
            post.content_warning = summary;
        }
        post.updated_at = timestamp(object, "updated").unwrap_or_else(Utc::now);
        self.store.update_post(&post).await?;

        self.acknowledge(parties, parties.recipient).await;
        Ok(Applied)
    }

    // =========================================================================
    // Delete
    // =========================================================================

    async fn on_delete(&self, parties: &Parties<'_>, target: &DeleteTarget) -> Result<HandlerOutcome> {
        match target {
            DeleteTarget::Actor { id } => {
                if *id != parties.activity.actor {
                    return Ok(Skipped(SkipReason::NotOwner));
                }
                // Acknowledge first: the inbox is looked up through the host
                // record, which outlives the actor.
                self.acknowledge(parties, parties.recipient).await;
                self.removal.remove(&parties.remote.id).await?;
                Ok(Applied)
            }
            DeleteTarget::Tombstone { id } => {
                let Some(mut post) = self.store.find_post_by_remote_id(id).await? else {
                    self.acknowledge(parties, parties.recipient).await;
                    return Ok(Skipped(SkipReason::TargetMissing));
                };
                if post.user_id != parties.remote.id {
                    return Ok(Skipped(SkipReason::NotOwner));
                }
                if self.store.count_children(&post.id).await? > 0 {
                    post.redact();
                    self.store.update_post(&post).await?;
                    tracing::debug!(post_id = %post.id, "Redacted deleted post with replies");
                } else {
                    self.store.delete_post(&post.id).await?;
                }
                self.acknowledge(parties, parties.recipient).await;
                Ok(Applied)
            }
            DeleteTarget::Other { kind } => {
                tracing::info!(object_type = %kind, actor = %parties.activity.actor, "Delete not implemented");
                Ok(Skipped(SkipReason::Unsupported))
            }
        }
    }

    // =========================================================================
    // Add / Move
    // =========================================================================

    async fn on_add(&self, parties: &Parties<'_>, object: &str) -> Result<HandlerOutcome> {
        let Some(mut post) = self
            .threads
            .resolve_post(parties.recipient, object, None)
            .await?
        else {
            return Ok(Skipped(SkipReason::TargetMissing));
        };
        if post.user_id != parties.remote.id {
            return Ok(Skipped(SkipReason::NotOwner));
        }
        if !post.featured {
            post.featured = true;
            self.store.update_post(&post).await?;
        }
        self.acknowledge(parties, parties.recipient).await;
        Ok(Applied)
    }

    /// Re-point local followers of the old identity to the new one.
    /// Remote followers are left to their own servers.
    async fn on_move(&self, parties: &Parties<'_>, target: &str) -> Result<HandlerOutcome> {
        let new_actor = self.actors.resolve(target, parties.recipient).await?;
        if self.ctx.is_unreachable(&new_actor) || new_actor.id == parties.remote.id {
            return Ok(Skipped(SkipReason::TargetMissing));
        }

        let already_following: HashSet<String> = self
            .store
            .list_followers(&new_actor.id)
            .await?
            .into_iter()
            .map(|follow| follow.follower_id)
            .collect();
        let candidates: Vec<String> = self
            .store
            .list_followers(&parties.remote.id)
            .await?
            .into_iter()
            .filter(|follow| follow.accepted && !already_following.contains(&follow.follower_id))
            .map(|follow| follow.follower_id)
            .collect();
        let local_followers: Vec<Actor> = self
            .store
            .get_actors(&candidates)
            .await?
            .into_iter()
            .filter(|actor| !actor.is_remote())
            .collect();

        let results = futures::future::join_all(
            local_followers
                .iter()
                .map(|follower| self.follows.follow(&follower.id, &new_actor.id)),
        )
        .await;
        let moved = results.iter().filter(|result| result.is_ok()).count();
        for error in results.into_iter().filter_map(|result| result.err()) {
            tracing::debug!(error = %error, "Follow migration failed");
        }
        tracing::info!(
            from = %parties.activity.actor,
            to = %target,
            moved,
            "Migrated local followers"
        );

        self.acknowledge(parties, parties.recipient).await;
        Ok(Applied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{ServerBlock, UserBlock};
    use crate::federation::transport::MockTransport;
    use crate::queue::Job;
    use crate::testing::{Harness, harness, local_actor, remote_actor, remote_host};
    use serde_json::{Value, json};

    const ALICE: &str = "https://remote.example/users/alice";

    async fn seed(h: &Harness) -> (Actor, Actor) {
        let bob = h.store.insert_actor(local_actor("bob")).await.unwrap();
        let host = h.store.insert_host(remote_host("remote.example", None)).await.unwrap();
        let alice = h.store.insert_actor(remote_actor(ALICE, &host)).await.unwrap();
        (bob, alice)
    }

    fn job(activity: Value, recipient: &Actor) -> InboundActivityJob {
        InboundActivityJob {
            activity,
            petition_by: recipient.id.clone(),
        }
    }

    async fn dispatch(h: &Harness, activity: Value, recipient: &Actor) -> HandlerOutcome {
        h.federation.inbox.dispatch(&job(activity, recipient)).await
    }

    async fn queued_types(h: &Harness) -> Vec<String> {
        h.queue
            .pending_jobs()
            .await
            .into_iter()
            .filter_map(|queued| match queued.job {
                Job::Deliver(deliver) => serde_json::from_str::<Value>(&deliver.body)
                    .ok()
                    .and_then(|body| str_field(&body, "type")),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_follow_is_accepted_and_acknowledged() {
        let h = harness(MockTransport::new());
        let (bob, alice) = seed(&h).await;
        let bob_url = h.ctx.actor_url(&bob);

        let outcome = dispatch(
            &h,
            json!({
                "id": "https://remote.example/follows/1",
                "type": "Follow",
                "actor": ALICE,
                "object": bob_url,
            }),
            &bob,
        )
        .await;

        assert!(matches!(outcome, HandlerOutcome::Applied));
        let follow = h.store.find_follow(&alice.id, &bob.id).await.unwrap().unwrap();
        assert!(follow.accepted);
        assert_eq!(follow.remote_follow_id.as_deref(), Some("https://remote.example/follows/1"));
        assert_eq!(queued_types(&h).await, vec!["Accept".to_string()]);
    }

    #[tokio::test]
    async fn test_follow_of_manual_actor_stays_pending() {
        let h = harness(MockTransport::new());
        let (_, alice) = seed(&h).await;
        let mut carol = local_actor("carol");
        carol.manually_accepts_follows = true;
        let carol = h.store.insert_actor(carol).await.unwrap();

        let activity = json!({
            "id": "https://remote.example/follows/2",
            "type": "Follow",
            "actor": ALICE,
            "object": h.ctx.actor_url(&carol),
        });
        dispatch(&h, activity.clone(), &carol).await;
        dispatch(&h, activity, &carol).await;

        let follows = h.store.list_followers(&carol.id).await.unwrap();
        assert_eq!(follows.len(), 1);
        assert!(!follows[0].accepted);
        assert_eq!(follows[0].follower_id, alice.id);
    }

    #[tokio::test]
    async fn test_unknown_type_is_unsupported() {
        let h = harness(MockTransport::new());
        let (bob, _) = seed(&h).await;

        let outcome = dispatch(&h, json!({ "type": "Listen", "actor": ALICE, "object": "x" }), &bob).await;
        assert!(matches!(outcome, HandlerOutcome::Skipped(SkipReason::Unsupported)));
    }

    #[tokio::test]
    async fn test_missing_actor_is_malformed() {
        let h = harness(MockTransport::new());
        let (bob, _) = seed(&h).await;

        let outcome = dispatch(&h, json!({ "type": "Like", "object": "x" }), &bob).await;
        assert!(matches!(outcome, HandlerOutcome::Skipped(SkipReason::Malformed)));
    }

    #[tokio::test]
    async fn test_rejections_name_their_reason() {
        let h = harness(MockTransport::new());
        let bob = h.store.insert_actor(local_actor("bob")).await.unwrap();

        let mut blocked = h.store.insert_host(remote_host("blocked.example", None)).await.unwrap();
        blocked.blocked = true;
        h.store.update_host(&blocked).await.unwrap();
        h.store
            .insert_actor(remote_actor("https://blocked.example/users/eve", &blocked))
            .await
            .unwrap();

        let host = h.store.insert_host(remote_host("remote.example", None)).await.unwrap();
        let mut mallory = remote_actor("https://remote.example/users/mallory", &host);
        mallory.banned = true;
        h.store.insert_actor(mallory).await.unwrap();
        let trent = h
            .store
            .insert_actor(remote_actor("https://remote.example/users/trent", &host))
            .await
            .unwrap();
        h.store
            .insert_user_block(UserBlock {
                id: new_id(),
                user_id: bob.id.clone(),
                blocked_user_id: trent.id.clone(),
            })
            .await
            .unwrap();

        let like = |actor: &str| json!({ "type": "Like", "actor": actor, "object": "https://local.example/fediverse/post/1" });

        let outcome = dispatch(&h, like("https://blocked.example/users/eve"), &bob).await;
        assert!(matches!(outcome, HandlerOutcome::Skipped(SkipReason::HostBlocked)));
        let outcome = dispatch(&h, like("https://remote.example/users/mallory"), &bob).await;
        assert!(matches!(outcome, HandlerOutcome::Skipped(SkipReason::ActorBanned)));
        let outcome = dispatch(&h, like("https://remote.example/users/trent"), &bob).await;
        assert!(matches!(outcome, HandlerOutcome::Skipped(SkipReason::BlockedByRecipient)));
    }

    #[tokio::test]
    async fn test_server_block_of_recipient_applies() {
        let h = harness(MockTransport::new());
        let (bob, alice) = seed(&h).await;
        h.store
            .insert_server_block(ServerBlock {
                id: new_id(),
                user_id: bob.id.clone(),
                blocked_host_id: alice.host_id().unwrap().to_string(),
            })
            .await
            .unwrap();

        let outcome = dispatch(
            &h,
            json!({ "type": "Follow", "actor": ALICE, "object": h.ctx.actor_url(&bob) }),
            &bob,
        )
        .await;
        assert!(matches!(outcome, HandlerOutcome::Skipped(SkipReason::BlockedByRecipient)));
        assert!(h.store.find_follow(&alice.id, &bob.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_like_is_recorded_once() {
        let h = harness(MockTransport::new());
        let (bob, alice) = seed(&h).await;
        let post = h.store.insert_post(Post::new(bob.id.clone(), "hello")).await.unwrap();

        let activity = json!({
            "id": "https://remote.example/likes/1",
            "type": "Like",
            "actor": ALICE,
            "object": h.ctx.local_post_url(&post.id),
        });
        dispatch(&h, activity.clone(), &bob).await;
        let outcome = dispatch(&h, activity, &bob).await;

        assert!(matches!(outcome, HandlerOutcome::Applied));
        assert!(h.store.find_like(&alice.id, &post.id).await.unwrap().is_some());
        assert_eq!(h.store.delete_likes_by_user(&alice.id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_accept_marks_local_follow_accepted() {
        let h = harness(MockTransport::new());
        let (bob, alice) = seed(&h).await;
        let follow = h.federation.follows.follow(&bob.id, &alice.id).await.unwrap();
        assert!(!follow.accepted);

        let outcome = dispatch(
            &h,
            json!({
                "type": "Accept",
                "actor": ALICE,
                "object": { "type": "Follow", "id": h.ctx.follow_url(&bob.id, &alice.id) },
            }),
            &bob,
        )
        .await;

        assert!(matches!(outcome, HandlerOutcome::Applied));
        assert!(h.store.find_follow(&bob.id, &alice.id).await.unwrap().unwrap().accepted);
    }

    #[tokio::test]
    async fn test_undo_boost_with_replies_is_refused() {
        let h = harness(MockTransport::new());
        let (bob, alice) = seed(&h).await;
        let original = h.store.insert_post(Post::new(bob.id.clone(), "original")).await.unwrap();
        let mut boost = Post::new(alice.id.clone(), "");
        boost.parent_id = Some(original.id.clone());
        boost.remote_post_id = Some("https://remote.example/announces/1".to_string());
        let boost = h.store.insert_post(boost).await.unwrap();
        let mut reply = Post::new(bob.id.clone(), "reply to the boost");
        reply.parent_id = Some(boost.id.clone());
        h.store.insert_post(reply).await.unwrap();

        let outcome = dispatch(
            &h,
            json!({
                "type": "Undo",
                "actor": ALICE,
                "object": { "type": "Announce", "id": "https://remote.example/announces/1" },
            }),
            &bob,
        )
        .await;

        assert!(matches!(outcome, HandlerOutcome::Skipped(SkipReason::IntegrityViolation)));
        assert!(h.store.get_post(&boost.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_delete_redacts_or_removes_and_checks_ownership() {
        let h = harness(MockTransport::new());
        let (bob, alice) = seed(&h).await;

        let mut replied = Post::new(alice.id.clone(), "has replies");
        replied.remote_post_id = Some("https://remote.example/notes/1".to_string());
        let replied = h.store.insert_post(replied).await.unwrap();
        let mut reply = Post::new(bob.id.clone(), "reply");
        reply.parent_id = Some(replied.id.clone());
        h.store.insert_post(reply).await.unwrap();

        let mut lonely = Post::new(alice.id.clone(), "no replies");
        lonely.remote_post_id = Some("https://remote.example/notes/2".to_string());
        let lonely = h.store.insert_post(lonely).await.unwrap();

        let mut bobs = Post::new(bob.id.clone(), "not alice's");
        bobs.remote_post_id = Some("https://remote.example/notes/3".to_string());
        let bobs = h.store.insert_post(bobs).await.unwrap();

        let delete = |id: &str| {
            json!({ "type": "Delete", "actor": ALICE, "object": { "type": "Tombstone", "id": id } })
        };

        dispatch(&h, delete("https://remote.example/notes/1"), &bob).await;
        dispatch(&h, delete("https://remote.example/notes/2"), &bob).await;
        let outcome = dispatch(&h, delete("https://remote.example/notes/3"), &bob).await;

        let replied = h.store.get_post(&replied.id).await.unwrap().unwrap();
        assert_eq!(replied.content, crate::data::REDACTED_CONTENT);
        assert!(h.store.get_post(&lonely.id).await.unwrap().is_none());
        assert!(matches!(outcome, HandlerOutcome::Skipped(SkipReason::NotOwner)));
        assert!(h.store.get_post(&bobs.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_create_note_stores_post() {
        let h = harness(MockTransport::new());
        let (bob, alice) = seed(&h).await;

        let outcome = dispatch(
            &h,
            json!({
                "id": "https://remote.example/notes/9/activity",
                "type": "Create",
                "actor": ALICE,
                "to": ["https://www.w3.org/ns/activitystreams#Public"],
                "object": {
                    "id": "https://remote.example/notes/9",
                    "type": "Note",
                    "attributedTo": ALICE,
                    "content": "<p>hi</p><script>alert(1)</script>",
                    "to": ["https://www.w3.org/ns/activitystreams#Public"],
                },
            }),
            &bob,
        )
        .await;

        assert!(matches!(outcome, HandlerOutcome::Applied));
        let post = h
            .store
            .find_post_by_remote_id("https://remote.example/notes/9")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(post.user_id, alice.id);
        assert!(!post.content.contains("script"));
    }

    #[tokio::test]
    async fn test_self_delete_removes_actor() {
        let h = harness(MockTransport::new());
        let (bob, alice) = seed(&h).await;

        let outcome = dispatch(
            &h,
            json!({ "id": format!("{}#delete", ALICE), "type": "Delete", "actor": ALICE, "object": ALICE }),
            &bob,
        )
        .await;

        assert!(matches!(outcome, HandlerOutcome::Applied));
        assert!(h.store.get_actor(&alice.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_move_migrates_local_followers() {
        let h = harness(MockTransport::new());
        let (bob, alice) = seed(&h).await;
        let host = h.store.insert_host(remote_host("new.example", None)).await.unwrap();
        let new_alice = h
            .store
            .insert_actor(remote_actor("https://new.example/users/alice", &host))
            .await
            .unwrap();
        h.store
            .insert_follow(Follow {
                id: new_id(),
                follower_id: bob.id.clone(),
                followed_id: alice.id.clone(),
                accepted: true,
                remote_follow_id: None,
                created_at: Utc::now(),
            })
            .await
            .unwrap();

        let outcome = dispatch(
            &h,
            json!({
                "type": "Move",
                "actor": ALICE,
                "object": ALICE,
                "target": "https://new.example/users/alice",
            }),
            &bob,
        )
        .await;

        assert!(matches!(outcome, HandlerOutcome::Applied));
        assert!(h.store.find_follow(&bob.id, &new_alice.id).await.unwrap().is_some());
        assert!(queued_types(&h).await.contains(&"Follow".to_string()));
    }

    #[tokio::test]
    async fn test_announce_creates_boost_with_addressed_visibility() {
        let h = harness(MockTransport::new());
        let (bob, alice) = seed(&h).await;
        let original = h.store.insert_post(Post::new(bob.id.clone(), "original")).await.unwrap();

        let outcome = dispatch(
            &h,
            json!({
                "id": "https://remote.example/announces/7",
                "type": "Announce",
                "actor": ALICE,
                "to": ["https://remote.example/users/alice/followers"],
                "object": h.ctx.local_post_url(&original.id),
            }),
            &bob,
        )
        .await;

        assert!(matches!(outcome, HandlerOutcome::Applied));
        let boost = h
            .store
            .find_post_by_remote_id("https://remote.example/announces/7")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(boost.user_id, alice.id);
        assert_eq!(boost.parent_id.as_deref(), Some(original.id.as_str()));
        assert!(boost.content.is_empty());
        assert_eq!(boost.visibility, Visibility::FollowersOnly);
        assert_eq!(h.store.count_children(&original.id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_update_note_replaces_media_and_bumps_timestamp() {
        let h = harness(MockTransport::new());
        let (bob, alice) = seed(&h).await;
        let mut post = Post::new(alice.id.clone(), "<p>before</p>");
        post.remote_post_id = Some("https://remote.example/notes/20".to_string());
        post.media_ids = vec!["old-media".to_string()];
        let post = h.store.insert_post(post).await.unwrap();

        let outcome = dispatch(
            &h,
            json!({
                "type": "Update",
                "actor": ALICE,
                "object": {
                    "id": "https://remote.example/notes/20",
                    "type": "Note",
                    "attributedTo": ALICE,
                    "content": "<p>after</p>",
                    "updated": "2030-05-01T10:00:00Z",
                    "attachment": [
                        { "type": "Document", "url": "https://remote.example/files/cat.png", "name": "a cat" }
                    ],
                },
            }),
            &bob,
        )
        .await;

        assert!(matches!(outcome, HandlerOutcome::Applied));
        let updated = h.store.get_post(&post.id).await.unwrap().unwrap();
        assert_eq!(updated.content, "<p>after</p>");
        assert_eq!(updated.media_ids.len(), 1);
        assert_ne!(updated.media_ids[0], "old-media");
        let media = h.store.get_media(&updated.media_ids[0]).await.unwrap().unwrap();
        assert_eq!(media.url, "https://remote.example/files/cat.png");
        assert_eq!(updated.updated_at.to_rfc3339(), "2030-05-01T10:00:00+00:00");
    }

    #[tokio::test]
    async fn test_update_of_unknown_note_creates_it() {
        let h = harness(MockTransport::new());
        let (bob, alice) = seed(&h).await;

        let outcome = dispatch(
            &h,
            json!({
                "type": "Update",
                "actor": ALICE,
                "object": {
                    "id": "https://remote.example/notes/21",
                    "type": "Note",
                    "attributedTo": ALICE,
                    "content": "<p>edited before we saw it</p>",
                    "to": [crate::federation::PUBLIC_COLLECTION],
                },
            }),
            &bob,
        )
        .await;

        assert!(matches!(outcome, HandlerOutcome::Applied));
        let post = h
            .store
            .find_post_by_remote_id("https://remote.example/notes/21")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(post.user_id, alice.id);
    }

    #[tokio::test]
    async fn test_update_question_merges_poll() {
        let h = harness(MockTransport::new());
        let (bob, alice) = seed(&h).await;
        let mut post = Post::new(alice.id.clone(), "<p>tabs or spaces?</p>");
        post.remote_post_id = Some("https://remote.example/questions/1".to_string());
        let post = h.store.insert_post(post).await.unwrap();

        let outcome = dispatch(
            &h,
            json!({
                "type": "Update",
                "actor": ALICE,
                "object": {
                    "id": "https://remote.example/questions/1",
                    "type": "Question",
                    "attributedTo": ALICE,
                    "oneOf": [
                        { "type": "Note", "name": "tabs", "replies": { "totalItems": 3 } },
                        { "type": "Note", "name": "spaces", "replies": { "totalItems": 5 } }
                    ],
                },
            }),
            &bob,
        )
        .await;

        assert!(matches!(outcome, HandlerOutcome::Applied));
        let poll = h.store.get_post(&post.id).await.unwrap().unwrap().poll.unwrap();
        assert!(!poll.multiple_choice);
        let votes: Vec<(String, u64)> = poll
            .options
            .into_iter()
            .map(|option| (option.title, option.votes))
            .collect();
        assert_eq!(votes, vec![("tabs".to_string(), 3), ("spaces".to_string(), 5)]);
    }

    #[tokio::test]
    async fn test_update_person_enqueues_keyed_refresh() {
        let h = harness(MockTransport::new());
        let (bob, _) = seed(&h).await;
        let update = json!({
            "type": "Update",
            "actor": ALICE,
            "object": { "id": ALICE, "type": "Person" },
        });

        dispatch(&h, update.clone(), &bob).await;
        let outcome = dispatch(&h, update, &bob).await;

        assert!(matches!(outcome, HandlerOutcome::Applied));
        let refreshes: Vec<_> = h
            .queue
            .pending_jobs()
            .await
            .into_iter()
            .filter(|queued| matches!(&queued.job, Job::RefreshActor(job) if job.actor_url == ALICE))
            .collect();
        assert_eq!(refreshes.len(), 1);
        assert_eq!(refreshes[0].options.id.as_deref(), Some(ALICE));
    }

    #[tokio::test]
    async fn test_update_of_someone_else_is_refused() {
        let h = harness(MockTransport::new());
        let (bob, _) = seed(&h).await;

        let outcome = dispatch(
            &h,
            json!({
                "type": "Update",
                "actor": ALICE,
                "object": { "id": "https://remote.example/users/mallory", "type": "Person" },
            }),
            &bob,
        )
        .await;
        assert!(matches!(outcome, HandlerOutcome::Skipped(SkipReason::NotOwner)));
    }

    #[tokio::test]
    async fn test_add_features_own_post() {
        let h = harness(MockTransport::new());
        let (bob, alice) = seed(&h).await;
        let mut post = Post::new(alice.id.clone(), "pin me");
        post.remote_post_id = Some("https://remote.example/notes/30".to_string());
        let post = h.store.insert_post(post).await.unwrap();

        let outcome = dispatch(
            &h,
            json!({
                "type": "Add",
                "actor": ALICE,
                "object": "https://remote.example/notes/30",
                "target": "https://remote.example/users/alice/collections/featured",
            }),
            &bob,
        )
        .await;

        assert!(matches!(outcome, HandlerOutcome::Applied));
        assert!(h.store.get_post(&post.id).await.unwrap().unwrap().featured);
    }

    #[tokio::test]
    async fn test_emoji_react_creates_emoji_and_reaction() {
        let h = harness(MockTransport::new());
        let (bob, alice) = seed(&h).await;
        let post = h.store.insert_post(Post::new(bob.id.clone(), "react to me")).await.unwrap();

        let outcome = dispatch(
            &h,
            json!({
                "id": "https://remote.example/reactions/1",
                "type": "EmojiReact",
                "actor": ALICE,
                "object": h.ctx.local_post_url(&post.id),
                "content": ":blobcat:",
                "tag": [{
                    "type": "Emoji",
                    "id": "https://remote.example/emojis/blobcat",
                    "name": ":blobcat:",
                    "icon": { "url": "https://remote.example/files/blobcat.png" }
                }],
            }),
            &bob,
        )
        .await;

        assert!(matches!(outcome, HandlerOutcome::Applied));
        let emoji = h
            .store
            .find_emoji_by_remote_id("https://remote.example/emojis/blobcat")
            .await
            .unwrap()
            .unwrap();
        let reaction = h
            .store
            .find_reaction_by_remote_id("https://remote.example/reactions/1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reaction.user_id, alice.id);
        assert_eq!(reaction.post_id, post.id);
        assert_eq!(reaction.emoji_id.as_deref(), Some(emoji.id.as_str()));
        assert_eq!(reaction.content, ":blobcat:");
    }

    #[tokio::test]
    async fn test_undo_follow_removes_edge() {
        let h = harness(MockTransport::new());
        let (bob, alice) = seed(&h).await;
        h.store
            .insert_follow(Follow {
                id: new_id(),
                follower_id: alice.id.clone(),
                followed_id: bob.id.clone(),
                accepted: true,
                remote_follow_id: Some("https://remote.example/follows/5".to_string()),
                created_at: Utc::now(),
            })
            .await
            .unwrap();

        let outcome = dispatch(
            &h,
            json!({
                "type": "Undo",
                "actor": ALICE,
                "object": { "type": "Follow", "id": "https://remote.example/follows/5" },
            }),
            &bob,
        )
        .await;

        assert!(matches!(outcome, HandlerOutcome::Applied));
        assert!(h.store.find_follow(&alice.id, &bob.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_undo_like_removes_like() {
        let h = harness(MockTransport::new());
        let (bob, alice) = seed(&h).await;
        let post = h.store.insert_post(Post::new(bob.id.clone(), "liked")).await.unwrap();
        h.store
            .insert_like(Like {
                id: new_id(),
                user_id: alice.id.clone(),
                post_id: post.id.clone(),
                remote_id: Some("https://remote.example/likes/5".to_string()),
                created_at: Utc::now(),
            })
            .await
            .unwrap();

        let outcome = dispatch(
            &h,
            json!({
                "type": "Undo",
                "actor": ALICE,
                "object": { "type": "Like", "id": "https://remote.example/likes/5" },
            }),
            &bob,
        )
        .await;

        assert!(matches!(outcome, HandlerOutcome::Applied));
        assert!(h.store.find_like(&alice.id, &post.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_undo_boost_without_replies_removes_it() {
        let h = harness(MockTransport::new());
        let (bob, alice) = seed(&h).await;
        let original = h.store.insert_post(Post::new(bob.id.clone(), "original")).await.unwrap();
        let mut boost = Post::new(alice.id.clone(), "");
        boost.parent_id = Some(original.id.clone());
        boost.remote_post_id = Some("https://remote.example/announces/2".to_string());
        let boost = h.store.insert_post(boost).await.unwrap();

        let outcome = dispatch(
            &h,
            json!({
                "type": "Undo",
                "actor": ALICE,
                "object": { "type": "Announce", "id": "https://remote.example/announces/2" },
            }),
            &bob,
        )
        .await;

        assert!(matches!(outcome, HandlerOutcome::Applied));
        assert!(h.store.get_post(&boost.id).await.unwrap().is_none());
        assert!(h.store.get_post(&original.id).await.unwrap().is_some());
    }
}
