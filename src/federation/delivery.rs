//! Activity delivery
//!
//! Acknowledgments and per-target deliveries. Nothing here POSTs inline:
//! every payload goes through a `Deliver` job so the queue's retry policy
//! applies to each inbox on its own.

use std::sync::Arc;

use super::activity::Activity;
use super::context::FederationContext;
use super::transport::Transport;
use crate::data::{Actor, Store, new_id};
use crate::error::{AppError, Result};
use crate::metrics::DELIVERIES_TOTAL;
use crate::queue::{
    EnqueueOptions, HandlerOutcome, Job, JobContext, JobQueue, OutboundDeliveryJob, SkipReason,
};

/// Activity delivery service
#[derive(Clone)]
pub struct ActivityDelivery {
    ctx: Arc<FederationContext>,
    store: Arc<dyn Store>,
    queue: Arc<dyn JobQueue>,
    transport: Arc<dyn Transport>,
}

impl ActivityDelivery {
    pub fn new(
        ctx: Arc<FederationContext>,
        store: Arc<dyn Store>,
        queue: Arc<dyn JobQueue>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            ctx,
            store,
            queue,
            transport,
        }
    }

    /// Inbox that reaches `actor`: its own inbox, else its host's shared one.
    pub async fn inbox_of(&self, actor: &Actor) -> Result<Option<String>> {
        let Some(origin) = actor.remote() else {
            return Ok(None);
        };
        if let Some(inbox) = &origin.inbox {
            return Ok(Some(inbox.clone()));
        }
        Ok(self
            .store
            .get_host(&origin.host_id)
            .await?
            .and_then(|host| host.public_inbox))
    }

    /// Queue one POST of `body` to `inbox`, signed as `signer`.
    pub async fn enqueue_delivery(&self, inbox: &str, body: Arc<str>, signer: &Actor) -> Result<()> {
        self.queue
            .enqueue(
                Job::Deliver(OutboundDeliveryJob {
                    inbox: inbox.to_string(),
                    body,
                    signer_id: signer.id.clone(),
                    batch: None,
                }),
                EnqueueOptions::default(),
            )
            .await?;
        Ok(())
    }

    /// Acknowledge `activity` from `remote` with an `Accept` signed by the
    /// local actor that received it.
    pub async fn send_accept(&self, activity: &Activity, remote: &Actor, local: &Actor) -> Result<()> {
        let Some(inbox) = self.inbox_of(remote).await? else {
            tracing::debug!(actor = %activity.actor, "No inbox to acknowledge to");
            return Ok(());
        };

        let accepter = self.ctx.actor_url(local);
        let accept_id = format!("{}/accept/{}", accepter, new_id());
        let body = builder::accept(&accept_id, &accepter, activity.raw.clone());
        let body: Arc<str> = serde_json::to_string(&body)
            .map_err(|e| AppError::Internal(e.into()))?
            .into();

        self.enqueue_delivery(&inbox, body, local).await?;
        tracing::debug!(
            activity_type = activity.type_name(),
            inbox = %inbox,
            "Queued Accept"
        );
        Ok(())
    }

    /// Handle a `Deliver` job.
    pub async fn deliver_one(&self, job: &OutboundDeliveryJob, ctx: &JobContext) -> HandlerOutcome {
        let signer = match self.store.get_actor(&job.signer_id).await {
            Ok(Some(actor)) => actor,
            Ok(None) => return HandlerOutcome::Skipped(SkipReason::TargetMissing),
            Err(error) => return HandlerOutcome::from_error(error),
        };
        let Some(identity) = self.ctx.signer_for(&signer) else {
            tracing::warn!(signer = %job.signer_id, "Delivery signer has no private key");
            return HandlerOutcome::Skipped(SkipReason::Malformed);
        };

        match self.transport.post_signed(&job.inbox, &job.body, &identity).await {
            Ok(()) => {
                DELIVERIES_TOTAL.with_label_values(&["delivered"]).inc();
                if let Some(batch) = &job.batch {
                    ctx.update(batch.record_delivered());
                } else {
                    ctx.update(1.0);
                }
                tracing::debug!(inbox = %job.inbox, "Delivered activity");
                HandlerOutcome::Applied
            }
            Err(error @ (AppError::Forbidden | AppError::Validation(_))) => {
                DELIVERIES_TOTAL.with_label_values(&["rejected"]).inc();
                tracing::debug!(inbox = %job.inbox, error = %error, "Refusing delivery target");
                HandlerOutcome::Skipped(SkipReason::Malformed)
            }
            Err(error) => {
                DELIVERIES_TOTAL.with_label_values(&["failed"]).inc();
                tracing::debug!(
                    inbox = %job.inbox,
                    attempt = ctx.attempt,
                    error = %error,
                    "Delivery failed"
                );
                HandlerOutcome::Retry(error)
            }
        }
    }
}

/// Build ActivityPub activity JSON
pub mod builder {
    use serde_json::Value;

    use crate::data::{Actor, Media, Post, Visibility};
    use crate::federation::activity::PUBLIC_COLLECTION;
    use crate::federation::context::FederationContext;

    const AS_CONTEXT: &str = "https://www.w3.org/ns/activitystreams";

    /// Build a Follow activity
    pub fn follow(id: &str, actor: &str, object: &str) -> Value {
        serde_json::json!({
            "@context": AS_CONTEXT,
            "type": "Follow",
            "id": id,
            "actor": actor,
            "object": object
        })
    }

    /// Build an Accept activity
    ///
    /// # Arguments
    /// * `id` - Activity ID (unique URI)
    /// * `actor` - Actor URI (accepter)
    /// * `object` - Activity being acknowledged, echoed as received
    pub fn accept(id: &str, actor: &str, object: Value) -> Value {
        serde_json::json!({
            "@context": AS_CONTEXT,
            "type": "Accept",
            "id": id,
            "actor": actor,
            "object": object
        })
    }

    /// Build a Create activity
    pub fn create(id: &str, actor: &str, object: Value, to: &[String], cc: &[String]) -> Value {
        serde_json::json!({
            "@context": AS_CONTEXT,
            "type": "Create",
            "id": id,
            "actor": actor,
            "object": object,
            "to": to,
            "cc": cc
        })
    }

    /// Build an Announce activity (boost)
    pub fn announce(
        id: &str,
        actor: &str,
        object: &str,
        published: &str,
        to: &[String],
        cc: &[String],
    ) -> Value {
        serde_json::json!({
            "@context": AS_CONTEXT,
            "type": "Announce",
            "id": id,
            "actor": actor,
            "object": object,
            "published": published,
            "to": to,
            "cc": cc
        })
    }

    /// `to`/`cc` for a post of the given visibility.
    pub fn audience_for_visibility(actor_url: &str, visibility: Visibility) -> (Vec<String>, Vec<String>) {
        let public_audience = PUBLIC_COLLECTION.to_string();
        let followers_audience = format!("{}/followers", actor_url);

        match visibility {
            Visibility::Public => (vec![public_audience], vec![followers_audience]),
            Visibility::FollowersOnly => (vec![followers_audience], Vec::new()),
            Visibility::Direct => (Vec::new(), Vec::new()),
        }
    }

    /// Everything needed to serialize a local post.
    pub struct PostDocument<'a> {
        pub post: &'a Post,
        pub author: &'a Actor,
        /// Public URL of the parent, if any
        pub parent_url: Option<String>,
        pub mentions: &'a [Actor],
        pub media: &'a [Media],
    }

    /// Wire form of a local post: `Announce` for a boost, `Create{Note}`
    /// otherwise. Mentioned actors are added to the audience.
    pub fn post_to_jsonld(ctx: &FederationContext, doc: &PostDocument<'_>) -> Value {
        let actor_url = ctx.actor_url(doc.author);
        let post_url = ctx.local_post_url(&doc.post.id);
        let published = doc.post.created_at.to_rfc3339();

        let (mut to, mut cc) = audience_for_visibility(&actor_url, doc.post.visibility);
        let mention_urls: Vec<String> = doc.mentions.iter().map(|actor| ctx.actor_url(actor)).collect();
        if doc.post.visibility == Visibility::Direct {
            to.extend(mention_urls.iter().cloned());
        } else {
            cc.extend(mention_urls.iter().cloned());
        }

        if doc.post.is_boost() {
            if let Some(parent_url) = &doc.parent_url {
                return announce(
                    &format!("{}/activity", post_url),
                    &actor_url,
                    parent_url,
                    &published,
                    &to,
                    &cc,
                );
            }
        }

        let mut tags: Vec<Value> = doc
            .mentions
            .iter()
            .zip(&mention_urls)
            .map(|(actor, url)| {
                serde_json::json!({ "type": "Mention", "href": url, "name": actor.handle })
            })
            .collect();
        tags.extend(doc.post.tags.iter().map(|tag| {
            serde_json::json!({
                "type": "Hashtag",
                "name": format!("#{}", tag),
                "href": format!("{}/dashboard/search/{}", ctx.base_url, tag)
            })
        }));

        let attachments: Vec<Value> = doc
            .media
            .iter()
            .map(|media| {
                serde_json::json!({
                    "type": "Document",
                    "url": media.url,
                    "name": media.description,
                    "sensitive": media.nsfw
                })
            })
            .collect();

        let note = serde_json::json!({
            "id": post_url,
            "type": "Note",
            "attributedTo": actor_url,
            "summary": doc.post.content_warning,
            "content": doc.post.content,
            "sensitive": !doc.post.content_warning.is_empty(),
            "inReplyTo": doc.parent_url,
            "published": published,
            "url": post_url,
            "to": to,
            "cc": cc,
            "tag": tags,
            "attachment": attachments
        });

        create(&format!("{}/activity", post_url), &actor_url, note, &to, &cc)
    }
}
