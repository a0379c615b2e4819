//! Actor removal
//!
//! Purges an actor and everything it owns. Posts other actors replied to
//! stay in their threads: they are redacted and handed to the deleted-actor
//! sentinel instead of being removed.

use std::sync::Arc;

use crate::data::{
    CacheStore, Store, follows_full_key, follows_pending_key, remote_actor_key,
};
use crate::error::{AppError, Result};
use crate::federation::FederationContext;

/// What a removal touched.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RemovalSummary {
    pub posts_deleted: usize,
    pub posts_redacted: usize,
    pub follows: usize,
    pub likes: usize,
    pub reactions: usize,
}

#[derive(Clone)]
pub struct ActorRemoval {
    ctx: Arc<FederationContext>,
    store: Arc<dyn Store>,
    cache: Arc<dyn CacheStore>,
}

impl ActorRemoval {
    pub fn new(
        ctx: Arc<FederationContext>,
        store: Arc<dyn Store>,
        cache: Arc<dyn CacheStore>,
    ) -> Self {
        Self { ctx, store, cache }
    }

    /// Remove the actor with id `actor_id`. Unknown ids are a no-op.
    pub async fn remove(&self, actor_id: &str) -> Result<RemovalSummary> {
        if actor_id == self.ctx.deleted.id || actor_id == self.ctx.admin.id {
            return Err(AppError::Validation(
                "System actors cannot be removed".to_string(),
            ));
        }
        let Some(actor) = self.store.get_actor(actor_id).await? else {
            return Ok(RemovalSummary::default());
        };

        let mut summary = RemovalSummary::default();

        // Deepest posts first so the actor's own reply chains come apart
        // leaf by leaf.
        let mut posts = Vec::new();
        for post in self.store.list_posts_by_user(&actor.id).await? {
            let depth = self.store.ancestors(&post.id).await?.len();
            posts.push((depth, post));
        }
        posts.sort_by(|a, b| b.0.cmp(&a.0));

        for (_, mut post) in posts {
            if self.store.count_children(&post.id).await? > 0 {
                post.redact();
                post.user_id = self.ctx.deleted.id.clone();
                self.store.update_post(&post).await?;
                summary.posts_redacted += 1;
            } else {
                self.store.delete_post(&post.id).await?;
                summary.posts_deleted += 1;
            }
        }

        let followers = self.store.list_followers(&actor.id).await?;
        summary.follows = self.store.delete_follows_involving(&actor.id).await?;
        for follow in followers {
            self.cache.del(&follows_full_key(&follow.follower_id)).await;
            self.cache.del(&follows_pending_key(&follow.follower_id)).await;
        }
        summary.likes = self.store.delete_likes_by_user(&actor.id).await?;
        summary.reactions = self.store.delete_reactions_by_user(&actor.id).await?;

        self.store.delete_actor(&actor.id).await?;
        if let Some(remote_id) = actor.remote_id() {
            self.cache.del(&remote_actor_key(remote_id)).await;
        }

        tracing::info!(
            actor = %actor.handle,
            posts_deleted = summary.posts_deleted,
            posts_redacted = summary.posts_redacted,
            follows = summary.follows,
            "Actor removed"
        );
        Ok(summary)
    }

    /// Remove the remote actor with origin URL `remote_id`, if known.
    pub async fn remove_by_remote_id(&self, remote_id: &str) -> Result<RemovalSummary> {
        match self.store.find_actor_by_remote_id(remote_id).await? {
            Some(actor) => self.remove(&actor.id).await,
            None => Ok(RemovalSummary::default()),
        }
    }
}
