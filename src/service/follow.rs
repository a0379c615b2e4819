//! Follow service
//!
//! Creates follow edges on behalf of local actors.

use chrono::Utc;
use std::sync::Arc;

use crate::data::{CacheStore, Follow, Store, follows_full_key, follows_pending_key, new_id};
use crate::error::{AppError, Result};
use crate::federation::{ActivityDelivery, FederationContext, builder};

/// Follow service
#[derive(Clone)]
pub struct FollowService {
    ctx: Arc<FederationContext>,
    store: Arc<dyn Store>,
    cache: Arc<dyn CacheStore>,
    delivery: ActivityDelivery,
}

impl FollowService {
    pub fn new(
        ctx: Arc<FederationContext>,
        store: Arc<dyn Store>,
        cache: Arc<dyn CacheStore>,
        delivery: ActivityDelivery,
    ) -> Self {
        Self {
            ctx,
            store,
            cache,
            delivery,
        }
    }

    /// Make local actor `follower_id` follow `followed_id`.
    ///
    /// Local targets are accepted at once unless they approve followers
    /// manually. Remote targets get a signed `Follow` and stay pending until
    /// their `Accept` arrives. An existing edge is returned unchanged.
    pub async fn follow(&self, follower_id: &str, followed_id: &str) -> Result<Follow> {
        let follower = self
            .store
            .get_actor(follower_id)
            .await?
            .ok_or(AppError::NotFound)?;
        if follower.is_remote() {
            return Err(AppError::Validation(
                "Only local actors can follow through this service".to_string(),
            ));
        }
        let followed = self
            .store
            .get_actor(followed_id)
            .await?
            .ok_or(AppError::NotFound)?;
        if followed.banned || self.ctx.is_unreachable(&followed) {
            return Err(AppError::Forbidden);
        }

        if let Some(existing) = self.store.find_follow(follower_id, followed_id).await? {
            return Ok(existing);
        }

        let follow = self
            .store
            .insert_follow(Follow {
                id: new_id(),
                follower_id: follower.id.clone(),
                followed_id: followed.id.clone(),
                accepted: !followed.is_remote() && !followed.manually_accepts_follows,
                remote_follow_id: None,
                created_at: Utc::now(),
            })
            .await?;

        self.cache.del(&follows_full_key(&follower.id)).await;
        self.cache.del(&follows_pending_key(&follower.id)).await;

        if let Some(remote_id) = followed.remote_id() {
            match self.delivery.inbox_of(&followed).await? {
                Some(inbox) => {
                    let activity = builder::follow(
                        &self.ctx.follow_url(&follower.id, &followed.id),
                        &self.ctx.actor_url(&follower),
                        remote_id,
                    );
                    let body = serde_json::to_string(&activity)
                        .map_err(|e| AppError::Internal(e.into()))?;
                    self.delivery
                        .enqueue_delivery(&inbox, body.into(), &follower)
                        .await?;
                }
                None => {
                    tracing::warn!(actor = %remote_id, "Followed actor has no inbox");
                }
            }
        }

        tracing::info!(
            follower = %follower.handle,
            followed = %followed.handle,
            accepted = follow.accepted,
            "Follow created"
        );
        Ok(follow)
    }
}
