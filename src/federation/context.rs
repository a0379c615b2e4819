//! Federation context
//!
//! Instance-wide values resolved once at startup and handed to every
//! component: URL layout, the admin actor used for signed fetches and the
//! sentinel actor returned for unreachable identities.

use chrono::Utc;
use std::time::Duration;

use super::signature::generate_keypair;
use super::transport::SigningIdentity;
use crate::config::AppConfig;
use crate::data::{Actor, ActorKind, Store, new_id};
use crate::error::{AppError, Result};

const BLOG_PATH: &str = "/fediverse/blog/";
const POST_PATH: &str = "/fediverse/post/";
const FOLLOWS_PATH: &str = "/fediverse/follows/";

#[derive(Debug, Clone)]
pub struct FederationContext {
    /// e.g. "https://social.example.com"
    pub base_url: String,
    pub domain: String,
    pub media_url: String,
    /// Signs fetches that are not made on behalf of a specific user
    pub admin: Actor,
    /// Stand-in for actors that are unreachable, banned or gone
    pub deleted: Actor,
    /// Age after which a cached remote actor is refreshed
    pub staleness: chrono::Duration,
    pub max_resolve_depth: u32,
    /// TTL of cached actor/host id lookups
    pub cache_ttl: Duration,
}

impl FederationContext {
    pub fn new(config: &AppConfig, admin: Actor, deleted: Actor) -> Self {
        Self {
            base_url: config.server.base_url(),
            domain: config.server.domain.clone(),
            media_url: config.instance.media_url.trim_end_matches('/').to_string(),
            admin,
            deleted,
            staleness: chrono::Duration::hours(config.federation.actor_staleness_hours),
            max_resolve_depth: config.federation.max_resolve_depth,
            cache_ttl: Duration::from_secs(config.cache.ttl_seconds),
        }
    }

    // =========================================================================
    // URL layout
    // =========================================================================

    /// Public id of an actor: derived for local actors, stored for remote ones.
    pub fn actor_url(&self, actor: &Actor) -> String {
        match &actor.kind {
            ActorKind::Local { .. } => format!(
                "{}{}{}",
                self.base_url,
                BLOG_PATH,
                actor.handle.to_lowercase()
            ),
            ActorKind::Remote(origin) => origin.remote_id.clone(),
        }
    }

    pub fn followers_url(&self, actor: &Actor) -> String {
        format!("{}/followers", self.actor_url(actor))
    }

    pub fn local_post_url(&self, post_id: &str) -> String {
        format!("{}{}{}", self.base_url, POST_PATH, post_id)
    }

    /// Id of the Follow activity sent for a local follow edge.
    pub fn follow_url(&self, follower_id: &str, followed_id: &str) -> String {
        format!(
            "{}{}{}/{}",
            self.base_url, FOLLOWS_PATH, follower_id, followed_id
        )
    }

    pub fn is_local_url(&self, url: &str) -> bool {
        match url.strip_prefix(self.base_url.as_str()) {
            Some(rest) => rest.is_empty() || rest.starts_with(['/', '#', '?']),
            None => false,
        }
    }

    /// Handle part of a local actor URL.
    pub fn local_handle<'a>(&self, url: &'a str) -> Option<&'a str> {
        self.strip(url, BLOG_PATH)
            .map(|rest| rest.split(['/', '#', '?']).next().unwrap_or(rest))
            .filter(|handle| !handle.is_empty())
    }

    /// Post id part of a local post URL.
    pub fn local_post_id<'a>(&self, url: &'a str) -> Option<&'a str> {
        self.strip(url, POST_PATH)
            .filter(|id| !id.is_empty() && !id.contains('/'))
    }

    /// (follower id, followed id) encoded in a local Follow activity id.
    pub fn decode_follow_url<'a>(&self, url: &'a str) -> Option<(&'a str, &'a str)> {
        let rest = self.strip(url, FOLLOWS_PATH)?;
        let mut parts = rest.split('/');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(follower), Some(followed), None) if !follower.is_empty() && !followed.is_empty() => {
                Some((follower, followed))
            }
            _ => None,
        }
    }

    fn strip<'a>(&self, url: &'a str, path: &str) -> Option<&'a str> {
        url.strip_prefix(self.base_url.as_str())?.strip_prefix(path)
    }

    pub fn default_avatar_url(&self) -> String {
        format!("{}/uploads/default.webp", self.media_url)
    }

    // =========================================================================
    // Identities
    // =========================================================================

    pub fn is_unreachable(&self, actor: &Actor) -> bool {
        actor.id == self.deleted.id
    }

    /// Signing material for a local actor; `None` for remote actors.
    pub fn signer_for(&self, actor: &Actor) -> Option<SigningIdentity> {
        actor.private_key_pem().map(|private_key_pem| SigningIdentity {
            key_id: format!("{}#main-key", self.actor_url(actor)),
            private_key_pem: private_key_pem.to_string(),
        })
    }

    pub fn admin_signer(&self) -> Result<SigningIdentity> {
        self.signer_for(&self.admin)
            .ok_or_else(|| AppError::Config("admin actor has no private key".to_string()))
    }

    /// Key used to fetch documents on behalf of `asking`; falls back to the
    /// admin actor for remote askers and the sentinel.
    pub fn fetch_signer(&self, asking: &Actor) -> Result<SigningIdentity> {
        match self.signer_for(asking) {
            Some(signer) if !self.is_unreachable(asking) => Ok(signer),
            _ => self.admin_signer(),
        }
    }
}

/// Load or create the admin and deleted-actor sentinel and build the
/// context around them.
pub async fn ensure_system_actors(store: &dyn Store, config: &AppConfig) -> Result<FederationContext> {
    let admin = ensure_local_actor(
        store,
        &config.instance.admin_handle,
        "Instance actor",
        config.instance.key_bits,
    )
    .await?;
    let deleted = ensure_local_actor(
        store,
        &config.instance.deleted_handle,
        "Deleted user",
        config.instance.key_bits,
    )
    .await?;

    tracing::info!(admin = %admin.id, deleted = %deleted.id, "System actors ready");
    Ok(FederationContext::new(config, admin, deleted))
}

/// Find a local actor by handle or create it with a fresh keypair.
pub async fn ensure_local_actor(
    store: &dyn Store,
    handle: &str,
    display_name: &str,
    key_bits: usize,
) -> Result<Actor> {
    if let Some(existing) = store.find_local_actor_by_handle(handle).await? {
        return Ok(existing);
    }

    tracing::info!(handle, "Creating local actor...");
    let (private_key_pem, public_key_pem) =
        tokio::task::spawn_blocking(move || generate_keypair(key_bits))
            .await
            .map_err(|e| AppError::Internal(anyhow::anyhow!("Key generation task failed: {}", e)))??;

    let now = Utc::now();
    store
        .insert_actor(Actor {
            id: new_id(),
            handle: handle.to_string(),
            display_name: display_name.to_string(),
            description: String::new(),
            avatar_url: String::new(),
            header_url: None,
            public_key_pem,
            kind: ActorKind::Local { private_key_pem },
            banned: false,
            manually_accepts_follows: false,
            created_at: now,
            updated_at: now,
        })
        .await
}
