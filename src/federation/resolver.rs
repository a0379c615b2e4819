//! Remote actor resolver
//!
//! Maps an actor URL to a stored actor. Local URLs are answered from the
//! store. Remote actors are created on first contact from their signed
//! actor document, and refreshed in the background once they are older than
//! the staleness window. Unreachable, banned and blocked identities resolve
//! to the deleted-actor sentinel.

use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;

use super::activity::str_field;
use super::context::FederationContext;
use super::emoji::{emoji_tags, import_emojis};
use super::hosts::HostRegistry;
use super::transport::Transport;
use crate::data::{Actor, ActorKind, CacheStore, RemoteOrigin, Store, new_id, remote_actor_key};
use crate::error::{AppError, Result};
use crate::metrics::{ACTOR_REFRESH_ENQUEUED, REMOTE_ACTORS_CREATED};
use crate::queue::{
    ActorRefreshJob, EnqueueOptions, EnqueueOutcome, HandlerOutcome, Job, JobQueue, SkipReason,
};

/// Per-call knobs of [`ActorResolver::resolve_with`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ResolveOptions {
    /// Recursion level of the caller; resolution stops at the configured bound
    pub depth: u32,
    /// Enqueue a refresh even when the cached actor is fresh
    pub force_refresh: bool,
}

#[derive(Clone)]
pub struct ActorResolver {
    ctx: Arc<FederationContext>,
    store: Arc<dyn Store>,
    cache: Arc<dyn CacheStore>,
    hosts: HostRegistry,
    transport: Arc<dyn Transport>,
    queue: Arc<dyn JobQueue>,
}

impl ActorResolver {
    pub fn new(
        ctx: Arc<FederationContext>,
        store: Arc<dyn Store>,
        cache: Arc<dyn CacheStore>,
        hosts: HostRegistry,
        transport: Arc<dyn Transport>,
        queue: Arc<dyn JobQueue>,
    ) -> Self {
        Self {
            ctx,
            store,
            cache,
            hosts,
            transport,
            queue,
        }
    }

    pub async fn resolve(&self, url: &str, asking: &Actor) -> Result<Actor> {
        self.resolve_with(url, asking, ResolveOptions::default())
            .await
    }

    /// Resolve `url` on behalf of `asking`.
    ///
    /// Only local infrastructure errors are returned; anything wrong on the
    /// remote side yields the sentinel.
    pub async fn resolve_with(
        &self,
        url: &str,
        asking: &Actor,
        options: ResolveOptions,
    ) -> Result<Actor> {
        if self.ctx.is_local_url(url) {
            return self.resolve_local(url).await;
        }

        if options.depth >= self.ctx.max_resolve_depth {
            tracing::debug!(actor = %url, depth = options.depth, "Resolution depth exceeded");
            return Ok(self.ctx.deleted.clone());
        }

        let host_name = match HostRegistry::host_of_url(url) {
            Ok(host_name) => host_name,
            Err(error) => {
                tracing::debug!(actor = %url, error = %error, "Unresolvable actor URL");
                return Ok(self.ctx.deleted.clone());
            }
        };
        if self.hosts.is_blocked(&host_name).await? {
            return Ok(self.ctx.deleted.clone());
        }

        let actor = match self.find_cached(url).await? {
            Some(actor) => {
                let stale = Utc::now() - actor.updated_at > self.ctx.staleness;
                if stale || options.force_refresh {
                    self.enqueue_refresh(url, asking).await;
                }
                actor
            }
            None => match self.fetch_and_create(url, asking, &host_name).await {
                Ok(actor) => actor,
                Err(error) if error.is_retryable() => return Err(error),
                Err(error) => {
                    tracing::trace!(actor = %url, error = %error, "Error fetching actor");
                    return Ok(self.ctx.deleted.clone());
                }
            },
        };

        if actor.banned {
            return Ok(self.ctx.deleted.clone());
        }
        Ok(actor)
    }

    /// Case-insensitive lookup of a local actor URL.
    async fn resolve_local(&self, url: &str) -> Result<Actor> {
        let actor = match self.ctx.local_handle(url) {
            Some(handle) => self.store.find_local_actor_by_handle(handle).await?,
            None => None,
        };
        Ok(actor
            .filter(|actor| !actor.banned)
            .unwrap_or_else(|| self.ctx.deleted.clone()))
    }

    async fn find_cached(&self, url: &str) -> Result<Option<Actor>> {
        let key = remote_actor_key(url);
        if let Some(id) = self.cache.get(&key).await {
            if let Some(actor) = self.store.get_actor(&id).await? {
                return Ok(Some(actor));
            }
            self.cache.del(&key).await;
        }

        let actor = self.store.find_actor_by_remote_id(url).await?;
        if let Some(actor) = &actor {
            self.cache.set(&key, actor.id.clone(), self.ctx.cache_ttl).await;
        }
        Ok(actor)
    }

    /// Fire-and-forget refresh keyed by the actor URL.
    pub async fn enqueue_refresh(&self, url: &str, asking: &Actor) {
        let job = Job::RefreshActor(ActorRefreshJob {
            actor_url: url.to_string(),
            asking_actor_id: asking.id.clone(),
        });
        match self.queue.enqueue(job, EnqueueOptions::keyed(url)).await {
            Ok(EnqueueOutcome::Queued) => {
                ACTOR_REFRESH_ENQUEUED.with_label_values(&["queued"]).inc();
            }
            Ok(EnqueueOutcome::Coalesced) => {
                ACTOR_REFRESH_ENQUEUED.with_label_values(&["coalesced"]).inc();
            }
            Err(error) => {
                tracing::warn!(actor = %url, error = %error, "Failed to enqueue actor refresh");
            }
        }
    }

    async fn fetch_and_create(&self, url: &str, asking: &Actor, host_name: &str) -> Result<Actor> {
        let document = self
            .transport
            .fetch_json(url, &self.ctx.fetch_signer(asking)?)
            .await?;

        let shared_inbox = document
            .get("endpoints")
            .and_then(|endpoints| str_field(endpoints, "sharedInbox"));
        let host = self
            .hosts
            .get_or_create(host_name, shared_inbox.as_deref())
            .await?;

        let preferred_username = str_field(&document, "preferredUsername")
            .ok_or_else(|| AppError::Federation(format!("Actor {} has no preferredUsername", url)))?;

        let now = Utc::now();
        let mut actor = Actor {
            id: new_id(),
            handle: format!("@{}@{}", preferred_username, host_name),
            display_name: String::new(),
            description: String::new(),
            avatar_url: String::new(),
            header_url: None,
            public_key_pem: String::new(),
            kind: ActorKind::Remote(RemoteOrigin {
                remote_id: url.to_string(),
                inbox: None,
                host_id: host.id.clone(),
            }),
            banned: false,
            manually_accepts_follows: false,
            created_at: now,
            updated_at: now,
        };
        self.apply_document(&mut actor, &document)?;

        let actor = self.store.insert_actor(actor).await?;
        REMOTE_ACTORS_CREATED.inc();
        tracing::debug!(actor = %url, handle = %actor.handle, "Created remote actor");

        self.cache
            .set(&remote_actor_key(url), actor.id.clone(), self.ctx.cache_ttl)
            .await;
        self.spawn_emoji_import(&document);
        Ok(actor)
    }

    /// Copy profile fields of an actor document onto `actor`.
    fn apply_document(&self, actor: &mut Actor, document: &Value) -> Result<()> {
        let public_key_pem = document
            .get("publicKey")
            .and_then(|key| str_field(key, "publicKeyPem"))
            .ok_or_else(|| {
                AppError::Federation(format!(
                    "Actor {} has no public key",
                    actor.remote_id().unwrap_or_default()
                ))
            })?;

        actor.public_key_pem = public_key_pem;
        actor.display_name = str_field(document, "name").unwrap_or_default();
        actor.description = str_field(document, "summary")
            .map(|summary| ammonia::clean(&summary))
            .unwrap_or_default();
        actor.avatar_url = document
            .get("icon")
            .and_then(|icon| str_field(icon, "url"))
            .unwrap_or_else(|| self.ctx.default_avatar_url());
        actor.header_url = document.get("image").and_then(|image| str_field(image, "url"));
        actor.manually_accepts_follows = document
            .get("manuallyApprovesFollowers")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        if let ActorKind::Remote(origin) = &mut actor.kind {
            origin.inbox = str_field(document, "inbox");
        }
        actor.updated_at = Utc::now();
        Ok(())
    }

    fn spawn_emoji_import(&self, document: &Value) {
        let tags = emoji_tags(document);
        if tags.is_empty() {
            return;
        }
        let store = Arc::clone(&self.store);
        tokio::spawn(async move {
            import_emojis(store.as_ref(), &tags).await;
        });
    }

    /// Handle a refresh job: re-fetch the document and overwrite the cached
    /// profile, creating the actor if it disappeared meanwhile.
    pub async fn refresh_actor(&self, job: &ActorRefreshJob) -> Result<HandlerOutcome> {
        let host_name = HostRegistry::host_of_url(&job.actor_url)?;
        if self.hosts.is_blocked(&host_name).await? {
            return Ok(HandlerOutcome::Skipped(SkipReason::HostBlocked));
        }

        let asking = self
            .store
            .get_actor(&job.asking_actor_id)
            .await?
            .unwrap_or_else(|| self.ctx.admin.clone());

        let Some(mut actor) = self.store.find_actor_by_remote_id(&job.actor_url).await? else {
            self.fetch_and_create(&job.actor_url, &asking, &host_name)
                .await?;
            return Ok(HandlerOutcome::Applied);
        };

        let document = self
            .transport
            .fetch_json(&job.actor_url, &self.ctx.fetch_signer(&asking)?)
            .await?;
        self.apply_document(&mut actor, &document)?;
        self.store.update_actor(&actor).await?;

        if let Some(shared_inbox) = document
            .get("endpoints")
            .and_then(|endpoints| str_field(endpoints, "sharedInbox"))
        {
            self.hosts
                .get_or_create(&host_name, Some(&shared_inbox))
                .await?;
        }
        self.spawn_emoji_import(&document);

        tracing::debug!(actor = %job.actor_url, "Refreshed remote actor");
        Ok(HandlerOutcome::Applied)
    }

    /// Enqueue a forced refresh of every non-banned remote actor on a
    /// non-blocked host, `chunk_size` enqueues at a time.
    pub async fn refresh_all(&self, chunk_size: usize) -> Result<usize> {
        let mut blocked_hosts = std::collections::HashSet::new();
        for host in self.store.list_hosts().await? {
            if host.blocked {
                blocked_hosts.insert(host.id);
            }
        }

        let actors: Vec<Actor> = self
            .store
            .list_remote_actors()
            .await?
            .into_iter()
            .filter(|actor| !actor.banned)
            .filter(|actor| actor.host_id().is_some_and(|host| !blocked_hosts.contains(host)))
            .collect();

        tracing::info!(actors = actors.len(), "Refreshing all remote actors");
        for chunk in actors.chunks(chunk_size.max(1)) {
            let enqueues = chunk.iter().filter_map(|actor| {
                actor
                    .remote_id()
                    .map(|url| self.enqueue_refresh(url, &self.ctx.admin))
            });
            futures::future::join_all(enqueues).await;
        }
        Ok(actors.len())
    }
}
