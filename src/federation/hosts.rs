//! Federated host registry
//!
//! Host names are lowercased before every lookup and insert, so one origin
//! maps to one record. Name → id lookups are cached; the record itself is
//! always read from the store so block flags are never stale.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;

use crate::data::{CacheStore, FederatedHost, Store, host_key, new_id};
use crate::error::{AppError, Result};

#[derive(Clone)]
pub struct HostRegistry {
    store: Arc<dyn Store>,
    cache: Arc<dyn CacheStore>,
    ttl: Duration,
}

impl HostRegistry {
    pub fn new(store: Arc<dyn Store>, cache: Arc<dyn CacheStore>, ttl: Duration) -> Self {
        Self { store, cache, ttl }
    }

    /// Registry key of the host serving `url`: lowercased host plus any
    /// explicit port.
    pub fn host_of_url(url: &str) -> Result<String> {
        let parsed = url::Url::parse(url)
            .map_err(|e| AppError::Validation(format!("Invalid URL {}: {}", url, e)))?;
        let host = parsed
            .host_str()
            .ok_or_else(|| AppError::Validation(format!("URL without host: {}", url)))?;
        Ok(match parsed.port() {
            Some(port) => format!("{}:{}", host.to_lowercase(), port),
            None => host.to_lowercase(),
        })
    }

    pub async fn find(&self, name: &str) -> Result<Option<FederatedHost>> {
        let name = name.to_lowercase();
        let key = host_key(&name);

        if let Some(id) = self.cache.get(&key).await {
            if let Some(host) = self.store.get_host(&id).await? {
                return Ok(Some(host));
            }
            self.cache.del(&key).await;
        }

        let host = self.store.find_host_by_name(&name).await?;
        if let Some(host) = &host {
            self.cache.set(&key, host.id.clone(), self.ttl).await;
        }
        Ok(host)
    }

    /// Unknown hosts are not blocked.
    pub async fn is_blocked(&self, name: &str) -> Result<bool> {
        Ok(self.find(name).await?.is_some_and(|host| host.blocked))
    }

    /// Existing record for `name`, or a new one with `shared_inbox`.
    ///
    /// A shared inbox learnt later is filled into an existing record that
    /// had none.
    pub async fn get_or_create(
        &self,
        name: &str,
        shared_inbox: Option<&str>,
    ) -> Result<FederatedHost> {
        if let Some(mut host) = self.find(name).await? {
            if host.public_inbox.is_none() && shared_inbox.is_some() {
                host.public_inbox = shared_inbox.map(str::to_string);
                self.store.update_host(&host).await?;
            }
            return Ok(host);
        }

        let host = self
            .store
            .insert_host(FederatedHost {
                id: new_id(),
                display_name: name.to_lowercase(),
                public_inbox: shared_inbox.map(str::to_string),
                blocked: false,
                created_at: Utc::now(),
            })
            .await?;
        tracing::debug!(host = %host.display_name, "Registered federated host");

        self.cache
            .set(&host_key(&host.display_name), host.id.clone(), self.ttl)
            .await;
        Ok(host)
    }
}
