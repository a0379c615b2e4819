//! Key-value cache
//!
//! Volatile lookups for resolved actor and host ids plus the follow-list
//! entries that the surrounding API layer reads. Entries carry their own
//! TTL. Uses Moka for high-performance concurrent caching.

use async_trait::async_trait;
use moka::Expiry;
use moka::future::Cache;
use std::time::{Duration, Instant};

use crate::metrics::{CACHE_HITS_TOTAL, CACHE_MISSES_TOTAL, CACHE_SIZE};

/// Cache store used by the resolver, host registry and dispatcher.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Option<String>;

    async fn set(&self, key: &str, value: String, ttl: Duration);

    async fn del(&self, key: &str);
}

// =============================================================================
// Keys
// =============================================================================

/// Local actor id of a cached remote actor, by actor URL
pub fn remote_actor_key(url: &str) -> String {
    format!("actor:remote:{}", url)
}

/// Host id by lowercased host name
pub fn host_key(name: &str) -> String {
    format!("host:{}", name)
}

/// Follow list of a local actor
pub fn follows_full_key(follower_id: &str) -> String {
    format!("follows:full:{}", follower_id)
}

/// Pending follows of a local actor
pub fn follows_pending_key(follower_id: &str) -> String {
    format!("follows:notYetAcceptedFollows:{}", follower_id)
}

// =============================================================================
// Moka implementation
// =============================================================================

#[derive(Clone)]
struct Entry {
    value: String,
    ttl: Duration,
}

struct PerEntryTtl;

impl Expiry<String, Entry> for PerEntryTtl {
    fn expire_after_create(&self, _key: &String, value: &Entry, _created_at: Instant) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// Moka-backed [`CacheStore`]
pub struct MokaCacheStore {
    entries: Cache<String, Entry>,
}

impl MokaCacheStore {
    /// Create new cache
    ///
    /// # Arguments
    /// * `max_capacity` - Maximum number of entries before eviction
    pub fn new(max_capacity: u64) -> Self {
        let entries = Cache::builder()
            .max_capacity(max_capacity)
            .expire_after(PerEntryTtl)
            .build();

        Self { entries }
    }
}

#[async_trait]
impl CacheStore for MokaCacheStore {
    async fn get(&self, key: &str) -> Option<String> {
        let result = self.entries.get(key).await;

        if result.is_some() {
            CACHE_HITS_TOTAL.with_label_values(&["federation"]).inc();
        } else {
            CACHE_MISSES_TOTAL.with_label_values(&["federation"]).inc();
        }

        result.map(|entry| entry.value)
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) {
        self.entries
            .insert(key.to_string(), Entry { value, ttl })
            .await;

        CACHE_SIZE
            .with_label_values(&["federation"])
            .set(self.entries.entry_count() as i64);
    }

    async fn del(&self, key: &str) {
        self.entries.invalidate(key).await;
    }
}
