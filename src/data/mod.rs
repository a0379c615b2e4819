//! Data layer module
//!
//! Everything the engine persists or caches:
//! - record models
//! - the `Store` persistence interface and its in-memory implementation
//! - the `CacheStore` key-value interface backed by Moka

mod cache;
mod memory;
mod models;
mod store;

pub use cache::{
    CacheStore, MokaCacheStore, follows_full_key, follows_pending_key, host_key, remote_actor_key,
};
pub use memory::MemoryStore;
pub use models::*;
pub use store::Store;
