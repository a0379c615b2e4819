//! fedengine - the federation engine of an ActivityPub service
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      API Layer (Axum)                        │
//! │  - Signed inbox endpoints                                   │
//! │  - Metrics / health                                         │
//! └─────────────────────────────────────────────────────────────┘
//!                              │ Inbound jobs
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Job Queue / Workers                       │
//! │  - Inbound dispatch, actor refresh, fan-out, delivery       │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//! ┌─────────────────────────────────────────────────────────────┐
//! │               Federation / Service Layer                     │
//! │  - Actor resolution, thread resolution, signatures          │
//! │  - Follows, actor removal                                   │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Data Layer                              │
//! │  - Store trait (in-memory implementation)                   │
//! │  - Moka id cache                                            │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - `api`: HTTP handlers for inboxes and operations
//! - `queue`: Job types, retry policy and worker pool
//! - `federation`: ActivityPub federation handling
//! - `service`: Follow and removal operations
//! - `data`: Persistence interface and cache
//! - `config`: Configuration management
//! - `error`: Error types

pub mod api;
pub mod config;
pub mod data;
pub mod error;
pub mod federation;
pub mod metrics;
pub mod queue;
pub mod service;

#[cfg(test)]
pub(crate) mod testing;

use std::sync::Arc;
use std::time::Duration;

use data::{CacheStore, MemoryStore, MokaCacheStore, Store};
use federation::{Federation, HttpTransport, PayloadSigner, RsaSignature2017, Transport};
use queue::{MemoryJobQueue, RetryPolicy};

/// Largest inbound activity accepted by the inboxes.
const MAX_ACTIVITY_BYTES: usize = 1024 * 1024;

/// Application state shared across all handlers and workers
#[derive(Clone)]
pub struct AppState {
    /// Application configuration
    pub config: Arc<config::AppConfig>,

    /// Persistence
    pub store: Arc<dyn Store>,

    /// Actor/host id cache
    pub cache: Arc<dyn CacheStore>,

    /// Job queue shared by the inbox and the workers
    pub queue: Arc<MemoryJobQueue>,

    /// Federation components
    pub federation: Arc<Federation>,
}

impl AppState {
    /// Initialize application state
    ///
    /// # Steps
    /// 1. Open the store
    /// 2. Ensure the instance and deleted-user actors exist
    /// 3. Build the HTTP transport
    /// 4. Wire the federation components
    ///
    /// # Errors
    /// Returns error if any initialization step fails
    pub async fn new(config: config::AppConfig) -> Result<Self, error::AppError> {
        tracing::info!("Initializing application state...");

        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let transport: Arc<dyn Transport> = Arc::new(HttpTransport::new(&config.federation)?);

        let state = Self::with_parts(config, store, transport, Arc::new(RsaSignature2017)).await?;
        tracing::info!("Application state initialized successfully");
        Ok(state)
    }

    /// Build the state around an existing store, transport and signer.
    pub async fn with_parts(
        config: config::AppConfig,
        store: Arc<dyn Store>,
        transport: Arc<dyn Transport>,
        signer: Arc<dyn PayloadSigner>,
    ) -> Result<Self, error::AppError> {
        let ctx = federation::ensure_system_actors(store.as_ref(), &config).await?;

        let cache: Arc<dyn CacheStore> = Arc::new(MokaCacheStore::new(config.cache.max_capacity));
        let queue = Arc::new(MemoryJobQueue::new(
            RetryPolicy {
                max_attempts: config.queue.max_attempts,
                base_backoff: Duration::from_secs(config.queue.base_backoff_seconds),
                max_backoff: Duration::from_secs(config.queue.max_backoff_seconds),
            },
            config.queue.keep_failed,
        ));
        let federation = Federation::new(
            Arc::new(ctx),
            store.clone(),
            cache.clone(),
            queue.clone(),
            transport,
            signer,
        );

        Ok(Self {
            config: Arc::new(config),
            store,
            cache,
            queue,
            federation: Arc::new(federation),
        })
    }
}

/// Build the Axum router with all routes.
///
/// This is shared by the binary and integration tests to keep route
/// composition consistent across environments.
pub fn build_router(state: AppState) -> axum::Router {
    use axum::Router;
    use tower_http::{limit::RequestBodyLimitLayer, trace::TraceLayer};

    Router::new()
        .merge(api::inbox_router())
        .merge(api::operations_router())
        .layer(RequestBodyLimitLayer::new(MAX_ACTIVITY_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
