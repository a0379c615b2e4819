//! fedengine binary entry point

use fedengine::federation::FederationWorker;
use fedengine::{AppState, config};
use std::sync::Arc;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Application entry point
///
/// # Setup
/// 1. Load configuration from file and environment
/// 2. Initialize tracing/logging
/// 3. Initialize metrics
/// 4. Initialize AppState
/// 5. Start job workers and background tasks
/// 6. Start HTTP server
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1. Load configuration
    let config = config::AppConfig::load()?;

    // 2. Initialize tracing/logging
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("fedengine={},tower_http=debug", config.logging.level).into());
    if config.logging.format == "json" {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().pretty())
            .init();
    }

    tracing::info!(
        domain = %config.server.domain,
        protocol = %config.server.protocol,
        "Starting fedengine..."
    );

    // 3. Initialize metrics
    fedengine::metrics::init_metrics();

    // 4. Initialize application state
    let state = AppState::new(config.clone()).await?;

    // 5. Start job workers and background tasks
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let workers = state.queue.start_workers(
        Arc::new(FederationWorker::new(state.federation.clone())),
        config.queue.workers,
        shutdown_rx.clone(),
    );
    tracing::info!(workers = workers.len(), "Job workers started");

    if config.federation.refresh_interval_seconds > 0 {
        spawn_refresh_task(state.clone(), shutdown_rx);
    }

    // 6. Start HTTP server
    let app = fedengine::build_router(state.clone());
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("Server listening on {}", addr);
    tracing::info!("Public URL: {}", config.server.base_url());

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutdown signal received");
        })
        .await?;

    let _ = shutdown_tx.send(true);
    state.queue.close().await;
    for worker in workers {
        let _ = worker.await;
    }
    tracing::info!("Job workers stopped");

    Ok(())
}

/// Spawn the periodic full refresh of cached remote actors
fn spawn_refresh_task(state: AppState, mut shutdown: watch::Receiver<bool>) {
    tokio::spawn(async move {
        let interval_secs = state.config.federation.refresh_interval_seconds;
        let chunk_size = state.config.federation.refresh_chunk_size.max(1);
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(interval_secs));

        // Consume the immediate first tick to delay the first refresh by one interval.
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = shutdown.changed() => break,
            }

            tracing::info!("Running scheduled actor refresh...");
            match state.federation.resolver.refresh_all(chunk_size).await {
                Ok(count) => tracing::info!(count, "Actor refresh enqueued"),
                Err(error) => tracing::error!(%error, "Actor refresh failed"),
            }
        }
    });

    tracing::info!("Actor refresh task spawned");
}
