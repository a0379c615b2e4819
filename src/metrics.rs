//! Prometheus metrics registry and instruments.
//!
//! This module is framework-agnostic and can be used from any layer.

use lazy_static::lazy_static;
use prometheus::{HistogramOpts, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry};

lazy_static! {
    /// Global Prometheus registry
    pub static ref REGISTRY: Registry = Registry::new();

    // Inbox boundary
    pub static ref HTTP_REQUESTS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("fedengine_http_requests_total", "Total number of HTTP requests"),
        &["method", "endpoint", "status"]
    ).expect("metric can be created");
    pub static ref FEDERATION_REQUEST_DURATION_SECONDS: prometheus::HistogramVec = prometheus::HistogramVec::new(
        HistogramOpts::new(
            "fedengine_federation_request_duration_seconds",
            "Federation request duration in seconds"
        ).buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
        &["direction"]
    ).expect("metric can be created");

    // Dispatcher
    pub static ref ACTIVITIES_RECEIVED: IntCounterVec = IntCounterVec::new(
        Opts::new("fedengine_activities_received_total", "Inbound activities consumed by the dispatcher"),
        &["activity_type"]
    ).expect("metric can be created");
    pub static ref ACTIVITIES_SKIPPED: IntCounterVec = IntCounterVec::new(
        Opts::new("fedengine_activities_skipped_total", "Inbound activities dropped without mutation"),
        &["reason"]
    ).expect("metric can be created");

    // Resolver
    pub static ref ACTOR_REFRESH_ENQUEUED: IntCounterVec = IntCounterVec::new(
        Opts::new("fedengine_actor_refresh_enqueued_total", "Actor refresh jobs requested"),
        &["outcome"]
    ).expect("metric can be created");
    pub static ref REMOTE_ACTORS_CREATED: prometheus::IntCounter = prometheus::IntCounter::new(
        "fedengine_remote_actors_created_total",
        "Remote actors created on first contact"
    ).expect("metric can be created");

    // Fan-out
    pub static ref DELIVERIES_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("fedengine_deliveries_total", "Outbound delivery attempts"),
        &["status"]
    ).expect("metric can be created");
    pub static ref FANOUT_TARGETS: IntGauge = IntGauge::new(
        "fedengine_fanout_last_target_count",
        "Number of targets computed for the most recent fan-out"
    ).expect("metric can be created");

    // Queue
    pub static ref JOBS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("fedengine_jobs_total", "Jobs processed by the worker pool"),
        &["job_type", "outcome"]
    ).expect("metric can be created");
    pub static ref QUEUE_DEPTH: IntGauge = IntGauge::new(
        "fedengine_queue_depth",
        "Jobs waiting in the queue"
    ).expect("metric can be created");

    // Cache
    pub static ref CACHE_HITS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("fedengine_cache_hits_total", "Total number of cache hits"),
        &["cache_name"]
    ).expect("metric can be created");
    pub static ref CACHE_MISSES_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("fedengine_cache_misses_total", "Total number of cache misses"),
        &["cache_name"]
    ).expect("metric can be created");
    pub static ref CACHE_SIZE: IntGaugeVec = IntGaugeVec::new(
        Opts::new("fedengine_cache_size", "Current number of items in cache"),
        &["cache_name"]
    ).expect("metric can be created");

    // Errors
    pub static ref ERRORS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("fedengine_errors_total", "Total number of errors returned at the boundary"),
        &["error_type"]
    ).expect("metric can be created");
}

/// Initialize metrics registry.
pub fn init_metrics() {
    REGISTRY
        .register(Box::new(HTTP_REQUESTS_TOTAL.clone()))
        .expect("HTTP_REQUESTS_TOTAL can be registered");
    REGISTRY
        .register(Box::new(FEDERATION_REQUEST_DURATION_SECONDS.clone()))
        .expect("FEDERATION_REQUEST_DURATION_SECONDS can be registered");
    REGISTRY
        .register(Box::new(ACTIVITIES_RECEIVED.clone()))
        .expect("ACTIVITIES_RECEIVED can be registered");
    REGISTRY
        .register(Box::new(ACTIVITIES_SKIPPED.clone()))
        .expect("ACTIVITIES_SKIPPED can be registered");
    REGISTRY
        .register(Box::new(ACTOR_REFRESH_ENQUEUED.clone()))
        .expect("ACTOR_REFRESH_ENQUEUED can be registered");
    REGISTRY
        .register(Box::new(REMOTE_ACTORS_CREATED.clone()))
        .expect("REMOTE_ACTORS_CREATED can be registered");
    REGISTRY
        .register(Box::new(DELIVERIES_TOTAL.clone()))
        .expect("DELIVERIES_TOTAL can be registered");
    REGISTRY
        .register(Box::new(FANOUT_TARGETS.clone()))
        .expect("FANOUT_TARGETS can be registered");
    REGISTRY
        .register(Box::new(JOBS_TOTAL.clone()))
        .expect("JOBS_TOTAL can be registered");
    REGISTRY
        .register(Box::new(QUEUE_DEPTH.clone()))
        .expect("QUEUE_DEPTH can be registered");
    REGISTRY
        .register(Box::new(CACHE_HITS_TOTAL.clone()))
        .expect("CACHE_HITS_TOTAL can be registered");
    REGISTRY
        .register(Box::new(CACHE_MISSES_TOTAL.clone()))
        .expect("CACHE_MISSES_TOTAL can be registered");
    REGISTRY
        .register(Box::new(CACHE_SIZE.clone()))
        .expect("CACHE_SIZE can be registered");
    REGISTRY
        .register(Box::new(ERRORS_TOTAL.clone()))
        .expect("ERRORS_TOTAL can be registered");

    tracing::info!("Metrics registry initialized");
}
