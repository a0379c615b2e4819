//! Configuration management
//!
//! Loads configuration from:
//! 1. Default values
//! 2. Configuration file (config/default.toml, config/local.toml)
//! 3. Environment variables (override)

use serde::Deserialize;
use std::net::IpAddr;

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub instance: InstanceConfig,
    pub federation: FederationConfig,
    pub queue: QueueConfig,
    pub cache: CacheConfig,
    pub logging: LoggingConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0")
    pub host: String,
    /// Port number (e.g., 8080)
    pub port: u16,
    /// Public domain (e.g., "social.example.com")
    pub domain: String,
    /// Protocol ("http" or "https")
    pub protocol: String,
}

impl ServerConfig {
    /// Get the base URL for the instance
    ///
    /// # Returns
    /// Full URL like "https://social.example.com"
    pub fn base_url(&self) -> String {
        format!("{}://{}", self.protocol, self.domain)
    }
}

/// Instance-wide identities and media
#[derive(Debug, Clone, Deserialize)]
pub struct InstanceConfig {
    /// Base URL for uploaded media, used for the default avatar
    pub media_url: String,
    /// Handle of the instance actor used for signed fetches
    #[serde(default = "default_admin_handle")]
    pub admin_handle: String,
    /// Handle of the sentinel actor returned for unreachable identities
    #[serde(default = "default_deleted_handle")]
    pub deleted_handle: String,
    /// RSA modulus size for generated actor keys
    #[serde(default = "default_key_bits")]
    pub key_bits: usize,
}

fn default_key_bits() -> usize {
    2048
}

fn default_admin_handle() -> String {
    "admin".to_string()
}

fn default_deleted_handle() -> String {
    "deleted_user".to_string()
}

/// Federation behaviour
#[derive(Debug, Clone, Deserialize)]
pub struct FederationConfig {
    /// Age after which a cached remote actor is refreshed in the background
    pub actor_staleness_hours: i64,
    /// Recursion bound for actor and thread resolution
    pub max_resolve_depth: u32,
    /// Timeout for outbound HTTP requests
    pub request_timeout_seconds: u64,
    /// User agent sent on outbound requests
    pub user_agent: String,
    /// Interval of the full remote actor refresh (0 disables it)
    pub refresh_interval_seconds: u64,
    /// Actors refreshed per batch during a full refresh
    pub refresh_chunk_size: usize,
}

/// Job queue behaviour
#[derive(Debug, Clone, Deserialize)]
pub struct QueueConfig {
    /// Number of concurrent workers
    pub workers: usize,
    /// Attempts before a retryable job is marked failed
    pub max_attempts: u32,
    /// First retry delay in seconds, doubled on every attempt
    pub base_backoff_seconds: u64,
    /// Upper bound of the retry delay
    pub max_backoff_seconds: u64,
    /// Failed job records kept for inspection
    pub keep_failed: usize,
}

/// Cache configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    /// Maximum number of cached entries
    pub max_capacity: u64,
    /// TTL for actor/host id lookups
    pub ttl_seconds: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    pub level: String,
    /// Log format: "pretty" or "json"
    pub format: String,
}

impl AppConfig {
    /// Load configuration from file and environment
    ///
    /// # Loading Order
    /// 1. Default values
    /// 2. config/default.toml (if exists)
    /// 3. config/local.toml (if exists)
    /// 4. Environment variables (FEDENGINE__*)
    ///
    /// # Errors
    /// Returns error if configuration is invalid
    pub fn load() -> Result<Self, crate::error::AppError> {
        use config::{Config, Environment, File};

        let config = Config::builder()
            .set_default("server.host", "127.0.0.1")?
            .set_default("server.port", 8080)?
            .set_default("server.protocol", "http")?
            .set_default("instance.admin_handle", "admin")?
            .set_default("instance.deleted_handle", "deleted_user")?
            .set_default("instance.key_bits", 2048)?
            .set_default("federation.actor_staleness_hours", 24)?
            .set_default("federation.max_resolve_depth", 100)?
            .set_default("federation.request_timeout_seconds", 30)?
            .set_default("federation.user_agent", "fedengine/0.1.0")?
            .set_default("federation.refresh_interval_seconds", 0)?
            .set_default("federation.refresh_chunk_size", 50)?
            .set_default("queue.workers", 8)?
            .set_default("queue.max_attempts", 5)?
            .set_default("queue.base_backoff_seconds", 5)?
            .set_default("queue.max_backoff_seconds", 3600)?
            .set_default("queue.keep_failed", 1000)?
            .set_default("cache.max_capacity", 100_000)?
            .set_default("cache.ttl_seconds", 600)?
            .set_default("logging.level", "info")?
            .set_default("logging.format", "pretty")?
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            .add_source(
                Environment::with_prefix("FEDENGINE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| crate::error::AppError::Config(e.to_string()))?;

        let app_config: Self = config
            .try_deserialize()
            .map_err(|e| crate::error::AppError::Config(e.to_string()))?;
        app_config.validate()?;
        Ok(app_config)
    }

    pub fn validate(&self) -> Result<(), crate::error::AppError> {
        if self.queue.workers == 0 {
            return Err(crate::error::AppError::Config(
                "queue.workers must be greater than 0".to_string(),
            ));
        }

        if self.federation.max_resolve_depth == 0 {
            return Err(crate::error::AppError::Config(
                "federation.max_resolve_depth must be greater than 0".to_string(),
            ));
        }

        if self.federation.actor_staleness_hours <= 0 {
            return Err(crate::error::AppError::Config(
                "federation.actor_staleness_hours must be greater than 0".to_string(),
            ));
        }

        if self.instance.key_bits < 1024 {
            return Err(crate::error::AppError::Config(
                "instance.key_bits must be at least 1024".to_string(),
            ));
        }

        if self.instance.admin_handle.eq_ignore_ascii_case(&self.instance.deleted_handle) {
            return Err(crate::error::AppError::Config(
                "instance.admin_handle and instance.deleted_handle must differ".to_string(),
            ));
        }

        if is_local_server_domain(&self.server.domain) {
            tracing::warn!(
                domain = %self.server.domain,
                protocol = %self.server.protocol,
                "Running federation against a local domain"
            );
        } else if !self.server.protocol.eq_ignore_ascii_case("https") {
            return Err(crate::error::AppError::Config(
                "server.protocol must be https for non-local server domains".to_string(),
            ));
        }

        Ok(())
    }
}

fn normalized_server_host(domain: &str) -> String {
    let trimmed = domain.trim();
    let parsed_host = url::Url::parse(&format!("http://{trimmed}"))
        .ok()
        .and_then(|url| url.host_str().map(|host| host.to_string()));
    let host = parsed_host.unwrap_or_else(|| trimmed.to_string());
    host.trim_end_matches('.').to_ascii_lowercase()
}

fn is_local_server_domain(domain: &str) -> bool {
    let host = normalized_server_host(domain);
    if host == "localhost" || host.ends_with(".localhost") {
        return true;
    }

    if let Ok(ip) = host.parse::<IpAddr>() {
        return ip.is_loopback() || ip.is_unspecified();
    }

    false
}
