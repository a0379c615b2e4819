//! Signed HTTP transport
//!
//! Every outbound request is signed with a local actor's key. The trait is
//! the seam the resolver, thread resolver and delivery go through.

use async_trait::async_trait;
use serde_json::Value;
use std::time::{Duration, Instant};

use super::signature::{remote_host, sign_request, validate_resolved_host_ips};
use crate::config::FederationConfig;
use crate::error::{AppError, Result};
use crate::metrics::FEDERATION_REQUEST_DURATION_SECONDS;

const ACTIVITY_JSON: &str = "application/activity+json";

/// Key material of the local actor a request is signed as.
#[derive(Debug, Clone)]
pub struct SigningIdentity {
    /// `{actor url}#main-key`
    pub key_id: String,
    pub private_key_pem: String,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Transport: Send + Sync {
    /// Signed GET of an ActivityPub document.
    async fn fetch_json(&self, url: &str, signer: &SigningIdentity) -> Result<Value>;

    /// Signed POST of an already serialized payload.
    async fn post_signed(&self, inbox: &str, body: &str, signer: &SigningIdentity) -> Result<()>;
}

/// reqwest-backed [`Transport`]
#[derive(Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(config: &FederationConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .build()
            .map_err(|e| AppError::Internal(e.into()))?;

        Ok(Self { client })
    }

    /// Refuse URLs that point back into private address space.
    async fn check_target(url: &str) -> Result<()> {
        let host = remote_host(url)?;
        let port = url::Url::parse(url)
            .ok()
            .and_then(|parsed| parsed.port_or_known_default())
            .ok_or_else(|| AppError::Validation(format!("Missing port in {}", url)))?;
        validate_resolved_host_ips(&host, port).await
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn fetch_json(&self, url: &str, signer: &SigningIdentity) -> Result<Value> {
        Self::check_target(url).await?;
        let started = Instant::now();

        let headers = sign_request("GET", url, None, &signer.private_key_pem, &signer.key_id)?;
        let response = self
            .client
            .get(url)
            .header("Accept", ACTIVITY_JSON)
            .header("Date", headers.date)
            .header("Signature", headers.signature)
            .send()
            .await
            .map_err(|e| AppError::Federation(format!("Failed to fetch {}: {}", url, e)))?;

        FEDERATION_REQUEST_DURATION_SECONDS
            .with_label_values(&["fetch"])
            .observe(started.elapsed().as_secs_f64());

        if !response.status().is_success() {
            return Err(AppError::Federation(format!(
                "Failed to fetch {}: HTTP {}",
                url,
                response.status()
            )));
        }

        response
            .json()
            .await
            .map_err(|e| AppError::Federation(format!("Failed to parse {}: {}", url, e)))
    }

    async fn post_signed(&self, inbox: &str, body: &str, signer: &SigningIdentity) -> Result<()> {
        Self::check_target(inbox).await?;
        let started = Instant::now();

        let headers = sign_request(
            "POST",
            inbox,
            Some(body.as_bytes()),
            &signer.private_key_pem,
            &signer.key_id,
        )?;

        let mut request = self
            .client
            .post(inbox)
            .header("Content-Type", ACTIVITY_JSON)
            .header("Date", headers.date)
            .header("Signature", headers.signature);
        if let Some(digest) = headers.digest {
            request = request.header("Digest", digest);
        }

        let response = request
            .body(body.to_string())
            .send()
            .await
            .map_err(|e| AppError::Federation(format!("Failed to deliver to {}: {}", inbox, e)))?;

        FEDERATION_REQUEST_DURATION_SECONDS
            .with_label_values(&["deliver"])
            .observe(started.elapsed().as_secs_f64());

        if !response.status().is_success() {
            return Err(AppError::Federation(format!(
                "Inbox {} rejected activity: HTTP {}",
                inbox,
                response.status()
            )));
        }

        Ok(())
    }
}
