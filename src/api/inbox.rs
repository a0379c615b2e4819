//! ActivityPub inbox endpoints
//!
//! - POST /fediverse/blog/:handle/inbox - Personal inbox
//! - POST /fediverse/sharedInbox - Shared inbox
//!
//! Requests are authenticated here and queued; all processing happens in
//! the job workers.

use axum::body::Bytes;
use axum::{
    Router,
    extract::{Path, State},
    http::{HeaderMap, StatusCode, Uri},
    routing::post,
};

use crate::AppState;
use crate::data::Actor;
use crate::error::AppError;
use crate::federation::{
    HostRegistry, extract_signature_key_id, key_id_matches_actor, self_deleted_actor,
    verify_signature,
};
use crate::metrics::{FEDERATION_REQUEST_DURATION_SECONDS, HTTP_REQUESTS_TOTAL};
use crate::queue::{EnqueueOptions, InboundActivityJob, Job, JobQueue};

/// Create inbox router
pub fn inbox_router() -> Router<AppState> {
    Router::new()
        .route("/fediverse/blog/:handle/inbox", post(inbox))
        .route("/fediverse/sharedInbox", post(shared_inbox))
}

/// POST /fediverse/blog/:handle/inbox
async fn inbox(
    State(state): State<AppState>,
    Path(handle): Path<String>,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, AppError> {
    let recipient = state
        .store
        .find_local_actor_by_handle(&handle)
        .await?
        .filter(|actor| !actor.banned)
        .ok_or(AppError::NotFound)?;

    let result = receive(&state, recipient, uri.path(), &headers, &body).await;
    record("/fediverse/blog/:handle/inbox", &result);
    result
}

/// POST /fediverse/sharedInbox
///
/// Activities arriving here are processed on behalf of the instance actor.
async fn shared_inbox(
    State(state): State<AppState>,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, AppError> {
    let recipient = state.federation.ctx.admin.clone();

    let result = receive(&state, recipient, uri.path(), &headers, &body).await;
    record("/fediverse/sharedInbox", &result);
    result
}

fn record(endpoint: &str, result: &Result<StatusCode, AppError>) {
    let status = match result {
        Ok(status) => status.as_u16().to_string(),
        Err(error) => error.kind().to_string(),
    };
    HTTP_REQUESTS_TOTAL
        .with_label_values(&["POST", endpoint, &status])
        .inc();
}

/// Verify the HTTP signature against the acting actor's key and queue the
/// activity.
///
/// # Errors
/// - `Unauthorized` without a Signature header
/// - `Validation` for unparseable bodies or a keyId of another actor
/// - `Forbidden` when the actor cannot be resolved (unreachable, banned, blocked)
/// - `InvalidSignature` when the signature does not verify
async fn receive(
    state: &AppState,
    recipient: Actor,
    path: &str,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<StatusCode, AppError> {
    let _timer = FEDERATION_REQUEST_DURATION_SECONDS
        .with_label_values(&["inbound"])
        .start_timer();

    if headers.get("signature").is_none() {
        return Err(AppError::Unauthorized);
    }

    let activity: serde_json::Value = serde_json::from_slice(body)
        .map_err(|e| AppError::Validation(format!("Invalid JSON: {}", e)))?;
    let actor_id = activity
        .get("actor")
        .and_then(|actor| actor.as_str())
        .ok_or_else(|| AppError::Validation("Missing actor field".to_string()))?
        .to_string();

    let signature_key_id = extract_signature_key_id(headers)?;
    if !key_id_matches_actor(&signature_key_id, &actor_id) {
        return Err(AppError::Validation(
            "Signature keyId actor mismatch".to_string(),
        ));
    }

    let public_key_pem = signing_key(state, &activity, &actor_id, &recipient).await?;
    verify_signature("POST", path, headers, Some(body), &public_key_pem)?;

    // Block checks are per recipient, so copies for different inboxes must
    // not coalesce.
    let options = match activity.get("id").and_then(|id| id.as_str()) {
        Some(id) => EnqueueOptions::keyed(format!("inbound:{}:{}", recipient.id, id)),
        None => EnqueueOptions::default(),
    };
    state
        .queue
        .enqueue(
            Job::Inbound(InboundActivityJob {
                activity,
                petition_by: recipient.id,
            }),
            options,
        )
        .await?;

    tracing::debug!(actor = %actor_id, path, "Activity queued");
    Ok(StatusCode::ACCEPTED)
}

/// Public key of `actor_id`.
///
/// An actor announcing its own deletion can no longer be fetched, so the
/// stored record is used for it.
async fn signing_key(
    state: &AppState,
    activity: &serde_json::Value,
    actor_id: &str,
    recipient: &Actor,
) -> Result<String, AppError> {
    let federation = &state.federation;

    // Reject blocked hosts before any outbound key fetch.
    let host_name = HostRegistry::host_of_url(actor_id)?;
    if federation.hosts.is_blocked(&host_name).await? {
        return Err(AppError::Forbidden);
    }

    if self_deleted_actor(activity).is_some() {
        return match state.store.find_actor_by_remote_id(actor_id).await? {
            Some(stored) if !stored.banned => Ok(stored.public_key_pem),
            _ => Err(AppError::Forbidden),
        };
    }

    let actor = federation.resolver.resolve(actor_id, recipient).await?;
    if federation.ctx.is_unreachable(&actor) {
        return Err(AppError::Forbidden);
    }
    Ok(actor.public_key_pem)
}
