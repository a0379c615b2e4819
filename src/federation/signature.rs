//! Signatures
//!
//! Two kinds of proof are used on the wire:
//! - HTTP Signatures (`rsa-sha256` over request-target, host, date, digest)
//!   on every signed fetch and delivery, see
//!   https://docs.joinmastodon.org/spec/security/
//! - A detachable payload signature in the `RsaSignature2017` shape,
//!   embedded once in a fanned-out payload and reused for every target.
//!
//! Canonicalization of the payload signature is sorted-key compact JSON,
//! not URDNA2015.

use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use chrono::{DateTime, SecondsFormat, Utc};
use rsa::pkcs1v15::{Signature as Pkcs1v15Signature, SigningKey, VerifyingKey};
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey, LineEnding};
use rsa::signature::{RandomizedSigner, SignatureEncoding, Verifier};
use rsa::{RsaPrivateKey, RsaPublicKey};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::net::IpAddr;

use crate::error::AppError;

// =============================================================================
// Keys
// =============================================================================

/// Generate an RSA keypair as (private PKCS#8 PEM, public SPKI PEM).
///
/// CPU heavy; call through `spawn_blocking` from async code.
pub fn generate_keypair(bits: usize) -> Result<(String, String), AppError> {
    let mut rng = rand::thread_rng();
    let private_key = RsaPrivateKey::new(&mut rng, bits)
        .map_err(|e| AppError::Internal(anyhow::anyhow!("Key generation failed: {}", e)))?;
    let public_key = RsaPublicKey::from(&private_key);

    let private_pem = private_key
        .to_pkcs8_pem(LineEnding::LF)
        .map_err(|e| AppError::Internal(anyhow::anyhow!("Private key encoding failed: {}", e)))?
        .to_string();
    let public_pem = public_key
        .to_public_key_pem(LineEnding::LF)
        .map_err(|e| AppError::Internal(anyhow::anyhow!("Public key encoding failed: {}", e)))?;

    Ok((private_pem, public_pem))
}

fn signing_key(private_key_pem: &str) -> Result<SigningKey<Sha256>, AppError> {
    let private_key = RsaPrivateKey::from_pkcs8_pem(private_key_pem)
        .map_err(|e| AppError::Validation(format!("Invalid private key: {}", e)))?;
    Ok(SigningKey::<Sha256>::new(private_key))
}

fn verifying_key(public_key_pem: &str) -> Result<VerifyingKey<Sha256>, AppError> {
    let public_key = RsaPublicKey::from_public_key_pem(public_key_pem)
        .map_err(|e| AppError::Validation(format!("Invalid public key: {}", e)))?;
    Ok(VerifyingKey::<Sha256>::new(public_key))
}

fn sign_base64(private_key_pem: &str, message: &[u8]) -> Result<String, AppError> {
    let key = signing_key(private_key_pem)?;
    let mut rng = rand::thread_rng();
    let signature = key.sign_with_rng(&mut rng, message);
    Ok(BASE64.encode(signature.to_bytes()))
}

fn verify_base64(public_key_pem: &str, message: &[u8], signature_b64: &str) -> Result<(), AppError> {
    let signature_bytes = BASE64
        .decode(signature_b64)
        .map_err(|_| AppError::Validation("Invalid signature encoding".to_string()))?;
    let signature = Pkcs1v15Signature::try_from(signature_bytes.as_slice())
        .map_err(|_| AppError::InvalidSignature)?;
    verifying_key(public_key_pem)?
        .verify(message, &signature)
        .map_err(|_| AppError::InvalidSignature)
}

// =============================================================================
// Outbound host checks
// =============================================================================

fn is_disallowed_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_multicast()
                || v4.is_unspecified()
        }
        IpAddr::V6(v6) => {
            v6.is_loopback()
                || v6.is_unique_local()
                || v6.is_unicast_link_local()
                || v6.is_multicast()
                || v6.is_unspecified()
        }
    }
}

fn is_disallowed_host(host: &str) -> bool {
    let normalized = host.trim_end_matches('.').to_ascii_lowercase();
    if normalized == "localhost" || normalized.ends_with(".localhost") {
        return true;
    }

    normalized
        .parse::<IpAddr>()
        .map(is_disallowed_ip)
        .unwrap_or(false)
}

/// Resolve `host` and refuse if any address is loopback/private/link-local.
pub async fn validate_resolved_host_ips(host: &str, port: u16) -> Result<(), AppError> {
    let normalized = host.trim_end_matches('.').to_ascii_lowercase();

    let mut resolved_any = false;
    let lookup = tokio::net::lookup_host((normalized.as_str(), port))
        .await
        .map_err(|e| AppError::Federation(format!("Failed to resolve {}: {}", normalized, e)))?;

    for addr in lookup {
        resolved_any = true;
        if is_disallowed_ip(addr.ip()) {
            return Err(AppError::Forbidden);
        }
    }

    if !resolved_any {
        return Err(AppError::Federation(format!("No DNS records for {}", normalized)));
    }

    Ok(())
}

/// Lowercased host of a remote URL, rejecting non-HTTP(S) schemes and
/// obvious local/private hosts.
pub fn remote_host(url_or_key_id: &str) -> Result<String, AppError> {
    let without_fragment = url_or_key_id.split('#').next().unwrap_or(url_or_key_id);
    let parsed = url::Url::parse(without_fragment)
        .map_err(|e| AppError::Validation(format!("Invalid URL {}: {}", without_fragment, e)))?;

    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(AppError::Validation(format!(
            "Unsupported URL scheme: {}",
            parsed.scheme()
        )));
    }

    let host = parsed
        .host_str()
        .ok_or_else(|| AppError::Validation("Missing host in URL".to_string()))?
        .to_ascii_lowercase();

    if is_disallowed_host(&host) {
        return Err(AppError::Forbidden);
    }

    Ok(host)
}

// =============================================================================
// HTTP Signatures
// =============================================================================

/// Headers to add for signed request
#[derive(Debug, Clone)]
pub struct SignatureHeaders {
    /// Signature header value
    pub signature: String,
    /// Date header value (RFC 2616)
    pub date: String,
    /// Digest header value (if body present)
    pub digest: Option<String>,
}

/// Sign an outgoing HTTP request.
///
/// # Arguments
/// * `method` - HTTP method (e.g., "POST")
/// * `url` - Full URL being requested
/// * `body` - Request body (for digest)
/// * `private_key_pem` - RSA private key in PEM format
/// * `key_id` - Full URL to the public key (actor#main-key)
pub fn sign_request(
    method: &str,
    url: &str,
    body: Option<&[u8]>,
    private_key_pem: &str,
    key_id: &str,
) -> Result<SignatureHeaders, AppError> {
    let parsed_url =
        url::Url::parse(url).map_err(|e| AppError::Validation(format!("Invalid URL: {}", e)))?;
    let host = match (parsed_url.host_str(), parsed_url.port()) {
        (Some(host), Some(port)) => format!("{}:{}", host, port),
        (Some(host), None) => host.to_string(),
        (None, _) => return Err(AppError::Validation("Missing host in URL".to_string())),
    };
    let path_and_query = match parsed_url.query() {
        Some(query) => format!("{}?{}", parsed_url.path(), query),
        None => parsed_url.path().to_string(),
    };

    let date = Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string();
    let digest = body.map(generate_digest);

    let mut signed: Vec<(&str, String)> = vec![
        (
            "(request-target)",
            format!("{} {}", method.to_lowercase(), path_and_query),
        ),
        ("host", host),
        ("date", date.clone()),
    ];
    if let Some(digest_value) = &digest {
        signed.push(("digest", digest_value.clone()));
    }

    let signature = sign_base64(private_key_pem, signing_string(&signed).as_bytes())?;
    let header_names: Vec<&str> = signed.iter().map(|(name, _)| *name).collect();

    Ok(SignatureHeaders {
        signature: format!(
            "keyId=\"{}\",algorithm=\"rsa-sha256\",headers=\"{}\",signature=\"{}\"",
            key_id,
            header_names.join(" "),
            signature
        ),
        date,
        digest,
    })
}

fn signing_string(parts: &[(&str, String)]) -> String {
    parts
        .iter()
        .map(|(name, value)| format!("{}: {}", name, value))
        .collect::<Vec<_>>()
        .join("\n")
}

fn header_value<'a>(headers: &'a http::HeaderMap, name: &str) -> Result<&'a str, AppError> {
    headers
        .get(name)
        .ok_or_else(|| AppError::Validation(format!("Missing {} header", name)))?
        .to_str()
        .map_err(|_| AppError::Validation(format!("Invalid {} header", name)))
}

/// Verify an inbound HTTP request signature.
///
/// # Errors
/// - `Validation` for malformed or stale headers
/// - `InvalidSignature` when the signature does not match the key
pub fn verify_signature(
    method: &str,
    path: &str,
    headers: &http::HeaderMap,
    body: Option<&[u8]>,
    public_key_pem: &str,
) -> Result<(), AppError> {
    let parsed = parse_signature_header(header_value(headers, "signature")?)?;

    if parsed.algorithm != "rsa-sha256" && parsed.algorithm != "hs2019" {
        return Err(AppError::Validation(format!(
            "Unsupported signature algorithm: {}",
            parsed.algorithm
        )));
    }

    let mut required = vec!["(request-target)", "host", "date"];
    if body.is_some() {
        required.push("digest");
    }
    if let Some(missing) = required
        .iter()
        .find(|name| !parsed.headers.iter().any(|signed| signed == *name))
    {
        return Err(AppError::Validation(format!(
            "Signed headers must include: {}",
            missing
        )));
    }

    let date = DateTime::parse_from_rfc2822(header_value(headers, "date")?)
        .map_err(|_| AppError::Validation("Invalid Date format".to_string()))?;
    if (Utc::now().timestamp() - date.timestamp()).abs() > 300 {
        return Err(AppError::Validation(
            "Date header too old or in future".to_string(),
        ));
    }

    if let Some(body_data) = body {
        if header_value(headers, "digest")? != generate_digest(body_data) {
            return Err(AppError::Validation("Digest mismatch".to_string()));
        }
    }

    let mut signed = Vec::with_capacity(parsed.headers.len());
    for name in &parsed.headers {
        let value = match name.as_str() {
            "(request-target)" => format!("{} {}", method.to_lowercase(), path),
            "host" | "date" | "digest" | "content-type" => header_value(headers, name)?.to_string(),
            other => {
                return Err(AppError::Validation(format!(
                    "Unsupported header in signature: {}",
                    other
                )));
            }
        };
        signed.push((name.as_str(), value));
    }

    verify_base64(
        public_key_pem,
        signing_string(&signed).as_bytes(),
        &parsed.signature,
    )
}

/// Extract keyId from Signature header.
pub fn extract_signature_key_id(headers: &http::HeaderMap) -> Result<String, AppError> {
    Ok(parse_signature_header(header_value(headers, "signature")?)?.key_id)
}

/// Whether the signature keyId belongs to the activity actor.
pub fn key_id_matches_actor(key_id: &str, actor_id: &str) -> bool {
    let key_actor = key_id.split('#').next().unwrap_or(key_id);
    let actor = actor_id.split('#').next().unwrap_or(actor_id);
    key_actor == actor
}

/// Parsed Signature header
#[derive(Debug, Clone)]
pub struct ParsedSignature {
    /// Key ID (URL to public key)
    pub key_id: String,
    /// Algorithm (usually rsa-sha256)
    pub algorithm: String,
    /// Signed header names, lowercased
    pub headers: Vec<String>,
    /// Base64-encoded signature
    pub signature: String,
}

/// Parse Signature header value
///
/// # Format
/// ```text
/// keyId="...",algorithm="...",headers="...",signature="..."
/// ```
pub fn parse_signature_header(header: &str) -> Result<ParsedSignature, AppError> {
    let mut key_id = None;
    let mut algorithm = None;
    let mut headers = None;
    let mut signature = None;

    for part in header.split(',') {
        let Some((key, value)) = part.trim().split_once('=') else {
            continue;
        };
        let value = value.trim().trim_matches('"');
        match key.trim() {
            "keyId" => key_id = Some(value.to_string()),
            "algorithm" => algorithm = Some(value.to_string()),
            "headers" => {
                headers = Some(
                    value
                        .split_whitespace()
                        .map(|s| s.to_ascii_lowercase())
                        .collect(),
                )
            }
            "signature" => signature = Some(value.to_string()),
            _ => {}
        }
    }

    let missing = |field: &str| AppError::Validation(format!("Missing {}", field));
    Ok(ParsedSignature {
        key_id: key_id.ok_or_else(|| missing("keyId"))?,
        // hs2019 senders may omit the algorithm
        algorithm: algorithm.unwrap_or_else(|| "hs2019".to_string()),
        headers: headers.ok_or_else(|| missing("headers"))?,
        signature: signature.ok_or_else(|| missing("signature"))?,
    })
}

/// `SHA-256=base64(hash)` digest of a body
pub fn generate_digest(body: &[u8]) -> String {
    format!("SHA-256={}", BASE64.encode(Sha256::digest(body)))
}

// =============================================================================
// Payload signatures
// =============================================================================

/// Detached signature embedded in a payload under `signature`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LdSignature {
    #[serde(rename = "type")]
    pub kind: String,
    pub creator: String,
    pub domain: String,
    pub created: String,
    #[serde(rename = "signatureValue")]
    pub signature_value: String,
}

/// Produces the payload signature used by fan-out.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PayloadSigner: Send + Sync {
    async fn sign(
        &self,
        payload: &Value,
        private_key_pem: &str,
        creator: &str,
        domain: &str,
        created_at: DateTime<Utc>,
    ) -> Result<LdSignature, AppError>;
}

/// `RsaSignature2017` signer.
#[derive(Debug, Clone, Default)]
pub struct RsaSignature2017;

impl RsaSignature2017 {
    pub const TYPE: &'static str = "RsaSignature2017";

    fn options(creator: &str, domain: &str, created: &str) -> Value {
        serde_json::json!({
            "@context": "https://w3id.org/identity/v1",
            "creator": creator,
            "domain": domain,
            "created": created,
        })
    }

    fn to_be_signed(payload: &Value, options: &Value) -> String {
        let mut document = payload.clone();
        if let Value::Object(map) = &mut document {
            map.remove("signature");
        }
        format!(
            "{}{}",
            sha256_hex(&canonical_json(options)),
            sha256_hex(&canonical_json(&document))
        )
    }

    /// Verify the `signature` block embedded in `payload`.
    pub fn verify(payload: &Value, public_key_pem: &str) -> Result<(), AppError> {
        let block: LdSignature = payload
            .get("signature")
            .cloned()
            .ok_or_else(|| AppError::Validation("Missing signature block".to_string()))
            .and_then(|value| {
                serde_json::from_value(value)
                    .map_err(|e| AppError::Validation(format!("Invalid signature block: {}", e)))
            })?;
        if block.kind != Self::TYPE {
            return Err(AppError::Validation(format!(
                "Unsupported signature type: {}",
                block.kind
            )));
        }

        let options = Self::options(&block.creator, &block.domain, &block.created);
        let message = Self::to_be_signed(payload, &options);
        verify_base64(public_key_pem, message.as_bytes(), &block.signature_value)
    }
}

#[async_trait]
impl PayloadSigner for RsaSignature2017 {
    async fn sign(
        &self,
        payload: &Value,
        private_key_pem: &str,
        creator: &str,
        domain: &str,
        created_at: DateTime<Utc>,
    ) -> Result<LdSignature, AppError> {
        let created = created_at.to_rfc3339_opts(SecondsFormat::Millis, true);
        let options = Self::options(creator, domain, &created);
        let message = Self::to_be_signed(payload, &options);
        let private_key_pem = private_key_pem.to_string();

        let signature_value =
            tokio::task::spawn_blocking(move || sign_base64(&private_key_pem, message.as_bytes()))
                .await
                .map_err(|e| AppError::Internal(anyhow::anyhow!("Signing task failed: {}", e)))??;

        Ok(LdSignature {
            kind: Self::TYPE.to_string(),
            creator: creator.to_string(),
            domain: domain.to_string(),
            created,
            signature_value,
        })
    }
}

fn sha256_hex(input: &str) -> String {
    Sha256::digest(input.as_bytes())
        .iter()
        .map(|byte| format!("{:02x}", byte))
        .collect()
}

/// Compact JSON with object keys sorted at every level.
fn canonical_json(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let fields: Vec<String> = keys
                .into_iter()
                .map(|key| format!("{}:{}", Value::String(key.clone()), canonical_json(&map[key])))
                .collect();
            format!("{{{}}}", fields.join(","))
        }
        Value::Array(items) => {
            let items: Vec<String> = items.iter().map(canonical_json).collect();
            format!("[{}]", items.join(","))
        }
        scalar => scalar.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::{HeaderMap, HeaderValue};
    use serde_json::json;

    fn test_keypair() -> (String, String) {
        generate_keypair(1024).expect("key generation should work")
    }

    fn build_signed_header_map(
        method: &str,
        url: &str,
        body: Option<&[u8]>,
        private_key_pem: &str,
    ) -> (HeaderMap, String) {
        let key_id = "https://remote.example/users/alice#main-key";
        let signed = sign_request(method, url, body, private_key_pem, key_id).expect("signed");
        let parsed_url = url::Url::parse(url).expect("valid test url");
        let path_and_query = match parsed_url.query() {
            Some(query) => format!("{}?{}", parsed_url.path(), query),
            None => parsed_url.path().to_string(),
        };

        let mut headers = HeaderMap::new();
        headers.insert(
            "host",
            HeaderValue::from_str(parsed_url.host_str().expect("host")).expect("host header"),
        );
        headers.insert("date", HeaderValue::from_str(&signed.date).expect("date header"));
        if let Some(digest) = signed.digest {
            headers.insert("digest", HeaderValue::from_str(&digest).expect("digest header"));
        }
        headers.insert(
            "signature",
            HeaderValue::from_str(&signed.signature).expect("signature header"),
        );

        (headers, path_and_query)
    }

    #[test]
    fn verify_signature_accepts_valid_signed_request() {
        let (private_key_pem, public_key_pem) = test_keypair();
        let body = br#"{"type":"Follow"}"#;
        let (headers, path) = build_signed_header_map(
            "POST",
            "https://local.example/fediverse/sharedInbox?x=1",
            Some(body),
            &private_key_pem,
        );

        let result = verify_signature("POST", &path, &headers, Some(body), &public_key_pem);
        assert!(result.is_ok(), "valid signature should verify: {result:?}");
    }

    #[test]
    fn verify_signature_rejects_other_key() {
        let (private_key_pem, _) = test_keypair();
        let (_, other_public_pem) = test_keypair();
        let body = br#"{"type":"Follow"}"#;
        let (headers, path) = build_signed_header_map(
            "POST",
            "https://local.example/fediverse/sharedInbox",
            Some(body),
            &private_key_pem,
        );

        match verify_signature("POST", &path, &headers, Some(body), &other_public_pem) {
            Err(AppError::InvalidSignature) => {}
            other => panic!("expected invalid signature, got: {other:?}"),
        }
    }

    #[test]
    fn verify_signature_rejects_tampered_body() {
        let (private_key_pem, public_key_pem) = test_keypair();
        let (headers, path) = build_signed_header_map(
            "POST",
            "https://local.example/fediverse/sharedInbox",
            Some(br#"{"type":"Follow"}"#),
            &private_key_pem,
        );

        match verify_signature(
            "POST",
            &path,
            &headers,
            Some(br#"{"type":"Delete"}"#),
            &public_key_pem,
        ) {
            Err(AppError::Validation(msg)) => assert!(msg.contains("Digest mismatch")),
            other => panic!("expected digest mismatch, got: {other:?}"),
        }
    }

    #[test]
    fn verify_signature_rejects_missing_date_header() {
        let (private_key_pem, public_key_pem) = test_keypair();
        let body = br#"{"type":"Follow"}"#;
        let (mut headers, path) = build_signed_header_map(
            "POST",
            "https://local.example/fediverse/sharedInbox",
            Some(body),
            &private_key_pem,
        );
        headers.remove("date");

        match verify_signature("POST", &path, &headers, Some(body), &public_key_pem) {
            Err(AppError::Validation(msg)) => assert!(msg.contains("Missing date header")),
            other => panic!("expected missing date header error, got: {other:?}"),
        }
    }

    #[test]
    fn verify_signature_requires_digest_in_signed_headers() {
        let (private_key_pem, public_key_pem) = test_keypair();
        let body = br#"{"type":"Follow"}"#;
        let (mut headers, path) = build_signed_header_map(
            "POST",
            "https://local.example/fediverse/sharedInbox",
            Some(body),
            &private_key_pem,
        );

        let parsed = parse_signature_header(header_value(&headers, "signature").unwrap()).unwrap();
        let tampered = format!(
            "keyId=\"{}\",algorithm=\"{}\",headers=\"(request-target) host date\",signature=\"{}\"",
            parsed.key_id, parsed.algorithm, parsed.signature
        );
        headers.insert("signature", HeaderValue::from_str(&tampered).unwrap());

        match verify_signature("POST", &path, &headers, Some(body), &public_key_pem) {
            Err(AppError::Validation(msg)) => {
                assert!(msg.contains("Signed headers must include: digest"))
            }
            other => panic!("expected missing signed digest error, got: {other:?}"),
        }
    }

    #[test]
    fn remote_host_rejects_local_targets() {
        assert!(matches!(
            remote_host("https://localhost/users/alice#main-key"),
            Err(AppError::Forbidden)
        ));
        assert!(matches!(
            remote_host("http://192.168.1.10/users/alice"),
            Err(AppError::Forbidden)
        ));
        assert!(matches!(
            remote_host("ftp://remote.example/users/alice"),
            Err(AppError::Validation(_))
        ));
    }

    #[test]
    fn remote_host_is_lowercased() {
        assert_eq!(
            remote_host("https://Remote.Example/users/alice#main-key").unwrap(),
            "remote.example"
        );
    }

    #[tokio::test]
    async fn validate_resolved_host_ips_rejects_loopback() {
        assert!(matches!(
            validate_resolved_host_ips("127.0.0.1", 80).await,
            Err(AppError::Forbidden)
        ));
    }

    #[test]
    fn key_id_must_belong_to_actor() {
        assert!(key_id_matches_actor(
            "https://remote.example/users/alice#main-key",
            "https://remote.example/users/alice",
        ));
        assert!(!key_id_matches_actor(
            "https://remote.example/users/bob#main-key",
            "https://remote.example/users/alice",
        ));
    }

    #[test]
    fn canonical_json_sorts_nested_keys() {
        let value = json!({ "b": 1, "a": { "d": [true, null], "c": "x" } });
        assert_eq!(canonical_json(&value), r#"{"a":{"c":"x","d":[true,null]},"b":1}"#);
    }

    #[tokio::test]
    async fn payload_signature_verifies_and_detects_tampering() {
        let (private_key_pem, public_key_pem) = test_keypair();
        let mut payload = json!({
            "type": "Create",
            "actor": "https://local.example/fediverse/blog/bob",
            "object": { "type": "Note", "content": "hello" }
        });
        let created_at = DateTime::parse_from_rfc3339("2024-05-01T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc);

        let block = RsaSignature2017
            .sign(
                &payload,
                &private_key_pem,
                "https://local.example/fediverse/blog/bob",
                "local.example",
                created_at,
            )
            .await
            .unwrap();
        assert_eq!(block.created, "2024-05-01T10:00:00.000Z");

        payload["signature"] = serde_json::to_value(&block).unwrap();
        assert!(RsaSignature2017::verify(&payload, &public_key_pem).is_ok());

        payload["object"]["content"] = json!("tampered");
        assert!(matches!(
            RsaSignature2017::verify(&payload, &public_key_pem),
            Err(AppError::InvalidSignature)
        ));
    }

    #[tokio::test]
    async fn payload_signature_is_deterministic_for_same_timestamp() {
        let (private_key_pem, _) = test_keypair();
        let payload = json!({ "type": "Note", "content": "same" });
        let created_at = Utc::now();

        let first = RsaSignature2017
            .sign(&payload, &private_key_pem, "creator", "local.example", created_at)
            .await
            .unwrap();
        let second = RsaSignature2017
            .sign(&payload, &private_key_pem, "creator", "local.example", created_at)
            .await
            .unwrap();

        assert_eq!(first, second);
    }
}
