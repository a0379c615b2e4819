//! Common test utilities for E2E tests

use async_trait::async_trait;
use chrono::Utc;
use fedengine::data::{
    Actor, ActorKind, FederatedHost, Follow, MemoryStore, RemoteOrigin, Store, new_id,
};
use fedengine::error::{AppError, Result};
use fedengine::federation::{
    FederationWorker, RsaSignature2017, SigningIdentity, Transport, ensure_local_actor,
    generate_keypair, sign_request,
};
use fedengine::{AppState, config};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;

/// Key size for every key generated in tests.
const TEST_KEY_BITS: usize = 1024;

/// A POST the engine made.
#[derive(Debug, Clone)]
pub struct Posted {
    pub inbox: String,
    pub body: Value,
    pub key_id: String,
}

/// Transport answering fetches from registered documents and recording
/// every delivery.
#[derive(Default)]
pub struct FakeTransport {
    documents: Mutex<HashMap<String, Value>>,
    fetches: Mutex<Vec<String>>,
    posted: Mutex<Vec<Posted>>,
}

impl FakeTransport {
    pub fn serve(&self, url: &str, document: Value) {
        self.documents.lock().unwrap().insert(url.to_string(), document);
    }

    pub fn fetches(&self) -> Vec<String> {
        self.fetches.lock().unwrap().clone()
    }

    pub fn posted(&self) -> Vec<Posted> {
        self.posted.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn fetch_json(&self, url: &str, _signer: &SigningIdentity) -> Result<Value> {
        self.fetches.lock().unwrap().push(url.to_string());
        self.documents
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .ok_or_else(|| AppError::Federation(format!("404 for {}", url)))
    }

    async fn post_signed(&self, inbox: &str, body: &str, signer: &SigningIdentity) -> Result<()> {
        self.posted.lock().unwrap().push(Posted {
            inbox: inbox.to_string(),
            body: serde_json::from_str(body).map_err(|e| AppError::Internal(e.into()))?,
            key_id: signer.key_id.clone(),
        });
        Ok(())
    }
}

/// Key material of a simulated remote actor.
pub struct RemoteKey {
    pub url: String,
    pub key_id: String,
    pub private_key_pem: String,
    pub public_key_pem: String,
}

/// Test server instance
pub struct TestServer {
    pub addr: String,
    pub state: AppState,
    pub transport: Arc<FakeTransport>,
    pub worker: FederationWorker,
    pub client: reqwest::Client,
}

impl TestServer {
    /// Create a new test server instance
    pub async fn new() -> Self {
        let config = config::AppConfig {
            server: config::ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 0,
                domain: "local.example".to_string(),
                protocol: "https".to_string(),
            },
            instance: config::InstanceConfig {
                media_url: "https://media.local.example".to_string(),
                admin_handle: "admin".to_string(),
                deleted_handle: "deleted_user".to_string(),
                key_bits: TEST_KEY_BITS,
            },
            federation: config::FederationConfig {
                actor_staleness_hours: 24,
                max_resolve_depth: 100,
                request_timeout_seconds: 5,
                user_agent: "fedengine-test".to_string(),
                refresh_interval_seconds: 0,
                refresh_chunk_size: 10,
            },
            queue: config::QueueConfig {
                workers: 1,
                max_attempts: 1,
                base_backoff_seconds: 1,
                max_backoff_seconds: 1,
                keep_failed: 100,
            },
            cache: config::CacheConfig {
                max_capacity: 10_000,
                ttl_seconds: 600,
            },
            logging: config::LoggingConfig {
                level: "info".to_string(),
                format: "pretty".to_string(),
            },
        };

        let transport = Arc::new(FakeTransport::default());
        let state = AppState::with_parts(
            config,
            Arc::new(MemoryStore::new()),
            transport.clone(),
            Arc::new(RsaSignature2017),
        )
        .await
        .unwrap();
        let worker = FederationWorker::new(state.federation.clone());

        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .unwrap();

        // Bind to random port
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = format!("http://{}", listener.local_addr().unwrap());

        let app = fedengine::build_router(state.clone());
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            addr,
            state,
            transport,
            worker,
            client,
        }
    }

    /// Get base URL for requests
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.addr, path)
    }

    pub fn store(&self) -> &dyn Store {
        self.state.store.as_ref()
    }

    /// Create a local actor with a real keypair.
    pub async fn local_actor(&self, handle: &str) -> Actor {
        ensure_local_actor(self.store(), handle, handle, TEST_KEY_BITS)
            .await
            .unwrap()
    }

    /// Publish an actor document for `url` and return its key material.
    pub fn remote_actor(&self, url: &str, shared_inbox: Option<&str>) -> RemoteKey {
        let (private_key_pem, public_key_pem) = generate_keypair(TEST_KEY_BITS).unwrap();
        let name = url.rsplit('/').next().unwrap();
        let key_id = format!("{}#main-key", url);

        let mut document = json!({
            "@context": ["https://www.w3.org/ns/activitystreams", "https://w3id.org/security/v1"],
            "id": url,
            "type": "Person",
            "preferredUsername": name,
            "name": name,
            "inbox": format!("{}/inbox", url),
            "publicKey": {
                "id": key_id,
                "owner": url,
                "publicKeyPem": public_key_pem,
            },
        });
        if let Some(shared_inbox) = shared_inbox {
            document["endpoints"] = json!({ "sharedInbox": shared_inbox });
        }
        self.transport.serve(url, document);

        RemoteKey {
            url: url.to_string(),
            key_id,
            private_key_pem,
            public_key_pem,
        }
    }

    /// POST `activity` to `path`, signed as `remote`.
    pub async fn post_signed(&self, path: &str, activity: &Value, remote: &RemoteKey) -> reqwest::Response {
        let url = self.url(path);
        let body = serde_json::to_vec(activity).unwrap();
        let headers = sign_request(
            "POST",
            &url,
            Some(&body),
            &remote.private_key_pem,
            &remote.key_id,
        )
        .unwrap();

        let mut request = self
            .client
            .post(&url)
            .header("content-type", "application/activity+json")
            .header("date", headers.date)
            .header("signature", headers.signature);
        if let Some(digest) = headers.digest {
            request = request.header("digest", digest);
        }
        request.body(body).send().await.unwrap()
    }

    /// Run queued jobs until the queue is empty; returns how many ran.
    pub async fn drain(&self) -> usize {
        let mut ran = 0;
        while self.state.queue.process_next(&self.worker).await.is_some() {
            ran += 1;
        }
        ran
    }

    pub fn actor_url(&self, actor: &Actor) -> String {
        self.state.federation.ctx.actor_url(actor)
    }
}

pub async fn insert_host(store: &dyn Store, name: &str, shared_inbox: Option<&str>) -> FederatedHost {
    store
        .insert_host(FederatedHost {
            id: new_id(),
            display_name: name.to_string(),
            public_inbox: shared_inbox.map(str::to_string),
            blocked: false,
            created_at: Utc::now(),
        })
        .await
        .unwrap()
}

/// Insert a remote actor record directly, bypassing resolution.
pub async fn insert_remote(store: &dyn Store, url: &str, host: &FederatedHost) -> Actor {
    let name = url.rsplit('/').next().unwrap();
    let now = Utc::now();
    store
        .insert_actor(Actor {
            id: new_id(),
            handle: format!("@{}@{}", name, host.display_name),
            display_name: name.to_string(),
            description: String::new(),
            avatar_url: String::new(),
            header_url: None,
            public_key_pem: String::new(),
            kind: ActorKind::Remote(RemoteOrigin {
                remote_id: url.to_string(),
                inbox: Some(format!("{}/inbox", url)),
                host_id: host.id.clone(),
            }),
            banned: false,
            manually_accepts_follows: false,
            created_at: now,
            updated_at: now,
        })
        .await
        .unwrap()
}

pub async fn insert_follow(store: &dyn Store, follower: &Actor, followed: &Actor) -> Follow {
    store
        .insert_follow(Follow {
            id: new_id(),
            follower_id: follower.id.clone(),
            followed_id: followed.id.clone(),
            accepted: true,
            remote_follow_id: None,
            created_at: Utc::now(),
        })
        .await
        .unwrap()
}
