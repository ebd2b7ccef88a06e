//! Shared harness for gateway integration tests.
//!
//! Starts an in-process fake primary backend (an axum app storing objects in
//! a `MemoryCloudStore`), a gateway forwarding to it, and a SigV4 signing
//! client. The sync engine talks to the same in-memory store the fake
//! backend serves, so objects written through the gateway are visible to it.

#![allow(dead_code)]

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use http::{HeaderMap, Method};
use jcs_cli::{AppState, BackendConfig, GatewayConfig};
use jcs_cloudstore::MemoryCloudStore;
use jcs_core::{CloudRegistry, MemoryMetadataStore, SyncMode, User};
use jcs_crypto::{Credentials, RequestSigner, UNSIGNED_PAYLOAD};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::net::TcpListener;

pub const PRIMARY: &str = "minio";

/// A tenant's credentials
#[derive(Clone, Copy, Debug)]
pub struct Tenant {
    pub username: &'static str,
    pub access_key: &'static str,
    pub secret_key: &'static str,
}

pub const ALICE: Tenant = Tenant {
    username: "alice",
    access_key: "AKIDALICE",
    secret_key: "alice-secret-key",
};

pub const BOB: Tenant = Tenant {
    username: "bob",
    access_key: "AKIDBOB",
    secret_key: "bob-secret-key",
};

#[derive(Clone)]
struct FakeBackend {
    store: MemoryCloudStore,
    requests: Arc<AtomicUsize>,
}

async fn get_object(
    State(backend): State<FakeBackend>,
    Path((bucket, key)): Path<(String, String)>,
) -> Response {
    backend.requests.fetch_add(1, Ordering::SeqCst);
    match backend.store.get(&bucket, &key) {
        Some(data) => (StatusCode::OK, data).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn put_object(
    State(backend): State<FakeBackend>,
    Path((bucket, key)): Path<(String, String)>,
    body: Bytes,
) -> StatusCode {
    backend.requests.fetch_add(1, Ordering::SeqCst);
    backend.store.insert(&bucket, &key, body);
    StatusCode::OK
}

async fn delete_object(
    State(backend): State<FakeBackend>,
    Path((bucket, key)): Path<(String, String)>,
) -> StatusCode {
    backend.requests.fetch_add(1, Ordering::SeqCst);
    backend.store.remove(&bucket, &key);
    StatusCode::NO_CONTENT
}

/// `POST /{bucket}?delete`: removes each `<Key>` and reports it deleted
async fn delete_objects(
    State(backend): State<FakeBackend>,
    Path(bucket): Path<String>,
    body: String,
) -> Response {
    backend.requests.fetch_add(1, Ordering::SeqCst);
    let mut result = String::from("<DeleteResult>");
    for chunk in body.split("<Key>").skip(1) {
        let Some((key, _)) = chunk.split_once("</Key>") else {
            continue;
        };
        backend.store.remove(&bucket, key);
        result.push_str(&format!("<Deleted><Key>{}</Key></Deleted>", key));
    }
    result.push_str("</DeleteResult>");
    (StatusCode::OK, result).into_response()
}

async fn spawn_app(app: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

/// A running gateway with its fake primary and in-memory clouds
pub struct TestGateway {
    pub addr: SocketAddr,
    pub primary: MemoryCloudStore,
    pub clouds: HashMap<String, MemoryCloudStore>,
    pub metadata: MemoryMetadataStore,
    pub staging: TempDir,
    backend_requests: Arc<AtomicUsize>,
    client: reqwest::Client,
}

impl TestGateway {
    /// Start a gateway with `clouds` as secondary clouds and alice and bob
    /// as users
    pub async fn start(clouds: &[&str], sync_mode: SyncMode) -> Self {
        let primary = MemoryCloudStore::new(PRIMARY);
        let backend_requests = Arc::new(AtomicUsize::new(0));
        let backend = Router::new()
            .route("/{bucket}", post(delete_objects))
            .route(
                "/{bucket}/{*key}",
                get(get_object).put(put_object).delete(delete_object),
            )
            .layer(DefaultBodyLimit::disable())
            .with_state(FakeBackend {
                store: primary.clone(),
                requests: Arc::clone(&backend_requests),
            });
        let backend_addr = spawn_app(backend).await;

        let metadata = MemoryMetadataStore::new();
        for tenant in [ALICE, BOB] {
            metadata.insert_user(User {
                username: tenant.username.into(),
                access_key: tenant.access_key.into(),
                secret_key: tenant.secret_key.into(),
            });
        }

        let mut registry = CloudRegistry::builder(PRIMARY).with_cloud(Arc::new(primary.clone()));
        let mut stores = HashMap::new();
        for name in clouds {
            let store = MemoryCloudStore::new(*name);
            registry = registry.with_cloud(Arc::new(store.clone()));
            stores.insert(name.to_string(), store);
        }

        let staging = tempfile::tempdir().unwrap();
        let config = GatewayConfig {
            host: "127.0.0.1".into(),
            port: 0,
            backend: BackendConfig {
                name: PRIMARY.into(),
                endpoint: format!("http://{}", backend_addr),
                ..BackendConfig::default()
            },
            staging_dir: staging.path().to_path_buf(),
            sync_mode,
            cloud_timeout_secs: 10,
            ..GatewayConfig::default()
        };
        let state = AppState::with_components(config, Arc::new(metadata.clone()), registry.build())
            .unwrap();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            jcs_cli::serve(listener, Arc::new(state), std::future::pending())
                .await
                .unwrap();
        });

        Self {
            addr,
            primary,
            clouds: stores,
            metadata,
            staging,
            backend_requests,
            client: reqwest::Client::new(),
        }
    }

    pub fn cloud(&self, name: &str) -> &MemoryCloudStore {
        &self.clouds[name]
    }

    /// Requests the fake primary backend has served so far
    pub fn backend_requests(&self) -> usize {
        self.backend_requests.load(Ordering::SeqCst)
    }

    /// Entries left in the staging directory
    pub fn staging_entries(&self) -> usize {
        match std::fs::read_dir(self.staging.path()) {
            Ok(entries) => entries.count(),
            Err(_) => 0,
        }
    }

    fn host(&self) -> String {
        self.addr.to_string()
    }

    /// Send a header-signed request as of `now`
    pub async fn send_at(
        &self,
        tenant: Tenant,
        method: Method,
        path_and_query: &str,
        body: Option<Vec<u8>>,
        now: DateTime<Utc>,
    ) -> reqwest::Response {
        self.send_signed(tenant, method, path_and_query, HeaderMap::new(), body, now)
            .await
    }

    /// Send a request signed over `headers` as well
    pub async fn send_with_headers(
        &self,
        tenant: Tenant,
        method: Method,
        path_and_query: &str,
        headers: HeaderMap,
        body: Option<Vec<u8>>,
    ) -> reqwest::Response {
        self.send_signed(tenant, method, path_and_query, headers, body, Utc::now())
            .await
    }

    async fn send_signed(
        &self,
        tenant: Tenant,
        method: Method,
        path_and_query: &str,
        mut headers: HeaderMap,
        body: Option<Vec<u8>>,
        now: DateTime<Utc>,
    ) -> reqwest::Response {
        let (path, query) = match path_and_query.split_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (path_and_query, None),
        };
        let signer = RequestSigner::new(
            Credentials::new(tenant.access_key, tenant.secret_key),
            "us-east-1",
        );
        signer
            .sign(&method, &self.host(), path, query, &mut headers, UNSIGNED_PAYLOAD, now)
            .unwrap();

        let url = format!("http://{}{}", self.host(), path_and_query);
        let mut request = self.client.request(method, url).headers(headers);
        if let Some(body) = body {
            request = request.body(body);
        }
        request.send().await.unwrap()
    }

    pub async fn send(
        &self,
        tenant: Tenant,
        method: Method,
        path_and_query: &str,
        body: Option<Vec<u8>>,
    ) -> reqwest::Response {
        self.send_at(tenant, method, path_and_query, body, Utc::now())
            .await
    }

    /// GET through a presigned URL created at `signed_at`
    pub async fn presigned_get(
        &self,
        tenant: Tenant,
        path: &str,
        expires_secs: u64,
        signed_at: DateTime<Utc>,
    ) -> reqwest::Response {
        let signer = RequestSigner::new(
            Credentials::new(tenant.access_key, tenant.secret_key),
            "us-east-1",
        );
        let query = signer.presign(&Method::GET, &self.host(), path, expires_secs, signed_at);
        let url = format!("http://{}{}?{}", self.host(), path, query);
        self.client.get(url).send().await.unwrap()
    }

    /// Poll `check` until it holds or five seconds pass
    pub async fn eventually(&self, check: impl Fn() -> bool) -> bool {
        for _ in 0..100 {
            if check() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        check()
    }
}

/// `x-amz-error-code` of an error response
pub fn error_code(response: &reqwest::Response) -> Option<String> {
    response
        .headers()
        .get("x-amz-error-code")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// Random payload of `len` bytes
pub fn random_payload(len: usize) -> Vec<u8> {
    use rand::RngCore;
    let mut data = vec![0u8; len];
    rand::thread_rng().fill_bytes(&mut data);
    data
}
