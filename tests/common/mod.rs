//! Common test utilities for E2E tests
//!
//! Every test gets its own proxy and its own in-process mock of the storage
//! and GraphQL backends, both bound to ephemeral ports.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
    Json, Router,
    extract::{Multipart, Path, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use crypt_proxy::{AppState, config};
use serde_json::{Value, json};
use tokio::net::TcpListener;

pub const PASSPHRASE: &str = "correct horse battery staple";

/// Object held by the mock storage backend
#[derive(Debug, Clone)]
pub struct StoredBlob {
    pub id: String,
    pub secret: String,
    pub name: String,
    pub content_type: String,
    pub url: String,
    pub bytes: Vec<u8>,
}

/// Call observed by the mock backend
#[derive(Debug, Clone)]
pub struct BackendCall {
    /// `create_object`, `fetch_object` or the GraphQL root field
    pub operation: String,
    pub authorization: Option<String>,
    /// GraphQL variables, `Null` for storage calls
    pub variables: Value,
}

/// Shared state of the mock backend
#[derive(Default)]
pub struct BackendState {
    pub base_url: String,
    pub objects: Mutex<Vec<StoredBlob>>,
    /// Metadata records keyed by secret
    pub records: Mutex<HashMap<String, Value>>,
    pub calls: Mutex<Vec<BackendCall>>,
    /// Answer every GraphQL call with the 3008 denial
    pub deny: AtomicBool,
    /// Answer `createMyFile` with a non-denial error
    pub reject_registrations: AtomicBool,
    /// Delay before answering object creates
    pub create_delay_ms: AtomicU64,
    next_id: AtomicU64,
}

impl BackendState {
    fn record(&self, operation: &str, headers: &HeaderMap, variables: Value) {
        let authorization = headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned);
        self.calls.lock().unwrap().push(BackendCall {
            operation: operation.to_string(),
            authorization,
            variables,
        });
    }

    fn find_object(&self, key: &str) -> Option<StoredBlob> {
        self.objects
            .lock()
            .unwrap()
            .iter()
            .find(|blob| blob.id == key || blob.secret == key)
            .cloned()
    }
}

/// In-process stand-in for the storage and metadata backends
#[derive(Clone)]
pub struct MockBackend {
    pub addr: String,
    pub state: Arc<BackendState>,
}

impl MockBackend {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = format!("http://{}", listener.local_addr().unwrap());

        let state = Arc::new(BackendState {
            base_url: addr.clone(),
            ..Default::default()
        });

        let app = Router::new()
            .route("/file/v1/:project_id", post(create_object))
            .route("/simple/v1/:project_id", post(graphql))
            .route("/files/:project_id/:key", get(fetch_object))
            .with_state(state.clone());

        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { addr, state }
    }

    pub fn calls(&self) -> Vec<BackendCall> {
        self.state.calls.lock().unwrap().clone()
    }

    pub fn calls_to(&self, operation: &str) -> Vec<BackendCall> {
        self.calls()
            .into_iter()
            .filter(|call| call.operation == operation)
            .collect()
    }

    pub fn objects(&self) -> Vec<StoredBlob> {
        self.state.objects.lock().unwrap().clone()
    }

    pub fn deny_all(&self, deny: bool) {
        self.state.deny.store(deny, Ordering::SeqCst);
    }

    pub fn reject_registrations(&self, reject: bool) {
        self.state
            .reject_registrations
            .store(reject, Ordering::SeqCst);
    }

    pub fn delay_creates(&self, delay: Duration) {
        self.state
            .create_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }
}

async fn create_object(
    State(state): State<Arc<BackendState>>,
    Path(project_id): Path<String>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Response {
    state.record("create_object", &headers, Value::Null);

    let delay = state.create_delay_ms.load(Ordering::SeqCst);
    if delay > 0 {
        tokio::time::sleep(Duration::from_millis(delay)).await;
    }

    let mut upload = None;
    while let Ok(Some(field)) = multipart.next_field().await {
        if field.name() != Some("data") {
            continue;
        }
        let name = field.file_name().unwrap_or("unnamed").to_string();
        let content_type = field
            .content_type()
            .unwrap_or("application/octet-stream")
            .to_string();
        match field.bytes().await {
            Ok(bytes) => upload = Some((name, content_type, bytes.to_vec())),
            Err(_) => return StatusCode::BAD_REQUEST.into_response(),
        }
    }
    let Some((name, content_type, bytes)) = upload else {
        return StatusCode::BAD_REQUEST.into_response();
    };

    let n = state.next_id.fetch_add(1, Ordering::SeqCst) + 1;
    let id = format!("obj{n}");
    let secret = format!("sec{n}");
    let url = format!("{}/files/{}/{}", state.base_url, project_id, secret);

    let response = json!({
        "id": id,
        "secret": secret,
        "name": name,
        "size": bytes.len(),
        "url": url,
        "contentType": content_type,
    });

    state.objects.lock().unwrap().push(StoredBlob {
        id,
        secret,
        name,
        content_type,
        url,
        bytes,
    });

    Json(response).into_response()
}

async fn graphql(
    State(state): State<Arc<BackendState>>,
    headers: HeaderMap,
    Json(request): Json<Value>,
) -> Json<Value> {
    let query = request["query"].as_str().unwrap_or_default();
    let variables = request["variables"].clone();

    let operation = ["createMyFile", "updateFile", "MyFile"]
        .into_iter()
        .find(|name| query.contains(&format!("{name}(")))
        .unwrap_or("unknown");
    state.record(operation, &headers, variables.clone());

    if state.deny.load(Ordering::SeqCst) {
        return Json(json!({
            "data": null,
            "errors": [{ "code": 3008, "message": "Insufficient Permissions" }]
        }));
    }

    if operation == "createMyFile" && state.reject_registrations.load(Ordering::SeqCst) {
        return Json(json!({
            "data": null,
            "errors": [{ "code": 3001, "message": "Invalid input: node internals leaked here" }]
        }));
    }

    match operation {
        "createMyFile" => {
            let secret = variables["secret"].as_str().unwrap_or_default().to_string();
            let file_id = variables["fileId"].as_str().unwrap_or_default();
            let object_url = state
                .find_object(file_id)
                .map(|blob| blob.url)
                .unwrap_or_default();
            let record = json!({
                "id": format!("rec-{secret}"),
                "name": variables["name"],
                "size": variables["size"],
                "url": variables["url"],
                "contentType": variables["contentType"],
                "file": { "url": object_url },
            });
            state
                .records
                .lock()
                .unwrap()
                .insert(secret, record.clone());
            Json(json!({
                "data": {
                    "createMyFile": {
                        "id": record["id"],
                        "name": record["name"],
                        "size": record["size"],
                        "url": record["url"],
                        "contentType": record["contentType"],
                    }
                }
            }))
        }
        "updateFile" => {
            let id = variables["id"].as_str().unwrap_or_default();
            let updated = state.find_object(id).map(|blob| {
                json!({
                    "id": blob.id,
                    "name": blob.name,
                    "newUrl": variables["newUrl"],
                    "contentType": blob.content_type,
                })
            });
            Json(json!({ "data": { "updateFile": updated } }))
        }
        "MyFile" => {
            let secret = variables["secret"].as_str().unwrap_or_default();
            let record = state.records.lock().unwrap().get(secret).map(|record| {
                json!({
                    "id": record["id"],
                    "size": record["size"],
                    "file": record["file"],
                })
            });
            Json(json!({ "data": { "MyFile": record } }))
        }
        _ => Json(json!({
            "data": null,
            "errors": [{ "code": 3001, "message": "Unknown operation" }]
        })),
    }
}

async fn fetch_object(
    State(state): State<Arc<BackendState>>,
    Path((_project_id, key)): Path<(String, String)>,
    headers: HeaderMap,
) -> Response {
    state.record("fetch_object", &headers, Value::Null);

    match state.find_object(&key) {
        Some(blob) => (
            [
                (header::CONTENT_TYPE, blob.content_type),
                (header::CACHE_CONTROL, "private, max-age=60".to_string()),
            ],
            blob.bytes,
        )
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

/// Test server instance
pub struct TestServer {
    pub addr: String,
    pub state: AppState,
    pub backend: MockBackend,
    pub client: reqwest::Client,
}

impl TestServer {
    /// Create a new test server in metadata mode
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    /// Create a test server with its own backend and adjusted configuration
    pub async fn with_config(adjust: impl FnOnce(&mut config::AppConfig)) -> Self {
        let backend = MockBackend::start().await;
        Self::on_backend(backend, adjust).await
    }

    /// Create a test server in front of an existing mock backend
    pub async fn on_backend(
        backend: MockBackend,
        adjust: impl FnOnce(&mut config::AppConfig),
    ) -> Self {
        crypt_proxy::metrics::init_metrics();

        // Bind first so the public URL points back at this server.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = format!("http://{}", listener.local_addr().unwrap());

        let mut config = test_config(&addr, &backend.addr);
        adjust(&mut config);

        let state = AppState::new(config).unwrap();
        let app = crypt_proxy::build_router(state.clone());

        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap();

        Self {
            addr,
            state,
            backend,
            client,
        }
    }

    /// Get base URL for API requests
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.addr, path)
    }

    /// Upload a single file part
    pub async fn upload(
        &self,
        project_id: &str,
        file_name: &str,
        content_type: &str,
        bytes: Vec<u8>,
        token: Option<&str>,
    ) -> reqwest::Response {
        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name(file_name.to_string())
            .mime_str(content_type)
            .unwrap();
        let form = reqwest::multipart::Form::new().part("data", part);
        self.post_form(project_id, form, token).await
    }

    pub async fn post_form(
        &self,
        project_id: &str,
        form: reqwest::multipart::Form,
        token: Option<&str>,
    ) -> reqwest::Response {
        let mut request = self
            .client
            .post(self.url(&format!("/{project_id}")))
            .multipart(form);
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }
        request.send().await.unwrap()
    }

    /// Upload and return the parsed metadata record
    pub async fn upload_ok(&self, project_id: &str, file_name: &str, bytes: Vec<u8>) -> Value {
        let response = self
            .upload(project_id, file_name, "application/octet-stream", bytes, None)
            .await;
        assert_eq!(response.status(), 200, "upload should succeed");
        response.json().await.unwrap()
    }
}

/// Configuration pointing at the mock backend
pub fn test_config(public_url: &str, backend_url: &str) -> config::AppConfig {
    let parse = |raw: String| url::Url::parse(&raw).unwrap();

    config::AppConfig {
        server: config::ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            public_url: parse(public_url.to_string()),
        },
        backend: config::BackendConfig {
            file_api_url: parse(format!("{backend_url}/file/v1")),
            graphql_url: parse(format!("{backend_url}/simple/v1")),
            files_url: parse(format!("{backend_url}/files")),
            permission_denied_code: "3008".to_string(),
            connect_timeout_seconds: 2,
        },
        proxy: config::ProxyConfig {
            mode: config::ProxyMode::Metadata,
            max_upload_bytes: 4 * 1024 * 1024,
            request_timeout_seconds: 10,
            relay_buffer_chunks: 4,
        },
        encryption: config::EncryptionConfig {
            passphrase: PASSPHRASE.to_string(),
        },
        logging: config::LoggingConfig {
            level: "info".to_string(),
            format: "pretty".to_string(),
        },
    }
}

/// Deterministic, non-repeating-looking payload
pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 251) as u8).collect()
}

/// Address nothing is listening on
pub async fn dead_address() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = format!("http://{}", listener.local_addr().unwrap());
    drop(listener);
    addr
}
