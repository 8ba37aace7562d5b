//! crypt-proxy - an encrypting file proxy
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      API Layer (Axum)                        │
//! │  - POST /:project_id            multipart upload            │
//! │  - GET  /:project_id/:file_ref  decrypted download          │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Pipeline Layer                           │
//! │  - Upload: parse → encrypt → store → register               │
//! │  - Download: resolve → fetch → decrypt                      │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Backend Layer                           │
//! │  - Object storage (chunked create, streaming fetch)         │
//! │  - GraphQL metadata API (permissions live here)             │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - `api`: HTTP handlers
//! - `service`: Upload and download pipelines
//! - `crypto`: Streaming authenticated encryption
//! - `backend`: Storage and GraphQL client
//! - `auth`: Bearer token pass-through
//! - `config`: Configuration management
//! - `error`: Error types
//! - `metrics`: Prometheus instruments

pub mod api;
pub mod auth;
pub mod backend;
pub mod config;
pub mod crypto;
pub mod error;
pub mod metrics;
pub mod service;

use std::sync::Arc;

/// Application state shared across all handlers
///
/// Everything in here is read-only after startup.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration
    pub config: Arc<config::AppConfig>,

    /// Upload pipeline
    pub uploads: Arc<service::UploadService>,

    /// Download pipeline
    pub downloads: Arc<service::DownloadService>,
}

impl AppState {
    /// Initialize application state
    ///
    /// # Errors
    /// Returns error if the backend HTTP client cannot be built
    pub fn new(config: config::AppConfig) -> Result<Self, error::AppError> {
        tracing::info!("Initializing application state...");

        let backend = backend::BackendClient::new(&config.backend)?;
        let cipher = crypto::StreamCipher::new(&config.encryption.passphrase);

        let uploads = service::UploadService::new(&config, backend.clone(), cipher.clone());
        let downloads = service::DownloadService::new(&config, backend, cipher);

        tracing::info!(mode = ?config.proxy.mode, "Application state initialized");

        Ok(Self {
            config: Arc::new(config),
            uploads: Arc::new(uploads),
            downloads: Arc::new(downloads),
        })
    }
}

/// Build the Axum router with all routes.
///
/// This is shared by the binary and integration tests to keep route
/// composition consistent across environments.
pub fn build_router(state: AppState) -> axum::Router {
    use axum::Router;
    use axum::extract::DefaultBodyLimit;
    use tower_http::{cors::CorsLayer, limit::RequestBodyLimitLayer, trace::TraceLayer};

    // Room for multipart boundaries and part headers around the file itself.
    const MULTIPART_OVERHEAD_BYTES: usize = 64 * 1024;
    let body_limit = state
        .config
        .proxy
        .max_upload_bytes
        .saturating_add(MULTIPART_OVERHEAD_BYTES);

    Router::new()
        .route("/health", axum::routing::get(health_check))
        .merge(api::files_router())
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
        .merge(api::metrics_router())
}

async fn health_check() -> &'static str {
    "OK"
}
