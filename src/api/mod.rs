//! API layer
//!
//! HTTP handlers for:
//! - Encrypted upload and decrypted download
//! - Metrics (Prometheus)

mod files;
pub mod metrics;

use axum::{
    Router,
    routing::{get, post},
};

use crate::AppState;

pub use metrics::metrics_router;

/// Create the file proxy router
///
/// - `POST /:project_id` uploads a single file
/// - `GET /:project_id/:file_ref` downloads one
pub fn files_router() -> Router<AppState> {
    Router::new()
        .route("/:project_id", post(files::upload_file))
        .route("/:project_id/:file_ref", get(files::download_file))
}
