//! Prometheus scrape endpoint

use axum::{
    Router,
    http::header,
    response::{IntoResponse, Response},
    routing::get,
};
use prometheus::{Encoder, TextEncoder};

use crate::error::AppError;
use crate::metrics::REGISTRY;

/// GET /metrics
async fn scrape() -> Result<Response, AppError> {
    let encoder = TextEncoder::new();
    let text = encoder
        .encode_to_string(&REGISTRY.gather())
        .map_err(|e| AppError::Internal(e.into()))?;

    Ok(([(header::CONTENT_TYPE, encoder.format_type().to_string())], text).into_response())
}

/// Create metrics router
///
/// Pipeline counters carry no file names or tokens, so the endpoint is public.
pub fn metrics_router<S>() -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    Router::new().route("/metrics", get(scrape))
}
