//! Prometheus metrics registry and instruments.
//!
//! This module is framework-agnostic and can be used from any layer.

use lazy_static::lazy_static;
use prometheus::{Counter, HistogramOpts, IntCounterVec, Opts, Registry};

lazy_static! {
    /// Global Prometheus registry
    pub static ref REGISTRY: Registry = Registry::new();

    // HTTP Metrics
    pub static ref HTTP_REQUEST_DURATION_SECONDS: prometheus::HistogramVec = prometheus::HistogramVec::new(
        HistogramOpts::new(
            "crypt_proxy_http_request_duration_seconds",
            "HTTP request duration in seconds"
        ).buckets(vec![0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 120.0]),
        &["method", "endpoint"]
    ).expect("metric can be created");

    // Pipeline Metrics
    pub static ref UPLOADS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("crypt_proxy_uploads_total", "Total number of upload pipelines run"),
        &["status"]
    ).expect("metric can be created");
    pub static ref DOWNLOADS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("crypt_proxy_downloads_total", "Total number of download pipelines run"),
        &["status"]
    ).expect("metric can be created");
    pub static ref PLAINTEXT_BYTES_UPLOADED: Counter = Counter::new(
        "crypt_proxy_plaintext_bytes_uploaded_total",
        "Total plaintext bytes accepted for upload"
    ).expect("metric can be created");

    // Backend Metrics
    pub static ref BACKEND_REQUESTS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("crypt_proxy_backend_requests_total", "Total number of backend requests"),
        &["operation", "outcome"]
    ).expect("metric can be created");

    // Error Metrics
    pub static ref ERRORS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("crypt_proxy_errors_total", "Total number of errors"),
        &["error_type"]
    ).expect("metric can be created");
}

/// Initialize metrics registry.
///
/// Safe to call more than once; later registrations are ignored.
pub fn init_metrics() {
    let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
        Box::new(HTTP_REQUEST_DURATION_SECONDS.clone()),
        Box::new(UPLOADS_TOTAL.clone()),
        Box::new(DOWNLOADS_TOTAL.clone()),
        Box::new(PLAINTEXT_BYTES_UPLOADED.clone()),
        Box::new(BACKEND_REQUESTS_TOTAL.clone()),
        Box::new(ERRORS_TOTAL.clone()),
    ];

    for collector in collectors {
        if let Err(error) = REGISTRY.register(collector) {
            tracing::debug!(%error, "Metric already registered");
        }
    }

    tracing::info!("Metrics registry initialized");
}

/// Record the outcome of a backend call.
pub fn record_backend(operation: &str, ok: bool) {
    BACKEND_REQUESTS_TOTAL
        .with_label_values(&[operation, if ok { "ok" } else { "error" }])
        .inc();
}
