//! crypt-proxy binary entry point

use crypt_proxy::{AppState, config};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Application entry point
///
/// # Setup
/// 1. Initialize tracing/logging
/// 2. Initialize metrics
/// 3. Load configuration from file and environment
/// 4. Initialize AppState
/// 5. Build Axum router and start HTTP server
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1. Initialize tracing/logging
    let log_format =
        std::env::var("CRYPT_PROXY__LOGGING__FORMAT").unwrap_or_else(|_| "pretty".to_string());
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "crypt_proxy=info,tower_http=debug".into());

    if log_format == "json" {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().pretty())
            .init();
    }

    tracing::info!("Starting crypt-proxy...");

    // 2. Initialize metrics
    crypt_proxy::metrics::init_metrics();

    // 3. Load configuration
    let config = config::AppConfig::load()?;
    tracing::info!(
        public_url = %config.server.public_url,
        file_api = %config.backend.file_api_url,
        graphql = %config.backend.graphql_url,
        mode = ?config.proxy.mode,
        "Configuration loaded"
    );

    // 4. Initialize application state
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let state = AppState::new(config)?;

    // 5. Build Axum router and serve
    let app = crypt_proxy::build_router(state);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
