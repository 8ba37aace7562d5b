//! Configuration management
//!
//! Loads configuration from:
//! 1. Default values
//! 2. Configuration file (config/default.toml, config/local.toml)
//! 3. Environment variables (override)

use serde::Deserialize;
use std::time::Duration;
use url::Url;

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub backend: BackendConfig,
    pub proxy: ProxyConfig,
    pub encryption: EncryptionConfig,
    pub logging: LoggingConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0")
    pub host: String,
    /// Port number (e.g., 8080)
    pub port: u16,
    /// Base URL clients use to reach this proxy
    /// e.g., "https://proxy.example.com/files"
    pub public_url: Url,
}

/// Backend collaborators (object storage + GraphQL metadata API)
#[derive(Debug, Clone, Deserialize)]
pub struct BackendConfig {
    /// Object-create endpoint base, project id is appended
    /// e.g., "https://api.graph.cool/file/v1"
    pub file_api_url: Url,
    /// GraphQL endpoint base, project id is appended
    /// e.g., "https://api.graph.cool/simple/v1"
    pub graphql_url: Url,
    /// Host serving stored objects, project id and object id are appended
    /// e.g., "https://files.graph.cool"
    pub files_url: Url,
    /// GraphQL error code signalling an authorization rejection
    pub permission_denied_code: String,
    /// TCP connect timeout for backend calls
    pub connect_timeout_seconds: u64,
}

/// Download addressing and registration variant
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProxyMode {
    /// Register a metadata record; downloads resolve its secret
    #[default]
    Metadata,
    /// Rewrite the backend file record; downloads address the object id
    Direct,
}

/// Pipeline tuning
#[derive(Debug, Clone, Deserialize)]
pub struct ProxyConfig {
    #[serde(default)]
    pub mode: ProxyMode,
    /// Largest accepted upload body in bytes
    pub max_upload_bytes: usize,
    /// End-to-end deadline per request
    pub request_timeout_seconds: u64,
    /// Encrypted chunks buffered between the part reader and the backend
    pub relay_buffer_chunks: usize,
}

impl ProxyConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }
}

/// Pre-shared encryption secret
#[derive(Clone, Deserialize)]
pub struct EncryptionConfig {
    pub passphrase: String,
}

impl std::fmt::Debug for EncryptionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptionConfig")
            .field("passphrase", &"<redacted>")
            .finish()
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    pub level: String,
    /// Log format: "pretty" or "json"
    pub format: String,
}

impl AppConfig {
    /// Load configuration from file and environment
    ///
    /// # Loading Order
    /// 1. Default values
    /// 2. config/default.toml (if exists)
    /// 3. config/local.toml (if exists)
    /// 4. Environment variables (CRYPT_PROXY__*)
    ///
    /// # Errors
    /// Returns error if configuration is invalid
    pub fn load() -> Result<Self, crate::error::AppError> {
        use config::{Config, Environment, File};

        let config = Config::builder()
            .set_default("server.host", "127.0.0.1")?
            .set_default("server.port", 8080)?
            .set_default("server.public_url", "http://127.0.0.1:8080")?
            .set_default("backend.file_api_url", "https://api.graph.cool/file/v1")?
            .set_default("backend.graphql_url", "https://api.graph.cool/simple/v1")?
            .set_default("backend.files_url", "https://files.graph.cool")?
            .set_default("backend.permission_denied_code", "3008")?
            .set_default("backend.connect_timeout_seconds", 10)?
            .set_default("proxy.mode", "metadata")?
            .set_default("proxy.max_upload_bytes", 256 * 1024 * 1024)?
            .set_default("proxy.request_timeout_seconds", 300)?
            .set_default("proxy.relay_buffer_chunks", 4)?
            .set_default("logging.level", "info")?
            .set_default("logging.format", "pretty")?
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            .add_source(
                Environment::with_prefix("CRYPT_PROXY")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| crate::error::AppError::Config(e.to_string()))?;

        let app_config: Self = config
            .try_deserialize()
            .map_err(|e| crate::error::AppError::Config(e.to_string()))?;
        app_config.validate()?;
        Ok(app_config)
    }

    pub(crate) fn validate(&self) -> Result<(), crate::error::AppError> {
        use crate::error::AppError;

        const MIN_PASSPHRASE_BYTES: usize = 16;

        if self.encryption.passphrase.len() < MIN_PASSPHRASE_BYTES {
            return Err(AppError::Config(format!(
                "encryption.passphrase must be at least {} bytes",
                MIN_PASSPHRASE_BYTES
            )));
        }

        for (key, url) in [
            ("server.public_url", &self.server.public_url),
            ("backend.file_api_url", &self.backend.file_api_url),
            ("backend.graphql_url", &self.backend.graphql_url),
            ("backend.files_url", &self.backend.files_url),
        ] {
            if url.cannot_be_a_base() || url.host_str().is_none() {
                return Err(AppError::Config(format!(
                    "{key} must be an absolute http(s) URL"
                )));
            }
        }

        if self.proxy.request_timeout_seconds == 0 {
            return Err(AppError::Config(
                "proxy.request_timeout_seconds must be greater than 0".to_string(),
            ));
        }

        if self.proxy.relay_buffer_chunks == 0 {
            return Err(AppError::Config(
                "proxy.relay_buffer_chunks must be greater than 0".to_string(),
            ));
        }

        if self.backend.permission_denied_code.trim().is_empty() {
            return Err(AppError::Config(
                "backend.permission_denied_code must not be empty".to_string(),
            ));
        }

        Ok(())
    }
}
