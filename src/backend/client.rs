//! HTTP client for the storage and metadata backends
//!
//! Every call forwards the caller's bearer token when one was supplied and
//! is issued exactly once.

use std::sync::Arc;
use std::time::Duration;

use reqwest::multipart::{Form, Part};
use serde::Serialize;
use serde::de::DeserializeOwned;
use url::Url;

use super::graphql::{GraphQlRequest, GraphQlResponse};
use super::models::StoredObject;
use crate::config::BackendConfig;
use crate::error::AppError;
use crate::metrics::record_backend;

/// Backend client
///
/// Cheap to clone; the underlying connection pool is shared.
#[derive(Clone)]
pub struct BackendClient {
    http: reqwest::Client,
    config: Arc<BackendConfig>,
}

impl BackendClient {
    /// Create new backend client
    ///
    /// No overall timeout is set on the client: bodies are streamed and the
    /// per-request deadline is enforced by the pipelines.
    pub fn new(config: &BackendConfig) -> Result<Self, AppError> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("crypt-proxy/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(config.connect_timeout_seconds))
            .build()
            .map_err(|e| AppError::Internal(e.into()))?;

        Ok(Self {
            http,
            config: Arc::new(config.clone()),
        })
    }

    pub fn config(&self) -> &BackendConfig {
        &self.config
    }

    /// Upload an object with a streaming body.
    ///
    /// The body length is unknown, so the request goes out with chunked
    /// transfer encoding.
    pub async fn create_object(
        &self,
        project_id: &str,
        file_name: &str,
        content_type: &str,
        body: reqwest::Body,
        token: Option<&str>,
    ) -> Result<StoredObject, AppError> {
        let url = join_segments(&self.config.file_api_url, &[project_id])?;

        let part = Part::stream(body).file_name(file_name.to_string());
        let part = match part.mime_str(content_type) {
            Ok(part) => part,
            Err(error) => {
                tracing::debug!(%error, content_type, "Rejecting unusable content type");
                return Err(AppError::Parse("Invalid content type for uploaded file".to_string()));
            }
        };
        let form = Form::new().part("data", part);

        let response = with_token(self.http.post(url).multipart(form), token)
            .send()
            .await
            .inspect_err(|_| record_backend("create_object", false))?;

        let status = response.status();
        if !status.is_success() {
            record_backend("create_object", false);
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(%status, body = %truncate(&body), "Object create rejected");
            return Err(AppError::backend(status.as_str(), "object create rejected"));
        }

        let object = response
            .json::<StoredObject>()
            .await
            .map_err(|e| AppError::backend("invalid_response", e.to_string()))?;
        record_backend("create_object", true);
        Ok(object)
    }

    /// URL of a stored object addressed by id.
    pub fn object_url(&self, project_id: &str, object_id: &str) -> Result<Url, AppError> {
        join_segments(&self.config.files_url, &[project_id, object_id])
    }

    /// Check that a URL handed out by the metadata layer points at the file host.
    pub fn validate_object_url(&self, raw: &str) -> Result<Url, AppError> {
        let url = Url::parse(raw).map_err(|e| AppError::backend("invalid_url", e.to_string()))?;
        if url.origin() != self.config.files_url.origin() {
            return Err(AppError::backend(
                "foreign_url",
                format!("object URL is not served by the file host: {url}"),
            ));
        }
        Ok(url)
    }

    /// Open a stored object for streaming.
    ///
    /// Only the status line and headers have been read when this returns.
    pub async fn fetch_object(
        &self,
        url: Url,
        token: Option<&str>,
    ) -> Result<reqwest::Response, AppError> {
        let response = with_token(self.http.get(url), token)
            .send()
            .await
            .inspect_err(|_| record_backend("fetch_object", false))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            record_backend("fetch_object", false);
            return Err(AppError::NotFound);
        }
        if !status.is_success() {
            record_backend("fetch_object", false);
            tracing::warn!(%status, "Object fetch rejected");
            return Err(AppError::backend(status.as_str(), "object fetch rejected"));
        }

        record_backend("fetch_object", true);
        Ok(response)
    }

    /// Run a GraphQL operation against the project's metadata API.
    pub async fn graphql<V, T>(
        &self,
        project_id: &str,
        operation: &'static str,
        query: &str,
        variables: V,
        token: Option<&str>,
    ) -> Result<T, AppError>
    where
        V: Serialize,
        T: DeserializeOwned,
    {
        let url = join_segments(&self.config.graphql_url, &[project_id])?;

        let response = with_token(
            self.http
                .post(url)
                .json(&GraphQlRequest { query, variables }),
            token,
        )
        .send()
        .await
        .inspect_err(|_| record_backend(operation, false))?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .inspect_err(|_| record_backend(operation, false))?;

        // GraphQL servers may report errors with either 200 or 4xx.
        let result = match serde_json::from_slice::<GraphQlResponse<T>>(&body) {
            Ok(envelope) if status.is_success() || !envelope.errors.is_empty() => {
                envelope.into_result(&self.config.permission_denied_code)
            }
            Ok(_) => Err(AppError::backend(status.as_str(), "graphql request rejected")),
            Err(error) if status.is_success() => {
                Err(AppError::backend("invalid_response", error.to_string()))
            }
            Err(_) => Err(AppError::backend(status.as_str(), "graphql request rejected")),
        };

        match &result {
            Ok(_) => record_backend(operation, true),
            Err(AppError::PermissionDenied) => {
                record_backend(operation, false);
                tracing::info!(operation, project_id, "Metadata layer denied access");
            }
            Err(error) => {
                record_backend(operation, false);
                tracing::warn!(operation, project_id, %error, "GraphQL call failed");
            }
        }

        result
    }
}

fn with_token(request: reqwest::RequestBuilder, token: Option<&str>) -> reqwest::RequestBuilder {
    match token {
        Some(token) => request.bearer_auth(token),
        None => request,
    }
}

/// Append path segments to a base URL, escaping each segment.
pub(crate) fn join_segments(base: &Url, segments: &[&str]) -> Result<Url, AppError> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|_| AppError::Config(format!("{base} cannot be used as a base URL")))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

fn truncate(body: &str) -> &str {
    const MAX_LOGGED_BODY: usize = 256;
    match body.char_indices().nth(MAX_LOGGED_BODY) {
        Some((index, _)) => &body[..index],
        None => body,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> BackendClient {
        BackendClient::new(&crate::config::tests::valid_config().backend).unwrap()
    }

    #[test]
    fn join_segments_escapes_and_appends() {
        let base = Url::parse("https://api.example.com/file/v1/").unwrap();
        let url = join_segments(&base, &["proj", "a b"]).unwrap();
        assert_eq!(url.as_str(), "https://api.example.com/file/v1/proj/a%20b");
    }

    #[test]
    fn object_url_uses_files_host() {
        let url = client().object_url("proj", "obj1").unwrap();
        assert_eq!(url.as_str(), "https://files.example.com/proj/obj1");
    }

    #[test]
    fn validate_object_url_rejects_other_hosts() {
        let client = client();
        assert!(
            client
                .validate_object_url("https://files.example.com/proj/obj1")
                .is_ok()
        );

        let error = client
            .validate_object_url("http://169.254.169.254/latest/meta-data")
            .expect_err("foreign host must be rejected");
        assert!(matches!(error, AppError::Backend { code, .. } if code == "foreign_url"));
    }

    #[test]
    fn truncate_limits_logged_bodies() {
        let long = "x".repeat(1000);
        assert_eq!(truncate(&long).len(), 256);
        assert_eq!(truncate("short"), "short");
    }
}
