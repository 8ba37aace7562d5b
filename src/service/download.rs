//! Download pipeline
//!
//! Resolves a file reference, opens the stored ciphertext and returns headers
//! plus a lazily decrypted body. The first plaintext chunk is decrypted before
//! returning so a wrong passphrase or foreign object fails with a status code
//! instead of a reset connection.

use bytes::Bytes;
use futures::stream::{self, BoxStream, Stream, StreamExt};
use http::header::{self, HeaderMap, HeaderValue};

use crate::backend::graphql::{MY_FILE_BY_SECRET, MyFileData, SecretVariables};
use crate::backend::{BackendClient, ResolvedFile};
use crate::config::{AppConfig, ProxyMode};
use crate::crypto::{StreamCipher, decrypt_stream};
use crate::error::AppError;

/// Headers that describe the upstream connection rather than the file
const HOP_BY_HOP: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Headers that describe the stored ciphertext, not the plaintext served
const CIPHERTEXT_ONLY: [&str; 5] = [
    "content-length",
    "content-md5",
    "content-range",
    "accept-ranges",
    "etag",
];

/// A file ready to be streamed to the client
pub struct Download {
    pub headers: HeaderMap,
    /// Plaintext size when recorded by the metadata layer
    pub content_length: Option<u64>,
    pub body: BoxStream<'static, Result<Bytes, AppError>>,
}

impl std::fmt::Debug for Download {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Download")
            .field("headers", &self.headers)
            .field("content_length", &self.content_length)
            .finish_non_exhaustive()
    }
}

/// Download service
pub struct DownloadService {
    backend: BackendClient,
    cipher: StreamCipher,
    mode: ProxyMode,
}

impl DownloadService {
    pub fn new(config: &AppConfig, backend: BackendClient, cipher: StreamCipher) -> Self {
        Self {
            backend,
            cipher,
            mode: config.proxy.mode,
        }
    }

    /// Open a download.
    ///
    /// `file_ref` is the metadata secret in metadata mode and the backend
    /// object id in direct mode. A permission denial returns before any
    /// object fetch is attempted.
    pub async fn open(
        &self,
        project_id: &str,
        file_ref: &str,
        token: Option<&str>,
    ) -> Result<Download, AppError> {
        let (url, content_length) = match self.mode {
            ProxyMode::Metadata => {
                let resolved = self.resolve(project_id, file_ref, token).await?;
                let url = self.backend.validate_object_url(&resolved.file.url)?;
                tracing::debug!(project_id, record_id = %resolved.id, "File reference resolved");
                (url, Some(resolved.size))
            }
            ProxyMode::Direct => (self.backend.object_url(project_id, file_ref)?, None),
        };

        let response = self.backend.fetch_object(url, token).await?;
        let headers = rewrite_headers(response.headers(), content_length);

        let plaintext = decrypt_stream(self.cipher.decryptor(), response.bytes_stream());
        let plaintext = match content_length {
            Some(expected) => enforce_length(plaintext, expected).boxed(),
            None => plaintext.boxed(),
        };
        let body = prime(plaintext).await?;

        Ok(Download {
            headers,
            content_length,
            body,
        })
    }

    async fn resolve(
        &self,
        project_id: &str,
        secret: &str,
        token: Option<&str>,
    ) -> Result<ResolvedFile, AppError> {
        let data: MyFileData<ResolvedFile> = self
            .backend
            .graphql(
                project_id,
                "resolve_file",
                MY_FILE_BY_SECRET,
                SecretVariables { secret },
                token,
            )
            .await?;
        data.my_file.ok_or(AppError::NotFound)
    }
}

/// Copy upstream headers, then fix the framing for the plaintext body.
fn rewrite_headers(upstream: &HeaderMap, content_length: Option<u64>) -> HeaderMap {
    let mut headers = upstream.clone();
    for name in HOP_BY_HOP.iter().chain(CIPHERTEXT_ONLY.iter()) {
        headers.remove(*name);
    }
    if let Some(length) = content_length {
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(length));
    }
    headers
}

/// Pull the first chunk so that early failures surface before headers are sent.
async fn prime(
    mut body: BoxStream<'static, Result<Bytes, AppError>>,
) -> Result<BoxStream<'static, Result<Bytes, AppError>>, AppError> {
    match body.next().await {
        Some(Ok(first)) => Ok(stream::once(async move { Ok(first) }).chain(body).boxed()),
        Some(Err(error)) => Err(error),
        None => Ok(stream::empty().boxed()),
    }
}

/// Fail the body if the plaintext disagrees with the advertised length.
fn enforce_length<S>(body: S, expected: u64) -> impl Stream<Item = Result<Bytes, AppError>> + Send
where
    S: Stream<Item = Result<Bytes, AppError>> + Send + 'static,
{
    stream::unfold(Some((Box::pin(body), 0_u64)), move |state| async move {
        let (mut body, seen) = state?;
        match body.next().await {
            Some(Ok(chunk)) => {
                let seen = seen + chunk.len() as u64;
                if seen > expected {
                    Some((Err(size_mismatch(expected, seen)), None))
                } else {
                    Some((Ok(chunk), Some((body, seen))))
                }
            }
            Some(Err(error)) => Some((Err(error), None)),
            None if seen == expected => None,
            None => Some((Err(size_mismatch(expected, seen)), None)),
        }
    })
}

fn size_mismatch(expected: u64, seen: u64) -> AppError {
    AppError::backend(
        "size_mismatch",
        format!("recorded size {expected} but decrypted at least {seen} bytes"),
    )
}
