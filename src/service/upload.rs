//! Upload pipeline
//!
//! ```text
//! part bytes ─► encrypt ─► bounded channel ─► object create (chunked)
//!                                                   │
//!                              register metadata ◄──┘
//! ```
//!
//! The relay loop and the backend request run concurrently on the request's
//! task. The channel holds at most `relay_buffer_chunks` encrypted chunks, so a
//! slow backend suspends reads from the client.

use std::io;

use bytes::Bytes;
use futures::stream::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use url::Url;

use super::links::proxy_url;
use crate::backend::graphql::{
    CREATE_MY_FILE, CreateMyFileData, CreateMyFileVariables, UPDATE_FILE, UpdateFileData,
    UpdateFileVariables,
};
use crate::backend::{BackendClient, MetadataRecord, StoredObject, UpdatedFile};
use crate::config::{AppConfig, ProxyMode};
use crate::crypto::{StreamCipher, encrypt_stream};
use crate::error::AppError;

/// Everything known about an upload besides its bytes
#[derive(Clone)]
pub struct UploadRequest {
    pub project_id: String,
    pub file_name: String,
    pub content_type: String,
    pub auth_token: Option<String>,
}

impl std::fmt::Debug for UploadRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadRequest")
            .field("project_id", &self.project_id)
            .field("file_name", &self.file_name)
            .field("content_type", &self.content_type)
            .field("auth_token", &self.auth_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// A file that reached backend storage but is not registered yet
#[derive(Debug)]
pub struct StoredUpload {
    pub object: StoredObject,
    /// Bytes read from the inbound part, before encryption
    pub plaintext_bytes: u64,
}

/// Upload service
pub struct UploadService {
    backend: BackendClient,
    cipher: StreamCipher,
    public_url: Url,
    mode: ProxyMode,
    max_upload_bytes: u64,
    relay_buffer_chunks: usize,
}

impl UploadService {
    pub fn new(config: &AppConfig, backend: BackendClient, cipher: StreamCipher) -> Self {
        Self {
            backend,
            cipher,
            public_url: config.server.public_url.clone(),
            mode: config.proxy.mode,
            max_upload_bytes: config.proxy.max_upload_bytes as u64,
            relay_buffer_chunks: config.proxy.relay_buffer_chunks,
        }
    }

    /// Encrypt `plaintext` while relaying it to backend storage.
    ///
    /// # Errors
    /// - Errors from `plaintext` (client disconnect, malformed body) win over
    ///   the backend error they cause.
    /// - `PayloadTooLarge` once more than `max_upload_bytes` have been read.
    pub async fn store<S>(
        &self,
        request: &UploadRequest,
        plaintext: S,
    ) -> Result<StoredUpload, AppError>
    where
        S: Stream<Item = Result<Bytes, AppError>> + Send,
    {
        let (tx, rx) = mpsc::channel::<Result<Bytes, io::Error>>(self.relay_buffer_chunks);
        let body = reqwest::Body::wrap_stream(ReceiverStream::new(rx));

        tracing::debug!(
            project_id = %request.project_id,
            file_name = %request.file_name,
            "Relaying encrypted upload"
        );

        let create = self.backend.create_object(
            &request.project_id,
            &request.file_name,
            &request.content_type,
            body,
            request.auth_token.as_deref(),
        );
        let relay = self.relay(plaintext, tx);

        match tokio::join!(create, relay) {
            (Ok(object), Ok(plaintext_bytes)) => {
                tracing::info!(
                    project_id = %request.project_id,
                    object_id = %object.id,
                    plaintext_bytes,
                    encrypted_bytes = ?object.size,
                    "Encrypted object stored"
                );
                Ok(StoredUpload {
                    object,
                    plaintext_bytes,
                })
            }
            // The relay only noticed that the backend went away.
            (Err(error), Err(RelayError::Downstream)) => Err(error),
            (_, Err(RelayError::Source(error))) => Err(error),
            (Err(error), Ok(_)) => Err(error),
            (Ok(object), Err(RelayError::Downstream)) => {
                tracing::warn!(object_id = %object.id, "Backend accepted a partial upload");
                Err(AppError::backend("partial_upload", "backend closed the upload early"))
            }
        }
    }

    async fn relay<S>(
        &self,
        plaintext: S,
        tx: mpsc::Sender<Result<Bytes, io::Error>>,
    ) -> Result<u64, RelayError>
    where
        S: Stream<Item = Result<Bytes, AppError>> + Send,
    {
        let encryptor = self.cipher.encryptor().map_err(RelayError::Source)?;
        let limit = self.max_upload_bytes;
        let mut plaintext_bytes = 0_u64;

        {
            let counted = plaintext.map(|chunk| {
                let chunk = chunk?;
                plaintext_bytes += chunk.len() as u64;
                if plaintext_bytes > limit {
                    return Err(AppError::PayloadTooLarge);
                }
                Ok(chunk)
            });
            let mut frames = Box::pin(encrypt_stream(encryptor, counted));

            while let Some(frame) = frames.next().await {
                match frame {
                    Ok(frame) => {
                        tx.send(Ok(frame))
                            .await
                            .map_err(|_| RelayError::Downstream)?;
                    }
                    Err(error) => {
                        // Fail the backend body so the half-written object is not committed.
                        let _ = tx.send(Err(io::Error::other(error.to_string()))).await;
                        return Err(RelayError::Source(error));
                    }
                }
            }
        }

        Ok(plaintext_bytes)
    }

    /// Record the stored object with the metadata layer.
    ///
    /// On `PermissionDenied` the stored object is left for the external
    /// cleanup job.
    pub async fn register(
        &self,
        request: &UploadRequest,
        stored: StoredUpload,
    ) -> Result<MetadataRecord, AppError> {
        let files_url = &self.backend.config().files_url;
        let url = proxy_url(&self.public_url, files_url, &stored.object.url)?;
        let token = request.auth_token.as_deref();

        let record = match self.mode {
            ProxyMode::Metadata => {
                let secret = stored.object.secret.as_deref().ok_or_else(|| {
                    AppError::backend("invalid_response", "object create returned no secret")
                })?;
                let variables = CreateMyFileVariables {
                    secret,
                    name: &request.file_name,
                    size: stored.plaintext_bytes,
                    content_type: &request.content_type,
                    url: url.as_str(),
                    file_id: &stored.object.id,
                };
                let data: CreateMyFileData<MetadataRecord> = self
                    .backend
                    .graphql(
                        &request.project_id,
                        "create_my_file",
                        CREATE_MY_FILE,
                        variables,
                        token,
                    )
                    .await?;
                let mut record = data.create_my_file.ok_or_else(|| {
                    AppError::backend("invalid_response", "createMyFile returned null")
                })?;
                record.object_id = stored.object.id.clone();
                record
            }
            ProxyMode::Direct => {
                let variables = UpdateFileVariables {
                    id: &stored.object.id,
                    new_url: url.as_str(),
                };
                let data: UpdateFileData<UpdatedFile> = self
                    .backend
                    .graphql(
                        &request.project_id,
                        "update_file",
                        UPDATE_FILE,
                        variables,
                        token,
                    )
                    .await?;
                let updated = data.update_file.ok_or_else(|| {
                    AppError::backend("invalid_response", "updateFile returned null")
                })?;
                MetadataRecord {
                    id: updated.id,
                    name: updated.name,
                    size: stored.plaintext_bytes,
                    url: updated.new_url.unwrap_or_else(|| url.to_string()),
                    content_type: updated
                        .content_type
                        .unwrap_or_else(|| request.content_type.clone()),
                    object_id: stored.object.id.clone(),
                }
            }
        };

        tracing::info!(
            project_id = %request.project_id,
            record_id = %record.id,
            object_id = %record.object_id,
            size = record.size,
            "Upload registered"
        );
        Ok(record)
    }
}

enum RelayError {
    /// Reading or encrypting the inbound part failed
    Source(AppError),
    /// The backend stopped consuming the body
    Downstream,
}
