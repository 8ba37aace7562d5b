//! Pipeline layer
//!
//! The upload and download pipelines, independent of the HTTP framework.

mod download;
mod links;
mod upload;

pub use download::{Download, DownloadService};
pub use links::proxy_url;
pub use upload::{StoredUpload, UploadRequest, UploadService};

use bytes::Bytes;
use futures::stream::{self, Stream, StreamExt};
use tokio::time::Instant;

use crate::error::AppError;

/// End a body stream with `Timeout` once `deadline` passes.
///
/// Dropping the inner stream closes the upstream connection.
pub fn with_deadline<S>(
    body: S,
    deadline: Instant,
) -> impl Stream<Item = Result<Bytes, AppError>> + Send
where
    S: Stream<Item = Result<Bytes, AppError>> + Send + 'static,
{
    stream::unfold(Some(Box::pin(body)), move |state| async move {
        let mut body = state?;
        match tokio::time::timeout_at(deadline, body.next()).await {
            Ok(Some(Ok(chunk))) => Some((Ok(chunk), Some(body))),
            Ok(Some(Err(error))) => {
                tracing::error!(%error, "Download body failed mid-stream");
                Some((Err(error), None))
            }
            Ok(None) => None,
            Err(_) => {
                tracing::warn!("Download exceeded the request deadline");
                Some((Err(AppError::Timeout), None))
            }
        }
    })
}
