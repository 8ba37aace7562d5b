//! File endpoints

use axum::{
    body::Body,
    extract::{Multipart, Path, State},
    response::{Json, Response},
};
use futures::TryStreamExt;

use crate::AppState;
use crate::auth::BearerToken;
use crate::backend::MetadataRecord;
use crate::error::AppError;
use crate::metrics::{
    DOWNLOADS_TOTAL, HTTP_REQUEST_DURATION_SECONDS, PLAINTEXT_BYTES_UPLOADED, UPLOADS_TOTAL,
};
use crate::service::{UploadRequest, with_deadline};

const MAX_IDENTIFIER_LEN: usize = 128;
const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Project ids, secrets and object ids are opaque tokens.
fn validate_identifier(kind: &str, value: &str) -> Result<(), AppError> {
    let valid = !value.is_empty()
        && value.len() <= MAX_IDENTIFIER_LEN
        && value
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_');
    if valid {
        Ok(())
    } else {
        Err(AppError::Parse(format!("Invalid {kind}")))
    }
}

fn outcome<T>(result: &Result<T, AppError>) -> &'static str {
    match result {
        Ok(_) => "success",
        Err(error) => error.kind(),
    }
}

/// POST /:project_id
pub async fn upload_file(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
    token: BearerToken,
    mut multipart: Multipart,
) -> Result<Json<MetadataRecord>, AppError> {
    let _timer = HTTP_REQUEST_DURATION_SECONDS
        .with_label_values(&["POST", "/:project_id"])
        .start_timer();

    validate_identifier("project id", &project_id)?;

    let result = tokio::time::timeout(
        state.config.proxy.request_timeout(),
        run_upload(&state, project_id, token, &mut multipart),
    )
    .await
    .unwrap_or(Err(AppError::Timeout));

    UPLOADS_TOTAL.with_label_values(&[outcome(&result)]).inc();
    if let Ok(record) = &result {
        PLAINTEXT_BYTES_UPLOADED.inc_by(record.size as f64);
    }

    result.map(Json)
}

async fn run_upload(
    state: &AppState,
    project_id: String,
    token: BearerToken,
    multipart: &mut Multipart,
) -> Result<MetadataRecord, AppError> {
    let mut stored = None;

    while let Some(field) = multipart.next_field().await? {
        let file_name = match field.file_name() {
            Some(name) if !name.is_empty() => name.to_string(),
            // Plain form fields carry no file.
            _ => continue,
        };
        if stored.is_some() {
            return Err(AppError::MultipleFiles);
        }

        let request = UploadRequest {
            project_id: project_id.clone(),
            file_name,
            content_type: field
                .content_type()
                .unwrap_or(DEFAULT_CONTENT_TYPE)
                .to_string(),
            auth_token: token.0.clone(),
        };

        let upload = state
            .uploads
            .store(&request, field.map_err(AppError::from))
            .await?;
        stored = Some((request, upload));
    }

    let (request, upload) =
        stored.ok_or_else(|| AppError::Parse("No file provided".to_string()))?;
    state.uploads.register(&request, upload).await
}

/// GET /:project_id/:file_ref
pub async fn download_file(
    State(state): State<AppState>,
    Path((project_id, file_ref)): Path<(String, String)>,
    token: BearerToken,
) -> Result<Response, AppError> {
    let _timer = HTTP_REQUEST_DURATION_SECONDS
        .with_label_values(&["GET", "/:project_id/:file_ref"])
        .start_timer();

    validate_identifier("project id", &project_id)?;
    validate_identifier("file reference", &file_ref)?;

    let deadline = tokio::time::Instant::now() + state.config.proxy.request_timeout();
    let result = tokio::time::timeout_at(
        deadline,
        state
            .downloads
            .open(&project_id, &file_ref, token.as_deref()),
    )
    .await
    .unwrap_or(Err(AppError::Timeout));

    DOWNLOADS_TOTAL.with_label_values(&[outcome(&result)]).inc();
    let download = result?;

    let mut response = Response::new(Body::from_stream(with_deadline(download.body, deadline)));
    *response.headers_mut() = download.headers;
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::validate_identifier;

    #[test]
    fn identifiers_accept_opaque_tokens() {
        assert!(validate_identifier("project id", "cj0abc-DEF_123").is_ok());
    }

    #[test]
    fn identifiers_reject_path_tricks() {
        for value in ["", "..", "a/b", "a%2Fb", "proj?x=1", "x".repeat(200).as_str()] {
            assert!(
                validate_identifier("project id", value).is_err(),
                "{value} must be rejected"
            );
        }
    }
}
