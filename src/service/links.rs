//! Rewriting backend file URLs into proxy URLs

use url::Url;

use crate::error::AppError;

/// Map a URL on the backend file host onto the proxy's public base.
///
/// `https://files.example.com/proj/abc` with files host
/// `https://files.example.com` and public base `https://proxy.example.com/task`
/// becomes `https://proxy.example.com/task/proj/abc`.
///
/// The backend URL must share the files host's origin and path prefix; the
/// remaining path is carried over, query and fragment are dropped.
pub fn proxy_url(public_base: &Url, files_url: &Url, backend_url: &str) -> Result<Url, AppError> {
    let backend = Url::parse(backend_url)
        .map_err(|e| AppError::backend("invalid_url", format!("{backend_url}: {e}")))?;

    if backend.origin() != files_url.origin() {
        return Err(AppError::backend(
            "foreign_url",
            format!("{backend} is not served by {files_url}"),
        ));
    }

    let prefix = non_empty_segments(files_url);
    let segments = non_empty_segments(&backend);
    if segments.len() <= prefix.len() || !segments.starts_with(&prefix) {
        return Err(AppError::backend(
            "foreign_url",
            format!("{backend} is outside {files_url}"),
        ));
    }

    let mut url = public_base.clone();
    let path = format!(
        "{}/{}",
        public_base.path().trim_end_matches('/'),
        segments[prefix.len()..].join("/")
    );
    url.set_path(&path);
    url.set_query(None);
    url.set_fragment(None);
    Ok(url)
}

fn non_empty_segments(url: &Url) -> Vec<&str> {
    url.path_segments()
        .map(|segments| segments.filter(|segment| !segment.is_empty()).collect())
        .unwrap_or_default()
}
