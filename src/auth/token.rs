//! Caller credentials
//!
//! The proxy never validates tokens itself; it forwards them so the
//! metadata layer can apply its permission rules.

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{HeaderMap, request::Parts},
};

const ACCESS_TOKEN_PARAM: &str = "access_token";

fn extract_token_from_headers(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(axum::http::header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then(|| token.to_owned())
}

fn extract_token_from_query(query: Option<&str>) -> Option<String> {
    url::form_urlencoded::parse(query?.as_bytes())
        .find(|(key, value)| key == ACCESS_TOKEN_PARAM && !value.is_empty())
        .map(|(_, value)| value.into_owned())
}

/// Optional bearer token of the caller
///
/// Read from the `Authorization` header, falling back to the
/// `access_token` query parameter. Absent means anonymous.
#[derive(Clone, Default)]
pub struct BearerToken(pub Option<String>);

impl BearerToken {
    pub fn as_deref(&self) -> Option<&str> {
        self.0.as_deref()
    }
}

impl std::fmt::Debug for BearerToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.0 {
            Some(_) => f.write_str("BearerToken(<redacted>)"),
            None => f.write_str("BearerToken(None)"),
        }
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for BearerToken
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let token = extract_token_from_headers(&parts.headers)
            .or_else(|| extract_token_from_query(parts.uri.query()));
        Ok(BearerToken(token))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn header_token_is_extracted() {
        assert_eq!(
            extract_token_from_headers(&headers("Bearer abc.def")),
            Some("abc.def".to_string())
        );
        assert_eq!(
            extract_token_from_headers(&headers("bearer   abc")),
            Some("abc".to_string())
        );
    }

    #[test]
    fn other_schemes_are_ignored() {
        assert_eq!(extract_token_from_headers(&headers("Basic dXNlcjpwdw==")), None);
        assert_eq!(extract_token_from_headers(&headers("Bearer ")), None);
    }

    #[test]
    fn query_token_is_extracted() {
        assert_eq!(
            extract_token_from_query(Some("x=1&access_token=t%2B1")),
            Some("t+1".to_string())
        );
        assert_eq!(extract_token_from_query(Some("access_token=")), None);
        assert_eq!(extract_token_from_query(None), None);
    }

    #[test]
    fn debug_output_hides_token() {
        let rendered = format!("{:?}", BearerToken(Some("secret".to_string())));
        assert!(!rendered.contains("secret"));
    }
}
