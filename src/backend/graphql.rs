//! GraphQL envelope and the metadata operations the proxy issues

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::AppError;

pub const CREATE_MY_FILE: &str = r#"
mutation createMyFile($secret: String!, $name: String!, $size: Int!, $contentType: String!, $url: String!, $fileId: ID!) {
  createMyFile(secret: $secret, name: $name, size: $size, contentType: $contentType, url: $url, fileId: $fileId) {
    id
    name
    size
    url
    contentType
  }
}"#;

pub const UPDATE_FILE: &str = r#"
mutation updateFile($id: ID!, $newUrl: String!) {
  updateFile(id: $id, newUrl: $newUrl) {
    id
    name
    newUrl
    contentType
  }
}"#;

pub const MY_FILE_BY_SECRET: &str = r#"
query myFile($secret: String!) {
  MyFile(secret: $secret) {
    id
    size
    file { url }
  }
}"#;

#[derive(Debug, Serialize)]
pub struct GraphQlRequest<'a, V> {
    pub query: &'a str,
    pub variables: V,
}

#[derive(Debug, Deserialize)]
pub struct GraphQlResponse<T> {
    pub data: Option<T>,
    #[serde(default)]
    pub errors: Vec<GraphQlError>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GraphQlError {
    #[serde(default)]
    pub code: Option<ErrorCode>,
    #[serde(default)]
    pub message: String,
}

/// Error codes arrive as numbers from some servers and strings from others.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum ErrorCode {
    Number(i64),
    Text(String),
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorCode::Number(code) => write!(f, "{code}"),
            ErrorCode::Text(code) => f.write_str(code),
        }
    }
}

impl<T: DeserializeOwned> GraphQlResponse<T> {
    /// Turn the envelope into data or a typed error.
    ///
    /// Any error carrying `denied_code` wins over other errors.
    pub fn into_result(self, denied_code: &str) -> Result<T, AppError> {
        if self
            .errors
            .iter()
            .any(|error| error.code.as_ref().is_some_and(|code| code.to_string() == denied_code))
        {
            return Err(AppError::PermissionDenied);
        }

        if let Some(error) = self.errors.into_iter().next() {
            let code = error
                .code
                .map(|code| code.to_string())
                .unwrap_or_else(|| "graphql".to_string());
            return Err(AppError::backend(code, error.message));
        }

        self.data
            .ok_or_else(|| AppError::backend("graphql", "response carried neither data nor errors"))
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateMyFileVariables<'a> {
    pub secret: &'a str,
    pub name: &'a str,
    pub size: u64,
    pub content_type: &'a str,
    pub url: &'a str,
    pub file_id: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateFileVariables<'a> {
    pub id: &'a str,
    pub new_url: &'a str,
}

#[derive(Debug, Serialize)]
pub struct SecretVariables<'a> {
    pub secret: &'a str,
}

#[derive(Debug, Deserialize)]
pub struct CreateMyFileData<T> {
    #[serde(rename = "createMyFile")]
    pub create_my_file: Option<T>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateFileData<T> {
    #[serde(rename = "updateFile")]
    pub update_file: Option<T>,
}

#[derive(Debug, Deserialize)]
pub struct MyFileData<T> {
    #[serde(rename = "MyFile")]
    pub my_file: Option<T>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(value: serde_json::Value) -> GraphQlResponse<serde_json::Value> {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn numeric_denial_code_is_permission_denied() {
        let response = parse(json!({
            "data": null,
            "errors": [{ "code": 3008, "message": "Insufficient Permissions" }]
        }));
        assert!(matches!(
            response.into_result("3008"),
            Err(AppError::PermissionDenied)
        ));
    }

    #[test]
    fn string_denial_code_is_permission_denied() {
        let response = parse(json!({
            "errors": [
                { "code": "1000", "message": "other" },
                { "code": "3008", "message": "Insufficient Permissions" }
            ]
        }));
        assert!(matches!(
            response.into_result("3008"),
            Err(AppError::PermissionDenied)
        ));
    }

    #[test]
    fn other_codes_become_backend_errors() {
        let response = parse(json!({
            "errors": [{ "code": 3001, "message": "Invalid input" }]
        }));
        match response.into_result("3008") {
            Err(AppError::Backend { code, message }) => {
                assert_eq!(code, "3001");
                assert_eq!(message, "Invalid input");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn data_without_errors_is_returned() {
        let response = parse(json!({ "data": { "ok": true } }));
        assert_eq!(response.into_result("3008").unwrap(), json!({ "ok": true }));
    }

    #[test]
    fn mutation_variables_use_graphql_names() {
        let variables = CreateMyFileVariables {
            secret: "s1",
            name: "photo.png",
            size: 10,
            content_type: "image/png",
            url: "https://proxy/obj1",
            file_id: "obj1",
        };
        let value = serde_json::to_value(variables).unwrap();
        assert_eq!(value["contentType"], "image/png");
        assert_eq!(value["fileId"], "obj1");
    }
}
