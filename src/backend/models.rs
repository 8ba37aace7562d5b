//! Backend payloads

use serde::{Deserialize, Serialize};

/// File node returned by the object-create call
///
/// The size reported here is the ciphertext size.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredObject {
    pub id: String,
    #[serde(default)]
    pub secret: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub size: Option<u64>,
    pub url: String,
    #[serde(default)]
    pub content_type: Option<String>,
}

/// Metadata record as returned to upload callers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataRecord {
    pub id: String,
    pub name: String,
    /// Plaintext size in bytes
    pub size: u64,
    /// URL pointing back at this proxy
    pub url: String,
    pub content_type: String,
    /// Backend object the record points at
    #[serde(skip)]
    pub object_id: String,
}

/// File node returned by `updateFile`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatedFile {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub new_url: Option<String>,
    #[serde(default)]
    pub content_type: Option<String>,
}

/// Metadata lookup result used by downloads
#[derive(Debug, Clone, Deserialize)]
pub struct ResolvedFile {
    pub id: String,
    /// Plaintext size recorded at upload time
    pub size: u64,
    pub file: ResolvedObject,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResolvedObject {
    pub url: String,
}
