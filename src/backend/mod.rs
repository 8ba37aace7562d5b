//! Backend collaborators
//!
//! Handles:
//! - Object storage (create, fetch)
//! - GraphQL metadata API (register, update, resolve)

mod client;
pub mod graphql;
mod models;

pub use client::BackendClient;
pub use models::{MetadataRecord, ResolvedFile, ResolvedObject, StoredObject, UpdatedFile};
