//! Caller credentials
//!
//! The proxy never validates tokens itself. Whatever the caller presents is
//! forwarded to the storage and metadata backends, which decide access.

mod token;

pub use token::BearerToken;
