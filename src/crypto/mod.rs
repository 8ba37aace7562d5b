//! Streaming encryption
//!
//! - `cipher`: chunked AES-256-GCM envelope (incremental encryptor/decryptor)
//! - `stream`: `Stream` adapters used by the upload and download pipelines

mod cipher;
mod stream;

pub use cipher::{CHUNK_SIZE, Decryptor, Encryptor, StreamCipher};
pub use stream::{decrypt_stream, encrypt_stream};
