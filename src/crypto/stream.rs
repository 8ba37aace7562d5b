//! Stream adapters over the envelope codec
//!
//! Both adapters are pull-based: nothing is read from the input until the
//! consumer asks for the next chunk, so a slow consumer throttles the source.

use bytes::Bytes;
use futures::stream::{self, Stream, StreamExt};

use super::cipher::{Decryptor, Encryptor};
use crate::error::AppError;

/// Encrypt a plaintext byte stream.
pub fn encrypt_stream<S, E>(
    encryptor: Encryptor,
    input: S,
) -> impl Stream<Item = Result<Bytes, AppError>>
where
    S: Stream<Item = Result<Bytes, E>>,
    E: Into<AppError>,
{
    let input = Box::pin(input);

    stream::unfold(Some((encryptor, input)), |state| async move {
        let (mut encryptor, mut input) = state?;
        loop {
            match input.next().await {
                Some(Ok(chunk)) => match encryptor.update(&chunk) {
                    Ok(frames) if frames.is_empty() => continue,
                    Ok(frames) => return Some((Ok(frames), Some((encryptor, input)))),
                    Err(error) => return Some((Err(error), None)),
                },
                Some(Err(error)) => return Some((Err(error.into()), None)),
                None => return Some((encryptor.finish(), None)),
            }
        }
    })
}

/// Decrypt an envelope byte stream, failing on the first bad frame.
pub fn decrypt_stream<S, E>(
    decryptor: Decryptor,
    input: S,
) -> impl Stream<Item = Result<Bytes, AppError>>
where
    S: Stream<Item = Result<Bytes, E>>,
    E: Into<AppError>,
{
    let input = Box::pin(input);

    stream::unfold(Some((decryptor, input)), |state| async move {
        let (mut decryptor, mut input) = state?;
        loop {
            match input.next().await {
                Some(Ok(chunk)) => match decryptor.update(&chunk) {
                    Ok(plaintext) if plaintext.is_empty() => continue,
                    Ok(plaintext) => return Some((Ok(plaintext), Some((decryptor, input)))),
                    Err(error) => return Some((Err(error), None)),
                },
                Some(Err(error)) => return Some((Err(error.into()), None)),
                None => {
                    return match decryptor.finish() {
                        Ok(()) => None,
                        Err(error) => Some((Err(error), None)),
                    };
                }
            }
        }
    })
}
