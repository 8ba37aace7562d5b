//! Chunked AES-256-GCM envelope
//!
//! ```text
//! header : "EFP1" | salt (16)
//! frame  : word (u32 LE, high bit = final) | ciphertext + tag
//! ```
//!
//! The session key is HKDF-SHA256(passphrase, salt). Each frame holds at most
//! `CHUNK_SIZE` plaintext bytes, its nonce is the salt prefix XOR the frame
//! index, and its AAD binds the index and the final flag so that reordering,
//! truncation and trailing garbage are all rejected.

use std::sync::Arc;

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use hkdf::Hkdf;
use rand::RngCore;
use sha2::Sha256;

use crate::error::AppError;

/// Plaintext bytes per frame
pub const CHUNK_SIZE: usize = 64 * 1024;

const MAGIC: &[u8; 4] = b"EFP1";
const SALT_BYTES: usize = 16;
const AES_GCM_NONCE_BYTES: usize = 12;
const AES_256_KEY_BYTES: usize = 32;
const TAG_BYTES: usize = 16;
const WORD_BYTES: usize = 4;
const FINAL_FLAG: u32 = 1 << 31;

/// Length of the envelope header
pub(crate) const HEADER_LEN: usize = MAGIC.len() + SALT_BYTES;

/// Process-wide cipher factory holding the pre-shared passphrase.
///
/// Every object gets its own salt, so contexts never share a nonce space.
///
/// HKDF does no key stretching: the passphrase must be a high-entropy secret
/// (e.g. 32 random bytes, base64-encoded), not a human-chosen password.
#[derive(Clone)]
pub struct StreamCipher {
    passphrase: Arc<[u8]>,
}

impl std::fmt::Debug for StreamCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamCipher").finish_non_exhaustive()
    }
}

impl StreamCipher {
    pub fn new(passphrase: &str) -> Self {
        Self {
            passphrase: Arc::from(passphrase.as_bytes()),
        }
    }

    /// Start a new encryption context with a fresh random salt.
    pub fn encryptor(&self) -> Result<Encryptor, AppError> {
        let mut salt = [0_u8; SALT_BYTES];
        rand::thread_rng().fill_bytes(&mut salt);
        Ok(Encryptor {
            cipher: derive_cipher(&self.passphrase, &salt)?,
            salt,
            header_written: false,
            pending: BytesMut::with_capacity(CHUNK_SIZE),
            index: 0,
            finished: false,
        })
    }

    /// Start a decryption context; the salt is read from the stream header.
    pub fn decryptor(&self) -> Decryptor {
        Decryptor {
            passphrase: self.passphrase.clone(),
            cipher: None,
            salt: [0_u8; SALT_BYTES],
            buffer: BytesMut::new(),
            index: 0,
            done: false,
        }
    }
}

fn derive_cipher(passphrase: &[u8], salt: &[u8; SALT_BYTES]) -> Result<Aes256Gcm, AppError> {
    let hk = Hkdf::<Sha256>::new(Some(salt), passphrase);
    let mut key = [0_u8; AES_256_KEY_BYTES];
    hk.expand(MAGIC, &mut key)
        .map_err(|_| AppError::Internal(anyhow::anyhow!("HKDF expand failed")))?;

    Aes256Gcm::new_from_slice(&key).map_err(|_| {
        AppError::Internal(anyhow::anyhow!(
            "invalid encryption key length (expected {} bytes)",
            AES_256_KEY_BYTES
        ))
    })
}

fn frame_nonce(salt: &[u8; SALT_BYTES], index: u64) -> [u8; AES_GCM_NONCE_BYTES] {
    let mut nonce = [0_u8; AES_GCM_NONCE_BYTES];
    nonce.copy_from_slice(&salt[..AES_GCM_NONCE_BYTES]);
    for (slot, byte) in nonce[4..].iter_mut().zip(index.to_le_bytes()) {
        *slot ^= byte;
    }
    nonce
}

fn frame_aad(index: u64, is_final: bool) -> [u8; 9] {
    let mut aad = [0_u8; 9];
    aad[..8].copy_from_slice(&index.to_le_bytes());
    aad[8] = u8::from(is_final);
    aad
}

/// Encrypting half of the envelope.
///
/// Holds back up to one chunk so that the last frame can be flagged final.
pub struct Encryptor {
    cipher: Aes256Gcm,
    salt: [u8; SALT_BYTES],
    header_written: bool,
    pending: BytesMut,
    index: u64,
    finished: bool,
}

impl Encryptor {
    /// Feed plaintext, returning whatever ciphertext is ready (possibly empty).
    pub fn update(&mut self, input: &[u8]) -> Result<Bytes, AppError> {
        if self.finished {
            return Err(AppError::Internal(anyhow::anyhow!("encryptor already finished")));
        }

        let mut out = BytesMut::new();
        self.write_header(&mut out);
        self.pending.extend_from_slice(input);

        while self.pending.len() > CHUNK_SIZE {
            let chunk = self.pending.split_to(CHUNK_SIZE);
            self.seal(&chunk, false, &mut out)?;
        }

        Ok(out.freeze())
    }

    /// Flush the held-back chunk as the final frame.
    pub fn finish(&mut self) -> Result<Bytes, AppError> {
        if self.finished {
            return Ok(Bytes::new());
        }

        let mut out = BytesMut::new();
        self.write_header(&mut out);
        let chunk = self.pending.split();
        self.seal(&chunk, true, &mut out)?;
        self.finished = true;
        Ok(out.freeze())
    }

    fn write_header(&mut self, out: &mut BytesMut) {
        if !self.header_written {
            out.extend_from_slice(MAGIC);
            out.extend_from_slice(&self.salt);
            self.header_written = true;
        }
    }

    fn seal(&mut self, chunk: &[u8], is_final: bool, out: &mut BytesMut) -> Result<(), AppError> {
        let nonce = frame_nonce(&self.salt, self.index);
        let aad = frame_aad(self.index, is_final);
        let ciphertext = self
            .cipher
            .encrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: chunk,
                    aad: &aad,
                },
            )
            .map_err(|_| AppError::Internal(anyhow::anyhow!("frame encryption failed")))?;

        let mut word = ciphertext.len() as u32;
        if is_final {
            word |= FINAL_FLAG;
        }
        out.reserve(WORD_BYTES + ciphertext.len());
        out.put_u32_le(word);
        out.extend_from_slice(&ciphertext);
        self.index += 1;
        Ok(())
    }
}

/// Decrypting half of the envelope.
pub struct Decryptor {
    passphrase: Arc<[u8]>,
    cipher: Option<Aes256Gcm>,
    salt: [u8; SALT_BYTES],
    buffer: BytesMut,
    index: u64,
    done: bool,
}

impl Decryptor {
    /// Feed ciphertext, returning whatever plaintext is authenticated so far.
    pub fn update(&mut self, input: &[u8]) -> Result<Bytes, AppError> {
        if self.done {
            if input.is_empty() {
                return Ok(Bytes::new());
            }
            return Err(decryption("data after final frame"));
        }

        self.buffer.extend_from_slice(input);

        if self.cipher.is_none() {
            if self.buffer.len() < HEADER_LEN {
                return Ok(Bytes::new());
            }
            if &self.buffer[..MAGIC.len()] != MAGIC {
                return Err(decryption("unrecognized envelope header"));
            }
            self.salt.copy_from_slice(&self.buffer[MAGIC.len()..HEADER_LEN]);
            self.buffer.advance(HEADER_LEN);
            self.cipher = Some(derive_cipher(&self.passphrase, &self.salt)?);
        }

        let mut out = BytesMut::new();
        while !self.done && self.buffer.len() >= WORD_BYTES {
            let word = u32::from_le_bytes([
                self.buffer[0],
                self.buffer[1],
                self.buffer[2],
                self.buffer[3],
            ]);
            let is_final = word & FINAL_FLAG != 0;
            let len = (word & !FINAL_FLAG) as usize;
            if !(TAG_BYTES..=CHUNK_SIZE + TAG_BYTES).contains(&len) {
                return Err(decryption("invalid frame length"));
            }
            if self.buffer.len() < WORD_BYTES + len {
                break;
            }

            self.buffer.advance(WORD_BYTES);
            let frame = self.buffer.split_to(len);
            let plaintext = self.open(&frame, is_final)?;
            out.extend_from_slice(&plaintext);
            self.index += 1;
            self.done = is_final;
        }

        if self.done && !self.buffer.is_empty() {
            return Err(decryption("data after final frame"));
        }

        Ok(out.freeze())
    }

    /// Confirm the stream ended on a final frame.
    pub fn finish(&mut self) -> Result<(), AppError> {
        if self.done {
            Ok(())
        } else {
            Err(decryption("ciphertext is truncated"))
        }
    }

    fn open(&self, frame: &[u8], is_final: bool) -> Result<Vec<u8>, AppError> {
        let cipher = self
            .cipher
            .as_ref()
            .ok_or_else(|| decryption("missing envelope header"))?;
        let nonce = frame_nonce(&self.salt, self.index);
        let aad = frame_aad(self.index, is_final);
        cipher
            .decrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: frame,
                    aad: &aad,
                },
            )
            .map_err(|_| decryption("frame authentication failed"))
    }
}

fn decryption(message: &str) -> AppError {
    AppError::Decryption(message.to_string())
}

/// Ciphertext length for a given plaintext length.
#[cfg(test)]
fn encrypted_len(plaintext_len: u64) -> u64 {
    let chunk = CHUNK_SIZE as u64;
    let frames = plaintext_len.div_ceil(chunk).max(1);
    HEADER_LEN as u64 + frames * (WORD_BYTES + TAG_BYTES) as u64 + plaintext_len
}
