//! Span encryption
//!
//! Spans are encrypted with AES-256-GCM in fixed-size frames so a reader can
//! decrypt any sub-range without touching the rest of the file, and so that
//! truncation or tampering anywhere in the file is detected.
//!
//! ## File format
//!
//! ```text
//! ┌────────┬─────────┬────────────┬──────────────┐
//! │ "MCSP" │ version │ chunk_size │ nonce prefix │   16-byte header
//! │ 4 B    │ 1 B     │ u32 BE     │ 7 B          │
//! ├────────┴─────────┴────────────┴──────────────┤
//! │ frame 0: GCM(chunk_size bytes) + 16 B tag     │
//! │ frame 1: ...                                  │
//! │ frame n-1: GCM(1..=chunk_size bytes) + tag    │   last frame
//! └───────────────────────────────────────────────┘
//! ```
//!
//! Frame `i` uses nonce `prefix || i (u32 BE) || last_flag`. The associated
//! data binds every frame to its resource key and span offset.

use crate::error::{PlaybackError, Result};
use crate::types::ResourceKey;
use aes_gcm::{
    aead::{rand_core::RngCore, Aead, KeyInit, OsRng, Payload},
    Aes256Gcm, Nonce,
};
use bytes::{Bytes, BytesMut};
use sha2::{Digest, Sha256};
use std::fmt;

use super::config::MAX_CHUNK_SIZE;

/// Size of the span file header.
pub const HEADER_LEN: usize = 16;

/// Size of the GCM authentication tag appended to every frame.
pub const TAG_LEN: usize = 16;

const MAGIC: &[u8; 4] = b"MCSP";
const FORMAT_VERSION: u8 = 1;
const NONCE_PREFIX_LEN: usize = 7;

/// Encryption key for span files.
#[derive(Clone, PartialEq, Eq)]
pub struct EncryptionKey {
    key_bytes: Vec<u8>,
}

impl EncryptionKey {
    /// Generate a new random encryption key.
    pub fn generate() -> Self {
        let key = Aes256Gcm::generate_key(&mut OsRng);
        Self {
            key_bytes: key.to_vec(),
        }
    }

    /// Create from existing key bytes.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        if bytes.len() != 32 {
            return Err(PlaybackError::InvalidConfig(
                "Invalid key length. Expected 32 bytes for AES-256.".to_string(),
            ));
        }

        Ok(Self { key_bytes: bytes })
    }

    /// Derive a key from a host-held secret with SHA-256.
    pub fn from_passphrase(passphrase: &str) -> Result<Self> {
        if passphrase.is_empty() {
            return Err(PlaybackError::InvalidConfig(
                "Passphrase cannot be empty".to_string(),
            ));
        }

        let digest = Sha256::digest(passphrase.as_bytes());
        Self::from_bytes(digest.to_vec())
    }

    /// Get the key bytes (for secure storage).
    pub fn as_bytes(&self) -> &[u8] {
        &self.key_bytes
    }

    /// Serialize to hex string for storage.
    pub fn to_hex(&self) -> String {
        hex::encode(&self.key_bytes)
    }

    /// Deserialize from hex string.
    pub fn from_hex(hex_str: &str) -> Result<Self> {
        let bytes = hex::decode(hex_str)
            .map_err(|e| PlaybackError::InvalidConfig(format!("Invalid hex key: {}", e)))?;

        Self::from_bytes(bytes)
    }
}

impl fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptionKey")
            .field("key_bytes", &"[REDACTED]")
            .finish()
    }
}

/// Associated data binding a span's frames to its key and offset.
pub fn span_aad(key: &ResourceKey, offset: u64) -> Vec<u8> {
    let mut aad = Vec::with_capacity(key.as_str().len() + 8);
    aad.extend_from_slice(key.as_str().as_bytes());
    aad.extend_from_slice(&offset.to_be_bytes());
    aad
}

fn frame_nonce(prefix: &[u8; NONCE_PREFIX_LEN], index: u32, last: bool) -> [u8; 12] {
    let mut nonce = [0u8; 12];
    nonce[..NONCE_PREFIX_LEN].copy_from_slice(prefix);
    nonce[NONCE_PREFIX_LEN..11].copy_from_slice(&index.to_be_bytes());
    nonce[11] = u8::from(last);
    nonce
}

/// Factory for span encryptors and decryptors sharing one key.
#[derive(Clone)]
pub struct CipherCodec {
    cipher: Aes256Gcm,
    chunk_size: usize,
}

impl CipherCodec {
    pub fn new(key: &EncryptionKey, chunk_size: usize) -> Self {
        let key = aes_gcm::Key::<Aes256Gcm>::from_slice(key.as_bytes());
        Self {
            cipher: Aes256Gcm::new(key),
            chunk_size,
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Start encrypting a new span. Every span gets a fresh nonce prefix.
    pub fn encrypting_writer(&self, aad: Vec<u8>) -> SpanEncryptor {
        let mut prefix = [0u8; NONCE_PREFIX_LEN];
        OsRng.fill_bytes(&mut prefix);
        SpanEncryptor {
            cipher: self.cipher.clone(),
            chunk_size: self.chunk_size,
            prefix,
            aad,
            next_frame: 0,
            buffer: BytesMut::with_capacity(self.chunk_size),
        }
    }

    /// Open an existing span for random-access decryption.
    ///
    /// `header` must be the first [`HEADER_LEN`] bytes of the file and
    /// `file_len` its full length.
    pub fn decrypting_reader(
        &self,
        header: &[u8],
        file_len: u64,
        aad: Vec<u8>,
    ) -> Result<SpanDecryptor> {
        if header.len() < HEADER_LEN || &header[..4] != MAGIC {
            return Err(PlaybackError::Cipher("span header is missing or corrupt".to_string()));
        }
        if header[4] != FORMAT_VERSION {
            return Err(PlaybackError::Cipher(format!(
                "unsupported span format version {}",
                header[4]
            )));
        }

        let chunk_size = u32::from_be_bytes([header[5], header[6], header[7], header[8]]) as usize;
        if chunk_size == 0 || chunk_size > MAX_CHUNK_SIZE {
            return Err(PlaybackError::Cipher(format!(
                "invalid frame size {} in span header",
                chunk_size
            )));
        }

        let mut prefix = [0u8; NONCE_PREFIX_LEN];
        prefix.copy_from_slice(&header[9..HEADER_LEN]);

        let (frame_count, plaintext_len) = frame_layout(file_len, chunk_size)?;

        Ok(SpanDecryptor {
            cipher: self.cipher.clone(),
            chunk_size,
            prefix,
            aad,
            file_len,
            frame_count,
            plaintext_len,
        })
    }

    /// On-disk size of a span holding `plaintext_len` bytes.
    pub fn encrypted_len(&self, plaintext_len: u64) -> u64 {
        let chunk = self.chunk_size as u64;
        let frames = plaintext_len.div_ceil(chunk);
        HEADER_LEN as u64 + plaintext_len + frames * TAG_LEN as u64
    }
}

/// Derive `(frame_count, plaintext_len)` from a span file length.
fn frame_layout(file_len: u64, chunk_size: usize) -> Result<(u64, u64)> {
    let body = file_len
        .checked_sub(HEADER_LEN as u64)
        .filter(|body| *body > 0)
        .ok_or_else(|| PlaybackError::Cipher("span file has no frames".to_string()))?;

    let stride = (chunk_size + TAG_LEN) as u64;
    let frame_count = body.div_ceil(stride);
    let last_frame = body - (frame_count - 1) * stride;
    if last_frame <= TAG_LEN as u64 {
        return Err(PlaybackError::Cipher("span file is truncated".to_string()));
    }

    Ok((frame_count, body - frame_count * TAG_LEN as u64))
}

/// Streaming encryptor for one span (sink side).
///
/// Feed plaintext with [`update`](Self::update) and append the returned
/// ciphertext to the span file after the [`header`](Self::header); finish
/// with [`finalize`](Self::finalize).
pub struct SpanEncryptor {
    cipher: Aes256Gcm,
    chunk_size: usize,
    prefix: [u8; NONCE_PREFIX_LEN],
    aad: Vec<u8>,
    next_frame: u32,
    buffer: BytesMut,
}

impl SpanEncryptor {
    pub fn header(&self) -> [u8; HEADER_LEN] {
        let mut header = [0u8; HEADER_LEN];
        header[..4].copy_from_slice(MAGIC);
        header[4] = FORMAT_VERSION;
        header[5..9].copy_from_slice(&(self.chunk_size as u32).to_be_bytes());
        header[9..].copy_from_slice(&self.prefix);
        header
    }

    /// Encrypt as many full frames as `plaintext` completes.
    ///
    /// A full frame is only sealed once more bytes follow it, so the final
    /// frame always carries data and can be flagged as last.
    pub fn update(&mut self, plaintext: &[u8]) -> Result<Bytes> {
        self.buffer.extend_from_slice(plaintext);

        let mut out = BytesMut::new();
        while self.buffer.len() > self.chunk_size {
            let chunk = self.buffer.split_to(self.chunk_size);
            let sealed = self.seal(&chunk, false)?;
            out.extend_from_slice(&sealed);
        }
        Ok(out.freeze())
    }

    /// Seal the remaining bytes as the last frame.
    pub fn finalize(mut self) -> Result<Bytes> {
        let chunk = self.buffer.split();
        let sealed = self.seal(&chunk, true)?;
        Ok(Bytes::from(sealed))
    }

    fn seal(&mut self, chunk: &[u8], last: bool) -> Result<Vec<u8>> {
        let index = self.next_frame;
        self.next_frame = index
            .checked_add(1)
            .ok_or_else(|| PlaybackError::Cipher("span exceeds frame counter".to_string()))?;

        let nonce = frame_nonce(&self.prefix, index, last);
        self.cipher
            .encrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: chunk,
                    aad: &self.aad,
                },
            )
            .map_err(|e| PlaybackError::Cipher(format!("Encryption failed: {}", e)))
    }
}

/// Random-access decryptor for one span (source side).
pub struct SpanDecryptor {
    cipher: Aes256Gcm,
    chunk_size: usize,
    prefix: [u8; NONCE_PREFIX_LEN],
    aad: Vec<u8>,
    file_len: u64,
    frame_count: u64,
    plaintext_len: u64,
}

impl SpanDecryptor {
    pub fn plaintext_len(&self) -> u64 {
        self.plaintext_len
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Index of the frame holding plaintext byte `position`.
    pub fn frame_for(&self, position: u64) -> u64 {
        position / self.chunk_size as u64
    }

    /// `(file_offset, ciphertext_len)` of frame `index`.
    pub fn frame_bounds(&self, index: u64) -> (u64, usize) {
        let stride = (self.chunk_size + TAG_LEN) as u64;
        let offset = HEADER_LEN as u64 + index * stride;
        let len = stride.min(self.file_len.saturating_sub(offset));
        (offset, len as usize)
    }

    /// Decrypt frame `index` from its ciphertext.
    pub fn decrypt_frame(&self, index: u64, ciphertext: &[u8]) -> Result<Bytes> {
        if index >= self.frame_count {
            return Err(PlaybackError::Cipher(format!(
                "frame {} out of range ({} frames)",
                index, self.frame_count
            )));
        }
        let counter = u32::try_from(index)
            .map_err(|_| PlaybackError::Cipher("frame index overflow".to_string()))?;

        let last = index + 1 == self.frame_count;
        let nonce = frame_nonce(&self.prefix, counter, last);
        let plaintext = self
            .cipher
            .decrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: ciphertext,
                    aad: &self.aad,
                },
            )
            .map_err(|_| {
                PlaybackError::Cipher(format!("frame {} failed authentication", index))
            })?;

        Ok(Bytes::from(plaintext))
    }
}
