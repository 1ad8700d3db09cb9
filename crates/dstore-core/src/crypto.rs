//! Cryptographic primitives for `dstore`.
//!
//! Provides streaming authenticated encryption (AES-256-GCM in the STREAM
//! construction with a big-endian 32-bit segment counter) and a
//! zeroize-on-drop key newtype.
//!
//! # Security model
//!
//! - Every encryption draws a fresh 56-bit nonce prefix via `OsRng`.
//! - Values are split into 64 KiB segments; each segment is sealed with its
//!   own tag and the segment counter, and the final segment carries the
//!   last-block flag. Tampering, reordering, or truncation anywhere in the
//!   value fails authentication.
//! - Ciphertext format:
//!   `version (1) || nonce prefix (7) || segment_0 || ... || segment_n`, where
//!   every segment is `ciphertext || tag (16)`. The final segment is always
//!   present, even for an empty plaintext.
//! - Key types derive `Zeroize` + `ZeroizeOnDrop` and redact their `Debug`.

use std::fmt;

use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::aead::stream::{DecryptorBE32, EncryptorBE32};
use aes_gcm::aead::{AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::CryptoError;

/// Length of a symmetric key in bytes.
pub const KEY_LEN: usize = 32;

/// Plaintext bytes per sealed segment.
pub const SEGMENT_SIZE: usize = 64 * 1024;

/// Ciphertext format emitted by [`encrypt`].
const FORMAT_VERSION: u8 = 1;

/// STREAM uses 5 of the 12 GCM nonce bytes for the counter and last flag.
const NONCE_PREFIX_LEN: usize = 7;

const TAG_LEN: usize = 16;

const HEADER_LEN: usize = 1 + NONCE_PREFIX_LEN;

/// Header plus the tag of the (possibly empty) final segment.
const MIN_CIPHERTEXT_LEN: usize = HEADER_LEN + TAG_LEN;

/// A 256-bit store secret that is zeroized on drop.
///
/// The inner bytes are never exposed in `Debug` output.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct EncryptionKey([u8; KEY_LEN]);

impl EncryptionKey {
    /// Create a key from raw bytes.
    #[must_use]
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Parse a key from 64 hex characters.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidKey`] if the input is not valid hex or
    /// does not decode to exactly 32 bytes.
    pub fn from_hex(encoded: &str) -> Result<Self, CryptoError> {
        let mut bytes = [0u8; KEY_LEN];
        hex::decode_to_slice(encoded.trim(), &mut bytes).map_err(|e| {
            CryptoError::InvalidKey {
                reason: e.to_string(),
            }
        })?;
        Ok(Self(bytes))
    }

    /// Generate a new random key using the OS CSPRNG.
    #[must_use]
    pub fn generate() -> Self {
        let key = Aes256Gcm::generate_key(OsRng);
        let mut bytes = [0u8; KEY_LEN];
        bytes.copy_from_slice(&key);
        Self(bytes)
    }

    /// Borrow the raw key bytes.
    ///
    /// Use with care: the caller must not log or persist these bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }

    fn cipher(&self) -> Aes256Gcm {
        Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.0))
    }
}

impl fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptionKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Encrypt `plaintext` as a self-contained STREAM ciphertext.
///
/// # Errors
///
/// Returns [`CryptoError::Encryption`] if sealing a segment fails.
pub fn encrypt(key: &EncryptionKey, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
    let prefix = &nonce[..NONCE_PREFIX_LEN];
    let mut encryptor =
        EncryptorBE32::<Aes256Gcm>::from_aead(key.cipher(), GenericArray::from_slice(prefix));

    let segments = plaintext.len() / SEGMENT_SIZE + 1;
    let mut sealed = Vec::with_capacity(
        HEADER_LEN
            .saturating_add(plaintext.len())
            .saturating_add(segments.saturating_mul(TAG_LEN)),
    );
    sealed.push(FORMAT_VERSION);
    sealed.extend_from_slice(prefix);

    let seal_err = |e: aes_gcm::aead::Error| CryptoError::Encryption {
        reason: e.to_string(),
    };
    let mut rest = plaintext;
    while rest.len() > SEGMENT_SIZE {
        let (segment, tail) = rest.split_at(SEGMENT_SIZE);
        sealed.extend_from_slice(&encryptor.encrypt_next(segment).map_err(seal_err)?);
        rest = tail;
    }
    sealed.extend_from_slice(&encryptor.encrypt_last(rest).map_err(seal_err)?);
    Ok(sealed)
}

/// Decrypt a ciphertext produced by [`encrypt`].
///
/// # Errors
///
/// - [`CryptoError::CiphertextTooShort`] if the input cannot hold a header
///   and a final tag.
/// - [`CryptoError::UnsupportedVersion`] for an unknown format byte.
/// - [`CryptoError::Decryption`] if any segment fails authentication (wrong
///   key, corrupted, reordered, or truncated data).
pub fn decrypt(key: &EncryptionKey, sealed: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if sealed.len() < MIN_CIPHERTEXT_LEN {
        return Err(CryptoError::CiphertextTooShort {
            expected: MIN_CIPHERTEXT_LEN,
            actual: sealed.len(),
        });
    }

    let (header, mut rest) = sealed.split_at(HEADER_LEN);
    let (version, prefix) = header.split_at(1);
    if version != [FORMAT_VERSION] {
        return Err(CryptoError::UnsupportedVersion {
            version: version.first().copied().unwrap_or_default(),
        });
    }

    let mut decryptor =
        DecryptorBE32::<Aes256Gcm>::from_aead(key.cipher(), GenericArray::from_slice(prefix));
    let open_err = |e: aes_gcm::aead::Error| CryptoError::Decryption {
        reason: e.to_string(),
    };

    let mut plaintext = Vec::with_capacity(rest.len());
    while rest.len() > SEGMENT_SIZE + TAG_LEN {
        let (segment, tail) = rest.split_at(SEGMENT_SIZE + TAG_LEN);
        plaintext.extend_from_slice(&decryptor.decrypt_next(segment).map_err(open_err)?);
        rest = tail;
    }
    plaintext.extend_from_slice(&decryptor.decrypt_last(rest).map_err(open_err)?);
    Ok(plaintext)
}
