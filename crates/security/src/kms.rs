//! KMS boundary.
//!
//! The handshake path only ever needs `decrypt`, so that is all the [`Kms`]
//! trait exposes. [`AeadKms`] is a local static-key wrapper for development
//! deployments and tests; production controllers plug in their own backend.

use async_trait::async_trait;
use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{Key, XChaCha20Poly1305, XNonce};
use rand::rngs::OsRng;
use rand::RngCore;
use tracing::debug;
use workerauth_types::{EncryptedBlobInfo, KeyInfo};
use zeroize::{Zeroize, Zeroizing};

use crate::error::KmsError;

/// Decrypt capability consumed by the credential unwrapper.
///
/// Implementations may block on network I/O. They must not hold locks across
/// that wait; the unwrapper calls them concurrently from many handshakes.
#[async_trait]
pub trait Kms: Send + Sync {
    /// Unwrap a blob and return the plaintext.
    async fn decrypt(&self, blob: &EncryptedBlobInfo) -> Result<Zeroizing<Vec<u8>>, KmsError>;
}

/// Mechanism tag stored in [`KeyInfo`] for blobs sealed by [`AeadKms`].
pub const MECHANISM_XCHACHA20_POLY1305: u64 = 1;

const NONCE_LEN: usize = 24;
const KEY_LEN: usize = 32;

/// Static-key XChaCha20-Poly1305 wrapper.
///
/// The key id is bound into the ciphertext as associated data, so a blob
/// relabelled with another key id fails authentication.
pub struct AeadKms {
    key_id: String,
    key: Zeroizing<[u8; KEY_LEN]>,
}

impl AeadKms {
    /// Create a wrapper from raw key bytes.
    pub fn new(key_id: impl Into<String>, key: [u8; KEY_LEN]) -> Self {
        Self {
            key_id: key_id.into(),
            key: Zeroizing::new(key),
        }
    }

    /// Create a wrapper from a 64-character hex key.
    pub fn from_hex(key_id: impl Into<String>, key_hex: &str) -> Result<Self, KmsError> {
        let mut decoded = hex::decode(key_hex.trim())
            .map_err(|e| KmsError::InvalidKey(format!("key is not hex: {}", e)))?;
        if decoded.len() != KEY_LEN {
            let len = decoded.len();
            decoded.zeroize();
            return Err(KmsError::InvalidKey(format!(
                "key must be {} bytes, got {}",
                KEY_LEN, len
            )));
        }

        let mut key = [0u8; KEY_LEN];
        key.copy_from_slice(&decoded);
        decoded.zeroize();
        let kms = Self::new(key_id, key);
        key.zeroize();
        Ok(kms)
    }

    /// Key identifier recorded in every blob this wrapper seals.
    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    fn cipher(&self) -> XChaCha20Poly1305 {
        XChaCha20Poly1305::new(Key::from_slice(&self.key[..]))
    }

    /// Wrap `plaintext` under this key with a fresh random nonce.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<EncryptedBlobInfo, KmsError> {
        let mut iv = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut iv);

        let ciphertext = self
            .cipher()
            .encrypt(
                XNonce::from_slice(&iv),
                Payload {
                    msg: plaintext,
                    aad: self.key_id.as_bytes(),
                },
            )
            .map_err(|_| KmsError::Encryption)?;

        Ok(EncryptedBlobInfo {
            ciphertext,
            iv: iv.to_vec(),
            key_info: Some(KeyInfo {
                key_id: self.key_id.clone(),
                mechanism: MECHANISM_XCHACHA20_POLY1305,
            }),
        })
    }
}

impl std::fmt::Debug for AeadKms {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AeadKms")
            .field("key_id", &self.key_id)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Kms for AeadKms {
    async fn decrypt(&self, blob: &EncryptedBlobInfo) -> Result<Zeroizing<Vec<u8>>, KmsError> {
        let key_info = blob.key_info.as_ref().ok_or(KmsError::MissingKeyInfo)?;
        if key_info.key_id != self.key_id {
            return Err(KmsError::KeyMismatch {
                expected: self.key_id.clone(),
                found: key_info.key_id.clone(),
            });
        }
        if key_info.mechanism != MECHANISM_XCHACHA20_POLY1305 || blob.iv.len() != NONCE_LEN {
            return Err(KmsError::Decryption);
        }

        let plaintext = self
            .cipher()
            .decrypt(
                XNonce::from_slice(&blob.iv),
                Payload {
                    msg: &blob.ciphertext,
                    aad: self.key_id.as_bytes(),
                },
            )
            .map_err(|_| KmsError::Decryption)?;

        debug!("Unwrapped {} byte blob with key {}", plaintext.len(), self.key_id);
        Ok(Zeroizing::new(plaintext))
    }
}
