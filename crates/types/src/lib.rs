//! Shared data types for worker authentication.
//!
//! This crate holds the two structures that cross the KMS boundary during a
//! worker handshake:
//!
//! - [`EncryptedBlobInfo`]: the wrapped credential bundle a worker carries in
//!   its ALPN offer, serialized with bincode.
//! - [`CredentialRecord`]: the decrypted CA certificate, leaf certificate and
//!   leaf private key, serialized as JSON.

use bincode::Options;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Upper bound on the serialized size of an [`EncryptedBlobInfo`].
///
/// ALPN offers are capped well below this, so anything larger is hostile.
pub const MAX_BLOB_LEN: u64 = 64 * 1024;

/// Errors raised while encoding or decoding shared types.
#[derive(Debug, Error)]
pub enum TypesError {
    /// Failed to serialize an encrypted blob.
    #[error("failed to encode encrypted blob: {0}")]
    BlobEncode(#[source] bincode::Error),

    /// Failed to deserialize an encrypted blob.
    #[error("failed to decode encrypted blob: {0}")]
    BlobDecode(#[source] bincode::Error),
}

/// Identifies the key that wrapped a blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyInfo {
    /// KMS key identifier.
    pub key_id: String,
    /// Wrapping mechanism, opaque to everything but the KMS implementation.
    pub mechanism: u64,
}

/// Ciphertext plus wrapping metadata, as understood by a KMS implementation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedBlobInfo {
    /// Wrapped payload (ciphertext and authentication tag).
    pub ciphertext: Vec<u8>,
    /// Nonce used for wrapping.
    pub iv: Vec<u8>,
    /// Key that produced the ciphertext.
    pub key_info: Option<KeyInfo>,
}

fn blob_options() -> impl Options {
    bincode::DefaultOptions::new().with_limit(MAX_BLOB_LEN)
}

impl EncryptedBlobInfo {
    /// Serialize to the binary form carried inside ALPN offers.
    pub fn to_bytes(&self) -> Result<Vec<u8>, TypesError> {
        blob_options().serialize(self).map_err(TypesError::BlobEncode)
    }

    /// Parse the binary form. Trailing bytes and oversized length prefixes are rejected.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, TypesError> {
        blob_options().deserialize(bytes).map_err(TypesError::BlobDecode)
    }
}

/// Decrypted worker identity material.
///
/// All three fields hold PEM text. In JSON each field is the standard base64
/// encoding of its PEM bytes, keyed as `CACertPEM`, `CertPEM` and `KeyPEM`.
/// The record is wiped from memory when dropped.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct CredentialRecord {
    /// CA certificate that signed the worker's leaf.
    #[serde(rename = "CACertPEM", with = "pem_base64")]
    pub ca_cert_pem: Vec<u8>,
    /// Worker leaf certificate.
    #[serde(rename = "CertPEM", with = "pem_base64")]
    pub cert_pem: Vec<u8>,
    /// Private key for the leaf certificate.
    #[serde(rename = "KeyPEM", with = "pem_base64")]
    pub key_pem: Vec<u8>,
}

impl CredentialRecord {
    /// Create a record from PEM bytes.
    pub fn new(
        ca_cert_pem: impl Into<Vec<u8>>,
        cert_pem: impl Into<Vec<u8>>,
        key_pem: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            ca_cert_pem: ca_cert_pem.into(),
            cert_pem: cert_pem.into(),
            key_pem: key_pem.into(),
        }
    }

    /// Parse the JSON encoding.
    pub fn from_json(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    /// Produce the JSON encoding.
    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

impl fmt::Debug for CredentialRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialRecord")
            .field("ca_cert_pem_len", &self.ca_cert_pem.len())
            .field("cert_pem_len", &self.cert_pem.len())
            .field("key_pem", &"<redacted>")
            .finish()
    }
}

mod pem_base64 {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}
