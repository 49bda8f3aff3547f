//! Error types for handshake-time worker authentication.

use std::time::Duration;
use thiserror::Error;

/// Errors raised by a [`Kms`](crate::kms::Kms) implementation.
#[derive(Debug, Error)]
pub enum KmsError {
    /// Blob was wrapped with a different key than the one configured.
    #[error("blob wrapped with key {found}, expected {expected}")]
    KeyMismatch { expected: String, found: String },

    /// Blob carries no key information.
    #[error("blob has no key info")]
    MissingKeyInfo,

    /// Ciphertext failed authentication or could not be decrypted.
    #[error("decryption failed")]
    Decryption,

    /// Encryption failed.
    #[error("encryption failed")]
    Encryption,

    /// KMS backend could not be reached or refused the request.
    #[error("kms unavailable: {0}")]
    Unavailable(String),

    /// Unwrap did not complete within the configured bound.
    #[error("kms decrypt timed out after {0:?}")]
    Timeout(Duration),

    /// Configured key material is unusable.
    #[error("invalid kms key: {0}")]
    InvalidKey(String),
}

/// Errors that can occur while resolving a worker's credentials during a handshake.
///
/// [`AuthError::NoCredentialOffered`] is the expected no-op path for ordinary
/// TLS clients; every other variant rejects the handshake.
#[derive(Debug, Error)]
pub enum AuthError {
    /// No ALPN entry carried the worker-auth prefix.
    #[error("no worker credential offered")]
    NoCredentialOffered,

    /// Offer could not be reassembled or decoded into an encrypted blob.
    #[error("malformed worker-auth payload: {0}")]
    MalformedPayload(String),

    /// KMS refused, failed or timed out unwrapping the blob.
    #[error("failed to unwrap worker credentials: {0}")]
    UnwrapFailed(#[source] KmsError),

    /// Decrypted bytes are not a credential record.
    #[error("malformed worker credential record: {0}")]
    MalformedCredential(#[source] serde_json::Error),

    /// CA PEM holds no usable certificate.
    #[error("invalid worker trust root: {0}")]
    InvalidTrustRoot(String),

    /// Leaf certificate and key do not form a usable pair.
    #[error("invalid worker leaf credential: {0}")]
    InvalidLeafCredential(String),

    /// rustls refused the assembled configuration.
    #[error("TLS configuration error: {0}")]
    TlsConfig(#[from] rustls::Error),

    /// Payload needs more fragments than the two-digit ordinal can number.
    #[error("worker-auth offer needs {fragments} fragments, at most 100 allowed")]
    OfferTooLarge { fragments: usize },

    /// Certificate or key file for the default configuration could not be loaded.
    #[error("certificate file error: {0}")]
    CertificateFile(String),
}

impl AuthError {
    /// True when the client simply did not take part in worker auth.
    pub fn is_not_applicable(&self) -> bool {
        matches!(self, AuthError::NoCredentialOffered)
    }
}

/// Result type for worker authentication.
pub type AuthResult<T> = Result<T, AuthError>;
