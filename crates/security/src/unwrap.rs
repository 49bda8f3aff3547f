//! Credential unwrapper.
//!
//! Turns the reassembled ALPN payload back into a [`CredentialRecord`]:
//!
//! 1. base64 decode (standard alphabet, padding optional)
//! 2. bincode decode into an [`EncryptedBlobInfo`]
//! 3. KMS decrypt, bounded by a timeout
//! 4. JSON decode of the plaintext
//!
//! Nothing is cached. Every handshake decrypts afresh and drops the plaintext
//! as soon as the record is built.

use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig, STANDARD_NO_PAD};
use base64::engine::DecodePaddingMode;
use base64::Engine as _;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use workerauth_types::{CredentialRecord, EncryptedBlobInfo};
use zeroize::Zeroizing;

use crate::alpn::encode_offer;
use crate::error::{AuthError, AuthResult, KmsError};
use crate::kms::{AeadKms, Kms};

/// Default bound on a single KMS decrypt call.
pub const DEFAULT_UNWRAP_TIMEOUT: Duration = Duration::from_secs(10);

/// Standard alphabet, accepts the payload with or without `=` padding.
const PAYLOAD_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new()
        .with_encode_padding(false)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Decode the ALPN payload into an encrypted blob.
pub fn decode_payload(payload: &str) -> AuthResult<EncryptedBlobInfo> {
    let bytes = PAYLOAD_ENGINE
        .decode(payload.as_bytes())
        .map_err(|e| AuthError::MalformedPayload(format!("payload is not base64: {}", e)))?;

    EncryptedBlobInfo::from_bytes(&bytes).map_err(|e| AuthError::MalformedPayload(e.to_string()))
}

/// Encode an encrypted blob as an unpadded base64 payload.
pub fn encode_payload(blob: &EncryptedBlobInfo) -> AuthResult<String> {
    let bytes = blob
        .to_bytes()
        .map_err(|e| AuthError::MalformedPayload(e.to_string()))?;
    Ok(STANDARD_NO_PAD.encode(bytes))
}

/// Seal a credential record into worker-auth ALPN names.
///
/// This is what a worker does before connecting; the controller reverses it
/// with [`parse_offer`](crate::alpn::parse_offer) and [`CredentialUnwrapper::unwrap`].
pub fn seal_offer(kms: &AeadKms, record: &CredentialRecord) -> AuthResult<Vec<String>> {
    let plaintext = Zeroizing::new(record.to_json().map_err(AuthError::MalformedCredential)?);
    let blob = kms.encrypt(&plaintext).map_err(AuthError::UnwrapFailed)?;
    encode_offer(&encode_payload(&blob)?)
}

/// Unwraps worker credentials through an injected [`Kms`].
#[derive(Clone)]
pub struct CredentialUnwrapper {
    kms: Arc<dyn Kms>,
    timeout: Duration,
}

impl CredentialUnwrapper {
    /// Create an unwrapper with the default timeout.
    pub fn new(kms: Arc<dyn Kms>) -> Self {
        Self {
            kms,
            timeout: DEFAULT_UNWRAP_TIMEOUT,
        }
    }

    /// Set the bound on each KMS decrypt call.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Bound on each KMS decrypt call.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Recover the credential record carried in `payload`.
    ///
    /// The KMS is called at most once and never retried. Dropping the returned
    /// future cancels an outstanding decrypt.
    ///
    /// # Errors
    /// - [`AuthError::MalformedPayload`] if the payload does not decode to a blob.
    /// - [`AuthError::UnwrapFailed`] if the KMS fails or exceeds the timeout.
    /// - [`AuthError::MalformedCredential`] if the plaintext is not a credential record.
    pub async fn unwrap(&self, payload: &str) -> AuthResult<CredentialRecord> {
        let blob = decode_payload(payload)?;
        debug!(
            "Decoded encrypted blob ({} byte ciphertext, key {:?})",
            blob.ciphertext.len(),
            blob.key_info.as_ref().map(|k| k.key_id.as_str())
        );

        let plaintext = tokio::time::timeout(self.timeout, self.kms.decrypt(&blob))
            .await
            .map_err(|_| AuthError::UnwrapFailed(KmsError::Timeout(self.timeout)))?
            .map_err(AuthError::UnwrapFailed)?;

        CredentialRecord::from_json(&plaintext).map_err(AuthError::MalformedCredential)
    }
}

impl std::fmt::Debug for CredentialUnwrapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialUnwrapper")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}
