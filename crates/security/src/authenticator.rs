//! Handshake authenticator.
//!
//! Single entry point for the TLS layer. Given the ALPN names a client
//! proposed, it either declines (the client is not a worker), returns a scoped
//! server configuration, or rejects the handshake.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::alpn::parse_offer;
use crate::error::{AuthError, AuthResult};
use crate::kms::Kms;
use crate::tls_config::{ScopedTlsConfig, ServerConfigBuilder};
use crate::unwrap::CredentialUnwrapper;

/// Result of authenticating one handshake.
#[derive(Debug)]
pub enum HandshakeOutcome {
    /// Client offered no worker credential; fall through to default handling.
    NotApplicable,
    /// Worker credential verified; finish the handshake with this configuration.
    Configured(ScopedTlsConfig),
    /// Worker credential present but unusable; abort the handshake.
    Rejected(AuthError),
}

impl HandshakeOutcome {
    /// Collapse into `Ok(None)` / `Ok(Some(config))` / `Err(error)`.
    pub fn into_result(self) -> AuthResult<Option<ScopedTlsConfig>> {
        match self {
            HandshakeOutcome::NotApplicable => Ok(None),
            HandshakeOutcome::Configured(config) => Ok(Some(config)),
            HandshakeOutcome::Rejected(err) => Err(err),
        }
    }
}

/// Resolves worker credentials from ALPN offers.
///
/// Holds no per-connection state; clones share only the KMS handle.
#[derive(Debug, Clone)]
pub struct HandshakeAuthenticator {
    unwrapper: CredentialUnwrapper,
    config_builder: ServerConfigBuilder,
}

impl HandshakeAuthenticator {
    /// Create an authenticator backed by `kms`.
    pub fn new(kms: Arc<dyn Kms>) -> Self {
        Self {
            unwrapper: CredentialUnwrapper::new(kms),
            config_builder: ServerConfigBuilder::new(),
        }
    }

    /// Bound each KMS decrypt call.
    pub fn with_unwrap_timeout(mut self, timeout: Duration) -> Self {
        self.unwrapper = self.unwrapper.with_timeout(timeout);
        self
    }

    /// Use a specific server config builder (and thus crypto provider).
    pub fn with_config_builder(mut self, config_builder: ServerConfigBuilder) -> Self {
        self.config_builder = config_builder;
        self
    }

    /// Authenticate one handshake from the client's proposed ALPN names.
    pub async fn authenticate<S>(&self, protocols: &[S]) -> HandshakeOutcome
    where
        S: AsRef<str> + Sync,
    {
        match self.resolve(protocols).await {
            Ok(config) => {
                debug!("Worker credential accepted for protocol {}", config.protocol());
                HandshakeOutcome::Configured(config)
            }
            Err(err) if err.is_not_applicable() => HandshakeOutcome::NotApplicable,
            Err(err) => {
                warn!("Rejecting worker handshake: {}", err);
                HandshakeOutcome::Rejected(err)
            }
        }
    }

    async fn resolve<S>(&self, protocols: &[S]) -> AuthResult<ScopedTlsConfig>
    where
        S: AsRef<str> + Sync,
    {
        let offer = parse_offer(protocols)?;
        let record = self.unwrapper.unwrap(&offer.payload).await?;
        self.config_builder.build_scoped(&record, &offer.protocol)
    }
}

/// Turn raw ALPN entries into protocol names. Entries that are not UTF-8
/// cannot be worker-auth names and are dropped.
pub fn protocols_from_alpn<'a, I>(alpn: I) -> Vec<String>
where
    I: IntoIterator<Item = &'a [u8]>,
{
    alpn.into_iter()
        .filter_map(|name| std::str::from_utf8(name).ok())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::KmsError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use workerauth_types::EncryptedBlobInfo;
    use zeroize::Zeroizing;

    struct FailingKms {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Kms for FailingKms {
        async fn decrypt(&self, _blob: &EncryptedBlobInfo) -> Result<Zeroizing<Vec<u8>>, KmsError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(KmsError::Unavailable("backend down".to_string()))
        }
    }

    #[tokio::test]
    async fn test_plain_client_is_not_applicable() {
        let kms = Arc::new(FailingKms {
            calls: AtomicUsize::new(0),
        });
        let authenticator = HandshakeAuthenticator::new(kms.clone());

        for _ in 0..3 {
            let outcome = authenticator.authenticate(&["h2", "http/1.1"]).await;
            assert!(matches!(outcome, HandshakeOutcome::NotApplicable));
        }
        assert_eq!(kms.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_undecodable_payload_rejected_before_kms() {
        let kms = Arc::new(FailingKms {
            calls: AtomicUsize::new(0),
        });
        let authenticator = HandshakeAuthenticator::new(kms.clone());

        let outcome = authenticator.authenticate(&["v1workerauth-00!!!!"]).await;
        assert!(matches!(
            outcome,
            HandshakeOutcome::Rejected(AuthError::MalformedPayload(_))
        ));
        assert_eq!(kms.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_protocols_from_alpn_drops_non_utf8() {
        let alpn: Vec<&[u8]> = vec![b"h2", &[0xff, 0xfe], b"v1workerauth-00abc"];
        assert_eq!(
            protocols_from_alpn(alpn),
            vec!["h2".to_string(), "v1workerauth-00abc".to_string()]
        );
    }

    #[test]
    fn test_into_result() {
        assert!(matches!(HandshakeOutcome::NotApplicable.into_result(), Ok(None)));
        assert!(HandshakeOutcome::Rejected(AuthError::NoCredentialOffered)
            .into_result()
            .is_err());
    }
}
