//! rustls configuration builders.
//!
//! - [`ServerConfigBuilder::build_scoped`] produces the per-handshake worker
//!   configuration: the worker's own leaf as server certificate, the worker's
//!   CA as the only client trust root, mandatory client auth, TLS 1.3 only and
//!   exactly one ALPN protocol.
//! - [`ServerConfigBuilder::build_default`] produces the configuration used for
//!   clients that do not take part in worker auth.
//! - [`ClientConfigBuilder::build_worker`] produces the matching worker side.

use rustls::crypto::CryptoProvider;
use rustls::server::WebPkiClientVerifier;
use rustls::{ClientConfig, ServerConfig};
use std::sync::Arc;
use tracing::debug;
use workerauth_types::CredentialRecord;

use crate::credentials::{parse_leaf, parse_trust_roots, CertificateFiles};
use crate::error::{AuthError, AuthResult};

/// Crypto provider used for every configuration built by this crate.
pub fn default_provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

/// A server configuration built for exactly one worker handshake.
#[derive(Clone)]
pub struct ScopedTlsConfig {
    server_config: Arc<ServerConfig>,
    protocol: String,
}

impl ScopedTlsConfig {
    /// The rustls configuration to finish the handshake with.
    pub fn server_config(&self) -> &Arc<ServerConfig> {
        &self.server_config
    }

    /// The single ALPN protocol the handshake must agree on.
    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    /// Take the rustls configuration.
    pub fn into_server_config(self) -> Arc<ServerConfig> {
        self.server_config
    }
}

impl std::fmt::Debug for ScopedTlsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopedTlsConfig")
            .field("protocol", &self.protocol)
            .finish_non_exhaustive()
    }
}

/// Builder for server-side configurations.
#[derive(Clone)]
pub struct ServerConfigBuilder {
    provider: Arc<CryptoProvider>,
}

impl std::fmt::Debug for ServerConfigBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfigBuilder").finish_non_exhaustive()
    }
}

impl Default for ServerConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerConfigBuilder {
    /// Create a builder on the ring provider.
    pub fn new() -> Self {
        Self::with_provider(default_provider())
    }

    /// Create a builder on a specific provider.
    pub fn with_provider(provider: Arc<CryptoProvider>) -> Self {
        Self { provider }
    }

    /// Build the scoped configuration for one worker handshake.
    ///
    /// # Errors
    /// - [`AuthError::InvalidTrustRoot`] if the CA PEM yields no trust anchor.
    /// - [`AuthError::InvalidLeafCredential`] if the leaf certificate and key
    ///   do not form a valid, current pair.
    pub fn build_scoped(
        &self,
        record: &CredentialRecord,
        protocol: &str,
    ) -> AuthResult<ScopedTlsConfig> {
        let roots = parse_trust_roots(&record.ca_cert_pem)?;
        let leaf = parse_leaf(&record.cert_pem, &record.key_pem, &self.provider)?;

        let client_verifier =
            WebPkiClientVerifier::builder_with_provider(Arc::new(roots), Arc::clone(&self.provider))
                .build()
                .map_err(|e| {
                    AuthError::InvalidTrustRoot(format!("failed to build client verifier: {}", e))
                })?;

        let mut config = ServerConfig::builder_with_provider(Arc::clone(&self.provider))
            .with_protocol_versions(&[&rustls::version::TLS13])?
            .with_client_cert_verifier(client_verifier)
            .with_single_cert(leaf.chain, leaf.key)
            .map_err(|e| AuthError::InvalidLeafCredential(e.to_string()))?;

        config.alpn_protocols = vec![protocol.as_bytes().to_vec()];
        debug!("Built scoped worker TLS configuration");

        Ok(ScopedTlsConfig {
            server_config: Arc::new(config),
            protocol: protocol.to_string(),
        })
    }

    /// Build the configuration for ordinary clients from the controller's own
    /// certificate files. No client certificate is requested.
    ///
    /// # Errors
    /// Returns an error if the files cannot be loaded or rustls rejects them.
    pub fn build_default(
        &self,
        files: &CertificateFiles,
        alpn_protocols: Vec<Vec<u8>>,
    ) -> AuthResult<Arc<ServerConfig>> {
        let identity = files.load()?;

        let mut config = ServerConfig::builder_with_provider(Arc::clone(&self.provider))
            .with_safe_default_protocol_versions()?
            .with_no_client_auth()
            .with_single_cert(identity.chain, identity.key)?;

        config.alpn_protocols = alpn_protocols;
        debug!("Built default TLS configuration");
        Ok(Arc::new(config))
    }
}

/// Builder for the worker's side of the handshake.
#[derive(Clone)]
pub struct ClientConfigBuilder {
    provider: Arc<CryptoProvider>,
}

impl Default for ClientConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientConfigBuilder {
    /// Create a builder on the ring provider.
    pub fn new() -> Self {
        Self::with_provider(default_provider())
    }

    /// Create a builder on a specific provider.
    pub fn with_provider(provider: Arc<CryptoProvider>) -> Self {
        Self { provider }
    }

    /// Build a client configuration that presents the worker leaf, trusts only
    /// the worker CA and offers `offer` as its ALPN list.
    ///
    /// # Errors
    /// Same credential errors as [`ServerConfigBuilder::build_scoped`].
    pub fn build_worker(
        &self,
        record: &CredentialRecord,
        offer: &[String],
    ) -> AuthResult<Arc<ClientConfig>> {
        let roots = parse_trust_roots(&record.ca_cert_pem)?;
        let leaf = parse_leaf(&record.cert_pem, &record.key_pem, &self.provider)?;

        let mut config = ClientConfig::builder_with_provider(Arc::clone(&self.provider))
            .with_protocol_versions(&[&rustls::version::TLS13])?
            .with_root_certificates(roots)
            .with_client_auth_cert(leaf.chain, leaf.key)
            .map_err(|e| AuthError::InvalidLeafCredential(e.to_string()))?;

        config.alpn_protocols = offer.iter().map(|p| p.as_bytes().to_vec()).collect();
        Ok(Arc::new(config))
    }
}

/// Worker-side client configuration on the ring provider.
pub fn worker_client_config(
    record: &CredentialRecord,
    offer: &[String],
) -> AuthResult<Arc<ClientConfig>> {
    ClientConfigBuilder::new().build_worker(record, offer)
}
