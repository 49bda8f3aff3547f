//! Handshake-time worker authentication.
//!
//! A worker proves who it is by carrying its wrapped credentials inside the
//! ALPN list of its ClientHello. This crate turns that list into a rustls
//! `ServerConfig` scoped to one connection.
//!
//! # Features
//! - ALPN offer parsing and encoding (`v1workerauth-<ordinal><fragment>`)
//! - Credential unwrapping through an injected KMS, bounded by a timeout
//! - Trust root and leaf key pair validation (PEM format)
//! - Scoped rustls ServerConfig with mandatory client auth and TLS 1.3
//! - Worker-side ClientConfig builder
//!
//! # Example
//! ```no_run
//! use std::sync::Arc;
//! use workerauth_security::{AeadKms, HandshakeAuthenticator, HandshakeOutcome};
//!
//! # async fn example(alpn: Vec<String>) -> anyhow::Result<()> {
//! let kms = AeadKms::from_hex("worker-auth", &"00".repeat(32))?;
//! let authenticator = HandshakeAuthenticator::new(Arc::new(kms));
//!
//! match authenticator.authenticate(&alpn).await {
//!     HandshakeOutcome::NotApplicable => { /* serve the default config */ }
//!     HandshakeOutcome::Configured(scoped) => { /* finish with scoped.server_config() */ }
//!     HandshakeOutcome::Rejected(err) => return Err(err.into()),
//! }
//! # Ok(())
//! # }
//! ```

pub mod alpn;
mod authenticator;
mod credentials;
mod error;
pub mod kms;
mod tls_config;
mod unwrap;

// Re-export main types and functions
pub use alpn::{encode_offer, parse_offer, WorkerAuthOffer, WORKER_AUTH_PREFIX};
pub use authenticator::{protocols_from_alpn, HandshakeAuthenticator, HandshakeOutcome};
pub use credentials::{
    certificate_identity, parse_leaf, parse_trust_roots, CertificateFiles, LeafCredential,
};
pub use error::{AuthError, AuthResult, KmsError};
pub use kms::{AeadKms, Kms};
pub use tls_config::{
    default_provider, worker_client_config, ClientConfigBuilder, ScopedTlsConfig,
    ServerConfigBuilder,
};
pub use unwrap::{
    decode_payload, encode_payload, seal_offer, CredentialUnwrapper, DEFAULT_UNWRAP_TIMEOUT,
};
