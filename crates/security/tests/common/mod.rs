//! Common test utilities for worker-auth integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use rcgen::{
    BasicConstraints, Certificate, CertificateParams, DnType, ExtendedKeyUsagePurpose, IsCa,
    KeyPair, KeyUsagePurpose,
};
use rustls::pki_types::ServerName;
use rustls::{ClientConfig, ServerConfig};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio_rustls::{client, server, TlsAcceptor, TlsConnector};
use workerauth_security::{AeadKms, Kms, KmsError};
use workerauth_types::{CredentialRecord, EncryptedBlobInfo};
use zeroize::Zeroizing;

/// A throwaway worker CA able to issue leaves.
pub struct WorkerPki {
    pub ca_pem: String,
    ca_cert: Certificate,
    ca_key: KeyPair,
}

impl WorkerPki {
    pub fn new(name: &str) -> Self {
        let ca_key = KeyPair::generate().unwrap();
        let mut params = CertificateParams::new(Vec::<String>::new()).unwrap();
        params.distinguished_name.push(DnType::CommonName, name);
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.key_usages = vec![
            KeyUsagePurpose::KeyCertSign,
            KeyUsagePurpose::CrlSign,
            KeyUsagePurpose::DigitalSignature,
        ];
        let ca_cert = params.self_signed(&ca_key).unwrap();

        Self {
            ca_pem: ca_cert.pem(),
            ca_cert,
            ca_key,
        }
    }

    /// Issue a leaf usable as both TLS server and client certificate.
    pub fn issue(&self, cn: &str) -> (String, String) {
        let key = KeyPair::generate().unwrap();
        let mut params = CertificateParams::new(vec!["localhost".to_string()]).unwrap();
        params.distinguished_name.push(DnType::CommonName, cn);
        params.extended_key_usages = vec![
            ExtendedKeyUsagePurpose::ServerAuth,
            ExtendedKeyUsagePurpose::ClientAuth,
        ];
        let cert = params.signed_by(&key, &self.ca_cert, &self.ca_key).unwrap();
        (cert.pem(), key.serialize_pem())
    }

    /// A complete credential record for a fresh leaf.
    pub fn record(&self, cn: &str) -> CredentialRecord {
        let (cert_pem, key_pem) = self.issue(cn);
        CredentialRecord::new(self.ca_pem.clone(), cert_pem, key_pem)
    }
}

pub fn test_kms() -> AeadKms {
    AeadKms::new("test-key", [7u8; 32])
}

/// KMS wrapper that counts decrypt calls and can be told to fail.
pub struct CountingKms {
    inner: AeadKms,
    fail: bool,
    calls: AtomicUsize,
}

impl CountingKms {
    pub fn new(inner: AeadKms) -> Self {
        Self {
            inner,
            fail: false,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing(inner: AeadKms) -> Self {
        Self {
            fail: true,
            ..Self::new(inner)
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Kms for CountingKms {
    async fn decrypt(&self, blob: &EncryptedBlobInfo) -> Result<Zeroizing<Vec<u8>>, KmsError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(KmsError::Unavailable("injected failure".to_string()));
        }
        self.inner.decrypt(blob).await
    }
}

pub type HandshakeResult = (
    std::io::Result<server::TlsStream<tokio::io::DuplexStream>>,
    std::io::Result<client::TlsStream<tokio::io::DuplexStream>>,
);

/// Run a TLS handshake between the two configs over an in-memory pipe.
pub async fn handshake(server: Arc<ServerConfig>, client: Arc<ClientConfig>) -> HandshakeResult {
    let (client_io, server_io) = tokio::io::duplex(64 * 1024);
    let acceptor = TlsAcceptor::from(server);
    let connector = TlsConnector::from(client);
    let server_name = ServerName::try_from("localhost").unwrap();

    tokio::join!(
        acceptor.accept(server_io),
        connector.connect(server_name, client_io)
    )
}

/// Client config that trusts `ca_pem` but presents no certificate.
pub fn anonymous_client(ca_pem: &str, alpn: &[String]) -> Arc<ClientConfig> {
    let roots = workerauth_security::parse_trust_roots(ca_pem.as_bytes()).unwrap();
    let mut config =
        ClientConfig::builder_with_provider(workerauth_security::default_provider())
            .with_protocol_versions(&[&rustls::version::TLS13])
            .unwrap()
            .with_root_certificates(roots)
            .with_no_client_auth();
    config.alpn_protocols = alpn.iter().map(|p| p.as_bytes().to_vec()).collect();
    Arc::new(config)
}
