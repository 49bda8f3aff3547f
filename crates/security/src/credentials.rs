//! Certificate material handling.
//!
//! Worker credentials arrive as PEM text inside a decrypted
//! [`CredentialRecord`](workerauth_types::CredentialRecord); the default
//! server identity is read from PEM files. Both end up here as rustls types.

use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, UnixTime};
use rustls::RootCertStore;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use x509_parser::prelude::*;

use crate::error::{AuthError, AuthResult};

/// Build a trust store holding only the certificates in `ca_pem`.
///
/// # Errors
/// Returns [`AuthError::InvalidTrustRoot`] if the PEM is malformed or none of
/// its certificates can serve as a trust anchor.
pub fn parse_trust_roots(ca_pem: &[u8]) -> AuthResult<RootCertStore> {
    let certs = rustls_pemfile::certs(&mut &ca_pem[..])
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| AuthError::InvalidTrustRoot(format!("failed to parse CA PEM: {}", e)))?;

    if certs.is_empty() {
        return Err(AuthError::InvalidTrustRoot(
            "no certificate found in CA PEM".to_string(),
        ));
    }

    let mut roots = RootCertStore::empty();
    let (added, ignored) = roots.add_parsable_certificates(certs);
    if added == 0 {
        return Err(AuthError::InvalidTrustRoot(format!(
            "none of {} CA certificate(s) usable as a trust anchor",
            ignored
        )));
    }

    debug!("Built worker trust store with {} CA certificate(s)", added);
    Ok(roots)
}

/// A certificate chain and the private key for its first certificate.
pub struct LeafCredential {
    /// Leaf first, then any intermediates.
    pub chain: Vec<CertificateDer<'static>>,
    /// Private key matching `chain[0]`.
    pub key: PrivateKeyDer<'static>,
}

impl std::fmt::Debug for LeafCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LeafCredential")
            .field("chain_len", &self.chain.len())
            .finish_non_exhaustive()
    }
}

/// Parse and check a leaf certificate/key pair.
///
/// The key must be loadable by `provider`, its public key must equal the
/// certificate's, and the certificate must be inside its validity window.
///
/// # Errors
/// Returns [`AuthError::InvalidLeafCredential`] on any of those failures.
pub fn parse_leaf(
    cert_pem: &[u8],
    key_pem: &[u8],
    provider: &CryptoProvider,
) -> AuthResult<LeafCredential> {
    let chain = rustls_pemfile::certs(&mut &cert_pem[..])
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| AuthError::InvalidLeafCredential(format!("failed to parse certificate PEM: {}", e)))?;
    let leaf = chain.first().ok_or_else(|| {
        AuthError::InvalidLeafCredential("no certificate found in certificate PEM".to_string())
    })?;

    let key = rustls_pemfile::private_key(&mut &key_pem[..])
        .map_err(|e| AuthError::InvalidLeafCredential(format!("failed to parse key PEM: {}", e)))?
        .ok_or_else(|| {
            AuthError::InvalidLeafCredential("no private key found in key PEM".to_string())
        })?;

    check_key_matches(leaf, &key, provider)?;
    check_validity(leaf, UnixTime::now())?;

    Ok(LeafCredential { chain, key })
}

fn check_key_matches(
    leaf: &CertificateDer<'_>,
    key: &PrivateKeyDer<'_>,
    provider: &CryptoProvider,
) -> AuthResult<()> {
    let signing_key = provider
        .key_provider
        .load_private_key(key.clone_key())
        .map_err(|e| AuthError::InvalidLeafCredential(format!("unsupported private key: {}", e)))?;
    let key_spki = signing_key.public_key().ok_or_else(|| {
        AuthError::InvalidLeafCredential("cannot derive public key from private key".to_string())
    })?;

    let (_, cert) = X509Certificate::from_der(leaf.as_ref())
        .map_err(|e| AuthError::InvalidLeafCredential(format!("failed to parse certificate: {}", e)))?;

    let key_spki: &[u8] = key_spki.as_ref();
    if cert.public_key().raw != key_spki {
        return Err(AuthError::InvalidLeafCredential(
            "private key does not match certificate".to_string(),
        ));
    }
    Ok(())
}

fn check_validity(leaf: &CertificateDer<'_>, now: UnixTime) -> AuthResult<()> {
    let (_, cert) = X509Certificate::from_der(leaf.as_ref())
        .map_err(|e| AuthError::InvalidLeafCredential(format!("failed to parse certificate: {}", e)))?;

    let now = now.as_secs() as i64;
    let validity = cert.validity();
    if now < validity.not_before.timestamp() {
        return Err(AuthError::InvalidLeafCredential(
            "certificate not yet valid".to_string(),
        ));
    }
    if now > validity.not_after.timestamp() {
        return Err(AuthError::InvalidLeafCredential(
            "certificate has expired".to_string(),
        ));
    }
    Ok(())
}

/// Best-effort human identity for a peer certificate: the subject CN, else
/// the first DNS subject alternative name.
pub fn certificate_identity(cert: &CertificateDer<'_>) -> Option<String> {
    let (_, parsed) = X509Certificate::from_der(cert.as_ref()).ok()?;

    if let Some(cn) = parsed
        .subject()
        .iter_common_name()
        .next()
        .and_then(|cn| cn.as_str().ok())
    {
        return Some(cn.to_string());
    }

    parsed
        .subject_alternative_name()
        .ok()
        .flatten()
        .and_then(|san| {
            san.value.general_names.iter().find_map(|name| match name {
                GeneralName::DNSName(dns) => Some(dns.to_string()),
                _ => None,
            })
        })
}

/// PEM files holding the controller's own identity, served to clients that
/// do not take part in worker auth.
#[derive(Debug, Clone)]
pub struct CertificateFiles {
    cert_path: PathBuf,
    key_path: PathBuf,
}

impl CertificateFiles {
    /// Point at a certificate chain file and its private key file.
    pub fn new(cert_path: impl Into<PathBuf>, key_path: impl Into<PathBuf>) -> Self {
        Self {
            cert_path: cert_path.into(),
            key_path: key_path.into(),
        }
    }

    /// Load the chain and key.
    ///
    /// # Errors
    /// Returns [`AuthError::CertificateFile`] if a file cannot be read or holds
    /// no certificate/key.
    pub fn load(&self) -> AuthResult<LeafCredential> {
        info!("Loading default server certificate");
        debug!("Certificate: {}", self.cert_path.display());
        debug!("Key: {}", self.key_path.display());

        let chain = load_cert_chain(&self.cert_path)?;
        let key = load_private_key(&self.key_path)?;
        info!("Loaded {} default certificate(s)", chain.len());

        Ok(LeafCredential { chain, key })
    }
}

fn load_cert_chain(path: &Path) -> AuthResult<Vec<CertificateDer<'static>>> {
    let file = File::open(path).map_err(|e| {
        AuthError::CertificateFile(format!("failed to open {}: {}", path.display(), e))
    })?;
    let certs = rustls_pemfile::certs(&mut BufReader::new(file))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| {
            AuthError::CertificateFile(format!("failed to parse certificates from {}: {}", path.display(), e))
        })?;

    if certs.is_empty() {
        return Err(AuthError::CertificateFile(format!(
            "no certificates found in {}",
            path.display()
        )));
    }
    Ok(certs)
}

fn load_private_key(path: &Path) -> AuthResult<PrivateKeyDer<'static>> {
    let file = File::open(path).map_err(|e| {
        AuthError::CertificateFile(format!("failed to open {}: {}", path.display(), e))
    })?;
    rustls_pemfile::private_key(&mut BufReader::new(file))
        .map_err(|e| {
            AuthError::CertificateFile(format!("failed to parse key from {}: {}", path.display(), e))
        })?
        .ok_or_else(|| {
            AuthError::CertificateFile(format!("no private key found in {}", path.display()))
        })
}
