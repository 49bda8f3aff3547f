//! Network error types for the handshake listener.

use std::io;
use std::time::Duration;
use thiserror::Error;
use workerauth_security::AuthError;

/// Errors that can occur while accepting and authenticating connections.
#[derive(Debug, Error)]
pub enum NetworkError {
    /// Listener bind failed.
    #[error("failed to bind listener on {address}: {source}")]
    BindFailed {
        address: String,
        #[source]
        source: io::Error,
    },

    /// Failed to accept a TCP connection.
    #[error("failed to accept connection: {0}")]
    Accept(#[source] io::Error),

    /// TLS handshake failed at the transport level.
    #[error("TLS handshake failed: {0}")]
    Handshake(#[source] io::Error),

    /// Handshake did not finish in time.
    #[error("handshake timed out after {0:?}")]
    HandshakeTimeout(Duration),

    /// Worker credential was offered but rejected.
    #[error("worker handshake rejected: {0}")]
    Rejected(#[source] AuthError),

    /// Client is not a worker and no default configuration is installed.
    #[error("no default TLS configuration for non-worker client")]
    NoDefaultConfig,

    /// Channel closed unexpectedly.
    #[error("internal channel closed")]
    ChannelClosed,

    /// `start` called twice.
    #[error("listener already started")]
    AlreadyStarted,
}

/// Result type for network operations.
pub type NetworkResult<T> = Result<T, NetworkError>;
