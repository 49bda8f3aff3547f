//! Worker Auth Network Layer
//!
//! TCP + TLS listener for the controller. Every connection is held at its
//! ClientHello until the worker-auth offer in its ALPN list has been
//! resolved, so each worker finishes its handshake against a configuration
//! built from its own credentials.
//!
//! ## Architecture
//!
//! ```text
//!  TcpListener ──> LazyConfigAcceptor ──> HandshakeAuthenticator
//!                        │                    │
//!                        │      ┌─────────────┼──────────────┐
//!                        │      ▼             ▼              ▼
//!                        │  Configured   NotApplicable    Rejected
//!                        │  (scoped cfg) (default cfg)   (drop socket)
//!                        ▼
//!              mpsc::Receiver<AcceptedConnection>
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use workerauth_network::{spawn_handshake_listener, ListenerConfig};
//!
//! let (listener, mut incoming) = spawn_handshake_listener(
//!     "0.0.0.0:9201".parse()?,
//!     authenticator,
//!     default_config,
//!     ListenerConfig::default(),
//! )
//! .await?;
//!
//! while let Some(conn) = incoming.recv().await {
//!     // conn.kind tells workers and ordinary clients apart
//! }
//! ```

pub mod error;
pub mod listener;

// Re-export commonly used types
pub use error::{NetworkError, NetworkResult};
pub use listener::{
    spawn_handshake_listener, AcceptedConnection, ConnectionKind, HandshakeListener,
    ListenerConfig, DEFAULT_HANDSHAKE_TIMEOUT, DEFAULT_MAX_CONCURRENT_HANDSHAKES,
};
