//! TCP listener that authenticates workers during the TLS handshake.
//!
//! Each accepted socket is read up to its ClientHello with a
//! [`LazyConfigAcceptor`]. The offered ALPN names go to the
//! [`HandshakeAuthenticator`], and its outcome decides which server
//! configuration finishes the handshake, if any. Completed connections are
//! published on a channel.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use rustls::server::Acceptor;
use rustls::ServerConfig;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch, Semaphore};
use tokio::task::JoinHandle;
use tokio_rustls::server::TlsStream;
use tokio_rustls::LazyConfigAcceptor;
use tracing::{debug, info, warn};

use workerauth_security::{
    certificate_identity, protocols_from_alpn, HandshakeAuthenticator, HandshakeOutcome,
};
use crate::error::{NetworkError, NetworkResult};

/// Default bound on a whole handshake, ClientHello to Finished.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);

/// Default cap on handshakes in flight.
pub const DEFAULT_MAX_CONCURRENT_HANDSHAKES: usize = 1024;

const ACCEPTED_CHANNEL_CAPACITY: usize = 64;

/// Listener tuning.
#[derive(Debug, Clone)]
pub struct ListenerConfig {
    /// Bound on each handshake, including the KMS unwrap.
    pub handshake_timeout: Duration,
    /// Connections arriving while this many handshakes are running are dropped.
    pub max_concurrent_handshakes: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            max_concurrent_handshakes: DEFAULT_MAX_CONCURRENT_HANDSHAKES,
        }
    }
}

/// How a connection was admitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionKind {
    /// Authenticated worker.
    Worker {
        /// Negotiated worker-auth protocol name.
        protocol: String,
        /// CN (or first DNS SAN) of the worker's client certificate.
        identity: Option<String>,
    },
    /// Ordinary client served with the default configuration.
    Default,
}

/// A connection whose handshake completed.
pub struct AcceptedConnection {
    pub peer_addr: SocketAddr,
    pub kind: ConnectionKind,
    pub stream: TlsStream<TcpStream>,
}

impl std::fmt::Debug for AcceptedConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AcceptedConnection")
            .field("peer_addr", &self.peer_addr)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

/// Per-listener state shared by every handshake task.
struct HandshakeContext {
    authenticator: HandshakeAuthenticator,
    default_config: Option<Arc<ServerConfig>>,
    handshake_timeout: Duration,
}

/// TCP listener that performs worker authentication.
pub struct HandshakeListener {
    /// Bound socket, moved into the accept loop on start.
    listener: Option<TcpListener>,
    /// Local address we're listening on.
    local_addr: SocketAddr,
    context: Arc<HandshakeContext>,
    max_concurrent_handshakes: usize,
    shutdown: watch::Sender<bool>,
    /// Handle to the accept loop task.
    accept_task: Option<JoinHandle<()>>,
}

impl HandshakeListener {
    /// Bind a new listener.
    ///
    /// # Arguments
    /// * `listen_addr` - Address to bind to (e.g., "0.0.0.0:9201")
    /// * `authenticator` - Resolves worker credentials from ALPN offers
    /// * `default_config` - Configuration for non-worker clients; without it
    ///   they are dropped
    /// * `config` - Timeouts and limits
    pub async fn bind(
        listen_addr: SocketAddr,
        authenticator: HandshakeAuthenticator,
        default_config: Option<Arc<ServerConfig>>,
        config: ListenerConfig,
    ) -> NetworkResult<Self> {
        let listener = TcpListener::bind(listen_addr)
            .await
            .map_err(|e| NetworkError::BindFailed {
                address: listen_addr.to_string(),
                source: e,
            })?;

        let local_addr = listener.local_addr().map_err(|e| NetworkError::BindFailed {
            address: listen_addr.to_string(),
            source: e,
        })?;

        info!("Handshake listener bound to {}", local_addr);

        let (shutdown, _) = watch::channel(false);

        Ok(Self {
            listener: Some(listener),
            local_addr,
            context: Arc::new(HandshakeContext {
                authenticator,
                default_config,
                handshake_timeout: config.handshake_timeout,
            }),
            max_concurrent_handshakes: config.max_concurrent_handshakes,
            shutdown,
            accept_task: None,
        })
    }

    /// Start accepting connections.
    ///
    /// Returns the receiving end of the channel completed connections are
    /// published on. The accept loop stops once the receiver is dropped.
    pub fn start(&mut self) -> NetworkResult<mpsc::Receiver<AcceptedConnection>> {
        let listener = self.listener.take().ok_or(NetworkError::AlreadyStarted)?;

        let (tx, rx) = mpsc::channel(ACCEPTED_CHANNEL_CAPACITY);
        let context = Arc::clone(&self.context);
        let permits = Arc::new(Semaphore::new(self.max_concurrent_handshakes));
        let shutdown = self.shutdown.subscribe();
        let local_addr = self.local_addr;

        let task = tokio::spawn(async move {
            info!("Handshake listener started on {}", local_addr);
            accept_loop(listener, context, permits, tx, shutdown).await;
        });

        self.accept_task = Some(task);

        Ok(rx)
    }

    /// Get the local address we're listening on.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting connections. Handshakes already in flight finish on
    /// their own.
    pub async fn stop(&mut self) {
        if let Some(task) = self.accept_task.take() {
            let _ = self.shutdown.send(true);

            if let Err(e) = task.await {
                warn!("Accept task panicked: {:?}", e);
            }
        }

        info!("Handshake listener stopped");
    }

    /// Wait for the accept loop to finish.
    pub async fn wait(&mut self) {
        if let Some(task) = self.accept_task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for HandshakeListener {
    fn drop(&mut self) {
        if let Some(task) = self.accept_task.take() {
            // Can't await in drop
            task.abort();
        }
    }
}

/// Accept loop that hands each connection to its own handshake task.
async fn accept_loop(
    listener: TcpListener,
    context: Arc<HandshakeContext>,
    permits: Arc<Semaphore>,
    tx: mpsc::Sender<AcceptedConnection>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let accepted = tokio::select! {
            _ = shutdown.changed() => {
                debug!("Shutdown requested, stopping accept loop");
                break;
            }
            _ = tx.closed() => {
                debug!("Connection receiver dropped, stopping accept loop");
                break;
            }
            accepted = listener.accept() => accepted,
        };

        let (tcp, peer_addr) = match accepted {
            Ok(conn) => conn,
            Err(e) => {
                warn!("{}", NetworkError::Accept(e));
                continue;
            }
        };

        let Ok(permit) = Arc::clone(&permits).try_acquire_owned() else {
            warn!(
                "Handshake limit reached, dropping connection from {}",
                peer_addr
            );
            continue;
        };

        let context = Arc::clone(&context);
        let tx = tx.clone();

        tokio::spawn(async move {
            let _permit = permit;
            debug!("Incoming connection from {}", peer_addr);

            let result = match tokio::time::timeout(
                context.handshake_timeout,
                context.handshake(tcp, peer_addr),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(NetworkError::HandshakeTimeout(context.handshake_timeout)),
            };

            match result {
                Ok(conn) => {
                    if tx.send(conn).await.is_err() {
                        debug!("{} for {}", NetworkError::ChannelClosed, peer_addr);
                    }
                }
                Err(e) => {
                    warn!("Failed to complete handshake with {}: {}", peer_addr, e);
                }
            }
        });
    }
}

impl HandshakeContext {
    /// Drive one connection from ClientHello to a completed handshake.
    async fn handshake(
        &self,
        tcp: TcpStream,
        peer_addr: SocketAddr,
    ) -> NetworkResult<AcceptedConnection> {
        let start = LazyConfigAcceptor::new(Acceptor::default(), tcp)
            .await
            .map_err(NetworkError::Handshake)?;

        let protocols = {
            let hello = start.client_hello();
            protocols_from_alpn(hello.alpn().into_iter().flatten())
        };

        match self.authenticator.authenticate(&protocols).await {
            HandshakeOutcome::Configured(scoped) => {
                let protocol = scoped.protocol().to_string();
                let stream = start
                    .into_stream(scoped.into_server_config())
                    .await
                    .map_err(NetworkError::Handshake)?;

                let identity = stream
                    .get_ref()
                    .1
                    .peer_certificates()
                    .and_then(|chain| chain.first())
                    .and_then(certificate_identity);

                info!(
                    "Accepted worker {} from {}",
                    identity.as_deref().unwrap_or("<unnamed>"),
                    peer_addr
                );

                Ok(AcceptedConnection {
                    peer_addr,
                    kind: ConnectionKind::Worker { protocol, identity },
                    stream,
                })
            }
            HandshakeOutcome::NotApplicable => {
                let config = self
                    .default_config
                    .clone()
                    .ok_or(NetworkError::NoDefaultConfig)?;
                let stream = start
                    .into_stream(config)
                    .await
                    .map_err(NetworkError::Handshake)?;

                debug!("Accepted non-worker client {}", peer_addr);

                Ok(AcceptedConnection {
                    peer_addr,
                    kind: ConnectionKind::Default,
                    stream,
                })
            }
            HandshakeOutcome::Rejected(err) => Err(NetworkError::Rejected(err)),
        }
    }
}

/// Bind and start a handshake listener.
///
/// This is a convenience function that creates and starts a listener.
pub async fn spawn_handshake_listener(
    listen_addr: SocketAddr,
    authenticator: HandshakeAuthenticator,
    default_config: Option<Arc<ServerConfig>>,
    config: ListenerConfig,
) -> NetworkResult<(HandshakeListener, mpsc::Receiver<AcceptedConnection>)> {
    let mut listener =
        HandshakeListener::bind(listen_addr, authenticator, default_config, config).await?;
    let rx = listener.start()?;
    Ok((listener, rx))
}

#[cfg(test)]
mod tests {
    use super::*;
    use workerauth_security::AeadKms;

    fn authenticator() -> HandshakeAuthenticator {
        HandshakeAuthenticator::new(Arc::new(AeadKms::new("k1", [0u8; 32])))
    }

    #[test]
    fn test_listener_config_defaults() {
        let config = ListenerConfig::default();
        assert_eq!(config.handshake_timeout, Duration::from_secs(30));
        assert_eq!(config.max_concurrent_handshakes, 1024);
    }

    #[tokio::test]
    async fn test_start_twice_fails() {
        let mut listener = HandshakeListener::bind(
            "127.0.0.1:0".parse().unwrap(),
            authenticator(),
            None,
            ListenerConfig::default(),
        )
        .await
        .unwrap();

        assert_ne!(listener.local_addr().port(), 0);
        let _rx = listener.start().unwrap();
        assert!(matches!(listener.start(), Err(NetworkError::AlreadyStarted)));
        listener.stop().await;
    }

    #[tokio::test]
    async fn test_bind_in_use_fails() {
        let first = HandshakeListener::bind(
            "127.0.0.1:0".parse().unwrap(),
            authenticator(),
            None,
            ListenerConfig::default(),
        )
        .await
        .unwrap();

        let second = HandshakeListener::bind(
            first.local_addr(),
            authenticator(),
            None,
            ListenerConfig::default(),
        )
        .await;
        assert!(matches!(second, Err(NetworkError::BindFailed { .. })));
    }

    #[tokio::test]
    async fn test_stop_closes_channel() {
        let (mut listener, mut rx) = spawn_handshake_listener(
            "127.0.0.1:0".parse().unwrap(),
            authenticator(),
            None,
            ListenerConfig::default(),
        )
        .await
        .unwrap();

        listener.stop().await;
        assert!(rx.recv().await.is_none());
    }
}
