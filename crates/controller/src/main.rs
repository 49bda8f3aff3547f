mod cli;
mod config;

use clap::Parser;
use crate::cli::{Cli, Commands};
use crate::config::{AppConfig, LogFormat};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use workerauth_network::{spawn_handshake_listener, AcceptedConnection, ConnectionKind};
use workerauth_security::{HandshakeAuthenticator, ServerConfigBuilder};

#[tokio::main]
async fn main() {
    // Install default crypto provider for rustls before any TLS operations
    let _ = rustls::crypto::ring::default_provider().install_default();

    if let Err(e) = run().await {
        error!("Application error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match AppConfig::load(cli.config.as_deref()) {
        Ok(config) => {
            init_tracing(&config.logging.level, config.logging.format);
            config
        }
        Err(e) => {
            init_tracing("info", LogFormat::Text);
            return Err(e.into());
        }
    };

    info!("Configuration loaded successfully");
    info!("  Listen Addr: {}", config.listener.listen_addr);
    info!("  KMS key: {}", config.kms.key_id);

    match cli.command {
        Some(Commands::Run) | None => {
            run_controller(config).await?;
        }
        Some(Commands::CheckConfig) => {
            check_config(&config)?;
        }
    }

    Ok(())
}

async fn run_controller(config: AppConfig) -> anyhow::Result<()> {
    config.validate()?;

    let authenticator = HandshakeAuthenticator::new(Arc::new(config.kms()?))
        .with_unwrap_timeout(config.unwrap_timeout());

    let default_config = match config.certificate_files() {
        Some(files) => Some(ServerConfigBuilder::new().build_default(&files, Vec::new())?),
        None => {
            warn!("No default TLS certificate configured, non-worker clients will be dropped");
            None
        }
    };

    let (mut listener, mut incoming) = spawn_handshake_listener(
        config.listen_addr()?,
        authenticator,
        default_config,
        config.listener_config(),
    )
    .await?;

    info!("===================================");
    info!("Worker Auth Controller");
    info!("  Listening on {}", listener.local_addr());
    info!("===================================");

    loop {
        tokio::select! {
            conn = incoming.recv() => match conn {
                Some(conn) => {
                    tokio::spawn(handle_connection(conn));
                }
                None => {
                    warn!("Listener stopped unexpectedly");
                    break;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
        }
    }

    listener.stop().await;
    Ok(())
}

/// Sessions on top of accepted connections belong to the controller's RPC
/// service, which is not part of this binary. The connection is recorded and
/// closed.
async fn handle_connection(mut conn: AcceptedConnection) {
    match &conn.kind {
        ConnectionKind::Worker { protocol, identity } => {
            info!(
                "Worker {} connected from {} ({} byte protocol tag)",
                identity.as_deref().unwrap_or("<unnamed>"),
                conn.peer_addr,
                protocol.len()
            );
        }
        ConnectionKind::Default => {
            debug!("Client connected from {}", conn.peer_addr);
        }
    }

    if let Err(e) = conn.stream.shutdown().await {
        debug!("Error closing connection from {}: {}", conn.peer_addr, e);
    }
}

fn check_config(config: &AppConfig) -> anyhow::Result<()> {
    config.validate()?;

    if let Some(files) = config.certificate_files() {
        ServerConfigBuilder::new().build_default(&files, Vec::new())?;
    }

    println!("\nConfiguration");
    println!("─────────────────────────────────────");
    println!("  Listen:            {}", config.listen_addr()?);
    println!(
        "  Handshake timeout: {}s",
        config.listener.handshake_timeout_secs
    );
    println!(
        "  Handshake cap:     {}",
        config.listener.max_concurrent_handshakes
    );
    println!("  Unwrap timeout:    {}s", config.worker_auth.unwrap_timeout_secs);
    println!("  KMS key id:        {}", config.kms.key_id);
    println!(
        "  Default TLS:       {}",
        config
            .default_tls
            .cert_path
            .as_deref()
            .unwrap_or("(none, non-worker clients dropped)")
    );
    println!("\nConfiguration OK");

    Ok(())
}

fn init_tracing(level: &str, format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}
