use crate::admission::{Admission, AdmissionMode};
use crate::config::ServerConfig;
use crate::connection::handle_connection;
use crate::error::RelayError;
use crate::relay::Relay;
use crate::tls::load_tls_acceptor;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tokio_rustls::TlsAcceptor;
use tracing::{error, info, warn};

/// How long shutdown waits for open connections before abandoning them.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Shared state for the relay server.
pub struct ServerState {
    /// Registry-Router shared by every connection.
    pub relay: Relay,
    /// Runtime server configuration.
    pub config: ServerConfig,
    /// TLS acceptor when certificate material is configured.
    pub tls: Option<TlsAcceptor>,
}

impl ServerState {
    /// Build the relay and, if configured, the TLS acceptor from `config`.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Tls`] if the certificate or key cannot be loaded.
    pub fn new(config: ServerConfig) -> Result<Self, RelayError> {
        if config.mode == AdmissionMode::Secure && config.token.is_none() {
            warn!("secure mode without an admission token: every registration will be rejected");
        }

        let tls = config
            .tls_paths()
            .map(|(cert, key)| load_tls_acceptor(cert, key))
            .transpose()?;

        let relay = Relay::new(Admission::new(config.mode, config.token.clone()));

        Ok(Self { relay, config, tls })
    }
}

/// # Errors
///
/// Returns an error if the accept loop encounters an I/O failure.
pub async fn run(listener: TcpListener, state: Arc<ServerState>) -> Result<(), RelayError> {
    let (_shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(());
    run_with_shutdown(listener, state, shutdown_rx).await
}

/// Run the server accept loop with an externally-controlled shutdown signal.
///
/// When the sender behind `shutdown_rx` sends or is dropped, the accept loop
/// stops accepting new connections and waits up to 30 seconds for in-flight
/// connections.
///
/// # Errors
///
/// Returns an error if the listener's local address cannot be read.
pub async fn run_with_shutdown(
    listener: TcpListener,
    state: Arc<ServerState>,
    mut shutdown_rx: tokio::sync::watch::Receiver<()>,
) -> Result<(), RelayError> {
    let local_addr = listener.local_addr().map_err(RelayError::Io)?;
    info!(
        tls = state.tls.is_some(),
        mode = ?state.config.mode,
        "server listening on {}",
        local_addr
    );
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, addr)) => {
                        let state = Arc::clone(&state);
                        connections.spawn(serve_stream(stream, addr, state));
                    }
                    Err(e) => {
                        error!("failed to accept connection: {}", e);
                    }
                }
                while connections.try_join_next().is_some() {}
            }
            _ = shutdown_rx.changed() => {
                info!("shutdown signal received, draining {} connections", connections.len());
                break;
            }
        }
    }

    let drained = tokio::time::timeout(DRAIN_TIMEOUT, async {
        while connections.join_next().await.is_some() {}
    })
    .await;
    if drained.is_err() {
        warn!(
            "drain timeout reached with {} connections still active",
            connections.len()
        );
        connections.abort_all();
    }

    info!("server shut down gracefully");
    Ok(())
}

async fn serve_stream(stream: TcpStream, addr: SocketAddr, state: Arc<ServerState>) {
    let result = match state.tls.clone() {
        Some(acceptor) => match acceptor.accept(stream).await {
            Ok(tls_stream) => handle_connection(tls_stream, addr, state).await,
            Err(e) => Err(RelayError::Tls(e.to_string())),
        },
        None => handle_connection(stream, addr, state).await,
    };
    if let Err(e) = result {
        tracing::debug!("connection from {} closed: {}", addr, e);
    }
}
