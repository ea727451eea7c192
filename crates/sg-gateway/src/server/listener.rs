//! SSH server listener
//!
//! Accepts incoming connections and runs one russh session per client.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use russh_keys::key::KeyPair;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use sg_core::ConnectionId;

use crate::server::handler::{ConnectionHandler, ServerConfig};
use crate::state::GatewayState;

/// SSH server that listens for incoming connections
pub struct GatewayServer {
    /// Server configuration
    config: ServerConfig,
    /// Shared gateway state
    state: Arc<GatewayState>,
    /// Cancellation token for graceful shutdown
    cancel: CancellationToken,
    next_connection: AtomicU64,
}

impl GatewayServer {
    pub fn new(host_key: KeyPair, state: Arc<GatewayState>, cancel: CancellationToken) -> Self {
        Self {
            config: ServerConfig::new(host_key, &state.config),
            state,
            cancel,
            next_connection: AtomicU64::new(1),
        }
    }

    /// Bind `bind_addr` and serve until cancelled
    pub async fn run(&self, bind_addr: &str) -> Result<()> {
        let listener = TcpListener::bind(bind_addr)
            .await
            .with_context(|| format!("Failed to bind to {}", bind_addr))?;
        self.run_on(listener).await
    }

    /// Serve connections from an already bound listener until cancelled
    pub async fn run_on(&self, listener: TcpListener) -> Result<()> {
        let local_addr = listener.local_addr()?;
        tracing::info!("SSH server listening on {}", local_addr);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    tracing::info!("SSH server shutting down");
                    break;
                }

                result = listener.accept() => {
                    match result {
                        Ok((socket, peer_addr)) => self.handle_connection(socket, peer_addr),
                        Err(e) => tracing::error!("Failed to accept connection: {}", e),
                    }
                }
            }
        }

        Ok(())
    }

    fn handle_connection(&self, socket: TcpStream, peer_addr: SocketAddr) {
        let connection = ConnectionId(self.next_connection.fetch_add(1, Ordering::Relaxed));
        let span = tracing::info_span!("connection", id = %connection, peer = %peer_addr);
        let _entered = span.enter();
        tracing::info!("New connection from {}", peer_addr);

        let config = Arc::clone(&self.config.ssh_config);
        let handler = ConnectionHandler::new(connection, Arc::clone(&self.state), Some(peer_addr));
        let cancel = self.cancel.clone();

        tokio::spawn(
            async move {
                let serve = async {
                    let session = russh::server::run_stream(config, socket, handler).await?;
                    session.await
                };

                let result = tokio::select! {
                    _ = cancel.cancelled() => {
                        tracing::debug!("Connection from {} cancelled", peer_addr);
                        return;
                    }
                    result = serve => result,
                };

                match result {
                    Ok(()) => tracing::info!("Connection from {} closed", peer_addr),
                    Err(e) => tracing::warn!("Connection from {} closed with error: {}", peer_addr, e),
                }
            }
            .in_current_span(),
        );
    }
}

/// Load the server's private host key
///
/// A missing or unparsable key is fatal: the gateway cannot prove its
/// identity without one.
pub fn load_host_key(path: &Path) -> Result<KeyPair> {
    tracing::info!("Loading host key from {:?}", path);
    russh_keys::load_secret_key(path, None)
        .with_context(|| format!("Failed to load host key from {:?}", path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_host_key_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_host_key(&dir.path().join("id_rsa")).unwrap_err();
        assert!(err.to_string().contains("Failed to load host key"));
    }

    #[test]
    fn test_garbage_host_key_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("id_rsa");
        std::fs::write(&path, "not a key").unwrap();
        assert!(load_host_key(&path).is_err());
    }

    #[tokio::test]
    async fn test_bind_failure_is_fatal() {
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = taken.local_addr().unwrap().to_string();

        let state = Arc::new(GatewayState::from_config(Default::default()).unwrap());
        let key = KeyPair::generate_ed25519().unwrap();
        let server = GatewayServer::new(key, state, CancellationToken::new());

        let err = server.run(&addr).await.unwrap_err();
        assert!(err.to_string().contains("Failed to bind"));
    }

    #[tokio::test]
    async fn test_stops_when_cancelled() {
        let state = Arc::new(GatewayState::from_config(Default::default()).unwrap());
        let key = KeyPair::generate_ed25519().unwrap();
        let cancel = CancellationToken::new();
        let server = GatewayServer::new(key, state, cancel.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        cancel.cancel();
        server.run_on(listener).await.unwrap();
    }
}
