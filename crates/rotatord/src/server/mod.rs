//! TCP server for rotator clients.
//!
//! The server:
//! - Listens on a TCP port for client connections
//! - Assigns each connection a `ClientId` and registers it with the registry
//! - Spawns a `ClientSession` per client
//! - Stops accepting when the cancellation token fires
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │  BridgeServer   │
//! │                 │
//! │  TcpListener    │
//! └───────┬─────────┘
//!         │ accept()
//!         ▼
//! ┌─────────────────┐     ┌─────────────────┐
//! │  ClientSession  │────▶│  RegistryHandle │  (register / remove)
//! │   (per client)  │     └─────────────────┘
//! └───────┬─────────┘
//!         │ write()
//!         ▼
//! ┌─────────────────┐
//! │   SerialLink    │
//! └─────────────────┘
//! ```

mod session;

pub use session::{ClientSession, SessionCloser, SessionError};

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rotator_core::ClientId;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::registry::RegistryHandle;
use crate::serial::SerialLink;
use crate::status::StatusChannel;

/// Pause after a failed accept, so a persistent error does not spin.
const ACCEPT_ERROR_DELAY: Duration = Duration::from_millis(100);

/// TCP server for rotator clients.
pub struct BridgeServer {
    listener: TcpListener,
    local_addr: SocketAddr,
    registry: RegistryHandle,
    link: SerialLink,
    secret: Arc<str>,
    status: StatusChannel,
    cancel_token: CancellationToken,
    connection_counter: AtomicU64,
}

impl BridgeServer {
    /// Binds the listening socket.
    ///
    /// Binding is separate from [`run`](Self::run) so callers learn the
    /// actual port (when binding port 0) before any client connects.
    pub async fn bind(
        addr: SocketAddr,
        registry: RegistryHandle,
        link: SerialLink,
        secret: &str,
        status: StatusChannel,
        cancel_token: CancellationToken,
    ) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::Bind {
                addr,
                error: e.to_string(),
            })?;
        let local_addr = listener.local_addr().map_err(|e| ServerError::Bind {
            addr,
            error: e.to_string(),
        })?;

        Ok(Self {
            listener,
            local_addr,
            registry,
            link,
            secret: Arc::from(secret),
            status,
            cancel_token,
            connection_counter: AtomicU64::new(0),
        })
    }

    /// Address the server is listening on.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accepts connections until the cancellation token is triggered.
    pub async fn run(self) {
        info!(addr = %self.local_addr, "Bridge server listening");
        self.status
            .report(format!("TCP server listening on :{}", self.local_addr.port()));

        loop {
            tokio::select! {
                biased;

                _ = self.cancel_token.cancelled() => {
                    info!("Server shutdown requested");
                    break;
                }

                result = self.listener.accept() => {
                    match result {
                        Ok((stream, peer)) => {
                            let conn_num = self.connection_counter.fetch_add(1, Ordering::Relaxed);
                            self.handle_connection(stream, peer, conn_num);
                        }
                        Err(e) => {
                            error!(error = %e, "Failed to accept connection");
                            self.status.report_error(format!("Accept error: {e}"));
                            tokio::select! {
                                _ = self.cancel_token.cancelled() => break,
                                _ = tokio::time::sleep(ACCEPT_ERROR_DELAY) => {}
                            }
                        }
                    }
                }
            }
        }

        info!("Server stopped");
    }

    /// Registers the client and spawns its session.
    fn handle_connection(&self, stream: TcpStream, peer: SocketAddr, connection_number: u64) {
        let id = ClientId::new(connection_number);
        if let Err(e) = stream.set_nodelay(true) {
            debug!(client_id = %id, error = %e, "Failed to set TCP_NODELAY");
        }

        let (reader, writer) = stream.into_split();
        let closer = SessionCloser::new(id, self.registry.clone(), &self.cancel_token);
        let session = ClientSession::new(id, reader, writer, &self.secret, self.link.clone(), closer);
        let registry = self.registry.clone();

        tokio::spawn(async move {
            if let Err(e) = registry.register(id, session.registry_entry(peer)).await {
                warn!(client_id = %id, error = %e, "Failed to register client");
                return;
            }
            info!(client_id = %id, peer = %peer, "Client connected");
            session.run().await;
        });
    }
}

/// Errors that can occur in server operations.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Failed to bind {addr}: {error}")]
    Bind { addr: SocketAddr, error: String },
}
