//! Registry actor commands, errors, and the per-client write path.
//!
//! This module defines the message types for communicating with the `RegistryActor`:
//! - `RegistryCommand`: Commands sent to the actor
//! - `RegistryError`: Errors that can occur during registry operations
//! - `ClientEntry` / `ClientInfo`: What the registry stores and reports per client
//!
//! It also owns [`write_line`], the single way a line reaches a client socket.
//! Both the fan-out and a session's own replies go through the same
//! `SessionWriter` mutex, so lines from different writers never interleave.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rotator_core::ClientId;
use thiserror::Error;
use tokio::io::{AsyncWrite, AsyncWriteExt, BufWriter};
use tokio::sync::{oneshot, Mutex};
use tokio_util::sync::CancellationToken;

// ============================================================================
// Client Write Path
// ============================================================================

/// Boxed write half of a client connection.
pub type ClientWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Shared, serialized writer for one client.
pub type SessionWriter = Arc<Mutex<BufWriter<ClientWriter>>>;

/// Wraps a raw write half into a [`SessionWriter`].
pub fn session_writer<W>(writer: W) -> SessionWriter
where
    W: AsyncWrite + Send + Unpin + 'static,
{
    Arc::new(Mutex::new(BufWriter::new(Box::new(writer))))
}

/// Errors from writing a line to a client.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SendError {
    #[error("Write failed: {0}")]
    Io(String),

    #[error("Write timed out after {0:?}")]
    Timeout(Duration),
}

/// Writes `line` plus a newline terminator and flushes, within `limit`.
///
/// The writer lock is held for the whole line, including the flush.
pub async fn write_line(
    writer: &SessionWriter,
    line: &str,
    limit: Duration,
) -> Result<(), SendError> {
    let write = async {
        let mut writer = writer.lock().await;
        writer.write_all(line.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await
    };

    match tokio::time::timeout(limit, write).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(SendError::Io(e.to_string())),
        Err(_) => Err(SendError::Timeout(limit)),
    }
}

// ============================================================================
// Registry Commands
// ============================================================================

/// What the registry keeps for each connected client.
pub struct ClientEntry {
    /// Writer shared with the client's session
    pub writer: SessionWriter,

    /// Cancelling this token makes the session close itself
    pub closer: CancellationToken,

    /// Remote address
    pub peer: SocketAddr,

    /// When the client was registered
    pub connected_at: DateTime<Utc>,
}

impl ClientEntry {
    /// Creates an entry stamped with the current time.
    pub fn new(writer: SessionWriter, closer: CancellationToken, peer: SocketAddr) -> Self {
        Self {
            writer,
            closer,
            peer,
            connected_at: Utc::now(),
        }
    }
}

impl std::fmt::Debug for ClientEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientEntry")
            .field("peer", &self.peer)
            .field("connected_at", &self.connected_at)
            .field("closed", &self.closer.is_cancelled())
            .finish_non_exhaustive()
    }
}

/// Read-only view of a registered client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientInfo {
    pub id: ClientId,
    pub peer: SocketAddr,
    pub connected_at: DateTime<Utc>,
}

/// Commands sent to the registry actor.
///
/// Request/response commands carry a oneshot sender; `Fanout` is
/// fire-and-forget so the serial reader never waits on a reply.
#[derive(Debug)]
pub enum RegistryCommand {
    /// Add a client.
    ///
    /// # Errors
    /// - `RegistryError::AlreadyRegistered` if the id is taken
    Register {
        id: ClientId,
        entry: ClientEntry,
        respond_to: oneshot::Sender<Result<(), RegistryError>>,
    },

    /// Remove a client and cancel its closer. Responds `true` if it was present.
    Remove {
        id: ClientId,
        respond_to: oneshot::Sender<bool>,
    },

    /// Send one line to every registered client.
    ///
    /// Clients whose write fails are removed and closed.
    Fanout { message: String },

    /// Snapshot of all registered clients.
    ListClients {
        respond_to: oneshot::Sender<Vec<ClientInfo>>,
    },
}

// ============================================================================
// Registry Errors
// ============================================================================

/// Errors that can occur during registry operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Client already registered: {0}")]
    AlreadyRegistered(ClientId),

    #[error("Registry channel closed")]
    ChannelClosed,
}
