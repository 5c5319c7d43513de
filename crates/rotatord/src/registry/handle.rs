//! Client interface for interacting with the RegistryActor.
//!
//! The `RegistryHandle` provides a cheap-to-clone interface for sending
//! commands to the registry actor.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use rotator_core::ClientId;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use super::commands::{ClientEntry, ClientInfo, RegistryCommand, RegistryError};

// ============================================================================
// Registry Handle
// ============================================================================

/// Handle for interacting with the registry actor.
///
/// This is a cheap-to-clone handle that can be shared across tasks.
///
/// # Usage
///
/// ```ignore
/// let handle = registry_handle.clone();
///
/// handle.register(id, entry).await?;
/// handle.fanout("POS:90".to_string()).await;
/// let count = handle.client_count();
/// ```
#[derive(Clone)]
pub struct RegistryHandle {
    /// Command sender to the actor
    sender: mpsc::Sender<RegistryCommand>,

    /// Entry count mirrored by the actor
    client_count: Arc<AtomicUsize>,
}

impl RegistryHandle {
    /// Create a new registry handle.
    pub fn new(sender: mpsc::Sender<RegistryCommand>, client_count: Arc<AtomicUsize>) -> Self {
        Self {
            sender,
            client_count,
        }
    }

    /// Register a client.
    ///
    /// # Errors
    ///
    /// - `RegistryError::AlreadyRegistered` if the id is taken
    /// - `RegistryError::ChannelClosed` if the actor has shut down
    pub async fn register(&self, id: ClientId, entry: ClientEntry) -> Result<(), RegistryError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(RegistryCommand::Register {
                id,
                entry,
                respond_to: tx,
            })
            .await
            .map_err(|_| RegistryError::ChannelClosed)?;
        rx.await.map_err(|_| RegistryError::ChannelClosed)?
    }

    /// Remove a client. Returns `true` if it was registered.
    ///
    /// Removing an unknown or already removed client is a no-op.
    pub async fn remove(&self, id: ClientId) -> bool {
        let (tx, rx) = oneshot::channel();
        if self
            .sender
            .send(RegistryCommand::Remove { id, respond_to: tx })
            .await
            .is_err()
        {
            return false;
        }
        rx.await.unwrap_or(false)
    }

    /// Queue a line for delivery to every client.
    ///
    /// Waits only for channel capacity, not for the writes themselves.
    pub async fn fanout(&self, message: String) {
        if self
            .sender
            .send(RegistryCommand::Fanout { message })
            .await
            .is_err()
        {
            debug!("Fan-out dropped: registry channel closed");
        }
    }

    /// List registered clients, sorted by id.
    ///
    /// Returns an empty list if the actor has shut down.
    pub async fn list_clients(&self) -> Vec<ClientInfo> {
        let (tx, rx) = oneshot::channel();
        if self
            .sender
            .send(RegistryCommand::ListClients { respond_to: tx })
            .await
            .is_err()
        {
            return Vec::new();
        }
        rx.await.unwrap_or_default()
    }

    /// Number of registered clients, as of the last registry mutation.
    pub fn client_count(&self) -> usize {
        self.client_count.load(Ordering::Acquire)
    }
}

// ============================================================================
// Tests
// ============================================================================
