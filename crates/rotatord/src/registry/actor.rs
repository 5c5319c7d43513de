//! Registry actor - owns the set of connected clients.
//!
//! The RegistryActor is the single owner of client state. It receives
//! commands via an mpsc channel and processes them one at a time, so a
//! fan-out never races with a registration or a removal.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rotator_core::ClientId;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use super::commands::{write_line, ClientEntry, ClientInfo, RegistryCommand, RegistryError};

/// Upper bound on a single fan-out write to one client.
pub const FANOUT_WRITE_TIMEOUT: Duration = Duration::from_secs(2);

// ============================================================================
// Registry Actor
// ============================================================================

/// The registry actor - owns all client entries.
///
/// # Ordering
///
/// A fan-out awaits every per-client write before the next command is
/// taken off the channel. Each client therefore receives device lines in
/// the order they were read from the serial port, while a slow client only
/// delays a batch by at most [`FANOUT_WRITE_TIMEOUT`].
///
/// # Client count
///
/// The number of entries is mirrored into a shared atomic after every
/// mutation so status snapshots can read it without a round trip.
pub struct RegistryActor {
    receiver: mpsc::Receiver<RegistryCommand>,
    clients: HashMap<ClientId, ClientEntry>,
    client_count: Arc<AtomicUsize>,
}

impl RegistryActor {
    /// Creates a new registry actor.
    pub fn new(receiver: mpsc::Receiver<RegistryCommand>, client_count: Arc<AtomicUsize>) -> Self {
        Self {
            receiver,
            clients: HashMap::new(),
            client_count,
        }
    }

    /// Runs the actor event loop until every handle is dropped.
    ///
    /// Remaining clients are closed on exit.
    pub async fn run(mut self) {
        info!("Registry actor starting");

        while let Some(cmd) = self.receiver.recv().await {
            self.handle_command(cmd).await;
        }

        for (_, entry) in self.clients.drain() {
            entry.closer.cancel();
        }
        self.sync_count();

        info!("Registry actor stopped");
    }

    async fn handle_command(&mut self, cmd: RegistryCommand) {
        match cmd {
            RegistryCommand::Register {
                id,
                entry,
                respond_to,
            } => {
                let result = self.handle_register(id, entry);
                // Ignore send error - caller may have dropped the receiver
                let _ = respond_to.send(result);
            }
            RegistryCommand::Remove { id, respond_to } => {
                let removed = self.handle_remove(id);
                let _ = respond_to.send(removed);
            }
            RegistryCommand::Fanout { message } => {
                self.handle_fanout(message).await;
            }
            RegistryCommand::ListClients { respond_to } => {
                let _ = respond_to.send(self.handle_list());
            }
        }
    }

    // ========================================================================
    // Command Handlers
    // ========================================================================

    fn handle_register(&mut self, id: ClientId, entry: ClientEntry) -> Result<(), RegistryError> {
        if self.clients.contains_key(&id) {
            debug!(client_id = %id, "Client already registered, rejecting");
            return Err(RegistryError::AlreadyRegistered(id));
        }

        let peer = entry.peer;
        self.clients.insert(id, entry);
        self.sync_count();

        info!(
            client_id = %id,
            peer = %peer,
            total_clients = self.clients.len(),
            "Client registered"
        );
        Ok(())
    }

    fn handle_remove(&mut self, id: ClientId) -> bool {
        match self.clients.remove(&id) {
            Some(entry) => {
                entry.closer.cancel();
                self.sync_count();
                info!(
                    client_id = %id,
                    total_clients = self.clients.len(),
                    "Client removed"
                );
                true
            }
            None => false,
        }
    }

    async fn handle_fanout(&mut self, message: String) {
        if self.clients.is_empty() {
            return;
        }

        let line: Arc<str> = Arc::from(message);
        let mut writes = JoinSet::new();
        for (&id, entry) in &self.clients {
            let writer = Arc::clone(&entry.writer);
            let line = Arc::clone(&line);
            writes.spawn(async move {
                let result = write_line(&writer, &line, FANOUT_WRITE_TIMEOUT).await;
                (id, result)
            });
        }

        let mut failed = Vec::new();
        while let Some(joined) = writes.join_next().await {
            match joined {
                Ok((_, Ok(()))) => {}
                Ok((id, Err(e))) => {
                    debug!(client_id = %id, error = %e, "Fan-out write failed");
                    failed.push(id);
                }
                Err(e) => warn!(error = %e, "Fan-out write task failed"),
            }
        }

        for id in failed {
            if let Some(entry) = self.clients.remove(&id) {
                entry.closer.cancel();
                info!(client_id = %id, "Dropped client after failed write");
            }
        }
        self.sync_count();

        debug!(line = %line, recipients = self.clients.len(), "Fanned out device line");
    }

    fn handle_list(&self) -> Vec<ClientInfo> {
        let mut clients: Vec<ClientInfo> = self
            .clients
            .iter()
            .map(|(&id, entry)| ClientInfo {
                id,
                peer: entry.peer,
                connected_at: entry.connected_at,
            })
            .collect();
        clients.sort_by_key(|info| info.id.as_u64());
        clients
    }

    fn sync_count(&self) {
        self.client_count.store(self.clients.len(), Ordering::Release);
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::commands::session_writer;
    use std::net::SocketAddr;
    use tokio::io::{AsyncBufReadExt, BufReader, DuplexStream};
    use tokio::sync::oneshot;
    use tokio_util::sync::CancellationToken;

    fn peer() -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], 40000))
    }

    fn new_actor() -> (RegistryActor, Arc<AtomicUsize>) {
        let (_tx, rx) = mpsc::channel(1);
        let count = Arc::new(AtomicUsize::new(0));
        (RegistryActor::new(rx, Arc::clone(&count)), count)
    }

    fn entry() -> (ClientEntry, DuplexStream, CancellationToken) {
        let (client, server) = tokio::io::duplex(1024);
        let closer = CancellationToken::new();
        (
            ClientEntry::new(session_writer(client), closer.clone(), peer()),
            server,
            closer,
        )
    }

    #[test]
    fn test_register_and_count() {
        let (mut actor, count) = new_actor();
        let (e, _peer, _) = entry();

        assert!(actor.handle_register(ClientId::new(1), e).is_ok());
        assert_eq!(count.load(Ordering::Acquire), 1);
    }

    #[test]
    fn test_duplicate_register_rejected() {
        let (mut actor, count) = new_actor();
        let (first, _p1, _) = entry();
        let (second, _p2, _) = entry();

        actor.handle_register(ClientId::new(1), first).unwrap();
        let result = actor.handle_register(ClientId::new(1), second);

        assert_eq!(result, Err(RegistryError::AlreadyRegistered(ClientId::new(1))));
        assert_eq!(count.load(Ordering::Acquire), 1);
    }

    #[test]
    fn test_remove_cancels_closer() {
        let (mut actor, count) = new_actor();
        let (e, _peer, closer) = entry();
        actor.handle_register(ClientId::new(1), e).unwrap();

        assert!(actor.handle_remove(ClientId::new(1)));
        assert!(closer.is_cancelled());
        assert_eq!(count.load(Ordering::Acquire), 0);

        // Second removal is a no-op
        assert!(!actor.handle_remove(ClientId::new(1)));
    }

    #[tokio::test]
    async fn test_fanout_reaches_every_client() {
        let (mut actor, _) = new_actor();
        let (a, peer_a, _) = entry();
        let (b, peer_b, _) = entry();
        actor.handle_register(ClientId::new(1), a).unwrap();
        actor.handle_register(ClientId::new(2), b).unwrap();

        actor.handle_fanout("POS:90".to_string()).await;
        actor.handle_fanout("ACK:CW".to_string()).await;

        for peer in [peer_a, peer_b] {
            let mut lines = BufReader::new(peer).lines();
            assert_eq!(lines.next_line().await.unwrap().as_deref(), Some("POS:90"));
            assert_eq!(lines.next_line().await.unwrap().as_deref(), Some("ACK:CW"));
        }
    }

    #[tokio::test]
    async fn test_fanout_drops_failed_client_only() {
        let (mut actor, count) = new_actor();
        let (healthy, healthy_peer, healthy_closer) = entry();
        let (broken, broken_peer, broken_closer) = entry();
        actor.handle_register(ClientId::new(1), healthy).unwrap();
        actor.handle_register(ClientId::new(2), broken).unwrap();
        drop(broken_peer);

        actor.handle_fanout("POS:10".to_string()).await;

        assert_eq!(count.load(Ordering::Acquire), 1);
        assert!(broken_closer.is_cancelled());
        assert!(!healthy_closer.is_cancelled());

        let mut lines = BufReader::new(healthy_peer).lines();
        assert_eq!(lines.next_line().await.unwrap().as_deref(), Some("POS:10"));
    }

    #[tokio::test]
    async fn test_fanout_with_no_clients_is_noop() {
        let (mut actor, count) = new_actor();
        actor.handle_fanout("POS:1".to_string()).await;
        assert_eq!(count.load(Ordering::Acquire), 0);
    }

    #[test]
    fn test_list_sorted_by_id() {
        let (mut actor, _) = new_actor();
        for n in [3, 1, 2] {
            let (e, _peer, _) = entry();
            actor.handle_register(ClientId::new(n), e).unwrap();
        }

        let ids: Vec<u64> = actor.handle_list().iter().map(|c| c.id.as_u64()).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_run_closes_clients_when_handles_drop() {
        let (tx, rx) = mpsc::channel(4);
        let count = Arc::new(AtomicUsize::new(0));
        let actor = RegistryActor::new(rx, Arc::clone(&count));
        let task = tokio::spawn(actor.run());

        let (e, _peer, closer) = entry();
        let (respond_to, response) = oneshot::channel();
        tx.send(RegistryCommand::Register {
            id: ClientId::new(1),
            entry: e,
            respond_to,
        })
        .await
        .unwrap();
        response.await.unwrap().unwrap();
        assert_eq!(count.load(Ordering::Acquire), 1);

        drop(tx);
        task.await.unwrap();

        assert!(closer.is_cancelled());
        assert_eq!(count.load(Ordering::Acquire), 0);
    }
}
