//! Bridge wiring: starts every subsystem and shuts them down together.
//!
//! A failing subsystem never takes the others down. The serial link keeps
//! retrying, a TCP bind failure disables only the TCP server, and a UDP
//! failure disables only discovery. All of them stop on the same
//! cancellation token.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use rotator_core::BridgeState;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{BridgeConfig, ConfigError};
use crate::discovery::{spawn_discovery, DiscoveryBroadcaster};
use crate::heartbeat::spawn_heartbeat;
use crate::publisher::StatePublisher;
use crate::registry::{spawn_registry, ClientInfo, RegistryHandle};
use crate::serial::{spawn_serial_link, DeviceOpener, LinkTiming, SerialLink};
use crate::server::BridgeServer;
use crate::status::StatusChannel;

/// How long shutdown waits for each task before aborting it.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Entry point for starting a bridge.
pub struct Bridge;

impl Bridge {
    /// Starts all subsystems with the given device opener.
    ///
    /// Runtime setup errors are reported on the status channel and leave
    /// the affected subsystem disabled.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if `config` fails validation; nothing is started.
    pub async fn start(
        config: &BridgeConfig,
        opener: Arc<dyn DeviceOpener>,
    ) -> Result<BridgeHandle, ConfigError> {
        Self::start_with_token(config, opener, CancellationToken::new()).await
    }

    /// Like [`start`](Self::start), stopping when `cancel` fires.
    pub async fn start_with_token(
        config: &BridgeConfig,
        opener: Arc<dyn DeviceOpener>,
        cancel: CancellationToken,
    ) -> Result<BridgeHandle, ConfigError> {
        config.validate()?;

        let status = StatusChannel::new();
        let registry = spawn_registry();
        let link = SerialLink::new(status.clone(), LinkTiming::from(config));
        let mut tasks: Vec<(&'static str, JoinHandle<()>)> = Vec::new();

        tasks.push((
            "serial",
            spawn_serial_link(link.clone(), opener, registry.clone(), cancel.clone()),
        ));

        let tcp_addr = match BridgeServer::bind(
            config.listen_addr(),
            registry.clone(),
            link.clone(),
            &config.secret,
            status.clone(),
            cancel.clone(),
        )
        .await
        {
            Ok(server) => {
                let addr = server.local_addr();
                tasks.push(("server", tokio::spawn(server.run())));
                Some(addr)
            }
            Err(e) => {
                status.report_error(format!("TCP error: {e}"));
                None
            }
        };

        // Announce the bound port; fall back to the configured one so a TCP
        // failure stays confined to the TCP server.
        let announced_port = tcp_addr.map_or(config.tcp_port, |addr| addr.port());
        let broadcaster = DiscoveryBroadcaster::new(
            announced_port,
            config.discovery_target(),
            config.discovery_interval(),
            status.clone(),
        );
        tasks.push(("discovery", spawn_discovery(broadcaster, cancel.clone())));

        tasks.push((
            "heartbeat",
            spawn_heartbeat(link.clone(), config.heartbeat_interval(), cancel.clone()),
        ));

        let publisher = StatePublisher::new(link.clone(), registry.clone(), status.clone());
        let (state, publisher_task) = publisher.spawn(config.publish_interval(), cancel.clone());
        tasks.push(("publisher", publisher_task));

        info!(
            device = %config.device_path,
            tcp = ?tcp_addr,
            discovery = %config.discovery_target(),
            "Bridge started"
        );

        Ok(BridgeHandle {
            cancel,
            state,
            link,
            registry,
            status,
            tcp_addr,
            tasks,
        })
    }
}

/// Handle to a running bridge.
pub struct BridgeHandle {
    cancel: CancellationToken,
    state: watch::Receiver<BridgeState>,
    link: SerialLink,
    registry: RegistryHandle,
    status: StatusChannel,
    tcp_addr: Option<SocketAddr>,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
}

impl BridgeHandle {
    /// Address of the TCP listener, if it could be bound.
    pub fn tcp_addr(&self) -> Option<SocketAddr> {
        self.tcp_addr
    }

    /// New subscription to published snapshots.
    pub fn subscribe_state(&self) -> watch::Receiver<BridgeState> {
        self.state.clone()
    }

    /// Most recently published snapshot.
    pub fn current_state(&self) -> BridgeState {
        self.state.borrow().clone()
    }

    pub fn link(&self) -> &SerialLink {
        &self.link
    }

    pub fn registry(&self) -> &RegistryHandle {
        &self.registry
    }

    pub fn status(&self) -> &StatusChannel {
        &self.status
    }

    /// Currently connected clients, sorted by id.
    pub async fn clients(&self) -> Vec<ClientInfo> {
        self.registry.list_clients().await
    }

    /// Token that stops the bridge when cancelled.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Stops every subsystem and waits for them to finish.
    ///
    /// Tasks that do not finish within the shutdown timeout are aborted.
    pub async fn shutdown(self) {
        let clients = self.clients().await;
        info!(clients = clients.len(), "Bridge shutting down");
        for client in &clients {
            debug!(
                client_id = %client.id,
                peer = %client.peer,
                connected_at = %client.connected_at,
                "Closing client"
            );
        }
        self.cancel.cancel();

        for (name, mut task) in self.tasks {
            match tokio::time::timeout(SHUTDOWN_TIMEOUT, &mut task).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(task = name, error = %e, "Task failed during shutdown"),
                Err(_) => {
                    warn!(task = name, "Task did not stop in time, aborting");
                    task.abort();
                }
            }
        }

        info!("Bridge stopped");
    }
}
