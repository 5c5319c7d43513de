//! UDP discovery announcements.
//!
//! Clients on the local network find the bridge by listening for
//! `ROTATOR_SERVER:<tcp_port>` datagrams, broadcast at a fixed interval.
//! Announcing is best effort: a failed send is logged and retried on the
//! next tick, and the broadcaster never affects the TCP server or the
//! serial link.

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use rotator_protocol::Announcement;
use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

use crate::status::StatusChannel;

/// Errors from setting up the discovery socket.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("Failed to bind discovery socket on {addr}: {source}")]
    BindFailed {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to enable broadcast: {0}")]
    Broadcast(#[source] std::io::Error),
}

/// Periodically broadcasts the bridge's TCP port.
pub struct DiscoveryBroadcaster {
    announcement: Announcement,
    target: SocketAddr,
    period: Duration,
    status: StatusChannel,
}

impl DiscoveryBroadcaster {
    /// Creates a broadcaster announcing `tcp_port` to `target` every `period`.
    pub fn new(tcp_port: u16, target: SocketAddr, period: Duration, status: StatusChannel) -> Self {
        Self {
            announcement: Announcement::new(tcp_port),
            target,
            period,
            status,
        }
    }

    /// Opens an ephemeral broadcast-enabled socket.
    async fn open_socket() -> Result<UdpSocket, DiscoveryError> {
        let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0));
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|source| DiscoveryError::BindFailed { addr, source })?;
        socket.set_broadcast(true).map_err(DiscoveryError::Broadcast)?;
        Ok(socket)
    }

    /// Announces until `cancel` fires. The first announcement is immediate.
    ///
    /// # Errors
    ///
    /// Returns an error only if the socket cannot be set up; that failure
    /// is also reported on the status channel.
    pub async fn run(self, cancel: CancellationToken) -> Result<(), DiscoveryError> {
        let socket = match Self::open_socket().await {
            Ok(socket) => socket,
            Err(e) => {
                self.status.report_error(format!("UDP error: {e}"));
                return Err(e);
            }
        };

        info!(
            target = %self.target,
            announcement = %self.announcement,
            "Discovery broadcaster started"
        );

        let payload = self.announcement.encode();
        let mut ticker = interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    match socket.send_to(&payload, self.target).await {
                        Ok(_) => trace!(target = %self.target, "Sent discovery announcement"),
                        Err(e) => debug!(error = %e, "Discovery announcement failed"),
                    }
                }
            }
        }

        info!("Discovery broadcaster stopped");
        Ok(())
    }
}

/// Spawns the broadcaster. Setup failures end the task after being reported.
pub fn spawn_discovery(
    broadcaster: DiscoveryBroadcaster,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        if let Err(e) = broadcaster.run(cancel).await {
            debug!(error = %e, "Discovery disabled");
        }
    })
}
