//! Periodic state snapshots for observers.
//!
//! Every period the publisher samples the serial link, the client registry
//! and the status channel into one [`BridgeState`] and publishes it on a
//! `watch` channel. Observers always see a complete snapshot, never a
//! half-updated one, and a slow observer only ever misses intermediate
//! snapshots.

use std::net::{IpAddr, SocketAddr, UdpSocket};
use std::time::Duration;

use chrono::Utc;
use rotator_core::{BridgeState, UNKNOWN_LOCAL_ADDRESS};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::registry::RegistryHandle;
use crate::serial::SerialLink;
use crate::status::StatusChannel;

/// Public address used only to select the outbound interface; nothing is sent.
const ROUTE_TARGET_ADDR: SocketAddr =
    SocketAddr::new(IpAddr::V4(std::net::Ipv4Addr::new(8, 8, 8, 8)), 10002);

/// Samples the bridge into snapshots.
#[derive(Clone)]
pub struct StatePublisher {
    link: SerialLink,
    registry: RegistryHandle,
    status: StatusChannel,
}

impl StatePublisher {
    pub fn new(link: SerialLink, registry: RegistryHandle, status: StatusChannel) -> Self {
        Self {
            link,
            registry,
            status,
        }
    }

    /// Builds a snapshot of the current state.
    ///
    /// Returns `None` if the status channel is unreadable; the caller keeps
    /// the previous snapshot in that case.
    pub fn snapshot(&self) -> Option<BridgeState> {
        let last_message = self.status.last_message()?;
        let link_state = self.link.state();

        Some(BridgeState {
            heading: self.link.heading(),
            is_rotating: self.link.is_rotating(),
            is_link_connected: link_state.is_connected(),
            link_state,
            client_count: self.registry.client_count(),
            local_address: local_address(),
            last_message,
            sampled_at: Utc::now(),
        })
    }

    /// Spawns the publishing task.
    ///
    /// The returned receiver starts at [`BridgeState::initial`]. When
    /// `cancel` fires a final stopped snapshot is published.
    pub fn spawn(
        self,
        period: Duration,
        cancel: CancellationToken,
    ) -> (watch::Receiver<BridgeState>, JoinHandle<()>) {
        let (sender, receiver) = watch::channel(BridgeState::initial());

        let task = tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    biased;

                    _ = cancel.cancelled() => break,

                    _ = ticker.tick() => {
                        match self.snapshot() {
                            Some(state) => {
                                trace!(state = %state, "Publishing state");
                                sender.send_replace(state);
                            }
                            None => debug!("Skipping state sample: status unavailable"),
                        }
                    }
                }
            }

            let last = sender.borrow().clone();
            sender.send_replace(last.stopped());
            debug!("State publisher stopped");
        });

        (receiver, task)
    }
}

/// Address of the interface used for outbound traffic.
///
/// Connecting a UDP socket only selects a route, no packet is sent. Falls
/// back to `0.0.0.0` when there is no route.
pub fn local_address() -> String {
    route_local_ip()
        .filter(|ip| !ip.is_unspecified())
        .map(|ip| ip.to_string())
        .unwrap_or_else(|| UNKNOWN_LOCAL_ADDRESS.to_string())
}

fn route_local_ip() -> Option<IpAddr> {
    let socket = UdpSocket::bind("0.0.0.0:0").ok()?;
    socket.connect(ROUTE_TARGET_ADDR).ok()?;
    socket.local_addr().ok().map(|addr| addr.ip())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::spawn_registry;
    use crate::serial::LinkTiming;
    use rotator_core::LinkState;

    fn publisher(status: StatusChannel) -> (StatePublisher, SerialLink) {
        let link = SerialLink::new(status.clone(), LinkTiming::default());
        (
            StatePublisher::new(link.clone(), spawn_registry(), status),
            link,
        )
    }

    #[test]
    fn test_local_address_is_an_ip() {
        let addr = local_address();
        assert!(addr.parse::<IpAddr>().is_ok(), "not an address: {addr}");
    }

    #[tokio::test]
    async fn test_snapshot_reflects_link_and_status() {
        let status = StatusChannel::new();
        let (publisher, link) = publisher(status.clone());
        link.set_rotating(true);
        status.report("USB error: no device");

        let state = publisher.snapshot().unwrap();
        assert!(state.is_rotating);
        assert!(!state.is_link_connected);
        assert_eq!(state.link_state, LinkState::Disconnected);
        assert_eq!(state.client_count, 0);
        assert_eq!(state.heading, 0);
        assert_eq!(state.last_message, "USB error: no device");
    }

    #[tokio::test]
    async fn test_publishes_and_stops() {
        let status = StatusChannel::new();
        let (publisher, link) = publisher(status.clone());
        link.set_rotating(true);
        status.report("Connected to device");

        let cancel = CancellationToken::new();
        let (mut rx, task) = publisher.spawn(Duration::from_millis(10), cancel.clone());

        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().last_message, "Connected to device");
        assert!(rx.borrow().is_rotating);

        cancel.cancel();
        task.await.unwrap();

        let last = rx.borrow().clone();
        assert!(!last.is_rotating);
        assert!(!last.is_link_connected);
        assert_eq!(last.last_message, "Connected to device");
    }
}
