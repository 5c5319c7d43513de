//! Aggregate bridge state published to observers.

use crate::LinkState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Local address reported when the host address cannot be determined.
pub const UNKNOWN_LOCAL_ADDRESS: &str = "0.0.0.0";

/// Immutable snapshot of the bridge, sampled on a timer.
///
/// Observers (a status display, the `--print-state` stream) only ever see
/// whole snapshots; the fields reflect the serial link and client registry
/// as of `sampled_at`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeState {
    /// Last heading reported by the device, in degrees
    pub heading: i32,

    /// Whether a client has commanded a rotation that was not yet stopped
    pub is_rotating: bool,

    /// Whether the serial link is connected
    pub is_link_connected: bool,

    /// Detailed link state
    pub link_state: LinkState,

    /// Number of live TCP sessions
    pub client_count: usize,

    /// Address of this host on the local network
    pub local_address: String,

    /// Most recent status report
    pub last_message: String,

    /// When this snapshot was taken
    pub sampled_at: DateTime<Utc>,
}

impl BridgeState {
    /// State before the first sample: nothing connected, heading unknown (0).
    pub fn initial() -> Self {
        Self {
            heading: 0,
            is_rotating: false,
            is_link_connected: false,
            link_state: LinkState::Disconnected,
            client_count: 0,
            local_address: UNKNOWN_LOCAL_ADDRESS.to_string(),
            last_message: String::new(),
            sampled_at: Utc::now(),
        }
    }

    /// Returns a copy describing a stopped bridge.
    ///
    /// Heading, address and last message are kept; everything live is cleared.
    #[must_use]
    pub fn stopped(&self) -> Self {
        Self {
            is_rotating: false,
            is_link_connected: false,
            link_state: LinkState::Disconnected,
            client_count: 0,
            sampled_at: Utc::now(),
            ..self.clone()
        }
    }
}

impl Default for BridgeState {
    fn default() -> Self {
        Self::initial()
    }
}

impl fmt::Display for BridgeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "heading={}° rotating={} link={} clients={} addr={}",
            self.heading, self.is_rotating, self.link_state, self.client_count, self.local_address
        )
    }
}
