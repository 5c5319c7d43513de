//! Serial link connection state.

use crate::error::{DomainError, DomainResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Connection state of the serial link to the rotator controller.
///
/// The link moves `Disconnected -> Connecting -> Connected` on a successful
/// open and falls back to `Disconnected` on any open or I/O failure, after
/// which the reconnect loop enters `Connecting` again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

impl LinkState {
    /// Returns true when the device is open and the read loop is running.
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Compact encoding used for lock-free storage in an atomic.
    pub const fn as_u8(&self) -> u8 {
        match self {
            Self::Disconnected => 0,
            Self::Connecting => 1,
            Self::Connected => 2,
        }
    }

    /// Decodes the value produced by [`LinkState::as_u8`].
    pub fn from_u8(value: u8) -> DomainResult<Self> {
        match value {
            0 => Ok(Self::Disconnected),
            1 => Ok(Self::Connecting),
            2 => Ok(Self::Connected),
            other => Err(DomainError::InvalidFieldValue {
                field: "link_state".to_string(),
                value: other.to_string(),
                expected: "0, 1 or 2".to_string(),
            }),
        }
    }
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
        };
        f.write_str(label)
    }
}
