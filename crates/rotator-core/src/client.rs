//! Client identity for TCP sessions.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Prefix used when rendering client IDs.
const CLIENT_ID_PREFIX: &str = "client-";

/// Identifier of one accepted TCP connection.
///
/// Assigned from a monotonically increasing connection counter, so IDs are
/// unique for the lifetime of a bridge run but not across restarts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(u64);

impl ClientId {
    /// Creates a client ID from a connection number.
    pub const fn new(connection_number: u64) -> Self {
        Self(connection_number)
    }

    /// Returns the underlying connection number.
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{CLIENT_ID_PREFIX}{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_id_display() {
        assert_eq!(ClientId::new(7).to_string(), "client-7");
    }

    #[test]
    fn test_client_id_ordering() {
        assert!(ClientId::new(1) < ClientId::new(2));
    }
}
