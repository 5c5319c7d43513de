//! Protocol version and the server greeting.

use std::fmt;

/// Name the bridge uses in its greeting and discovery announcements.
pub const SERVER_NAME: &str = "ROTATOR_SERVER";

/// Version of the TCP control protocol, announced in the greeting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtocolVersion {
    pub major: u16,
    pub minor: u16,
}

impl ProtocolVersion {
    pub const CURRENT: ProtocolVersion = ProtocolVersion { major: 1, minor: 0 };

    /// Greeting line sent on every new connection, without the newline.
    pub fn greeting(&self) -> String {
        format!("{SERVER_NAME} v{self}")
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}
