//! Lines sent by the bridge to clients, and the discovery payload.

use std::fmt;

use crate::error::ProtocolError;
use crate::version::{ProtocolVersion, SERVER_NAME};

/// A reply the bridge writes to a single client.
///
/// Device broadcasts (`POS:`, `ACK:`, `ERROR:`) are not replies; they are
/// forwarded verbatim by the fanout path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerReply {
    /// `ROTATOR_SERVER v<version>`, sent on connect
    Greeting(ProtocolVersion),
    /// Secret accepted
    AuthOk,
    /// Secret missing or wrong
    AuthRequired,
    /// Answer to `PING`
    Pong,
    /// Unrecognized command after authentication
    UnknownCommand,
}

impl ServerReply {
    /// The greeting for the current protocol version.
    pub const fn greeting() -> Self {
        Self::Greeting(ProtocolVersion::CURRENT)
    }

    /// Line content without the trailing newline.
    pub fn line(&self) -> String {
        match self {
            Self::Greeting(version) => version.greeting(),
            Self::AuthOk => "AUTH_OK".to_string(),
            Self::AuthRequired => "AUTH_REQUIRED".to_string(),
            Self::Pong => "PONG".to_string(),
            Self::UnknownCommand => "UNKNOWN_CMD".to_string(),
        }
    }
}

impl fmt::Display for ServerReply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.line())
    }
}

/// UDP discovery announcement: `ROTATOR_SERVER:<tcp_port>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Announcement {
    /// TCP port of the control protocol listener
    pub tcp_port: u16,
}

impl Announcement {
    /// Creates an announcement for the given TCP port.
    pub const fn new(tcp_port: u16) -> Self {
        Self { tcp_port }
    }

    /// Datagram payload (ASCII).
    pub fn encode(&self) -> Vec<u8> {
        self.to_string().into_bytes()
    }

    /// Parses a received datagram.
    pub fn parse(datagram: &[u8]) -> Result<Self, ProtocolError> {
        let text = std::str::from_utf8(datagram)
            .map_err(|e| ProtocolError::InvalidAnnouncement(e.to_string()))?;

        let port = text
            .trim()
            .strip_prefix(SERVER_NAME)
            .and_then(|rest| rest.strip_prefix(':'))
            .ok_or_else(|| ProtocolError::InvalidAnnouncement(text.to_string()))?;

        port.parse::<u16>()
            .map(Self::new)
            .map_err(|e| ProtocolError::InvalidAnnouncement(format!("{text}: {e}")))
    }
}

impl fmt::Display for Announcement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{SERVER_NAME}:{}", self.tcp_port)
    }
}
