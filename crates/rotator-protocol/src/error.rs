//! Protocol error types.

use thiserror::Error;

/// Errors raised while framing or parsing protocol lines.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// Underlying stream failed while decoding
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A device line exceeded the framing limit and was discarded
    #[error("Line too long (max: {max} bytes)")]
    LineTooLong { max: usize },

    /// A discovery datagram did not match `ROTATOR_SERVER:<port>`
    #[error("Invalid announcement: {0}")]
    InvalidAnnouncement(String),
}
