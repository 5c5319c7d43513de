//! Classification of lines received from the rotator controller.

/// Prefix of position reports.
pub const POSITION_PREFIX: &str = "POS:";

/// Prefix of command acknowledgements.
pub const ACK_PREFIX: &str = "ACK:";

/// Prefix of device-side error reports.
pub const ERROR_PREFIX: &str = "ERROR:";

/// Sent once by the controller after it boots.
pub const READY_LINE: &str = "READY";

/// A classified device line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceMessage {
    /// `POS:<int>` - current heading in degrees
    Position(i32),
    /// `ACK:...` - kept verbatim
    Ack(String),
    /// `ERROR:...` - kept verbatim
    Error(String),
    /// `READY`
    Ready,
    /// Anything else, including `POS:` lines without an integer
    Other,
}

impl DeviceMessage {
    /// Classifies one framed line (trailing whitespace already removed).
    pub fn classify(line: &str) -> Self {
        if let Some(value) = line.strip_prefix(POSITION_PREFIX) {
            return value
                .trim()
                .parse::<i32>()
                .map(Self::Position)
                .unwrap_or(Self::Other);
        }
        if line.starts_with(ACK_PREFIX) {
            return Self::Ack(line.to_string());
        }
        if line.starts_with(ERROR_PREFIX) {
            return Self::Error(line.to_string());
        }
        if line == READY_LINE {
            return Self::Ready;
        }
        Self::Other
    }

    /// Line to broadcast to every client, if this message is broadcast.
    pub fn fanout_line(&self) -> Option<String> {
        match self {
            Self::Position(heading) => Some(format!("{POSITION_PREFIX}{heading}")),
            Self::Ack(line) | Self::Error(line) => Some(line.clone()),
            Self::Ready | Self::Other => None,
        }
    }
}
