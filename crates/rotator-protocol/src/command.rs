//! Client commands accepted after authentication.

use std::fmt;

/// A directive sent by an authenticated client.
///
/// Matching is case-insensitive; surrounding whitespace is ignored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Rotate clockwise
    Cw,
    /// Rotate counter-clockwise
    Ccw,
    /// Stop rotating
    Stop,
    /// Ask the device to report its position
    Status,
    /// Liveness check answered by the bridge itself
    Ping,
    /// Anything else, kept verbatim (trimmed) for logging
    Unknown(String),
}

impl Command {
    /// Parses one protocol line.
    pub fn parse(line: &str) -> Self {
        let line = line.trim();
        match line.to_ascii_uppercase().as_str() {
            "CW" => Self::Cw,
            "CCW" => Self::Ccw,
            "STOP" => Self::Stop,
            "STATUS" => Self::Status,
            "PING" => Self::Ping,
            _ => Self::Unknown(line.to_string()),
        }
    }

    /// Line to forward to the serial device, if this command drives it.
    pub fn device_line(&self) -> Option<&'static str> {
        match self {
            Self::Cw => Some("CW"),
            Self::Ccw => Some("CCW"),
            Self::Stop => Some("STOP"),
            Self::Status => Some("STATUS"),
            Self::Ping | Self::Unknown(_) => None,
        }
    }

    /// New value of the shared motion flag, if this command changes it.
    pub fn sets_rotating(&self) -> Option<bool> {
        match self {
            Self::Cw | Self::Ccw => Some(true),
            Self::Stop => Some(false),
            _ => None,
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cw => f.write_str("CW"),
            Self::Ccw => f.write_str("CCW"),
            Self::Stop => f.write_str("STOP"),
            Self::Status => f.write_str("STATUS"),
            Self::Ping => f.write_str("PING"),
            Self::Unknown(raw) => write!(f, "unknown({raw})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_is_case_insensitive() {
        assert_eq!(Command::parse("cw"), Command::Cw);
        assert_eq!(Command::parse("Ccw"), Command::Ccw);
        assert_eq!(Command::parse("  stop \r"), Command::Stop);
        assert_eq!(Command::parse("status"), Command::Status);
        assert_eq!(Command::parse("PING"), Command::Ping);
    }

    #[test]
    fn test_parse_unknown() {
        assert_eq!(
            Command::parse(" rotate 90 "),
            Command::Unknown("rotate 90".to_string())
        );
        assert_eq!(Command::parse(""), Command::Unknown(String::new()));
    }

    #[test]
    fn test_device_lines() {
        assert_eq!(Command::Cw.device_line(), Some("CW"));
        assert_eq!(Command::Status.device_line(), Some("STATUS"));
        assert_eq!(Command::Ping.device_line(), None);
        assert_eq!(Command::Unknown("X".into()).device_line(), None);
    }

    #[test]
    fn test_motion_flag() {
        assert_eq!(Command::Cw.sets_rotating(), Some(true));
        assert_eq!(Command::Ccw.sets_rotating(), Some(true));
        assert_eq!(Command::Stop.sets_rotating(), Some(false));
        assert_eq!(Command::Status.sets_rotating(), None);
    }
}
