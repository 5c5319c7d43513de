//! Rotator Protocol - Line protocols for the rotator bridge
//!
//! This crate provides message types and parsing for the three wire
//! formats the bridge speaks:
//! - the TCP control protocol between network clients and the bridge
//!   (`auth`, `command`, `message`, `version`)
//! - the newline-delimited serial protocol of the rotator controller
//!   (`codec`, `device`)
//! - the UDP discovery announcement (`message::Announcement`)
//!
//! Everything here is pure: no sockets, no tasks, no clocks.

pub mod auth;
pub mod codec;
pub mod command;
pub mod device;
pub mod error;
pub mod message;
pub mod version;

pub use auth::{Admission, AuthGate, AUTH_SEPARATOR};
pub use codec::{DeviceLineCodec, MAX_LINE_LENGTH};
pub use command::Command;
pub use device::DeviceMessage;
pub use error::ProtocolError;
pub use message::{Announcement, ServerReply};
pub use version::{ProtocolVersion, SERVER_NAME};
