//! Rotator bridge engine - serial link, client registry and TCP/UDP servers
//!
//! This crate provides the runtime pieces of the rotator bridge:
//! - `serial` - Serial link to the controller, with automatic reconnection
//! - `registry` - Client registry actor that fans device lines out to clients
//! - `server` - TCP server and per-client sessions (greeting, auth, commands)
//! - `discovery` - UDP broadcast announcements of the TCP port
//! - `heartbeat` - Watchdog `STOP` while no rotation is in progress
//! - `publisher` - Periodic `BridgeState` snapshots for observers
//! - `bridge` - Starts and stops all of the above together
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        rotatord                             │
//! ├─────────────────────────────────────────────────────────────┤
//! │                                                             │
//! │  ┌─────────────────┐  Fanout  ┌─────────────────────────┐   │
//! │  │   SerialLink    │─────────▶│     RegistryActor       │   │
//! │  │ (device owner)  │          │  (client set owner)     │   │
//! │  └────────▲────────┘          └────────────┬────────────┘   │
//! │           │ write()                        │ write_line     │
//! │  ┌────────┴────────┐          ┌────────────▼────────────┐   │
//! │  │ ClientSession / │          │     TCP clients         │   │
//! │  │   Heartbeat     │◀─────────│                         │   │
//! │  └─────────────────┘ commands └─────────────────────────┘   │
//! │                                                             │
//! │  DiscoveryBroadcaster (UDP)      StatePublisher (watch)     │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! All long-running tasks stop on one `CancellationToken`.

pub mod bridge;
pub mod config;
pub mod discovery;
pub mod heartbeat;
pub mod publisher;
pub mod registry;
pub mod serial;
pub mod server;
pub mod status;

pub use bridge::{Bridge, BridgeHandle};
pub use config::{BridgeConfig, ConfigError};
pub use serial::{DeviceOpener, SerialLink, TtyOpener};
pub use status::StatusChannel;
