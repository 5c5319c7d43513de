//! Rotator Core - Shared types for the rotator bridge
//!
//! This crate provides the domain types shared between the bridge
//! engine (rotatord), the wire protocol and the binary.
//!
//! All code follows the panic-free policy: no `.unwrap()`, `.expect()`,
//! `panic!()`, `unreachable!()`, `todo!()`, or direct indexing `[i]`.

pub mod client;
pub mod error;
pub mod link;
pub mod state;

// Re-exports for convenience
pub use client::ClientId;
pub use error::{DomainError, DomainResult};
pub use link::LinkState;
pub use state::{BridgeState, UNKNOWN_LOCAL_ADDRESS};
