//! Client registry using the Actor pattern.
//!
//! The registry is the single owner of the set of connected TCP clients.
//! Sessions register themselves on connect and remove themselves on close;
//! the serial link pushes every device line through it for fan-out.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐  Register/Remove  ┌─────────────────┐
//! │  ClientSession  │──────────────────▶│  RegistryActor  │
//! └─────────────────┘                   │                 │  write_line
//! ┌─────────────────┐  Fanout           │ HashMap<Client  │────────────▶ every
//! │   SerialLink    │──────────────────▶│ Id, ClientEntry>│              client
//! └─────────────────┘  (mpsc channel)   └─────────────────┘
//! ```

use std::sync::atomic::AtomicUsize;
use std::sync::Arc;

use tokio::sync::mpsc;

mod actor;
mod commands;
mod handle;

pub use actor::{RegistryActor, FANOUT_WRITE_TIMEOUT};
pub use commands::{
    session_writer, write_line, ClientEntry, ClientInfo, ClientWriter, RegistryCommand,
    RegistryError, SendError, SessionWriter,
};
pub use handle::RegistryHandle;

/// Command channel capacity
const COMMAND_BUFFER: usize = 100;

/// Spawn the registry actor and return a handle for interaction.
///
/// The actor stops once every handle has been dropped.
///
/// # Example
///
/// ```no_run
/// use rotatord::registry::spawn_registry;
///
/// #[tokio::main]
/// async fn main() {
///     let handle = spawn_registry();
///     assert_eq!(handle.client_count(), 0);
/// }
/// ```
pub fn spawn_registry() -> RegistryHandle {
    let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_BUFFER);
    let client_count = Arc::new(AtomicUsize::new(0));

    let actor = RegistryActor::new(cmd_rx, Arc::clone(&client_count));
    tokio::spawn(actor.run());

    RegistryHandle::new(cmd_tx, client_count)
}
