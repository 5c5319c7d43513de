//! Status channel: human-readable reports for observers.
//!
//! Subsystems report noteworthy events (device connected, open failures,
//! device errors, listener state) here. Every report is logged through
//! `tracing` and the most recent one is kept as the `last_message` of the
//! published [`BridgeState`](rotator_core::BridgeState).
//!
//! The lock only guards a `String` swap, so readers and writers never wait
//! on I/O.

use std::sync::{Arc, Mutex};

use tracing::{info, warn};

/// Cheap-to-clone handle to the shared status line.
#[derive(Clone, Default)]
pub struct StatusChannel {
    last: Arc<Mutex<String>>,
}

impl StatusChannel {
    /// Creates an empty status channel.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reports a normal state change.
    pub fn report(&self, message: impl Into<String>) {
        let message = message.into();
        info!(status = %message, "Bridge status");
        self.store(message);
    }

    /// Reports a failure.
    pub fn report_error(&self, message: impl Into<String>) {
        let message = message.into();
        warn!(status = %message, "Bridge status");
        self.store(message);
    }

    /// Returns the most recent report.
    ///
    /// Returns `None` if a reporter panicked while holding the lock.
    pub fn last_message(&self) -> Option<String> {
        self.last.lock().ok().map(|last| last.clone())
    }

    fn store(&self, message: String) {
        if let Ok(mut last) = self.last.lock() {
            *last = message;
        }
    }
}
