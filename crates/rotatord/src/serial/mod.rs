//! Serial link to the rotator controller.
//!
//! [`SerialLink`] owns the connection to the device and keeps it alive:
//! open, read lines until the stream fails, mark the link down, wait, and
//! open again, until shutdown. Every received line is classified; heading
//! reports update the shared heading and, together with acknowledgements
//! and device errors, are fanned out to TCP clients.
//!
//! Writes come from client sessions and the heartbeat concurrently. They
//! are serialized by a mutex around the write half so each command reaches
//! the device as one contiguous line.
//!
//! ```text
//!              open (blocking task)
//!  Disconnected ──────────────▶ Connecting ──▶ Connected
//!       ▲                          │              │
//!       │  backoff (5 s)           │ open failed  │ EOF / read error
//!       └──────────────────────────┘              │ delay (1 s)
//!       └─────────────────────────────────────────┘
//! ```

use std::io;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use rotator_core::LinkState;
use rotator_protocol::{DeviceLineCodec, DeviceMessage, ProtocolError};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::codec::{Decoder, Encoder};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::config::BridgeConfig;
use crate::registry::RegistryHandle;
use crate::status::StatusChannel;

mod device;

pub use device::{DeviceOpener, DeviceStream, SerialDevice, TtyOpener};

/// Initial read buffer capacity.
const READ_BUFFER_SIZE: usize = 256;

// ============================================================================
// Errors
// ============================================================================

/// Errors from the serial link.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LinkError {
    /// The device could not be opened.
    #[error("{0}")]
    Open(String),

    /// No device is connected.
    #[error("Serial link not connected")]
    NotConnected,

    /// Read or write failed.
    #[error("{0}")]
    Io(String),

    /// A write did not complete within the write timeout.
    #[error("Write timed out after {0:?}")]
    WriteTimeout(Duration),

    /// The device closed the stream.
    #[error("Device closed the connection")]
    EndOfStream,
}

// ============================================================================
// Timing
// ============================================================================

/// Delays governing reconnection and writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkTiming {
    /// Wait after a failed open before trying again
    pub reconnect_backoff: Duration,

    /// Wait after a read failure before reopening
    pub read_failure_delay: Duration,

    /// Upper bound on one device write
    pub write_timeout: Duration,
}

impl Default for LinkTiming {
    fn default() -> Self {
        Self {
            reconnect_backoff: Duration::from_secs(5),
            read_failure_delay: Duration::from_secs(1),
            write_timeout: Duration::from_secs(1),
        }
    }
}

impl From<&BridgeConfig> for LinkTiming {
    fn from(config: &BridgeConfig) -> Self {
        Self {
            reconnect_backoff: config.reconnect_backoff(),
            read_failure_delay: config.read_failure_delay(),
            write_timeout: config.write_timeout(),
        }
    }
}

// ============================================================================
// Serial Link
// ============================================================================

/// Write half of the open device.
struct DeviceWriter {
    half: WriteHalf<DeviceStream>,
    /// Set while a frame is being written; still set after a timeout or
    /// error means the device may hold an unterminated partial command.
    torn: bool,
}

impl DeviceWriter {
    fn new(half: WriteHalf<DeviceStream>) -> Self {
        Self { half, torn: false }
    }

    async fn write_frame(&mut self, frame: &[u8]) -> io::Result<()> {
        let resync = self.torn;
        self.torn = true;
        if resync {
            debug!("Terminating partially written command");
            self.half.write_all(b"\n").await?;
        }
        self.half.write_all(frame).await?;
        self.half.flush().await?;
        self.torn = false;
        Ok(())
    }
}

struct LinkShared {
    state: AtomicU8,
    heading: AtomicI32,
    rotating: AtomicBool,
    writer: Mutex<Option<DeviceWriter>>,
    status: StatusChannel,
    timing: LinkTiming,
}

/// Cheap-to-clone handle to the serial link.
///
/// Link state, heading and the rotating flag are plain atomics: readers
/// never wait on the device.
#[derive(Clone)]
pub struct SerialLink {
    shared: Arc<LinkShared>,
}

impl SerialLink {
    /// Creates a disconnected link.
    pub fn new(status: StatusChannel, timing: LinkTiming) -> Self {
        Self {
            shared: Arc::new(LinkShared {
                state: AtomicU8::new(LinkState::Disconnected.as_u8()),
                heading: AtomicI32::new(0),
                rotating: AtomicBool::new(false),
                writer: Mutex::new(None),
                status,
                timing,
            }),
        }
    }

    /// Current connection state.
    pub fn state(&self) -> LinkState {
        LinkState::from_u8(self.shared.state.load(Ordering::Acquire)).unwrap_or_default()
    }

    /// Whether the device is currently connected.
    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// Last heading reported by the device; 0 until the first report.
    pub fn heading(&self) -> i32 {
        self.shared.heading.load(Ordering::Acquire)
    }

    /// Whether a rotation is in progress, as last commanded by a client.
    pub fn is_rotating(&self) -> bool {
        self.shared.rotating.load(Ordering::Acquire)
    }

    /// Records that a rotation was started or stopped.
    pub fn set_rotating(&self, rotating: bool) {
        self.shared.rotating.store(rotating, Ordering::Release);
    }

    fn set_state(&self, state: LinkState) {
        let previous = self.shared.state.swap(state.as_u8(), Ordering::AcqRel);
        if previous != state.as_u8() {
            debug!(state = %state, "Serial link state changed");
        }
    }

    /// Writes one command line to the device.
    ///
    /// The command is newline-terminated and written and flushed as a unit
    /// while holding the writer lock. If an earlier write was cut short, a
    /// bare newline is sent first so the leftover fragment cannot merge with
    /// this command. Failures other than [`LinkError::NotConnected`] are
    /// reported on the status channel.
    ///
    /// # Errors
    ///
    /// - `LinkError::NotConnected` if no device is open
    /// - `LinkError::Io` if the write or flush failed
    /// - `LinkError::WriteTimeout` if the write took longer than the write timeout
    pub async fn write(&self, command: &str) -> Result<(), LinkError> {
        let mut frame = BytesMut::with_capacity(command.len() + 1);
        DeviceLineCodec::new()
            .encode(command, &mut frame)
            .map_err(|e| LinkError::Io(e.to_string()))?;

        let limit = self.shared.timing.write_timeout;
        let write = async {
            let mut guard = self.shared.writer.lock().await;
            let writer = guard.as_mut().ok_or(LinkError::NotConnected)?;
            writer
                .write_frame(&frame)
                .await
                .map_err(|e| LinkError::Io(e.to_string()))
        };

        let result = match tokio::time::timeout(limit, write).await {
            Ok(result) => result,
            Err(_) => Err(LinkError::WriteTimeout(limit)),
        };

        match &result {
            Ok(()) => trace!(command, "Sent to device"),
            Err(LinkError::NotConnected) => debug!(command, "Dropped command: device not connected"),
            Err(e) => self.shared.status.report_error(format!("Send error: {e}")),
        }
        result
    }

    /// Opens the device and installs its write half.
    ///
    /// Returns the read half for the caller to drain.
    pub async fn connect(
        &self,
        opener: &Arc<dyn DeviceOpener>,
    ) -> Result<ReadHalf<DeviceStream>, LinkError> {
        self.set_state(LinkState::Connecting);

        let opener = Arc::clone(opener);
        let opened = tokio::task::spawn_blocking(move || opener.open())
            .await
            .unwrap_or_else(|e| Err(io::Error::new(io::ErrorKind::Other, e.to_string())));

        let stream = match opened {
            Ok(stream) => stream,
            Err(e) => {
                self.set_state(LinkState::Disconnected);
                return Err(LinkError::Open(e.to_string()));
            }
        };

        let (reader, writer) = tokio::io::split(stream);
        *self.shared.writer.lock().await = Some(DeviceWriter::new(writer));
        self.set_state(LinkState::Connected);
        self.shared.status.report("Connected to device");

        Ok(reader)
    }

    /// Drops the write half and marks the link disconnected.
    pub async fn disconnect(&self) {
        self.shared.writer.lock().await.take();
        self.set_state(LinkState::Disconnected);
    }

    /// Runs the connect/read/reconnect loop until `cancel` fires.
    pub async fn run(
        self,
        opener: Arc<dyn DeviceOpener>,
        registry: RegistryHandle,
        cancel: CancellationToken,
    ) {
        info!(device = %opener.describe(), "Serial link starting");
        let timing = self.shared.timing;
        let mut failed_opens: u64 = 0;

        while !cancel.is_cancelled() {
            let delay = match self.connect(&opener).await {
                Ok(reader) => {
                    failed_opens = 0;
                    match self.read_lines(reader, &registry, &cancel).await {
                        Ok(()) => break,
                        Err(e) => {
                            self.disconnect().await;
                            self.shared
                                .status
                                .report_error(format!("Serial read error: {e}"));
                            timing.read_failure_delay
                        }
                    }
                }
                Err(e) => {
                    failed_opens += 1;
                    debug!(attempt = failed_opens, error = %e, "Device open failed");
                    self.shared.status.report_error(format!("USB error: {e}"));
                    timing.reconnect_backoff
                }
            };

            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        self.disconnect().await;
        info!("Serial link stopped");
    }

    /// Reads and dispatches lines until the stream fails.
    ///
    /// Returns `Ok(())` only when cancelled.
    async fn read_lines(
        &self,
        mut reader: ReadHalf<DeviceStream>,
        registry: &RegistryHandle,
        cancel: &CancellationToken,
    ) -> Result<(), LinkError> {
        let mut codec = DeviceLineCodec::new();
        let mut buf = BytesMut::with_capacity(READ_BUFFER_SIZE);

        loop {
            buf.reserve(READ_BUFFER_SIZE);
            let read = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(()),
                read = reader.read_buf(&mut buf) => read,
            };

            match read {
                Ok(0) => return Err(LinkError::EndOfStream),
                Ok(_) => {}
                Err(e) => return Err(LinkError::Io(e.to_string())),
            }

            loop {
                match codec.decode(&mut buf) {
                    Ok(Some(line)) => self.dispatch(&line, registry).await,
                    Ok(None) => break,
                    Err(ProtocolError::LineTooLong { max }) => {
                        warn!(max, "Discarding overlong device line");
                    }
                    Err(e) => return Err(LinkError::Io(e.to_string())),
                }
            }
        }
    }

    /// Applies one device line to link state and forwards it to clients.
    async fn dispatch(&self, line: &str, registry: &RegistryHandle) {
        let message = DeviceMessage::classify(line);

        match &message {
            DeviceMessage::Position(heading) => {
                self.shared.heading.store(*heading, Ordering::Release);
                trace!(heading, "Heading update");
            }
            DeviceMessage::Error(_) => {
                self.shared.status.report_error(format!("Device: {line}"));
            }
            DeviceMessage::Ready => {
                self.shared
                    .status
                    .report(format!("Device ready - heading: {}", self.heading()));
            }
            DeviceMessage::Ack(_) => {}
            DeviceMessage::Other => {
                debug!(line, "Ignoring unrecognized device line");
            }
        }

        if let Some(out) = message.fanout_line() {
            registry.fanout(out).await;
        }
    }
}

/// Spawns the link's run loop.
pub fn spawn_serial_link(
    link: SerialLink,
    opener: Arc<dyn DeviceOpener>,
    registry: RegistryHandle,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(link.run(opener, registry, cancel))
}

// ============================================================================
// Tests
// ============================================================================
