//! Access to the physical serial device.
//!
//! The bridge does not enumerate or authorize devices itself. It asks a
//! [`DeviceOpener`] for an open byte stream each time the link (re)connects;
//! [`TtyOpener`] is the production implementation backed by `tokio-serial`,
//! tests supply in-memory streams.

use std::io;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio_serial::{DataBits, FlowControl, Parity, SerialPortBuilderExt, StopBits};
use tracing::info;

/// A bidirectional byte stream to the rotator controller.
pub trait SerialDevice: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T> SerialDevice for T where T: AsyncRead + AsyncWrite + Send + Unpin {}

/// Owned device stream handed to the serial link.
pub type DeviceStream = Box<dyn SerialDevice>;

/// Supplies open connections to the serial device.
///
/// `open` is called from a blocking task, so implementations may block
/// briefly while the OS opens and configures the port.
pub trait DeviceOpener: Send + Sync {
    /// Opens the device, already configured for the controller.
    fn open(&self) -> io::Result<DeviceStream>;

    /// Human-readable device description for logs.
    fn describe(&self) -> String;
}

/// Opens a local serial port at a fixed baud rate, 8-N-1, no flow control.
#[derive(Debug, Clone)]
pub struct TtyOpener {
    path: String,
    baud_rate: u32,
}

impl TtyOpener {
    /// Creates an opener for the given port path.
    pub fn new(path: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            path: path.into(),
            baud_rate,
        }
    }
}

impl DeviceOpener for TtyOpener {
    fn open(&self) -> io::Result<DeviceStream> {
        let port = tokio_serial::new(&self.path, self.baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .open_native_async()
            .map_err(io::Error::from)?;

        info!(path = %self.path, baud_rate = self.baud_rate, "Opened serial port");
        Ok(Box::new(port))
    }

    fn describe(&self) -> String {
        format!("{} @ {} baud", self.path, self.baud_rate)
    }
}
