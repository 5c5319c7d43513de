//! Shared helpers for the bridge integration tests.
//!
//! A `TestBridge` runs the real bridge on `127.0.0.1:0` against in-memory
//! serial devices; `TestClient` speaks the TCP protocol and `TestDevice`
//! plays the rotator controller.
//!
//! Tests CAN use `.unwrap()` and `.expect()` - production code is checked
//! for panic-free behavior through assertions.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rotator_core::BridgeState;
use rotatord::serial::{DeviceOpener, DeviceStream};
use rotatord::{Bridge, BridgeConfig, BridgeHandle};
use tokio::io::{
    AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, Lines, ReadHalf, WriteHalf,
};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout, Instant};

// ============================================================================
// Constants
// ============================================================================

pub const SECRET: &str = "test-secret";

/// Upper bound for anything the bridge should do promptly
pub const RECV_TIMEOUT: Duration = Duration::from_secs(2);

/// How long to watch for something that must not happen
pub const QUIET_PERIOD: Duration = Duration::from_millis(300);

const POLL_INTERVAL: Duration = Duration::from_millis(10);

// ============================================================================
// Mock Serial Device
// ============================================================================

/// Opener that hands out queued in-memory devices and fails when empty.
#[derive(Default)]
pub struct MockOpener {
    devices: Mutex<VecDeque<DuplexStream>>,
    attempts: AtomicUsize,
}

impl MockOpener {
    /// Queues a new device and returns the controller side of it.
    pub fn plug_in(&self) -> TestDevice {
        let (controller, host) = tokio::io::duplex(4096);
        self.devices.lock().unwrap().push_back(host);
        TestDevice::new(controller)
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl DeviceOpener for MockOpener {
    fn open(&self) -> io::Result<DeviceStream> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        match self.devices.lock().unwrap().pop_front() {
            Some(stream) => Ok(Box::new(stream)),
            None => Err(io::Error::new(io::ErrorKind::NotFound, "no such device")),
        }
    }

    fn describe(&self) -> String {
        "mock".to_string()
    }
}

/// Controller side of an in-memory serial device.
pub struct TestDevice {
    lines: Lines<BufReader<ReadHalf<DuplexStream>>>,
    writer: WriteHalf<DuplexStream>,
}

impl TestDevice {
    fn new(stream: DuplexStream) -> Self {
        let (reader, writer) = tokio::io::split(stream);
        Self {
            lines: BufReader::new(reader).lines(),
            writer,
        }
    }

    /// Sends raw bytes, exactly as given.
    pub async fn send_raw(&mut self, bytes: &[u8]) {
        self.writer.write_all(bytes).await.unwrap();
        self.writer.flush().await.unwrap();
    }

    /// Sends one newline-terminated line.
    pub async fn send(&mut self, line: &str) {
        self.send_raw(format!("{line}\n").as_bytes()).await;
    }

    /// Next line written by the bridge.
    pub async fn recv(&mut self) -> String {
        timeout(RECV_TIMEOUT, self.lines.next_line())
            .await
            .expect("device write within timeout")
            .unwrap()
            .expect("device stream open")
    }

    /// Reads lines until `expected` arrives, returning what was skipped.
    pub async fn recv_until(&mut self, expected: &str) -> Vec<String> {
        let mut skipped = Vec::new();
        loop {
            let line = self.recv().await;
            if line == expected {
                return skipped;
            }
            skipped.push(line);
        }
    }

    /// Asserts the bridge writes nothing for the quiet period.
    pub async fn assert_silent(&mut self) {
        if let Ok(line) = timeout(QUIET_PERIOD, self.lines.next_line()).await {
            panic!("Expected no device write, got {line:?}");
        }
    }
}

// ============================================================================
// Test Bridge
// ============================================================================

/// Configuration for tests: loopback only, fast retries, quiet heartbeat.
pub fn test_config() -> BridgeConfig {
    BridgeConfig {
        bind_address: Ipv4Addr::LOCALHOST.into(),
        tcp_port: 0,
        discovery_address: Ipv4Addr::LOCALHOST,
        discovery_port: 9,
        secret: SECRET.to_string(),
        reconnect_backoff_ms: 50,
        read_failure_delay_ms: 10,
        write_timeout_ms: 500,
        heartbeat_interval_ms: 60_000,
        discovery_interval_ms: 50,
        publish_interval_ms: 20,
        ..BridgeConfig::default()
    }
}

/// A running bridge plus the opener feeding it devices.
pub struct TestBridge {
    pub handle: BridgeHandle,
    pub opener: Arc<MockOpener>,
}

impl TestBridge {
    /// Starts a bridge with no device plugged in.
    pub async fn spawn_with(config: BridgeConfig) -> Self {
        let opener = Arc::new(MockOpener::default());
        let handle = Bridge::start(&config, opener.clone()).await.unwrap();
        Self { handle, opener }
    }

    /// Starts a bridge with one device, waiting until the link is up.
    pub async fn spawn_connected_with(config: BridgeConfig) -> (Self, TestDevice) {
        let opener = Arc::new(MockOpener::default());
        let device = opener.plug_in();
        let handle = Bridge::start(&config, opener.clone()).await.unwrap();
        let bridge = Self { handle, opener };
        bridge.wait_link_connected().await;
        (bridge, device)
    }

    pub async fn spawn_connected() -> (Self, TestDevice) {
        Self::spawn_connected_with(test_config()).await
    }

    pub fn addr(&self) -> SocketAddr {
        self.handle.tcp_addr().expect("TCP listener bound")
    }

    /// Connects a client and consumes the greeting.
    pub async fn connect(&self) -> TestClient {
        let mut client = self.connect_raw().await;
        assert_eq!(client.recv().await, "ROTATOR_SERVER v1.0");
        client
    }

    /// Connects a client without reading anything.
    pub async fn connect_raw(&self) -> TestClient {
        TestClient::new(TcpStream::connect(self.addr()).await.expect("connect to bridge"))
    }

    /// Connects and authenticates a client.
    pub async fn connect_authenticated(&self) -> TestClient {
        let mut client = self.connect().await;
        client.send(&format!("{SECRET}|")).await;
        assert_eq!(client.recv().await, "AUTH_OK");
        client
    }

    pub async fn wait_link_connected(&self) {
        let link = self.handle.link().clone();
        wait_until("link connected", || link.is_connected()).await;
    }

    pub async fn wait_client_count(&self, expected: usize) {
        let registry = self.handle.registry().clone();
        wait_until(&format!("{expected} clients"), || registry.client_count() == expected).await;
    }

    /// Waits for a published snapshot matching `predicate`.
    pub async fn wait_state<F>(&self, predicate: F) -> BridgeState
    where
        F: Fn(&BridgeState) -> bool,
    {
        let mut states = self.handle.subscribe_state();
        let found = timeout(RECV_TIMEOUT, states.wait_for(|state| predicate(state)))
            .await
            .expect("matching state within timeout")
            .expect("publisher running")
            .clone();
        found
    }

    pub async fn shutdown(self) {
        self.handle.shutdown().await;
    }
}

/// Polls `condition` until it holds or the receive timeout elapses.
pub async fn wait_until<F>(what: &str, condition: F)
where
    F: Fn() -> bool,
{
    let deadline = Instant::now() + RECV_TIMEOUT;
    while !condition() {
        assert!(Instant::now() < deadline, "Timed out waiting for {what}");
        sleep(POLL_INTERVAL).await;
    }
}

// ============================================================================
// Test Client
// ============================================================================

/// TCP client with protocol helpers.
pub struct TestClient {
    lines: Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
}

impl TestClient {
    fn new(stream: TcpStream) -> Self {
        let (reader, writer) = stream.into_split();
        Self {
            lines: BufReader::new(reader).lines(),
            writer,
        }
    }

    /// Sends one newline-terminated line.
    pub async fn send(&mut self, line: &str) {
        self.send_raw(format!("{line}\n").as_bytes()).await;
    }

    pub async fn send_raw(&mut self, bytes: &[u8]) {
        self.writer.write_all(bytes).await.unwrap();
        self.writer.flush().await.unwrap();
    }

    /// Next line from the bridge.
    pub async fn recv(&mut self) -> String {
        self.try_recv()
            .await
            .expect("connection open")
    }

    /// Next line, or `None` once the bridge closed the connection.
    pub async fn try_recv(&mut self) -> Option<String> {
        match timeout(RECV_TIMEOUT, self.lines.next_line())
            .await
            .expect("server line within timeout")
        {
            Ok(line) => line,
            Err(_) => None,
        }
    }

    /// Asserts nothing arrives for the quiet period.
    pub async fn assert_silent(&mut self) {
        if let Ok(line) = timeout(QUIET_PERIOD, self.lines.next_line()).await {
            panic!("Expected no reply, got {line:?}");
        }
    }
}
