//! Per-client session: greeting, authentication gate, command dispatch.
//!
//! Each accepted TCP connection gets a `ClientSession` that:
//! - Sends the versioned greeting
//! - Answers `AUTH_REQUIRED` until the client presents `<secret>|...`
//! - Forwards motion and status commands to the serial link
//! - Answers `PING` and unknown commands directly
//!
//! The session is registered with the client registry before it starts,
//! so it receives device lines from the moment it connects. Until it
//! authenticates it can observe but not command.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use rotator_core::ClientId;
use rotator_protocol::{Admission, AuthGate, Command, ServerReply, MAX_LINE_LENGTH};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::codec::{Decoder, LinesCodec, LinesCodecError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::registry::{
    session_writer, write_line, ClientEntry, RegistryHandle, SendError, SessionWriter,
};
use crate::serial::SerialLink;

/// Write timeout for replies to this client.
const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Read buffer growth per read.
const READ_CHUNK_SIZE: usize = 256;

/// Read half of a client connection.
type ClientReader = Box<dyn AsyncRead + Send + Sync + Unpin>;

/// Errors that end a session.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Line exceeds {max} bytes")]
    LineTooLong { max: usize },

    #[error("Send failed: {0}")]
    Send(#[from] SendError),
}

impl From<LinesCodecError> for SessionError {
    fn from(e: LinesCodecError) -> Self {
        match e {
            LinesCodecError::MaxLineLengthExceeded => Self::LineTooLong {
                max: MAX_LINE_LENGTH,
            },
            LinesCodecError::Io(e) => Self::Io(e),
        }
    }
}

// ============================================================================
// Session Closer
// ============================================================================

/// Idempotent close for one session.
///
/// Shared between the session's own read loop and anyone else who needs
/// the session gone. The first call cancels the session token and removes
/// the client from the registry; later calls do nothing.
#[derive(Clone)]
pub struct SessionCloser {
    id: ClientId,
    token: CancellationToken,
    closed: Arc<AtomicBool>,
    registry: RegistryHandle,
}

impl SessionCloser {
    /// Creates a closer for `id`, with a token derived from `parent`.
    pub fn new(id: ClientId, registry: RegistryHandle, parent: &CancellationToken) -> Self {
        Self {
            id,
            token: parent.child_token(),
            closed: Arc::new(AtomicBool::new(false)),
            registry,
        }
    }

    /// Token cancelled when the session must stop.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Whether close has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Closes the session. Returns `true` only for the call that did the work.
    pub async fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.token.cancel();
        self.registry.remove(self.id).await;
        true
    }
}

// ============================================================================
// Client Session
// ============================================================================

/// Session state for one TCP client.
pub struct ClientSession {
    id: ClientId,
    reader: ClientReader,
    codec: LinesCodec,
    writer: SessionWriter,
    gate: AuthGate,
    link: SerialLink,
    closer: SessionCloser,
}

impl ClientSession {
    /// Creates a session over the two halves of a client connection.
    pub fn new<R, W>(
        id: ClientId,
        reader: R,
        writer: W,
        secret: &str,
        link: SerialLink,
        closer: SessionCloser,
    ) -> Self
    where
        R: AsyncRead + Send + Sync + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            id,
            reader: Box::new(reader),
            codec: LinesCodec::new_with_max_length(MAX_LINE_LENGTH),
            writer: session_writer(writer),
            gate: AuthGate::new(secret),
            link,
            closer,
        }
    }

    /// Builds the registry entry that shares this session's writer.
    pub fn registry_entry(&self, peer: SocketAddr) -> ClientEntry {
        ClientEntry::new(
            Arc::clone(&self.writer),
            self.closer.token().clone(),
            peer,
        )
    }

    /// Runs the session until the client disconnects, an I/O error
    /// occurs, or the session token is cancelled.
    pub async fn run(mut self) {
        debug!(client_id = %self.id, "Session started");

        let result = match self.send(ServerReply::greeting()).await {
            Ok(()) => self.process_lines().await,
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => debug!(client_id = %self.id, "Session ended"),
            Err(e) => debug!(client_id = %self.id, error = %e, "Session ended with error"),
        }

        self.closer.close().await;
        if let Err(e) = self.writer.lock().await.shutdown().await {
            debug!(client_id = %self.id, error = %e, "Failed to shut down client stream");
        }

        info!(client_id = %self.id, "Client disconnected");
    }

    /// Reads and handles client lines.
    ///
    /// The codec refuses to buffer more than `MAX_LINE_LENGTH` bytes
    /// without a newline, so a client cannot grow the buffer unbounded.
    async fn process_lines(&mut self) -> Result<(), SessionError> {
        let token = self.closer.token().clone();
        let mut buf = BytesMut::with_capacity(READ_CHUNK_SIZE);

        loop {
            while let Some(line) = self.codec.decode(&mut buf)? {
                self.handle_line(&line).await?;
            }

            buf.reserve(READ_CHUNK_SIZE);
            let read = tokio::select! {
                biased;
                _ = token.cancelled() => return Ok(()),
                read = self.reader.read_buf(&mut buf) => read,
            };

            if read? == 0 {
                if let Some(line) = self.codec.decode_eof(&mut buf)? {
                    self.handle_line(&line).await?;
                }
                return Ok(());
            }
        }
    }

    /// Handles one line from the client.
    async fn handle_line(&mut self, line: &str) -> Result<(), SessionError> {
        match self.gate.admit(line) {
            Admission::Rejected => {
                debug!(client_id = %self.id, "Rejected unauthenticated line");
                self.send(ServerReply::AuthRequired).await
            }
            Admission::Granted(command) => {
                info!(client_id = %self.id, "Client authenticated");
                self.send(ServerReply::AuthOk).await?;
                match command {
                    Some(command) => self.execute(command).await,
                    None => Ok(()),
                }
            }
            Admission::Command(command) => self.execute(command).await,
        }
    }

    /// Executes an authenticated command.
    ///
    /// Device write failures are not the client's fault and do not end
    /// the session; they surface on the status channel.
    async fn execute(&mut self, command: Command) -> Result<(), SessionError> {
        debug!(client_id = %self.id, command = %command, "Client command");

        if let Some(rotating) = command.sets_rotating() {
            self.link.set_rotating(rotating);
        }

        if let Some(device_line) = command.device_line() {
            if let Err(e) = self.link.write(device_line).await {
                debug!(client_id = %self.id, error = %e, "Command not delivered to device");
            }
            return Ok(());
        }

        match command {
            Command::Ping => self.send(ServerReply::Pong).await,
            Command::Unknown(_) => self.send(ServerReply::UnknownCommand).await,
            _ => Ok(()),
        }
    }

    async fn send(&self, reply: ServerReply) -> Result<(), SessionError> {
        write_line(&self.writer, &reply.line(), WRITE_TIMEOUT).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::spawn_registry;
    use crate::serial::LinkTiming;
    use crate::status::StatusChannel;
    use tokio::io::{AsyncBufReadExt, BufReader, DuplexStream, Lines};

    struct Harness {
        input: DuplexStream,
        output: Lines<BufReader<DuplexStream>>,
        closer: SessionCloser,
        link: SerialLink,
        task: tokio::task::JoinHandle<()>,
    }

    async fn start_session() -> Harness {
        let registry = spawn_registry();
        let link = SerialLink::new(StatusChannel::new(), LinkTiming::default());
        let closer = SessionCloser::new(ClientId::new(1), registry.clone(), &CancellationToken::new());

        let (input, session_in) = tokio::io::duplex(1024);
        let (session_out, output) = tokio::io::duplex(1024);
        let session = ClientSession::new(
            ClientId::new(1),
            session_in,
            session_out,
            "secret",
            link.clone(),
            closer.clone(),
        );
        registry
            .register(ClientId::new(1), session.registry_entry(SocketAddr::from(([127, 0, 0, 1], 1))))
            .await
            .unwrap();

        let task = tokio::spawn(session.run());
        Harness {
            input,
            output: BufReader::new(output).lines(),
            closer,
            link,
            task,
        }
    }

    impl Harness {
        async fn send(&mut self, line: &str) {
            self.input.write_all(format!("{line}\n").as_bytes()).await.unwrap();
        }

        async fn recv(&mut self) -> String {
            self.output.next_line().await.unwrap().unwrap()
        }
    }

    fn assert_send<F: std::future::Future + Send>(_: F) {}

    #[tokio::test]
    async fn test_session_future_is_send() {
        let registry = spawn_registry();
        let closer = SessionCloser::new(ClientId::new(9), registry, &CancellationToken::new());
        let (_client, stream) = tokio::io::duplex(64);
        let (reader, writer) = tokio::io::split(stream);
        let session = ClientSession::new(
            ClientId::new(9),
            reader,
            writer,
            "secret",
            SerialLink::new(StatusChannel::new(), LinkTiming::default()),
            closer,
        );

        assert_send(session.run());
    }

    #[tokio::test]
    async fn test_greeting_then_auth_required() {
        let mut h = start_session().await;
        assert_eq!(h.recv().await, "ROTATOR_SERVER v1.0");

        h.send("PING").await;
        assert_eq!(h.recv().await, "AUTH_REQUIRED");
    }

    #[tokio::test]
    async fn test_auth_then_commands() {
        let mut h = start_session().await;
        h.recv().await;

        h.send("secret|PING").await;
        assert_eq!(h.recv().await, "AUTH_OK");
        assert_eq!(h.recv().await, "PONG");

        h.send("FOO").await;
        assert_eq!(h.recv().await, "UNKNOWN_CMD");
    }

    #[tokio::test]
    async fn test_rotation_flag_follows_commands() {
        let mut h = start_session().await;
        h.recv().await;

        h.send("secret|CW").await;
        assert_eq!(h.recv().await, "AUTH_OK");
        // PONG proves the CW line was processed
        h.send("PING").await;
        assert_eq!(h.recv().await, "PONG");
        assert!(h.link.is_rotating());

        h.send("stop").await;
        h.send("PING").await;
        assert_eq!(h.recv().await, "PONG");
        assert!(!h.link.is_rotating());
    }

    #[tokio::test]
    async fn test_line_without_newline_is_bounded() {
        let mut h = start_session().await;
        h.recv().await;

        let flood = vec![b'A'; MAX_LINE_LENGTH * 4];
        // The session stops reading partway through
        let _ = h.input.write_all(&flood).await;

        tokio::time::timeout(Duration::from_secs(2), h.task)
            .await
            .unwrap()
            .unwrap();
        assert!(h.closer.is_closed());
    }

    #[tokio::test]
    async fn test_line_at_limit_is_accepted() {
        let mut h = start_session().await;
        h.recv().await;

        h.send(&"A".repeat(MAX_LINE_LENGTH)).await;
        assert_eq!(h.recv().await, "AUTH_REQUIRED");
        assert!(!h.closer.is_closed());
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_ends_session() {
        let h = start_session().await;

        assert!(h.closer.close().await);
        assert!(!h.closer.close().await);
        assert!(h.closer.is_closed());

        h.task.await.unwrap();
    }

    #[tokio::test]
    async fn test_client_eof_closes_session() {
        let h = start_session().await;
        let closer = h.closer.clone();
        drop(h.input);

        h.task.await.unwrap();
        assert!(closer.is_closed());
    }
}
