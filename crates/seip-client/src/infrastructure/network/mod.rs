//! Network infrastructure for the client application.
//!
//! A [`ClientSession`] owns one TCP connection to the server:
//!
//! ```text
//! connect ──► name frame ──► ┌─ read request frame ◄──────────┐
//!                            │  engine.handle_packet (blocking)│
//!                            └─ write response frame ──────────┘
//!                                   │
//!                        REQ_DISCONNECT or EOF ──► SessionEnd
//! ```
//!
//! Exactly one response is written for every request read, in order.  The
//! server relies on that ordering to match replies to requests, since no
//! request identifier travels on the wire.

use std::sync::Arc;
use std::time::Duration;

use seip_core::{write_frame, FrameError, FrameLimits, FrameReader, ProtocolError};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tracing::{debug, info};

use crate::application::client_engine::ClientEngine;

/// Errors that can occur in the client network layer.
#[derive(Debug, Error)]
pub enum ClientError {
    /// TCP connection to the server failed.
    #[error("failed to connect to server at {addr}: {source}")]
    ConnectFailed {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    /// An I/O error occurred on the established connection.
    #[error("connection I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// A packet could not be read or written.
    #[error("framing error: {0}")]
    Frame(#[from] FrameError),
    /// A response could not be encoded.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
    /// The worker running a request handler panicked.
    #[error("request handler failed: {0}")]
    Handler(String),
}

/// Configuration for one session with the server.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// `host:port` of the server.
    pub server_addr: String,
    /// Name sent in the handshake; shows up in the server's client list.
    pub name: String,
    /// Packet bound for both directions.
    pub limits: FrameLimits,
    /// How long one read waits before trying again.  Only bounds how often
    /// the loop wakes up; an idle server is never an error.
    pub poll_interval: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            server_addr: "127.0.0.1:9000".to_string(),
            name: "seip-client".to_string(),
            limits: FrameLimits::default(),
            poll_interval: Duration::from_secs(1),
        }
    }
}

/// How a session ended without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The server sent `REQ_DISCONNECT` and got its reply.
    Disconnected,
    /// The server closed the connection.
    ServerClosed,
}

pub struct ClientSession {
    config: SessionConfig,
    engine: Arc<ClientEngine>,
}

impl ClientSession {
    pub fn new(config: SessionConfig, engine: Arc<ClientEngine>) -> Self {
        Self { config, engine }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Connects, sends the name packet, and serves requests until the
    /// server disconnects us.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::ConnectFailed`] if the server is unreachable,
    /// or another [`ClientError`] if the connection breaks mid-packet.
    pub async fn run(&self) -> Result<SessionEnd, ClientError> {
        let addr = self.config.server_addr.clone();
        let stream = TcpStream::connect(&addr)
            .await
            .map_err(|source| ClientError::ConnectFailed { addr: addr.clone(), source })?;
        stream.set_nodelay(true)?;
        info!("connected to server at {addr} as {:?}", self.config.name);
        self.serve(stream).await
    }

    /// Handshakes and serves requests over an already open stream.
    ///
    /// # Errors
    ///
    /// See [`ClientSession::run`].
    pub async fn serve<S>(&self, mut stream: S) -> Result<SessionEnd, ClientError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let limits = self.config.limits;
        write_frame(&mut stream, self.config.name.as_bytes(), &limits).await?;

        let mut reader = FrameReader::new(limits);
        loop {
            let packet = match reader.read_frame(&mut stream, self.config.poll_interval).await {
                Ok(packet) => packet,
                Err(e) if e.is_recoverable() => continue,
                Err(FrameError::Closed) => {
                    info!("server closed the connection");
                    return Ok(SessionEnd::ServerClosed);
                }
                Err(e) => return Err(e.into()),
            };

            // Handlers call into the terminal, which may block on a real reader.
            let engine = Arc::clone(&self.engine);
            let handled = tokio::task::spawn_blocking(move || engine.handle_packet(&packet))
                .await
                .map_err(|e| ClientError::Handler(e.to_string()))?;

            debug!("sending response: {}", handled.response);
            let payload = handled.response.to_json()?;
            write_frame(&mut stream, &payload, &limits).await?;

            if handled.disconnect {
                info!("disconnected by server");
                return Ok(SessionEnd::Disconnected);
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
