//! Packet Transport: the TCP listener and the per-client connection.
//!
//! [`PacketTransport`] owns the listening socket.  Every accepted socket is
//! wrapped in a [`ClientConnection`], which frames packets with
//! [`seip_core::write_frame`] / [`seip_core::FrameReader`] and implements the
//! dispatcher's [`PacketChannel`] trait.
//!
//! # Connection state
//!
//! ```text
//! ClientConnection
//!  ├─ io: Mutex<ConnectionIo>     the turn lock; held for one whole exchange
//!  │    ├─ stream: Option<TcpStream>   None once fully closed
//!  │    └─ reader: FrameReader         keeps a partial length prefix between turns
//!  └─ closed: watch::Sender<bool>  close signal, readable without the lock
//! ```
//!
//! The close signal lives outside the mutex on purpose: an exchange blocked
//! in `receive_packet` holds the lock, so closing must be able to wake it
//! without first acquiring that same lock.

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use async_trait::async_trait;
use seip_core::{write_frame, FrameError, FrameLimits, FrameReader, ReceiveOutcome};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{watch, Mutex, MutexGuard};
use tracing::{debug, warn};

use crate::application::dispatcher::{PacketChannel, PacketTurn};

/// Error type for listener operations.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The ip string is not an IPv4 or IPv6 address.
    #[error("invalid listen address {0:?}")]
    InvalidAddress(String),

    #[error("bind failed on {addr}: {source}")]
    BindFailed {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// `accept` failed for a reason other than a timeout.
    #[error("accept failed: {0}")]
    Accept(#[source] std::io::Error),

    /// The listener has already been closed.
    #[error("server socket is closed")]
    NotListening,
}

// ── Listener ──────────────────────────────────────────────────────────────────

/// The server's listening socket.
#[derive(Debug)]
pub struct PacketTransport {
    listener: Option<TcpListener>,
    limits: FrameLimits,
}

impl PacketTransport {
    /// Binds and listens on `ip:port`.  Port 0 picks a free port.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::InvalidAddress`] for an unparsable `ip` and
    /// [`TransportError::BindFailed`] when the OS refuses the bind.
    pub async fn start_server(ip: &str, port: u16, limits: FrameLimits) -> Result<Self, TransportError> {
        let ip: IpAddr = ip
            .parse()
            .map_err(|_| TransportError::InvalidAddress(ip.to_string()))?;
        let addr = SocketAddr::new(ip, port);
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| TransportError::BindFailed { addr, source })?;
        Ok(Self {
            listener: Some(listener),
            limits,
        })
    }

    /// Address the listener is bound to.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::NotListening`] after [`Self::close_server`].
    pub fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        self.listener
            .as_ref()
            .ok_or(TransportError::NotListening)?
            .local_addr()
            .map_err(TransportError::Accept)
    }

    /// Waits up to `wait` for one incoming connection.
    ///
    /// Returns `Ok(None)` when nobody connected in time.  The accepted
    /// connection uses `receive_timeout` as its default receive wait.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Accept`] on a hard accept failure and
    /// [`TransportError::NotListening`] if the listener is closed.
    pub async fn accept_connection(
        &self,
        wait: Duration,
        receive_timeout: Duration,
    ) -> Result<Option<ClientConnection>, TransportError> {
        let listener = self.listener.as_ref().ok_or(TransportError::NotListening)?;
        match tokio::time::timeout(wait, listener.accept()).await {
            Err(_elapsed) => Ok(None),
            Ok(Ok((stream, peer))) => {
                // Small request/response packets; do not wait to coalesce them.
                if let Err(e) = stream.set_nodelay(true) {
                    debug!("could not disable Nagle on {peer}: {e}");
                }
                Ok(Some(ClientConnection::new(stream, peer, self.limits, receive_timeout)))
            }
            Ok(Err(e)) => Err(TransportError::Accept(e)),
        }
    }

    /// Closes the listening socket.  Established connections are unaffected.
    pub fn close_server(&mut self) {
        if self.listener.take().is_some() {
            debug!("server socket closed");
        }
    }
}

// ── Connection ────────────────────────────────────────────────────────────────

#[derive(Debug)]
struct ConnectionIo {
    stream: Option<TcpStream>,
    reader: FrameReader,
}

/// One accepted client socket.
#[derive(Debug)]
pub struct ClientConnection {
    io: Mutex<ConnectionIo>,
    closed: watch::Sender<bool>,
    peer: SocketAddr,
    limits: FrameLimits,
    receive_timeout: Duration,
}

impl ClientConnection {
    pub fn new(stream: TcpStream, peer: SocketAddr, limits: FrameLimits, receive_timeout: Duration) -> Self {
        let (closed, _) = watch::channel(false);
        Self {
            io: Mutex::new(ConnectionIo {
                stream: Some(stream),
                reader: FrameReader::new(limits),
            }),
            closed,
            peer,
            limits,
            receive_timeout,
        }
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Default receive wait configured at accept time.
    pub fn receive_timeout(&self) -> Duration {
        self.receive_timeout
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Closes the connection for good.
    ///
    /// Raises the close signal first, which wakes any exchange still blocked
    /// on this socket so that it releases the turn.  Then shuts down the write
    /// side (the peer sees EOF) and drops the socket.
    pub async fn shutdown(&self) {
        self.closed.send_replace(true);
        let mut io = self.io.lock().await;
        if let Some(mut stream) = io.stream.take() {
            if let Err(e) = stream.shutdown().await {
                debug!("half-close of {} failed: {e}", self.peer);
            }
        }
    }
}

#[async_trait]
impl PacketChannel for ClientConnection {
    async fn turn<'a>(&'a self) -> Box<dyn PacketTurn + Send + 'a> {
        Box::new(ConnectionTurn {
            io: self.io.lock().await,
            closed: self.closed.subscribe(),
            peer: self.peer,
            limits: self.limits,
        })
    }

    fn close(&self) {
        self.closed.send_replace(true);
    }
}

struct ConnectionTurn<'a> {
    io: MutexGuard<'a, ConnectionIo>,
    closed: watch::Receiver<bool>,
    peer: SocketAddr,
    limits: FrameLimits,
}

#[async_trait]
impl<'a> PacketTurn for ConnectionTurn<'a> {
    async fn send_packet(&mut self, payload: &[u8]) -> Result<(), FrameError> {
        if *self.closed.borrow() {
            return Err(FrameError::Closed);
        }
        let Some(stream) = self.io.stream.as_mut() else {
            return Err(FrameError::Closed);
        };
        tokio::select! {
            biased;
            _ = wait_closed(self.closed.clone()) => Err(FrameError::Closed),
            result = write_frame(stream, payload, &self.limits) => result,
        }
    }

    async fn receive_packet(&mut self, wait: Duration) -> ReceiveOutcome {
        let ConnectionIo { stream, reader } = &mut *self.io;
        let Some(stream) = stream.as_mut() else {
            return ReceiveOutcome::Error;
        };
        let result = tokio::select! {
            biased;
            _ = wait_closed(self.closed.clone()) => Err(FrameError::Closed),
            result = reader.read_frame(stream, wait) => result,
        };
        match &result {
            Err(FrameError::Idle(_)) => debug!("no packet from {} within {wait:?}", self.peer),
            Err(e) => warn!("receive from {} failed: {e}", self.peer),
            Ok(_) => {}
        }
        ReceiveOutcome::from(result)
    }
}

/// Resolves once the close signal is raised or its sender is gone.
async fn wait_closed(mut closed: watch::Receiver<bool>) {
    loop {
        if *closed.borrow_and_update() {
            return;
        }
        if closed.changed().await.is_err() {
            return;
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
