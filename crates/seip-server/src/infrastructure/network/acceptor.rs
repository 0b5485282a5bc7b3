//! Connection Acceptor: the accept loop and the per-connection handshake.
//!
//! The accept loop runs in its own Tokio task for as long as the server is
//! started.  It never does any I/O with a client itself: each accepted
//! socket is handed to a fresh handshake task so that one client that is
//! slow to send its name cannot delay the next `accept`.
//!
//! ```text
//! accept loop ──accept──► spawn handshake task ──name frame──► registry.add
//!      ▲    │                                                       │
//!      └────┘ (until the stop flag is set)                callback(id, name)
//! ```
//!
//! # Handshake
//!
//! The client's first frame is its name as raw UTF-8.  A client that sends
//! nothing within the receive timeout, closes, or sends invalid UTF-8 is
//! dropped without being registered.
//!
//! # Stopping
//!
//! Setting the stop flag makes the loop exit within one accept timeout.
//! [`AcceptLoopHandle::stop`] sets it, joins the task, and returns the
//! transport so the caller can close the listening socket.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::application::client_registry::{ClientHandle, ClientId, ClientRegistry};
use crate::application::dispatcher::PacketChannel;
use crate::infrastructure::network::transport::{ClientConnection, PacketTransport};
use seip_core::ReceiveOutcome;

/// Notification invoked with `(id, name)` after a client is registered.
pub type ConnectionCallback = Arc<dyn Fn(ClientId, &str) + Send + Sync>;

/// Slot holding the optional connection callback; replaceable at any time.
pub type CallbackSlot = Arc<RwLock<Option<ConnectionCallback>>>;

/// Timing of the accept loop.
#[derive(Debug, Clone, Copy)]
pub struct AcceptorSettings {
    /// How long one `accept` waits before the stop flag is checked again.
    pub accept_timeout: Duration,
    /// Receive timeout given to every accepted connection; also bounds the
    /// wait for the handshake frame.
    pub receive_timeout: Duration,
}

/// Handle to a running accept loop.
pub struct AcceptLoopHandle {
    stop: Arc<AtomicBool>,
    task: JoinHandle<PacketTransport>,
}

impl AcceptLoopHandle {
    /// Signals the loop to stop and waits for it.
    ///
    /// Returns the transport so the listening socket can be closed, or
    /// `None` if the loop task panicked.
    pub async fn stop(self) -> Option<PacketTransport> {
        self.signal_stop();
        match self.task.await {
            Ok(transport) => Some(transport),
            Err(e) => {
                error!("accept loop task failed: {e}");
                None
            }
        }
    }

    /// Sets the stop flag without waiting for the loop to notice it.
    pub fn signal_stop(&self) {
        self.stop.store(true, Ordering::Release);
    }
}

/// Starts the accept loop on its own task.
pub fn spawn_accept_loop(
    transport: PacketTransport,
    registry: Arc<ClientRegistry<ClientConnection>>,
    callback: CallbackSlot,
    settings: AcceptorSettings,
) -> AcceptLoopHandle {
    let stop = Arc::new(AtomicBool::new(false));
    let task = tokio::spawn(run_accept_loop(
        transport,
        registry,
        callback,
        settings,
        Arc::clone(&stop),
    ));
    AcceptLoopHandle { stop, task }
}

async fn run_accept_loop(
    transport: PacketTransport,
    registry: Arc<ClientRegistry<ClientConnection>>,
    callback: CallbackSlot,
    settings: AcceptorSettings,
    stop: Arc<AtomicBool>,
) -> PacketTransport {
    info!("accept loop started");

    while !stop.load(Ordering::Acquire) {
        match transport
            .accept_connection(settings.accept_timeout, settings.receive_timeout)
            .await
        {
            Ok(Some(connection)) => {
                debug!("connection accepted from {}", connection.peer_addr());
                let registry = Arc::clone(&registry);
                let callback = Arc::clone(&callback);
                let stop = Arc::clone(&stop);
                tokio::spawn(async move {
                    handshake(connection, registry, callback, stop).await;
                });
            }
            // Nobody connected; loop back to check the stop flag.
            Ok(None) => {}
            Err(e) => {
                error!("connection with client failed: {e}; accept loop exits");
                break;
            }
        }
    }

    info!("accept loop stopped");
    transport
}

/// Reads the client's name and registers it.
async fn handshake(
    connection: ClientConnection,
    registry: Arc<ClientRegistry<ClientConnection>>,
    callback: CallbackSlot,
    stop: Arc<AtomicBool>,
) {
    let peer = connection.peer_addr();
    let outcome = {
        let mut turn = connection.turn().await;
        turn.receive_packet(connection.receive_timeout()).await
    };

    let name = match outcome {
        ReceiveOutcome::Packet(bytes) => match String::from_utf8(bytes) {
            Ok(name) => name,
            Err(_) => {
                warn!("handshake with {peer} failed: client name is not UTF-8");
                connection.shutdown().await;
                return;
            }
        },
        ReceiveOutcome::Warning | ReceiveOutcome::Error => {
            info!("handshake with client {peer} failed");
            connection.shutdown().await;
            return;
        }
    };

    if stop.load(Ordering::Acquire) {
        debug!("server stopping; dropping late handshake from {peer}");
        connection.shutdown().await;
        return;
    }

    let Some(handle) = register_unless_stopping(&registry, &stop, name, connection).await else {
        return;
    };
    info!("client connected [id:{}][name:{}]", handle.id(), handle.name());

    if let Some(notify) = callback.read().await.as_ref() {
        notify(handle.id(), handle.name());
    }
}

/// Adds the client, then rolls the registration back if the server began
/// stopping meanwhile.
///
/// Shutdown sets the stop flag before it snapshots the registry, so a client
/// added after that snapshot always sees the flag here and is closed instead
/// of outliving the server.
async fn register_unless_stopping(
    registry: &ClientRegistry<ClientConnection>,
    stop: &AtomicBool,
    name: String,
    connection: ClientConnection,
) -> Option<Arc<ClientHandle<ClientConnection>>> {
    let handle = registry.add(name, connection).await;
    if !stop.load(Ordering::Acquire) {
        return Some(handle);
    }

    debug!("server stopping; rolling back client {}", handle.id());
    if registry.remove(handle.id()).await.is_ok() {
        handle.connection().shutdown().await;
    }
    None
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::network::transport::TransportError;
    use seip_core::{write_frame, FrameLimits};
    use std::sync::Mutex as StdMutex;
    use tokio::net::TcpStream;

    const WAIT: Duration = Duration::from_secs(2);

    struct Fixture {
        handle: AcceptLoopHandle,
        registry: Arc<ClientRegistry<ClientConnection>>,
        addr: std::net::SocketAddr,
        seen: Arc<StdMutex<Vec<(ClientId, String)>>>,
    }

    async fn start() -> Fixture {
        let transport = PacketTransport::start_server("127.0.0.1", 0, FrameLimits::default())
            .await
            .unwrap();
        let addr = transport.local_addr().unwrap();
        let registry = Arc::new(ClientRegistry::new());
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let callback: ConnectionCallback = Arc::new(move |id: ClientId, name: &str| {
            sink.lock().unwrap().push((id, name.to_string()));
        });
        let handle = spawn_accept_loop(
            transport,
            Arc::clone(&registry),
            Arc::new(RwLock::new(Some(callback))),
            AcceptorSettings {
                accept_timeout: Duration::from_millis(20),
                receive_timeout: Duration::from_millis(300),
            },
        );
        Fixture {
            handle,
            registry,
            addr,
            seen,
        }
    }

    async fn connect_as(addr: std::net::SocketAddr, name: &[u8]) -> TcpStream {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        write_frame(&mut stream, name, &FrameLimits::default())
            .await
            .unwrap();
        stream
    }

    async fn wait_for_clients(registry: &ClientRegistry<ClientConnection>, n: usize) {
        tokio::time::timeout(WAIT, async {
            while registry.len().await < n {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("clients registered in time");
    }

    #[tokio::test]
    async fn test_handshake_registers_client_and_notifies_callback() {
        // Arrange
        let fx = start().await;

        // Act
        let _client = connect_as(fx.addr, b"cardA").await;
        wait_for_clients(&fx.registry, 1).await;

        // Assert
        assert_eq!(fx.registry.list().await, vec![(1, "cardA".to_string())]);
        assert_eq!(*fx.seen.lock().unwrap(), vec![(1, "cardA".to_string())]);
        fx.handle.stop().await;
    }

    #[tokio::test]
    async fn test_stalled_handshake_does_not_block_later_clients() {
        // Arrange: first client connects but never sends its name
        let fx = start().await;
        let _silent = TcpStream::connect(fx.addr).await.unwrap();

        // Act
        let _client = connect_as(fx.addr, b"cardB").await;
        wait_for_clients(&fx.registry, 1).await;

        // Assert
        assert_eq!(fx.registry.list().await[0].1, "cardB");
        fx.handle.stop().await;
    }

    #[tokio::test]
    async fn test_non_utf8_name_is_rejected() {
        let fx = start().await;

        let _bad = connect_as(fx.addr, &[0xFF, 0xFE, 0x00]).await;
        let _good = connect_as(fx.addr, b"ok").await;
        wait_for_clients(&fx.registry, 1).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(fx.registry.list().await, vec![(1, "ok".to_string())]);
        fx.handle.stop().await;
    }

    #[tokio::test]
    async fn test_stop_returns_the_transport_within_one_accept_timeout() {
        let fx = start().await;

        let transport = tokio::time::timeout(WAIT, fx.handle.stop()).await.unwrap();

        let mut transport = transport.expect("loop returned its transport");
        transport.close_server();
        assert!(TcpStream::connect(fx.addr).await.is_err());
    }

    #[tokio::test]
    async fn test_loop_exits_on_hard_accept_failure_and_returns_transport() {
        // Arrange: a transport whose listener is already gone
        let mut transport = PacketTransport::start_server("127.0.0.1", 0, FrameLimits::default())
            .await
            .unwrap();
        transport.close_server();

        // Act
        let AcceptLoopHandle { stop, task } = spawn_accept_loop(
            transport,
            Arc::new(ClientRegistry::new()),
            Arc::new(RwLock::new(None)),
            AcceptorSettings {
                accept_timeout: Duration::from_secs(60),
                receive_timeout: Duration::from_millis(300),
            },
        );
        let returned = tokio::time::timeout(WAIT, task)
            .await
            .expect("loop exited without being stopped")
            .unwrap();

        // Assert
        assert!(!stop.load(Ordering::Acquire));
        assert!(matches!(returned.local_addr(), Err(TransportError::NotListening)));
    }

    async fn accepted_pair() -> (ClientConnection, TcpStream) {
        let transport = PacketTransport::start_server("127.0.0.1", 0, FrameLimits::default())
            .await
            .unwrap();
        let peer = TcpStream::connect(transport.local_addr().unwrap()).await.unwrap();
        let connection = transport
            .accept_connection(WAIT, Duration::from_millis(300))
            .await
            .unwrap()
            .expect("pending connection accepted");
        (connection, peer)
    }

    #[tokio::test]
    async fn test_registration_is_kept_while_running() {
        let registry = ClientRegistry::new();
        let (connection, _peer) = accepted_pair().await;

        let handle = register_unless_stopping(&registry, &AtomicBool::new(false), "cardA".into(), connection).await;

        assert_eq!(handle.map(|h| h.id()), Some(1));
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_registration_racing_shutdown_is_rolled_back_and_closed() {
        // Arrange: the stop flag went up while the name frame was in flight
        let registry = ClientRegistry::new();
        let (connection, mut peer) = accepted_pair().await;
        let stopping = AtomicBool::new(true);

        // Act
        let handle = register_unless_stopping(&registry, &stopping, "late".into(), connection).await;

        // Assert
        assert!(handle.is_none());
        assert!(registry.is_empty().await);
        let mut buf = [0u8; 1];
        let read = tokio::time::timeout(WAIT, tokio::io::AsyncReadExt::read(&mut peer, &mut buf))
            .await
            .expect("peer sees the close")
            .unwrap();
        assert_eq!(read, 0);
    }
}
