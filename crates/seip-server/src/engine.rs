//! ServerEngine: the operational surface driven by the test harness.
//!
//! The engine composes the pieces of the server and enforces the lifecycle
//! rules before delegating to them:
//!
//! ```text
//! ServerEngine
//!  ├─ state / config / accept loop      (behind one Mutex, see below)
//!  ├─ ClientRegistry<ClientConnection>  (shared with the accept loop)
//!  ├─ RequestDispatcher                 (created by init from the config)
//!  └─ connection callback slot          (shared with handshake tasks)
//! ```
//!
//! Every public operation returns a [`ResponsePacket`]; failures are
//! [`ServerError`]s converted at the boundary, never panics.
//!
//! # Locking (for beginners)
//!
//! The lifecycle fields sit behind a `tokio::sync::Mutex`.  Request-style
//! operations lock it only long enough to check that the server is started
//! and to clone the dispatcher, so requests to different clients still run
//! in parallel.  `stop_all_clients` keeps it locked for the whole shutdown,
//! which makes any concurrent operation wait and then observe
//! `Disconnected`.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use seip_core::{RequestCode, ResponsePacket};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info};

use crate::application::client_registry::{format_client_list, ClientId, ClientRegistry};
use crate::application::dispatcher::{DispatchSettings, RequestDispatcher};
use crate::application::errors::ServerError;
use crate::application::lifecycle::ServerState;
use crate::infrastructure::network::acceptor::{
    spawn_accept_loop, AcceptLoopHandle, AcceptorSettings, CallbackSlot,
};
use crate::infrastructure::network::transport::{ClientConnection, PacketTransport};
use crate::infrastructure::storage::config::{load_config, ServerConfig};

type Dispatcher = RequestDispatcher<ClientConnection>;

/// What request-style operations need once the server is started.
#[derive(Clone)]
struct Context {
    dispatcher: Arc<Dispatcher>,
    disconnect_timeout: Duration,
}

#[derive(Default)]
struct EngineInner {
    state: ServerState,
    config: ServerConfig,
    dispatcher: Option<Arc<Dispatcher>>,
    accept_loop: Option<AcceptLoopHandle>,
    local_addr: Option<SocketAddr>,
}

impl EngineInner {
    fn context(&self) -> Result<Context, ServerError> {
        self.state.require_started()?;
        let dispatcher = self
            .dispatcher
            .clone()
            .ok_or_else(|| ServerError::InvalidState("Server not initialized".into()))?;
        Ok(Context {
            dispatcher,
            disconnect_timeout: self.config.disconnect_timeout(),
        })
    }
}

/// One SE IP connector server instance.
#[derive(Default)]
pub struct ServerEngine {
    inner: Mutex<EngineInner>,
    registry: Arc<ClientRegistry<ClientConnection>>,
    callback: CallbackSlot,
}

fn respond(result: Result<ResponsePacket, ServerError>) -> ResponsePacket {
    result.unwrap_or_else(ResponsePacket::from)
}

impl ServerEngine {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Lifecycle ─────────────────────────────────────────────────────────────

    /// Loads the configuration from a file path or inline JSON.
    ///
    /// Allowed once, from `Instancied`.  A configuration that fails to load
    /// leaves the server `Instancied` so the caller can try again.
    pub async fn init(&self, config: &str) -> ResponsePacket {
        respond(self.try_init(load_config(config).map_err(|e| ServerError::Config(e.to_string()))).await)
    }

    /// Same as [`Self::init`] with an already built configuration.
    pub async fn init_with_config(&self, config: ServerConfig) -> ResponsePacket {
        let checked = config
            .validate()
            .map(|()| config)
            .map_err(|e| ServerError::Config(e.to_string()));
        respond(self.try_init(checked).await)
    }

    async fn try_init(&self, config: Result<ServerConfig, ServerError>) -> Result<ResponsePacket, ServerError> {
        let mut inner = self.inner.lock().await;
        let next = inner.state.init()?;
        let config = config?;

        inner.dispatcher = Some(Arc::new(RequestDispatcher::new(DispatchSettings {
            socket_timeout: config.socket_timeout(),
            response_margin: config.response_margin(),
            max_pending: config.max_pending_exchanges,
        })));
        debug!("server configuration: {config:?}");
        inner.config = config;
        inner.state = next;
        info!("server initialized");
        Ok(ResponsePacket::ok())
    }

    /// Binds `ip:port` and starts accepting clients.
    pub async fn start_listening(&self, ip: &str, port: u16) -> ResponsePacket {
        respond(self.try_start_listening(ip, port).await)
    }

    async fn try_start_listening(&self, ip: &str, port: u16) -> Result<ResponsePacket, ServerError> {
        let mut inner = self.inner.lock().await;
        let next = inner.state.start_listening()?;

        let transport = PacketTransport::start_server(ip, port, inner.config.frame_limits())
            .await
            .map_err(|e| {
                error!("failed to start server on {ip}:{port}: {e}");
                ServerError::Network(format!("Failed to start server: {e}"))
            })?;
        let local = transport
            .local_addr()
            .map_err(|e| ServerError::Network(format!("Failed to start server: {e}")))?;

        inner.accept_loop = Some(spawn_accept_loop(
            transport,
            Arc::clone(&self.registry),
            Arc::clone(&self.callback),
            AcceptorSettings {
                accept_timeout: inner.config.accept_timeout(),
                receive_timeout: inner.config.socket_timeout(),
            },
        ));
        inner.local_addr = Some(local);
        inner.state = next;
        info!("start listening on {local}");
        Ok(ResponsePacket::ok())
    }

    /// Stops accepting, closes the listener, and disconnects every client.
    pub async fn stop_all_clients(&self) -> ResponsePacket {
        respond(self.try_stop_all_clients().await)
    }

    async fn try_stop_all_clients(&self) -> Result<ResponsePacket, ServerError> {
        let mut inner = self.inner.lock().await;
        let context = inner.context()?;
        let next = inner.state.stop()?;

        if let Some(accept_loop) = inner.accept_loop.take() {
            if let Some(mut transport) = accept_loop.stop().await {
                transport.close_server();
            }
        }

        // Notices go out concurrently so silent clients cost one
        // disconnect timeout in total, not one each.
        let ids = self.registry.ids().await;
        let outcomes = join_all(ids.iter().map(|&id| self.disconnect(&context, id))).await;
        for (id, outcome) in ids.into_iter().zip(outcomes) {
            if let Err(e) = outcome {
                debug!("client {id} already gone during shutdown: {e}");
            }
        }

        inner.state = next;
        inner.local_addr = None;
        let still_running = context.dispatcher.sweep().await;
        info!("all clients stopped; {still_running} orphaned exchange(s) still finishing");
        Ok(ResponsePacket::ok())
    }

    // ── Client operations ─────────────────────────────────────────────────────

    /// Sends one request to a client and waits at most `timeout` for the
    /// answer.  The client's own response packet is returned as is.
    pub async fn handle_request(
        &self,
        client_id: ClientId,
        code: RequestCode,
        expect_response: bool,
        timeout: Duration,
        data: &str,
    ) -> ResponsePacket {
        respond(
            self.try_handle_request(client_id, code, expect_response, timeout, data)
                .await,
        )
    }

    async fn try_handle_request(
        &self,
        client_id: ClientId,
        code: RequestCode,
        expect_response: bool,
        timeout: Duration,
        data: &str,
    ) -> Result<ResponsePacket, ServerError> {
        let context = self.context().await?;
        let handle = self.registry.lookup(client_id).await.map_err(|_| {
            debug!("failed to retrieve client [id:{client_id}][request:{code}]");
            ServerError::ClientClosed(client_id)
        })?;
        context
            .dispatcher
            .dispatch(handle, code, expect_response, timeout, data)
            .await
    }

    /// Lists connected clients as `"<count>|<id>|<name>|..."` in the `data`
    /// field of an OK response.
    pub async fn list_clients(&self) -> ResponsePacket {
        respond(self.try_list_clients().await)
    }

    async fn try_list_clients(&self) -> Result<ResponsePacket, ServerError> {
        self.context().await?;
        let entries = self.registry.list().await;
        Ok(ResponsePacket::ok_with_data(format_client_list(&entries)))
    }

    /// Tells a client to disconnect, then closes and forgets it.
    pub async fn stop_client(&self, client_id: ClientId) -> ResponsePacket {
        respond(self.try_stop_client(client_id).await)
    }

    async fn try_stop_client(&self, client_id: ClientId) -> Result<ResponsePacket, ServerError> {
        let context = self.context().await?;
        self.disconnect(&context, client_id).await
    }

    async fn disconnect(&self, context: &Context, client_id: ClientId) -> Result<ResponsePacket, ServerError> {
        let handle = self.registry.lookup(client_id).await.map_err(|_| {
            debug!("failed to retrieve client [id:{client_id}]");
            ServerError::ClientClosed(client_id)
        })?;

        // The reply only tells us the client heard us; either way it goes.
        let notice = context
            .dispatcher
            .dispatch(
                Arc::clone(&handle),
                RequestCode::Disconnect,
                false,
                context.disconnect_timeout,
                "",
            )
            .await;
        if let Err(e) = notice {
            debug!("disconnect notice to client {client_id} not acknowledged: {e}");
        }

        self.registry
            .remove(client_id)
            .await
            .map_err(|_| ServerError::ClientClosed(client_id))?;
        handle.connection().shutdown().await;
        info!("client stopped [id:{}][name:{}]", client_id, handle.name());
        Ok(ResponsePacket::ok())
    }

    // ── Observers ─────────────────────────────────────────────────────────────

    /// Registers the function called with `(id, name)` for every new client.
    /// Replaces any previously registered callback.
    pub async fn set_connection_callback<F>(&self, callback: F)
    where
        F: Fn(ClientId, &str) + Send + Sync + 'static,
    {
        *self.callback.write().await = Some(Arc::new(callback));
    }

    /// Address the listener is bound to, while started.
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.inner.lock().await.local_addr
    }

    pub async fn state(&self) -> ServerState {
        self.inner.lock().await.state
    }

    /// Number of orphaned exchanges still running.
    pub async fn pending_exchanges(&self) -> usize {
        let dispatcher = self.inner.lock().await.dispatcher.clone();
        match dispatcher {
            Some(dispatcher) => dispatcher.sweep().await,
            None => 0,
        }
    }

    async fn context(&self) -> Result<Context, ServerError> {
        self.inner.lock().await.context()
    }
}

impl Drop for ServerEngine {
    fn drop(&mut self) {
        if let Some(accept_loop) = self.inner.get_mut().accept_loop.as_ref() {
            accept_loop.signal_stop();
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use seip_core::{codes, ErrorLayer};

    fn server_code(packet: &ResponsePacket) -> Option<i32> {
        packet.error_code(ErrorLayer::Server)
    }

    #[tokio::test]
    async fn test_operations_before_start_are_invalid_state() {
        // Arrange
        let engine = ServerEngine::new();

        // Act
        let request = engine
            .handle_request(1, RequestCode::Diag, true, Duration::from_millis(100), "")
            .await;
        let list = engine.list_clients().await;
        let stop = engine.stop_client(1).await;
        let stop_all = engine.stop_all_clients().await;

        // Assert
        for packet in [request, list, stop, stop_all] {
            assert_eq!(server_code(&packet), Some(codes::ERR_INVALID_STATE));
        }
    }

    #[tokio::test]
    async fn test_start_listening_before_init_is_invalid_state() {
        let engine = ServerEngine::new();

        let packet = engine.start_listening("127.0.0.1", 0).await;

        assert_eq!(server_code(&packet), Some(codes::ERR_INVALID_STATE));
        assert_eq!(engine.state().await, ServerState::Instancied);
        assert!(engine.local_addr().await.is_none());
    }

    #[tokio::test]
    async fn test_init_twice_is_invalid_state() {
        let engine = ServerEngine::new();

        assert!(engine.init("{}").await.is_ok());
        let second = engine.init("{}").await;

        assert_eq!(server_code(&second), Some(codes::ERR_INVALID_STATE));
        assert_eq!(engine.state().await, ServerState::Initialized);
    }

    #[tokio::test]
    async fn test_bad_config_keeps_server_instancied() {
        let engine = ServerEngine::new();

        let packet = engine.init("/nonexistent/seip/server.toml").await;

        assert_eq!(server_code(&packet), Some(codes::ERR_INVALID_CONFIG));
        assert_eq!(engine.state().await, ServerState::Instancied);
        assert!(engine.init(r#"{"timeout": 100}"#).await.is_ok());
    }

    #[tokio::test]
    async fn test_invalid_config_struct_is_rejected() {
        let engine = ServerEngine::new();
        let config = ServerConfig {
            max_packet_size: 0,
            ..ServerConfig::default()
        };

        let packet = engine.init_with_config(config).await;

        assert_eq!(server_code(&packet), Some(codes::ERR_INVALID_CONFIG));
    }

    #[tokio::test]
    async fn test_bad_listen_address_is_network_error() {
        let engine = ServerEngine::new();
        engine.init("{}").await;

        let packet = engine.start_listening("999.1.1.1", 0).await;

        assert_eq!(server_code(&packet), Some(codes::ERR_NETWORK));
        assert_eq!(engine.state().await, ServerState::Initialized);
    }

    #[tokio::test]
    async fn test_start_stop_restart_cycle() {
        // Arrange
        let engine = ServerEngine::new();
        engine.init("{}").await;

        // Act / Assert
        assert!(engine.start_listening("127.0.0.1", 0).await.is_ok());
        assert!(engine.local_addr().await.is_some());
        let second_start = engine.start_listening("127.0.0.1", 0).await;
        assert_eq!(server_code(&second_start), Some(codes::ERR_INVALID_STATE));

        assert!(engine.stop_all_clients().await.is_ok());
        assert_eq!(engine.state().await, ServerState::Disconnected);
        assert!(engine.local_addr().await.is_none());

        assert!(engine.start_listening("127.0.0.1", 0).await.is_ok());
        assert_eq!(engine.state().await, ServerState::Started);
        assert!(engine.stop_all_clients().await.is_ok());
    }

    #[tokio::test]
    async fn test_unknown_client_is_client_closed() {
        let engine = ServerEngine::new();
        engine.init("{}").await;
        engine.start_listening("127.0.0.1", 0).await;

        let request = engine
            .handle_request(9, RequestCode::PollTypeB, true, Duration::from_millis(100), "")
            .await;
        let stop = engine.stop_client(9).await;

        assert_eq!(server_code(&request), Some(codes::ERR_CLIENT_CLOSED));
        assert_eq!(server_code(&stop), Some(codes::ERR_CLIENT_CLOSED));
        assert_eq!(engine.pending_exchanges().await, 0);
        engine.stop_all_clients().await;
    }

    #[tokio::test]
    async fn test_list_clients_on_empty_server() {
        let engine = ServerEngine::new();
        engine.init("{}").await;
        engine.start_listening("127.0.0.1", 0).await;

        let packet = engine.list_clients().await;

        assert!(packet.is_ok());
        assert_eq!(packet.data.as_deref(), Some("0"));
        engine.stop_all_clients().await;
    }
}
