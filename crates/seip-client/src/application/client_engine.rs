//! ClientEngine: turns one request packet into one response packet.
//!
//! The engine owns the terminal and the request registry.  It knows
//! nothing about sockets: the session hands it raw packet bytes and gets
//! back the response to send plus a flag saying whether to hang up.
//!
//! # Decision order
//!
//! 1. Unparsable request → KO, client layer, `ERR_INVALID_REQUEST`.
//! 2. `REQ_DISCONNECT` → OK, and the session stops after replying.
//! 3. No handler for the code → KO, client layer, `ERR_REQUEST_NOT_SUPPORTED`.
//! 4. Otherwise the handler's own response.

use std::sync::Arc;

use seip_core::{codes, ErrorLayer, RequestCode, RequestMessage, ResponsePacket};
use tracing::{debug, info, warn};

use crate::application::requests::RequestRegistry;
use crate::application::terminal::TerminalLayer;

/// What to do after handling one packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandledPacket {
    /// Response to send back to the server.
    pub response: ResponsePacket,
    /// `true` when the server asked the client to disconnect.
    pub disconnect: bool,
}

impl HandledPacket {
    fn reply(response: ResponsePacket) -> Self {
        Self {
            response,
            disconnect: false,
        }
    }
}

pub struct ClientEngine {
    terminal: Arc<dyn TerminalLayer>,
    requests: RequestRegistry,
}

impl ClientEngine {
    pub fn new(terminal: Arc<dyn TerminalLayer>, requests: RequestRegistry) -> Self {
        Self { terminal, requests }
    }

    /// Engine with every default handler registered.
    pub fn with_default_handlers(terminal: Arc<dyn TerminalLayer>) -> Self {
        Self::new(terminal, RequestRegistry::with_default_handlers())
    }

    /// Handles one packet received from the server.
    ///
    /// Always produces a response; the server is waiting for exactly one.
    pub fn handle_packet(&self, bytes: &[u8]) -> HandledPacket {
        let request = match RequestMessage::from_json(bytes) {
            Ok(request) => request,
            Err(e) => {
                warn!("invalid request received: {e}");
                return HandledPacket::reply(ResponsePacket::ko(
                    ErrorLayer::Client,
                    codes::ERR_INVALID_REQUEST,
                    "Error while parsing the request",
                ));
            }
        };

        debug!(
            "request received [{}][timeout:{}ms]",
            request.request, request.timeout
        );

        if request.request == RequestCode::Disconnect {
            info!("server asked to disconnect");
            return HandledPacket {
                response: ResponsePacket::ok(),
                disconnect: true,
            };
        }

        let Some(handler) = self.requests.get_request(request.request) else {
            warn!("request not supported: {}", request.request);
            return HandledPacket::reply(ResponsePacket::ko(
                ErrorLayer::Client,
                codes::ERR_REQUEST_NOT_SUPPORTED,
                format!("Request {} not supported", request.request),
            ));
        };

        HandledPacket::reply(handler.run(self.terminal.as_ref(), &request.data))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
