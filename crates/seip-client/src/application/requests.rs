//! Request registry: maps each request code to its shared handler.
//!
//! Handlers are stateless, so one instance per code is created when the
//! registry is built and every matching request reuses it.  The registry
//! itself is immutable once the [`ClientEngine`](super::client_engine::ClientEngine)
//! owns it, which is why a plain `HashMap` is enough here.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;

use seip_core::{RequestCode, ResponsePacket};

use crate::application::handlers;
use crate::application::terminal::TerminalLayer;

/// One operation the client knows how to serve.
pub trait RequestHandler: Send + Sync {
    /// Runs the request against `terminal`.
    ///
    /// `data` is the request's opaque payload (empty for most codes).  Every
    /// failure is reported through the returned packet; a handler never
    /// panics or returns early without a response.
    fn run(&self, terminal: &dyn TerminalLayer, data: &str) -> ResponsePacket;
}

/// Request code → handler lookup.
#[derive(Default)]
pub struct RequestRegistry {
    handlers: HashMap<RequestCode, Arc<dyn RequestHandler>>,
}

impl RequestRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry serving every request code except
    /// [`RequestCode::Disconnect`], which the engine handles itself.
    pub fn with_default_handlers() -> Self {
        let mut registry = Self::new();
        registry.add_request(RequestCode::Diag, Arc::new(handlers::Diag));
        registry.add_request(RequestCode::Echo, Arc::new(handlers::Echo));
        registry.add_request(RequestCode::Command, Arc::new(handlers::Command));
        registry.add_request(RequestCode::ColdReset, Arc::new(handlers::ColdReset));
        registry.add_request(RequestCode::WarmReset, Arc::new(handlers::WarmReset));
        registry.add_request(RequestCode::PowerOffField, Arc::new(handlers::PowerOffField));
        registry.add_request(RequestCode::PowerOnField, Arc::new(handlers::PowerOnField));
        registry.add_request(RequestCode::PollTypeA, Arc::new(handlers::PollTypeA));
        registry.add_request(RequestCode::PollTypeB, Arc::new(handlers::PollTypeB));
        registry.add_request(RequestCode::PollTypeF, Arc::new(handlers::PollTypeF));
        registry.add_request(RequestCode::RestartTarget, Arc::new(handlers::RestartTarget));
        registry
    }

    /// Registers `handler` for `code`.
    ///
    /// Returns `false` and leaves the registry unchanged if `code` already
    /// has a handler.
    pub fn add_request(&mut self, code: RequestCode, handler: Arc<dyn RequestHandler>) -> bool {
        match self.handlers.entry(code) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(handler);
                true
            }
        }
    }

    /// Returns the shared handler for `code`, if one is registered.
    pub fn get_request(&self, code: RequestCode) -> Option<Arc<dyn RequestHandler>> {
        self.handlers.get(&code).map(Arc::clone)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
