//! Server lifecycle state machine.
//!
//! ```text
//! Instancied ──init──► Initialized ──start_listening──► Started
//!                                                        │   ▲
//!                                       stop_all_clients │   │ start_listening
//!                                                        ▼   │
//!                                                     Disconnected
//! ```
//!
//! Each transition is a pure function from the current state to the next
//! one, so the rules can be tested without sockets.  The engine keeps the
//! current value behind its own lock and applies these functions to it.

use std::fmt;

use crate::application::errors::ServerError;

/// Lifecycle state of one server instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ServerState {
    /// Created, no configuration loaded yet.
    #[default]
    Instancied,
    /// Configuration loaded, not listening.
    Initialized,
    /// Listening and serving clients.
    Started,
    /// Stopped after having been started; may start again.
    Disconnected,
}

impl ServerState {
    /// `Instancied → Initialized`.  A server is initialized at most once.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::InvalidState`] from every other state.
    pub fn init(self) -> Result<ServerState, ServerError> {
        match self {
            ServerState::Instancied => Ok(ServerState::Initialized),
            _ => Err(ServerError::InvalidState("Server already initialized".into())),
        }
    }

    /// `Initialized | Disconnected → Started`.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::InvalidState`] from every other state.
    pub fn start_listening(self) -> Result<ServerState, ServerError> {
        match self {
            ServerState::Initialized | ServerState::Disconnected => Ok(ServerState::Started),
            _ => Err(ServerError::InvalidState("Server invalid state".into())),
        }
    }

    /// `Started → Disconnected`.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::InvalidState`] unless the server is started.
    pub fn stop(self) -> Result<ServerState, ServerError> {
        self.require_started()?;
        Ok(ServerState::Disconnected)
    }

    /// Precondition shared by every operation that talks to clients.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::InvalidState`] unless the server is started.
    pub fn require_started(self) -> Result<(), ServerError> {
        if self == ServerState::Started {
            Ok(())
        } else {
            Err(ServerError::InvalidState("Server must be started".into()))
        }
    }
}

impl fmt::Display for ServerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ServerState::Instancied => "INSTANCIED",
            ServerState::Initialized => "INITIALIZED",
            ServerState::Started => "STARTED",
            ServerState::Disconnected => "DISCONNECTED",
        })
    }
}
