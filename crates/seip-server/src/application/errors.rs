//! Server error taxonomy.
//!
//! Errors never cross the operational surface as Rust errors.  Every public
//! [`crate::ServerEngine`] operation converts its failure into a KO
//! [`ResponsePacket`] through the `From<ServerError>` impl below, so the test
//! harness always receives one uniform value carrying the failing layer, a
//! numeric code, and a description.

use std::time::Duration;

use seip_core::{codes, ErrorLayer, ResponsePacket};
use thiserror::Error;

use crate::application::client_registry::ClientId;

/// Every way a server operation can fail.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ServerError {
    /// A lifecycle precondition was violated.
    #[error("{0}")]
    InvalidState(String),

    /// Any socket-level failure.
    #[error("{0}")]
    Network(String),

    /// The caller's budget elapsed before the client answered.
    #[error("Request time elapsed after {} ms", .0.as_millis())]
    Timeout(Duration),

    /// The target client id is not registered.
    #[error("Client {0} closed or not found")]
    ClientClosed(ClientId),

    /// The client answered with something that is not a response packet.
    #[error("Error while parsing the response: {0}")]
    MalformedResponse(String),

    /// The configuration source could not be loaded.
    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl ServerError {
    /// Stable numeric code for this error.
    pub fn code(&self) -> i32 {
        match self {
            ServerError::InvalidState(_) => codes::ERR_INVALID_STATE,
            ServerError::Network(_) => codes::ERR_NETWORK,
            ServerError::Timeout(_) => codes::ERR_TIMEOUT,
            ServerError::ClientClosed(_) => codes::ERR_CLIENT_CLOSED,
            ServerError::MalformedResponse(_) => codes::ERR_JSON_PARSING,
            ServerError::Config(_) => codes::ERR_INVALID_CONFIG,
        }
    }

    /// Layer the failure is attributed to.
    ///
    /// An unparsable answer is the client's fault; everything else happened
    /// on the server side.
    pub fn layer(&self) -> ErrorLayer {
        match self {
            ServerError::MalformedResponse(_) => ErrorLayer::Client,
            _ => ErrorLayer::Server,
        }
    }
}

impl From<ServerError> for ResponsePacket {
    fn from(err: ServerError) -> Self {
        ResponsePacket::ko(err.layer(), err.code(), err.to_string())
    }
}
