//! Request and response message types exchanged between server and client.
//!
//! Both directions use JSON payloads inside length-prefixed frames.
//!
//! Server → client request:
//! ```json
//! {"request": 10, "data": "", "timeout": 2000}
//! ```
//!
//! Client → server response:
//! ```json
//! {"response": "KO", "err_terminal_code": -9, "err_terminal_description": "no field"}
//! ```
//!
//! On the wire a response carries four flat (code, description) pairs, one per
//! layer.  In memory the pairs are folded into a single optional
//! [`LayerError`]: at most one layer is ever at fault, and "no error" is the
//! absence of a value rather than four zeroed fields.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ── Errors ────────────────────────────────────────────────────────────────────

/// Errors that can occur while decoding a message.
#[derive(Debug, Error, PartialEq)]
pub enum ProtocolError {
    /// The request code integer is not one we know about.
    #[error("unknown request code: {0}")]
    UnknownRequestCode(u8),

    /// The response status is neither `"OK"` nor `"KO"`.
    #[error("unknown response status: {0:?}")]
    UnknownStatus(String),

    /// The payload is not valid JSON or does not have the expected shape.
    #[error("malformed JSON payload: {0}")]
    Json(String),
}

impl From<serde_json::Error> for ProtocolError {
    fn from(e: serde_json::Error) -> Self {
        ProtocolError::Json(e.to_string())
    }
}

// ── Request codes ─────────────────────────────────────────────────────────────

/// Operation the server asks a client to perform on its terminal.
///
/// Serialized as a plain JSON integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
#[repr(u8)]
pub enum RequestCode {
    Diag = 1,
    Disconnect = 2,
    Echo = 3,
    Command = 4,
    ColdReset = 5,
    WarmReset = 6,
    PowerOffField = 7,
    PowerOnField = 8,
    PollTypeA = 9,
    PollTypeB = 10,
    PollTypeF = 11,
    RestartTarget = 12,
}

impl RequestCode {
    /// Every request code, in wire order.
    pub const ALL: [RequestCode; 12] = [
        RequestCode::Diag,
        RequestCode::Disconnect,
        RequestCode::Echo,
        RequestCode::Command,
        RequestCode::ColdReset,
        RequestCode::WarmReset,
        RequestCode::PowerOffField,
        RequestCode::PowerOnField,
        RequestCode::PollTypeA,
        RequestCode::PollTypeB,
        RequestCode::PollTypeF,
        RequestCode::RestartTarget,
    ];

    /// Stable upper-case name used in log lines.
    pub fn name(self) -> &'static str {
        match self {
            RequestCode::Diag => "REQ_DIAG",
            RequestCode::Disconnect => "REQ_DISCONNECT",
            RequestCode::Echo => "REQ_ECHO",
            RequestCode::Command => "REQ_COMMAND",
            RequestCode::ColdReset => "REQ_COLD_RESET",
            RequestCode::WarmReset => "REQ_WARM_RESET",
            RequestCode::PowerOffField => "REQ_POWER_OFF_FIELD",
            RequestCode::PowerOnField => "REQ_POWER_ON_FIELD",
            RequestCode::PollTypeA => "REQ_POLL_TYPE_A",
            RequestCode::PollTypeB => "REQ_POLL_TYPE_B",
            RequestCode::PollTypeF => "REQ_POLL_TYPE_F",
            RequestCode::RestartTarget => "REQ_RESTART_TARGET",
        }
    }
}

impl fmt::Display for RequestCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl From<RequestCode> for u8 {
    fn from(code: RequestCode) -> Self {
        code as u8
    }
}

impl TryFrom<u8> for RequestCode {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        RequestCode::ALL
            .into_iter()
            .find(|code| *code as u8 == value)
            .ok_or(ProtocolError::UnknownRequestCode(value))
    }
}

// ── Request message ───────────────────────────────────────────────────────────

/// One request sent from the server to a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestMessage {
    pub request: RequestCode,
    /// Opaque command body, e.g. a hex APDU for [`RequestCode::Command`].
    #[serde(default)]
    pub data: String,
    /// Caller budget in milliseconds, passed along as a hint.
    #[serde(default)]
    pub timeout: u64,
}

impl RequestMessage {
    pub fn new(request: RequestCode, data: impl Into<String>, timeout_ms: u64) -> Self {
        Self {
            request,
            data: data.into(),
            timeout: timeout_ms,
        }
    }

    /// Serializes the request to its JSON wire form.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Json`] if serialization fails.
    pub fn to_json(&self) -> Result<Vec<u8>, ProtocolError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Parses a request from its JSON wire form.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Json`] for malformed JSON or an unknown code.
    pub fn from_json(bytes: &[u8]) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

// ── Response packet ───────────────────────────────────────────────────────────

/// Overall outcome of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    #[serde(rename = "OK")]
    Ok,
    #[serde(rename = "KO")]
    Ko,
}

impl Status {
    pub fn as_str(self) -> &'static str {
        match self {
            Status::Ok => "OK",
            Status::Ko => "KO",
        }
    }
}

/// Layer of the stack that a failure is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorLayer {
    Server,
    Client,
    Terminal,
    Card,
}

impl fmt::Display for ErrorLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ErrorLayer::Server => "server",
            ErrorLayer::Client => "client",
            ErrorLayer::Terminal => "terminal",
            ErrorLayer::Card => "card",
        })
    }
}

/// A failure attributed to exactly one layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerError {
    pub layer: ErrorLayer,
    pub code: i32,
    pub description: String,
}

impl fmt::Display for LayerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} error {}: {}", self.layer, self.code, self.description)
    }
}

/// The uniform result value of every operation on the server surface and of
/// every request served by a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "WireResponse", into = "WireResponse")]
pub struct ResponsePacket {
    pub status: Status,
    /// Payload of a successful command (hex APDU response, client list, ...).
    pub data: Option<String>,
    pub error: Option<LayerError>,
}

impl ResponsePacket {
    /// A bare `OK`.
    pub fn ok() -> Self {
        Self {
            status: Status::Ok,
            data: None,
            error: None,
        }
    }

    /// An `OK` carrying a payload.
    pub fn ok_with_data(data: impl Into<String>) -> Self {
        Self {
            status: Status::Ok,
            data: Some(data.into()),
            error: None,
        }
    }

    /// A `KO` attributed to `layer`.
    pub fn ko(layer: ErrorLayer, code: i32, description: impl Into<String>) -> Self {
        Self {
            status: Status::Ko,
            data: None,
            error: Some(LayerError {
                layer,
                code,
                description: description.into(),
            }),
        }
    }

    /// `true` when the status is OK and no layer reported an error.
    pub fn is_ok(&self) -> bool {
        self.status == Status::Ok && self.error.is_none()
    }

    /// Error code of the given layer, if that layer is at fault.
    pub fn error_code(&self, layer: ErrorLayer) -> Option<i32> {
        self.error
            .as_ref()
            .filter(|e| e.layer == layer)
            .map(|e| e.code)
    }

    /// Serializes the response to its JSON wire form.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Json`] if serialization fails.
    pub fn to_json(&self) -> Result<Vec<u8>, ProtocolError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Parses a response from its JSON wire form.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Json`] if the payload is not a response object.
    pub fn from_json(bytes: &[u8]) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

impl fmt::Display for ResponsePacket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.status.as_str())?;
        if let Some(data) = &self.data {
            write!(f, " data={data}")?;
        }
        if let Some(error) = &self.error {
            write!(f, " ({error})")?;
        }
        Ok(())
    }
}

// ── Wire form ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct WireResponse {
    response: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    data: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    err_server_code: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    err_server_description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    err_client_code: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    err_client_description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    err_terminal_code: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    err_terminal_description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    err_card_code: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    err_card_description: Option<String>,
}

/// A pair counts as populated when it has a non-zero code or a non-empty
/// description; peers that always emit all eight fields send `0` / `""`.
fn populated(layer: ErrorLayer, code: Option<i32>, description: Option<String>) -> Option<LayerError> {
    let code = code.unwrap_or(0);
    let description = description.unwrap_or_default();
    if code == 0 && description.is_empty() {
        return None;
    }
    Some(LayerError {
        layer,
        code,
        description,
    })
}

impl TryFrom<WireResponse> for ResponsePacket {
    type Error = ProtocolError;

    fn try_from(wire: WireResponse) -> Result<Self, Self::Error> {
        let status = match wire.response.as_str() {
            "OK" => Status::Ok,
            "KO" => Status::Ko,
            _ => return Err(ProtocolError::UnknownStatus(wire.response)),
        };

        // First populated layer wins, in server → client → terminal → card order.
        let error = populated(ErrorLayer::Server, wire.err_server_code, wire.err_server_description)
            .or_else(|| populated(ErrorLayer::Client, wire.err_client_code, wire.err_client_description))
            .or_else(|| {
                populated(
                    ErrorLayer::Terminal,
                    wire.err_terminal_code,
                    wire.err_terminal_description,
                )
            })
            .or_else(|| populated(ErrorLayer::Card, wire.err_card_code, wire.err_card_description));

        Ok(ResponsePacket {
            status,
            data: wire.data,
            error,
        })
    }
}

impl From<ResponsePacket> for WireResponse {
    fn from(packet: ResponsePacket) -> Self {
        let mut wire = WireResponse {
            response: packet.status.as_str().to_string(),
            data: packet.data,
            ..WireResponse::default()
        };
        if let Some(LayerError {
            layer,
            code,
            description,
        }) = packet.error
        {
            let (code_slot, description_slot) = match layer {
                ErrorLayer::Server => (&mut wire.err_server_code, &mut wire.err_server_description),
                ErrorLayer::Client => (&mut wire.err_client_code, &mut wire.err_client_description),
                ErrorLayer::Terminal => {
                    (&mut wire.err_terminal_code, &mut wire.err_terminal_description)
                }
                ErrorLayer::Card => (&mut wire.err_card_code, &mut wire.err_card_description),
            };
            *code_slot = Some(code);
            *description_slot = Some(description);
        }
        wire
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
