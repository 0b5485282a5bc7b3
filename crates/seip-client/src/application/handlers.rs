//! Request handlers, one per request code.
//!
//! Each handler is a unit struct: it holds no state, so a single instance
//! is shared by every request with the same code.  Byte payloads (APDUs,
//! ATRs, card identifiers) travel as uppercase hex in the response `data`
//! field.

use seip_core::{codes, hex, ErrorLayer, ResponsePacket};
use tracing::debug;

use crate::application::requests::RequestHandler;
use crate::application::terminal::{TerminalError, TerminalLayer};

/// Wraps a byte-returning terminal call into a response.
fn bytes_reply(result: Result<Vec<u8>, TerminalError>) -> ResponsePacket {
    match result {
        Ok(bytes) => ResponsePacket::ok_with_data(hex::encode(&bytes)),
        Err(e) => e.into(),
    }
}

fn unit_reply(result: Result<(), TerminalError>) -> ResponsePacket {
    match result {
        Ok(()) => ResponsePacket::ok(),
        Err(e) => e.into(),
    }
}

/// `REQ_DIAG`: describes the terminal.
pub struct Diag;

impl RequestHandler for Diag {
    fn run(&self, terminal: &dyn TerminalLayer, _data: &str) -> ResponsePacket {
        match terminal.diag() {
            Ok(description) => ResponsePacket::ok_with_data(description),
            Err(e) => e.into(),
        }
    }
}

/// `REQ_ECHO`: returns the request data unchanged without touching the terminal.
pub struct Echo;

impl RequestHandler for Echo {
    fn run(&self, _terminal: &dyn TerminalLayer, data: &str) -> ResponsePacket {
        ResponsePacket::ok_with_data(data)
    }
}

/// `REQ_COMMAND`: sends the hex APDU in `data` to the card.
pub struct Command;

impl RequestHandler for Command {
    fn run(&self, terminal: &dyn TerminalLayer, data: &str) -> ResponsePacket {
        let apdu = match hex::decode(data) {
            Ok(apdu) if !apdu.is_empty() => apdu,
            Ok(_) => {
                return ResponsePacket::ko(
                    ErrorLayer::Client,
                    codes::ERR_INVALID_REQUEST,
                    "Command request carries no APDU",
                )
            }
            Err(e) => {
                return ResponsePacket::ko(
                    ErrorLayer::Client,
                    codes::ERR_INVALID_REQUEST,
                    format!("Command data is not valid hex: {e}"),
                )
            }
        };
        debug!("sending {}-byte APDU to the card", apdu.len());
        bytes_reply(terminal.send_command(&apdu))
    }
}

/// `REQ_COLD_RESET`: returns the ATR as hex.
pub struct ColdReset;

impl RequestHandler for ColdReset {
    fn run(&self, terminal: &dyn TerminalLayer, _data: &str) -> ResponsePacket {
        bytes_reply(terminal.cold_reset())
    }
}

/// `REQ_WARM_RESET`: returns the ATR as hex.
pub struct WarmReset;

impl RequestHandler for WarmReset {
    fn run(&self, terminal: &dyn TerminalLayer, _data: &str) -> ResponsePacket {
        bytes_reply(terminal.warm_reset())
    }
}

pub struct PowerOffField;

impl RequestHandler for PowerOffField {
    fn run(&self, terminal: &dyn TerminalLayer, _data: &str) -> ResponsePacket {
        unit_reply(terminal.power_off_field())
    }
}

pub struct PowerOnField;

impl RequestHandler for PowerOnField {
    fn run(&self, terminal: &dyn TerminalLayer, _data: &str) -> ResponsePacket {
        unit_reply(terminal.power_on_field())
    }
}

/// `REQ_POLL_TYPE_A`: returns the UID of the card in the field.
pub struct PollTypeA;

impl RequestHandler for PollTypeA {
    fn run(&self, terminal: &dyn TerminalLayer, _data: &str) -> ResponsePacket {
        bytes_reply(terminal.poll_type_a())
    }
}

/// `REQ_POLL_TYPE_B`: returns the PUPI of the card in the field.
pub struct PollTypeB;

impl RequestHandler for PollTypeB {
    fn run(&self, terminal: &dyn TerminalLayer, _data: &str) -> ResponsePacket {
        bytes_reply(terminal.poll_type_b())
    }
}

/// `REQ_POLL_TYPE_F`: returns the IDm of the card in the field.
pub struct PollTypeF;

impl RequestHandler for PollTypeF {
    fn run(&self, terminal: &dyn TerminalLayer, _data: &str) -> ResponsePacket {
        bytes_reply(terminal.poll_type_f())
    }
}

pub struct RestartTarget;

impl RequestHandler for RestartTarget {
    fn run(&self, terminal: &dyn TerminalLayer, _data: &str) -> ResponsePacket {
        unit_reply(terminal.restart_target())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
