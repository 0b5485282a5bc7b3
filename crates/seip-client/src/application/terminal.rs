//! TerminalLayer: the client's view of a contactless terminal.
//!
//! Handlers call into this trait and never into a driver directly.  The
//! binary plugs in a [`SimulatedTerminal`](crate::infrastructure::terminal::SimulatedTerminal);
//! unit tests use the `mockall`-generated `MockTerminalLayer`.
//!
//! # Two failure layers
//!
//! A failure is either the terminal's fault (reader unplugged, RF field
//! off) or the card's fault (no card in the field, card rejected the
//! APDU).  [`TerminalError`] keeps the two apart so the server can report
//! the failing layer to the test harness.

use seip_core::{codes, ErrorLayer, ResponsePacket};
use thiserror::Error;

/// Error type for terminal operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TerminalError {
    #[error("terminal error: {0}")]
    Terminal(String),
    #[error("card error: {0}")]
    Card(String),
}

impl From<TerminalError> for ResponsePacket {
    fn from(err: TerminalError) -> Self {
        match err {
            TerminalError::Terminal(description) => {
                ResponsePacket::ko(ErrorLayer::Terminal, codes::ERR_TERMINAL, description)
            }
            TerminalError::Card(description) => {
                ResponsePacket::ko(ErrorLayer::Card, codes::ERR_CARD, description)
            }
        }
    }
}

/// Operations a terminal supports.
///
/// Implementations are shared between the session task and blocking worker
/// threads, so they must be `Send + Sync`.
#[cfg_attr(test, mockall::automock)]
pub trait TerminalLayer: Send + Sync {
    /// Returns a human-readable description of the terminal and its state.
    fn diag(&self) -> Result<String, TerminalError>;

    /// Sends one APDU to the card and returns the card's response APDU.
    fn send_command(&self, apdu: &[u8]) -> Result<Vec<u8>, TerminalError>;

    /// Power-cycles the card and returns its ATR.
    fn cold_reset(&self) -> Result<Vec<u8>, TerminalError>;

    /// Resets the card without removing power and returns its ATR.
    fn warm_reset(&self) -> Result<Vec<u8>, TerminalError>;

    fn power_off_field(&self) -> Result<(), TerminalError>;

    fn power_on_field(&self) -> Result<(), TerminalError>;

    /// Polls for an ISO 14443 type A card and returns its UID.
    fn poll_type_a(&self) -> Result<Vec<u8>, TerminalError>;

    /// Polls for an ISO 14443 type B card and returns its PUPI.
    fn poll_type_b(&self) -> Result<Vec<u8>, TerminalError>;

    /// Polls for a FeliCa card and returns its IDm.
    fn poll_type_f(&self) -> Result<Vec<u8>, TerminalError>;

    /// Restarts the terminal itself.
    fn restart_target(&self) -> Result<(), TerminalError>;
}

// ── Tests ─────────────────────────────────────────────────────────────────────
