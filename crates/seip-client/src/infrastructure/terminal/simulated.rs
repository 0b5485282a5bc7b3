//! In-memory terminal used by the binary and by integration tests.
//!
//! # Behaviour
//!
//! - The RF field starts **on**.  `power_off_field` / `power_on_field`
//!   toggle it and `cold_reset` turns it back on.
//! - Polling with the field off is a terminal-layer failure.  Polling with
//!   the field on but no card present is a card-layer failure.
//! - `send_command` echoes the APDU back followed by the status word
//!   `90 00`, which is enough for round-trip tests through the server.
//! - `set_failing(true)` makes every operation fail in the terminal layer,
//!   like an unplugged reader.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use crate::application::terminal::{TerminalError, TerminalLayer};

/// Default card identifier reported by the polls.
pub const DEFAULT_CARD_UID: [u8; 4] = [0x08, 0x12, 0x34, 0x56];

/// Answer-to-reset reported by both resets.
pub const DEFAULT_ATR: [u8; 6] = [0x3B, 0x80, 0x80, 0x01, 0x01, 0x80];

/// Status word appended to every echoed APDU.
const SW_SUCCESS: [u8; 2] = [0x90, 0x00];

pub struct SimulatedTerminal {
    card_uid: Option<Vec<u8>>,
    field_on: AtomicBool,
    failing: AtomicBool,
    restarts: AtomicU32,
}

impl Default for SimulatedTerminal {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedTerminal {
    /// Terminal with the field on and a card carrying [`DEFAULT_CARD_UID`].
    pub fn new() -> Self {
        Self {
            card_uid: Some(DEFAULT_CARD_UID.to_vec()),
            field_on: AtomicBool::new(true),
            failing: AtomicBool::new(false),
            restarts: AtomicU32::new(0),
        }
    }

    /// Replaces the card identifier.
    pub fn with_card_uid(mut self, uid: Vec<u8>) -> Self {
        self.card_uid = Some(uid);
        self
    }

    /// Removes the card from the field.
    pub fn without_card(mut self) -> Self {
        self.card_uid = None;
        self
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::Relaxed);
    }

    pub fn is_field_on(&self) -> bool {
        self.field_on.load(Ordering::Relaxed)
    }

    /// Number of `restart_target` calls so far.
    pub fn restart_count(&self) -> u32 {
        self.restarts.load(Ordering::Relaxed)
    }

    fn check_reader(&self) -> Result<(), TerminalError> {
        if self.failing.load(Ordering::Relaxed) {
            return Err(TerminalError::Terminal("reader not responding".into()));
        }
        Ok(())
    }

    fn card_in_field(&self) -> Result<&[u8], TerminalError> {
        self.check_reader()?;
        if !self.is_field_on() {
            return Err(TerminalError::Terminal("RF field is off".into()));
        }
        self.card_uid
            .as_deref()
            .ok_or_else(|| TerminalError::Card("no card in field".into()))
    }
}

impl TerminalLayer for SimulatedTerminal {
    fn diag(&self) -> Result<String, TerminalError> {
        self.check_reader()?;
        let field = if self.is_field_on() { "on" } else { "off" };
        let card = if self.card_uid.is_some() { "present" } else { "absent" };
        Ok(format!("simulated terminal [field:{field}][card:{card}]"))
    }

    fn send_command(&self, apdu: &[u8]) -> Result<Vec<u8>, TerminalError> {
        self.card_in_field()?;
        let mut reply = apdu.to_vec();
        reply.extend_from_slice(&SW_SUCCESS);
        Ok(reply)
    }

    fn cold_reset(&self) -> Result<Vec<u8>, TerminalError> {
        self.check_reader()?;
        self.field_on.store(true, Ordering::Relaxed);
        self.card_in_field()?;
        Ok(DEFAULT_ATR.to_vec())
    }

    fn warm_reset(&self) -> Result<Vec<u8>, TerminalError> {
        self.card_in_field()?;
        Ok(DEFAULT_ATR.to_vec())
    }

    fn power_off_field(&self) -> Result<(), TerminalError> {
        self.check_reader()?;
        self.field_on.store(false, Ordering::Relaxed);
        Ok(())
    }

    fn power_on_field(&self) -> Result<(), TerminalError> {
        self.check_reader()?;
        self.field_on.store(true, Ordering::Relaxed);
        Ok(())
    }

    fn poll_type_a(&self) -> Result<Vec<u8>, TerminalError> {
        self.card_in_field().map(<[u8]>::to_vec)
    }

    fn poll_type_b(&self) -> Result<Vec<u8>, TerminalError> {
        self.card_in_field().map(<[u8]>::to_vec)
    }

    fn poll_type_f(&self) -> Result<Vec<u8>, TerminalError> {
        self.card_in_field().map(<[u8]>::to_vec)
    }

    fn restart_target(&self) -> Result<(), TerminalError> {
        self.check_reader()?;
        self.restarts.fetch_add(1, Ordering::Relaxed);
        self.field_on.store(true, Ordering::Relaxed);
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
