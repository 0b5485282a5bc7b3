//! Infrastructure layer for the client application.
//!
//! **Dependency rule**: this layer may depend on `application` and `seip_core`,
//! but MUST NOT be imported by the `application` layer.
//!
//! # Sub-modules
//!
//! - **`network`** – TCP session with the server: connect, send the name
//!   packet, then serve framed requests one at a time until told to stop.
//!
//! - **`terminal`** – [`TerminalLayer`](crate::application::terminal::TerminalLayer)
//!   implementations.  Only the in-memory `SimulatedTerminal` ships here;
//!   a PC/SC reader driver would sit next to it.

pub mod network;
pub mod terminal;
