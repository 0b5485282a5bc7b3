//! Application layer for the client application.
//!
//! # What lives here?
//!
//! - **`terminal`** – The [`TerminalLayer`](terminal::TerminalLayer) trait.
//!   Everything the client can do to a terminal goes through it, so the
//!   handlers never depend on a concrete reader driver.
//!
//! - **`requests`** – The request-code → handler registry.  One shared,
//!   stateless handler instance per code.
//!
//! - **`handlers`** – The handlers themselves, one per request code.
//!
//! - **`client_engine`** – Turns one received packet into one response
//!   packet, and tells the session whether to stop afterwards.

pub mod client_engine;
pub mod handlers;
pub mod requests;
pub mod terminal;
