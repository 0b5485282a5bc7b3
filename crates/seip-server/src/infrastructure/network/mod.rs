//! Network infrastructure for the server.
//!
//! # Sub-modules
//!
//! - **`transport`** – The listening socket and the per-client connection.
//!   Frames every packet with a 4-byte length prefix and implements the
//!   dispatcher's `PacketChannel` trait over a `TcpStream`.
//!
//! - **`acceptor`** – The long-lived accept loop and the short-lived
//!   handshake task that reads each new client's name and registers it.

pub mod acceptor;
pub mod transport;
