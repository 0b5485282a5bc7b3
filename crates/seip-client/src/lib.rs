//! seip-client library entry point.
//!
//! Re-exports all public modules so that integration tests in `tests/`
//! and the binary entry point in `main.rs` share the same module tree.
//!
//! # What does seip-client do? (for beginners)
//!
//! The *client* runs on the machine that has the contactless terminal
//! plugged in.  The test harness never talks to the terminal directly; it
//! talks to the *server*, and the server forwards each request to a client.
//!
//! The client application:
//!
//! 1. Connects to the server over TCP and sends its name as the first
//!    packet (the handshake).
//! 2. Waits for request packets.  Each one carries a request code such as
//!    `REQ_POLL_TYPE_B` and an optional `data` string (for example a hex
//!    encoded APDU).
//! 3. Looks up the handler registered for that code and runs it against the
//!    [`TerminalLayer`](application::terminal::TerminalLayer).
//! 4. Sends back exactly one response packet per request.
//! 5. Stops when the server sends `REQ_DISCONNECT` or closes the socket.

/// Application layer: request handling for the client.
pub mod application;

/// Infrastructure layer: network session and terminal adapters.
pub mod infrastructure;

pub use application::client_engine::{ClientEngine, HandledPacket};
pub use application::requests::{RequestHandler, RequestRegistry};
pub use application::terminal::{TerminalError, TerminalLayer};
pub use infrastructure::network::{ClientError, ClientSession, SessionConfig, SessionEnd};
pub use infrastructure::terminal::SimulatedTerminal;
