//! Application layer of the server.
//!
//! # What is the "application" layer? (for beginners)
//!
//! In Clean Architecture the *application* layer sits between the shared
//! protocol types (`seip_core`) and the infrastructure (sockets, files).
//!
//! Code in this layer:
//!
//! - **Orchestrates** the protocol types to fulfil one operation, e.g. "send
//!   this request to client 3 and wait at most 2 seconds for the answer".
//! - **Depends on abstractions** (the [`dispatcher::PacketChannel`] trait)
//!   rather than on `TcpStream`, so every rule here can be tested with a
//!   scripted fake connection.
//! - **Contains no socket calls and no file system access**.
//!
//! # Sub-modules
//!
//! - **`errors`** – The server error taxonomy and its mapping onto the
//!   uniform [`seip_core::ResponsePacket`].
//!
//! - **`lifecycle`** – The server state machine
//!   (`Instancied → Initialized → Started ⇄ Disconnected`).
//!
//! - **`client_registry`** – Concurrent map of connected clients keyed by a
//!   monotonically increasing id.
//!
//! - **`dispatcher`** – The request/response correlation core: one request
//!   per client turn, raced against the caller's timeout.

pub mod client_registry;
pub mod dispatcher;
pub mod errors;
pub mod lifecycle;
