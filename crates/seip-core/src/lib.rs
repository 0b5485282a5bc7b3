//! # seip-core
//!
//! Shared library for the SE IP connector containing the packet framing,
//! the request/response message types, and the numeric error codes.
//!
//! This crate is used by both the server and the client applications.
//! It knows nothing about registries, lifecycles, or terminals.
//!
//! # Architecture overview
//!
//! A conformance test harness drives a secure element that sits behind a
//! terminal on another machine.  The *server* runs next to the harness; the
//! *client* runs next to the terminal and connects to the server.  The server
//! then sends one request at a time to a client and waits for its response.
//!
//! - **`protocol::framing`** – How bytes travel over the TCP stream.  Every
//!   packet is a 4-byte big-endian length followed by that many bytes.
//!
//! - **`protocol::messages`** – What the bytes mean.  Requests and responses
//!   are JSON documents; responses carry an OK/KO status and at most one
//!   error attributed to the server, client, terminal, or card layer.
//!
//! - **`protocol::codes`** – Stable negative error codes shared by both sides.
//!
//! - **`hex`** – APDU payloads travel as hex strings inside the JSON `data`
//!   field.

pub mod hex;
pub mod protocol;

pub use protocol::codes;
pub use protocol::framing::{
    write_frame, FrameError, FrameLimits, FrameReader, OversizePolicy, ReceiveOutcome,
    DEFAULT_BUFLEN, LENGTH_PREFIX_SIZE,
};
pub use protocol::messages::{
    ErrorLayer, LayerError, ProtocolError, RequestCode, RequestMessage, ResponsePacket, Status,
};
