//! Protocol module containing the framing layer, message types, and error codes.

pub mod codes;
pub mod framing;
pub mod messages;

pub use framing::{write_frame, FrameError, FrameLimits, FrameReader, OversizePolicy, ReceiveOutcome};
pub use messages::*;
