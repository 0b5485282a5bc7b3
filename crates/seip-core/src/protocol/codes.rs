//! Numeric error codes carried in the `err_*_code` fields of a response.
//!
//! Codes are negative so that a caller can test `code < 0` for "some error
//! happened" without caring which one.  The values are part of the wire
//! contract with the test harness and must never be renumbered.

/// A lifecycle precondition was violated (e.g. request before `startListening`).
pub const ERR_INVALID_STATE: i32 = -1;
/// Any socket-level failure: bind, send, receive, or a dead connection.
pub const ERR_NETWORK: i32 = -2;
/// The caller's budget elapsed before the client answered.
pub const ERR_TIMEOUT: i32 = -3;
/// The target client id is not in the registry.
pub const ERR_CLIENT_CLOSED: i32 = -4;
/// A received payload was not a valid JSON document of the expected shape.
pub const ERR_JSON_PARSING: i32 = -5;
/// The configuration source could not be read or parsed.
pub const ERR_INVALID_CONFIG: i32 = -6;
/// The client has no handler registered for the request code.
pub const ERR_REQUEST_NOT_SUPPORTED: i32 = -7;
/// The client could not decode the request or its `data` field.
pub const ERR_INVALID_REQUEST: i32 = -8;
/// The terminal (reader) reported a failure.
pub const ERR_TERMINAL: i32 = -9;
/// The card (secure element) reported a failure.
pub const ERR_CARD: i32 = -10;
