//! seip-server library entry point.
//!
//! Re-exports all public modules so that integration tests in `tests/`
//! and the binary entry point in `main.rs` share the same module tree.

pub mod application;
pub mod engine;
pub mod infrastructure;

pub use application::client_registry::ClientId;
pub use application::lifecycle::ServerState;
pub use engine::ServerEngine;
pub use infrastructure::storage::config::{load_config, ServerConfig};
